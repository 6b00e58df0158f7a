    use capstan_core::*;
    use capstan_memory::MemoryStore;

    fn engine() -> Engine<MemoryStore> {
        Engine::new(MemoryStore::new())
    }

    fn put_simple(engine: &mut Engine<MemoryStore>, now: Timestamp, jid: &str) {
        engine
            .put(now, Some("worker"), "queue", jid, "klass", "{}", 0, Default::default())
            .unwrap();
    }

    #[test]
    fn test_put_creates_waiting_job() {
        let mut engine = engine();
        let outcome = engine
            .put(12345, Some("worker"), "queue", "jid", "klass", "{}", 0, Default::default())
            .unwrap();
        assert_eq!(outcome, PutOutcome::Queued("jid".into()));

        let job = engine.get_job(12345, "jid").unwrap();
        assert_eq!(job.state, JobState::Waiting);
        assert_eq!(job.queue.as_deref(), Some("queue"));
        assert_eq!(job.retries, 5);
        assert_eq!(job.remaining, 5);
        assert_eq!(job.expires, 0);
        assert_eq!(job.worker, "");
        assert_eq!(job.history, vec![HistoryEvent::put("queue", 12345)]);
    }

    #[test]
    fn test_put_with_delay_schedules() {
        let mut engine = engine();
        engine
            .put(0, Some("worker"), "queue", "jid", "klass", "{}", 1, Default::default())
            .unwrap();
        assert_eq!(engine.get_job(0, "jid").unwrap().state, JobState::Scheduled);
        assert!(engine.pop(0, "queue", "worker", 10).unwrap().is_empty());
        assert_eq!(engine.pop(2, "queue", "worker", 10).unwrap().len(), 1);
    }

    #[test]
    fn test_put_retries_resets_remaining() {
        let mut engine = engine();
        let opts = PutOptions {
            retries: Some(2),
            ..Default::default()
        };
        engine
            .put(0, None, "queue", "jid", "klass", "{}", 0, opts)
            .unwrap();
        let job = engine.get_job(0, "jid").unwrap();
        assert_eq!(job.retries, 2);
        assert_eq!(job.remaining, 2);
    }

    #[test]
    fn test_put_depends_links_both_sides() {
        let mut engine = engine();
        put_simple(&mut engine, 0, "a");
        let opts = PutOptions {
            depends: Some(vec!["a".into()]),
            ..Default::default()
        };
        engine.put(0, None, "queue", "b", "klass", "{}", 0, opts).unwrap();
        let a = engine.get_job(0, "a").unwrap();
        let b = engine.get_job(0, "b").unwrap();
        assert!(a.dependents.contains("b"));
        assert!(b.dependencies.contains("a"));
        assert_eq!(b.state, JobState::Depends);
    }

    #[test]
    fn test_put_depends_filters_complete_jobs() {
        let mut engine = engine();
        put_simple(&mut engine, 0, "a");
        engine.pop(0, "queue", "worker", 1).unwrap();
        engine
            .complete(1, "a", "worker", "queue", "{}", Default::default())
            .unwrap();
        let opts = PutOptions {
            depends: Some(vec!["a".into()]),
            ..Default::default()
        };
        engine.put(2, None, "queue", "b", "klass", "{}", 0, opts).unwrap();
        let b = engine.get_job(2, "b").unwrap();
        assert!(b.dependencies.is_empty());
        assert_eq!(b.state, JobState::Waiting);
    }

    #[test]
    fn test_move_between_queues() {
        let mut engine = engine();
        put_simple(&mut engine, 0, "jid");
        engine
            .put(0, Some("worker"), "other", "jid", "klass", "{}", 0, Default::default())
            .unwrap();
        assert!(engine.pop(1, "queue", "worker", 10).unwrap().is_empty());
        let popped = engine.pop(1, "other", "worker", 10).unwrap();
        assert_eq!(popped[0].jid, "jid");
        let history: Vec<&str> = popped[0]
            .history
            .iter()
            .map(|e| e.what.as_str())
            .collect();
        assert_eq!(history, vec!["put", "put", "popped"]);
    }

    #[test]
    fn test_move_keeps_unoverridden_attributes() {
        let mut engine = engine();
        let opts = PutOptions {
            priority: Some(1),
            tags: Some(vec!["foo".into()]),
            retries: Some(2),
            ..Default::default()
        };
        engine.put(0, None, "queue", "jid", "klass", "{}", 0, opts).unwrap();
        engine
            .put(0, None, "other", "jid", "klass", "{}", 0, Default::default())
            .unwrap();
        let job = engine.get_job(0, "jid").unwrap();
        assert_eq!(job.priority, 1);
        assert_eq!(job.tags, vec!["foo".to_string()]);
        assert_eq!(job.retries, 2);
    }

    #[test]
    fn test_move_with_depends_override_rewires_edges() {
        let mut engine = engine();
        put_simple(&mut engine, 0, "a");
        put_simple(&mut engine, 0, "b");
        let opts = PutOptions {
            depends: Some(vec!["a".into()]),
            ..Default::default()
        };
        engine.put(0, None, "queue", "c", "klass", "{}", 0, opts).unwrap();
        let opts = PutOptions {
            depends: Some(vec!["b".into()]),
            ..Default::default()
        };
        engine.put(0, None, "queue", "c", "klass", "{}", 0, opts).unwrap();
        assert!(engine.get_job(0, "a").unwrap().dependents.is_empty());
        assert!(engine.get_job(0, "b").unwrap().dependents.contains("c"));
        let c = engine.get_job(0, "c").unwrap();
        assert!(c.dependencies.contains("b"));
        assert!(!c.dependencies.contains("a"));
    }

    #[test]
    fn test_replace_off_running_unexpired_is_sentinel() {
        let mut engine = engine();
        let opts = PutOptions {
            replace: Some(false),
            ..Default::default()
        };
        engine
            .put(0, None, "queue", "jid-1", "klass", "{}", 0, opts.clone())
            .unwrap();
        engine.pop(1, "queue", "worker-1", 1).unwrap();

        let outcome = engine
            .put(5, None, "queue", "jid-1", "klass", "{}", 0, opts.clone())
            .unwrap();
        assert_eq!(outcome, PutOutcome::NotReplaced);

        // Past expires the stale lease is forfeited.
        let outcome = engine
            .put(65, None, "queue", "jid-1", "klass", "{}", 0, opts)
            .unwrap();
        assert_eq!(outcome, PutOutcome::Queued("jid-1".into()));
    }

    #[test]
    fn test_replace_default_overwrites_running() {
        let mut engine = engine();
        put_simple(&mut engine, 0, "jid-1");
        engine.pop(1, "queue", "worker-1", 1).unwrap();
        let outcome = engine
            .put(5, None, "queue", "jid-1", "klass", "{}", 0, Default::default())
            .unwrap();
        assert_eq!(outcome, PutOutcome::Queued("jid-1".into()));
        assert_eq!(engine.get_job(5, "jid-1").unwrap().state, JobState::Waiting);
    }

    #[test]
    fn test_interval_throttles_after_completion() {
        let mut engine = engine();
        let opts = PutOptions {
            replace: Some(false),
            interval: Some(10),
            ..Default::default()
        };
        engine
            .put(0, None, "queue", "jid-1", "klass", "{}", 0, opts.clone())
            .unwrap();
        engine.pop(1, "queue", "worker-1", 1).unwrap();
        engine
            .complete(5, "jid-1", "worker-1", "queue", "{}", Default::default())
            .unwrap();

        engine
            .put(6, None, "queue", "jid-1", "klass", "{}", 0, opts)
            .unwrap();
        assert!(engine.pop(7, "queue", "worker-1", 1).unwrap().is_empty());
        let popped = engine.pop(15, "queue", "worker-1", 1).unwrap();
        assert_eq!(popped[0].jid, "jid-1");
    }

    #[test]
    fn test_interval_persists_when_omitted() {
        let mut engine = engine();
        let opts = PutOptions {
            replace: Some(false),
            interval: Some(10),
            ..Default::default()
        };
        engine
            .put(0, None, "queue", "jid-1", "klass", "{}", 0, opts)
            .unwrap();
        engine.pop(1, "queue", "worker-1", 1).unwrap();
        engine
            .complete(5, "jid-1", "worker-1", "queue", "{}", Default::default())
            .unwrap();

        let opts = PutOptions {
            replace: Some(false),
            ..Default::default()
        };
        engine
            .put(6, None, "queue", "jid-1", "klass", "{}", 0, opts)
            .unwrap();
        assert!(engine.pop(7, "queue", "worker-1", 1).unwrap().is_empty());
        assert_eq!(engine.pop(15, "queue", "worker-1", 1).unwrap().len(), 1);
    }

    #[test]
    fn test_interval_change_takes_effect_immediately() {
        let mut engine = engine();
        let opts = PutOptions {
            replace: Some(false),
            interval: Some(10),
            ..Default::default()
        };
        engine
            .put(0, None, "queue", "jid-1", "klass", "{}", 0, opts.clone())
            .unwrap();
        engine.pop(1, "queue", "worker-1", 1).unwrap();
        engine
            .complete(5, "jid-1", "worker-1", "queue", "{}", Default::default())
            .unwrap();

        engine
            .put(6, None, "queue", "jid-1", "klass", "{}", 0, opts)
            .unwrap();
        assert!(engine.pop(7, "queue", "worker-1", 1).unwrap().is_empty());

        let opts = PutOptions {
            replace: Some(false),
            interval: Some(0),
            ..Default::default()
        };
        engine
            .put(8, None, "queue", "jid-1", "klass", "{}", 0, opts)
            .unwrap();
        assert_eq!(engine.pop(8, "queue", "worker-1", 1).unwrap().len(), 1);
    }

    #[test]
    fn test_pop_priority_then_time_order() {
        let mut engine = engine();
        for priority in -10..10 {
            let opts = PutOptions {
                priority: Some(priority),
                ..Default::default()
            };
            engine
                .put(0, None, "queue", &priority.to_string(), "klass", "{}", 0, opts)
                .unwrap();
        }
        let jids: Vec<String> = engine
            .pop(1, "queue", "worker", 100)
            .unwrap()
            .into_iter()
            .map(|j| j.jid)
            .collect();
        let expected: Vec<String> = (-10..10).rev().map(|p| p.to_string()).collect();
        assert_eq!(jids, expected);
    }

    #[test]
    fn test_pop_count_limits() {
        let mut engine = engine();
        for i in 0..10 {
            put_simple(&mut engine, i, &i.to_string());
        }
        let first: Vec<String> = engine
            .pop(100, "queue", "worker", 7)
            .unwrap()
            .into_iter()
            .map(|j| j.jid)
            .collect();
        assert_eq!(first, (0..7).map(|i| i.to_string()).collect::<Vec<_>>());
        let rest = engine.pop(100, "queue", "worker", 10).unwrap();
        assert_eq!(rest.len(), 3);
    }

    #[test]
    fn test_pop_sets_lease_and_history() {
        let mut engine = engine();
        put_simple(&mut engine, 0, "jid");
        let job = engine.pop(1, "queue", "worker", 1).unwrap().remove(0);
        assert_eq!(job.state, JobState::Running);
        assert_eq!(job.worker, "worker");
        assert_eq!(job.expires, 61);
        assert_eq!(job.history.last().unwrap().what, "popped");
    }

    #[test]
    fn test_pop_respects_max_concurrency() {
        let mut engine = engine();
        engine.config_set(0, "queue-max-concurrency", 5).unwrap();
        for i in 0..10 {
            put_simple(&mut engine, i, &i.to_string());
        }
        assert_eq!(engine.pop(10, "queue", "worker", 10).unwrap().len(), 5);
        for i in 0..5 {
            engine
                .complete(10, &i.to_string(), "worker", "queue", "{}", Default::default())
                .unwrap();
            assert_eq!(engine.pop(10, "queue", "worker", 10).unwrap().len(), 1);
        }
    }

    #[test]
    fn test_reduced_max_concurrency_blocks_until_drained() {
        let mut engine = engine();
        engine.config_set(0, "heartbeat", 1000).unwrap();
        for i in 0..100 {
            put_simple(&mut engine, i, &i.to_string());
        }
        engine.pop(100, "queue", "worker", 10).unwrap();
        engine.config_set(100, "queue-max-concurrency", 5).unwrap();
        for i in 0..6 {
            assert!(engine.pop(100, "queue", "worker", 10).unwrap().is_empty());
            engine
                .complete(100, &i.to_string(), "worker", "queue", "{}", Default::default())
                .unwrap();
        }
        assert_eq!(engine.pop(100, "queue", "worker", 10).unwrap().len(), 1);
    }

    #[test]
    fn test_stalled_job_pops_past_concurrency_and_costs_an_attempt() {
        let mut engine = engine();
        engine.config_set(0, "queue-max-concurrency", 1).unwrap();
        engine.config_set(0, "grace-period", 0).unwrap();
        put_simple(&mut engine, 0, "jid");
        let job = engine.pop(0, "queue", "worker", 10).unwrap().remove(0);
        let job = engine
            .pop(job.expires + 10, "queue", "worker", 10)
            .unwrap()
            .remove(0);
        assert_eq!(job.jid, "jid");
        assert_eq!(job.remaining, 4);
        assert_eq!(job.state, JobState::Running);
    }

    #[test]
    fn test_stalled_job_exhausts_to_failed() {
        let mut engine = engine();
        engine.config_set(0, "grace-period", 0).unwrap();
        let opts = PutOptions {
            retries: Some(0),
            ..Default::default()
        };
        engine.put(0, None, "queue", "jid", "klass", "{}", 0, opts).unwrap();
        engine.pop(0, "queue", "worker", 1).unwrap();
        // The takeover costs the last attempt; nothing is handed out.
        assert!(engine.pop(100, "queue", "worker-2", 1).unwrap().is_empty());
        let job = engine.get_job(100, "jid").unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(
            job.failure.as_ref().unwrap().group,
            "failed-retries-exhausted"
        );
    }

    #[test]
    fn test_fail_frees_concurrency_slot() {
        let mut engine = engine();
        engine.config_set(0, "queue-max-concurrency", 1).unwrap();
        put_simple(&mut engine, 0, "a");
        put_simple(&mut engine, 1, "b");
        engine.pop(2, "queue", "worker", 10).unwrap();
        engine
            .fail(3, "a", "worker", "group", "message", None)
            .unwrap();
        let popped = engine.pop(4, "queue", "worker", 10).unwrap();
        assert_eq!(popped[0].jid, "b");
    }

    #[test]
    fn test_fail_then_put_resurrects() {
        let mut engine = engine();
        put_simple(&mut engine, 0, "jid");
        engine.pop(1, "queue", "worker", 1).unwrap();
        engine
            .fail(2, "jid", "worker", "group", "message", None)
            .unwrap();
        let job = engine.get_job(2, "jid").unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.failure.as_ref().unwrap().group, "group");

        put_simple(&mut engine, 3, "jid");
        let job = engine.get_job(3, "jid").unwrap();
        assert_eq!(job.state, JobState::Waiting);
        assert_eq!(job.remaining, job.retries);
        assert!(job.failure.is_none());
    }

    #[test]
    fn test_fail_requires_running_and_owner() {
        let mut engine = engine();
        put_simple(&mut engine, 0, "jid");
        assert!(matches!(
            engine.fail(1, "jid", "worker", "group", "message", None),
            Err(Error::WrongState { .. })
        ));
        engine.pop(1, "queue", "worker", 1).unwrap();
        assert!(matches!(
            engine.fail(2, "jid", "impostor", "group", "message", None),
            Err(Error::WrongWorker { .. })
        ));
    }

    #[test]
    fn test_complete_requires_owner_and_queue() {
        let mut engine = engine();
        put_simple(&mut engine, 0, "jid");
        engine.pop(1, "queue", "worker", 1).unwrap();
        assert!(matches!(
            engine.complete(2, "jid", "impostor", "queue", "{}", Default::default()),
            Err(Error::WrongWorker { .. })
        ));
        assert!(matches!(
            engine.complete(2, "jid", "worker", "other", "{}", Default::default()),
            Err(Error::WrongState { .. })
        ));
    }

    #[test]
    fn test_complete_records_result_and_releases_dependents() {
        let mut engine = engine();
        put_simple(&mut engine, 0, "a");
        let opts = PutOptions {
            depends: Some(vec!["a".into()]),
            ..Default::default()
        };
        engine.put(0, None, "queue", "b", "klass", "{}", 0, opts).unwrap();
        engine.pop(1, "queue", "worker", 1).unwrap();
        let outcome = engine
            .complete(2, "a", "worker", "queue", "{\"ok\":true}", Default::default())
            .unwrap();
        assert_eq!(outcome, CompleteOutcome::Complete);

        let a = engine.get_job(2, "a").unwrap();
        assert_eq!(a.state, JobState::Complete);
        assert_eq!(a.result_data, "{\"ok\":true}");
        assert_eq!(a.queue, None);

        let b = engine.get_job(2, "b").unwrap();
        assert_eq!(b.state, JobState::Waiting);
        assert!(b.dependencies.is_empty());
    }

    #[test]
    fn test_complete_with_next_advances() {
        let mut engine = engine();
        put_simple(&mut engine, 0, "jid");
        engine.pop(0, "queue", "worker", 10).unwrap();
        let opts = CompleteOptions {
            next: Some("another".into()),
            ..Default::default()
        };
        let outcome = engine
            .complete(1, "jid", "worker", "queue", "{}", opts)
            .unwrap();
        assert_eq!(outcome, CompleteOutcome::Advanced);
        let job = engine.get_job(1, "jid").unwrap();
        assert_eq!(job.queue.as_deref(), Some("another"));
        assert_eq!(job.state, JobState::Waiting);
        assert_eq!(engine.pop(2, "another", "worker", 1).unwrap().len(), 1);
    }

    #[test]
    fn test_retry_decrements_and_requeues() {
        let mut engine = engine();
        put_simple(&mut engine, 0, "jid");
        engine.pop(1, "queue", "worker", 1).unwrap();
        let remaining = engine
            .retry(2, "jid", "queue", "worker", 0, None)
            .unwrap();
        assert_eq!(remaining, 4);
        let job = engine.get_job(2, "jid").unwrap();
        assert_eq!(job.state, JobState::Waiting);
        assert_eq!(job.worker, "");
    }

    #[test]
    fn test_retry_with_delay_schedules() {
        let mut engine = engine();
        put_simple(&mut engine, 0, "jid");
        engine.pop(1, "queue", "worker", 1).unwrap();
        engine.retry(2, "jid", "queue", "worker", 10, None).unwrap();
        assert_eq!(engine.get_job(2, "jid").unwrap().state, JobState::Scheduled);
        assert!(engine.pop(3, "queue", "worker", 1).unwrap().is_empty());
        assert_eq!(engine.pop(12, "queue", "worker", 1).unwrap().len(), 1);
    }

    #[test]
    fn test_retry_exhaustion_fails_job() {
        let mut engine = engine();
        let opts = PutOptions {
            retries: Some(0),
            ..Default::default()
        };
        engine.put(0, None, "queue", "jid", "klass", "{}", 0, opts).unwrap();
        engine.pop(1, "queue", "worker", 1).unwrap();
        let remaining = engine
            .retry(2, "jid", "queue", "worker", 0, None)
            .unwrap();
        assert_eq!(remaining, -1);
        let job = engine.get_job(2, "jid").unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(
            job.failure.as_ref().unwrap().group,
            "failed-retries-exhausted"
        );
    }

    #[test]
    fn test_heartbeat_extends_lease() {
        let mut engine = engine();
        put_simple(&mut engine, 0, "jid");
        engine.pop(1, "queue", "worker", 1).unwrap();
        let expires = engine.heartbeat(30, "jid", "worker", None).unwrap();
        assert_eq!(expires, 90);
        assert!(matches!(
            engine.heartbeat(31, "jid", "impostor", None),
            Err(Error::WrongWorker { .. })
        ));
    }

    #[test]
    fn test_heartbeat_requires_running(){
        let mut engine = engine();
        put_simple(&mut engine, 0, "jid");
        assert!(matches!(
            engine.heartbeat(1, "jid", "worker", None),
            Err(Error::WrongState { .. })
        ));
    }

    #[test]
    fn test_cancel_removes_job_and_leaves_dependents_dangling() {
        let mut engine = engine();
        put_simple(&mut engine, 0, "a");
        let opts = PutOptions {
            depends: Some(vec!["a".into()]),
            ..Default::default()
        };
        engine.put(0, None, "queue", "b", "klass", "{}", 0, opts).unwrap();
        engine.cancel(1, "a").unwrap();
        assert!(matches!(engine.get_job(1, "a"), Err(Error::NotFound { .. })));
        // The dependent is orphaned, not released.
        let b = engine.get_job(1, "b").unwrap();
        assert_eq!(b.state, JobState::Depends);
        assert!(b.dependencies.contains("a"));
        assert!(engine.pop(2, "queue", "worker", 10).unwrap().is_empty());
    }

    #[test]
    fn test_cancel_releases_resources() {
        let mut engine = engine();
        engine.resource_set(0, "r-1", 1).unwrap();
        let opts = PutOptions {
            resources: Some(vec!["r-1".into()]),
            ..Default::default()
        };
        engine
            .put(0, None, "queue", "a", "klass", "{}", 0, opts.clone())
            .unwrap();
        engine.put(1, None, "queue", "b", "klass", "{}", 0, opts).unwrap();
        engine.cancel(2, "a").unwrap();
        assert_eq!(engine.resource_locks(2, "r-1").unwrap(), vec!["b"]);
        assert_eq!(engine.get_job(2, "b").unwrap().state, JobState::Waiting);
    }

    #[test]
    fn test_priority_rescores_waiting_job() {
        let mut engine = engine();
        let opts = PutOptions {
            priority: Some(0),
            ..Default::default()
        };
        engine.put(0, None, "queue", "a", "klass", "{}", 0, opts).unwrap();
        let opts = PutOptions {
            priority: Some(1),
            ..Default::default()
        };
        engine.put(0, None, "queue", "b", "klass", "{}", 0, opts).unwrap();
        let peeked: Vec<String> = engine
            .peek(0, "queue", 100)
            .unwrap()
            .into_iter()
            .map(|j| j.jid)
            .collect();
        assert_eq!(peeked, vec!["b", "a"]);

        engine.priority(0, "a", 2).unwrap();
        let peeked: Vec<String> = engine
            .peek(0, "queue", 100)
            .unwrap()
            .into_iter()
            .map(|j| j.jid)
            .collect();
        assert_eq!(peeked, vec!["a", "b"]);
    }

    #[test]
    fn test_pause_blocks_pop() {
        let mut engine = engine();
        for i in 0..10 {
            put_simple(&mut engine, 0, &i.to_string());
        }
        engine.pause(0, "queue").unwrap();
        assert!(engine.paused(0, "queue").unwrap());
        assert!(engine.pop(0, "queue", "worker", 100).unwrap().is_empty());
        engine.unpause(0, "queue").unwrap();
        assert!(!engine.paused(0, "queue").unwrap());
        assert_eq!(engine.pop(0, "queue", "worker", 100).unwrap().len(), 10);
    }

    #[test]
    fn test_peek_is_nondestructive_prefix_of_pop() {
        let mut engine = engine();
        for i in 0..5 {
            put_simple(&mut engine, i, &i.to_string());
        }
        let peeked: Vec<String> = engine
            .peek(10, "queue", 3)
            .unwrap()
            .into_iter()
            .map(|j| j.jid)
            .collect();
        let popped: Vec<String> = engine
            .pop(10, "queue", "worker", 3)
            .unwrap()
            .into_iter()
            .map(|j| j.jid)
            .collect();
        assert_eq!(peeked, popped);
    }

    #[test]
    fn test_track_untrack_round_trip() {
        let mut engine = engine();
        put_simple(&mut engine, 0, "jid");
        engine.track(1, "jid").unwrap();
        assert!(engine.get_job(1, "jid").unwrap().tracked);
        let tracked = engine.tracked(1).unwrap();
        assert_eq!(tracked.len(), 1);
        assert_eq!(tracked[0].jid, "jid");
        engine.untrack(2, "jid").unwrap();
        assert!(!engine.get_job(2, "jid").unwrap().tracked);
        assert!(engine.tracked(2).unwrap().is_empty());
    }

    #[test]
    fn test_tag_add_remove_get() {
        let mut engine = engine();
        put_simple(&mut engine, 0, "a");
        put_simple(&mut engine, 1, "b");
        let tags = engine.tag_add(2, "a", &["red".into(), "blue".into()]).unwrap();
        assert_eq!(tags, vec!["red", "blue"]);
        engine.tag_add(3, "b", &["red".into()]).unwrap();

        assert_eq!(engine.tag_get(4, "red", 0, 10).unwrap(), vec!["a", "b"]);
        assert_eq!(engine.tag_top(4, 0, 10).unwrap(), vec!["red", "blue"]);

        let tags = engine.tag_remove(5, "a", &["red".into()]).unwrap();
        assert_eq!(tags, vec!["blue"]);
        assert_eq!(engine.tag_get(5, "red", 0, 10).unwrap(), vec!["b"]);
    }

    #[test]
    fn test_depends_add_and_remove() {
        let mut engine = engine();
        put_simple(&mut engine, 0, "a");
        put_simple(&mut engine, 0, "b");
        let opts = PutOptions {
            depends: Some(vec!["a".into()]),
            ..Default::default()
        };
        engine.put(0, None, "queue", "c", "klass", "{}", 0, opts).unwrap();
        engine.depends_add(1, "c", &["b".into()]).unwrap();
        assert_eq!(engine.get_job(1, "c").unwrap().dependencies.len(), 2);

        engine.depends_remove(2, "c", Some(&["a".into()])).unwrap();
        let c = engine.get_job(2, "c").unwrap();
        assert_eq!(c.state, JobState::Depends);
        assert!(c.dependencies.contains("b"));

        engine.depends_remove(3, "c", None).unwrap();
        assert_eq!(engine.get_job(3, "c").unwrap().state, JobState::Waiting);
        assert!(engine.get_job(3, "b").unwrap().dependents.is_empty());
    }

    #[test]
    fn test_depends_ops_require_depends_state() {
        let mut engine = engine();
        put_simple(&mut engine, 0, "a");
        assert!(matches!(
            engine.depends_add(1, "a", &["b".into()]),
            Err(Error::WrongState { .. })
        ));
    }

    #[test]
    fn test_retention_trims_oldest_completions() {
        let mut engine = engine();
        engine.config_set(0, "jobs-history-count", 3).unwrap();
        for i in 0..5 {
            let jid = i.to_string();
            put_simple(&mut engine, i, &jid);
            engine.pop(i, "queue", "worker", 1).unwrap();
            engine
                .complete(i, &jid, "worker", "queue", "{}", Default::default())
                .unwrap();
        }
        let complete = engine.jobs_complete(10, 0, 10).unwrap();
        assert_eq!(complete, vec!["4", "3", "2"]);
        assert!(matches!(engine.get_job(10, "0"), Err(Error::NotFound { .. })));
    }

    #[test]
    fn test_failed_operation_leaves_no_partial_state() {
        let mut engine = engine();
        put_simple(&mut engine, 0, "a");
        engine.pop(1, "queue", "worker", 1).unwrap();
        // A wrong-worker completion must not have removed the running entry.
        assert!(engine
            .complete(2, "a", "impostor", "queue", "{}", Default::default())
            .is_err());
        let counts = engine.queue_counts(2, "queue").unwrap();
        assert_eq!(counts.running, 1);
        let expires = engine.heartbeat(3, "a", "worker", None).unwrap();
        assert_eq!(expires, 63);
    }
