    use capstan_core::*;
    use capstan_memory::MemoryStore;

    fn engine() -> Engine<MemoryStore> {
        Engine::new(MemoryStore::new())
    }

    #[test]
    fn test_recur_rejects_nonpositive_interval() {
        let mut engine = engine();
        assert!(matches!(
            engine.recur(0, "queue", "t", "klass", "{}", 0, 0, Default::default()),
            Err(Error::Malformed { .. })
        ));
    }

    #[test]
    fn test_instances_materialize_at_nominal_times() {
        let mut engine = engine();
        engine
            .recur(0, "queue", "t", "klass", "{}", 10, 0, Default::default())
            .unwrap();
        let jobs = engine.peek(99, "queue", 100).unwrap();
        assert_eq!(jobs.len(), 10);
        assert_eq!(jobs[0].jid, "t-1");
        assert_eq!(jobs[9].jid, "t-10");
        // Nominal times, not the sweep time, order the instances.
        assert_eq!(jobs[0].put_time, 0);
        assert_eq!(jobs[9].put_time, 90);
    }

    #[test]
    fn test_offset_delays_first_instance() {
        let mut engine = engine();
        engine
            .recur(0, "queue", "t", "klass", "{}", 60, 10, Default::default())
            .unwrap();
        assert!(engine.pop(9, "queue", "worker", 10).unwrap().is_empty());
        let popped = engine.pop(10, "queue", "worker", 10).unwrap();
        assert_eq!(popped.len(), 1);
        assert_eq!(popped[0].jid, "t-1");
    }

    #[test]
    fn test_backlog_caps_catch_up() {
        let mut engine = engine();
        let opts = RecurOptions {
            backlog: Some(2),
            ..Default::default()
        };
        engine
            .recur(0, "queue", "t", "klass", "{}", 10, 0, opts)
            .unwrap();
        let popped = engine.pop(99, "queue", "worker", 100).unwrap();
        assert_eq!(popped.len(), 2);
        // The schedule still advanced past now; nothing due until 100.
        assert!(engine.pop(99, "queue", "worker", 100).unwrap().is_empty());
        assert_eq!(engine.pop(100, "queue", "worker", 100).unwrap().len(), 1);
    }

    #[test]
    fn test_instances_request_resources_independently() {
        let mut engine = engine();
        engine.resource_set(0, "r", 0).unwrap();
        let opts = RecurOptions {
            resources: Some(vec!["r".into()]),
            ..Default::default()
        };
        engine
            .recur(0, "queue", "t", "klass", "{}", 60, 0, opts)
            .unwrap();
        assert!(engine.pop(0, "queue", "worker", 10).unwrap().is_empty());
        assert_eq!(engine.resource_pending(0, "r").unwrap(), vec!["t-1"]);

        engine.resource_set(1, "r", 1).unwrap();
        assert_eq!(engine.resource_locks(1, "r").unwrap(), vec!["t-1"]);
        let popped = engine.pop(2, "queue", "worker", 10).unwrap();
        assert_eq!(popped.len(), 1);
        assert_eq!(popped[0].jid, "t-1");
    }

    #[test]
    fn test_instances_inherit_template_attributes() {
        let mut engine = engine();
        let opts = RecurOptions {
            priority: Some(3),
            tags: Some(vec!["nightly".into()]),
            retries: Some(2),
            ..Default::default()
        };
        engine
            .recur(0, "queue", "t", "klass", "{\"a\":1}", 60, 0, opts)
            .unwrap();
        let job = engine.pop(0, "queue", "worker", 1).unwrap().remove(0);
        assert_eq!(job.jid, "t-1");
        assert_eq!(job.priority, 3);
        assert_eq!(job.tags, vec!["nightly".to_string()]);
        assert_eq!(job.retries, 2);
        assert_eq!(job.data, "{\"a\":1}");
    }

    #[test]
    fn test_recur_update_moves_queue() {
        let mut engine = engine();
        engine
            .recur(0, "queue", "t", "klass", "{}", 60, 0, Default::default())
            .unwrap();
        engine
            .recur_update(0, "t", &[("queue".into(), "another".into())])
            .unwrap();
        assert!(engine.pop(0, "queue", "worker", 10).unwrap().is_empty());
        let popped = engine.pop(0, "another", "worker", 10).unwrap();
        assert_eq!(popped[0].jid, "t-1");
    }

    #[test]
    fn test_recur_update_validates_fields() {
        let mut engine = engine();
        engine
            .recur(0, "queue", "t", "klass", "{}", 60, 0, Default::default())
            .unwrap();
        assert!(matches!(
            engine.recur_update(0, "t", &[("interval".into(), "0".into())]),
            Err(Error::Malformed { .. })
        ));
        assert!(matches!(
            engine.recur_update(0, "t", &[("nope".into(), "1".into())]),
            Err(Error::Malformed { .. })
        ));
        assert!(matches!(
            engine.recur_update(0, "missing", &[("interval".into(), "5".into())]),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn test_unrecur_stops_materialization() {
        let mut engine = engine();
        engine
            .recur(0, "queue", "t", "klass", "{}", 10, 0, Default::default())
            .unwrap();
        let popped = engine.pop(0, "queue", "worker", 10).unwrap();
        assert_eq!(popped.len(), 1);
        engine.unrecur(1, "t").unwrap();
        assert!(engine.pop(50, "queue", "worker", 10).unwrap().is_empty());
        assert!(matches!(engine.unrecur(2, "t"), Err(Error::NotFound { .. })));
    }
