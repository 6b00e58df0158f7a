//! The scheduling engine: job intake, selection, and lifecycle arbitration.
//!
//! [`Engine`] owns a [`Store`] and executes every operation as one atomic
//! transaction against it. There is no suspension point inside an operation
//! and no ambient state: time is the caller-supplied `now`, and any
//! interleaving of callers corresponds to some total order of whole
//! operations (the serializer front-end in [`crate::service`] provides that
//! order for concurrent callers).
//!
//! The placement rule, applied whenever a job (re)enters a queue:
//!
//! ```text
//! dependencies outstanding ──────────────► depends
//! else activation time in the future ────► scheduled
//! else all resources granted ────────────► waiting
//! else ──────────────────────────────────► depends (pending on resources)
//! ```
//!
//! `pop` is the busiest operation: it takes over stalled leases, materializes
//! due recurring templates, activates due scheduled jobs, and only then hands
//! out waiting work in (priority, arrival) order, honoring the queue's
//! concurrency cap.

use tracing::{debug, warn};

use crate::config;
use crate::error::{Error, Result};
use crate::job::{Failure, HistoryEvent, Job, JobState};
use crate::recurring;
use crate::resource;
use crate::stats;
use crate::store::{QueueIndex, Score, Store, StoreTx, Timestamp};

/// The scheduling engine over a store `S`.
///
/// All methods take `&mut self`: the engine is a single-owner aggregate and
/// the store is its only state.
pub struct Engine<S: Store> {
    pub(crate) store: S,
}

/// Options accepted by [`Engine::put`].
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    /// Set the job's priority; higher runs first.
    pub priority: Option<i64>,
    /// Replace the tag set.
    pub tags: Option<Vec<String>>,
    /// Set `retries` and reset `remaining` to it.
    pub retries: Option<i64>,
    /// Replace the dependency set; already-complete jids are filtered out.
    pub depends: Option<Vec<String>>,
    /// Replace the required resource list.
    pub resources: Option<Vec<String>>,
    /// Whether an existing unexpired running job may be overwritten
    /// (default true).
    pub replace: Option<bool>,
    /// Minimum gap between consecutive completions of this jid.
    pub interval: Option<i64>,
}

/// What [`Engine::put`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutOutcome {
    /// The job was created or replaced and placed; carries the jid.
    Queued(String),
    /// The job is running and unexpired and `replace` was off. On the wire
    /// this is the integer sentinel [`NOT_REPLACED`].
    NotReplaced,
}

/// Wire sentinel for [`PutOutcome::NotReplaced`].
pub const NOT_REPLACED: i64 = 56;

/// Options accepted by [`Engine::complete`].
#[derive(Debug, Clone, Default)]
pub struct CompleteOptions {
    /// Advance the job into this queue instead of completing it.
    pub next: Option<String>,
    /// Delay before the advanced job becomes eligible.
    pub delay: i64,
    /// Replace the dependency set of the advanced job.
    pub depends: Option<Vec<String>>,
}

/// What [`Engine::complete`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompleteOutcome {
    /// The job is complete and retained in the complete index.
    Complete,
    /// The job moved on to its next queue.
    Advanced,
}

impl CompleteOutcome {
    /// The string returned on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            CompleteOutcome::Complete => "complete",
            CompleteOutcome::Advanced => "advanced",
        }
    }
}

/// Record the caller's `now` and warn once per regression; the engine accepts
/// non-monotonic time without clamping.
pub(crate) fn observe_now<T: StoreTx>(tx: &mut T, now: Timestamp) -> Result<()> {
    let seen = tx.high_water()?;
    if now < seen {
        warn!(now, high_water = seen, "operation presented a now earlier than already observed");
    } else if now > seen {
        tx.set_high_water(now)?;
    }
    Ok(())
}

/// Remove a job from whatever index its state says it occupies.
fn remove_from_indices<T: StoreTx>(tx: &mut T, job: &Job) -> Result<()> {
    if let Some(queue) = &job.queue {
        let index = match job.state {
            JobState::Waiting => Some(QueueIndex::Waiting),
            JobState::Scheduled => Some(QueueIndex::Scheduled),
            JobState::Depends => Some(QueueIndex::Depends),
            JobState::Running => Some(QueueIndex::Running),
            JobState::Complete | JobState::Failed => None,
        };
        if let Some(index) = index {
            tx.index_remove(queue, index, &job.jid)?;
        }
    }
    match job.state {
        JobState::Complete => tx.complete_remove(&job.jid)?,
        JobState::Failed => {
            if let Some(failure) = &job.failure {
                tx.failed_remove(&failure.group, &job.jid)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Apply the placement rule to a job that is in no index. `activation` is the
/// earliest time the job may run (delay and interval throttle folded in).
pub(crate) fn place_job<T: StoreTx>(
    tx: &mut T,
    job: &mut Job,
    now: Timestamp,
    activation: Timestamp,
) -> Result<()> {
    let queue = job
        .queue
        .clone()
        .ok_or_else(|| anyhow::anyhow!("job {} has no queue to be placed in", job.jid))?;
    if !job.dependencies.is_empty() {
        resource::release_all(tx, job)?;
        job.state = JobState::Depends;
        tx.index_insert(&queue, QueueIndex::Depends, &job.jid, Score(job.put_time, 0))?;
    } else if activation > now {
        resource::release_all(tx, job)?;
        job.state = JobState::Scheduled;
        tx.index_insert(&queue, QueueIndex::Scheduled, &job.jid, Score(activation, 0))?;
    } else if resource::acquire(tx, job)? {
        job.state = JobState::Waiting;
        tx.index_insert(&queue, QueueIndex::Waiting, &job.jid, job.waiting_score())?;
    } else {
        job.state = JobState::Depends;
        tx.index_insert(&queue, QueueIndex::Depends, &job.jid, Score(job.put_time, 0))?;
    }
    Ok(())
}

/// Take a job out of the depends index and re-place it; used when its last
/// dependency resolves or is removed.
fn leave_depends<T: StoreTx>(tx: &mut T, job: &mut Job, now: Timestamp) -> Result<()> {
    let queue = job
        .queue
        .clone()
        .ok_or_else(|| anyhow::anyhow!("job {} has no queue to return to", job.jid))?;
    tx.index_remove(&queue, QueueIndex::Depends, &job.jid)?;
    let mut activation = now;
    if job.interval > 0 {
        if let Some(last) = job.last_complete {
            activation = activation.max(last + job.interval);
        }
    }
    place_job(tx, job, now, activation)
}

/// Fail a job in-transaction: release resources, record the failure, and move
/// it under its failure group. Shared by `fail`, exhausted `retry`, and
/// exhausted stall takeover.
fn fail_job<T: StoreTx>(
    tx: &mut T,
    mut job: Job,
    now: Timestamp,
    worker: &str,
    group: &str,
    message: &str,
) -> Result<()> {
    resource::release_all(tx, &job)?;
    let queue = job.queue.clone().unwrap_or_default();
    job.state = JobState::Failed;
    job.worker.clear();
    job.expires = 0;
    job.remaining = job.remaining.max(0).min(job.retries);
    job.failure = Some(Failure {
        group: group.into(),
        message: message.into(),
        when: now,
        worker: worker.into(),
    });
    job.history.push(HistoryEvent::failed(worker, now));
    tx.failed_insert(group, &job.jid, now)?;
    stats::bump(tx, &queue, now, |s| {
        s.failed += 1;
        s.failures += 1;
    })?;
    debug!(jid = %job.jid, group = %group, "job failed");
    tx.put_job(&job)?;
    Ok(())
}

/// Move every scheduled entry due by `now` into waiting (or resource-pending).
fn activate_scheduled<T: StoreTx>(tx: &mut T, now: Timestamp, queue: &str) -> Result<()> {
    let due = tx.index_below(queue, QueueIndex::Scheduled, Score::ceil(now), usize::MAX)?;
    for (jid, score) in due {
        let Some(mut job) = tx.job(&jid)? else {
            tx.index_remove(queue, QueueIndex::Scheduled, &jid)?;
            continue;
        };
        tx.index_remove(queue, QueueIndex::Scheduled, &jid)?;
        // Eligibility, not insertion, decides order among activated peers.
        job.put_time = score.0;
        if resource::acquire(tx, &job)? {
            job.state = JobState::Waiting;
            tx.index_insert(queue, QueueIndex::Waiting, &jid, job.waiting_score())?;
        } else {
            job.state = JobState::Depends;
            tx.index_insert(queue, QueueIndex::Depends, &jid, Score(job.put_time, 0))?;
        }
        tx.put_job(&job)?;
    }
    Ok(())
}

/// Drop completed jobs that have aged or counted out of retention.
fn trim_complete<T: StoreTx>(tx: &mut T, now: Timestamp) -> Result<()> {
    let max_count = config::jobs_history_count(tx)?.max(0) as usize;
    let max_age = config::jobs_history(tx)?;
    let len = tx.complete_len()?;
    let overflow = len.saturating_sub(max_count);
    let cutoff = now - max_age;
    for (i, (jid, when)) in tx.complete_oldest(len)?.into_iter().enumerate() {
        if i >= overflow && when >= cutoff {
            break;
        }
        destroy_job(tx, &jid)?;
    }
    Ok(())
}

/// Remove every trace of a retained job: record, indices, tags, tracking.
fn destroy_job<T: StoreTx>(tx: &mut T, jid: &str) -> Result<()> {
    tx.complete_remove(jid)?;
    if let Some(job) = tx.job(jid)? {
        for tag in &job.tags {
            tx.tag_remove(tag, jid)?;
        }
        tx.tracked_remove(jid)?;
        tx.delete_job(jid)?;
    }
    Ok(())
}

impl<S: Store> Engine<S> {
    /// An engine over the given store.
    pub fn new(store: S) -> Self {
        Engine { store }
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Mutable access to the underlying store.
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Accept a job into a queue, creating or replacing the record.
    ///
    /// Replacement: an existing job is overwritten unless it is running,
    /// unexpired, and `replace` is off — then [`PutOutcome::NotReplaced`] is
    /// returned without mutation. A running job past its `expires` is
    /// considered forfeited and replaced regardless.
    ///
    /// Placement follows the module-level rule; `delay` and the interval
    /// throttle (`last_complete + interval`) both push the activation time.
    pub fn put(
        &mut self,
        now: Timestamp,
        worker: Option<&str>,
        queue: &str,
        jid: &str,
        klass: &str,
        data: &str,
        delay: i64,
        opts: PutOptions,
    ) -> Result<PutOutcome> {
        let _ = worker;
        self.store.transaction(|tx| {
            observe_now(tx, now)?;
            tx.ensure_queue(queue)?;

            let was_failed;
            let mut job = match tx.job(jid)? {
                Some(prev) => {
                    if prev.state == JobState::Running {
                        let replace = opts.replace.unwrap_or(true);
                        if !replace && now < prev.expires {
                            return Ok(PutOutcome::NotReplaced);
                        }
                        debug!(jid = %jid, worker = %prev.worker, "replacing a running job, lease forfeited");
                    }
                    was_failed = prev.state == JobState::Failed;
                    remove_from_indices(tx, &prev)?;
                    prev
                }
                None => {
                    was_failed = false;
                    Job::new(jid, now)
                }
            };

            job.worker.clear();
            job.expires = 0;

            if was_failed {
                if let (Some(failure), Some(failed_in)) = (&job.failure, &job.queue) {
                    stats::bump(tx, failed_in, failure.when, |s| s.failed -= 1)?;
                }
                job.failure = None;
                job.remaining = job.retries;
            }

            // Only resources the new list abandons are released; kept ones
            // retain their lock or pending position.
            if let Some(new_resources) = &opts.resources {
                let abandoned: Vec<String> = job
                    .resources
                    .iter()
                    .filter(|r| !new_resources.contains(r))
                    .cloned()
                    .collect();
                for name in abandoned {
                    resource::release_one(tx, &name, jid)?;
                }
                job.resources = new_resources.iter().cloned().collect();
            }

            // An explicit depends list replaces the old edges wholesale.
            if let Some(new_depends) = &opts.depends {
                let old: Vec<String> = job.dependencies.iter().cloned().collect();
                for dep in old {
                    if let Some(mut d) = tx.job(&dep)? {
                        d.dependents.remove(jid);
                        tx.put_job(&d)?;
                    }
                }
                job.dependencies.clear();
                for dep in new_depends {
                    match tx.job(dep)? {
                        Some(d) if d.state == JobState::Complete => continue,
                        Some(mut d) => {
                            d.dependents.insert(jid.to_string());
                            tx.put_job(&d)?;
                            job.dependencies.insert(dep.clone());
                        }
                        // A dependency on a jid that does not exist yet is
                        // kept; it resolves if that job completes later.
                        None => {
                            job.dependencies.insert(dep.clone());
                        }
                    }
                }
            }

            job.klass = klass.to_string();
            job.data = data.to_string();
            job.queue = Some(queue.to_string());
            if let Some(priority) = opts.priority {
                job.priority = priority;
            }
            if let Some(retries) = opts.retries {
                job.retries = retries;
                job.remaining = retries;
            }
            if let Some(interval) = opts.interval {
                job.interval = interval;
            }
            if let Some(tags) = &opts.tags {
                for tag in &job.tags {
                    tx.tag_remove(tag, jid)?;
                }
                job.tags = tags.clone();
                for tag in &job.tags {
                    tx.tag_insert(tag, jid, now)?;
                }
            }

            job.put_time = now;
            job.history.push(HistoryEvent::put(queue, now));

            let mut activation = now + delay.max(0);
            if job.interval > 0 {
                if let Some(last) = job.last_complete {
                    activation = activation.max(last + job.interval);
                }
            }
            place_job(tx, &mut job, now, activation)?;
            tx.put_job(&job)?;
            Ok(PutOutcome::Queued(jid.to_string()))
        })
    }

    /// Hand up to `count` jobs to a worker.
    ///
    /// In order: stalled leases are taken over (these bypass the concurrency
    /// cap and cost the job an attempt), due recurring templates materialize,
    /// due scheduled jobs activate, and waiting jobs are selected highest
    /// priority first, earliest arrival among equals. A paused queue hands
    /// out nothing.
    pub fn pop(
        &mut self,
        now: Timestamp,
        queue: &str,
        worker: &str,
        count: usize,
    ) -> Result<Vec<Job>> {
        self.store.transaction(|tx| {
            observe_now(tx, now)?;
            tx.ensure_queue(queue)?;
            if tx.queue_paused(queue)? {
                return Ok(Vec::new());
            }
            let grace = config::grace_period(tx)?;
            let heartbeat = config::heartbeat(tx)?;
            let mut picked: Vec<Job> = Vec::new();

            // Stalled takeover: any worker may adopt a lease past its grace.
            let expired =
                tx.index_below(queue, QueueIndex::Running, Score::ceil(now - grace), count)?;
            for (jid, _) in expired {
                if picked.len() >= count {
                    break;
                }
                let Some(mut job) = tx.job(&jid)? else {
                    tx.index_remove(queue, QueueIndex::Running, &jid)?;
                    continue;
                };
                tx.index_remove(queue, QueueIndex::Running, &jid)?;
                job.remaining -= 1;
                stats::bump(tx, queue, now, |s| s.retries += 1)?;
                if job.remaining < 0 {
                    let worker_then = job.worker.clone();
                    warn!(jid = %jid, "stalled job exhausted its retries");
                    fail_job(
                        tx,
                        job,
                        now,
                        &worker_then,
                        "failed-retries-exhausted",
                        "job exhausted retries while stalled",
                    )?;
                    continue;
                }
                debug!(jid = %jid, from = %job.worker, to = %worker, "stalled lease taken over");
                job.worker = worker.to_string();
                job.expires = now + heartbeat;
                job.history.push(HistoryEvent::popped(worker, now));
                tx.index_insert(queue, QueueIndex::Running, &jid, Score(job.expires, 0))?;
                tx.put_job(&job)?;
                picked.push(job);
            }

            recurring::materialize_due(tx, now, queue)?;
            activate_scheduled(tx, now, queue)?;

            let mut budget = count.saturating_sub(picked.len());
            let max_concurrency = config::queue_max_concurrency(tx, queue)?;
            if max_concurrency > 0 {
                let running = tx.index_len(queue, QueueIndex::Running)? as i64;
                budget = budget.min((max_concurrency - running).max(0) as usize);
            }

            for jid in tx.index_page(queue, QueueIndex::Waiting, 0, budget)? {
                let Some(mut job) = tx.job(&jid)? else {
                    tx.index_remove(queue, QueueIndex::Waiting, &jid)?;
                    continue;
                };
                tx.index_remove(queue, QueueIndex::Waiting, &jid)?;
                stats::sample_wait(tx, queue, now, now - job.put_time)?;
                job.state = JobState::Running;
                job.worker = worker.to_string();
                job.expires = now + heartbeat;
                job.history.push(HistoryEvent::popped(worker, now));
                tx.index_insert(queue, QueueIndex::Running, &jid, Score(job.expires, 0))?;
                tx.put_job(&job)?;
                picked.push(job);
            }
            Ok(picked)
        })
    }

    /// The jobs the next `pop` would return, without transitions.
    ///
    /// Due recurring templates and due scheduled jobs surface (those index
    /// moves are exactly what the next pop would do); stalled leases are left
    /// alone.
    pub fn peek(&mut self, now: Timestamp, queue: &str, count: usize) -> Result<Vec<Job>> {
        self.store.transaction(|tx| {
            observe_now(tx, now)?;
            tx.ensure_queue(queue)?;
            if tx.queue_paused(queue)? {
                return Ok(Vec::new());
            }
            recurring::materialize_due(tx, now, queue)?;
            activate_scheduled(tx, now, queue)?;
            let mut jobs = Vec::new();
            for jid in tx.index_page(queue, QueueIndex::Waiting, 0, count)? {
                if let Some(job) = tx.job(&jid)? {
                    jobs.push(job);
                }
            }
            Ok(jobs)
        })
    }

    /// Complete a running job, releasing its resources and dependents.
    ///
    /// With `next`, the job advances into that queue (honoring `delay` and a
    /// dependency override) instead of entering the complete index.
    pub fn complete(
        &mut self,
        now: Timestamp,
        jid: &str,
        worker: &str,
        queue: &str,
        result_data: &str,
        opts: CompleteOptions,
    ) -> Result<CompleteOutcome> {
        self.store.transaction(|tx| {
            observe_now(tx, now)?;
            let mut job = tx.job(jid)?.ok_or_else(|| Error::no_job(jid))?;
            if job.state != JobState::Running {
                return Err(Error::WrongState {
                    jid: jid.into(),
                    expected: "running",
                    actual: job.state.to_string(),
                });
            }
            if job.worker != worker {
                return Err(Error::WrongWorker {
                    jid: jid.into(),
                    worker: worker.into(),
                    actual: job.worker.clone(),
                });
            }
            if job.queue.as_deref() != Some(queue) {
                return Err(Error::WrongState {
                    jid: jid.into(),
                    expected: "running in the named queue",
                    actual: format!("running in {}", job.queue.as_deref().unwrap_or("no queue")),
                });
            }

            tx.index_remove(queue, QueueIndex::Running, jid)?;
            resource::release_all(tx, &job)?;
            if let Some(popped) = job.last_popped() {
                stats::sample_run(tx, queue, now, now - popped)?;
            }
            job.history.push(HistoryEvent::done(queue, now));
            job.result_data = result_data.to_string();
            job.last_complete = Some(now);
            job.worker.clear();
            job.expires = 0;

            match &opts.next {
                Some(next) => {
                    tx.ensure_queue(next)?;
                    if let Some(new_depends) = &opts.depends {
                        let old: Vec<String> = job.dependencies.iter().cloned().collect();
                        for dep in old {
                            if let Some(mut d) = tx.job(&dep)? {
                                d.dependents.remove(jid);
                                tx.put_job(&d)?;
                            }
                        }
                        job.dependencies.clear();
                        for dep in new_depends {
                            match tx.job(dep)? {
                                Some(d) if d.state == JobState::Complete => continue,
                                Some(mut d) => {
                                    d.dependents.insert(jid.to_string());
                                    tx.put_job(&d)?;
                                    job.dependencies.insert(dep.clone());
                                }
                                None => {
                                    job.dependencies.insert(dep.clone());
                                }
                            }
                        }
                    }
                    job.queue = Some(next.clone());
                    job.put_time = now;
                    job.history.push(HistoryEvent::put(next, now));
                    // Advancing honors only the explicit delay; the interval
                    // throttle guards re-puts, not stage-to-stage moves.
                    place_job(tx, &mut job, now, now + opts.delay.max(0))?;
                    tx.put_job(&job)?;
                    Ok(CompleteOutcome::Advanced)
                }
                None => {
                    job.state = JobState::Complete;
                    job.queue = None;
                    tx.complete_insert(jid, now)?;

                    let dependents: Vec<String> = job.dependents.iter().cloned().collect();
                    job.dependents.clear();
                    tx.put_job(&job)?;
                    for dependent in dependents {
                        let Some(mut dep) = tx.job(&dependent)? else {
                            continue;
                        };
                        dep.dependencies.remove(jid);
                        if dep.state == JobState::Depends && dep.dependencies.is_empty() {
                            leave_depends(tx, &mut dep, now)?;
                        }
                        tx.put_job(&dep)?;
                        debug!(jid = %dependent, released_by = %jid, "dependency resolved");
                    }

                    trim_complete(tx, now)?;
                    Ok(CompleteOutcome::Complete)
                }
            }
        })
    }

    /// Fail a running job into a failure group. A later `put` of the same
    /// jid resurrects it with fresh attempts.
    pub fn fail(
        &mut self,
        now: Timestamp,
        jid: &str,
        worker: &str,
        group: &str,
        message: &str,
        data: Option<&str>,
    ) -> Result<String> {
        self.store.transaction(|tx| {
            observe_now(tx, now)?;
            let mut job = tx.job(jid)?.ok_or_else(|| Error::no_job(jid))?;
            if job.state != JobState::Running {
                return Err(Error::WrongState {
                    jid: jid.into(),
                    expected: "running",
                    actual: job.state.to_string(),
                });
            }
            if job.worker != worker {
                return Err(Error::WrongWorker {
                    jid: jid.into(),
                    worker: worker.into(),
                    actual: job.worker.clone(),
                });
            }
            let queue = job.queue.clone().unwrap_or_default();
            tx.index_remove(&queue, QueueIndex::Running, jid)?;
            if let Some(data) = data {
                job.data = data.to_string();
            }
            fail_job(tx, job, now, worker, group, message)?;
            Ok(jid.to_string())
        })
    }

    /// Send a running job back for another attempt, spending one.
    ///
    /// With attempts exhausted the job fails instead, into the given group
    /// or `failed-retries-exhausted`. Returns the attempts left, -1 when
    /// exhausted.
    pub fn retry(
        &mut self,
        now: Timestamp,
        jid: &str,
        queue: &str,
        worker: &str,
        delay: i64,
        group_message: Option<(String, String)>,
    ) -> Result<i64> {
        self.store.transaction(|tx| {
            observe_now(tx, now)?;
            let mut job = tx.job(jid)?.ok_or_else(|| Error::no_job(jid))?;
            if job.state != JobState::Running {
                return Err(Error::WrongState {
                    jid: jid.into(),
                    expected: "running",
                    actual: job.state.to_string(),
                });
            }
            if job.worker != worker {
                return Err(Error::WrongWorker {
                    jid: jid.into(),
                    worker: worker.into(),
                    actual: job.worker.clone(),
                });
            }
            if job.queue.as_deref() != Some(queue) {
                return Err(Error::WrongState {
                    jid: jid.into(),
                    expected: "running in the named queue",
                    actual: format!("running in {}", job.queue.as_deref().unwrap_or("no queue")),
                });
            }

            tx.index_remove(queue, QueueIndex::Running, jid)?;
            job.remaining -= 1;
            stats::bump(tx, queue, now, |s| s.retries += 1)?;
            if job.remaining < 0 {
                let (group, message) = group_message.unwrap_or_else(|| {
                    (
                        "failed-retries-exhausted".to_string(),
                        format!("job exhausted retries in queue {queue}"),
                    )
                });
                fail_job(tx, job, now, worker, &group, &message)?;
                return Ok(-1);
            }
            let remaining = job.remaining;
            resource::release_all(tx, &job)?;
            job.worker.clear();
            job.expires = 0;
            job.history.push(HistoryEvent::retried(queue, now));
            place_job(tx, &mut job, now, now + delay.max(0))?;
            tx.put_job(&job)?;
            Ok(remaining)
        })
    }

    /// Refresh a running job's lease, optionally replacing its payload.
    /// Returns the new `expires`.
    pub fn heartbeat(
        &mut self,
        now: Timestamp,
        jid: &str,
        worker: &str,
        data: Option<&str>,
    ) -> Result<Timestamp> {
        self.store.transaction(|tx| {
            observe_now(tx, now)?;
            let mut job = tx.job(jid)?.ok_or_else(|| Error::no_job(jid))?;
            if job.state != JobState::Running {
                return Err(Error::WrongState {
                    jid: jid.into(),
                    expected: "running",
                    actual: job.state.to_string(),
                });
            }
            if job.worker != worker {
                return Err(Error::WrongWorker {
                    jid: jid.into(),
                    worker: worker.into(),
                    actual: job.worker.clone(),
                });
            }
            if let Some(data) = data {
                job.data = data.to_string();
            }
            job.expires = now + config::heartbeat(tx)?;
            let queue = job.queue.clone().unwrap_or_default();
            tx.index_remove(&queue, QueueIndex::Running, jid)?;
            tx.index_insert(&queue, QueueIndex::Running, jid, Score(job.expires, 0))?;
            tx.put_job(&job)?;
            Ok(job.expires)
        })
    }

    /// Remove a job outright: indices, resources, tags, tracking, record.
    ///
    /// Dependents are not cascaded; they keep the dangling jid in their
    /// dependency set and must be cancelled explicitly.
    pub fn cancel(&mut self, now: Timestamp, jid: &str) -> Result<()> {
        self.store.transaction(|tx| {
            observe_now(tx, now)?;
            let job = tx.job(jid)?.ok_or_else(|| Error::no_job(jid))?;
            remove_from_indices(tx, &job)?;
            resource::release_all(tx, &job)?;
            for dep in &job.dependencies {
                if let Some(mut d) = tx.job(dep)? {
                    d.dependents.remove(jid);
                    tx.put_job(&d)?;
                }
            }
            if !job.dependents.is_empty() {
                warn!(
                    jid = %jid,
                    dependents = ?job.dependents,
                    "cancelled job leaves dependents with an unsatisfiable dependency"
                );
            }
            for tag in &job.tags {
                tx.tag_remove(tag, jid)?;
            }
            tx.tracked_remove(jid)?;
            tx.delete_job(jid)?;
            Ok(())
        })
    }

    /// Change a job's priority, re-scoring it if it is waiting.
    pub fn priority(&mut self, now: Timestamp, jid: &str, priority: i64) -> Result<()> {
        self.store.transaction(|tx| {
            observe_now(tx, now)?;
            let mut job = tx.job(jid)?.ok_or_else(|| Error::no_job(jid))?;
            job.priority = priority;
            if job.state == JobState::Waiting {
                if let Some(queue) = &job.queue {
                    tx.index_insert(queue, QueueIndex::Waiting, jid, job.waiting_score())?;
                }
            }
            tx.put_job(&job)?;
            Ok(())
        })
    }

    /// Pause a queue; `pop` hands out nothing until unpaused.
    pub fn pause(&mut self, now: Timestamp, queue: &str) -> Result<()> {
        self.store.transaction(|tx| {
            observe_now(tx, now)?;
            tx.ensure_queue(queue)?;
            tx.set_queue_paused(queue, true)?;
            Ok(())
        })
    }

    /// Unpause a queue.
    pub fn unpause(&mut self, now: Timestamp, queue: &str) -> Result<()> {
        self.store.transaction(|tx| {
            observe_now(tx, now)?;
            tx.ensure_queue(queue)?;
            tx.set_queue_paused(queue, false)?;
            Ok(())
        })
    }

    /// Whether a queue is paused.
    pub fn paused(&mut self, now: Timestamp, queue: &str) -> Result<bool> {
        self.store.transaction(|tx| {
            observe_now(tx, now)?;
            Ok(tx.queue_paused(queue)?)
        })
    }

    /// Mark a job tracked.
    pub fn track(&mut self, now: Timestamp, jid: &str) -> Result<()> {
        self.store.transaction(|tx| {
            observe_now(tx, now)?;
            let mut job = tx.job(jid)?.ok_or_else(|| Error::no_job(jid))?;
            job.tracked = true;
            tx.tracked_insert(jid)?;
            tx.put_job(&job)?;
            Ok(())
        })
    }

    /// Clear a job's tracked mark.
    pub fn untrack(&mut self, now: Timestamp, jid: &str) -> Result<()> {
        self.store.transaction(|tx| {
            observe_now(tx, now)?;
            let mut job = tx.job(jid)?.ok_or_else(|| Error::no_job(jid))?;
            job.tracked = false;
            tx.tracked_remove(jid)?;
            tx.put_job(&job)?;
            Ok(())
        })
    }

    /// The full records of all tracked jobs.
    pub fn tracked(&mut self, now: Timestamp) -> Result<Vec<Job>> {
        self.store.transaction(|tx| {
            observe_now(tx, now)?;
            let mut jobs = Vec::new();
            for jid in tx.tracked_members()? {
                if let Some(job) = tx.job(&jid)? {
                    jobs.push(job);
                }
            }
            Ok(jobs)
        })
    }

    /// Add tags to a job; returns the resulting tag set.
    pub fn tag_add(&mut self, now: Timestamp, jid: &str, tags: &[String]) -> Result<Vec<String>> {
        self.store.transaction(|tx| {
            observe_now(tx, now)?;
            let mut job = tx.job(jid)?.ok_or_else(|| Error::no_job(jid))?;
            for tag in tags {
                if !job.tags.contains(tag) {
                    job.tags.push(tag.clone());
                    tx.tag_insert(tag, jid, now)?;
                }
            }
            let tags = job.tags.clone();
            tx.put_job(&job)?;
            Ok(tags)
        })
    }

    /// Remove tags from a job; returns the resulting tag set.
    pub fn tag_remove(
        &mut self,
        now: Timestamp,
        jid: &str,
        tags: &[String],
    ) -> Result<Vec<String>> {
        self.store.transaction(|tx| {
            observe_now(tx, now)?;
            let mut job = tx.job(jid)?.ok_or_else(|| Error::no_job(jid))?;
            for tag in tags {
                job.tags.retain(|t| t != tag);
                tx.tag_remove(tag, jid)?;
            }
            let tags = job.tags.clone();
            tx.put_job(&job)?;
            Ok(tags)
        })
    }

    /// Jids carrying a tag, in tag-time order.
    pub fn tag_get(
        &mut self,
        now: Timestamp,
        tag: &str,
        offset: usize,
        count: usize,
    ) -> Result<Vec<String>> {
        self.store.transaction(|tx| {
            observe_now(tx, now)?;
            Ok(tx.tag_page(tag, offset, count)?)
        })
    }

    /// The most-used tags, descending by use count.
    pub fn tag_top(&mut self, now: Timestamp, offset: usize, count: usize) -> Result<Vec<String>> {
        self.store.transaction(|tx| {
            observe_now(tx, now)?;
            Ok(tx.tag_top(offset, count)?.into_iter().map(|(t, _)| t).collect())
        })
    }

    /// Add dependencies to a job in the depends state.
    pub fn depends_add(&mut self, now: Timestamp, jid: &str, deps: &[String]) -> Result<()> {
        self.store.transaction(|tx| {
            observe_now(tx, now)?;
            let mut job = tx.job(jid)?.ok_or_else(|| Error::no_job(jid))?;
            if job.state != JobState::Depends {
                return Err(Error::WrongState {
                    jid: jid.into(),
                    expected: "depends",
                    actual: job.state.to_string(),
                });
            }
            for dep in deps {
                match tx.job(dep)? {
                    Some(d) if d.state == JobState::Complete => continue,
                    Some(mut d) => {
                        d.dependents.insert(jid.to_string());
                        tx.put_job(&d)?;
                        job.dependencies.insert(dep.clone());
                    }
                    None => {
                        job.dependencies.insert(dep.clone());
                    }
                }
            }
            tx.put_job(&job)?;
            Ok(())
        })
    }

    /// Remove dependencies from a job in the depends state; `None` removes
    /// them all. A drained job leaves depends per the placement rule.
    pub fn depends_remove(
        &mut self,
        now: Timestamp,
        jid: &str,
        deps: Option<&[String]>,
    ) -> Result<()> {
        self.store.transaction(|tx| {
            observe_now(tx, now)?;
            let mut job = tx.job(jid)?.ok_or_else(|| Error::no_job(jid))?;
            if job.state != JobState::Depends {
                return Err(Error::WrongState {
                    jid: jid.into(),
                    expected: "depends",
                    actual: job.state.to_string(),
                });
            }
            let targets: Vec<String> = match deps {
                Some(deps) => deps.to_vec(),
                None => job.dependencies.iter().cloned().collect(),
            };
            for dep in targets {
                job.dependencies.remove(&dep);
                if let Some(mut d) = tx.job(&dep)? {
                    d.dependents.remove(jid);
                    tx.put_job(&d)?;
                }
            }
            if job.dependencies.is_empty() {
                leave_depends(tx, &mut job, now)?;
            }
            tx.put_job(&job)?;
            Ok(())
        })
    }
}

