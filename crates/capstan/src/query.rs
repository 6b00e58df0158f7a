//! The read side: job listings, queue counts, worker views, full records.
//!
//! Queries never transition jobs (the sweeps belong to `pop`/`peek`); they
//! derive everything from the indices and the caller's `now`. Worker views
//! are rebuilt from job records on every call — a worker carries no
//! independent state.

use serde::Serialize;

use crate::config;
use crate::error::{Error, Result};
use crate::job::Job;
use crate::stats::QueueDayStats;
use crate::store::{QueueIndex, Score, Store, StoreTx, Timestamp};
use crate::Engine;

/// Job-listing states that are scoped to a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueJobsState {
    /// By heartbeat expiry, soonest first.
    Running,
    /// Running entries past `expires + grace`.
    Stalled,
    /// By activation time.
    Scheduled,
    /// By arrival.
    Depends,
    /// Recurring templates by next materialization time.
    Recurring,
}

/// Per-queue counts as reported by `queues`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    /// The queue's name.
    pub name: String,
    /// Whether `pop` currently hands out nothing.
    pub paused: bool,
    /// Running jobs past their grace window.
    pub stalled: usize,
    /// Eligible jobs, including scheduled ones whose activation has passed.
    pub waiting: usize,
    /// Running jobs within their lease.
    pub running: usize,
    /// Jobs blocked on dependencies or resources.
    pub depends: usize,
    /// Scheduled jobs not yet due.
    pub scheduled: usize,
    /// Recurring templates.
    pub recurring: usize,
}

/// One worker's current jobs, by jid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerJobs {
    /// Running jobs within their lease.
    pub jobs: Vec<String>,
    /// Running jobs past their grace window.
    pub stalled: Vec<String>,
}

/// One row of the all-workers listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerCounts {
    /// The worker's name.
    pub name: String,
    /// Count of running jobs within their lease.
    pub jobs: usize,
    /// Count of running jobs past their grace window.
    pub stalled: usize,
}

fn counts_for<T: StoreTx>(tx: &T, now: Timestamp, grace: i64, queue: &str) -> Result<QueueCounts> {
    let stalled = tx
        .index_below(queue, QueueIndex::Running, Score::ceil(now - grace), usize::MAX)?
        .len();
    let running = tx.index_len(queue, QueueIndex::Running)? - stalled;
    let due = tx
        .index_below(queue, QueueIndex::Scheduled, Score::ceil(now), usize::MAX)?
        .len();
    Ok(QueueCounts {
        name: queue.to_string(),
        paused: tx.queue_paused(queue)?,
        stalled,
        waiting: tx.index_len(queue, QueueIndex::Waiting)? + due,
        running,
        depends: tx.index_len(queue, QueueIndex::Depends)?,
        scheduled: tx.index_len(queue, QueueIndex::Scheduled)? - due,
        recurring: tx.index_len(queue, QueueIndex::Recurring)?,
    })
}

/// Group the running jobs of every queue by worker.
fn workers_view<T: StoreTx>(tx: &T, now: Timestamp, grace: i64) -> Result<Vec<(String, WorkerJobs)>> {
    let mut by_worker: Vec<(String, WorkerJobs)> = Vec::new();
    for queue in tx.queue_names()? {
        for jid in tx.index_page(&queue, QueueIndex::Running, 0, usize::MAX)? {
            let Some(job) = tx.job(&jid)? else { continue };
            let position = match by_worker.iter().position(|(w, _)| *w == job.worker) {
                Some(position) => position,
                None => {
                    by_worker.push((
                        job.worker.clone(),
                        WorkerJobs {
                            jobs: Vec::new(),
                            stalled: Vec::new(),
                        },
                    ));
                    by_worker.len() - 1
                }
            };
            let entry = &mut by_worker[position].1;
            if job.is_stalled(now, grace) {
                entry.stalled.push(jid);
            } else {
                entry.jobs.push(jid);
            }
        }
    }
    for (_, entry) in by_worker.iter_mut() {
        entry.jobs.sort();
        entry.stalled.sort();
    }
    by_worker.sort_by(|(a, _), (b, _)| a.cmp(b));
    Ok(by_worker)
}

impl<S: Store> Engine<S> {
    /// The full record of a job; `NotFound` for a missing jid.
    pub fn get_job(&mut self, now: Timestamp, jid: &str) -> Result<Job> {
        self.store.transaction(|tx| {
            crate::engine::observe_now(tx, now)?;
            tx.job(jid)?.ok_or_else(|| Error::no_job(jid))
        })
    }

    /// The full record of a job as a wire value, with the state the caller
    /// observes at `now` (running past grace presents as `"stalled"`).
    pub fn job_record(&mut self, now: Timestamp, jid: &str) -> Result<serde_json::Value> {
        self.store.transaction(|tx| {
            crate::engine::observe_now(tx, now)?;
            let job = tx.job(jid)?.ok_or_else(|| Error::no_job(jid))?;
            let grace = config::grace_period(tx)?;
            let mut value = serde_json::to_value(&job)
                .map_err(|e| anyhow::anyhow!("serializing job {jid}: {e}"))?;
            value["state"] = serde_json::Value::from(job.observed_state(now, grace));
            Ok(value)
        })
    }

    /// Completed jids, newest first, paginated.
    pub fn jobs_complete(
        &mut self,
        now: Timestamp,
        offset: usize,
        count: usize,
    ) -> Result<Vec<String>> {
        self.store.transaction(|tx| {
            crate::engine::observe_now(tx, now)?;
            Ok(tx.complete_page_desc(offset, count)?)
        })
    }

    /// Jids in one of a queue's listing states, paginated in index order.
    pub fn jobs_queue(
        &mut self,
        now: Timestamp,
        state: QueueJobsState,
        queue: &str,
        offset: usize,
        count: usize,
    ) -> Result<Vec<String>> {
        self.store.transaction(|tx| {
            crate::engine::observe_now(tx, now)?;
            let index = match state {
                QueueJobsState::Running => QueueIndex::Running,
                QueueJobsState::Scheduled => QueueIndex::Scheduled,
                QueueJobsState::Depends => QueueIndex::Depends,
                QueueJobsState::Recurring => QueueIndex::Recurring,
                QueueJobsState::Stalled => {
                    let grace = config::grace_period(tx)?;
                    return Ok(tx
                        .index_below(
                            queue,
                            QueueIndex::Running,
                            Score::ceil(now - grace),
                            usize::MAX,
                        )?
                        .into_iter()
                        .map(|(jid, _)| jid)
                        .skip(offset)
                        .take(count)
                        .collect());
                }
            };
            // A scheduled listing only shows entries that are still future;
            // due ones already count as waiting.
            if state == QueueJobsState::Scheduled {
                let due: Vec<String> = tx
                    .index_below(queue, QueueIndex::Scheduled, Score::ceil(now), usize::MAX)?
                    .into_iter()
                    .map(|(jid, _)| jid)
                    .collect();
                return Ok(tx
                    .index_page(queue, QueueIndex::Scheduled, 0, usize::MAX)?
                    .into_iter()
                    .filter(|jid| !due.contains(jid))
                    .skip(offset)
                    .take(count)
                    .collect());
            }
            Ok(tx.index_page(queue, index, offset, count)?)
        })
    }

    /// Counts for one queue.
    pub fn queue_counts(&mut self, now: Timestamp, queue: &str) -> Result<QueueCounts> {
        self.store.transaction(|tx| {
            crate::engine::observe_now(tx, now)?;
            let grace = config::grace_period(tx)?;
            counts_for(tx, now, grace, queue)
        })
    }

    /// Counts for every queue that has ever had activity, alphabetized.
    pub fn queues(&mut self, now: Timestamp) -> Result<Vec<QueueCounts>> {
        self.store.transaction(|tx| {
            crate::engine::observe_now(tx, now)?;
            let grace = config::grace_period(tx)?;
            let names = tx.queue_names()?;
            let mut counts = Vec::with_capacity(names.len());
            for queue in &names {
                counts.push(counts_for(tx, now, grace, queue)?);
            }
            Ok(counts)
        })
    }

    /// One worker's running and stalled jids.
    pub fn worker_jobs(&mut self, now: Timestamp, worker: &str) -> Result<WorkerJobs> {
        self.store.transaction(|tx| {
            crate::engine::observe_now(tx, now)?;
            let grace = config::grace_period(tx)?;
            Ok(workers_view(tx, now, grace)?
                .into_iter()
                .find(|(name, _)| name == worker)
                .map(|(_, jobs)| jobs)
                .unwrap_or(WorkerJobs {
                    jobs: Vec::new(),
                    stalled: Vec::new(),
                }))
        })
    }

    /// Every worker with running jobs, sorted by name, with counts.
    pub fn workers(&mut self, now: Timestamp) -> Result<Vec<WorkerCounts>> {
        self.store.transaction(|tx| {
            crate::engine::observe_now(tx, now)?;
            let grace = config::grace_period(tx)?;
            Ok(workers_view(tx, now, grace)?
                .into_iter()
                .map(|(name, jobs)| WorkerCounts {
                    name,
                    jobs: jobs.jobs.len(),
                    stalled: jobs.stalled.len(),
                })
                .collect())
        })
    }

    /// A queue's statistics for the day containing `now`.
    pub fn queue_stats(&mut self, now: Timestamp, queue: &str) -> Result<QueueDayStats> {
        self.store.transaction(|tx| {
            crate::engine::observe_now(tx, now)?;
            Ok(tx
                .stats(queue, crate::stats::day_of(now))?
                .unwrap_or_default())
        })
    }
}

