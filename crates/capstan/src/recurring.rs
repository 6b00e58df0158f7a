//! Recurring templates and their materialization into concrete jobs.
//!
//! A template sits in its queue's recurring index scored by `next`, the time
//! of its next materialization. Every `pop` and `peek` sweeps the due
//! templates: each missed interval boundary since `next` produces one
//! instance named `{template}-{count}`, stamped at its nominal time so
//! instances keep their natural order among other waiting work. A `backlog`
//! bound caps how many instances one sweep may produce; `next` advances past
//! `now` either way, so an outage becomes a bounded burst, not a flood.
//!
//! Instances are ordinary jobs from the moment they exist: they request the
//! template's resources independently and can end up resource-pending.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tracing::debug;

use crate::error::{Error, Result};
use crate::job::{HistoryEvent, Job, JobState};
use crate::resource;
use crate::store::{QueueIndex, Score, Store, StoreTx, Timestamp};
use crate::Engine;

/// A generator of job instances at fixed interval boundaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecurringTemplate {
    /// The template's identifier; instances are `{jid}-{count}`.
    pub jid: String,
    /// Class name stamped onto instances.
    pub klass: String,
    /// Payload stamped onto instances, verbatim.
    pub data: String,
    /// The queue instances are created in.
    pub queue: String,
    /// Ticks between materializations; always positive.
    pub interval: i64,
    /// Delay before the first materialization.
    pub offset: i64,
    /// Tags stamped onto instances.
    pub tags: Vec<String>,
    /// Priority stamped onto instances.
    pub priority: i64,
    /// Retry budget stamped onto instances.
    pub retries: i64,
    /// Resources each instance requests independently.
    pub resources: SmallVec<[String; 2]>,
    /// Max instances per catch-up sweep; 0 means unbounded.
    pub backlog: i64,
    /// Instances materialized so far; names are 1-based.
    pub count: u64,
    /// Next materialization time.
    pub next: Timestamp,
}

/// Options accepted by [`Engine::recur`].
#[derive(Debug, Clone, Default)]
pub struct RecurOptions {
    /// Priority stamped onto instances.
    pub priority: Option<i64>,
    /// Tags stamped onto instances.
    pub tags: Option<Vec<String>>,
    /// Retry budget stamped onto instances.
    pub retries: Option<i64>,
    /// Resources each instance requests.
    pub resources: Option<Vec<String>>,
    /// Max instances per catch-up sweep.
    pub backlog: Option<i64>,
}

/// Materialize every due template in a queue, advancing `next` past `now`.
pub(crate) fn materialize_due<T: StoreTx>(tx: &mut T, now: Timestamp, queue: &str) -> Result<()> {
    let due = tx.index_below(queue, QueueIndex::Recurring, Score::ceil(now), usize::MAX)?;
    for (tid, _) in due {
        let Some(mut template) = tx.recurring(&tid)? else {
            tx.index_remove(queue, QueueIndex::Recurring, &tid)?;
            continue;
        };
        let mut spawned: i64 = 0;
        while template.next <= now {
            let nominal = template.next;
            template.next += template.interval;
            if template.backlog > 0 && spawned >= template.backlog {
                continue;
            }
            template.count += 1;
            spawned += 1;
            spawn_instance(tx, &template, nominal)?;
        }
        tx.index_remove(queue, QueueIndex::Recurring, &tid)?;
        tx.index_insert(queue, QueueIndex::Recurring, &tid, Score(template.next, 0))?;
        tx.put_recurring(&template)?;
    }
    Ok(())
}

/// Create one instance of a template at its nominal time.
fn spawn_instance<T: StoreTx>(
    tx: &mut T,
    template: &RecurringTemplate,
    nominal: Timestamp,
) -> Result<()> {
    let jid = format!("{}-{}", template.jid, template.count);
    let mut job = Job::new(&jid, nominal);
    job.klass = template.klass.clone();
    job.data = template.data.clone();
    job.priority = template.priority;
    job.tags = template.tags.clone();
    job.retries = template.retries;
    job.remaining = template.retries;
    job.resources = template.resources.clone();
    job.queue = Some(template.queue.clone());
    job.history.push(HistoryEvent::put(&template.queue, nominal));
    for tag in &job.tags {
        tx.tag_insert(tag, &jid, nominal)?;
    }
    if resource::acquire(tx, &job)? {
        job.state = JobState::Waiting;
        tx.index_insert(
            &template.queue,
            QueueIndex::Waiting,
            &jid,
            job.waiting_score(),
        )?;
    } else {
        job.state = JobState::Depends;
        tx.index_insert(
            &template.queue,
            QueueIndex::Depends,
            &jid,
            Score(nominal, 0),
        )?;
    }
    tx.put_job(&job)?;
    debug!(template = %template.jid, jid = %jid, nominal, "recurring instance materialized");
    Ok(())
}

impl<S: Store> Engine<S> {
    /// Create or update a recurring template; the first materialization falls
    /// at `now + offset`. Returns the template jid.
    pub fn recur(
        &mut self,
        now: Timestamp,
        queue: &str,
        jid: &str,
        klass: &str,
        data: &str,
        interval: i64,
        offset: i64,
        opts: RecurOptions,
    ) -> Result<String> {
        if interval <= 0 {
            return Err(Error::malformed("recur", "interval must be positive"));
        }
        self.store.transaction(|tx| {
            crate::engine::observe_now(tx, now)?;
            tx.ensure_queue(queue)?;
            let mut template = match tx.recurring(jid)? {
                Some(mut existing) => {
                    // Updating keeps the materialization counter and schedule.
                    tx.index_remove(&existing.queue, QueueIndex::Recurring, jid)?;
                    existing.queue = queue.to_string();
                    existing.interval = interval;
                    existing.offset = offset;
                    existing
                }
                None => RecurringTemplate {
                    jid: jid.to_string(),
                    klass: String::new(),
                    data: String::new(),
                    queue: queue.to_string(),
                    interval,
                    offset,
                    tags: Vec::new(),
                    priority: 0,
                    retries: crate::job::DEFAULT_RETRIES,
                    resources: SmallVec::new(),
                    backlog: 0,
                    count: 0,
                    next: now + offset,
                },
            };
            template.klass = klass.to_string();
            template.data = data.to_string();
            if let Some(priority) = opts.priority {
                template.priority = priority;
            }
            if let Some(tags) = &opts.tags {
                template.tags = tags.clone();
            }
            if let Some(retries) = opts.retries {
                template.retries = retries;
            }
            if let Some(resources) = &opts.resources {
                template.resources = resources.iter().cloned().collect();
            }
            if let Some(backlog) = opts.backlog {
                template.backlog = backlog;
            }
            tx.index_insert(queue, QueueIndex::Recurring, jid, Score(template.next, 0))?;
            tx.put_recurring(&template)?;
            Ok(jid.to_string())
        })
    }

    /// Update fields of a recurring template from `(field, value)` pairs:
    /// `queue`, `klass`, `data`, `priority`, `interval`, `retries`, `tags`,
    /// `backlog`.
    pub fn recur_update(
        &mut self,
        now: Timestamp,
        jid: &str,
        updates: &[(String, String)],
    ) -> Result<()> {
        self.store.transaction(|tx| {
            crate::engine::observe_now(tx, now)?;
            let mut template = tx.recurring(jid)?.ok_or_else(|| Error::NotFound {
                kind: "recurring job",
                id: jid.into(),
            })?;
            for (field, value) in updates {
                match field.as_str() {
                    "queue" => {
                        tx.index_remove(&template.queue, QueueIndex::Recurring, jid)?;
                        tx.ensure_queue(value)?;
                        template.queue = value.clone();
                        tx.index_insert(
                            value,
                            QueueIndex::Recurring,
                            jid,
                            Score(template.next, 0),
                        )?;
                    }
                    "klass" => template.klass = value.clone(),
                    "data" => {
                        serde_json::from_str::<serde_json::Value>(value).map_err(|e| {
                            Error::malformed("recur.update", format!("data is not JSON: {e}"))
                        })?;
                        template.data = value.clone();
                    }
                    "priority" => template.priority = parse_i64(value)?,
                    "interval" => {
                        let interval = parse_i64(value)?;
                        if interval <= 0 {
                            return Err(Error::malformed(
                                "recur.update",
                                "interval must be positive",
                            ));
                        }
                        template.interval = interval;
                    }
                    "retries" => template.retries = parse_i64(value)?,
                    "backlog" => template.backlog = parse_i64(value)?,
                    "tags" => {
                        template.tags =
                            serde_json::from_str::<Vec<String>>(value).map_err(|e| {
                                Error::malformed(
                                    "recur.update",
                                    format!("tags is not a JSON array: {e}"),
                                )
                            })?;
                    }
                    other => {
                        return Err(Error::malformed(
                            "recur.update",
                            format!("unknown field {other}"),
                        ));
                    }
                }
            }
            tx.put_recurring(&template)?;
            Ok(())
        })
    }

    /// Delete a recurring template; already-materialized instances live on.
    pub fn unrecur(&mut self, now: Timestamp, jid: &str) -> Result<()> {
        self.store.transaction(|tx| {
            crate::engine::observe_now(tx, now)?;
            let template = tx.recurring(jid)?.ok_or_else(|| Error::NotFound {
                kind: "recurring job",
                id: jid.into(),
            })?;
            tx.index_remove(&template.queue, QueueIndex::Recurring, jid)?;
            tx.delete_recurring(jid)?;
            Ok(())
        })
    }
}

fn parse_i64(value: &str) -> Result<i64> {
    value
        .parse::<i64>()
        .map_err(|_| Error::malformed("recur.update", format!("{value:?} is not a number")))
}

