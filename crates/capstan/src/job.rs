//! Job records and their lifecycle states.
//!
//! A [`Job`] is the authoritative per-job record. Its `state` always matches
//! the queue index the job currently sits in; transitions are an index
//! remove + index add pair inside one store transaction, never a partial
//! update.
//!
//! Stalledness is not a stored state: a job is stalled iff it is running and
//! `expires + grace <= now`. Queries derive it from the caller-supplied `now`
//! so the record never goes stale.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::store::{Score, Timestamp};

/// Default number of attempts for a freshly created job.
pub const DEFAULT_RETRIES: i64 = 5;

/// Lifecycle state of a job. Each state corresponds to membership in exactly
/// one queue-level index (or the global complete/failed structures).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Eligible for `pop`, ordered by priority then arrival.
    Waiting,
    /// Not yet eligible; becomes waiting once its activation time passes.
    Scheduled,
    /// Blocked on unfinished dependencies or on resource grants.
    Depends,
    /// Owned by a worker until `expires` passes or it reports back.
    Running,
    /// Finished; retained in the global complete index until trimmed.
    Complete,
    /// Failed; retained under its failure group until resurrected by `put`.
    Failed,
}

impl JobState {
    /// The lowercase name used on the wire and in job records.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Scheduled => "scheduled",
            JobState::Depends => "depends",
            JobState::Running => "running",
            JobState::Complete => "complete",
            JobState::Failed => "failed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(JobState::Waiting),
            "scheduled" => Ok(JobState::Scheduled),
            "depends" => Ok(JobState::Depends),
            "running" => Ok(JobState::Running),
            "complete" => Ok(JobState::Complete),
            "failed" => Ok(JobState::Failed),
            _ => Err(()),
        }
    }
}

/// One entry in a job's append-only history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEvent {
    /// What happened: "put", "popped", "done", "failed", "retried".
    pub what: String,
    /// When it happened, in caller ticks.
    pub when: Timestamp,
    /// The queue involved, for events that concern one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub q: Option<String>,
    /// The worker involved, for events that concern one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker: Option<String>,
}

impl HistoryEvent {
    /// The job was placed into a queue.
    pub fn put(queue: &str, when: Timestamp) -> Self {
        HistoryEvent {
            what: "put".into(),
            when,
            q: Some(queue.into()),
            worker: None,
        }
    }

    /// The job was handed to a worker.
    pub fn popped(worker: &str, when: Timestamp) -> Self {
        HistoryEvent {
            what: "popped".into(),
            when,
            q: None,
            worker: Some(worker.into()),
        }
    }

    /// The job completed in a queue.
    pub fn done(queue: &str, when: Timestamp) -> Self {
        HistoryEvent {
            what: "done".into(),
            when,
            q: Some(queue.into()),
            worker: None,
        }
    }

    /// The job was failed by a worker.
    pub fn failed(worker: &str, when: Timestamp) -> Self {
        HistoryEvent {
            what: "failed".into(),
            when,
            q: None,
            worker: Some(worker.into()),
        }
    }

    /// The job was sent back for another attempt.
    pub fn retried(queue: &str, when: Timestamp) -> Self {
        HistoryEvent {
            what: "retried".into(),
            when,
            q: Some(queue.into()),
            worker: None,
        }
    }
}

/// Why and when a job failed, recorded until the job is resurrected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    /// Failure group, used to bucket failures ("timeout", "oom", ...).
    pub group: String,
    /// Human-readable message supplied by the worker.
    pub message: String,
    /// When the failure was reported.
    pub when: Timestamp,
    /// The worker that reported it.
    pub worker: String,
}

/// The authoritative per-job record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Caller-supplied identifier, globally unique across the service.
    pub jid: String,
    /// Opaque class name workers use to dispatch execution.
    pub klass: String,
    /// Opaque payload, stored verbatim as a JSON string blob.
    pub data: String,
    /// Higher runs first.
    pub priority: i64,
    /// Tags attached to the job, kept in the tag indices.
    pub tags: Vec<String>,
    /// Maximum attempts.
    pub retries: i64,
    /// Attempts left. Never exceeds `retries`.
    pub remaining: i64,
    /// Lifecycle state; always matches the index the job sits in.
    pub state: JobState,
    /// Current queue, or none once terminal.
    pub queue: Option<String>,
    /// Current owner while running, empty otherwise.
    pub worker: String,
    /// Heartbeat deadline while running, 0 otherwise.
    pub expires: Timestamp,
    /// Jids this job waits on.
    pub dependencies: BTreeSet<String>,
    /// Jids waiting on this job.
    pub dependents: BTreeSet<String>,
    /// Named resources this job must hold to run, in acquisition order.
    pub resources: SmallVec<[String; 2]>,
    /// Append-only event log.
    pub history: Vec<HistoryEvent>,
    /// Last reported failure, cleared on resurrection.
    pub failure: Option<Failure>,
    /// Whether the job is on the tracked set.
    pub tracked: bool,
    /// Opaque completion payload, stored verbatim as a JSON string blob.
    pub result_data: String,
    /// Minimum gap between consecutive completions, 0 for none.
    pub interval: i64,
    /// When the job last completed, for interval throttling.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_complete: Option<Timestamp>,
    /// When the job last became eligible; tie-break for waiting order.
    pub put_time: Timestamp,
}

impl Job {
    /// A fresh record in the waiting shape; the caller places it.
    pub fn new(jid: &str, now: Timestamp) -> Self {
        Job {
            jid: jid.into(),
            klass: String::new(),
            data: "{}".into(),
            priority: 0,
            tags: Vec::new(),
            retries: DEFAULT_RETRIES,
            remaining: DEFAULT_RETRIES,
            state: JobState::Waiting,
            queue: None,
            worker: String::new(),
            expires: 0,
            dependencies: BTreeSet::new(),
            dependents: BTreeSet::new(),
            resources: SmallVec::new(),
            history: Vec::new(),
            failure: None,
            tracked: false,
            result_data: "{}".into(),
            interval: 0,
            last_complete: None,
            put_time: now,
        }
    }

    /// Score in the waiting index: higher priority first, then arrival.
    pub fn waiting_score(&self) -> Score {
        Score(-self.priority, self.put_time)
    }

    /// Whether this running job has outlived its heartbeat plus grace.
    pub fn is_stalled(&self, now: Timestamp, grace: i64) -> bool {
        self.state == JobState::Running && self.expires + grace <= now
    }

    /// The state name as a caller at `now` observes it; running jobs past
    /// their grace window present as "stalled".
    pub fn observed_state(&self, now: Timestamp, grace: i64) -> &'static str {
        if self.is_stalled(now, grace) {
            "stalled"
        } else {
            self.state.as_str()
        }
    }

    /// When this job was last handed to a worker, if ever.
    pub fn last_popped(&self) -> Option<Timestamp> {
        self.history
            .iter()
            .rev()
            .find(|e| e.what == "popped")
            .map(|e| e.when)
    }
}
