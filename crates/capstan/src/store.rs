//! The storage contract the engine runs against.
//!
//! The engine treats storage as a transactional key/value surface with sorted
//! indices: job and template records, per-queue sorted indices, a handful of
//! global structures (complete index, failure groups, tracked set, tag
//! indices), resources, configuration, and day-bucketed statistics.
//!
//! Every top-level engine operation executes as exactly one [`Store::transaction`].
//! A transaction that returns `Err` must leave the store as it was; no
//! cross-transaction locking is required because the engine is a
//! single-threaded serializer (one caller at a time, whole operations totally
//! ordered).
//!
//! Providers surface their own failures as `anyhow::Error`; the engine wraps
//! them in [`Error::Storage`](crate::Error::Storage). The in-process provider
//! lives in the `capstan-memory` crate.

use anyhow::Result;

use crate::job::Job;
use crate::recurring::RecurringTemplate;
use crate::resource::Resource;
use crate::stats::QueueDayStats;

/// Logical time in caller-supplied ticks. The engine never reads a clock.
pub type Timestamp = i64;

/// A composite index score ordered lexicographically.
///
/// The waiting index uses `(-priority, put_time)`, scheduled uses
/// `(activation, 0)`, running uses `(expires, 0)`, depends and recurring use
/// `(arrival, 0)` and `(next, 0)`. Members with equal scores order by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Score(pub i64, pub i64);

impl Score {
    /// The greatest score with a given primary component; useful as an
    /// inclusive upper bound for "everything due by `t`" range scans.
    pub fn ceil(primary: i64) -> Self {
        Score(primary, i64::MAX)
    }
}

/// The sorted indices every queue maintains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueIndex {
    /// Eligible work, scored `(-priority, put_time)`.
    Waiting,
    /// Future work, scored by activation time.
    Scheduled,
    /// Leased work, scored by heartbeat expiry.
    Running,
    /// Work blocked on dependencies or resource grants, scored by arrival.
    Depends,
    /// Recurring templates, scored by next materialization time.
    Recurring,
}

/// One open transaction against the store.
///
/// Methods return `anyhow::Result` so providers can surface their own failure
/// modes; the engine treats any error as fatal to the operation.
pub trait StoreTx {
    // ----- job records -----

    /// Fetch a job record by id.
    fn job(&self, jid: &str) -> Result<Option<Job>>;
    /// Insert or overwrite a job record.
    fn put_job(&mut self, job: &Job) -> Result<()>;
    /// Delete a job record. Deleting a missing job is a no-op.
    fn delete_job(&mut self, jid: &str) -> Result<()>;

    // ----- recurring templates -----

    /// Fetch a recurring template by id.
    fn recurring(&self, jid: &str) -> Result<Option<RecurringTemplate>>;
    /// Insert or overwrite a recurring template.
    fn put_recurring(&mut self, template: &RecurringTemplate) -> Result<()>;
    /// Delete a recurring template. Missing is a no-op.
    fn delete_recurring(&mut self, jid: &str) -> Result<()>;

    // ----- queue registry -----

    /// Record that a queue exists; idempotent.
    fn ensure_queue(&mut self, queue: &str) -> Result<()>;
    /// Every queue that has ever had activity, alphabetized.
    fn queue_names(&self) -> Result<Vec<String>>;
    /// Whether a queue is paused. Unknown queues are not paused.
    fn queue_paused(&self, queue: &str) -> Result<bool>;
    /// Set or clear a queue's paused flag.
    fn set_queue_paused(&mut self, queue: &str, paused: bool) -> Result<()>;

    // ----- per-queue sorted indices -----

    /// Insert or re-score a member.
    fn index_insert(&mut self, queue: &str, index: QueueIndex, id: &str, score: Score)
        -> Result<()>;
    /// Remove a member; missing is a no-op.
    fn index_remove(&mut self, queue: &str, index: QueueIndex, id: &str) -> Result<()>;
    /// Number of members.
    fn index_len(&self, queue: &str, index: QueueIndex) -> Result<usize>;
    /// Members in score order, paginated by rank.
    fn index_page(
        &self,
        queue: &str,
        index: QueueIndex,
        offset: usize,
        count: usize,
    ) -> Result<Vec<String>>;
    /// Members with score `<= max`, in score order, up to `limit`.
    fn index_below(
        &self,
        queue: &str,
        index: QueueIndex,
        max: Score,
        limit: usize,
    ) -> Result<Vec<(String, Score)>>;
    /// The score of a member, if present.
    fn index_score(&self, queue: &str, index: QueueIndex, id: &str) -> Result<Option<Score>>;

    // ----- global complete index -----

    /// Add a job to the complete index at its completion time.
    fn complete_insert(&mut self, jid: &str, when: Timestamp) -> Result<()>;
    /// Remove a job from the complete index; missing is a no-op.
    fn complete_remove(&mut self, jid: &str) -> Result<()>;
    /// Number of retained completed jobs.
    fn complete_len(&self) -> Result<usize>;
    /// Completed jids newest-first, paginated.
    fn complete_page_desc(&self, offset: usize, count: usize) -> Result<Vec<String>>;
    /// The oldest completed jids with their completion times, up to `limit`.
    fn complete_oldest(&self, limit: usize) -> Result<Vec<(String, Timestamp)>>;

    // ----- failure groups -----

    /// Record a job under a failure group at its failure time.
    fn failed_insert(&mut self, group: &str, jid: &str, when: Timestamp) -> Result<()>;
    /// Remove a job from a failure group; missing is a no-op.
    fn failed_remove(&mut self, group: &str, jid: &str) -> Result<()>;

    // ----- tracked set -----

    /// Add a jid to the tracked set.
    fn tracked_insert(&mut self, jid: &str) -> Result<()>;
    /// Remove a jid from the tracked set; missing is a no-op.
    fn tracked_remove(&mut self, jid: &str) -> Result<()>;
    /// All tracked jids, sorted.
    fn tracked_members(&self) -> Result<Vec<String>>;

    // ----- tag indices -----

    /// Index a jid under a tag at the tagging time.
    fn tag_insert(&mut self, tag: &str, jid: &str, when: Timestamp) -> Result<()>;
    /// Remove a jid from a tag; empty tags disappear.
    fn tag_remove(&mut self, tag: &str, jid: &str) -> Result<()>;
    /// Jids carrying a tag in tag-time order, paginated.
    fn tag_page(&self, tag: &str, offset: usize, count: usize) -> Result<Vec<String>>;
    /// Tags by descending use count, paginated.
    fn tag_top(&self, offset: usize, count: usize) -> Result<Vec<(String, usize)>>;

    // ----- resources -----

    /// Fetch a resource record by name.
    fn resource(&self, name: &str) -> Result<Option<Resource>>;
    /// Insert or overwrite a resource record.
    fn put_resource(&mut self, resource: &Resource) -> Result<()>;
    /// Delete a resource record; missing is a no-op.
    fn delete_resource(&mut self, name: &str) -> Result<()>;

    // ----- configuration -----

    /// A stored configuration value, if set.
    fn config_get(&self, key: &str) -> Result<Option<i64>>;
    /// Store a configuration value.
    fn config_set(&mut self, key: &str, value: i64) -> Result<()>;
    /// All stored configuration pairs, sorted by key.
    fn config_all(&self) -> Result<Vec<(String, i64)>>;

    // ----- statistics -----

    /// The day bucket for a queue, if any samples were recorded.
    fn stats(&self, queue: &str, day: Timestamp) -> Result<Option<QueueDayStats>>;
    /// Write a day bucket for a queue.
    fn put_stats(&mut self, queue: &str, day: Timestamp, stats: &QueueDayStats) -> Result<()>;
    /// Drop day buckets older than `before_day` for a queue.
    fn trim_stats(&mut self, queue: &str, before_day: Timestamp) -> Result<()>;

    // ----- time high-water mark -----

    /// The greatest `now` any operation has presented.
    fn high_water(&self) -> Result<Timestamp>;
    /// Raise the high-water mark. Callers never lower it.
    fn set_high_water(&mut self, now: Timestamp) -> Result<()>;
}

/// A store the engine can run against.
pub trait Store {
    /// The transaction type handed to operations.
    type Tx: StoreTx;

    /// Run one engine operation atomically. If `f` returns `Err`, every
    /// mutation made through the transaction must be discarded.
    fn transaction<T>(
        &mut self,
        f: impl FnOnce(&mut Self::Tx) -> crate::Result<T>,
    ) -> crate::Result<T>;
}
