//! Configuration knobs, their defaults, and read-through accessors.
//!
//! Configuration is a store-held map of string key to integer value. Reads
//! fall back to the built-in defaults below; `config.get` with no key returns
//! the effective map (defaults overlaid with stored values).
//!
//! `queue-max-concurrency` may be set per queue with the key
//! `<queue>-max-concurrency`, which takes precedence over the global key.

use crate::error::Result;
use crate::store::{Store, StoreTx, Timestamp};
use crate::Engine;

/// Seconds between required heartbeats for a running job.
pub const HEARTBEAT: &str = "heartbeat";
/// Stall tolerance beyond `expires`.
pub const GRACE_PERIOD: &str = "grace-period";
/// Concurrent running cap per queue; 0 means unlimited.
pub const QUEUE_MAX_CONCURRENCY: &str = "queue-max-concurrency";
/// Retention seconds for completed jobs.
pub const JOBS_HISTORY: &str = "jobs-history";
/// Retention count for completed jobs.
pub const JOBS_HISTORY_COUNT: &str = "jobs-history-count";
/// Days of statistics kept per queue.
pub const STATS_HISTORY: &str = "stats-history";

/// The built-in default for a key, if it has one.
pub fn default_for(key: &str) -> Option<i64> {
    match key {
        HEARTBEAT => Some(60),
        GRACE_PERIOD => Some(10),
        QUEUE_MAX_CONCURRENCY => Some(0),
        JOBS_HISTORY => Some(604_800),
        JOBS_HISTORY_COUNT => Some(50_000),
        STATS_HISTORY => Some(30),
        _ => None,
    }
}

fn get_or_default<T: StoreTx>(tx: &T, key: &str) -> Result<i64> {
    Ok(tx
        .config_get(key)?
        .or_else(|| default_for(key))
        .unwrap_or(0))
}

pub(crate) fn heartbeat<T: StoreTx>(tx: &T) -> Result<i64> {
    get_or_default(tx, HEARTBEAT)
}

pub(crate) fn grace_period<T: StoreTx>(tx: &T) -> Result<i64> {
    get_or_default(tx, GRACE_PERIOD)
}

pub(crate) fn jobs_history<T: StoreTx>(tx: &T) -> Result<i64> {
    get_or_default(tx, JOBS_HISTORY)
}

pub(crate) fn jobs_history_count<T: StoreTx>(tx: &T) -> Result<i64> {
    get_or_default(tx, JOBS_HISTORY_COUNT)
}

pub(crate) fn stats_history<T: StoreTx>(tx: &T) -> Result<i64> {
    get_or_default(tx, STATS_HISTORY)
}

/// The running cap for a queue: per-queue override, then global, 0 unlimited.
pub(crate) fn queue_max_concurrency<T: StoreTx>(tx: &T, queue: &str) -> Result<i64> {
    if let Some(v) = tx.config_get(&format!("{queue}-max-concurrency"))? {
        return Ok(v);
    }
    get_or_default(tx, QUEUE_MAX_CONCURRENCY)
}

impl<S: Store> Engine<S> {
    /// Store a configuration value.
    pub fn config_set(&mut self, now: Timestamp, key: &str, value: i64) -> Result<()> {
        self.store.transaction(|tx| {
            crate::engine::observe_now(tx, now)?;
            tx.config_set(key, value)?;
            Ok(())
        })
    }

    /// A configuration value: stored, or the built-in default.
    pub fn config_get(&mut self, now: Timestamp, key: &str) -> Result<Option<i64>> {
        self.store.transaction(|tx| {
            crate::engine::observe_now(tx, now)?;
            Ok(tx.config_get(key)?.or_else(|| default_for(key)))
        })
    }

    /// The effective configuration map: defaults overlaid with stored values.
    pub fn config_all(&mut self, now: Timestamp) -> Result<Vec<(String, i64)>> {
        self.store.transaction(|tx| {
            crate::engine::observe_now(tx, now)?;
            let mut all: Vec<(String, i64)> = [
                HEARTBEAT,
                GRACE_PERIOD,
                QUEUE_MAX_CONCURRENCY,
                JOBS_HISTORY,
                JOBS_HISTORY_COUNT,
                STATS_HISTORY,
            ]
            .iter()
            .map(|key| (key.to_string(), default_for(key).unwrap_or(0)))
            .collect();
            for (key, value) in tx.config_all()? {
                match all.iter_mut().find(|(k, _)| *k == key) {
                    Some(entry) => entry.1 = value,
                    None => all.push((key, value)),
                }
            }
            all.sort();
            Ok(all)
        })
    }
}
