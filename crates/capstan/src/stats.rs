//! Day-bucketed per-queue statistics.
//!
//! Each queue accumulates one [`QueueDayStats`] bucket per day (day =
//! `now - now mod 86400` in caller ticks): counters for failures and retries,
//! plus wait and run duration summaries maintained with Welford's method so
//! mean and standard deviation never require the raw samples.

use serde::{Deserialize, Serialize};

use crate::config;
use crate::error::Result;
use crate::store::{StoreTx, Timestamp};

/// Ticks per statistics day bucket.
pub const DAY: i64 = 86_400;

/// The day bucket containing `now`.
pub fn day_of(now: Timestamp) -> Timestamp {
    now - now.rem_euclid(DAY)
}

/// Running summary of a duration distribution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    /// Number of samples.
    pub count: u64,
    /// Mean of the samples.
    pub mean: f64,
    /// Sum of squared deviations from the mean.
    pub m2: f64,
}

impl Summary {
    /// Fold one sample in.
    pub fn add(&mut self, sample: f64) {
        self.count += 1;
        let delta = sample - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (sample - self.mean);
    }

    /// Population standard deviation of the samples seen so far.
    pub fn std(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            (self.m2 / self.count as f64).sqrt()
        }
    }
}

/// One queue's statistics for one day.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueDayStats {
    /// Jobs currently failed, attributed to this day.
    pub failed: i64,
    /// Failure events observed this day.
    pub failures: i64,
    /// Retry events observed this day.
    pub retries: i64,
    /// Time from eligibility to pop.
    pub wait: Summary,
    /// Time from pop to completion.
    pub run: Summary,
}

/// Mutate the day bucket for `queue` at `now`, trimming buckets that have
/// aged out of the `stats-history` window.
pub(crate) fn bump<T: StoreTx>(
    tx: &mut T,
    queue: &str,
    now: Timestamp,
    f: impl FnOnce(&mut QueueDayStats),
) -> Result<()> {
    let day = day_of(now);
    let mut bucket = tx.stats(queue, day)?.unwrap_or_default();
    f(&mut bucket);
    tx.put_stats(queue, day, &bucket)?;
    let keep = config::stats_history(tx)?;
    tx.trim_stats(queue, day - keep * DAY)?;
    Ok(())
}

pub(crate) fn sample_wait<T: StoreTx>(
    tx: &mut T,
    queue: &str,
    now: Timestamp,
    waited: i64,
) -> Result<()> {
    bump(tx, queue, now, |stats| stats.wait.add(waited.max(0) as f64))
}

pub(crate) fn sample_run<T: StoreTx>(
    tx: &mut T,
    queue: &str,
    now: Timestamp,
    ran: i64,
) -> Result<()> {
    bump(tx, queue, now, |stats| stats.run.add(ran.max(0) as f64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_day_of_buckets() {
        assert_eq!(day_of(0), 0);
        assert_eq!(day_of(86_399), 0);
        assert_eq!(day_of(86_400), 86_400);
        assert_eq!(day_of(100_000), 86_400);
    }

    #[test]
    fn test_summary_mean_and_std() {
        let mut s = Summary::default();
        for sample in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            s.add(sample);
        }
        assert_eq!(s.count, 8);
        assert!((s.mean - 5.0).abs() < 1e-9);
        assert!((s.std() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_summary_empty_std_is_zero() {
        assert_eq!(Summary::default().std(), 0.0);
    }
}
