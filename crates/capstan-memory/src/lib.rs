//! In-memory implementation of the Capstan store contract.
//!
//! This crate provides a process-local [`Store`] suitable for tests and
//! single-process deployments. Sorted indices are `BTreeSet`s of
//! `(score, id)` pairs; records are plain maps.
//!
//! # Transactions
//!
//! Atomicity is snapshot-based: a transaction clones the state, the operation
//! mutates the clone, and only a successful operation swaps it back in. A
//! failed operation therefore leaves no partial state, exactly as the engine
//! requires. This trades copying for simplicity; durable providers should
//! use their backend's native transactions instead.
//!
//! # Usage
//!
//! ```ignore
//! use capstan_core::Engine;
//! use capstan_memory::MemoryStore;
//!
//! let mut engine = Engine::new(MemoryStore::new());
//! engine.put(0, None, "q", "jid", "klass", "{}", 0, Default::default())?;
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap};

use anyhow::Result;
use capstan_core::{
    Job, QueueDayStats, QueueIndex, RecurringTemplate, Resource, Score, Store, StoreTx, Timestamp,
};

/// A sorted set: members ordered by `(score, id)`, with O(log n) re-scoring.
#[derive(Debug, Clone, Default)]
struct Index {
    by_score: BTreeSet<(Score, String)>,
    scores: HashMap<String, Score>,
}

impl Index {
    fn insert(&mut self, id: &str, score: Score) {
        if let Some(old) = self.scores.insert(id.to_string(), score) {
            self.by_score.remove(&(old, id.to_string()));
        }
        self.by_score.insert((score, id.to_string()));
    }

    fn remove(&mut self, id: &str) {
        if let Some(old) = self.scores.remove(id) {
            self.by_score.remove(&(old, id.to_string()));
        }
    }

    fn len(&self) -> usize {
        self.scores.len()
    }

    fn score(&self, id: &str) -> Option<Score> {
        self.scores.get(id).copied()
    }

    fn page(&self, offset: usize, count: usize) -> Vec<String> {
        self.by_score
            .iter()
            .skip(offset)
            .take(count)
            .map(|(_, id)| id.clone())
            .collect()
    }

    fn page_desc(&self, offset: usize, count: usize) -> Vec<String> {
        self.by_score
            .iter()
            .rev()
            .skip(offset)
            .take(count)
            .map(|(_, id)| id.clone())
            .collect()
    }

    fn below(&self, max: Score, limit: usize) -> Vec<(String, Score)> {
        self.by_score
            .iter()
            .take_while(|(score, _)| *score <= max)
            .take(limit)
            .map(|(score, id)| (id.clone(), *score))
            .collect()
    }
}

/// One queue's flag and indices.
#[derive(Debug, Clone, Default)]
struct QueueState {
    paused: bool,
    indices: HashMap<QueueIndex, Index>,
}

/// Everything the store holds; cloned per transaction.
#[derive(Debug, Clone, Default)]
struct State {
    jobs: HashMap<String, Job>,
    recurring: HashMap<String, RecurringTemplate>,
    queues: BTreeMap<String, QueueState>,
    complete: Index,
    failed: HashMap<String, Index>,
    tracked: BTreeSet<String>,
    tags: BTreeMap<String, Index>,
    resources: HashMap<String, Resource>,
    config: BTreeMap<String, i64>,
    stats: HashMap<String, BTreeMap<Timestamp, QueueDayStats>>,
    high_water: Timestamp,
}

/// A process-local store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: State,
}

impl MemoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

/// An open transaction: a mutable snapshot of the state.
#[derive(Debug)]
pub struct MemoryTx {
    state: State,
}

impl Store for MemoryStore {
    type Tx = MemoryTx;

    fn transaction<T>(
        &mut self,
        f: impl FnOnce(&mut Self::Tx) -> capstan_core::Result<T>,
    ) -> capstan_core::Result<T> {
        let mut tx = MemoryTx {
            state: self.state.clone(),
        };
        let value = f(&mut tx)?;
        self.state = tx.state;
        Ok(value)
    }
}

impl MemoryTx {
    fn index(&self, queue: &str, index: QueueIndex) -> Option<&Index> {
        self.state.queues.get(queue)?.indices.get(&index)
    }

    fn index_mut(&mut self, queue: &str, index: QueueIndex) -> &mut Index {
        self.state
            .queues
            .entry(queue.to_string())
            .or_default()
            .indices
            .entry(index)
            .or_default()
    }
}

impl StoreTx for MemoryTx {
    fn job(&self, jid: &str) -> Result<Option<Job>> {
        Ok(self.state.jobs.get(jid).cloned())
    }

    fn put_job(&mut self, job: &Job) -> Result<()> {
        self.state.jobs.insert(job.jid.clone(), job.clone());
        Ok(())
    }

    fn delete_job(&mut self, jid: &str) -> Result<()> {
        self.state.jobs.remove(jid);
        Ok(())
    }

    fn recurring(&self, jid: &str) -> Result<Option<RecurringTemplate>> {
        Ok(self.state.recurring.get(jid).cloned())
    }

    fn put_recurring(&mut self, template: &RecurringTemplate) -> Result<()> {
        self.state
            .recurring
            .insert(template.jid.clone(), template.clone());
        Ok(())
    }

    fn delete_recurring(&mut self, jid: &str) -> Result<()> {
        self.state.recurring.remove(jid);
        Ok(())
    }

    fn ensure_queue(&mut self, queue: &str) -> Result<()> {
        self.state.queues.entry(queue.to_string()).or_default();
        Ok(())
    }

    fn queue_names(&self) -> Result<Vec<String>> {
        Ok(self.state.queues.keys().cloned().collect())
    }

    fn queue_paused(&self, queue: &str) -> Result<bool> {
        Ok(self
            .state
            .queues
            .get(queue)
            .map(|q| q.paused)
            .unwrap_or(false))
    }

    fn set_queue_paused(&mut self, queue: &str, paused: bool) -> Result<()> {
        self.state.queues.entry(queue.to_string()).or_default().paused = paused;
        Ok(())
    }

    fn index_insert(
        &mut self,
        queue: &str,
        index: QueueIndex,
        id: &str,
        score: Score,
    ) -> Result<()> {
        self.index_mut(queue, index).insert(id, score);
        Ok(())
    }

    fn index_remove(&mut self, queue: &str, index: QueueIndex, id: &str) -> Result<()> {
        self.index_mut(queue, index).remove(id);
        Ok(())
    }

    fn index_len(&self, queue: &str, index: QueueIndex) -> Result<usize> {
        Ok(self.index(queue, index).map(Index::len).unwrap_or(0))
    }

    fn index_page(
        &self,
        queue: &str,
        index: QueueIndex,
        offset: usize,
        count: usize,
    ) -> Result<Vec<String>> {
        Ok(self
            .index(queue, index)
            .map(|i| i.page(offset, count))
            .unwrap_or_default())
    }

    fn index_below(
        &self,
        queue: &str,
        index: QueueIndex,
        max: Score,
        limit: usize,
    ) -> Result<Vec<(String, Score)>> {
        Ok(self
            .index(queue, index)
            .map(|i| i.below(max, limit))
            .unwrap_or_default())
    }

    fn index_score(&self, queue: &str, index: QueueIndex, id: &str) -> Result<Option<Score>> {
        Ok(self.index(queue, index).and_then(|i| i.score(id)))
    }

    fn complete_insert(&mut self, jid: &str, when: Timestamp) -> Result<()> {
        self.state.complete.insert(jid, Score(when, 0));
        Ok(())
    }

    fn complete_remove(&mut self, jid: &str) -> Result<()> {
        self.state.complete.remove(jid);
        Ok(())
    }

    fn complete_len(&self) -> Result<usize> {
        Ok(self.state.complete.len())
    }

    fn complete_page_desc(&self, offset: usize, count: usize) -> Result<Vec<String>> {
        Ok(self.state.complete.page_desc(offset, count))
    }

    fn complete_oldest(&self, limit: usize) -> Result<Vec<(String, Timestamp)>> {
        Ok(self
            .state
            .complete
            .below(Score(i64::MAX, i64::MAX), limit)
            .into_iter()
            .map(|(jid, score)| (jid, score.0))
            .collect())
    }

    fn failed_insert(&mut self, group: &str, jid: &str, when: Timestamp) -> Result<()> {
        self.state
            .failed
            .entry(group.to_string())
            .or_default()
            .insert(jid, Score(when, 0));
        Ok(())
    }

    fn failed_remove(&mut self, group: &str, jid: &str) -> Result<()> {
        if let Some(index) = self.state.failed.get_mut(group) {
            index.remove(jid);
            if index.len() == 0 {
                self.state.failed.remove(group);
            }
        }
        Ok(())
    }

    fn tracked_insert(&mut self, jid: &str) -> Result<()> {
        self.state.tracked.insert(jid.to_string());
        Ok(())
    }

    fn tracked_remove(&mut self, jid: &str) -> Result<()> {
        self.state.tracked.remove(jid);
        Ok(())
    }

    fn tracked_members(&self) -> Result<Vec<String>> {
        Ok(self.state.tracked.iter().cloned().collect())
    }

    fn tag_insert(&mut self, tag: &str, jid: &str, when: Timestamp) -> Result<()> {
        self.state
            .tags
            .entry(tag.to_string())
            .or_default()
            .insert(jid, Score(when, 0));
        Ok(())
    }

    fn tag_remove(&mut self, tag: &str, jid: &str) -> Result<()> {
        if let Some(index) = self.state.tags.get_mut(tag) {
            index.remove(jid);
            if index.len() == 0 {
                self.state.tags.remove(tag);
            }
        }
        Ok(())
    }

    fn tag_page(&self, tag: &str, offset: usize, count: usize) -> Result<Vec<String>> {
        Ok(self
            .state
            .tags
            .get(tag)
            .map(|i| i.page(offset, count))
            .unwrap_or_default())
    }

    fn tag_top(&self, offset: usize, count: usize) -> Result<Vec<(String, usize)>> {
        let mut tags: Vec<(String, usize)> = self
            .state
            .tags
            .iter()
            .map(|(tag, index)| (tag.clone(), index.len()))
            .collect();
        tags.sort_by(|(tag_a, n_a), (tag_b, n_b)| n_b.cmp(n_a).then_with(|| tag_a.cmp(tag_b)));
        Ok(tags.into_iter().skip(offset).take(count).collect())
    }

    fn resource(&self, name: &str) -> Result<Option<Resource>> {
        Ok(self.state.resources.get(name).cloned())
    }

    fn put_resource(&mut self, resource: &Resource) -> Result<()> {
        self.state
            .resources
            .insert(resource.name.clone(), resource.clone());
        Ok(())
    }

    fn delete_resource(&mut self, name: &str) -> Result<()> {
        self.state.resources.remove(name);
        Ok(())
    }

    fn config_get(&self, key: &str) -> Result<Option<i64>> {
        Ok(self.state.config.get(key).copied())
    }

    fn config_set(&mut self, key: &str, value: i64) -> Result<()> {
        self.state.config.insert(key.to_string(), value);
        Ok(())
    }

    fn config_all(&self) -> Result<Vec<(String, i64)>> {
        Ok(self
            .state
            .config
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect())
    }

    fn stats(&self, queue: &str, day: Timestamp) -> Result<Option<QueueDayStats>> {
        Ok(self
            .state
            .stats
            .get(queue)
            .and_then(|days| days.get(&day))
            .cloned())
    }

    fn put_stats(&mut self, queue: &str, day: Timestamp, stats: &QueueDayStats) -> Result<()> {
        self.state
            .stats
            .entry(queue.to_string())
            .or_default()
            .insert(day, stats.clone());
        Ok(())
    }

    fn trim_stats(&mut self, queue: &str, before_day: Timestamp) -> Result<()> {
        if let Some(days) = self.state.stats.get_mut(queue) {
            days.retain(|day, _| *day >= before_day);
        }
        Ok(())
    }

    fn high_water(&self) -> Result<Timestamp> {
        Ok(self.state.high_water)
    }

    fn set_high_water(&mut self, now: Timestamp) -> Result<()> {
        self.state.high_water = now;
        Ok(())
    }
}
