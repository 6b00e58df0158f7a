//! Named counting semaphores shared across jobs.
//!
//! A resource has a capacity (`max`), a set of lock holders, and an ordered
//! list of pending waiters. Jobs may hold locks on some of their resources
//! while pending on others; they become runnable only once every resource in
//! `job.resources` has granted a lock.
//!
//! `pending` enumerates in arrival order. Grants select by priority (higher
//! first) and then arrival, reading priorities at grant time so later
//! `priority` updates affect waiting grantees.
//!
//! Capacity may change at any time: raising it grants to waiters immediately;
//! lowering it strands nothing — existing locks are kept and the overshoot
//! drains as jobs complete.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::job::{Job, JobState};
use crate::store::{QueueIndex, Store, StoreTx, Timestamp};
use crate::Engine;

/// A named counting semaphore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    /// The resource's name.
    pub name: String,
    /// Capacity; `locks` may transiently exceed it after a capacity cut.
    pub max: i64,
    /// Jids currently holding a unit, in grant order.
    pub locks: Vec<String>,
    /// Jids waiting for a unit, in arrival order.
    pub pending: Vec<String>,
}

impl Resource {
    /// A fresh resource with the given capacity.
    pub fn new(name: &str, max: i64) -> Self {
        Resource {
            name: name.into(),
            max,
            locks: Vec::new(),
            pending: Vec::new(),
        }
    }

    /// Whether a unit is free to grant.
    pub fn has_capacity(&self) -> bool {
        (self.locks.len() as i64) < self.max
    }

    /// Whether a jid holds a lock.
    pub fn holds(&self, jid: &str) -> bool {
        self.locks.iter().any(|j| j == jid)
    }

    /// Whether a jid is waiting for a unit.
    pub fn is_pending(&self, jid: &str) -> bool {
        self.pending.iter().any(|j| j == jid)
    }
}

/// Try to take a lock on every resource the job requires, in order. Resources
/// at capacity record the job as pending instead. Returns whether every
/// resource granted; already-held locks and existing pending entries are left
/// in place, so re-acquisition is idempotent.
pub(crate) fn acquire<T: StoreTx>(tx: &mut T, job: &Job) -> Result<bool> {
    let mut granted_all = true;
    for name in &job.resources {
        let mut resource = tx
            .resource(name)?
            .ok_or_else(|| Error::no_resource(name.clone()))?;
        if resource.holds(&job.jid) {
            continue;
        }
        if resource.is_pending(&job.jid) {
            granted_all = false;
            continue;
        }
        if resource.has_capacity() {
            resource.locks.push(job.jid.clone());
            debug!(resource = %name, jid = %job.jid, "resource lock granted");
        } else {
            resource.pending.push(job.jid.clone());
            granted_all = false;
            debug!(resource = %name, jid = %job.jid, "resource busy, job pending");
        }
        tx.put_resource(&resource)?;
    }
    Ok(granted_all)
}

/// Whether the job holds a lock on every resource it requires.
pub(crate) fn holds_all<T: StoreTx>(tx: &T, job: &Job) -> Result<bool> {
    for name in &job.resources {
        let held = tx
            .resource(name)?
            .map(|resource| resource.holds(&job.jid))
            .unwrap_or(false);
        if !held {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Drop the job from one resource's locks and pending list, then hand freed
/// units to the best waiters.
pub(crate) fn release_one<T: StoreTx>(tx: &mut T, name: &str, jid: &str) -> Result<()> {
    let Some(mut resource) = tx.resource(name)? else {
        return Ok(());
    };
    resource.locks.retain(|j| j != jid);
    resource.pending.retain(|j| j != jid);
    tx.put_resource(&resource)?;
    grant_pending(tx, name)
}

/// Drop the job from every resource it requires.
pub(crate) fn release_all<T: StoreTx>(tx: &mut T, job: &Job) -> Result<()> {
    for name in &job.resources {
        release_one(tx, name, &job.jid)?;
    }
    Ok(())
}

/// While capacity permits, grant units to pending jobs: highest priority
/// first, arrival order among equals. A grantee that now holds its full
/// resource set moves from the depends index to waiting.
pub(crate) fn grant_pending<T: StoreTx>(tx: &mut T, name: &str) -> Result<()> {
    loop {
        let Some(mut resource) = tx.resource(name)? else {
            return Ok(());
        };
        if !resource.has_capacity() || resource.pending.is_empty() {
            return Ok(());
        }

        // Select (priority desc, arrival asc); drop waiters whose job is gone.
        let mut best: Option<(usize, i64)> = None;
        let mut orphans: Vec<usize> = Vec::new();
        for (i, jid) in resource.pending.iter().enumerate() {
            match tx.job(jid)? {
                Some(job) => {
                    if best.map(|(_, p)| job.priority > p).unwrap_or(true) {
                        best = Some((i, job.priority));
                    }
                }
                None => orphans.push(i),
            }
        }
        if !orphans.is_empty() {
            for i in orphans.into_iter().rev() {
                resource.pending.remove(i);
            }
            tx.put_resource(&resource)?;
            continue;
        }
        let Some((idx, _)) = best else {
            return Ok(());
        };

        let jid = resource.pending.remove(idx);
        resource.locks.push(jid.clone());
        tx.put_resource(&resource)?;
        debug!(resource = %name, jid = %jid, "resource lock granted from pending");

        if let Some(mut job) = tx.job(&jid)? {
            if job.state == JobState::Depends && job.dependencies.is_empty() && holds_all(tx, &job)? {
                if let Some(queue) = job.queue.clone() {
                    tx.index_remove(&queue, QueueIndex::Depends, &jid)?;
                    job.state = JobState::Waiting;
                    tx.index_insert(&queue, QueueIndex::Waiting, &jid, job.waiting_score())?;
                    tx.put_job(&job)?;
                    debug!(jid = %jid, queue = %queue, "all resources granted, job waiting");
                }
            }
        }
    }
}

impl<S: Store> Engine<S> {
    /// Create a resource or change its capacity. Raising capacity grants
    /// units to the best pending waiters immediately. Returns the name.
    pub fn resource_set(&mut self, now: Timestamp, name: &str, max: i64) -> Result<String> {
        self.store.transaction(|tx| {
            crate::engine::observe_now(tx, now)?;
            let mut resource = tx
                .resource(name)?
                .unwrap_or_else(|| Resource::new(name, max));
            resource.max = max;
            tx.put_resource(&resource)?;
            grant_pending(tx, name)?;
            Ok(name.to_string())
        })
    }

    /// Delete a resource. Fails with [`Error::CapacityConflict`] while any
    /// job holds or awaits a unit.
    pub fn resource_unset(&mut self, now: Timestamp, name: &str) -> Result<()> {
        self.store.transaction(|tx| {
            crate::engine::observe_now(tx, now)?;
            let resource = tx
                .resource(name)?
                .ok_or_else(|| Error::no_resource(name))?;
            if !resource.locks.is_empty() || !resource.pending.is_empty() {
                return Err(Error::CapacityConflict { name: name.into() });
            }
            tx.delete_resource(name)?;
            Ok(())
        })
    }

    /// The full record of a resource; `NotFound` for a missing name.
    pub fn resource_get(&mut self, now: Timestamp, name: &str) -> Result<Resource> {
        self.store.transaction(|tx| {
            crate::engine::observe_now(tx, now)?;
            tx.resource(name)?.ok_or_else(|| Error::no_resource(name))
        })
    }

    /// The full record of a resource, or `None` for a missing name.
    pub fn resource_data(&mut self, now: Timestamp, name: &str) -> Result<Option<Resource>> {
        self.store.transaction(|tx| {
            crate::engine::observe_now(tx, now)?;
            Ok(tx.resource(name)?)
        })
    }

    /// Whether a resource exists.
    pub fn resource_exists(&mut self, now: Timestamp, name: &str) -> Result<bool> {
        Ok(self.resource_data(now, name)?.is_some())
    }

    /// The jids currently holding a unit, in grant order.
    pub fn resource_locks(&mut self, now: Timestamp, name: &str) -> Result<Vec<String>> {
        Ok(self.resource_get(now, name)?.locks)
    }

    /// The jids waiting for a unit, in arrival order.
    pub fn resource_pending(&mut self, now: Timestamp, name: &str) -> Result<Vec<String>> {
        Ok(self.resource_get(now, name)?.pending)
    }

    /// How many units are held.
    pub fn resource_lock_count(&mut self, now: Timestamp, name: &str) -> Result<usize> {
        Ok(self.resource_get(now, name)?.locks.len())
    }

    /// How many jobs are waiting for a unit.
    pub fn resource_pending_count(&mut self, now: Timestamp, name: &str) -> Result<usize> {
        Ok(self.resource_get(now, name)?.pending.len())
    }
}

