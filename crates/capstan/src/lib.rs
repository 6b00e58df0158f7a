//! # Capstan
//!
//! A deterministic job-scheduling engine: priority queues, shared resources,
//! dependency graphs, and recurring work over a transactional store.
//!
//! ## Core Concepts
//!
//! Capstan separates **deciding** from **storing**:
//! - [`Engine`] = the scheduling rules (placement, selection, lifecycle)
//! - [`Store`] = a transactional key/value surface with sorted indices
//!
//! The key principle: **One Operation = One Transaction**. Every externally
//! visible effect of an operation commits together or not at all.
//!
//! ## Architecture
//!
//! ```text
//! Callers (transport, CLI, tests)
//!     │
//!     ▼ call(command, now, argv)
//! service::spawn ── one task owns the engine, orders callers
//!     │
//!     ▼ api::dispatch ── argv parsing, Malformed rejection
//! Engine ──────────────────────────────────────────────┐
//!     │  put / pop / peek / complete / fail / retry    │
//!     │  heartbeat / cancel / priority / pause         │
//!     │  resources / recurring / queries / stats       │
//!     ▼                                                │
//! Store::transaction ◄─────────────────────────────────┘
//!     │
//!     ▼
//! provider (capstan-memory, or your own)
//! ```
//!
//! ## Key Invariants
//!
//! 1. **Time is an input** - Every operation takes the caller's `now`; the
//!    engine never reads a clock
//! 2. **State matches index** - A job sits in exactly the queue index its
//!    state names; transitions are remove + add in one transaction
//! 3. **At-least-once** - Leases expire; stalled jobs are retried by other
//!    workers at the cost of an attempt
//! 4. **Resources are all-or-nothing to run** - A job may hold some locks
//!    while pending on others, but runs only with its full set
//! 5. **No partial failures** - An operation that errors leaves the store
//!    untouched
//!
//! ## Example
//!
//! ```ignore
//! use capstan_core::{Engine, PutOptions};
//! use capstan_memory::MemoryStore;
//!
//! let mut engine = Engine::new(MemoryStore::new());
//!
//! engine.put(0, Some("worker-1"), "emails", "jid-1", "SendEmail", "{}", 0,
//!            PutOptions::default())?;
//!
//! let jobs = engine.pop(1, "emails", "worker-1", 5)?;
//! for job in &jobs {
//!     // ... do the work, heartbeating as needed ...
//!     engine.complete(30, &job.jid, "worker-1", "emails", "{}",
//!                     Default::default())?;
//! }
//! ```
//!
//! ## What This Is Not
//!
//! Capstan is **not**:
//! - A transport or RPC layer (bring your own; [`api::dispatch`] is the seam)
//! - A durable storage format (the [`Store`] contract is the seam)
//! - Exactly-once delivery (the contract is at-least-once with retries)

// Core modules
mod engine;
mod error;
mod job;
mod query;
mod recurring;
mod resource;
mod stats;
mod store;

// Command surface (string argv in, JSON values out)
pub mod api;

// Configuration knobs and defaults
pub mod config;

// Serializer front-end (one task owns the engine)
pub mod service;

// Re-export the engine and its operation types
pub use engine::{
    CompleteOptions, CompleteOutcome, Engine, PutOptions, PutOutcome, NOT_REPLACED,
};

// Re-export error types
pub use error::{Error, Result};

// Re-export job types
pub use job::{Failure, HistoryEvent, Job, JobState, DEFAULT_RETRIES};

// Re-export query types
pub use query::{QueueCounts, QueueJobsState, WorkerCounts, WorkerJobs};

// Re-export recurring types
pub use recurring::{RecurOptions, RecurringTemplate};

// Re-export resource types
pub use resource::Resource;

// Re-export statistics types
pub use stats::{QueueDayStats, Summary};

// Re-export the store contract
pub use store::{QueueIndex, Score, Store, StoreTx, Timestamp};
