//! Structured error types for engine operations.
//!
//! `Error` provides pattern-matchable errors instead of generic `anyhow::Error`.
//! Store providers surface their own failures as `anyhow::Error`, which the
//! engine wraps in [`Error::Storage`]; everything else is a domain error with
//! enough context to act on.
//!
//! A failed operation leaves no partial state: operations validate before they
//! mutate, and the store's transaction discards mutations on error.

use thiserror::Error;

/// Result alias used throughout the engine.
pub type Result<T> = std::result::Result<T, Error>;

/// Structured error type for engine operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The argument shape or types of a command are wrong. No state change.
    #[error("malformed {command}: {message}")]
    Malformed {
        /// The command whose arguments were rejected.
        command: &'static str,
        /// What was wrong with them.
        message: String,
    },

    /// A job, resource, or recurring template that does not exist was named.
    #[error("{kind} {id} does not exist")]
    NotFound {
        /// What kind of thing was looked up ("job", "resource", ...).
        kind: &'static str,
        /// The identifier that failed to resolve.
        id: String,
    },

    /// The operation requires the job to be in a different state.
    #[error("job {jid} is {actual}, not {expected}")]
    WrongState {
        /// The job in question.
        jid: String,
        /// The state the operation requires.
        expected: &'static str,
        /// The state the job is actually in.
        actual: String,
    },

    /// The operation requires the job's current worker.
    #[error("job {jid} is held by worker {actual:?}, not {worker:?}")]
    WrongWorker {
        /// The job in question.
        jid: String,
        /// The worker that issued the operation.
        worker: String,
        /// The worker that actually holds the job.
        actual: String,
    },

    /// A resource with live locks or waiters cannot be deleted.
    #[error("resource {name} has locks or pending jobs")]
    CapacityConflict {
        /// The resource that is still in use.
        name: String,
    },

    /// The serializer front-end has shut down and can no longer accept calls.
    #[error("engine service stopped")]
    Shutdown,

    /// The store provider failed. The transaction was not committed.
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl Error {
    /// Shorthand for a [`Error::Malformed`] with a formatted message.
    pub fn malformed(command: &'static str, message: impl Into<String>) -> Self {
        Error::Malformed {
            command,
            message: message.into(),
        }
    }

    /// Shorthand for a missing job.
    pub fn no_job(jid: impl Into<String>) -> Self {
        Error::NotFound {
            kind: "job",
            id: jid.into(),
        }
    }

    /// Shorthand for a missing resource.
    pub fn no_resource(name: impl Into<String>) -> Self {
        Error::NotFound {
            kind: "resource",
            id: name.into(),
        }
    }
}
