//! The cooperative serializer in front of the engine.
//!
//! The engine itself is synchronous and single-owner; concurrent callers must
//! be ordered before entering it. This module provides that order: one tokio
//! task owns the engine and drains a channel of requests, so any interleaving
//! of callers corresponds to a total order of whole operations.
//!
//! ```ignore
//! let engine = Engine::new(MemoryStore::new());
//! let handle = service::spawn(engine);
//!
//! let jid = handle
//!     .call("put", 0, vec!["worker".into(), "q".into(), "jid".into(),
//!                          "klass".into(), "{}".into(), "0".into()])
//!     .await?;
//! ```
//!
//! Dropping every handle closes the channel and the task drains and exits.

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::api;
use crate::error::{Error, Result};
use crate::store::{Store, Timestamp};
use crate::Engine;

/// Requests queued ahead of the engine before the channel applies
/// backpressure to callers.
const REQUEST_BACKLOG: usize = 256;

struct Request {
    command: String,
    now: Timestamp,
    argv: Vec<String>,
    reply: oneshot::Sender<Result<Value>>,
}

/// A cloneable handle that enqueues commands for the engine task.
#[derive(Clone)]
pub struct ServiceHandle {
    sender: mpsc::Sender<Request>,
}

impl ServiceHandle {
    /// Execute one command, awaiting its reply. Requests from all handles
    /// are processed in arrival order, one at a time.
    pub async fn call(
        &self,
        command: impl Into<String>,
        now: Timestamp,
        argv: Vec<String>,
    ) -> Result<Value> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(Request {
                command: command.into(),
                now,
                argv,
                reply,
            })
            .await
            .map_err(|_| Error::Shutdown)?;
        response.await.map_err(|_| Error::Shutdown)?
    }
}

/// Move the engine onto its own task and return a handle to it.
pub fn spawn<S>(engine: Engine<S>) -> ServiceHandle
where
    S: Store + Send + 'static,
{
    let (sender, mut receiver) = mpsc::channel::<Request>(REQUEST_BACKLOG);
    tokio::spawn(async move {
        let mut engine = engine;
        while let Some(request) = receiver.recv().await {
            let result = api::dispatch(&mut engine, &request.command, request.now, &request.argv);
            if let Err(error) = &result {
                debug!(command = %request.command, %error, "command returned an error");
            }
            if request.reply.send(result).is_err() {
                debug!(command = %request.command, "caller went away before the reply");
            }
        }
        debug!("engine service drained, shutting down");
    });
    ServiceHandle { sender }
}

