//! Subprocess command bus.
//!
//! One long-lived worker process answers newline-terminated commands with
//! one JSON line each. The protocol carries no request identifiers, so the
//! bus keeps at most one command in flight and pairs every output line with
//! the oldest outstanding command.
//!
//! # Components
//!
//! - `LineFramer`: reassembles stdout chunks into complete lines
//! - `ResponseCorrelator`: holds the in-flight waiter and resolves it
//! - `CommandQueue`: FIFO of commands not yet written
//! - `Supervisor`: worker lifecycle and generation tracking
//! - `Scheduler`: the I/O-free combination of the three above
//! - `BusActor`: the task that owns the scheduler and the worker process
//!
//! `CommandBus` is the cloneable handle callers use.

mod actor;
pub(crate) mod command;
pub(crate) mod correlator;
pub(crate) mod framer;
pub(crate) mod queue;
pub(crate) mod scheduler;
pub(crate) mod supervisor;
pub(crate) mod worker;

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use actor::{BusActor, Request};
use command::Command;

pub use command::CommandId;
pub use correlator::invalid_payload;
pub use framer::LineFramer;
pub use scheduler::BusStatus;
pub use supervisor::{Generation, WorkerState};

use crate::config::WorkerConfig;
use crate::error::{BusError, BusResult};

/// Handle to a running command bus.
///
/// Clones share the same worker. The bus keeps running until `shutdown` is
/// called or every handle is dropped.
#[derive(Clone)]
pub struct CommandBus {
    requests: mpsc::UnboundedSender<Request>,
    cancel: CancellationToken,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl std::fmt::Debug for CommandBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandBus")
            .field("closed", &self.requests.is_closed())
            .finish()
    }
}

impl CommandBus {
    /// Start the bus and its first worker.
    ///
    /// Must be called from within a tokio runtime. A worker that fails to
    /// spawn is logged and retried after the respawn delay; commands
    /// submitted meanwhile wait in the queue.
    pub fn start(config: WorkerConfig) -> Self {
        let (requests, requests_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let actor = BusActor::new(config, requests_rx, cancel.clone());
        let task = tokio::spawn(actor.run());
        Self {
            requests,
            cancel,
            task: Arc::new(Mutex::new(Some(task))),
        }
    }

    /// Send one command line to the worker and wait for its answer.
    ///
    /// Resolves with the parsed JSON line, or with the invalid-payload
    /// marker when the line is not JSON. Never times out.
    pub async fn submit(&self, command: impl Into<String>) -> BusResult<Value> {
        let (command, rx) = Command::new(command);
        self.requests
            .send(Request::Submit(command))
            .map_err(|_| BusError::ShuttingDown)?;
        rx.await.unwrap_or_else(|_| Err(BusError::ShuttingDown))
    }

    pub async fn status(&self) -> BusResult<BusStatus> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(Request::Status(tx))
            .map_err(|_| BusError::ShuttingDown)?;
        rx.await.map_err(|_| BusError::ShuttingDown)
    }

    /// Wait until a worker is running.
    ///
    /// Resolves as soon as a spawn succeeds, or with `SpawnFailure` when the
    /// next spawn attempt fails. The bus itself keeps retrying either way;
    /// this only lets one-shot callers give up early.
    pub async fn wait_for_worker(&self) -> BusResult<()> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(Request::WorkerReady(tx))
            .map_err(|_| BusError::ShuttingDown)?;
        rx.await.unwrap_or(Err(BusError::ShuttingDown))
    }

    /// Reject every pending command, stop the worker and wait for the bus
    /// task to finish. Other handles see `ShuttingDown` from then on.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let task = self.task.lock().await.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                log::error!(target: "stockbridge::bus", "Bus task failed: {}", e);
            }
        }
    }
}
