//! Worker execution environments.
//!
//! An environment starts one isolated worker per slot and reports its
//! lifecycle back to the coordinator as [`WorkerEvent`]s:
//!
//! ```text
//!  spawn() ──► Ready ──► Message* ──► Exit
//!                  └──► Error ─────────┘
//! ```
//!
//! - [`ProcessEnvironment`]: one OS process per slot, framed MessagePack on
//!   stdin/stdout, stderr forwarded to `tracing`.
//! - [`InlineEnvironment`]: one tokio task per slot inside the host process.

mod inline;
mod process;

use tokio::sync::mpsc;

use crate::coordinator::Input;
use crate::error::PoolError;
use crate::message::Message;
use crate::messages::WorkerReady;
use crate::slot::SlotToken;

pub use inline::{Evaluator, InlineEnvironment};
pub use process::{ProcessEnvironment, WORKER_INDEX_ENV};

/// Lifecycle event reported by a worker instance.
#[derive(Debug)]
pub enum WorkerEvent {
    /// The worker finished starting up and accepts tasks.
    Ready(WorkerReady),
    /// A message from the worker (task reports).
    Message(Message),
    /// The worker (or the channel to it) failed.
    Error(String),
    /// The worker is gone. `None` when no exit code is available (signal).
    Exit(Option<i32>),
}

/// Sink through which an environment reports events for one worker instance.
///
/// Every event is tagged with the instance's [`SlotToken`] so events from a
/// replaced instance can be told apart from its successor's.
#[derive(Debug, Clone)]
pub struct WorkerEvents {
    token: SlotToken,
    tx: mpsc::UnboundedSender<Input>,
}

impl WorkerEvents {
    pub(crate) fn new(token: SlotToken, tx: mpsc::UnboundedSender<Input>) -> Self {
        Self { token, tx }
    }

    pub fn token(&self) -> SlotToken {
        self.token
    }

    /// Report an event. Returns `false` once the coordinator has stopped.
    pub fn emit(&self, event: WorkerEvent) -> bool {
        self.tx
            .send(Input::Worker {
                token: self.token,
                event,
            })
            .is_ok()
    }
}

/// Handle to one running worker instance.
pub trait WorkerHandle: Send {
    /// Queue a message for the worker. Fails synchronously when the worker
    /// can no longer receive messages.
    fn send(&mut self, message: Message) -> Result<(), PoolError>;

    /// Ask the worker to stop. Best effort; the `Exit` event follows.
    fn terminate(&mut self) -> Result<(), PoolError>;

    /// Whether the worker is known to be gone.
    fn is_terminated(&self) -> bool;

    fn pid(&self) -> Option<u32> {
        None
    }
}

/// Something that can start isolated workers.
pub trait WorkerEnvironment: Send + Sync {
    /// Start a worker for the slot identified by `events.token()`.
    ///
    /// The handle is returned immediately; readiness is reported later
    /// through `events`.
    fn spawn(&self, events: WorkerEvents) -> Result<Box<dyn WorkerHandle>, PoolError>;
}
