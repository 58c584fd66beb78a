//! Single-owner coordinator: task queue, worker pool, dispatch and supervision.
//!
//! Split into focused submodules:
//! - `core`: the [`Coordinator`] actor, its inbox, and command handling
//! - `dispatch`: pairing available slots with queued tasks
//! - `supervise`: worker lifecycle events, crash recovery, debounced restarts
//! - `handle`: [`CoordinatorHandle`], the cloneable front door
//!
//! All pool and queue state lives inside the actor. Every [`Input`] is handled
//! to completion before the next one is taken, so no locks are needed.

mod core;
mod dispatch;
mod handle;
mod supervise;
#[cfg(test)]
mod tests;

use std::time::Duration;

use serde::Serialize;
use tokio::sync::oneshot;

use gridcalc_core::Task;

use crate::environment::WorkerEvent;
use crate::messages::TaskResult;
use crate::slot::SlotToken;
use crate::status::PoolStatus;

pub use self::core::{Coordinator, Inbox};
pub use self::handle::CoordinatorHandle;

/// Everything the coordinator reacts to.
#[derive(Debug)]
pub enum Input {
    Command(Command),
    Worker { token: SlotToken, event: WorkerEvent },
    /// The restart debounce for a slot elapsed.
    RestartDue { index: usize },
}

/// Requests sent by [`CoordinatorHandle`].
#[derive(Debug)]
pub enum Command {
    Submit {
        task: Task,
        reply: oneshot::Sender<SubmitOutcome>,
    },
    SubmitBatch {
        tasks: Vec<Task>,
        reply: oneshot::Sender<BatchOutcome>,
    },
    Status {
        reply: oneshot::Sender<PoolStatus>,
    },
    Shutdown {
        reply: oneshot::Sender<ShutdownReport>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    QueueFull,
    ShuttingDown,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::QueueFull => write!(f, "queue full"),
            RejectReason::ShuttingDown => write!(f, "shutting down"),
        }
    }
}

/// Reply to a single submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SubmitOutcome {
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<RejectReason>,
}

impl SubmitOutcome {
    pub fn accepted() -> Self {
        Self {
            accepted: true,
            reason: None,
        }
    }

    pub fn rejected(reason: RejectReason) -> Self {
        Self {
            accepted: false,
            reason: Some(reason),
        }
    }
}

/// Reply to a bulk submission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    pub accepted: usize,
    pub rejected: usize,
}

/// What was thrown away when shutdown mode was engaged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    pub discarded_queued: usize,
    pub discarded_in_flight: usize,
    pub terminated_workers: usize,
}

/// A task the workers finished with, success or application-level failure.
#[derive(Debug)]
pub struct TaskOutcome {
    pub task: Task,
    pub result: TaskResult,
    pub slot: usize,
    /// Time from assignment to report, as seen by the coordinator.
    pub elapsed: Duration,
}
