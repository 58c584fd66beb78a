//! Payloads carried by [`Message`](crate::Message) envelopes on the worker channel.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use gridcalc_core::Task;

/// Startup handshake sent by a worker once it can accept tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerReady {
    /// Slot index the worker was started for.
    pub slot: usize,
    /// OS process id, when the worker runs as a separate process.
    #[serde(default)]
    pub pid: Option<u32>,
}

/// A task as sent to a worker.
///
/// The envelope's correlation id identifies this assignment; the worker
/// echoes it on the matching [`TaskReport`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskAssignment {
    pub record_id: String,
    pub field_name: String,
    pub payload: Value,
    /// Zero for the first attempt, incremented on every requeue.
    pub attempt: u32,
}

impl TaskAssignment {
    pub fn for_task(task: &Task) -> Self {
        Self {
            record_id: task.id.clone(),
            field_name: task.field_name.clone(),
            payload: task.payload.clone(),
            attempt: task.retry_count,
        }
    }
}

/// Application-level outcome of evaluating a task.
///
/// A `Failure` is terminal for the task: the worker received and handled it.
/// Only process-level crashes are retried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TaskResult {
    Success { computed_value: Value },
    Failure { error_message: String },
}

impl TaskResult {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskResult::Success { .. })
    }
}

/// Worker -> host report for one assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskReport {
    pub record_id: String,
    pub field_name: String,
    pub result: TaskResult,
    /// Wall-clock evaluation time in milliseconds.
    #[serde(default)]
    pub duration_ms: u64,
}
