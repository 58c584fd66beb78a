use std::time::Duration;

use tracing::{debug, warn};

use gridcalc_core::Task;

use crate::coordinator::Coordinator;
use crate::error::PoolError;
use crate::message::Message;
use crate::messages::{TaskAssignment, TaskResult, topics};

impl Coordinator {
    /// Pair queue-head tasks with available slots, in slot order, in one pass.
    ///
    /// Called after every change that could create work: a submission, a
    /// slot becoming ready, a slot finishing a task, a slot restart.
    pub(super) fn assign_batch(&mut self) {
        if self.queue.is_empty() || self.shutting_down {
            return;
        }
        let available = self.pool.available_indices();
        if available.is_empty() {
            debug!(queue_len = self.queue.len(), "No worker available, tasks stay queued");
            return;
        }

        let k = available.len().min(self.queue.len());
        debug!(assigning = k, queue_len = self.queue.len(), "Dispatching batch");
        for index in available.into_iter().take(k) {
            // A send failure earlier in this pass only affects its own slot,
            // but re-check anyway so a stale index is never used.
            if !self.pool.slot(index).is_some_and(|s| s.is_available()) {
                continue;
            }
            let Some(task) = self.queue.pop() else {
                break;
            };
            self.assign_task_to_slot(index, task);
        }
    }

    /// Mark the slot busy with `task` and send it to the worker.
    ///
    /// A failed send puts the task back at the queue head and treats the slot
    /// as crashed. It does not re-enter dispatch; the current pass carries on.
    pub(super) fn assign_task_to_slot(&mut self, index: usize, task: Task) {
        let message = match Message::new(topics::TASK_ASSIGN, &TaskAssignment::for_task(&task)) {
            Ok(message) => message,
            Err(e) => {
                warn!(slot = index, record_id = %task.id, error = %e, "Failed to encode task");
                let result = TaskResult::Failure {
                    error_message: format!("task could not be encoded: {e}"),
                };
                self.emit_outcome(task, result, index, Duration::ZERO);
                return;
            }
        };
        let correlation_id = message.correlation_id;

        let Some(slot) = self.pool.slot_mut(index) else {
            self.requeue(task, "slot missing");
            return;
        };
        debug!(
            slot = index,
            generation = slot.token().generation,
            record_id = %task.id,
            retry_count = task.retry_count,
            "Assigning task"
        );
        slot.assign(task, correlation_id);

        let sent = match slot.handle_mut() {
            Some(handle) => handle.send(message),
            None => Err(PoolError::Send("slot has no worker".into())),
        };
        let error = match sent {
            Ok(()) => return,
            Err(e) => e,
        };
        let reverted = slot.take_assignment();

        warn!(slot = index, error = %error, "Send to worker failed");
        if let Some(assignment) = reverted {
            self.requeue(assignment.task, "send failure");
        }
        self.handle_failure(index, "send failure");
    }

    pub(super) fn requeue(&mut self, task: Task, reason: &str) {
        self.stats.requeued += 1;
        self.queue.requeue(task, reason);
    }
}
