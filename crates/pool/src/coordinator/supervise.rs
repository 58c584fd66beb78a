use std::time::Duration;

use tracing::{debug, error, info, warn};

use gridcalc_core::Task;

use crate::coordinator::{Coordinator, Input, TaskOutcome};
use crate::environment::WorkerEvent;
use crate::message::Message;
use crate::messages::{TaskReport, TaskResult, topics};
use crate::slot::SlotToken;

impl Coordinator {
    pub(super) fn handle_worker_event(&mut self, token: SlotToken, event: WorkerEvent) {
        let current = self.pool.slot(token.index).map(|slot| slot.token());
        if current != Some(token) {
            debug!(
                slot = token.index,
                generation = token.generation,
                ?event,
                "Ignoring event from a replaced worker"
            );
            return;
        }

        match event {
            WorkerEvent::Ready(ready) => {
                if let Some(slot) = self.pool.slot_mut(token.index) {
                    slot.mark_ready();
                }
                info!(
                    slot = token.index,
                    generation = token.generation,
                    pid = ?ready.pid,
                    "Worker ready"
                );
                self.assign_batch();
            }
            WorkerEvent::Message(message) => {
                self.on_worker_message(token.index, message);
            }
            WorkerEvent::Error(reason) => {
                self.handle_failure(token.index, &reason);
                self.assign_batch();
            }
            WorkerEvent::Exit(code) => {
                let reason = match code {
                    Some(code) => format!("worker exited with code {code}"),
                    None => "worker killed by signal".to_string(),
                };
                self.handle_failure(token.index, &reason);
                self.assign_batch();
            }
        }
    }

    fn on_worker_message(&mut self, index: usize, message: Message) {
        if message.topic != topics::TASK_RESULT {
            warn!(slot = index, topic = %message.topic, "Unexpected message from worker");
            return;
        }
        let report: TaskReport = match message.decode() {
            Ok(report) => report,
            Err(e) => {
                self.handle_failure(index, &format!("undecodable task report: {e}"));
                self.assign_batch();
                return;
            }
        };

        let Some(slot) = self.pool.slot_mut(index) else {
            return;
        };
        if slot.current_correlation() != Some(message.correlation_id) {
            warn!(
                slot = index,
                record_id = %report.record_id,
                correlation_id = %message.correlation_id,
                "Report does not match the slot's current task, ignoring"
            );
            return;
        }
        let Some(assignment) = slot.take_assignment() else {
            return;
        };

        self.emit_outcome(
            assignment.task,
            report.result,
            index,
            assignment.assigned_at.elapsed(),
        );
        self.assign_batch();
    }

    /// Hand a finished task to the outcome channel. The task leaves the
    /// coordinator here.
    pub(super) fn emit_outcome(&mut self, task: Task, result: TaskResult, slot: usize, elapsed: Duration) {
        match &result {
            TaskResult::Success { .. } => {
                self.stats.completed += 1;
                debug!(slot, record_id = %task.id, elapsed_ms = elapsed.as_millis() as u64, "Task completed");
            }
            TaskResult::Failure { error_message } => {
                self.stats.failed += 1;
                info!(slot, record_id = %task.id, error = %error_message, "Task failed");
            }
        }

        if let Some(tx) = &self.outcomes {
            let outcome = TaskOutcome {
                task,
                result,
                slot,
                elapsed,
            };
            if tx.send(outcome).is_err() {
                debug!(slot, "Outcome receiver dropped");
            }
        }
    }

    /// Crash-class failure of the worker in `index`.
    ///
    /// The in-flight task goes back to the head of the queue, the worker is
    /// stopped, and a debounced restart is scheduled. In shutdown mode the
    /// slot is only emptied and its task dropped.
    pub(super) fn handle_failure(&mut self, index: usize, reason: &str) {
        let Some(slot) = self.pool.slot_mut(index) else {
            return;
        };
        let orphan = slot.take_assignment();
        let handle = slot.take_handle();
        let generation = slot.token().generation;

        let had_worker = handle.is_some();
        if let Some(mut handle) = handle {
            if !handle.is_terminated() {
                if let Err(e) = handle.terminate() {
                    error!(slot = index, error = %e, "Failed to terminate worker");
                }
            }
        }

        if self.shutting_down {
            if let Some(assignment) = orphan {
                debug!(slot = index, record_id = %assignment.task.id, "Dropping in-flight task during shutdown");
            }
            return;
        }

        match orphan {
            Some(assignment) => {
                warn!(
                    slot = index,
                    generation,
                    record_id = %assignment.task.id,
                    retry_count = assignment.task.retry_count + 1,
                    reason,
                    "Worker failed, requeueing its task"
                );
                self.requeue(assignment.task, reason);
            }
            None if had_worker => {
                warn!(slot = index, generation, reason, "Worker failed");
            }
            None => {
                debug!(slot = index, generation, reason, "Failure on an already failed slot");
            }
        }

        self.schedule_restart(index);
    }

    /// Arm the restart timer for `index` unless one is already pending.
    pub(super) fn schedule_restart(&mut self, index: usize) {
        if self.shutting_down {
            return;
        }
        if !self.restart_timers.insert(index) {
            debug!(slot = index, "Restart already scheduled");
            return;
        }

        let delay = self.restart_delay;
        let tx = self.inbox_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Input::RestartDue { index });
        });
        debug!(slot = index, delay_ms = delay.as_millis() as u64, "Restart scheduled");
    }

    pub(super) fn on_restart_due(&mut self, index: usize) {
        if !self.restart_timers.remove(&index) || self.shutting_down {
            return;
        }

        self.stats.restarts += 1;
        match self.pool.create_slot(index, self.env.as_ref(), &self.inbox_tx) {
            Ok(token) => {
                info!(slot = index, generation = token.generation, "Worker restarted");
            }
            Err(e) => {
                error!(slot = index, error = %e, "Failed to restart worker");
                self.schedule_restart(index);
            }
        }
        self.assign_batch();
    }
}
