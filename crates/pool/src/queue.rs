//! Bounded task queue with front reinsertion for retries.

use std::collections::VecDeque;

use tracing::warn;

use gridcalc_core::Task;

/// Bounded FIFO of pending tasks.
///
/// Fresh submissions go to the tail and are rejected once the queue holds
/// `capacity` tasks. Requeued tasks go to the head and bypass the capacity
/// check, since they were admitted once already.
#[derive(Debug)]
pub struct TaskQueue {
    tasks: VecDeque<Task>,
    capacity: usize,
    retry_warn_threshold: u32,
}

impl TaskQueue {
    pub fn new(capacity: usize, retry_warn_threshold: u32) -> Self {
        Self {
            tasks: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            retry_warn_threshold,
        }
    }

    /// Append a fresh task. When the queue is full the task is handed back
    /// untouched and the queue is not modified.
    pub fn push(&mut self, task: Task) -> Result<(), Task> {
        if self.tasks.len() >= self.capacity {
            return Err(task);
        }
        self.tasks.push_back(task);
        Ok(())
    }

    /// Reinsert a task at the head after a crash-class failure.
    ///
    /// Always succeeds. Past the retry threshold a warning is logged but the
    /// task is kept.
    pub fn requeue(&mut self, mut task: Task, reason: &str) {
        task.mark_requeued();
        if task.retry_count > self.retry_warn_threshold {
            warn!(
                record_id = %task.id,
                field = %task.field_name,
                retry_count = task.retry_count,
                reason,
                "task keeps failing, still retrying"
            );
        }
        self.tasks.push_front(task);
    }

    pub fn pop(&mut self) -> Option<Task> {
        self.tasks.pop_front()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.tasks.len() >= self.capacity
    }

    /// Peek at queued tasks, head first.
    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }

    /// Drop every queued task, returning how many were discarded.
    pub fn clear(&mut self) -> usize {
        let n = self.tasks.len();
        self.tasks.clear();
        n
    }
}
