//! Read-only status snapshot of the pool.

use std::fmt;

use serde::Serialize;

use crate::slot::SlotState;

/// Running totals kept by the coordinator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CoordinatorStats {
    /// Fresh tasks accepted into the queue.
    pub submitted: u64,
    /// Fresh tasks rejected (queue full or shutting down).
    pub rejected: u64,
    /// Tasks the workers reported as computed.
    pub completed: u64,
    /// Tasks the workers reported as failed (terminal).
    pub failed: u64,
    /// Tasks put back at the head of the queue after a crash-class failure.
    pub requeued: u64,
    /// Slot re-creations after a failure.
    pub restarts: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotStatus {
    pub index: usize,
    pub generation: u64,
    pub state: SlotState,
    pub ready: bool,
    pub busy: bool,
    /// Record id of the in-flight task.
    pub current_record: Option<String>,
    pub pid: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    pub pool_size: usize,
    pub queue_length: usize,
    pub queue_capacity: usize,
    pub available_workers: usize,
    pub shutting_down: bool,
    pub slots: Vec<SlotStatus>,
    pub stats: CoordinatorStats,
}

impl PoolStatus {
    pub fn busy_workers(&self) -> usize {
        self.slots.iter().filter(|s| s.busy).count()
    }
}

impl fmt::Display for PoolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PoolStatus {{ workers: {}/{} available, busy: {}, queue: {}/{}, completed: {}, failed: {}, requeued: {}, restarts: {} }}",
            self.available_workers,
            self.pool_size,
            self.busy_workers(),
            self.queue_length,
            self.queue_capacity,
            self.stats.completed,
            self.stats.failed,
            self.stats.requeued,
            self.stats.restarts,
        )
    }
}
