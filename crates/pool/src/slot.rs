//! A single pool position and the worker instance occupying it.

use std::time::Instant;

use serde::Serialize;
use uuid::Uuid;

use gridcalc_core::Task;

use crate::environment::WorkerHandle;

/// Identity of one worker instance: its pool position plus a generation that
/// changes every time the slot is re-created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SlotToken {
    pub index: usize,
    pub generation: u64,
}

/// Observable state of a slot.
///
/// ```text
/// Initializing ──► Ready ⇄ Busy
///      ▲             │      │
///      │             ▼      ▼
///      └── RestartScheduled ◄── Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotState {
    Initializing,
    Ready,
    Busy,
    Failed,
    RestartScheduled,
}

/// Task currently in flight on a slot.
#[derive(Debug)]
pub struct Assignment {
    pub task: Task,
    /// Correlation id of the assignment message; the worker echoes it.
    pub correlation_id: Uuid,
    pub assigned_at: Instant,
}

pub struct WorkerSlot {
    token: SlotToken,
    handle: Option<Box<dyn WorkerHandle>>,
    ready: bool,
    current: Option<Assignment>,
}

impl WorkerSlot {
    /// A slot with no worker (before the first spawn or after a failed one).
    pub fn empty(index: usize) -> Self {
        Self {
            token: SlotToken {
                index,
                generation: 0,
            },
            handle: None,
            ready: false,
            current: None,
        }
    }

    /// A freshly spawned worker: not ready, not busy.
    pub fn spawned(token: SlotToken, handle: Box<dyn WorkerHandle>) -> Self {
        Self {
            token,
            handle: Some(handle),
            ready: false,
            current: None,
        }
    }

    pub fn token(&self) -> SlotToken {
        self.token
    }

    pub fn index(&self) -> usize {
        self.token.index
    }

    pub fn has_live_handle(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_terminated())
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Busy exactly when a task is assigned.
    pub fn is_busy(&self) -> bool {
        self.current.is_some()
    }

    /// A live, ready worker with nothing in flight.
    pub fn is_available(&self) -> bool {
        self.has_live_handle() && self.ready && !self.is_busy()
    }

    pub fn mark_ready(&mut self) {
        if self.handle.is_some() {
            self.ready = true;
        }
    }

    pub fn current_task(&self) -> Option<&Task> {
        self.current.as_ref().map(|a| &a.task)
    }

    pub fn current_correlation(&self) -> Option<Uuid> {
        self.current.as_ref().map(|a| a.correlation_id)
    }

    pub fn pid(&self) -> Option<u32> {
        self.handle.as_ref().and_then(|h| h.pid())
    }

    pub(crate) fn handle_mut(&mut self) -> Option<&mut (dyn WorkerHandle + 'static)> {
        self.handle.as_deref_mut()
    }

    pub(crate) fn assign(&mut self, task: Task, correlation_id: Uuid) {
        self.current = Some(Assignment {
            task,
            correlation_id,
            assigned_at: Instant::now(),
        });
    }

    pub(crate) fn take_assignment(&mut self) -> Option<Assignment> {
        self.current.take()
    }

    /// Detach the worker handle, leaving the slot empty and not ready.
    pub(crate) fn take_handle(&mut self) -> Option<Box<dyn WorkerHandle>> {
        self.ready = false;
        self.handle.take()
    }

    pub fn state(&self, restart_pending: bool) -> SlotState {
        if restart_pending {
            SlotState::RestartScheduled
        } else if self.handle.is_none() || !self.has_live_handle() {
            SlotState::Failed
        } else if !self.ready {
            SlotState::Initializing
        } else if self.is_busy() {
            SlotState::Busy
        } else {
            SlotState::Ready
        }
    }
}

impl std::fmt::Debug for WorkerSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerSlot")
            .field("token", &self.token)
            .field("has_handle", &self.handle.is_some())
            .field("ready", &self.ready)
            .field("current", &self.current_task().map(|t| &t.id))
            .finish()
    }
}
