//! Fixed-size arena of worker slots.

use tokio::sync::mpsc;
use tracing::info;

use crate::coordinator::Input;
use crate::environment::{WorkerEnvironment, WorkerEvents};
use crate::error::PoolError;
use crate::slot::{SlotToken, WorkerSlot};

/// Fixed-size collection of [`WorkerSlot`]s.
///
/// The size is set once. Failed slots are replaced in place by index, never
/// removed, so slot indices stay stable for the life of the pool.
#[derive(Debug)]
pub struct WorkerPool {
    slots: Vec<WorkerSlot>,
    next_generation: u64,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        Self {
            slots: (0..size).map(WorkerSlot::empty).collect(),
            next_generation: 1,
        }
    }

    pub fn size(&self) -> usize {
        self.slots.len()
    }

    /// Spawn a new worker for `index` and put it in place of whatever the
    /// slot held. On spawn failure the slot is left empty.
    pub fn create_slot(
        &mut self,
        index: usize,
        env: &dyn WorkerEnvironment,
        inbox: &mpsc::UnboundedSender<Input>,
    ) -> Result<SlotToken, PoolError> {
        if index >= self.slots.len() {
            return Err(PoolError::Spawn(format!(
                "slot {index} is outside a pool of {}",
                self.slots.len()
            )));
        }

        let token = SlotToken {
            index,
            generation: self.next_generation,
        };
        self.next_generation += 1;

        match env.spawn(WorkerEvents::new(token, inbox.clone())) {
            Ok(handle) => {
                self.slots[index] = WorkerSlot::spawned(token, handle);
                info!(slot = index, generation = token.generation, "worker slot created");
                Ok(token)
            }
            Err(e) => {
                self.slots[index] = WorkerSlot::empty(index);
                Err(e)
            }
        }
    }

    pub fn slot(&self, index: usize) -> Option<&WorkerSlot> {
        self.slots.get(index)
    }

    pub fn slot_mut(&mut self, index: usize) -> Option<&mut WorkerSlot> {
        self.slots.get_mut(index)
    }

    /// The slot currently occupied by the instance `token`, if it has not
    /// been replaced since.
    pub fn slot_for(&mut self, token: SlotToken) -> Option<&mut WorkerSlot> {
        self.slots
            .get_mut(token.index)
            .filter(|slot| slot.token() == token)
    }

    /// Indices of available slots, in array order.
    pub fn available_indices(&self) -> Vec<usize> {
        self.slots
            .iter()
            .filter(|slot| slot.is_available())
            .map(WorkerSlot::index)
            .collect()
    }

    pub fn available_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_available()).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &WorkerSlot> {
        self.slots.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut WorkerSlot> {
        self.slots.iter_mut()
    }
}
