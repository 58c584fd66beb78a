//! Startup recovery of work left unfinished by a previous run.

use tracing::{info, warn};

use gridcalc_core::{RecordFilter, Task};

use crate::coordinator::{BatchOutcome, CoordinatorHandle};
use crate::error::PoolError;
use crate::store::RecordStore;

/// Re-queues every record still `pending` or `processing`.
///
/// Runs once, before the change feed subscribes, so a record moving to
/// `processing` cannot be seen by both.
pub struct RecoveryScanner<'a> {
    store: &'a dyn RecordStore,
    collection: &'a str,
}

impl<'a> RecoveryScanner<'a> {
    pub fn new(store: &'a dyn RecordStore, collection: &'a str) -> Self {
        Self { store, collection }
    }

    /// Query unfinished records and submit them as one batch. Records beyond
    /// the queue's capacity are skipped (the coordinator logs how many).
    pub async fn run(&self, coordinator: &CoordinatorHandle) -> Result<BatchOutcome, PoolError> {
        let records = self
            .store
            .query(self.collection, &RecordFilter::unfinished())
            .await?;

        let mut tasks = Vec::with_capacity(records.len());
        for record in &records {
            match Task::from_record(record) {
                Ok(task) => tasks.push(task),
                Err(e) => warn!(record_id = %record.id, error = %e, "Skipping unrecoverable record"),
            }
        }

        if tasks.is_empty() {
            info!(collection = self.collection, "No unfinished records to recover");
            return Ok(BatchOutcome::default());
        }

        let outcome = coordinator.submit_batch(tasks).await?;
        if outcome.rejected > 0 {
            warn!(
                collection = self.collection,
                recovered = outcome.accepted,
                skipped = outcome.rejected,
                "Task queue full during recovery, some records were not requeued"
            );
        } else {
            info!(collection = self.collection, recovered = outcome.accepted, "Recovered unfinished records");
        }
        Ok(outcome)
    }
}
