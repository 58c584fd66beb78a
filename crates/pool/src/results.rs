//! Writes task outcomes back to the record store.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error};

use gridcalc_core::RecordUpdate;

use crate::coordinator::TaskOutcome;
use crate::messages::TaskResult;
use crate::store::RecordStore;

pub struct ResultWriter {
    store: Arc<dyn RecordStore>,
    collection: String,
}

impl ResultWriter {
    pub fn new(store: Arc<dyn RecordStore>, collection: impl Into<String>) -> Self {
        Self {
            store,
            collection: collection.into(),
        }
    }

    /// Drain outcomes until the coordinator drops its sender.
    pub async fn run(self, mut outcomes: mpsc::UnboundedReceiver<TaskOutcome>) {
        while let Some(outcome) = outcomes.recv().await {
            self.write(outcome).await;
        }
        debug!("Result writer stopped");
    }

    /// Write one outcome. Failures are logged and not retried.
    pub async fn write(&self, outcome: TaskOutcome) {
        let update = match outcome.result {
            TaskResult::Success { computed_value } => RecordUpdate::completed(computed_value),
            TaskResult::Failure { error_message } => RecordUpdate::failed(error_message),
        };
        let status = update.status;
        match self.store.update(&self.collection, &outcome.task.id, update).await {
            Ok(()) => debug!(
                record_id = %outcome.task.id,
                %status,
                elapsed_ms = outcome.elapsed.as_millis() as u64,
                "Result written"
            ),
            Err(e) => error!(record_id = %outcome.task.id, error = %e, "Failed to write result"),
        }
    }
}
