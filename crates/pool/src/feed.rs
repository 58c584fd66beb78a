//! Turns record store change notifications into task submissions.

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use gridcalc_core::{ChangeEvent, RecordAction, RecordFilter, Task};

use crate::coordinator::{CoordinatorHandle, SubmitOutcome};
use crate::error::PoolError;
use crate::store::RecordStore;

/// Subscribes to a collection and submits a task for every record that is
/// created or updated into the `pending` status.
pub struct ChangeFeedAdapter {
    coordinator: CoordinatorHandle,
    events: mpsc::UnboundedReceiver<ChangeEvent>,
    collection: String,
}

impl ChangeFeedAdapter {
    pub async fn subscribe(
        store: &dyn RecordStore,
        collection: &str,
        coordinator: CoordinatorHandle,
    ) -> Result<Self, PoolError> {
        let events = store.subscribe(collection, RecordFilter::any()).await?;
        info!(collection, "Subscribed to record changes");
        Ok(Self {
            coordinator,
            events,
            collection: collection.to_string(),
        })
    }

    /// Process notifications until the store drops the subscription or the
    /// coordinator stops.
    pub async fn run(mut self) {
        while let Some(event) = self.events.recv().await {
            match self.handle_event(event).await {
                Ok(_) => {}
                Err(PoolError::CoordinatorClosed) => {
                    debug!(collection = %self.collection, "Coordinator stopped, leaving change feed");
                    return;
                }
                Err(e) => warn!(collection = %self.collection, error = %e, "Change event not submitted"),
            }
        }
        debug!(collection = %self.collection, "Change feed closed");
    }

    /// Submit a task for `event` if it calls for one. Returns `None` for
    /// ignored events.
    pub async fn handle_event(&self, event: ChangeEvent) -> Result<Option<SubmitOutcome>, PoolError> {
        if !matches!(event.action, RecordAction::Create | RecordAction::Update) {
            return Ok(None);
        }
        if !event.record.status.is_ready_to_compute() {
            return Ok(None);
        }

        let task = Task::from_record(&event.record)?;
        let record_id = task.id.clone();
        let outcome = self.coordinator.submit(task).await?;
        if !outcome.accepted {
            warn!(
                record_id = %record_id,
                reason = ?outcome.reason,
                "Change not queued, no task created"
            );
        }
        Ok(Some(outcome))
    }
}
