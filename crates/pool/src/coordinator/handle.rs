use tokio::sync::{mpsc, oneshot};

use gridcalc_core::Task;

use crate::coordinator::{BatchOutcome, Command, Input, ShutdownReport, SubmitOutcome};
use crate::error::PoolError;
use crate::status::PoolStatus;

/// Cloneable front door to a running [`Coordinator`](super::Coordinator).
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::UnboundedSender<Input>,
}

impl CoordinatorHandle {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Input>) -> Self {
        Self { tx }
    }

    /// Submit one task. Resolves once the coordinator accepted or rejected it.
    pub async fn submit(&self, task: Task) -> Result<SubmitOutcome, PoolError> {
        self.request(|reply| Command::Submit { task, reply }).await
    }

    /// Submit tasks in order; the remainder is rejected once the queue fills.
    pub async fn submit_batch(&self, tasks: Vec<Task>) -> Result<BatchOutcome, PoolError> {
        self.request(|reply| Command::SubmitBatch { tasks, reply }).await
    }

    pub async fn status(&self) -> Result<PoolStatus, PoolError> {
        self.request(|reply| Command::Status { reply }).await
    }

    /// Engage shutdown mode. The coordinator stops after replying.
    pub async fn shutdown(&self) -> Result<ShutdownReport, PoolError> {
        self.request(|reply| Command::Shutdown { reply }).await
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, PoolError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Input::Command(build(reply)))
            .map_err(|_| PoolError::CoordinatorClosed)?;
        rx.await.map_err(|_| PoolError::CoordinatorClosed)
    }
}
