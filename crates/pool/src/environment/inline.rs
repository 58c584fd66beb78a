use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use crate::error::PoolError;
use crate::evaluate::evaluate;
use crate::message::Message;
use crate::messages::{topics, TaskAssignment, TaskReport, TaskResult, WorkerReady};

use super::{WorkerEnvironment, WorkerEvent, WorkerEvents, WorkerHandle};

/// Evaluation function run by inline workers.
pub type Evaluator = Arc<dyn Fn(&TaskAssignment) -> TaskResult + Send + Sync>;

/// Runs every worker as a tokio task inside the host process.
///
/// Evaluation happens on the blocking thread pool. Workers follow the same
/// protocol as worker processes (ready handshake, one report per assignment,
/// exit event on termination), so the coordinator cannot tell them apart.
#[derive(Clone)]
pub struct InlineEnvironment {
    evaluator: Evaluator,
}

impl InlineEnvironment {
    pub fn new(evaluator: Evaluator) -> Self {
        Self { evaluator }
    }

    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&TaskAssignment) -> TaskResult + Send + Sync + 'static,
    {
        Self::new(Arc::new(f))
    }
}

impl Default for InlineEnvironment {
    fn default() -> Self {
        Self::from_fn(|assignment| evaluate(&assignment.field_name, &assignment.payload))
    }
}

impl WorkerEnvironment for InlineEnvironment {
    fn spawn(&self, events: WorkerEvents) -> Result<Box<dyn WorkerHandle>, PoolError> {
        let (message_tx, message_rx) = mpsc::unbounded_channel();
        let (kill_tx, kill_rx) = oneshot::channel();
        let terminated = Arc::new(AtomicBool::new(false));

        tokio::spawn(run_inline_worker(
            Arc::clone(&self.evaluator),
            message_rx,
            kill_rx,
            Arc::clone(&terminated),
            events,
        ));

        Ok(Box::new(InlineHandle {
            messages: message_tx,
            kill: Some(kill_tx),
            terminated,
        }))
    }
}

struct InlineHandle {
    messages: mpsc::UnboundedSender<Message>,
    kill: Option<oneshot::Sender<()>>,
    terminated: Arc<AtomicBool>,
}

impl WorkerHandle for InlineHandle {
    fn send(&mut self, message: Message) -> Result<(), PoolError> {
        if self.is_terminated() {
            return Err(PoolError::Send("inline worker has stopped".into()));
        }
        self.messages
            .send(message)
            .map_err(|_| PoolError::Send("inline worker has stopped".into()))
    }

    fn terminate(&mut self) -> Result<(), PoolError> {
        if let Some(kill) = self.kill.take() {
            let _ = kill.send(());
        }
        Ok(())
    }

    fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }
}

async fn run_inline_worker(
    evaluator: Evaluator,
    mut messages: mpsc::UnboundedReceiver<Message>,
    mut kill: oneshot::Receiver<()>,
    terminated: Arc<AtomicBool>,
    events: WorkerEvents,
) {
    let slot = events.token().index;
    events.emit(WorkerEvent::Ready(WorkerReady { slot, pid: None }));

    let exit_code = loop {
        let message = tokio::select! {
            _ = &mut kill => break None,
            message = messages.recv() => match message {
                Some(message) => message,
                None => break Some(0),
            },
        };

        let assignment: TaskAssignment = match message.decode_topic(topics::TASK_ASSIGN) {
            Ok(assignment) => assignment,
            Err(e) => {
                events.emit(WorkerEvent::Error(format!("undecodable assignment: {e}")));
                break Some(1);
            }
        };

        let started = Instant::now();
        let eval = Arc::clone(&evaluator);
        let job = assignment.clone();
        let result = match tokio::task::spawn_blocking(move || eval(&job)).await {
            Ok(result) => result,
            Err(e) => {
                // A panicking evaluator takes the worker down, like a crashed process.
                warn!(slot, error = %e, "inline evaluator panicked");
                events.emit(WorkerEvent::Error(format!("evaluator panicked: {e}")));
                break Some(101);
            }
        };

        let report = TaskReport {
            record_id: assignment.record_id,
            field_name: assignment.field_name,
            result,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        match Message::with_correlation(topics::TASK_RESULT, &report, message.correlation_id) {
            Ok(reply) => {
                events.emit(WorkerEvent::Message(reply));
            }
            Err(e) => {
                events.emit(WorkerEvent::Error(format!("failed to encode report: {e}")));
                break Some(1);
            }
        }
    };

    terminated.store(true, Ordering::SeqCst);
    events.emit(WorkerEvent::Exit(exit_code));
}
