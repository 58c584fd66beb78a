use std::collections::HashSet;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use gridcalc_core::Task;

use crate::config::PoolConfig;
use crate::coordinator::{
    BatchOutcome, Command, CoordinatorHandle, Input, RejectReason, ShutdownReport, SubmitOutcome,
    TaskOutcome,
};
use crate::environment::WorkerEnvironment;
use crate::pool::WorkerPool;
use crate::queue::TaskQueue;
use crate::status::{CoordinatorStats, PoolStatus, SlotStatus};

/// Receiving end of the coordinator inbox.
pub type Inbox = mpsc::UnboundedReceiver<Input>;

/// Owns the task queue and the worker pool and reacts to [`Input`]s.
pub struct Coordinator {
    pub(super) queue: TaskQueue,
    pub(super) pool: WorkerPool,
    pub(super) env: Arc<dyn WorkerEnvironment>,
    /// Sender side of our own inbox, handed to workers and restart timers.
    pub(super) inbox_tx: mpsc::UnboundedSender<Input>,
    /// Slot indices with a pending restart timer.
    pub(super) restart_timers: HashSet<usize>,
    pub(super) shutting_down: bool,
    pub(super) restart_delay: Duration,
    /// Where finished tasks are handed off (to the result writer).
    pub(super) outcomes: Option<mpsc::UnboundedSender<TaskOutcome>>,
    pub(super) stats: CoordinatorStats,
}

impl Coordinator {
    /// Build a coordinator and its inbox. No worker is started until
    /// [`initialize`](Self::initialize) (or [`run`](Self::run)).
    pub fn new(config: &PoolConfig, env: Arc<dyn WorkerEnvironment>) -> (Self, Inbox) {
        let (inbox_tx, inbox) = mpsc::unbounded_channel();
        let coordinator = Self {
            queue: TaskQueue::new(config.max_queue_size, config.retry_warn_threshold),
            pool: WorkerPool::new(config.resolved_size()),
            env,
            inbox_tx,
            restart_timers: HashSet::new(),
            shutting_down: false,
            restart_delay: config.restart_delay(),
            outcomes: None,
            stats: CoordinatorStats::default(),
        };
        (coordinator, inbox)
    }

    /// Forward every finished task to `tx`.
    pub fn with_outcomes(mut self, tx: mpsc::UnboundedSender<TaskOutcome>) -> Self {
        self.outcomes = Some(tx);
        self
    }

    /// A handle sharing this coordinator's inbox.
    pub fn handle(&self) -> CoordinatorHandle {
        CoordinatorHandle::new(self.inbox_tx.clone())
    }

    /// Build, initialize and run a coordinator on the current runtime.
    pub fn start(
        config: &PoolConfig,
        env: Arc<dyn WorkerEnvironment>,
        outcomes: Option<mpsc::UnboundedSender<TaskOutcome>>,
    ) -> (CoordinatorHandle, tokio::task::JoinHandle<()>) {
        let (mut coordinator, inbox) = Self::new(config, env);
        coordinator.outcomes = outcomes;
        let handle = coordinator.handle();
        let join = tokio::spawn(coordinator.run(inbox));
        (handle, join)
    }

    /// Create every slot. Slots whose spawn fails get a debounced restart.
    pub fn initialize(&mut self) {
        let size = self.pool.size();
        info!(
            pool_size = size,
            max_queue_size = self.queue.capacity(),
            restart_delay_ms = self.restart_delay.as_millis() as u64,
            "Starting worker pool"
        );
        for index in 0..size {
            if let Err(e) = self.pool.create_slot(index, self.env.as_ref(), &self.inbox_tx) {
                error!(slot = index, error = %e, "Failed to spawn worker");
                self.schedule_restart(index);
            }
        }
    }

    /// Initialize, then process inputs until shutdown.
    pub async fn run(mut self, mut inbox: Inbox) {
        self.initialize();
        while let Some(input) = inbox.recv().await {
            if self.handle_input(input).is_break() {
                break;
            }
        }
        info!(stats = ?self.stats, "Coordinator stopped");
    }

    /// Handle one input to completion.
    pub fn handle_input(&mut self, input: Input) -> ControlFlow<()> {
        match input {
            Input::Command(command) => return self.handle_command(command),
            Input::Worker { token, event } => self.handle_worker_event(token, event),
            Input::RestartDue { index } => self.on_restart_due(index),
        }
        ControlFlow::Continue(())
    }

    fn handle_command(&mut self, command: Command) -> ControlFlow<()> {
        match command {
            Command::Submit { task, reply } => {
                let _ = reply.send(self.submit(task));
            }
            Command::SubmitBatch { tasks, reply } => {
                let _ = reply.send(self.submit_batch(tasks));
            }
            Command::Status { reply } => {
                let _ = reply.send(self.status());
            }
            Command::Shutdown { reply } => {
                let _ = reply.send(self.shutdown());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    /// Queue a fresh task and dispatch.
    pub fn submit(&mut self, task: Task) -> SubmitOutcome {
        if self.shutting_down {
            self.stats.rejected += 1;
            return SubmitOutcome::rejected(RejectReason::ShuttingDown);
        }
        match self.queue.push(task) {
            Ok(()) => {
                self.stats.submitted += 1;
                self.assign_batch();
                SubmitOutcome::accepted()
            }
            Err(task) => {
                self.stats.rejected += 1;
                warn!(
                    record_id = %task.id,
                    field = %task.field_name,
                    queue_len = self.queue.len(),
                    "Task queue full, submission rejected"
                );
                SubmitOutcome::rejected(RejectReason::QueueFull)
            }
        }
    }

    /// Queue tasks in order until the queue fills, then dispatch once.
    pub fn submit_batch(&mut self, tasks: Vec<Task>) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        if self.shutting_down {
            outcome.rejected = tasks.len();
            self.stats.rejected += tasks.len() as u64;
            return outcome;
        }

        let mut tasks = tasks.into_iter();
        while let Some(task) = tasks.next() {
            if let Err(task) = self.queue.push(task) {
                let skipped = 1 + tasks.len();
                warn!(
                    first_skipped = %task.id,
                    skipped,
                    queue_len = self.queue.len(),
                    "Task queue full, skipping remaining batch"
                );
                outcome.rejected = skipped;
                break;
            }
            outcome.accepted += 1;
        }

        self.stats.submitted += outcome.accepted as u64;
        self.stats.rejected += outcome.rejected as u64;
        debug!(accepted = outcome.accepted, rejected = outcome.rejected, "Batch queued");
        self.assign_batch();
        outcome
    }

    pub fn status(&self) -> PoolStatus {
        let slots = self
            .pool
            .iter()
            .map(|slot| SlotStatus {
                index: slot.index(),
                generation: slot.token().generation,
                state: slot.state(self.restart_timers.contains(&slot.index())),
                ready: slot.is_ready(),
                busy: slot.is_busy(),
                current_record: slot.current_task().map(|t| t.id.clone()),
                pid: slot.pid(),
            })
            .collect();

        PoolStatus {
            pool_size: self.pool.size(),
            queue_length: self.queue.len(),
            queue_capacity: self.queue.capacity(),
            available_workers: self.pool.available_count(),
            shutting_down: self.shutting_down,
            slots,
            stats: self.stats,
        }
    }

    /// Engage shutdown mode: drop queued and in-flight work, stop every
    /// worker, and cancel pending restarts.
    pub fn shutdown(&mut self) -> ShutdownReport {
        self.shutting_down = true;
        let mut report = ShutdownReport {
            discarded_queued: self.queue.clear(),
            ..Default::default()
        };

        for slot in self.pool.iter_mut() {
            if slot.take_assignment().is_some() {
                report.discarded_in_flight += 1;
            }
            if let Some(mut handle) = slot.take_handle() {
                if !handle.is_terminated() {
                    if let Err(e) = handle.terminate() {
                        warn!(slot = slot.index(), error = %e, "Failed to terminate worker");
                    }
                    report.terminated_workers += 1;
                }
            }
        }
        self.restart_timers.clear();

        info!(
            discarded_queued = report.discarded_queued,
            discarded_in_flight = report.discarded_in_flight,
            terminated_workers = report.terminated_workers,
            "Worker pool shut down"
        );
        report
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn stats(&self) -> CoordinatorStats {
        self.stats
    }
}
