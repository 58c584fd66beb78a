use std::collections::HashSet;
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use gridcalc_core::Task;

use super::*;
use crate::config::PoolConfig;
use crate::environment::{WorkerEnvironment, WorkerEvent, WorkerEvents, WorkerHandle};
use crate::error::PoolError;
use crate::message::Message;
use crate::messages::{TaskAssignment, TaskReport, TaskResult, WorkerReady, topics};
use crate::slot::SlotState;

const DELAY: Duration = Duration::from_millis(1000);

// ── Scripted environment ────────────────────────────────────────────

#[derive(Default)]
struct FakeState {
    /// Event sinks of every spawned instance, in spawn order.
    spawned: Vec<WorkerEvents>,
    sent: Vec<(SlotToken, Message)>,
    terminated: Vec<SlotToken>,
    spawn_failures: usize,
    broken_send: HashSet<usize>,
}

#[derive(Clone, Default)]
struct FakeEnv(Arc<Mutex<FakeState>>);

struct FakeHandle {
    token: SlotToken,
    state: Arc<Mutex<FakeState>>,
    terminated: bool,
}

impl WorkerEnvironment for FakeEnv {
    fn spawn(&self, events: WorkerEvents) -> Result<Box<dyn WorkerHandle>, PoolError> {
        let mut state = self.0.lock().unwrap();
        if state.spawn_failures > 0 {
            state.spawn_failures -= 1;
            return Err(PoolError::Spawn("scripted spawn failure".into()));
        }
        let token = events.token();
        state.spawned.push(events);
        Ok(Box::new(FakeHandle {
            token,
            state: Arc::clone(&self.0),
            terminated: false,
        }))
    }
}

impl WorkerHandle for FakeHandle {
    fn send(&mut self, message: Message) -> Result<(), PoolError> {
        let mut state = self.state.lock().unwrap();
        if self.terminated || state.broken_send.contains(&self.token.index) {
            return Err(PoolError::Send("broken pipe".into()));
        }
        state.sent.push((self.token, message));
        Ok(())
    }

    fn terminate(&mut self) -> Result<(), PoolError> {
        self.terminated = true;
        self.state.lock().unwrap().terminated.push(self.token);
        Ok(())
    }

    fn is_terminated(&self) -> bool {
        self.terminated
    }
}

impl FakeEnv {
    fn spawn_count(&self) -> usize {
        self.0.lock().unwrap().spawned.len()
    }

    fn fail_next_spawns(&self, n: usize) {
        self.0.lock().unwrap().spawn_failures = n;
    }

    fn break_send(&self, index: usize) {
        self.0.lock().unwrap().broken_send.insert(index);
    }

    /// Event sink of the most recent instance spawned for `index`.
    fn latest(&self, index: usize) -> WorkerEvents {
        self.0
            .lock()
            .unwrap()
            .spawned
            .iter()
            .rev()
            .find(|e| e.token().index == index)
            .cloned()
            .expect("slot was never spawned")
    }

    fn ready(&self, index: usize) {
        self.latest(index)
            .emit(WorkerEvent::Ready(WorkerReady { slot: index, pid: None }));
    }

    fn crash(&self, index: usize) {
        self.latest(index).emit(WorkerEvent::Exit(Some(1)));
    }

    fn sent_count(&self) -> usize {
        self.0.lock().unwrap().sent.len()
    }

    fn last_sent(&self, index: usize) -> Message {
        self.0
            .lock()
            .unwrap()
            .sent
            .iter()
            .rev()
            .find(|(token, _)| token.index == index)
            .map(|(_, m)| m.clone())
            .expect("nothing sent to slot")
    }

    fn last_assignment(&self, index: usize) -> TaskAssignment {
        self.last_sent(index).decode_topic(topics::TASK_ASSIGN).unwrap()
    }

    /// Have the worker in `index` answer its last assignment.
    fn report(&self, index: usize, result: TaskResult) {
        let sent = self.last_sent(index);
        let assignment: TaskAssignment = sent.decode().unwrap();
        let report = TaskReport {
            record_id: assignment.record_id,
            field_name: assignment.field_name,
            result,
            duration_ms: 1,
        };
        let reply = Message::with_correlation(topics::TASK_RESULT, &report, sent.correlation_id).unwrap();
        self.latest(index).emit(WorkerEvent::Message(reply));
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn config(size: usize, max_queue_size: usize) -> PoolConfig {
    PoolConfig {
        size,
        max_queue_size,
        restart_delay_ms: DELAY.as_millis() as u64,
        retry_warn_threshold: 5,
    }
}

fn setup(size: usize, max_queue_size: usize) -> (Coordinator, Inbox, FakeEnv) {
    let env = FakeEnv::default();
    let (mut coordinator, inbox) = Coordinator::new(&config(size, max_queue_size), Arc::new(env.clone()));
    coordinator.initialize();
    (coordinator, inbox, env)
}

/// Handle every input currently in the inbox.
fn pump(coordinator: &mut Coordinator, inbox: &mut Inbox) {
    while let Ok(input) = inbox.try_recv() {
        let _ = coordinator.handle_input(input);
    }
}

fn task(id: &str) -> Task {
    Task::new(id, "value", json!(id))
}

fn queued(coordinator: &Coordinator) -> Vec<(String, u32)> {
    coordinator
        .queue()
        .iter()
        .map(|t| (t.id.clone(), t.retry_count))
        .collect()
}

fn in_flight(coordinator: &Coordinator, index: usize) -> Option<String> {
    coordinator
        .pool()
        .slot(index)
        .and_then(|s| s.current_task())
        .map(|t| t.id.clone())
}

/// No task id is held by both the queue and a slot, or by two slots.
fn assert_exclusive(coordinator: &Coordinator) {
    let mut seen = HashSet::new();
    let ids = coordinator
        .queue()
        .iter()
        .map(|t| t.id.clone())
        .chain(coordinator.pool().iter().filter_map(|s| s.current_task().map(|t| t.id.clone())));
    for id in ids {
        assert!(seen.insert(id.clone()), "task {id} is owned twice");
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn initialize_creates_every_slot_not_ready() {
    let (coordinator, _inbox, env) = setup(3, 10);
    assert_eq!(env.spawn_count(), 3);

    let status = coordinator.status();
    assert_eq!(status.pool_size, 3);
    assert_eq!(status.available_workers, 0);
    assert!(status.slots.iter().all(|s| s.state == SlotState::Initializing));
    assert!(status.slots.iter().all(|s| !s.ready && !s.busy));
}

#[tokio::test]
async fn ready_event_makes_slot_available() {
    let (mut coordinator, mut inbox, env) = setup(2, 10);
    env.ready(1);
    pump(&mut coordinator, &mut inbox);

    assert_eq!(coordinator.pool().available_indices(), vec![1]);
    assert_eq!(coordinator.status().slots[1].state, SlotState::Ready);
}

#[tokio::test]
async fn submission_past_capacity_is_rejected_and_queue_unchanged() {
    let (mut coordinator, _inbox, _env) = setup(1, 2);

    assert!(coordinator.submit(task("a")).accepted);
    assert!(coordinator.submit(task("b")).accepted);
    let outcome = coordinator.submit(task("c"));
    assert_eq!(outcome, SubmitOutcome::rejected(RejectReason::QueueFull));

    assert_eq!(queued(&coordinator), vec![("a".to_string(), 0), ("b".to_string(), 0)]);
    assert_eq!(coordinator.stats().rejected, 1);
}

#[tokio::test]
async fn queue_then_assign_then_crash_scenario() {
    let (mut coordinator, mut inbox, env) = setup(1, 2);

    assert!(coordinator.submit(task("A")).accepted);
    assert!(coordinator.submit(task("B")).accepted);
    assert!(!coordinator.submit(task("C")).accepted);
    assert_eq!(queued(&coordinator), vec![("A".to_string(), 0), ("B".to_string(), 0)]);

    // One slot becomes available: A is assigned, B stays queued.
    env.ready(0);
    pump(&mut coordinator, &mut inbox);
    assert_eq!(in_flight(&coordinator, 0).as_deref(), Some("A"));
    assert_eq!(queued(&coordinator), vec![("B".to_string(), 0)]);
    assert_exclusive(&coordinator);

    // The slot crashes before completing: A goes back to the head.
    env.crash(0);
    pump(&mut coordinator, &mut inbox);
    assert_eq!(queued(&coordinator), vec![("A".to_string(), 1), ("B".to_string(), 0)]);
    assert_eq!(in_flight(&coordinator, 0), None);
    assert_exclusive(&coordinator);
}

#[tokio::test]
async fn single_pass_assigns_all_tasks_when_enough_slots() {
    let (mut coordinator, mut inbox, env) = setup(3, 10);
    for i in 0..3 {
        env.ready(i);
    }
    pump(&mut coordinator, &mut inbox);

    let outcome = coordinator.submit_batch(vec![task("a"), task("b")]);
    assert_eq!(outcome, BatchOutcome { accepted: 2, rejected: 0 });

    assert!(coordinator.queue().is_empty());
    assert_eq!(env.sent_count(), 2);
    assert_eq!(in_flight(&coordinator, 0).as_deref(), Some("a"));
    assert_eq!(in_flight(&coordinator, 1).as_deref(), Some("b"));
    assert_eq!(in_flight(&coordinator, 2), None);
    assert_exclusive(&coordinator);
}

#[tokio::test]
async fn batch_fills_every_slot_and_keeps_the_rest_queued() {
    let (mut coordinator, mut inbox, env) = setup(3, 10);
    let tasks = (0..5).map(|i| task(&format!("t{i}"))).collect();
    coordinator.submit_batch(tasks);
    assert_eq!(coordinator.queue().len(), 5);

    for i in 0..3 {
        env.ready(i);
    }
    pump(&mut coordinator, &mut inbox);

    assert_eq!(env.sent_count(), 3);
    assert_eq!(queued(&coordinator), vec![("t3".to_string(), 0), ("t4".to_string(), 0)]);
    assert_eq!(coordinator.status().available_workers, 0);
    assert_exclusive(&coordinator);
}

#[tokio::test]
async fn batch_stops_at_capacity() {
    let (mut coordinator, _inbox, _env) = setup(1, 3);
    let tasks = (0..5).map(|i| task(&format!("t{i}"))).collect();

    let outcome = coordinator.submit_batch(tasks);
    assert_eq!(outcome, BatchOutcome { accepted: 3, rejected: 2 });
    assert_eq!(coordinator.queue().len(), 3);
    assert_eq!(coordinator.stats().submitted, 3);
    assert_eq!(coordinator.stats().rejected, 2);
}

#[tokio::test]
async fn completion_frees_slot_and_dispatches_next() {
    let (tx, mut outcomes) = mpsc::unbounded_channel();
    let env = FakeEnv::default();
    let (coordinator, mut inbox) = Coordinator::new(&config(1, 10), Arc::new(env.clone()));
    let mut coordinator = coordinator.with_outcomes(tx);
    coordinator.initialize();

    coordinator.submit_batch(vec![task("a"), task("b")]);
    env.ready(0);
    pump(&mut coordinator, &mut inbox);
    assert_eq!(in_flight(&coordinator, 0).as_deref(), Some("a"));

    env.report(0, TaskResult::Success { computed_value: json!(1) });
    pump(&mut coordinator, &mut inbox);

    let outcome = outcomes.try_recv().unwrap();
    assert_eq!(outcome.task.id, "a");
    assert_eq!(outcome.slot, 0);
    assert!(outcome.result.is_success());

    assert_eq!(in_flight(&coordinator, 0).as_deref(), Some("b"));
    assert!(coordinator.queue().is_empty());
    assert_eq!(coordinator.stats().completed, 1);
}

#[tokio::test]
async fn application_failure_is_not_retried() {
    let (tx, mut outcomes) = mpsc::unbounded_channel();
    let env = FakeEnv::default();
    let (coordinator, mut inbox) = Coordinator::new(&config(1, 10), Arc::new(env.clone()));
    let mut coordinator = coordinator.with_outcomes(tx);
    coordinator.initialize();

    env.ready(0);
    pump(&mut coordinator, &mut inbox);
    coordinator.submit(task("bad"));

    env.report(0, TaskResult::Failure { error_message: "division by zero".into() });
    pump(&mut coordinator, &mut inbox);

    let outcome = outcomes.try_recv().unwrap();
    assert_eq!(outcome.task.id, "bad");
    assert!(!outcome.result.is_success());
    assert!(coordinator.queue().is_empty());
    assert_eq!(coordinator.stats().failed, 1);
    assert_eq!(coordinator.stats().requeued, 0);
    // The worker is healthy and available again.
    assert_eq!(coordinator.pool().available_indices(), vec![0]);
    assert!(coordinator.restart_timers.is_empty());
}

#[tokio::test(start_paused = true)]
async fn crash_requeues_at_head_and_restarts_after_debounce() {
    let (mut coordinator, mut inbox, env) = setup(1, 10);
    env.ready(0);
    pump(&mut coordinator, &mut inbox);
    coordinator.submit_batch(vec![task("a"), task("b")]);
    let first = coordinator.pool().slot(0).unwrap().token();

    env.crash(0);
    pump(&mut coordinator, &mut inbox);
    assert_eq!(queued(&coordinator), vec![("a".to_string(), 1), ("b".to_string(), 0)]);
    assert_eq!(coordinator.status().slots[0].state, SlotState::RestartScheduled);
    assert_eq!(env.0.lock().unwrap().terminated, vec![first]);

    // Nothing happens before the debounce elapses.
    tokio::time::sleep(DELAY / 2).await;
    pump(&mut coordinator, &mut inbox);
    assert_eq!(env.spawn_count(), 1);

    tokio::time::sleep(DELAY).await;
    pump(&mut coordinator, &mut inbox);
    assert_eq!(env.spawn_count(), 2);
    let second = coordinator.pool().slot(0).unwrap().token();
    assert_eq!(second.index, 0);
    assert!(second.generation > first.generation);
    assert_eq!(coordinator.status().slots[0].state, SlotState::Initializing);

    // The replacement reaches Ready and picks up the retried task first.
    env.ready(0);
    pump(&mut coordinator, &mut inbox);
    let assignment = env.last_assignment(0);
    assert_eq!(assignment.record_id, "a");
    assert_eq!(assignment.attempt, 1);
    assert_eq!(queued(&coordinator), vec![("b".to_string(), 0)]);
    assert_eq!(coordinator.stats().restarts, 1);
}

#[tokio::test(start_paused = true)]
async fn repeated_failures_schedule_one_restart() {
    let (mut coordinator, mut inbox, env) = setup(1, 10);
    env.ready(0);
    pump(&mut coordinator, &mut inbox);

    let events = env.latest(0);
    events.emit(WorkerEvent::Error("pipe closed".into()));
    events.emit(WorkerEvent::Exit(Some(1)));
    pump(&mut coordinator, &mut inbox);
    assert_eq!(coordinator.restart_timers.len(), 1);

    tokio::time::sleep(DELAY * 3).await;
    pump(&mut coordinator, &mut inbox);
    assert_eq!(env.spawn_count(), 2);
    assert_eq!(coordinator.stats().restarts, 1);
    assert!(coordinator.restart_timers.is_empty());
}

#[tokio::test(start_paused = true)]
async fn events_from_a_replaced_worker_are_ignored() {
    let (mut coordinator, mut inbox, env) = setup(1, 10);
    env.ready(0);
    pump(&mut coordinator, &mut inbox);
    let old = env.latest(0);

    env.crash(0);
    pump(&mut coordinator, &mut inbox);
    tokio::time::sleep(DELAY * 2).await;
    pump(&mut coordinator, &mut inbox);
    env.ready(0);
    pump(&mut coordinator, &mut inbox);
    coordinator.submit(task("a"));
    assert_eq!(in_flight(&coordinator, 0).as_deref(), Some("a"));

    // The old instance's late exit must not touch its successor.
    old.emit(WorkerEvent::Exit(Some(137)));
    pump(&mut coordinator, &mut inbox);
    assert_eq!(in_flight(&coordinator, 0).as_deref(), Some("a"));
    assert!(coordinator.restart_timers.is_empty());
    assert_eq!(coordinator.stats().requeued, 0);
}

#[tokio::test]
async fn report_with_wrong_correlation_is_ignored() {
    let (mut coordinator, mut inbox, env) = setup(1, 10);
    env.ready(0);
    pump(&mut coordinator, &mut inbox);
    coordinator.submit(task("a"));

    let report = TaskReport {
        record_id: "a".into(),
        field_name: "value".into(),
        result: TaskResult::Success { computed_value: json!(1) },
        duration_ms: 0,
    };
    let stray = Message::with_correlation(topics::TASK_RESULT, &report, Uuid::new_v4()).unwrap();
    env.latest(0).emit(WorkerEvent::Message(stray));
    pump(&mut coordinator, &mut inbox);

    assert_eq!(in_flight(&coordinator, 0).as_deref(), Some("a"));
    assert_eq!(coordinator.stats().completed, 0);
}

#[tokio::test]
async fn send_failure_requeues_and_fails_the_slot() {
    let (mut coordinator, mut inbox, env) = setup(2, 10);
    env.break_send(0);
    env.ready(0);
    env.ready(1);
    pump(&mut coordinator, &mut inbox);

    coordinator.submit_batch(vec![task("a"), task("b")]);

    // "a" bounced off the broken slot back to the head of the queue, so the
    // same pass hands it to slot 1 and "b" waits.
    assert_eq!(queued(&coordinator), vec![("b".to_string(), 0)]);
    assert_eq!(in_flight(&coordinator, 0), None);
    assert_eq!(in_flight(&coordinator, 1).as_deref(), Some("a"));
    assert_eq!(env.last_assignment(1).attempt, 1);
    assert_eq!(coordinator.stats().requeued, 1);
    assert!(coordinator.restart_timers.contains(&0));
    assert_eq!(coordinator.status().slots[0].state, SlotState::RestartScheduled);
    assert_exclusive(&coordinator);
}

#[tokio::test(start_paused = true)]
async fn spawn_failure_at_startup_is_retried() {
    let env = FakeEnv::default();
    env.fail_next_spawns(1);
    let (mut coordinator, mut inbox) = Coordinator::new(&config(2, 10), Arc::new(env.clone()));
    coordinator.initialize();

    assert_eq!(env.spawn_count(), 1);
    assert!(coordinator.restart_timers.contains(&0));

    tokio::time::sleep(DELAY * 2).await;
    pump(&mut coordinator, &mut inbox);
    assert_eq!(env.spawn_count(), 2);
    assert!(coordinator.pool().slot(0).unwrap().has_live_handle());
}

#[tokio::test(start_paused = true)]
async fn shutdown_discards_work_and_stops_recovery() {
    let (mut coordinator, mut inbox, env) = setup(2, 10);
    env.ready(0);
    pump(&mut coordinator, &mut inbox);
    coordinator.submit_batch(vec![task("a"), task("b"), task("c")]);
    assert_eq!(in_flight(&coordinator, 0).as_deref(), Some("a"));

    let (reply, rx) = oneshot::channel();
    let flow = coordinator.handle_input(Input::Command(Command::Shutdown { reply }));
    assert_eq!(flow, ControlFlow::Break(()));
    let report = rx.await.unwrap();
    assert_eq!(report.discarded_queued, 2);
    assert_eq!(report.discarded_in_flight, 1);
    assert_eq!(report.terminated_workers, 2);

    // Late failures neither requeue nor restart.
    env.crash(0);
    env.crash(1);
    pump(&mut coordinator, &mut inbox);
    tokio::time::sleep(DELAY * 2).await;
    pump(&mut coordinator, &mut inbox);

    assert!(coordinator.queue().is_empty());
    assert!(coordinator.restart_timers.is_empty());
    assert_eq!(env.spawn_count(), 2);
    assert_eq!(coordinator.stats().requeued, 0);
    assert_eq!(
        coordinator.submit(task("d")),
        SubmitOutcome::rejected(RejectReason::ShuttingDown)
    );
}

#[tokio::test(start_paused = true)]
async fn restart_timer_firing_after_shutdown_is_a_noop() {
    let (mut coordinator, mut inbox, env) = setup(1, 10);
    env.ready(0);
    env.crash(0);
    pump(&mut coordinator, &mut inbox);
    assert!(coordinator.restart_timers.contains(&0));

    coordinator.shutdown();
    tokio::time::sleep(DELAY * 2).await;
    pump(&mut coordinator, &mut inbox);
    assert_eq!(env.spawn_count(), 1);
    assert_eq!(coordinator.stats().restarts, 0);
}

#[tokio::test]
async fn handle_round_trips_through_running_coordinator() {
    let env = FakeEnv::default();
    let (handle, join) = Coordinator::start(&config(1, 1), Arc::new(env.clone()), None);

    assert!(handle.submit(task("a")).await.unwrap().accepted);
    let outcome = handle.submit(task("b")).await.unwrap();
    assert_eq!(outcome.reason, Some(RejectReason::QueueFull));

    let status = handle.status().await.unwrap();
    assert_eq!(status.queue_length, 1);
    assert_eq!(status.pool_size, 1);

    let report = handle.shutdown().await.unwrap();
    assert_eq!(report.discarded_queued, 1);
    join.await.unwrap();

    assert!(handle.is_closed());
    assert!(matches!(handle.status().await, Err(PoolError::CoordinatorClosed)));
}
