//! Worker pool running real `gridcalc-worker` processes.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::timeout;

use gridcalc_core::Task;
use gridcalc_pool::messages::TaskResult;
use gridcalc_pool::{
    Coordinator, CoordinatorHandle, PoolConfig, PoolStatus, ProcessEnvironment, TaskOutcome,
    WorkerConfig,
};

const TIMEOUT: Duration = Duration::from_secs(10);

fn start(size: usize) -> (CoordinatorHandle, tokio::task::JoinHandle<()>, mpsc::UnboundedReceiver<TaskOutcome>) {
    let worker = WorkerConfig {
        binary: env!("CARGO_BIN_EXE_gridcalc-worker").to_string(),
        ..Default::default()
    };
    let pool = PoolConfig {
        size,
        max_queue_size: 100,
        restart_delay_ms: 50,
        retry_warn_threshold: 5,
    };
    let (tx, rx) = mpsc::unbounded_channel();
    let (handle, join) = Coordinator::start(&pool, Arc::new(ProcessEnvironment::new(&worker)), Some(tx));
    (handle, join, rx)
}

/// Poll the status until `check` holds.
async fn wait_for_status(handle: &CoordinatorHandle, check: impl Fn(&PoolStatus) -> bool) -> PoolStatus {
    timeout(TIMEOUT, async {
        loop {
            let status = handle.status().await.unwrap();
            if check(&status) {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("pool never reached the expected state")
}

#[tokio::test]
async fn worker_processes_evaluate_tasks() {
    let (handle, join, mut outcomes) = start(2);

    let batch = handle
        .submit_batch(vec![
            Task::new("a", "formula", json!("=2*21")),
            Task::new("b", "value", json!("hello")),
            Task::new("c", "formula", json!("=1/0")),
        ])
        .await
        .unwrap();
    assert_eq!(batch.accepted, 3);

    let mut results = Vec::new();
    for _ in 0..3 {
        let outcome = timeout(TIMEOUT, outcomes.recv()).await.unwrap().unwrap();
        results.push((outcome.task.id, outcome.result));
    }
    results.sort_by(|x, y| x.0.cmp(&y.0));

    assert_eq!(results[0].1, TaskResult::Success { computed_value: json!(42) });
    assert_eq!(results[1].1, TaskResult::Success { computed_value: json!("hello") });
    assert!(!results[2].1.is_success());

    let status = wait_for_status(&handle, |s| s.available_workers == 2).await;
    assert!(status.slots.iter().all(|s| s.pid.is_some()));

    let report = handle.shutdown().await.unwrap();
    assert_eq!(report.terminated_workers, 2);
    join.await.unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn killed_worker_process_is_restarted() {
    let (handle, join, _outcomes) = start(1);

    let before = wait_for_status(&handle, |s| s.available_workers == 1).await;
    let pid = before.slots[0].pid.expect("worker pid");
    let generation = before.slots[0].generation;

    let killed = std::process::Command::new("kill")
        .args(["-KILL", &pid.to_string()])
        .status()
        .unwrap();
    assert!(killed.success());

    let after = wait_for_status(&handle, |s| {
        s.available_workers == 1 && s.slots[0].generation > generation
    })
    .await;
    assert_ne!(after.slots[0].pid, Some(pid));
    assert_eq!(after.stats.restarts, 1);

    handle.shutdown().await.unwrap();
    join.await.unwrap();
}
