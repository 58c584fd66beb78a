//! gridcalc-host — runs the worker pool against a record store.
//!
//! Startup order: config, store (optionally seeded from a JSON file), worker
//! pool, recovery scan of unfinished records, then the live change feed.
//!
//! Submissions can also be made directly on stdin, one JSON object per line:
//!
//! ```text
//! {"recordId": "b7", "fieldName": "formula", "newValue": "=2*21"}
//! ```
//!
//! Each line is answered on stdout with `{"accepted": true}` or
//! `{"accepted": false, "reason": "queue_full"}`. Logs go to stderr.
//!
//! # Usage
//!
//! ```bash
//! gridcalc-host --config gridcalc.toml --seed cells.json
//! gridcalc-host --inline --pool-size 4
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use gridcalc_core::{CellRecord, Task};
use gridcalc_pool::{
    ChangeFeedAdapter, Coordinator, CoordinatorHandle, GridcalcConfig, InlineEnvironment,
    MemoryStore, ProcessEnvironment, RecoveryScanner, ResultWriter, SubmitOutcome,
    WorkerEnvironment,
};

/// Distributes grid cell computations across isolated worker processes.
#[derive(Parser, Debug)]
#[command(name = "gridcalc-host", version, about)]
struct Cli {
    /// Path to the gridcalc configuration file.
    #[arg(long, env = "GRIDCALC_CONFIG", default_value = "gridcalc.toml")]
    config: String,

    /// Number of worker slots (overrides `pool.size`).
    #[arg(long)]
    pool_size: Option<usize>,

    /// Run workers as tasks inside this process instead of child processes.
    #[arg(long)]
    inline: bool,

    /// JSON file with an array of records to load into the store at startup.
    #[arg(long)]
    seed: Option<PathBuf>,

    /// Seconds between status log lines (0 disables).
    #[arg(long, default_value_t = 30)]
    status_interval: u64,
}

/// One line on the stdin submission channel.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitRequest {
    record_id: String,
    field_name: String,
    new_value: Value,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum SubmitReply {
    Outcome(SubmitOutcome),
    Invalid { accepted: bool, error: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = GridcalcConfig::load_or_default(&cli.config)?;
    if let Some(size) = cli.pool_size {
        config.pool.size = size;
    }
    config.log_summary();
    let collection = config.store.collection.clone();

    // ── Store ────────────────────────────────────────────────────────
    let store = Arc::new(MemoryStore::new());
    if let Some(path) = &cli.seed {
        let records = CellRecord::list_from_json(&std::fs::read_to_string(path)?)?;
        let count = records.len();
        for record in records {
            store.insert(&collection, record);
        }
        info!(path = %path.display(), records = count, "store seeded");
    }

    // ── Pool ─────────────────────────────────────────────────────────
    let env: Arc<dyn WorkerEnvironment> = if cli.inline {
        info!("running workers inline");
        Arc::new(InlineEnvironment::default())
    } else {
        Arc::new(ProcessEnvironment::new(&config.worker))
    };
    let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
    let (coordinator, coordinator_task) = Coordinator::start(&config.pool, env, Some(outcome_tx));
    let writer_task = tokio::spawn(ResultWriter::new(store.clone(), collection.clone()).run(outcome_rx));

    // ── Recovery, then live changes ──────────────────────────────────
    RecoveryScanner::new(&*store, &collection)
        .run(&coordinator)
        .await?;
    let feed = ChangeFeedAdapter::subscribe(&*store, &collection, coordinator.clone()).await?;
    tokio::spawn(feed.run());

    tokio::spawn(serve_submissions(coordinator.clone()));
    if cli.status_interval > 0 {
        tokio::spawn(log_status(coordinator.clone(), Duration::from_secs(cli.status_interval)));
    }

    info!("gridcalc-host running, press Ctrl+C to stop");
    shutdown_signal().await?;

    info!("shutdown signal received, stopping workers");
    let report = coordinator.shutdown().await?;
    info!(
        discarded_queued = report.discarded_queued,
        discarded_in_flight = report.discarded_in_flight,
        terminated_workers = report.terminated_workers,
        "pool stopped"
    );
    let _ = coordinator_task.await;
    let _ = writer_task.await;
    Ok(())
}

/// Read submission requests from stdin and answer each on stdout.
async fn serve_submissions(coordinator: CoordinatorHandle) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("stdin closed, submission channel stopped");
                return;
            }
            Err(e) => {
                warn!(error = %e, "failed to read submission");
                return;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let reply = match serde_json::from_str::<SubmitRequest>(&line) {
            Ok(request) => {
                let task = Task::new(request.record_id, request.field_name, request.new_value);
                match coordinator.submit(task).await {
                    Ok(outcome) => SubmitReply::Outcome(outcome),
                    Err(_) => return,
                }
            }
            Err(e) => SubmitReply::Invalid {
                accepted: false,
                error: e.to_string(),
            },
        };

        let mut out = match serde_json::to_vec(&reply) {
            Ok(out) => out,
            Err(e) => {
                warn!(error = %e, "failed to encode submission reply");
                continue;
            }
        };
        out.push(b'\n');
        if stdout.write_all(&out).await.is_err() || stdout.flush().await.is_err() {
            return;
        }
    }
}

async fn log_status(coordinator: CoordinatorHandle, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        match coordinator.status().await {
            Ok(status) => info!(%status, "pool status"),
            Err(_) => return,
        }
    }
}

async fn shutdown_signal() -> std::io::Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = ctrl_c => result?,
            _ = sigterm.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await?;
    }

    Ok(())
}
