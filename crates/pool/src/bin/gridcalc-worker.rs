//! gridcalc-worker — isolated evaluation process started by `gridcalc-host`.
//!
//! Speaks length-prefixed MessagePack frames:
//! - stdout: `gridcalc.worker.ready` once at startup, then one
//!   `gridcalc.task.result` per assignment (same correlation id)
//! - stdin: `gridcalc.task.assign`
//!
//! Logs go to stderr, which the host forwards into its own log stream.
//! The process exits when stdin closes.

use std::time::Instant;

use clap::Parser;
use tokio::io::{BufReader, BufWriter};
use tracing::{debug, info, warn};

use gridcalc_pool::codec::{read_message, write_message};
use gridcalc_pool::evaluate::evaluate;
use gridcalc_pool::messages::{TaskAssignment, TaskReport, WorkerReady};
use gridcalc_pool::{Message, topics};

#[derive(Parser, Debug)]
#[command(name = "gridcalc-worker", version, about)]
struct Cli {
    /// Pool slot this worker serves (set by the host).
    #[arg(long, env = "GRIDCALC_WORKER_INDEX", default_value_t = 0)]
    slot: usize,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let mut input = BufReader::new(tokio::io::stdin());
    let mut output = BufWriter::new(tokio::io::stdout());

    let ready = WorkerReady {
        slot: cli.slot,
        pid: Some(std::process::id()),
    };
    write_message(&mut output, &Message::new(topics::WORKER_READY, &ready)?).await?;
    info!(slot = cli.slot, "worker ready");

    while let Some(message) = read_message(&mut input).await? {
        if message.topic != topics::TASK_ASSIGN {
            warn!(topic = %message.topic, "ignoring unexpected message");
            continue;
        }
        let assignment: TaskAssignment = message.decode()?;

        let started = Instant::now();
        let result = evaluate(&assignment.field_name, &assignment.payload);
        let report = TaskReport {
            record_id: assignment.record_id,
            field_name: assignment.field_name,
            result,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        debug!(record_id = %report.record_id, success = report.result.is_success(), "task evaluated");

        let reply = Message::with_correlation(topics::TASK_RESULT, &report, message.correlation_id)?;
        write_message(&mut output, &reply).await?;
    }

    debug!(slot = cli.slot, "stdin closed, exiting");
    Ok(())
}
