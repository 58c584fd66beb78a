use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::codec::{encode_frame, read_message};
use crate::config::WorkerConfig;
use crate::error::PoolError;
use crate::message::Message;
use crate::messages::{topics, WorkerReady};

use super::{WorkerEnvironment, WorkerEvent, WorkerEvents, WorkerHandle};

/// Environment variable telling a worker process which slot it serves.
pub const WORKER_INDEX_ENV: &str = "GRIDCALC_WORKER_INDEX";

/// Runs every worker as a separate OS process.
#[derive(Debug, Clone)]
pub struct ProcessEnvironment {
    binary: String,
    args: Vec<String>,
    env: HashMap<String, String>,
}

impl ProcessEnvironment {
    pub fn new(config: &WorkerConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            args: config.args.clone(),
            env: config.env.clone(),
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }
}

impl WorkerEnvironment for ProcessEnvironment {
    fn spawn(&self, events: WorkerEvents) -> Result<Box<dyn WorkerHandle>, PoolError> {
        let slot = events.token().index;

        let mut cmd = Command::new(&self.binary);
        cmd.args(&self.args)
            .envs(&self.env)
            .env(WORKER_INDEX_ENV, slot.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| PoolError::Spawn(format!("{}: {e}", self.binary)))?;
        let pid = child.id();

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| PoolError::Spawn("worker stdin not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PoolError::Spawn("worker stdout not captured".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| PoolError::Spawn("worker stderr not captured".into()))?;

        debug!(slot, pid, binary = %self.binary, "worker process spawned");

        let terminated = Arc::new(AtomicBool::new(false));
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let (kill_tx, kill_rx) = oneshot::channel();

        tokio::spawn(write_frames(stdin, frame_rx, events.clone()));
        tokio::spawn(read_frames(stdout, events.clone()));
        tokio::spawn(forward_stderr(stderr, slot));

        let exited = Arc::clone(&terminated);
        tokio::spawn(async move {
            // `None` means terminate() was called (or the handle was dropped).
            let finished = tokio::select! {
                status = child.wait() => Some(status),
                _ = kill_rx => None,
            };
            let status = match finished {
                Some(status) => status,
                None => {
                    if let Err(e) = child.start_kill() {
                        debug!(slot, error = %e, "kill after terminate request failed");
                    }
                    child.wait().await
                }
            };
            exited.store(true, Ordering::SeqCst);
            let code = match status {
                Ok(status) => status.code(),
                Err(e) => {
                    warn!(slot, error = %e, "failed to wait for worker process");
                    None
                }
            };
            events.emit(WorkerEvent::Exit(code));
        });

        Ok(Box::new(ProcessHandle {
            frames: frame_tx,
            kill: Some(kill_tx),
            terminated,
            pid,
        }))
    }
}

/// Handle to a worker process. Dropping it kills the process.
struct ProcessHandle {
    frames: mpsc::UnboundedSender<Vec<u8>>,
    kill: Option<oneshot::Sender<()>>,
    terminated: Arc<AtomicBool>,
    pid: Option<u32>,
}

impl WorkerHandle for ProcessHandle {
    fn send(&mut self, message: Message) -> Result<(), PoolError> {
        if self.is_terminated() {
            return Err(PoolError::Send("worker process has exited".into()));
        }
        let frame = encode_frame(&message)?;
        self.frames
            .send(frame)
            .map_err(|_| PoolError::Send("worker stdin is closed".into()))
    }

    fn terminate(&mut self) -> Result<(), PoolError> {
        match self.kill.take() {
            Some(kill) => {
                // The waiter may already be gone if the process exited.
                let _ = kill.send(());
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    fn pid(&self) -> Option<u32> {
        self.pid
    }
}

/// Drain queued frames into the worker's stdin.
async fn write_frames(
    mut stdin: ChildStdin,
    mut frames: mpsc::UnboundedReceiver<Vec<u8>>,
    events: WorkerEvents,
) {
    while let Some(frame) = frames.recv().await {
        let written = async {
            stdin.write_all(&frame).await?;
            stdin.flush().await
        }
        .await;
        if let Err(e) = written {
            events.emit(WorkerEvent::Error(format!("write to worker stdin failed: {e}")));
            return;
        }
    }
}

/// Decode frames from the worker's stdout into lifecycle events.
async fn read_frames(mut stdout: ChildStdout, events: WorkerEvents) {
    loop {
        match read_message(&mut stdout).await {
            Ok(Some(message)) if message.topic == topics::WORKER_READY => {
                match message.decode::<WorkerReady>() {
                    Ok(ready) => {
                        events.emit(WorkerEvent::Ready(ready));
                    }
                    Err(e) => {
                        events.emit(WorkerEvent::Error(format!("malformed ready message: {e}")));
                        return;
                    }
                }
            }
            Ok(Some(message)) => {
                events.emit(WorkerEvent::Message(message));
            }
            Ok(None) => return,
            Err(e) => {
                events.emit(WorkerEvent::Error(format!("read from worker stdout failed: {e}")));
                return;
            }
        }
    }
}

/// Forward worker stderr lines into the host's log.
async fn forward_stderr(stderr: ChildStderr, slot: usize) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        info!(target: "gridcalc::worker", slot, "{line}");
    }
}
