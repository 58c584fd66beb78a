use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ── Top-level config ────────────────────────────────────────────────

/// Full configuration for the grid computation pool.
///
/// Parsed from `gridcalc.toml` with support for environment variable overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GridcalcConfig {
    #[serde(default)]
    pub pool: PoolConfig,

    #[serde(default)]
    pub worker: WorkerConfig,

    #[serde(default)]
    pub store: StoreConfig,
}

// ── Section configs ─────────────────────────────────────────────────

/// Pool sizing, backpressure, and restart behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Number of worker slots. 0 = `max(available CPUs - 2, 2)`.
    #[serde(default)]
    pub size: usize,

    /// Maximum number of queued tasks before new submissions are rejected.
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// Debounce delay before a failed slot is re-created.
    #[serde(default = "default_restart_delay_ms")]
    pub restart_delay_ms: u64,

    /// Requeues beyond this count log a warning. Tasks are never dropped.
    #[serde(default = "default_retry_warn_threshold")]
    pub retry_warn_threshold: u32,
}

fn default_max_queue_size() -> usize {
    1000
}

fn default_restart_delay_ms() -> u64 {
    1000
}

fn default_retry_warn_threshold() -> u32 {
    5
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: 0,
            max_queue_size: default_max_queue_size(),
            restart_delay_ms: default_restart_delay_ms(),
            retry_warn_threshold: default_retry_warn_threshold(),
        }
    }
}

impl PoolConfig {
    /// Resolve the slot count (0 means derive from available parallelism).
    pub fn resolved_size(&self) -> usize {
        if self.size == 0 {
            let cpus = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4);
            cpus.saturating_sub(2).max(2)
        } else {
            self.size
        }
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }
}

/// How worker processes are launched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Path to the worker binary.
    #[serde(default = "default_worker_binary")]
    pub binary: String,

    /// Extra command-line arguments.
    #[serde(default)]
    pub args: Vec<String>,

    /// Extra environment variables passed to every worker process.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

fn default_worker_binary() -> String {
    "gridcalc-worker".into()
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            binary: default_worker_binary(),
            args: Vec::new(),
            env: HashMap::new(),
        }
    }
}

/// External record store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Collection holding the grid cell records.
    #[serde(default = "default_collection")]
    pub collection: String,
}

fn default_collection() -> String {
    "cells".into()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            collection: default_collection(),
        }
    }
}
