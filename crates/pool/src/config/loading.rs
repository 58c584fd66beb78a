use std::path::Path;

use crate::error::PoolError;

use super::types::GridcalcConfig;

impl GridcalcConfig {
    /// Parse config from a TOML string, then apply env overrides and validate.
    pub fn from_toml(toml_str: &str) -> Result<Self, PoolError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PoolError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Load from `path` if it exists, otherwise start from defaults.
    /// Env overrides and validation apply either way.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, PoolError> {
        if path.as_ref().exists() {
            return Self::from_file(path);
        }
        tracing::info!(path = %path.as_ref().display(), "config file not found, using defaults");
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!(
            pool_size = self.pool.resolved_size(),
            max_queue_size = self.pool.max_queue_size,
            restart_delay_ms = self.pool.restart_delay_ms,
            worker = %self.worker.binary,
            collection = %self.store.collection,
            "config loaded"
        );
    }

    // ── Environment variable overrides ──────────────────────────────

    /// Apply environment variable overrides.
    ///
    /// Convention: `GRIDCALC_SECTION_KEY` overrides `section.key`.
    /// - `GRIDCALC_POOL_SIZE` -> `pool.size`
    /// - `GRIDCALC_POOL_MAX_QUEUE_SIZE` -> `pool.max_queue_size`
    /// - `GRIDCALC_POOL_RESTART_DELAY_MS` -> `pool.restart_delay_ms`
    /// - `GRIDCALC_POOL_RETRY_WARN_THRESHOLD` -> `pool.retry_warn_threshold`
    /// - `GRIDCALC_WORKER_BINARY` -> `worker.binary`
    /// - `GRIDCALC_STORE_COLLECTION` -> `store.collection`
    ///
    /// Unparseable numeric values are ignored.
    pub(crate) fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parsed("GRIDCALC_POOL_SIZE") {
            self.pool.size = v;
        }
        if let Some(v) = env_parsed("GRIDCALC_POOL_MAX_QUEUE_SIZE") {
            self.pool.max_queue_size = v;
        }
        if let Some(v) = env_parsed("GRIDCALC_POOL_RESTART_DELAY_MS") {
            self.pool.restart_delay_ms = v;
        }
        if let Some(v) = env_parsed("GRIDCALC_POOL_RETRY_WARN_THRESHOLD") {
            self.pool.retry_warn_threshold = v;
        }
        if let Ok(v) = std::env::var("GRIDCALC_WORKER_BINARY") {
            self.worker.binary = v;
        }
        if let Ok(v) = std::env::var("GRIDCALC_STORE_COLLECTION") {
            self.store.collection = v;
        }
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
