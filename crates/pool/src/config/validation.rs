use super::types::GridcalcConfig;
use crate::error::PoolError;

impl GridcalcConfig {
    /// Validate the config: bounds that must be non-zero and required names.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.pool.max_queue_size == 0 {
            return Err(PoolError::Config(
                "pool.max_queue_size must be greater than zero".into(),
            ));
        }
        if self.pool.restart_delay_ms == 0 {
            return Err(PoolError::Config(
                "pool.restart_delay_ms must be greater than zero".into(),
            ));
        }
        if self.worker.binary.trim().is_empty() {
            return Err(PoolError::Config("worker.binary must not be empty".into()));
        }
        if self.store.collection.trim().is_empty() {
            return Err(PoolError::Config(
                "store.collection must not be empty".into(),
            ));
        }
        Ok(())
    }
}
