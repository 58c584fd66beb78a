//! Pool configuration: TOML file, `GRIDCALC_*` environment overrides, validation.

mod loading;
mod types;
mod validation;

pub use types::{GridcalcConfig, PoolConfig, StoreConfig, WorkerConfig};
