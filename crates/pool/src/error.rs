use thiserror::Error;

/// Errors that can occur in the worker pool and its collaborators.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("serialization error: {0}")]
    Serialization(#[from] rmp_serde::encode::Error),

    #[error("deserialization error: {0}")]
    Deserialization(#[from] rmp_serde::decode::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame of {0} bytes exceeds the maximum frame size")]
    FrameTooLarge(usize),

    #[error("failed to spawn worker: {0}")]
    Spawn(String),

    #[error("failed to send to worker: {0}")]
    Send(String),

    #[error("unexpected message topic '{0}'")]
    UnexpectedTopic(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("record store error: {0}")]
    Store(String),

    #[error("coordinator is not running")]
    CoordinatorClosed,

    #[error(transparent)]
    Core(#[from] gridcalc_core::CoreError),
}
