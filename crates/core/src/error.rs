use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Invalid record {id:?}: {reason}")]
    InvalidRecord { id: String, reason: String },
}
