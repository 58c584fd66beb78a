use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;
use crate::record::CellRecord;

/// One unit of computation routed to a worker.
///
/// `Task` is deliberately not `Clone`: at any instant it is owned by exactly
/// one of the task queue, a worker slot's in-flight assignment, or nobody.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Identifier of the target record.
    pub id: String,
    /// Which field of the record this task computes.
    pub field_name: String,
    /// Raw value or expression to evaluate. Opaque to the pool.
    pub payload: Value,
    /// Refreshed on every requeue.
    pub submitted_at: DateTime<Utc>,
    /// Incremented on every requeue.
    pub retry_count: u32,
}

impl Task {
    pub fn new(id: impl Into<String>, field_name: impl Into<String>, payload: Value) -> Self {
        Self {
            id: id.into(),
            field_name: field_name.into(),
            payload,
            submitted_at: Utc::now(),
            retry_count: 0,
        }
    }

    /// Build a task for a stored record, selecting the formula field when one
    /// is present and the value field otherwise.
    pub fn from_record(record: &CellRecord) -> Result<Self, CoreError> {
        if record.id.trim().is_empty() {
            return Err(CoreError::InvalidRecord {
                id: record.id.clone(),
                reason: "record id is empty".into(),
            });
        }
        Ok(Self::new(
            record.id.clone(),
            record.compute_field(),
            record.compute_payload(),
        ))
    }

    /// Record another attempt: bump the retry counter and refresh the
    /// submission timestamp.
    pub fn mark_requeued(&mut self) {
        self.retry_count += 1;
        self.submitted_at = Utc::now();
    }
}
