use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;

/// Field name used when a record carries a formula.
pub const FORMULA_FIELD: &str = "formula";

/// Field name used when a record carries a plain value.
pub const VALUE_FIELD: &str = "value";

/// Lifecycle status of a grid cell record in the external store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Waiting to be computed. This is the "ready to compute" sentinel.
    Pending,
    /// Picked up by a worker but not finished.
    Processing,
    /// Computed successfully; `computed_value` is set.
    Completed,
    /// The worker reported a failure; `error_message` is set.
    Failed,
}

impl RecordStatus {
    /// Whether a change event carrying this status should produce a task.
    pub fn is_ready_to_compute(self) -> bool {
        self == RecordStatus::Pending
    }

    /// Whether a record in this status was left unfinished by a previous run.
    pub fn is_unfinished(self) -> bool {
        matches!(self, RecordStatus::Pending | RecordStatus::Processing)
    }
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordStatus::Pending => write!(f, "pending"),
            RecordStatus::Processing => write!(f, "processing"),
            RecordStatus::Completed => write!(f, "completed"),
            RecordStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One grid cell as stored in the external record store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellRecord {
    pub id: String,
    #[serde(default)]
    pub formula: Option<String>,
    #[serde(default)]
    pub value: Option<Value>,
    pub status: RecordStatus,
    #[serde(default)]
    pub computed_value: Option<Value>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl CellRecord {
    /// A pending record holding a plain value.
    pub fn with_value(id: impl Into<String>, value: Value) -> Self {
        Self {
            id: id.into(),
            formula: None,
            value: Some(value),
            status: RecordStatus::Pending,
            computed_value: None,
            error_message: None,
            updated_at: Utc::now(),
        }
    }

    /// A pending record holding a formula.
    pub fn with_formula(id: impl Into<String>, formula: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            formula: Some(formula.into()),
            value: None,
            status: RecordStatus::Pending,
            computed_value: None,
            error_message: None,
            updated_at: Utc::now(),
        }
    }

    /// Parse a JSON array of records (used to seed a store).
    pub fn list_from_json(json: &str) -> Result<Vec<CellRecord>, CoreError> {
        Ok(serde_json::from_str(json)?)
    }

    /// The field whose content determines this record's computed value:
    /// the formula when one is present, otherwise the plain value.
    pub fn compute_field(&self) -> &'static str {
        match self.formula.as_deref() {
            Some(f) if !f.trim().is_empty() => FORMULA_FIELD,
            _ => VALUE_FIELD,
        }
    }

    /// The raw payload for [`compute_field`](Self::compute_field).
    pub fn compute_payload(&self) -> Value {
        match self.compute_field() {
            FORMULA_FIELD => self
                .formula
                .clone()
                .map(Value::String)
                .unwrap_or(Value::Null),
            _ => self.value.clone().unwrap_or(Value::Null),
        }
    }
}

/// What happened to a record in a change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordAction {
    Create,
    Update,
    Delete,
}

/// A change notification delivered by the record store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub action: RecordAction,
    pub record: CellRecord,
}

/// Status-based record filter for queries and subscriptions.
///
/// An empty status list matches every record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFilter {
    #[serde(default)]
    pub statuses: Vec<RecordStatus>,
}

impl RecordFilter {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn status_in(statuses: impl IntoIterator<Item = RecordStatus>) -> Self {
        Self {
            statuses: statuses.into_iter().collect(),
        }
    }

    /// Records left pending or processing by a previous run.
    pub fn unfinished() -> Self {
        Self::status_in([RecordStatus::Pending, RecordStatus::Processing])
    }

    pub fn matches(&self, record: &CellRecord) -> bool {
        self.statuses.is_empty() || self.statuses.contains(&record.status)
    }
}

/// Partial update written back to a record once a task finishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordUpdate {
    pub status: RecordStatus,
    pub computed_value: Option<Value>,
    pub error_message: Option<String>,
}

impl RecordUpdate {
    pub fn completed(computed_value: Value) -> Self {
        Self {
            status: RecordStatus::Completed,
            computed_value: Some(computed_value),
            error_message: None,
        }
    }

    pub fn failed(error_message: impl Into<String>) -> Self {
        Self {
            status: RecordStatus::Failed,
            computed_value: None,
            error_message: Some(error_message.into()),
        }
    }

    /// Apply this update to a stored record, refreshing `updated_at`.
    pub fn apply_to(&self, record: &mut CellRecord) {
        record.status = self.status;
        record.computed_value = self.computed_value.clone();
        record.error_message = self.error_message.clone();
        record.updated_at = Utc::now();
    }
}
