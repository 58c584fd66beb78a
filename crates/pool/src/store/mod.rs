//! External record store interface.
//!
//! The pool reads pending work from the store (recovery scan and change
//! feed) and writes computed values back to it. [`MemoryStore`] is the
//! in-process implementation used by the host binary and the tests.

mod memory;

use tokio::sync::mpsc;

use gridcalc_core::{CellRecord, ChangeEvent, RecordFilter, RecordUpdate};

use crate::error::PoolError;

pub use memory::MemoryStore;

/// A document store holding grid cell records, grouped in collections.
#[async_trait::async_trait]
pub trait RecordStore: Send + Sync {
    /// Subscribe to create/update/delete notifications for records in
    /// `collection` that match `filter`. The subscription ends when the
    /// receiver is dropped.
    async fn subscribe(
        &self,
        collection: &str,
        filter: RecordFilter,
    ) -> Result<mpsc::UnboundedReceiver<ChangeEvent>, PoolError>;

    /// All records in `collection` matching `filter`.
    async fn query(&self, collection: &str, filter: &RecordFilter) -> Result<Vec<CellRecord>, PoolError>;

    /// Write a partial update to one record.
    async fn update(&self, collection: &str, id: &str, update: RecordUpdate) -> Result<(), PoolError>;
}
