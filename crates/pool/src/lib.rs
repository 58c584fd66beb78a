pub mod codec;
pub mod config;
pub mod coordinator;
pub mod environment;
pub mod error;
pub mod evaluate;
pub mod feed;
pub mod message;
pub mod messages;
pub mod pool;
pub mod queue;
pub mod recovery;
pub mod results;
pub mod slot;
pub mod status;
pub mod store;

pub use config::{GridcalcConfig, PoolConfig, StoreConfig, WorkerConfig};
pub use coordinator::{
    BatchOutcome, Coordinator, CoordinatorHandle, RejectReason, ShutdownReport, SubmitOutcome,
    TaskOutcome,
};
pub use environment::{
    InlineEnvironment, ProcessEnvironment, WorkerEnvironment, WorkerEvent, WorkerEvents,
    WorkerHandle,
};
pub use error::PoolError;
pub use feed::ChangeFeedAdapter;
pub use message::Message;
pub use messages::topics;
pub use pool::WorkerPool;
pub use queue::TaskQueue;
pub use recovery::RecoveryScanner;
pub use results::ResultWriter;
pub use slot::{SlotState, SlotToken, WorkerSlot};
pub use status::{CoordinatorStats, PoolStatus, SlotStatus};
pub use store::{MemoryStore, RecordStore};
