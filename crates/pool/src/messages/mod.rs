//! Worker protocol for the host <-> worker message channel.
//!
//! - **Topics** (`topics`): canonical topic strings carried in each envelope
//! - **Protocol** (`protocol`): payload types for the handshake, task
//!   assignments, and task reports

pub mod protocol;
pub mod topics;

pub use protocol::*;
