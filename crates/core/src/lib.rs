pub mod error;
pub mod record;
pub mod task;

pub use error::*;
pub use record::*;
pub use task::*;
