//! Topic constants for the worker message channel.
//!
//! Topics follow the pattern `gridcalc.<domain>.<event>`.

/// Worker -> host: the worker finished starting up and accepts tasks.
pub const WORKER_READY: &str = "gridcalc.worker.ready";

/// Host -> worker: evaluate one task.
pub const TASK_ASSIGN: &str = "gridcalc.task.assign";

/// Worker -> host: outcome of an assigned task.
pub const TASK_RESULT: &str = "gridcalc.task.result";
