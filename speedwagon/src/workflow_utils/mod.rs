//! Workflow utilities for running task queues
//!
//! - **batch**: bounded worker pool and queue execution
//! - **task**: single subtask execution with logging

pub mod batch;
pub mod task;

// Re-export commonly used types and functions
pub use batch::{execute_batch, run_queue, QueueOutcome, TaskContext};
pub use task::{execute_subtask, SubtaskOutcome};
