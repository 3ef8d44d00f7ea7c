//! gridsweep-runtime: Execution callbacks
//!
//! This crate provides the ways a materialized run can be executed:
//! - The `Executor` trait the dispatcher calls for every run
//! - A process-based executor that launches the command through the shell

pub mod process;
pub mod traits;

pub use process::{ProcessExecutor, ProcessExecutorConfig};
pub use traits::{ExecutionRequest, Executor};
