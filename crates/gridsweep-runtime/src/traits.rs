//! Executor trait definitions

use async_trait::async_trait;
use gridsweep_core::{CommandLine, DeviceId, SweepResult};
use serde::Serialize;
use std::path::PathBuf;

/// Everything an executor needs to launch one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionRequest {
    /// Run index within the sweep
    pub index: usize,
    /// Rendered command line
    pub command: CommandLine,
    /// Environment overrides, including the device pinning variable
    pub env: Vec<(String, String)>,
    /// Devices assigned to the run
    pub devices: Vec<DeviceId>,
    /// Output root of the run
    pub output_root: PathBuf,
}

/// Execution callback for sweep runs
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run to completion and return the exit code
    async fn execute(&self, request: &ExecutionRequest) -> SweepResult<i32>;

    /// Get the executor name
    fn name(&self) -> &'static str;
}
