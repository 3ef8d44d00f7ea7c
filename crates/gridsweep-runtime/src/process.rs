//! Process-based executor
//!
//! Runs each command line through the platform shell with the run's
//! environment overrides, optionally wrapped in `torchrun`.

use async_trait::async_trait;
use gridsweep_core::{LaunchSettings, LauncherKind, SweepError, SweepResult};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::traits::{ExecutionRequest, Executor};

/// Process executor configuration
#[derive(Debug, Clone, Default)]
pub struct ProcessExecutorConfig {
    /// Launch conventions
    pub launch: LaunchSettings,
    /// Extra environment applied before the run's own overrides
    pub env: Vec<(String, String)>,
}

/// Executor that spawns one OS process per run
pub struct ProcessExecutor {
    config: ProcessExecutorConfig,
}

impl ProcessExecutor {
    /// Create a new process executor
    pub fn new(config: ProcessExecutorConfig) -> Self {
        Self { config }
    }

    /// The full shell line for a run, including any launcher prefix
    ///
    /// Under torchrun the interpreter is dropped; torchrun starts the script
    /// itself.
    pub fn launch_line(&self, request: &ExecutionRequest) -> String {
        match self.config.launch.launcher {
            LauncherKind::Direct => request.command.to_string(),
            LauncherKind::Torchrun => {
                let command = request.command.script_line();
                let nproc = request.devices.len().max(1);
                let mut line = format!(
                    "torchrun --standalone --nnodes=1 --nproc-per-node={}",
                    nproc
                );
                if nproc == 1 {
                    line.push_str(" --rdzv-backend=c10d --rdzv-endpoint=localhost:0");
                }
                format!("{} {}", line, command)
            }
        }
    }

    /// Environment the process sees on top of the inherited one
    pub fn environment(&self, request: &ExecutionRequest) -> Vec<(String, String)> {
        let mut env = self.config.env.clone();
        if self.config.launch.launch_blocking {
            env.push(("CUDA_LAUNCH_BLOCKING".to_string(), "1".to_string()));
        }
        env.extend(request.env.iter().cloned());
        env
    }

    /// Build the command to start a run
    fn build_command(&self, request: &ExecutionRequest) -> Command {
        let line = self.launch_line(request);

        #[cfg(windows)]
        let mut cmd = {
            let mut cmd = Command::new("cmd");
            cmd.arg("/C").arg(&line);
            cmd
        };

        #[cfg(not(windows))]
        let mut cmd = {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(&line);
            cmd
        };

        for (key, value) in self.environment(request) {
            cmd.env(key, value);
        }

        // Runs write straight to the sweep's console
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::inherit());
        cmd.stderr(Stdio::inherit());

        cmd
    }
}

#[async_trait]
impl Executor for ProcessExecutor {
    async fn execute(&self, request: &ExecutionRequest) -> SweepResult<i32> {
        info!(
            run = request.index,
            line = %self.launch_line(request),
            "Starting run process"
        );

        let mut cmd = self.build_command(request);
        let mut child = cmd.spawn().map_err(|e| {
            error!(run = request.index, error = %e, "Failed to spawn run process");
            SweepError::Execution(format!("Failed to spawn run {}: {}", request.index, e))
        })?;

        debug!(run = request.index, pid = child.id().unwrap_or(0), "Run process spawned");

        let status = child.wait().await.map_err(|e| {
            SweepError::Execution(format!("Failed to wait for run {}: {}", request.index, e))
        })?;

        match status.code() {
            Some(code) => Ok(code),
            None => {
                warn!(run = request.index, "Run process terminated by a signal");
                Ok(-1)
            }
        }
    }

    fn name(&self) -> &'static str {
        "process"
    }
}
