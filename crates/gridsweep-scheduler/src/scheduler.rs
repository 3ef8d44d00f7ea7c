//! Sweep dispatch
//!
//! The scheduler materializes every run up front, then drives them through a
//! bounded pool. Each worker checks the completion marker, waits for its start
//! turn and a device slot, prepares the run directory, invokes the executor
//! and records the outcome.

use futures::stream::{self, StreamExt};
use gridsweep_core::{
    join_devices, DeviceId, RunMaterializer, RunSpec, SchedulingConfig, SweepConfig, SweepResult,
};
use gridsweep_runtime::{ExecutionRequest, Executor};
use gridsweep_store::RunStore;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::report::{RunOutcome, RunState, SweepReport};
use crate::strategy::SlotStrategy;

/// Stops dispatch of runs that have not started yet
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; runs already executing finish normally
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// A run as it would be dispatched
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedRun {
    pub index: usize,
    pub command: String,
    pub output_root: PathBuf,
}

/// Marker status of a sweep before dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepStatus {
    pub total: usize,
    pub finished: usize,
}

impl SweepStatus {
    /// Runs that still need to execute
    pub fn runnable(&self) -> usize {
        self.total - self.finished
    }
}

/// Scheduler dispatching the runs of one sweep
pub struct Scheduler {
    runs: Vec<RunSpec>,
    strategy: SlotStrategy,
    scheduling: SchedulingConfig,
    env: Vec<(String, String)>,
    dry_run: bool,
    executor: Arc<dyn Executor>,
    store: Arc<dyn RunStore>,
    cancel: CancelHandle,
    /// When the last run passed the start gate
    last_start: Mutex<Option<Instant>>,
}

impl Scheduler {
    /// Create a scheduler, materializing every run of the sweep
    ///
    /// Configuration problems surface here, before anything is dispatched.
    pub fn new(
        config: &SweepConfig,
        executor: Arc<dyn Executor>,
        store: Arc<dyn RunStore>,
    ) -> SweepResult<Self> {
        config.validate()?;
        let strategy = SlotStrategy::from_config(&config.scheduling)?;
        let runs = RunMaterializer::new(config)?.materialize_all()?;

        info!(
            runs = runs.len(),
            devices = config.scheduling.devices.len(),
            workers = config.scheduling.worker_count(),
            strategy = strategy.name(),
            executor = executor.name(),
            store = store.name(),
            "Scheduler initialized"
        );

        Ok(Self {
            runs,
            strategy,
            scheduling: config.scheduling.clone(),
            env: config.env.clone(),
            dry_run: config.dry_run,
            executor,
            store,
            cancel: CancelHandle::new(),
            last_start: Mutex::new(None),
        })
    }

    /// Materialized runs, in index order
    pub fn runs(&self) -> &[RunSpec] {
        &self.runs
    }

    /// Slot strategy in use
    pub fn strategy(&self) -> &SlotStrategy {
        &self.strategy
    }

    /// Handle for stopping further dispatch
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Rendered command lines without dispatching anything
    pub fn plan(&self) -> Vec<PlannedRun> {
        self.runs
            .iter()
            .map(|run| PlannedRun {
                index: run.index,
                command: run.command.to_string(),
                output_root: run.output_root.clone(),
            })
            .collect()
    }

    /// Count runs whose completion marker already exists
    ///
    /// With markers disabled nothing counts as finished, since nothing is
    /// skipped either.
    pub async fn status(&self) -> SweepResult<SweepStatus> {
        let mut finished = 0;
        if !self.scheduling.write_markers {
            return Ok(SweepStatus {
                total: self.runs.len(),
                finished,
            });
        }
        for run in &self.runs {
            if self.store.exists(&run.marker_path()).await? {
                finished += 1;
            }
        }
        Ok(SweepStatus {
            total: self.runs.len(),
            finished,
        })
    }

    /// Dispatch every run and wait for the pool to drain
    ///
    /// Per-run failures are recorded in the report; they do not abort the
    /// sweep. In dry-run mode nothing is dispatched and every run stays
    /// pending.
    pub async fn run(&self) -> SweepReport {
        if self.dry_run {
            for planned in self.plan() {
                info!(run = planned.index, command = %planned.command, "Dry run");
            }
            return SweepReport::new(self.runs.iter().map(RunOutcome::pending).collect());
        }

        let workers = self.scheduling.worker_count().max(1);
        info!(runs = self.runs.len(), workers = workers, "Dispatching sweep");

        if !self.scheduling.start_delay.is_zero() {
            info!(delay = ?self.scheduling.start_delay, "Delaying sweep start");
            tokio::time::sleep(self.scheduling.start_delay).await;
        }

        let outcomes: Vec<RunOutcome> = stream::iter(&self.runs)
            .map(|run| self.dispatch(run))
            .buffer_unordered(workers)
            .collect()
            .await;

        let report = SweepReport::new(outcomes);
        info!(
            total = report.total(),
            succeeded = report.succeeded(),
            failed = report.failed(),
            skipped = report.skipped(),
            pending = report.pending(),
            "Sweep finished"
        );
        report
    }

    /// Drive one run from pending to a terminal state
    async fn dispatch(&self, run: &RunSpec) -> RunOutcome {
        let mut outcome = RunOutcome::pending(run);

        if self.cancel.is_cancelled() {
            debug!(run = run.index, "Sweep cancelled, run left pending");
            return outcome;
        }

        match self.already_finished(run).await {
            Ok(true) => {
                info!(
                    run = run.index,
                    root = %run.output_root.display(),
                    "Run already finished, skipping"
                );
                outcome.state = RunState::Skipped;
                return outcome;
            }
            Ok(false) => {}
            Err(e) => {
                error!(run = run.index, error = %e, "Failed to check completion marker");
                outcome.fail(None, e.to_string());
                return outcome;
            }
        }

        self.wait_start_turn().await;

        let lease = match self.strategy.acquire().await {
            Ok(lease) => lease,
            Err(e) => {
                error!(run = run.index, error = %e, "Failed to acquire device slot");
                outcome.fail(None, e.to_string());
                return outcome;
            }
        };

        // Cancellation may have arrived while waiting for the slot.
        if self.cancel.is_cancelled() {
            debug!(run = run.index, "Sweep cancelled, run left pending");
            return outcome;
        }

        outcome.start(lease.devices());
        info!(
            run = run.index,
            devices = %join_devices(lease.devices()),
            root = %run.output_root.display(),
            "Run started"
        );

        let result = self.execute(run, lease.devices()).await;
        drop(lease);

        match result {
            Ok(0) => match self.mark_finished(run).await {
                Ok(()) => {
                    info!(run = run.index, "Run succeeded");
                    outcome.succeed();
                }
                Err(e) => {
                    error!(run = run.index, error = %e, "Failed to write completion marker");
                    outcome.fail(Some(0), e.to_string());
                }
            },
            Ok(code) => {
                warn!(run = run.index, exit_code = code, "Run failed");
                outcome.fail(Some(code), format!("exited with code {}", code));
            }
            Err(e) => {
                error!(run = run.index, error = %e, "Run failed");
                outcome.fail(None, e.to_string());
            }
        }

        outcome
    }

    async fn already_finished(&self, run: &RunSpec) -> SweepResult<bool> {
        if !self.scheduling.write_markers {
            return Ok(false);
        }
        self.store.exists(&run.marker_path()).await
    }

    /// Space run starts at least `start_stagger` apart
    async fn wait_start_turn(&self) {
        let stagger = self.scheduling.start_stagger;
        if stagger.is_zero() {
            return;
        }
        let mut last = self.last_start.lock().await;
        if let Some(previous) = *last {
            tokio::time::sleep_until(previous + stagger).await;
        }
        *last = Some(Instant::now());
    }

    /// Prepare the run directory and invoke the executor
    async fn execute(&self, run: &RunSpec, devices: &[DeviceId]) -> SweepResult<i32> {
        self.store.create_dir_all(&run.output_root).await?;
        self.store
            .write_text(&run.arguments_path(), &run.params.to_record())
            .await?;

        let mut env = vec![(self.scheduling.device_env_var.clone(), join_devices(devices))];
        env.extend(self.env.iter().cloned());

        let request = ExecutionRequest {
            index: run.index,
            command: run.command.clone(),
            env,
            devices: devices.to_vec(),
            output_root: run.output_root.clone(),
        };
        self.executor.execute(&request).await
    }

    async fn mark_finished(&self, run: &RunSpec) -> SweepResult<()> {
        if !self.scheduling.write_markers {
            return Ok(());
        }
        self.store.write_marker(&run.marker_path()).await
    }
}
