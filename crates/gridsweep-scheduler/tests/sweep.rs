//! End-to-end dispatch scenarios against an in-memory store

use async_trait::async_trait;
use gridsweep_core::{DeviceId, SweepConfig, SweepError, SweepResult};
use gridsweep_runtime::{ExecutionRequest, Executor};
use gridsweep_scheduler::{CancelHandle, RunOutcome, RunState, Scheduler, SlotStrategy, SweepReport};
use gridsweep_store::MemoryStore;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Default)]
struct Observed {
    requests: Vec<ExecutionRequest>,
    started: Vec<Instant>,
    running: usize,
    peak: usize,
    per_device: HashMap<DeviceId, usize>,
    device_peak: usize,
}

#[derive(Default)]
struct ScriptedExecutor {
    delay: Duration,
    exit_codes: HashMap<usize, i32>,
    errors: HashSet<usize>,
    cancel_on_first: Mutex<Option<CancelHandle>>,
    observed: Mutex<Observed>,
}

impl ScriptedExecutor {
    fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    fn executed(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = self
            .observed
            .lock()
            .unwrap()
            .requests
            .iter()
            .map(|r| r.index)
            .collect();
        indices.sort();
        indices
    }

    fn peak(&self) -> usize {
        self.observed.lock().unwrap().peak
    }

    fn device_peak(&self) -> usize {
        self.observed.lock().unwrap().device_peak
    }

    fn requests(&self) -> Vec<ExecutionRequest> {
        self.observed.lock().unwrap().requests.clone()
    }

    fn executed_roots(&self) -> HashSet<PathBuf> {
        self.requests().into_iter().map(|r| r.output_root).collect()
    }

    fn start_times(&self) -> Vec<Instant> {
        let mut started = self.observed.lock().unwrap().started.clone();
        started.sort();
        started
    }
}

#[async_trait]
impl Executor for ScriptedExecutor {
    async fn execute(&self, request: &ExecutionRequest) -> SweepResult<i32> {
        {
            let mut observed = self.observed.lock().unwrap();
            observed.requests.push(request.clone());
            observed.started.push(Instant::now());
            observed.running += 1;
            observed.peak = observed.peak.max(observed.running);
            for device in &request.devices {
                let count = observed.per_device.entry(device.clone()).or_insert(0);
                *count += 1;
                let count = *count;
                observed.device_peak = observed.device_peak.max(count);
            }
        }

        if let Some(handle) = self.cancel_on_first.lock().unwrap().take() {
            handle.cancel();
        }

        tokio::time::sleep(self.delay).await;

        {
            let mut observed = self.observed.lock().unwrap();
            observed.running -= 1;
            for device in &request.devices {
                if let Some(count) = observed.per_device.get_mut(device) {
                    *count -= 1;
                }
            }
        }

        if self.errors.contains(&request.index) {
            return Err(SweepError::Execution(format!("run {} crashed", request.index)));
        }
        Ok(self.exit_codes.get(&request.index).copied().unwrap_or(0))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

fn lr_seed_config() -> SweepConfig {
    SweepConfig::new(
        "python3 train.py",
        "root_folder",
        "/results/lr=${lr}/seed=${seed}",
    )
    .with_default("epochs", 100)
    .with_sweep("lr", vec!["1e-3", "1e-2"])
    .with_sweep("seed", vec![1, 2])
    .with_poll_interval(Duration::from_millis(5))
}

fn seeds_config(seeds: usize) -> SweepConfig {
    SweepConfig::new("python3 train.py", "out", "/results/seed=${seed}")
        .with_sweep("seed", (0..seeds as i64).collect::<Vec<i64>>())
        .with_poll_interval(Duration::from_millis(5))
}

fn marker(root: impl AsRef<Path>) -> PathBuf {
    root.as_ref().join("state.finished")
}

fn outcome_at<'a>(report: &'a SweepReport, root: &str) -> &'a RunOutcome {
    report
        .outcomes
        .iter()
        .find(|o| o.output_root == Path::new(root))
        .unwrap_or_else(|| panic!("no run writes to {}", root))
}

#[tokio::test]
async fn test_four_run_scenario() {
    let executor = Arc::new(ScriptedExecutor::default());
    let store = Arc::new(MemoryStore::new());
    let scheduler = Scheduler::new(&lr_seed_config(), executor.clone(), store.clone()).unwrap();

    let report = scheduler.run().await;
    assert_eq!(report.total(), 4);
    assert_eq!(report.succeeded(), 4);
    assert!(report.is_success());

    for request in executor.requests() {
        let line = request.command.to_string();
        assert!(line.starts_with("python3 train.py --epochs 100"));
        assert!(line.contains("--lr 1e-3") ^ line.contains("--lr 1e-2"));
        assert!(line.contains("--seed 1") ^ line.contains("--seed 2"));
    }

    for root in [
        "/results/lr=1e-3/seed=1",
        "/results/lr=1e-3/seed=2",
        "/results/lr=1e-2/seed=1",
        "/results/lr=1e-2/seed=2",
    ] {
        assert!(store.read(&marker(root)).is_some(), "missing marker in {}", root);
    }
}

#[tokio::test]
async fn test_two_devices_cap_one_runs_at_most_two() {
    let executor = Arc::new(ScriptedExecutor::with_delay(Duration::from_millis(40)));
    let config = seeds_config(3).with_devices(vec!["0", "1"]);
    let scheduler = Scheduler::new(&config, executor.clone(), Arc::new(MemoryStore::new())).unwrap();

    let report = scheduler.run().await;
    assert_eq!(report.succeeded(), 3);
    assert_eq!(executor.peak(), 2);
    assert_eq!(executor.device_peak(), 1);

    for outcome in &report.outcomes {
        assert_eq!(outcome.devices.len(), 1);
        assert!(outcome.started_at.unwrap() <= outcome.finished_at.unwrap());
    }
}

#[tokio::test]
async fn test_per_device_cap_holds_with_many_runs() {
    let executor = Arc::new(ScriptedExecutor::with_delay(Duration::from_millis(10)));
    let config = seeds_config(12)
        .with_devices(vec!["0", "1", "2"])
        .with_max_jobs_per_device(2);
    let scheduler = Scheduler::new(&config, executor.clone(), Arc::new(MemoryStore::new())).unwrap();

    let report = scheduler.run().await;
    assert_eq!(report.succeeded(), 12);
    assert!(executor.peak() <= 6);
    assert!(executor.device_peak() <= 2);

    let SlotStrategy::PerDevice(allocator) = scheduler.strategy() else {
        panic!("expected per-device strategy");
    };
    assert!(allocator.snapshot().iter().all(|load| load.in_flight == 0));
}

#[tokio::test]
async fn test_finished_run_is_skipped() {
    let executor = Arc::new(ScriptedExecutor::default());
    let store = Arc::new(MemoryStore::new());
    store.insert_file(marker("/results/lr=1e-3/seed=2"), "");

    let scheduler = Scheduler::new(&lr_seed_config(), executor.clone(), store.clone()).unwrap();
    let status = scheduler.status().await.unwrap();
    assert_eq!((status.runnable(), status.finished, status.total), (3, 1, 4));

    let report = scheduler.run().await;
    let skipped = outcome_at(&report, "/results/lr=1e-3/seed=2");
    assert_eq!(skipped.state, RunState::Skipped);
    assert_eq!(report.skipped(), 1);
    assert_eq!(report.succeeded(), 3);
    assert_eq!(executor.executed().len(), 3);
    assert!(!executor.executed().contains(&skipped.index));
    assert!(!executor
        .executed_roots()
        .contains(Path::new("/results/lr=1e-3/seed=2")));
    assert!(store
        .read(Path::new("/results/lr=1e-3/seed=2/arguments.txt"))
        .is_none());
}

#[tokio::test]
async fn test_failure_does_not_abort_sweep() {
    let executor = Arc::new(ScriptedExecutor {
        exit_codes: HashMap::from([(1, 2)]),
        errors: HashSet::from([2]),
        ..Default::default()
    });
    let store = Arc::new(MemoryStore::new());
    let scheduler = Scheduler::new(&seeds_config(4), executor.clone(), store.clone()).unwrap();

    let report = scheduler.run().await;
    assert_eq!(executor.executed(), vec![0, 1, 2, 3]);
    assert_eq!(report.succeeded(), 2);
    assert_eq!(report.failed(), 2);

    let exited = report.outcome(1).unwrap();
    assert_eq!(exited.state, RunState::Failed);
    assert_eq!(exited.exit_code, Some(2));
    assert_eq!(exited.error.as_deref(), Some("exited with code 2"));

    let crashed = report.outcome(2).unwrap();
    assert_eq!(crashed.exit_code, None);
    assert!(crashed.error.as_deref().unwrap().contains("run 2 crashed"));

    assert!(store.read(&marker(&exited.output_root)).is_none());
    assert!(store.read(&marker(&crashed.output_root)).is_none());
    for ok in report.outcomes.iter().filter(|o| o.state == RunState::Succeeded) {
        assert!(store.read(&marker(&ok.output_root)).is_some());
    }
    // The argument record is written before the run starts.
    assert!(store
        .read(&exited.output_root.join("arguments.txt"))
        .is_some());
}

#[tokio::test]
async fn test_storage_failure_releases_slots() {
    let executor = Arc::new(ScriptedExecutor::default());
    let store = Arc::new(MemoryStore::new());
    store.fail_writes(true);
    let config = seeds_config(3).with_devices(vec!["0", "1"]);
    let scheduler = Scheduler::new(&config, executor.clone(), store).unwrap();

    let report = scheduler.run().await;
    assert_eq!(report.failed(), 3);
    assert!(executor.executed().is_empty());

    let SlotStrategy::PerDevice(allocator) = scheduler.strategy() else {
        panic!("expected per-device strategy");
    };
    assert!(allocator.snapshot().iter().all(|load| load.in_flight == 0));
}

#[tokio::test]
async fn test_distributed_mode_assigns_all_devices() {
    let executor = Arc::new(ScriptedExecutor::with_delay(Duration::from_millis(10)));
    let config = seeds_config(3)
        .with_devices(vec!["0", "1"])
        .with_distributed(true);
    let scheduler = Scheduler::new(&config, executor.clone(), Arc::new(MemoryStore::new())).unwrap();

    let report = scheduler.run().await;
    assert_eq!(report.succeeded(), 3);
    assert_eq!(executor.peak(), 1);

    for request in executor.requests() {
        assert_eq!(request.devices, vec![DeviceId::new("0"), DeviceId::new("1")]);
        assert_eq!(
            request.env[0],
            ("CUDA_VISIBLE_DEVICES".to_string(), "0,1".to_string())
        );
    }
}

#[tokio::test]
async fn test_dry_run_dispatches_nothing() {
    let executor = Arc::new(ScriptedExecutor::default());
    let store = Arc::new(MemoryStore::new());
    let config = lr_seed_config().with_dry_run(true);
    let scheduler = Scheduler::new(&config, executor.clone(), store.clone()).unwrap();

    let plan = scheduler.plan();
    assert_eq!(plan.len(), 4);
    let first = plan
        .iter()
        .find(|p| p.output_root == Path::new("/results/lr=1e-3/seed=1"))
        .unwrap();
    assert_eq!(
        first.command,
        "python3 train.py --epochs 100 --lr 1e-3 --seed 1 --root_folder /results/lr=1e-3/seed=1"
    );

    let report = scheduler.run().await;
    assert_eq!(report.pending(), 4);
    assert!(executor.executed().is_empty());
    assert!(store.files().is_empty());
}

#[tokio::test]
async fn test_markers_can_be_disabled() {
    let store = Arc::new(MemoryStore::new());
    let config = seeds_config(2).with_markers(false);
    let scheduler =
        Scheduler::new(&config, Arc::new(ScriptedExecutor::default()), store.clone()).unwrap();

    let report = scheduler.run().await;
    assert_eq!(report.succeeded(), 2);
    assert_eq!(
        store.files(),
        vec![
            PathBuf::from("/results/seed=0/arguments.txt"),
            PathBuf::from("/results/seed=1/arguments.txt"),
        ]
    );
}

#[tokio::test]
async fn test_disabled_markers_rerun_finished_runs() {
    let executor = Arc::new(ScriptedExecutor::default());
    let store = Arc::new(MemoryStore::new());
    store.insert_file(marker("/results/seed=1"), "");
    let config = seeds_config(2).with_markers(false);
    let scheduler = Scheduler::new(&config, executor.clone(), store.clone()).unwrap();

    let status = scheduler.status().await.unwrap();
    assert_eq!((status.runnable(), status.finished), (2, 0));

    let report = scheduler.run().await;
    assert_eq!(report.skipped(), 0);
    assert_eq!(report.succeeded(), 2);
    assert_eq!(outcome_at(&report, "/results/seed=1").state, RunState::Succeeded);
    assert!(executor
        .executed_roots()
        .contains(Path::new("/results/seed=1")));
}

#[tokio::test(start_paused = true)]
async fn test_start_delay_and_stagger_space_run_starts() {
    let executor = Arc::new(ScriptedExecutor::with_delay(Duration::from_secs(30)));
    let config = seeds_config(3)
        .with_devices(vec!["0", "1", "2"])
        .with_start_delay(Duration::from_secs(5))
        .with_start_stagger(Duration::from_secs(2));
    let scheduler = Scheduler::new(&config, executor.clone(), Arc::new(MemoryStore::new())).unwrap();

    let t0 = Instant::now();
    let report = scheduler.run().await;
    assert_eq!(report.succeeded(), 3);

    let starts = executor.start_times();
    assert_eq!(starts.len(), 3);
    assert!(starts[0] >= t0 + Duration::from_secs(5));
    for pair in starts.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_secs(2));
    }
    // Runs still overlap; the stagger only spaces their starts.
    assert_eq!(executor.peak(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_runs_start_together_without_stagger() {
    let executor = Arc::new(ScriptedExecutor::with_delay(Duration::from_secs(1)));
    let config = seeds_config(3).with_devices(vec!["0", "1", "2"]);
    let scheduler = Scheduler::new(&config, executor.clone(), Arc::new(MemoryStore::new())).unwrap();

    let t0 = Instant::now();
    scheduler.run().await;
    assert!(executor.start_times().iter().all(|t| *t == t0));
}

#[tokio::test]
async fn test_cancel_leaves_remaining_runs_pending() {
    let executor = Arc::new(ScriptedExecutor::with_delay(Duration::from_millis(5)));
    let scheduler =
        Scheduler::new(&seeds_config(3), executor.clone(), Arc::new(MemoryStore::new())).unwrap();
    *executor.cancel_on_first.lock().unwrap() = Some(scheduler.cancel_handle());

    let report = scheduler.run().await;
    let executed = executor.executed();
    assert_eq!(executed.len(), 1);
    assert_eq!(report.outcome(executed[0]).unwrap().state, RunState::Succeeded);
    assert_eq!(report.pending(), 2);
}

#[tokio::test]
async fn test_duplicate_roots_rejected_before_dispatch() {
    let executor = Arc::new(ScriptedExecutor::default());
    let config = SweepConfig::new("train.py", "out", "/results/fixed").with_sweep("seed", vec![1, 2]);

    let err = Scheduler::new(&config, executor.clone(), Arc::new(MemoryStore::new()))
        .err()
        .unwrap();
    assert!(err.is_configuration());
    assert!(executor.executed().is_empty());
}
