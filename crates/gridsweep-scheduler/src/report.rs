//! Per-run outcomes and the sweep report

use chrono::{DateTime, Utc};
use gridsweep_core::{DeviceId, RunSpec};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Lifecycle state of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    /// Not dispatched (yet)
    Pending,
    /// Completion marker already present
    Skipped,
    /// Holding a slot and executing
    Running,
    /// Exited with code zero
    Succeeded,
    /// Non-zero exit, executor error or storage failure
    Failed,
}

impl RunState {
    /// Whether the run reached a final state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Skipped | RunState::Succeeded | RunState::Failed
        )
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Pending => write!(f, "pending"),
            RunState::Skipped => write!(f, "skipped"),
            RunState::Running => write!(f, "running"),
            RunState::Succeeded => write!(f, "succeeded"),
            RunState::Failed => write!(f, "failed"),
        }
    }
}

/// What happened to one run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunOutcome {
    pub index: usize,
    pub state: RunState,
    pub command: String,
    pub output_root: PathBuf,
    pub devices: Vec<DeviceId>,
    pub exit_code: Option<i32>,
    /// Failure reason
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunOutcome {
    /// Outcome of a run that has not been dispatched
    pub fn pending(run: &RunSpec) -> Self {
        Self {
            index: run.index,
            state: RunState::Pending,
            command: run.command.to_string(),
            output_root: run.output_root.clone(),
            devices: Vec::new(),
            exit_code: None,
            error: None,
            started_at: None,
            finished_at: None,
        }
    }

    pub(crate) fn start(&mut self, devices: &[DeviceId]) {
        self.state = RunState::Running;
        self.devices = devices.to_vec();
        self.started_at = Some(Utc::now());
    }

    pub(crate) fn succeed(&mut self) {
        self.state = RunState::Succeeded;
        self.exit_code = Some(0);
        self.finished_at = Some(Utc::now());
    }

    pub(crate) fn fail(&mut self, exit_code: Option<i32>, reason: String) {
        self.state = RunState::Failed;
        self.exit_code = exit_code;
        self.error = Some(reason);
        self.finished_at = Some(Utc::now());
    }
}

/// Result of dispatching a sweep
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    /// Outcomes ordered by run index
    pub outcomes: Vec<RunOutcome>,
}

impl SweepReport {
    /// Build a report, sorting outcomes by run index
    pub fn new(mut outcomes: Vec<RunOutcome>) -> Self {
        outcomes.sort_by_key(|o| o.index);
        Self { outcomes }
    }

    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    /// Number of runs in `state`
    pub fn count(&self, state: RunState) -> usize {
        self.outcomes.iter().filter(|o| o.state == state).count()
    }

    pub fn succeeded(&self) -> usize {
        self.count(RunState::Succeeded)
    }

    pub fn failed(&self) -> usize {
        self.count(RunState::Failed)
    }

    pub fn skipped(&self) -> usize {
        self.count(RunState::Skipped)
    }

    pub fn pending(&self) -> usize {
        self.count(RunState::Pending)
    }

    /// Outcome of a run by index
    pub fn outcome(&self, index: usize) -> Option<&RunOutcome> {
        self.outcomes.iter().find(|o| o.index == index)
    }

    /// Failed runs
    pub fn failures(&self) -> impl Iterator<Item = &RunOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.state == RunState::Failed)
    }

    /// True when no run failed
    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }
}

impl fmt::Display for SweepReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Total {}  Succeeded {}  Failed {}  Skipped {}  Pending {}",
            self.total(),
            self.succeeded(),
            self.failed(),
            self.skipped(),
            self.pending()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(index: usize, state: RunState) -> RunOutcome {
        RunOutcome {
            index,
            state,
            command: format!("train.py --seed {}", index),
            output_root: PathBuf::from(format!("/results/{}", index)),
            devices: Vec::new(),
            exit_code: None,
            error: None,
            started_at: None,
            finished_at: None,
        }
    }

    #[test]
    fn test_report_counters() {
        let report = SweepReport::new(vec![
            outcome(3, RunState::Failed),
            outcome(0, RunState::Succeeded),
            outcome(2, RunState::Skipped),
            outcome(1, RunState::Succeeded),
            outcome(4, RunState::Pending),
        ]);

        assert_eq!(report.total(), 5);
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.skipped(), 1);
        assert_eq!(report.pending(), 1);
        assert!(!report.is_success());

        let indices: Vec<usize> = report.outcomes.iter().map(|o| o.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
        assert_eq!(report.failures().next().map(|o| o.index), Some(3));
        assert_eq!(
            report.to_string(),
            "Total 5  Succeeded 2  Failed 1  Skipped 1  Pending 1"
        );
    }

    #[test]
    fn test_outcome_transitions() {
        let mut run = outcome(0, RunState::Pending);
        run.start(&[DeviceId::new("1")]);
        assert_eq!(run.state, RunState::Running);
        assert!(!run.state.is_terminal());
        assert!(run.started_at.is_some());

        run.fail(Some(2), "exited with code 2".to_string());
        assert_eq!(run.state, RunState::Failed);
        assert!(run.state.is_terminal());
        assert_eq!(run.exit_code, Some(2));
        assert_eq!(run.devices, vec![DeviceId::new("1")]);
    }

    #[test]
    fn test_state_serializes_lowercase() {
        let json = serde_json::to_string(&RunState::Succeeded).unwrap();
        assert_eq!(json, "\"succeeded\"");
        assert_eq!(RunState::Skipped.to_string(), "skipped");
    }
}
