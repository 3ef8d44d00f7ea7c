//! Run specifications produced by the materializer

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

use crate::params::ParameterSet;

/// Name of the empty file marking a successful run
pub const MARKER_FILE: &str = "state.finished";

/// Name of the file recording a run's resolved parameters
pub const ARGUMENTS_FILE: &str = "arguments.txt";

/// Rendered command line of one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandLine {
    /// Interpreter the program runs under, e.g. `python3` or `composer`
    pub exe: Option<String>,
    /// Script and fixed arguments, e.g. `train.py`
    pub program: String,
    /// One rendered flag per bound parameter, e.g. `--epochs 100`
    pub flags: Vec<String>,
}

impl CommandLine {
    /// The command without its interpreter, for launchers that supply their own
    pub fn script_line(&self) -> String {
        let mut line = self.program.clone();
        for flag in &self.flags {
            line.push(' ');
            line.push_str(flag);
        }
        line
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(exe) = &self.exe {
            write!(f, "{} ", exe)?;
        }
        f.write_str(&self.script_line())
    }
}

/// A template parameter after resolution for one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedTemplate {
    /// Escaped parameter name
    pub name: String,
    /// Resolved text
    pub text: String,
    /// Resolved once from the base parameters and shared by every run
    pub frozen: bool,
}

/// One element of the sweep, ready to dispatch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSpec {
    /// Position in the sweep, zero based
    pub index: usize,
    /// Every resolved parameter, in command-line order
    pub params: ParameterSet,
    /// Resolved output root of the run
    pub output_root: PathBuf,
    /// Rendered command line
    pub command: CommandLine,
    /// Template parameters and how they were resolved
    pub templates: Vec<ResolvedTemplate>,
}

impl RunSpec {
    /// Path of the completion marker
    pub fn marker_path(&self) -> PathBuf {
        self.output_root.join(MARKER_FILE)
    }

    /// Path of the argument record
    pub fn arguments_path(&self) -> PathBuf {
        self.output_root.join(ARGUMENTS_FILE)
    }
}
