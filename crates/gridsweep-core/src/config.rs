//! Configuration types for gridsweep

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::device::{DeviceId, DeviceSet};
use crate::error::{SweepError, SweepResult};
use crate::params::ParamValue;
use crate::template::Template;

/// Default name of the environment variable that pins a run to its devices
pub const DEFAULT_DEVICE_ENV_VAR: &str = "CUDA_VISIBLE_DEVICES";

/// Separator between a flag and its value on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyValueSeparator {
    /// `--lr 0.1`
    #[default]
    Space,
    /// `--lr=0.1`
    Equals,
}

impl KeyValueSeparator {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyValueSeparator::Space => " ",
            KeyValueSeparator::Equals => "=",
        }
    }
}

/// How parameters are rendered as command-line flags
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandStyle {
    /// Prefix placed before every parameter name (may be empty)
    #[serde(default = "default_flag_prefix")]
    pub flag_prefix: String,
    /// Separator between name and value
    #[serde(default)]
    pub separator: KeyValueSeparator,
}

fn default_flag_prefix() -> String {
    "--".to_string()
}

impl Default for CommandStyle {
    fn default() -> Self {
        Self {
            flag_prefix: default_flag_prefix(),
            separator: KeyValueSeparator::Space,
        }
    }
}

/// How a run's process is launched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LauncherKind {
    /// Run the command line as is
    #[default]
    Direct,
    /// Wrap the command line with `torchrun`
    Torchrun,
}

/// Launch conventions handed to the executor
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LaunchSettings {
    #[serde(default)]
    pub launcher: LauncherKind,
    /// Add `CUDA_LAUNCH_BLOCKING=1` to every run
    #[serde(default)]
    pub launch_blocking: bool,
}

/// Device scheduling configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulingConfig {
    /// Devices available to the sweep
    pub devices: Vec<DeviceId>,
    /// Concurrent runs allowed per device
    pub max_jobs_per_device: usize,
    /// Give every run the whole device set
    pub distributed: bool,
    /// How often a blocked worker re-checks for a free slot
    pub poll_interval: Duration,
    /// Write a completion marker after a successful run
    pub write_markers: bool,
    /// Environment variable receiving the assigned devices
    pub device_env_var: String,
    /// Pause before the first run is dispatched
    pub start_delay: Duration,
    /// Minimum gap between two run starts, so a run can claim device memory
    /// before the next one is placed
    pub start_stagger: Duration,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            devices: vec![DeviceId::new("0")],
            max_jobs_per_device: 1,
            distributed: false,
            poll_interval: Duration::from_secs(60),
            write_markers: true,
            device_env_var: DEFAULT_DEVICE_ENV_VAR.to_string(),
            start_delay: Duration::ZERO,
            start_stagger: Duration::ZERO,
        }
    }
}

impl SchedulingConfig {
    /// Number of concurrent workers the dispatcher runs
    pub fn worker_count(&self) -> usize {
        if self.distributed {
            self.max_jobs_per_device
        } else {
            self.max_jobs_per_device.saturating_mul(self.devices.len())
        }
    }

    /// Validate and return the device set
    pub fn device_set(&self) -> SweepResult<DeviceSet> {
        DeviceSet::new(self.devices.clone())
    }

    pub fn validate(&self) -> SweepResult<()> {
        self.device_set()?;
        if self.max_jobs_per_device == 0 {
            return Err(SweepError::Config(
                "max_jobs_per_device must be positive".to_string(),
            ));
        }
        if !self.distributed
            && self
                .max_jobs_per_device
                .checked_mul(self.devices.len())
                .is_none()
        {
            return Err(SweepError::Config(format!(
                "max_jobs_per_device {} across {} devices overflows the worker count",
                self.max_jobs_per_device,
                self.devices.len()
            )));
        }
        if self.poll_interval.is_zero() {
            return Err(SweepError::Config(
                "poll interval must be positive".to_string(),
            ));
        }
        if self.device_env_var.trim().is_empty() {
            return Err(SweepError::Config(
                "device environment variable name is empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// A declared, non-swept parameter
#[derive(Debug, Clone, PartialEq)]
pub enum ParamEntry {
    /// Fixed value
    Value(ParamValue),
    /// Value derived from other parameters
    Template(Template),
}

/// Everything the core needs to materialize and dispatch a sweep
#[derive(Debug, Clone, PartialEq)]
pub struct SweepConfig {
    /// Interpreter prefix (e.g. `python3`); replaced by the launcher under torchrun
    pub exe: Option<String>,
    /// Script and fixed arguments of every command line (e.g. `train.py`)
    pub program: String,
    /// Base parameters and templates in declaration order
    pub params: Vec<(String, ParamEntry)>,
    /// Swept parameters and their candidate values
    pub grid: Vec<(String, Vec<ParamValue>)>,
    /// Parameter that receives the run's output root
    pub output_param: String,
    /// Template of the run's output root
    pub output_root: Template,
    pub scheduling: SchedulingConfig,
    pub style: CommandStyle,
    pub launch: LaunchSettings,
    /// Extra environment overrides applied to every run
    pub env: Vec<(String, String)>,
    /// Only render command lines
    pub dry_run: bool,
}

impl SweepConfig {
    /// Create a config with no parameters and default scheduling
    pub fn new(
        program: impl Into<String>,
        output_param: impl Into<String>,
        output_root: impl Into<Template>,
    ) -> Self {
        Self {
            exe: None,
            program: program.into(),
            params: Vec::new(),
            grid: Vec::new(),
            output_param: output_param.into(),
            output_root: output_root.into(),
            scheduling: SchedulingConfig::default(),
            style: CommandStyle::default(),
            launch: LaunchSettings::default(),
            env: Vec::new(),
            dry_run: false,
        }
    }

    /// Run the program under an interpreter
    pub fn with_exe(mut self, exe: impl Into<String>) -> Self {
        self.exe = Some(exe.into());
        self
    }

    /// Add a fixed parameter
    pub fn with_default(mut self, name: &str, value: impl Into<ParamValue>) -> Self {
        self.params
            .push((name.to_string(), ParamEntry::Value(value.into())));
        self
    }

    /// Add a parameter derived from a template
    pub fn with_template(mut self, name: &str, template: impl Into<Template>) -> Self {
        self.params
            .push((name.to_string(), ParamEntry::Template(template.into())));
        self
    }

    /// Add a swept parameter
    pub fn with_sweep<V: Into<ParamValue>>(mut self, name: &str, values: Vec<V>) -> Self {
        self.grid.push((
            name.to_string(),
            values.into_iter().map(Into::into).collect(),
        ));
        self
    }

    pub fn with_devices<D: Into<DeviceId>>(mut self, devices: Vec<D>) -> Self {
        self.scheduling.devices = devices.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_jobs_per_device(mut self, max_jobs: usize) -> Self {
        self.scheduling.max_jobs_per_device = max_jobs;
        self
    }

    pub fn with_distributed(mut self, distributed: bool) -> Self {
        self.scheduling.distributed = distributed;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.scheduling.poll_interval = interval;
        self
    }

    pub fn with_markers(mut self, write_markers: bool) -> Self {
        self.scheduling.write_markers = write_markers;
        self
    }

    pub fn with_start_delay(mut self, delay: Duration) -> Self {
        self.scheduling.start_delay = delay;
        self
    }

    pub fn with_start_stagger(mut self, stagger: Duration) -> Self {
        self.scheduling.start_stagger = stagger;
        self
    }

    pub fn with_env(mut self, name: &str, value: &str) -> Self {
        self.env.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Check everything that can be checked before materializing
    pub fn validate(&self) -> SweepResult<()> {
        if self.program.trim().is_empty() {
            return Err(SweepError::Config("program is empty".to_string()));
        }
        if self.exe.as_deref().is_some_and(|exe| exe.trim().is_empty()) {
            return Err(SweepError::Config("exe is empty".to_string()));
        }
        if self.output_param.trim().is_empty() {
            return Err(SweepError::Config("output_param is empty".to_string()));
        }
        self.scheduling.validate()
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Sweep file format (TOML)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepFile {
    pub sweep: SweepSettings,
    #[serde(default)]
    pub defaults: toml::Table,
    #[serde(default)]
    pub templates: toml::Table,
    #[serde(default)]
    pub grid: toml::Table,
    pub scheduling: SchedulingSettings,
    #[serde(default)]
    pub command: CommandStyle,
    #[serde(default)]
    pub launch: LaunchSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Extra environment overrides
    #[serde(default)]
    pub env: toml::Table,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepSettings {
    #[serde(default)]
    pub exe: Option<String>,
    pub program: String,
    pub output_param: String,
    pub output_root: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingSettings {
    pub devices: Vec<toml::Value>,
    pub max_jobs_per_device: i64,
    #[serde(default)]
    pub distributed: bool,
    pub poll_interval_secs: Option<f64>,
    pub write_markers: Option<bool>,
    pub device_env_var: Option<String>,
    pub start_delay_secs: Option<f64>,
    pub start_stagger_secs: Option<f64>,
}

impl SweepFile {
    /// Load a sweep file
    pub fn from_file(path: &Path) -> SweepResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SweepError::Config(format!("Failed to read sweep file: {}", e)))?;
        Self::parse(&content)
    }

    /// Parse sweep file contents
    pub fn parse(content: &str) -> SweepResult<Self> {
        toml::from_str(content)
            .map_err(|e| SweepError::Config(format!("Failed to parse sweep file: {}", e)))
    }

    /// Convert into a validated [`SweepConfig`]
    pub fn into_config(self) -> SweepResult<SweepConfig> {
        let mut config = SweepConfig::new(
            self.sweep.program,
            self.sweep.output_param,
            self.sweep.output_root,
        );
        config.exe = self.sweep.exe;

        for (name, value) in self.defaults {
            let value = param_value(&name, value)?;
            config.params.push((name, ParamEntry::Value(value)));
        }
        for (name, value) in self.templates {
            let toml::Value::String(source) = value else {
                return Err(SweepError::Config(format!(
                    "template '{}' must be a string",
                    name
                )));
            };
            config
                .params
                .push((name, ParamEntry::Template(Template::new(source))));
        }
        for (name, value) in self.grid {
            let toml::Value::Array(items) = value else {
                return Err(SweepError::Config(format!(
                    "grid entry '{}' must be an array",
                    name
                )));
            };
            let values = items
                .into_iter()
                .map(|item| param_value(&name, item))
                .collect::<SweepResult<Vec<_>>>()?;
            config.grid.push((name, values));
        }
        for (name, value) in self.env {
            let value = param_value(&name, value)?;
            config.env.push((name, value.to_string()));
        }

        let sched = self.scheduling;
        if sched.max_jobs_per_device <= 0 {
            return Err(SweepError::Config(format!(
                "max_jobs_per_device must be positive, got {}",
                sched.max_jobs_per_device
            )));
        }
        config.scheduling.devices = sched
            .devices
            .into_iter()
            .map(device_id)
            .collect::<SweepResult<Vec<_>>>()?;
        config.scheduling.max_jobs_per_device = sched.max_jobs_per_device as usize;
        config.scheduling.distributed = sched.distributed;
        if let Some(secs) = sched.poll_interval_secs {
            config.scheduling.poll_interval = seconds("poll_interval_secs", secs)?;
        }
        if let Some(write_markers) = sched.write_markers {
            config.scheduling.write_markers = write_markers;
        }
        if let Some(var) = sched.device_env_var {
            config.scheduling.device_env_var = var;
        }
        if let Some(secs) = sched.start_delay_secs {
            config.scheduling.start_delay = seconds("start_delay_secs", secs)?;
        }
        if let Some(secs) = sched.start_stagger_secs {
            config.scheduling.start_stagger = seconds("start_stagger_secs", secs)?;
        }

        config.style = self.command;
        config.launch = self.launch;
        config.validate()?;
        Ok(config)
    }
}

fn seconds(key: &str, secs: f64) -> SweepResult<Duration> {
    Duration::try_from_secs_f64(secs)
        .map_err(|e| SweepError::Config(format!("invalid {} {}: {}", key, secs, e)))
}

fn device_id(value: toml::Value) -> SweepResult<DeviceId> {
    match value {
        toml::Value::String(s) => Ok(DeviceId::new(s)),
        toml::Value::Integer(i) if i >= 0 => Ok(DeviceId::new(i.to_string())),
        other => Err(SweepError::Devices(format!(
            "device ids must be strings or non-negative integers, got {}",
            other
        ))),
    }
}

fn param_value(name: &str, value: toml::Value) -> SweepResult<ParamValue> {
    match value {
        toml::Value::String(s) => Ok(ParamValue::Str(s)),
        toml::Value::Integer(i) => Ok(ParamValue::Int(i)),
        toml::Value::Float(x) => Ok(ParamValue::Float(x)),
        toml::Value::Boolean(b) => Ok(ParamValue::Bool(b)),
        toml::Value::Datetime(d) => Ok(ParamValue::Str(d.to_string())),
        toml::Value::Array(items) => items
            .into_iter()
            .map(|item| param_value(name, item))
            .collect::<SweepResult<Vec<_>>>()
            .map(ParamValue::List),
        toml::Value::Table(_) => Err(SweepError::Config(format!(
            "parameter '{}' cannot be a table",
            name
        ))),
    }
}
