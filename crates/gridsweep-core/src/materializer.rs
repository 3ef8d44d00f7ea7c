//! Turns grid assignments into runnable [`RunSpec`]s

use std::collections::HashMap;
use std::path::PathBuf;
use tracing::debug;

use crate::config::{CommandStyle, ParamEntry, SweepConfig};
use crate::error::{SweepError, SweepResult};
use crate::grid::GridExpander;
use crate::params::{escape_name, unescape_name, ParamValue, ParameterSet};
use crate::run::{CommandLine, ResolvedTemplate, RunSpec};
use crate::template::Template;

/// A declared parameter as seen by the materializer
#[derive(Debug, Clone)]
enum Slot {
    Value(ParamValue),
    /// Template resolved from base parameters alone
    Frozen(String),
    /// Template that depends on swept parameters
    Pending(Template),
}

/// Builds one [`RunSpec`] per element of the grid
#[derive(Debug, Clone)]
pub struct RunMaterializer {
    exe: Option<String>,
    program: String,
    style: CommandStyle,
    slots: Vec<(String, Slot)>,
    output_param: String,
    output_root: Template,
    grid: GridExpander,
}

impl RunMaterializer {
    /// Prepare a materializer, freezing every template the base parameters
    /// already determine
    pub fn new(config: &SweepConfig) -> SweepResult<Self> {
        let grid = GridExpander::new(config.grid.iter().map(|(n, v)| (n.as_str(), v.clone())));
        if grid.checked_len().is_none() {
            return Err(SweepError::Config(format!(
                "grid over {} parameters has more runs than can be counted",
                grid.axes().len()
            )));
        }
        let swept = |name: &str| grid.axes().iter().any(|a| a.name == name);

        let mut slots: Vec<(String, Slot)> = Vec::new();
        for (name, entry) in &config.params {
            let name = escape_name(name);
            let slot = match entry {
                ParamEntry::Value(v) => Slot::Value(v.clone()),
                ParamEntry::Template(t) => Slot::Pending(t.clone()),
            };
            match slots.iter_mut().find(|(n, _)| *n == name) {
                Some(existing) => existing.1 = slot,
                None => slots.push((name, slot)),
            }
        }

        // Swept names are left out so a template never freezes on a default
        // that the grid overrides.
        let mut base = ParameterSet::new();
        for (name, slot) in &slots {
            if let Slot::Value(v) = slot {
                if !swept(name.as_str()) {
                    base.insert(name, v.clone());
                }
            }
        }

        loop {
            let mut progress = false;
            for (name, slot) in slots.iter_mut() {
                let Slot::Pending(template) = slot else {
                    continue;
                };
                if swept(name.as_str()) {
                    continue;
                }
                let resolution = template.resolve(&base);
                if resolution.fully_resolved {
                    debug!(param = %name, value = %resolution.text, "Template frozen");
                    base.insert(name, resolution.text.clone());
                    *slot = Slot::Frozen(resolution.text);
                    progress = true;
                }
            }
            if !progress {
                break;
            }
        }

        Ok(Self {
            exe: config.exe.clone(),
            program: config.program.clone(),
            style: config.style.clone(),
            slots,
            output_param: escape_name(&config.output_param),
            output_root: config.output_root.clone(),
            grid,
        })
    }

    /// The grid this materializer walks
    pub fn grid(&self) -> &GridExpander {
        &self.grid
    }

    /// Number of runs in the sweep
    pub fn len(&self) -> usize {
        self.grid.len()
    }

    /// Whether the sweep has no runs
    pub fn is_empty(&self) -> bool {
        self.grid.is_empty()
    }

    /// Build the run for assignment `index`
    pub fn materialize(&self, index: usize, assignment: &ParameterSet) -> SweepResult<RunSpec> {
        let mut bindings = ParameterSet::new();
        for (name, slot) in &self.slots {
            match slot {
                Slot::Value(v) => bindings.insert(name, v.clone()),
                Slot::Frozen(text) => bindings.insert(name, text.as_str()),
                Slot::Pending(_) => {}
            }
        }
        bindings.extend(assignment);

        let mut pending: Vec<(&str, &Template)> = self
            .slots
            .iter()
            .filter_map(|(name, slot)| match slot {
                Slot::Pending(t) if !assignment.contains(name) => Some((name.as_str(), t)),
                _ => None,
            })
            .collect();
        let mut resolved: HashMap<&str, String> = HashMap::new();

        // Templates may reference each other, so sweep until nothing changes.
        loop {
            let before = pending.len();
            pending.retain(|&(name, template)| {
                let resolution = template.resolve(&bindings);
                if resolution.fully_resolved {
                    bindings.insert(name, resolution.text.as_str());
                    resolved.insert(name, resolution.text);
                    false
                } else {
                    true
                }
            });
            if pending.is_empty() || pending.len() == before {
                break;
            }
        }

        if let Some((name, template)) = pending.first() {
            return Err(unresolved(name, template, &bindings));
        }

        let mut params = ParameterSet::new();
        let mut templates = Vec::new();
        for (name, slot) in &self.slots {
            if assignment.contains(name) {
                continue;
            }
            match slot {
                Slot::Value(v) => params.insert(name, v.clone()),
                Slot::Frozen(text) => {
                    params.insert(name, text.as_str());
                    templates.push(ResolvedTemplate {
                        name: name.clone(),
                        text: text.clone(),
                        frozen: true,
                    });
                }
                Slot::Pending(_) => {
                    let text = resolved.remove(name.as_str()).unwrap_or_default();
                    params.insert(name, text.as_str());
                    templates.push(ResolvedTemplate {
                        name: name.clone(),
                        text,
                        frozen: false,
                    });
                }
            }
        }
        params.extend(assignment);

        let root = self.output_root.resolve(&params);
        if !root.fully_resolved {
            return Err(unresolved(&self.output_param, &self.output_root, &params));
        }
        params.insert(&self.output_param, root.text.as_str());

        let command = self.render(&params);
        debug!(run = index, command = %command, "Run materialized");

        Ok(RunSpec {
            index,
            params,
            output_root: PathBuf::from(root.text),
            command,
            templates,
        })
    }

    /// Materialize every run of the sweep, in grid order
    ///
    /// Fails if two runs resolve to the same output root.
    pub fn materialize_all(&self) -> SweepResult<Vec<RunSpec>> {
        let mut runs = Vec::with_capacity(self.len());
        let mut roots: HashMap<PathBuf, usize> = HashMap::new();

        for (index, assignment) in self.grid.iter().enumerate() {
            let run = self.materialize(index, &assignment)?;
            if let Some(&first) = roots.get(&run.output_root) {
                return Err(SweepError::DuplicateOutputRoot {
                    first,
                    second: index,
                    root: run.output_root.display().to_string(),
                });
            }
            roots.insert(run.output_root.clone(), index);
            runs.push(run);
        }

        Ok(runs)
    }

    /// Render the flags for a parameter set
    pub fn render(&self, params: &ParameterSet) -> CommandLine {
        let prefix = &self.style.flag_prefix;
        let separator = self.style.separator.as_str();

        let flags = params
            .iter()
            .filter_map(|(name, value)| {
                let flag = format!("{}{}", prefix, unescape_name(name));
                match value {
                    ParamValue::Bool(true) => Some(flag),
                    ParamValue::Bool(false) => None,
                    other => Some(format!("{}{}{}", flag, separator, other)),
                }
            })
            .collect();

        CommandLine {
            exe: self.exe.clone(),
            program: self.program.clone(),
            flags,
        }
    }
}

fn unresolved(name: &str, template: &Template, bindings: &ParameterSet) -> SweepError {
    let mut missing = template.missing(bindings);
    if missing.is_empty() {
        // Every name was bound, but a value brought in a placeholder of its own.
        missing = Template::new(template.resolve(bindings).text).missing(bindings);
    }
    SweepError::UnresolvedTemplate {
        name: unescape_name(name),
        template: template.source().to_string(),
        missing,
    }
}
