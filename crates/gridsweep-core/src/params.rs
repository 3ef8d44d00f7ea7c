//! Parameter values and the ordered parameter set

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Escape sequences standing in for characters that are awkward in keys
const ESCAPES: [(&str, &str); 2] = [(".", "DOT"), ("-", "DASH")];

/// Replace `.` and `-` in a parameter name with `DOT` and `DASH`
///
/// `training.lr` becomes `trainingDOTlr`, which is a valid placeholder name.
pub fn escape_name(name: &str) -> String {
    ESCAPES
        .iter()
        .fold(name.to_string(), |acc, (raw, escaped)| acc.replace(raw, escaped))
}

/// Reverse [`escape_name`] for rendering on the command line
pub fn unescape_name(name: &str) -> String {
    ESCAPES
        .iter()
        .fold(name.to_string(), |acc, (raw, escaped)| acc.replace(escaped, raw))
}

/// A resolved parameter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<ParamValue>),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(b) => write!(f, "{}", b),
            ParamValue::Int(i) => write!(f, "{}", i),
            ParamValue::Float(x) => write!(f, "{}", x),
            ParamValue::Str(s) => f.write_str(s),
            ParamValue::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{}", item)?;
                }
                Ok(())
            }
        }
    }
}

impl From<bool> for ParamValue {
    fn from(b: bool) -> Self {
        ParamValue::Bool(b)
    }
}

impl From<i64> for ParamValue {
    fn from(i: i64) -> Self {
        ParamValue::Int(i)
    }
}

impl From<i32> for ParamValue {
    fn from(i: i32) -> Self {
        ParamValue::Int(i64::from(i))
    }
}

impl From<f64> for ParamValue {
    fn from(x: f64) -> Self {
        ParamValue::Float(x)
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::Str(s.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        ParamValue::Str(s)
    }
}

impl<T: Into<ParamValue>> From<Vec<T>> for ParamValue {
    fn from(items: Vec<T>) -> Self {
        ParamValue::List(items.into_iter().map(Into::into).collect())
    }
}

/// Ordered mapping from parameter name to value
///
/// Names are stored escaped (see [`escape_name`]). Re-inserting a name keeps
/// its original position and replaces the value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSet {
    entries: Vec<(String, ParamValue)>,
}

impl ParameterSet {
    /// Create an empty parameter set
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a parameter
    pub fn insert(&mut self, name: &str, value: impl Into<ParamValue>) {
        let name = escape_name(name);
        let value = value.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Look up a parameter by name (escaped or not)
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        let name = escape_name(name);
        self.entries.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
    }

    /// Whether a parameter is bound
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Iterate over `(escaped name, value)` in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Number of parameters
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Merge another set into this one, replacing existing names
    pub fn extend(&mut self, other: &ParameterSet) {
        for (name, value) in other.iter() {
            self.insert(name, value.clone());
        }
    }

    /// Render as `key=value` lines, the format of a run's argument record
    pub fn to_record(&self) -> String {
        self.entries
            .iter()
            .map(|(name, value)| format!("{}={}\n", name, value))
            .collect()
    }
}

impl Serialize for ParameterSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, value) in &self.entries {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}
