//! Placeholder templates with deferred resolution
//!
//! A template references parameters as `${name}` or `$name`; `$$` stands for a
//! literal `$`. Resolution never fails: when a referenced name is not bound yet
//! the template comes back unchanged and flagged as unresolved, so it can be
//! retried once more bindings exist.

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

use crate::params::ParameterSet;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(?:(\$)|\{([A-Za-z_][A-Za-z0-9_]*)\}|([A-Za-z_][A-Za-z0-9_]*))")
        .expect("placeholder pattern is valid")
});

/// Name referenced by a match, or `None` for the `$$` escape
fn placeholder_name<'t>(caps: &Captures<'t>) -> Option<&'t str> {
    caps.get(2).or_else(|| caps.get(3)).map(|m| m.as_str())
}

fn has_placeholders(text: &str) -> bool {
    PLACEHOLDER
        .captures_iter(text)
        .any(|caps| placeholder_name(&caps).is_some())
}

/// Outcome of resolving a template against a set of bindings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Substituted text, or the original template if anything was missing
    pub text: String,
    /// True iff no placeholder remains in `text`
    pub fully_resolved: bool,
}

/// A string with named placeholders
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Template {
    source: String,
}

impl Template {
    /// Create a template from its source text
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    /// The unresolved source text
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Names referenced by this template, in order of first appearance
    pub fn placeholders(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for caps in PLACEHOLDER.captures_iter(&self.source) {
            let Some(name) = placeholder_name(&caps) else {
                continue;
            };
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
        names
    }

    /// Referenced names that `bindings` does not provide
    pub fn missing(&self, bindings: &ParameterSet) -> Vec<String> {
        self.placeholders()
            .into_iter()
            .filter(|name| !bindings.contains(name))
            .collect()
    }

    /// Substitute every placeholder from `bindings`
    ///
    /// All or nothing: if any referenced name is unbound, the source text is
    /// returned untouched with `fully_resolved == false`. Each `$$` becomes a
    /// single `$`, so resolving an output that came from an escape is not
    /// idempotent.
    pub fn resolve(&self, bindings: &ParameterSet) -> Resolution {
        if !self.missing(bindings).is_empty() {
            return Resolution {
                text: self.source.clone(),
                fully_resolved: false,
            };
        }

        // A bound value may itself carry placeholder syntax.
        let mut introduced = false;
        let text = PLACEHOLDER
            .replace_all(&self.source, |caps: &Captures<'_>| {
                let Some(name) = placeholder_name(caps) else {
                    return "$".to_string();
                };
                match bindings.get(name) {
                    Some(value) => {
                        let value = value.to_string();
                        introduced |= has_placeholders(&value);
                        value
                    }
                    None => caps[0].to_string(),
                }
            })
            .into_owned();

        Resolution {
            text,
            fully_resolved: !introduced,
        }
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl From<&str> for Template {
    fn from(s: &str) -> Self {
        Template::new(s)
    }
}

impl From<String> for Template {
    fn from(s: String) -> Self {
        Template::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bindings(pairs: &[(&str, &str)]) -> ParameterSet {
        let mut params = ParameterSet::new();
        for (name, value) in pairs {
            params.insert(name, *value);
        }
        params
    }

    #[test]
    fn test_resolve_both_placeholder_forms() {
        let template = Template::new("lr=${lr}_wd=$wd");
        let resolution = template.resolve(&bindings(&[("lr", "1e-3"), ("wd", "1e-2")]));

        assert_eq!(resolution.text, "lr=1e-3_wd=1e-2");
        assert!(resolution.fully_resolved);
    }

    #[test]
    fn test_missing_binding_returns_template_unchanged() {
        let template = Template::new("cifar10_E=${epochs}_seed=${seed}");
        let resolution = template.resolve(&bindings(&[("epochs", "100")]));

        assert_eq!(resolution.text, "cifar10_E=${epochs}_seed=${seed}");
        assert!(!resolution.fully_resolved);
        assert_eq!(
            template.missing(&bindings(&[("epochs", "100")])),
            vec!["seed".to_string()]
        );
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let b = bindings(&[("project", "cifar10"), ("seed", "3")]);
        let first = Template::new("./results/${project}/seed=${seed}").resolve(&b);
        let second = Template::new(first.text.clone()).resolve(&b);

        assert!(first.fully_resolved);
        assert_eq!(first, second);
    }

    #[test]
    fn test_literal_dollar_is_kept() {
        let resolution = Template::new("cost $5 at ${site}").resolve(&bindings(&[("site", "a")]));
        assert_eq!(resolution.text, "cost $5 at a");
        assert!(resolution.fully_resolved);
    }

    #[test]
    fn test_value_with_placeholder_is_not_fully_resolved() {
        let resolution = Template::new("${name}").resolve(&bindings(&[("name", "${other}")]));
        assert_eq!(resolution.text, "${other}");
        assert!(!resolution.fully_resolved);
    }

    #[test]
    fn test_double_dollar_is_literal() {
        let template = Template::new("$$HOME/runs/${seed}/$$");
        assert_eq!(template.placeholders(), vec!["seed".to_string()]);

        let resolution = template.resolve(&bindings(&[("seed", "7")]));
        assert_eq!(resolution.text, "$HOME/runs/7/$");
        assert!(resolution.fully_resolved);

        let unbound = Template::new("$$HOME").resolve(&ParameterSet::new());
        assert_eq!(unbound.text, "$HOME");
        assert!(unbound.fully_resolved);
    }

    #[test]
    fn test_escaped_names_resolve() {
        let mut b = ParameterSet::new();
        b.insert("training.lr", "0.1");
        let resolution = Template::new("lr=${trainingDOTlr}").resolve(&b);
        assert_eq!(resolution.text, "lr=0.1");
    }

    #[test]
    fn test_placeholders_deduplicated() {
        let template = Template::new("${a}/${b}/$a");
        assert_eq!(template.placeholders(), vec!["a".to_string(), "b".to_string()]);
    }
}
