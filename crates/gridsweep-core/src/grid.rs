//! Cartesian product over swept parameter values
//!
//! Value lists are deduplicated before the product is taken. The order of
//! parameter names follows the input; the order of values inside a
//! deduplicated list is not part of the contract, so callers should only rely
//! on every combination appearing exactly once.

use std::collections::HashSet;

use crate::params::{escape_name, ParamValue, ParameterSet};

/// One swept parameter and its candidate values
#[derive(Debug, Clone, PartialEq)]
pub struct GridAxis {
    /// Escaped parameter name
    pub name: String,
    /// Deduplicated candidate values
    pub values: Vec<ParamValue>,
}

/// Lazy Cartesian product of swept parameters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GridExpander {
    axes: Vec<GridAxis>,
}

impl GridExpander {
    /// Build an expander from `(name, values)` pairs
    ///
    /// A name listed twice keeps its first position and takes the later list.
    pub fn new<I, S>(lists: I) -> Self
    where
        I: IntoIterator<Item = (S, Vec<ParamValue>)>,
        S: AsRef<str>,
    {
        let mut axes: Vec<GridAxis> = Vec::new();
        for (name, values) in lists {
            let axis = GridAxis {
                name: escape_name(name.as_ref()),
                values: dedup(values),
            };
            match axes.iter_mut().find(|a| a.name == axis.name) {
                Some(existing) => *existing = axis,
                None => axes.push(axis),
            }
        }
        Self { axes }
    }

    /// The swept axes in order
    pub fn axes(&self) -> &[GridAxis] {
        &self.axes
    }

    /// Number of assignments the product yields, or `None` if it does not
    /// fit in a `usize`
    pub fn checked_len(&self) -> Option<usize> {
        self.axes
            .iter()
            .try_fold(1usize, |acc, a| acc.checked_mul(a.values.len()))
    }

    /// Number of assignments the product yields, saturating at `usize::MAX`
    pub fn len(&self) -> usize {
        self.checked_len().unwrap_or(usize::MAX)
    }

    /// Whether the product is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate over every assignment; can be called any number of times
    pub fn iter(&self) -> GridIter<'_> {
        GridIter {
            axes: &self.axes,
            cursor: vec![0; self.axes.len()],
            remaining: self.len(),
        }
    }
}

impl<'a> IntoIterator for &'a GridExpander {
    type Item = ParameterSet;
    type IntoIter = GridIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over the assignments of a [`GridExpander`]
///
/// The last axis varies fastest.
#[derive(Debug, Clone)]
pub struct GridIter<'a> {
    axes: &'a [GridAxis],
    cursor: Vec<usize>,
    remaining: usize,
}

impl Iterator for GridIter<'_> {
    type Item = ParameterSet;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let mut assignment = ParameterSet::new();
        for (axis, &pos) in self.axes.iter().zip(&self.cursor) {
            assignment.insert(&axis.name, axis.values[pos].clone());
        }

        for (axis, pos) in self.axes.iter().zip(self.cursor.iter_mut()).rev() {
            *pos += 1;
            if *pos < axis.values.len() {
                break;
            }
            *pos = 0;
        }

        Some(assignment)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for GridIter<'_> {}

fn dedup(values: Vec<ParamValue>) -> Vec<ParamValue> {
    let mut seen = HashSet::new();
    values
        .into_iter()
        .filter(|v| seen.insert(v.to_string()))
        .collect()
}
