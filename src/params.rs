//! Cartesian expansion of a test's parameter space.

use crate::template::display_value;
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::BTreeMap;

/// One concrete assignment of every parameter, in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Binding {
    pairs: Vec<(String, Value)>,
}

impl Binding {
    pub fn from_pairs(pairs: Vec<(String, Value)>) -> Self {
        Self { pairs }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Key-sorted map, used wherever the binding is serialized.
    pub fn to_sorted_map(&self) -> BTreeMap<&str, &Value> {
        self.iter().collect()
    }

    /// Parameter values right-aligned in fixed-width columns, for log lines.
    pub fn columns(&self) -> String {
        self.pairs
            .iter()
            .map(|(_, v)| format!("{:>14}", display_value(v)))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Every combination of parameter values.
///
/// The first key varies slowest. No parameters yields exactly one empty
/// binding so that parameter-less tests still run once.
pub fn expand(params: &IndexMap<String, Vec<Value>>) -> Vec<Binding> {
    let mut bindings = vec![Binding::default()];

    for (key, values) in params {
        let mut next = Vec::with_capacity(bindings.len() * values.len());
        for prefix in &bindings {
            for value in values {
                let mut pairs = prefix.pairs.clone();
                pairs.push((key.clone(), value.clone()));
                next.push(Binding { pairs });
            }
        }
        bindings = next;
    }

    bindings
}
