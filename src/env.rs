//! Environment overlay for the child process.

use crate::params::Binding;
use crate::template::display_value;
use indexmap::IndexMap;
use serde_json::Value;

/// Variables to set on top of the inherited environment.
///
/// The test's static `env` comes first and the binding overrides it, so each
/// parameter is also visible to the command as a variable of the same name.
pub fn overlay(static_env: &IndexMap<String, Value>, binding: &Binding) -> IndexMap<String, String> {
    let mut vars: IndexMap<String, String> = static_env
        .iter()
        .map(|(k, v)| (k.clone(), display_value(v)))
        .collect();
    for (key, value) in binding.iter() {
        vars.insert(key.to_string(), display_value(value));
    }
    vars
}
