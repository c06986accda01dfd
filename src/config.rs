//! Run configuration consumed by the runner.

use crate::error::ConfigError;
use serde_json::{Map, Value};
use std::path::PathBuf;

/// Environment label used when none is given.
pub const DEFAULT_SYSENV: &str = "generic:default";

/// Output prefix used when none is given.
pub const DEFAULT_PREFIX: &str = "out";

/// Everything a run needs besides the test definitions themselves.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Directory holding one definition per file.
    pub tests_dir: PathBuf,
    /// A test runs if it carries any of these tags, or always if empty.
    pub tags: Vec<String>,
    /// Environment label; selects the perflog subdirectory.
    pub sysenv: String,
    /// Per-invocation timeout in seconds.
    pub timeout: Option<u64>,
    /// Root under which `perflogs/` is written.
    pub prefix: PathBuf,
    /// Render and print commands without running or recording anything.
    pub dry_run: bool,
    /// Exposed to templates as `extra_args`. Always a JSON object.
    pub extra_args: Value,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            tests_dir: PathBuf::from("."),
            tags: Vec::new(),
            sysenv: DEFAULT_SYSENV.to_string(),
            timeout: None,
            prefix: PathBuf::from(DEFAULT_PREFIX),
            dry_run: false,
            extra_args: Value::Object(Map::new()),
        }
    }
}

/// Parse `--extra-args`, which must be a JSON object.
pub fn parse_extra_args(raw: &str) -> Result<Value, ConfigError> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| ConfigError::ExtraArgs(e.to_string()))?;
    if !value.is_object() {
        return Err(ConfigError::ExtraArgs("must be a JSON object".to_string()));
    }
    Ok(value)
}
