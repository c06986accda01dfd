//! Schema definitions for unframe test definitions.
//!
//! One file holds one test. A test names a parameter space, a job template
//! that becomes the command line, and optional Rhai scripts that turn the
//! captured output into a structured result and judge it.

use crate::error::SpecError;
use crate::template::{self, Token};
use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::path::PathBuf;

/// A single test definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct TestSpec {
    /// Test name. Defaults to the file stem of the definition.
    #[serde(default)]
    pub name: String,

    /// Optional description.
    #[serde(default)]
    pub description: Option<String>,

    /// Tags used by `--tag` filtering.
    #[serde(default)]
    pub tags: Vec<String>,

    /// Parameter space. Every combination of values runs once; the first
    /// key varies slowest.
    #[serde(default)]
    pub params: IndexMap<String, Vec<Value>>,

    /// Static environment variables for the command.
    #[serde(default)]
    pub env: IndexMap<String, Value>,

    /// Command template. Each entry is rendered and shell-split, except an
    /// entry that is exactly `{{ snippet.NAME }}`, which becomes one argument.
    #[serde(alias = "command", deserialize_with = "job_tokens")]
    #[schemars(with = "Vec<String>")]
    pub job: Vec<String>,

    /// Named multi-line blocks injectable into the job.
    #[serde(default)]
    pub snippets: Vec<Snippet>,

    /// Rhai source defining `fn parse(text, params)`.
    #[serde(default, rename = "parse")]
    pub parse_code: Option<String>,

    /// Rhai source defining `fn validate(results, params)`.
    #[serde(default, rename = "validate")]
    pub validate_code: Option<String>,

    /// Working directory for the command (defaults to the current directory).
    #[serde(default)]
    pub workdir: Option<PathBuf>,
}

/// A named block of text injected as a single argument.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Snippet {
    /// Name referenced as `{{ snippet.NAME }}`.
    pub name: String,
    /// Raw content, rendered against the same context as the job.
    pub content: String,
}

impl TestSpec {
    /// Look up a snippet body by name.
    pub fn snippet(&self, name: &str) -> Option<&str> {
        self.snippets
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.content.as_str())
    }

    /// Whether this test should run under the given tag filter.
    ///
    /// An empty filter selects everything.
    pub fn matches_tags(&self, filter: &[String]) -> bool {
        filter.is_empty() || self.tags.iter().any(|t| filter.contains(t))
    }

    /// The name becomes the perflog file stem, so it must be one plain path
    /// component.
    pub fn check_name(&self) -> Result<(), SpecError> {
        let bad = self.name == "."
            || self.name == ".."
            || self.name.contains(['/', '\\', '\0']);
        if bad {
            return Err(SpecError::BadName(self.name.clone()));
        }
        Ok(())
    }

    /// Snippet names must be unique.
    pub fn check_snippets(&self) -> Result<(), SpecError> {
        let mut seen = HashSet::new();
        for snippet in &self.snippets {
            if !seen.insert(snippet.name.as_str()) {
                return Err(SpecError::DuplicateSnippet(snippet.name.clone()));
            }
        }
        Ok(())
    }

    /// Full static check: non-empty job, a usable name, unique snippets, and
    /// every whole-token snippet reference defined.
    ///
    /// Loading only enforces snippet uniqueness; the rest surfaces per
    /// binding at run time.
    pub fn check(&self) -> Result<(), SpecError> {
        if self.job.is_empty() {
            return Err(SpecError::EmptyJob);
        }
        self.check_name()?;
        self.check_snippets()?;

        for item in &self.job {
            if let Token::Snippet(name) = template::classify_token(item)
                && self.snippet(name).is_none()
            {
                return Err(SpecError::UnknownSnippet(name.to_string()));
            }
        }

        Ok(())
    }
}

/// Accept scalars as job entries (`- 8` is as good as `- "8"`).
fn job_tokens<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<Value>::deserialize(deserializer)?;
    raw.into_iter()
        .map(|item| match item {
            Value::Array(_) | Value::Object(_) => Err(serde::de::Error::custom(
                "job entries must be strings or scalars",
            )),
            other => Ok(template::display_value(&other)),
        })
        .collect()
}

/// Generate the JSON Schema for test definition files.
pub fn generate_schema() -> schemars::schema::RootSchema {
    schemars::schema_for!(TestSpec)
}

/// Starter definition written by `unframe init`.
pub const INIT_TEMPLATE: &str = r#"name: example
description: Echo each parameter and check the output
tags: [smoke]

params:
  n: [1, 2, 4]

env:
  OMP_NUM_THREADS: 1

job:
  - sh
  - -c
  - "{{ snippet.script }}"

snippets:
  - name: script
    content: |
      echo "n={{ n }} partition={{ extra_args.partition }}"

parse: |
  fn parse(text, params) {
    let caps = regex_captures(text, "n=(\\d+)");
    #{ n: parse_int(caps[1]) }
  }

validate: |
  fn validate(results, params) {
    [results.n == params.n, `n=${results.n}`]
  }
"#;
