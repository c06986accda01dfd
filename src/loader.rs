//! Test definition loader.
//!
//! Loads one test per file from a tests directory.

use crate::error::{ConfigError, SpecError};
use crate::schema::TestSpec;
use log::debug;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Error type for definition loading.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid YAML in {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid TOML in {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("unsupported file format: {0} (expected .yaml, .yml, or .toml)")]
    UnsupportedFormat(String),
    #[error("invalid test in {path}: {source}")]
    Invalid {
        path: PathBuf,
        #[source]
        source: SpecError,
    },
}

fn is_definition(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| matches!(ext, "yaml" | "yml" | "toml"))
}

/// Definition files directly inside `dir`, sorted by name.
pub fn find_specs(dir: &Path) -> Result<Vec<PathBuf>, LoadError> {
    let entries = std::fs::read_dir(dir).map_err(|source| LoadError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut specs = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| LoadError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if is_definition(&path) {
            specs.push(path);
        }
    }
    specs.sort();
    Ok(specs)
}

/// Load one definition. The name defaults to the file stem.
pub fn load_spec(path: &Path) -> Result<TestSpec, LoadError> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let contents = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut spec: TestSpec = match ext {
        "yaml" | "yml" => serde_yaml::from_str(&contents).map_err(|source| LoadError::Yaml {
            path: path.to_path_buf(),
            source,
        })?,
        "toml" => toml::from_str(&contents).map_err(|source| LoadError::Toml {
            path: path.to_path_buf(),
            source,
        })?,
        other => return Err(LoadError::UnsupportedFormat(other.to_string())),
    };

    if spec.name.is_empty() {
        spec.name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
    }

    spec.check_name()
        .and_then(|()| spec.check_snippets())
        .map_err(|source| LoadError::Invalid {
            path: path.to_path_buf(),
            source,
        })?;

    Ok(spec)
}

/// Load every definition in `dir` and keep those matching the tag filter.
pub fn load_selected(dir: &Path, tags: &[String]) -> Result<Vec<TestSpec>, ConfigError> {
    if !dir.is_dir() {
        return Err(ConfigError::MissingDir(dir.to_path_buf()));
    }

    let mut tests = Vec::new();
    for path in find_specs(dir)? {
        let spec = load_spec(&path)?;
        if !spec.matches_tags(tags) {
            debug!("skipping test \"{}\": no tag in {tags:?}", spec.name);
            continue;
        }
        tests.push(spec);
    }

    if tests.is_empty() {
        return Err(ConfigError::NoTests);
    }
    debug!("loaded {} tests", tests.len());
    Ok(tests)
}
