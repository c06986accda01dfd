//! Error types.
//!
//! Per-binding errors (`SpecError`, `ExecError`, `EvalError`) are turned into
//! FAIL records by the runner. `RecorderError` and `ConfigError` abort the run.

use std::path::PathBuf;
use thiserror::Error;

/// A malformed job or snippet reference.
#[derive(Debug, Error)]
pub enum SpecError {
    #[error("`job` must be a non-empty list")]
    EmptyJob,
    #[error("snippet '{0}' not found")]
    UnknownSnippet(String),
    #[error("test name {0:?} must be a plain file name")]
    BadName(String),
    #[error("duplicate snippet name: {0}")]
    DuplicateSnippet(String),
    #[error("cannot split job entry {0:?}: unbalanced quotes")]
    Tokenize(String),
}

/// Failure to run the child process to completion.
///
/// A nonzero exit status is not an error.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("timed out after {0}s")]
    Timeout(u64),
    #[error("executable not found: {0}")]
    NotFound(String),
    #[error("working directory not found: {}", .0.display())]
    Workdir(PathBuf),
    #[error("failed to run {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Failure while compiling or running parse/validate logic.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("{stage} script does not compile: {message}")]
    Compile { stage: &'static str, message: String },
    #[error("{stage} block must define a function named `{stage}` taking two arguments")]
    MissingFunction { stage: &'static str },
    #[error("{0}")]
    Runtime(String),
    #[error("unsupported return value: {0}")]
    BadReturn(String),
}

/// Failure to write a perflog. Fatal for the run.
#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("cannot create {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot encode row for {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// Bad run configuration. Fatal before any test runs.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid --extra-args JSON: {0}")]
    ExtraArgs(String),
    #[error("tests directory not found: {0}")]
    MissingDir(PathBuf),
    #[error("no tests loaded")]
    NoTests,
    #[error(transparent)]
    Load(#[from] crate::loader::LoadError),
}
