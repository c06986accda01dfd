//! Append-only CSV perflogs, one per (prefix, sysenv, test).
//!
//! Layout: `<prefix>/perflogs/<sysenv>/<test>.csv`.

use crate::error::RecorderError;
use crate::params::Binding;
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::fmt::Debug;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Column names, in order.
pub const HEADER: [&str; 8] = [
    "timestamp",
    "name",
    "params",
    "sysenv",
    "duration_s",
    "status",
    "message",
    "results",
];

/// One row to append.
#[derive(Debug)]
pub struct Entry<'a, R: Serialize + Debug> {
    pub test_name: &'a str,
    pub binding: &'a Binding,
    pub duration: f64,
    pub passed: bool,
    pub message: &'a str,
    pub result: &'a R,
}

/// Writes perflog rows under a prefix for one environment label.
#[derive(Debug, Clone)]
pub struct Recorder {
    dir: PathBuf,
    sysenv: String,
}

impl Recorder {
    pub fn new(prefix: &Path, sysenv: &str) -> Self {
        Self {
            dir: prefix.join("perflogs").join(sysenv),
            sysenv: sysenv.to_string(),
        }
    }

    /// Path of the perflog for a test.
    pub fn path_for(&self, test_name: &str) -> PathBuf {
        self.dir.join(format!("{test_name}.csv"))
    }

    /// Append one row, creating the directory and header as needed.
    ///
    /// The size check and the append happen under an exclusive lock on the
    /// perflog, so concurrent runs write exactly one header, on the first line.
    pub fn record<R: Serialize + Debug>(&self, entry: &Entry<'_, R>) -> Result<PathBuf, RecorderError> {
        fs::create_dir_all(&self.dir).map_err(|source| RecorderError::CreateDir {
            path: self.dir.clone(),
            source,
        })?;

        let path = self.path_for(entry.test_name);
        let write_err = |source: io::Error| RecorderError::Write {
            path: path.clone(),
            source,
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(write_err)?;
        file.lock().map_err(write_err)?;
        let fresh = file.metadata().map_err(write_err)?.len() == 0;

        let bytes = self.encode(entry, fresh).map_err(|source| RecorderError::Csv {
            path: path.clone(),
            source,
        })?;
        file.write_all(&bytes).map_err(write_err)?;
        file.unlock().map_err(write_err)?;

        Ok(path)
    }

    fn encode<R: Serialize + Debug>(&self, entry: &Entry<'_, R>, header: bool) -> Result<Vec<u8>, csv::Error> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());
        if header {
            writer.write_record(HEADER)?;
        }

        let timestamp = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
        let params = encode_json(&entry.binding.to_sorted_map());
        let duration = format!("{:.3}", entry.duration);
        let status = if entry.passed { "PASS" } else { "FAIL" };
        let results = encode_json(entry.result);

        writer.write_record([
            timestamp.as_str(),
            entry.test_name,
            params.as_str(),
            self.sysenv.as_str(),
            duration.as_str(),
            status,
            entry.message,
            results.as_str(),
        ])?;

        writer
            .into_inner()
            .map_err(|e| csv::Error::from(e.into_error()))
    }
}

/// Compact JSON, or `{"_repr": "<debug text>"}` when the value has no JSON form.
pub fn encode_json<T: Serialize + Debug + ?Sized>(value: &T) -> String {
    match serde_json::to_string(value) {
        Ok(s) => s,
        Err(_) => json!({ "_repr": format!("{value:?}") }).to_string(),
    }
}
