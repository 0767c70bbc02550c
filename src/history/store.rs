//! JSON file store for the observation history.
//!
//! The dataset is a flat array of `{resource, status, timestamp}` records.
//! Writes go to a temporary file in the same directory which then replaces
//! the target, so a crash never leaves a half-written dataset behind.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

use super::{History, Observation, Status};

/// History persistence error types. Reading never fails; only writing does.
#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to replace {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// On-disk record.
#[derive(Debug, Serialize)]
struct RecordOut<'a> {
    resource: &'a str,
    status: Status,
    timestamp: String,
}

/// Lenient on-disk record; unknown fields are ignored.
#[derive(Debug, Deserialize)]
struct RecordIn {
    resource: String,
    status: String,
    timestamp: String,
}

/// File-backed history store.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    path: PathBuf,
}

impl HistoryStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted history.
    ///
    /// A missing or corrupt file yields an empty history. Individual records
    /// with an unknown status or unreadable timestamp are skipped.
    pub fn load(&self) -> History {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No history at {}, starting fresh", self.path.display());
                return History::new();
            }
            Err(e) => {
                tracing::warn!(
                    "Could not read history {}: {}. Starting fresh.",
                    self.path.display(),
                    e
                );
                return History::new();
            }
        };

        let values: Vec<serde_json::Value> = match serde_json::from_str(&content) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(
                    "History {} is corrupt: {}. Starting fresh.",
                    self.path.display(),
                    e
                );
                return History::new();
            }
        };

        let total = values.len();
        let observations: Vec<Observation> = values
            .into_iter()
            .filter_map(|v| decode_record(v).or_else(|| {
                tracing::warn!("Skipping unreadable record in {}", self.path.display());
                None
            }))
            .collect();

        tracing::debug!(
            "Loaded {}/{} records from {}",
            observations.len(),
            total,
            self.path.display()
        );

        // Records on disk may be in any order; merge restores per-target ordering.
        let mut history = History::new();
        history.merge(sorted_by_time(observations));
        history
    }

    /// Atomically replace the persisted history.
    pub fn save(&self, history: &History) -> Result<(), HistoryError> {
        let records: Vec<RecordOut<'_>> = history
            .chronological()
            .into_iter()
            .map(|o| RecordOut {
                resource: &o.target_identity,
                status: o.status,
                timestamp: format_timestamp(o.timestamp),
            })
            .collect();

        write_json_atomic(&self.path, &records)?;
        tracing::info!("Saved {} observations to {}", records.len(), self.path.display());
        Ok(())
    }

    /// Merge observations into the stored dataset (used for the archive).
    pub fn append(&self, observations: Vec<Observation>) -> Result<usize, HistoryError> {
        if observations.is_empty() {
            return Ok(0);
        }
        let count = observations.len();
        let mut history = self.load();
        history.merge(sorted_by_time(observations));
        self.save(&history)?;
        Ok(count)
    }
}

fn sorted_by_time(mut observations: Vec<Observation>) -> Vec<Observation> {
    observations.sort_by_key(|o| o.timestamp);
    observations
}

fn decode_record(value: serde_json::Value) -> Option<Observation> {
    let record: RecordIn = serde_json::from_value(value).ok()?;
    let status = Status::parse(&record.status)?;
    let timestamp = parse_timestamp(&record.timestamp)?;
    Some(Observation::new(record.resource, status, timestamp))
}

/// Format a timestamp as ISO-8601 UTC with second precision.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse an ISO-8601 timestamp. Offsets are converted to UTC; naive values are taken as UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    let formats = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
    ];
    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    None
}

/// Serialize `value` as pretty JSON and atomically replace `path` with it.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), HistoryError> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let write_err = |source| HistoryError::Write {
        path: path.to_path_buf(),
        source,
    };

    std::fs::create_dir_all(dir).map_err(write_err)?;
    let mut tmp = NamedTempFile::new_in(dir).map_err(write_err)?;

    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        serde_json::to_writer_pretty(&mut writer, value).map_err(|source| HistoryError::Encode {
            path: path.to_path_buf(),
            source,
        })?;
        writer.write_all(b"\n").map_err(write_err)?;
        writer.flush().map_err(write_err)?;
    }
    tmp.as_file().sync_all().map_err(write_err)?;

    tmp.persist(path).map_err(|e| HistoryError::Persist {
        path: path.to_path_buf(),
        source: e.error,
    })?;
    Ok(())
}
