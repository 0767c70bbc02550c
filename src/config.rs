//! Configuration module for upwatch.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::probe::ProbePolicy;
use crate::registry::ConfigError;

/// Upper bound for the retention window (about a century).
pub const MAX_RETENTION_DAYS: i64 = 36_500;

/// Run configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Target list file (default: "monitoring_targets.txt")
    pub targets_file: PathBuf,
    /// Comma-separated target list that replaces the file when present
    pub targets_override: Option<String>,
    /// Persisted observation history (default: "docs/data/results.json")
    pub results_path: PathBuf,
    /// Pruned observations are appended here; `None` disables archiving
    pub archive_path: Option<PathBuf>,
    /// Report summary hand-off for the renderer (default: "docs/data/summary.json")
    pub summary_path: PathBuf,
    pub probe_policy: ProbePolicy,
    pub timeout: Duration,
    pub ping_count: u32,
    pub retention_days: i64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            targets_file: PathBuf::from("monitoring_targets.txt"),
            targets_override: None,
            results_path: PathBuf::from("docs/data/results.json"),
            archive_path: Some(PathBuf::from("docs/data/archive.json")),
            summary_path: PathBuf::from("docs/data/summary.json"),
            probe_policy: ProbePolicy::Http,
            timeout: Duration::from_secs(5),
            ping_count: 3,
            retention_days: 30,
        }
    }
}

impl RunConfig {
    /// Load configuration from the process environment.
    ///
    /// Environment variables:
    /// - `UPWATCH_TARGETS_FILE`: target list path
    /// - `UPWATCH_TARGETS`: comma-separated override list
    /// - `UPWATCH_RESULTS_PATH`: history dataset path
    /// - `UPWATCH_ARCHIVE_PATH`: archive path, empty disables archiving
    /// - `UPWATCH_SUMMARY_PATH`: report summary path
    /// - `UPWATCH_PROBE`: `http` or `ping` (default: http)
    /// - `UPWATCH_TIMEOUT_SECS`: per-check timeout (default: 5)
    /// - `UPWATCH_PING_COUNT`: packets per ping check (default: 3)
    /// - `UPWATCH_RETENTION_DAYS`: history window (default: 30)
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(path) = lookup("UPWATCH_TARGETS_FILE") {
            cfg.targets_file = PathBuf::from(path);
        }

        if let Some(list) = lookup("UPWATCH_TARGETS") {
            if !list.trim().is_empty() {
                cfg.targets_override = Some(list);
            }
        }

        if let Some(path) = lookup("UPWATCH_RESULTS_PATH") {
            cfg.results_path = PathBuf::from(path);
        }

        if let Some(path) = lookup("UPWATCH_ARCHIVE_PATH") {
            cfg.archive_path = if path.trim().is_empty() {
                None
            } else {
                Some(PathBuf::from(path))
            };
        }

        if let Some(path) = lookup("UPWATCH_SUMMARY_PATH") {
            cfg.summary_path = PathBuf::from(path);
        }

        if let Some(policy) = lookup("UPWATCH_PROBE") {
            cfg.probe_policy = policy.parse()?;
        }

        if let Some(secs) = parse_positive::<u64>(&lookup, "UPWATCH_TIMEOUT_SECS") {
            cfg.timeout = Duration::from_secs(secs);
        }

        if let Some(count) = parse_positive::<u32>(&lookup, "UPWATCH_PING_COUNT") {
            cfg.ping_count = count;
        }

        if let Some(days) = parse_positive::<i64>(&lookup, "UPWATCH_RETENTION_DAYS") {
            if days > MAX_RETENTION_DAYS {
                return Err(ConfigError::InvalidValue {
                    key: "UPWATCH_RETENTION_DAYS".to_string(),
                    value: days.to_string(),
                });
            }
            cfg.retention_days = days;
        }

        Ok(cfg)
    }
}

/// Parse a strictly positive number, keeping the default on bad input.
fn parse_positive<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T>
where
    T: FromStr + PartialOrd + Default,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(v) if v > T::default() => Some(v),
        _ => {
            tracing::warn!("Ignoring invalid {}={:?}, keeping default", key, raw);
            None
        }
    }
}
