//! Target registry.
//!
//! Parses the line-oriented target list into an ordered set of targets.
//! Each line is either a bare address or `DisplayName=Address`; blank
//! lines and `#` comments are skipped.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration error types. All of them abort the run before probing.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("target file {path} could not be read: {source}")]
    Missing {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no targets configured")]
    Empty,
    #[error("duplicate target identity {identity:?} at entry {line}")]
    DuplicateIdentity { identity: String, line: usize },
    #[error("invalid target entry at {line}: {entry:?}")]
    InvalidEntry { line: usize, entry: String },
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },
}

/// A monitored address with a stable identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Display name if given, otherwise the raw address. Used as the history key.
    pub identity: String,
    pub address: String,
}

impl Target {
    pub fn new(identity: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            address: address.into(),
        }
    }
}

/// Read targets from a file, preserving file order.
pub fn load_targets<P: AsRef<Path>>(path: P) -> Result<Vec<Target>, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Missing {
        path: path.to_path_buf(),
        source,
    })?;
    parse_targets(content.lines())
}

/// Parse the comma-separated override list (e.g. from `UPWATCH_TARGETS`).
pub fn parse_override(list: &str) -> Result<Vec<Target>, ConfigError> {
    parse_targets(list.split(','))
}

/// Parse target entries. Entry numbers in errors are 1-based.
pub fn parse_targets<'a, I>(entries: I) -> Result<Vec<Target>, ConfigError>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut targets = Vec::new();
    let mut seen = HashSet::new();

    for (idx, raw) in entries.into_iter().enumerate() {
        let line = idx + 1;
        let entry = raw.trim();
        if entry.is_empty() || entry.starts_with('#') {
            continue;
        }

        let target = parse_entry(entry).ok_or_else(|| ConfigError::InvalidEntry {
            line,
            entry: entry.to_string(),
        })?;

        if !seen.insert(target.identity.clone()) {
            return Err(ConfigError::DuplicateIdentity {
                identity: target.identity,
                line,
            });
        }
        targets.push(target);
    }

    if targets.is_empty() {
        return Err(ConfigError::Empty);
    }

    Ok(targets)
}

fn parse_entry(entry: &str) -> Option<Target> {
    match entry.split_once('=') {
        Some((name, address)) => {
            let (name, address) = (name.trim(), address.trim());
            if name.is_empty() || address.is_empty() {
                return None;
            }
            Some(Target::new(name, address))
        }
        None => Some(Target::new(entry, entry)),
    }
}
