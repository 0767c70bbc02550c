//! Observation history.
//!
//! The history is the single source of truth between runs: a time series of
//! Up/Down observations partitioned by target identity, kept in
//! non-decreasing timestamp order within each partition.

mod retention;
mod store;

pub use retention::*;
pub use store::*;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Outcome of a single reachability check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    Up,
    Down,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Up => "Up",
            Status::Down => "Down",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Up" => Some(Status::Up),
            "Down" => Some(Status::Down),
            _ => None,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One timestamped result for a target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub target_identity: String,
    pub status: Status,
    /// UTC, truncated to whole seconds.
    pub timestamp: DateTime<Utc>,
}

impl Observation {
    pub fn new(target_identity: impl Into<String>, status: Status, timestamp: DateTime<Utc>) -> Self {
        Self {
            target_identity: target_identity.into(),
            status,
            timestamp: timestamp.trunc_subsecs(0),
        }
    }
}

/// Retained observations for all targets, including ones no longer in the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct History {
    series: BTreeMap<String, Vec<Observation>>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of observations across all targets.
    pub fn len(&self) -> usize {
        self.series.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.series.values().all(Vec::is_empty)
    }

    /// Observations for one target, oldest first.
    pub fn observations(&self, identity: &str) -> &[Observation] {
        self.series.get(identity).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All observations ordered by timestamp. Ties keep identity order.
    pub fn chronological(&self) -> Vec<&Observation> {
        let mut all: Vec<&Observation> = self.series.values().flatten().collect();
        all.sort_by_key(|o| o.timestamp);
        all
    }

    /// Append observations, keeping each target's series in timestamp order.
    ///
    /// Exact duplicates are not collapsed; each run contributes one
    /// observation per target.
    pub fn merge<I>(&mut self, observations: I)
    where
        I: IntoIterator<Item = Observation>,
    {
        for obs in observations {
            let series = self.series.entry(obs.target_identity.clone()).or_default();
            match series.last() {
                Some(last) if last.timestamp > obs.timestamp => {
                    // Out-of-order arrival: insert after any equal timestamps.
                    let idx = series.partition_point(|o| o.timestamp <= obs.timestamp);
                    series.insert(idx, obs);
                }
                _ => series.push(obs),
            }
        }
    }
}

impl FromIterator<Observation> for History {
    fn from_iter<T: IntoIterator<Item = Observation>>(iter: T) -> Self {
        let mut history = History::new();
        history.merge(iter);
        history
    }
}
