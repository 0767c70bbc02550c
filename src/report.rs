//! Report data builder.
//!
//! Derives per-target statistics from the history for the external chart
//! and HTML renderers. Nothing here renders; the output is a read-only,
//! registry-ordered summary plus the chart filename convention both sides
//! must agree on.

use chrono::{DateTime, SubsecRound, Utc};
use serde::Serialize;
use std::path::Path;

use crate::history::{write_json_atomic, History, HistoryError, RetentionPolicy, Status};
use crate::registry::Target;

/// Latest known status, with an explicit sentinel for targets never observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LastStatus {
    Up,
    Down,
    Unknown,
}

impl From<Status> for LastStatus {
    fn from(status: Status) -> Self {
        match status {
            Status::Up => LastStatus::Up,
            Status::Down => LastStatus::Down,
        }
    }
}

/// Statistics for one target over the retention window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportSummary {
    pub identity: String,
    pub address: String,
    /// Fraction of Up observations in the window, 0.0 when there are none.
    pub success_rate: f64,
    pub last_status: LastStatus,
    pub last_checked: Option<DateTime<Utc>>,
    pub observations: usize,
    /// Chart image filename, see [`chart_file_name`].
    pub chart: String,
}

/// Everything the renderers need for one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub generated_at: DateTime<Utc>,
    pub retention_days: i64,
    /// Newest observation across all targets in the report.
    pub last_checked: Option<DateTime<Utc>>,
    pub targets: Vec<ReportSummary>,
}

/// Replace every character that is not alphanumeric (Unicode-aware) or `-` with `_`.
///
/// Chart filenames are derived from this; renderers must use the same rule.
pub fn sanitize_identity(identity: &str) -> String {
    identity
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

/// Chart image filename for a target identity.
pub fn chart_file_name(identity: &str) -> String {
    format!("chart_{}.png", sanitize_identity(identity))
}

/// Summarize one target's observations inside the window.
pub fn summarize(history: &History, target: &Target, cutoff: DateTime<Utc>) -> ReportSummary {
    let series = history.observations(&target.identity);
    let in_window = &series[series.partition_point(|o| o.timestamp < cutoff)..];

    let up = in_window.iter().filter(|o| o.status == Status::Up).count();
    let success_rate = if in_window.is_empty() {
        0.0
    } else {
        up as f64 / in_window.len() as f64
    };

    let latest = series.last();

    ReportSummary {
        identity: target.identity.clone(),
        address: target.address.clone(),
        success_rate,
        last_status: latest.map_or(LastStatus::Unknown, |o| o.status.into()),
        last_checked: latest.map(|o| o.timestamp),
        observations: in_window.len(),
        chart: chart_file_name(&target.identity),
    }
}

/// Build the report in registry order.
pub fn build_report(
    history: &History,
    targets: &[Target],
    policy: RetentionPolicy,
    now: DateTime<Utc>,
) -> Report {
    let cutoff = policy.cutoff(now);
    let summaries: Vec<ReportSummary> = targets
        .iter()
        .map(|t| summarize(history, t, cutoff))
        .collect();

    Report {
        generated_at: now.trunc_subsecs(0),
        retention_days: policy.days,
        last_checked: summaries.iter().filter_map(|s| s.last_checked).max(),
        targets: summaries,
    }
}

/// Write the report as JSON for the renderers.
pub fn write_report(path: &Path, report: &Report) -> Result<(), HistoryError> {
    write_json_atomic(path, report)?;
    tracing::info!(
        "Wrote report for {} targets to {}",
        report.targets.len(),
        path.display()
    );
    Ok(())
}
