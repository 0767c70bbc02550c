//! One collection run: registry, probes, merge and prune, save, report.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::config::RunConfig;
use crate::history::{History, HistoryError, HistoryStore, Observation, RetentionPolicy, Status};
use crate::probe::Prober;
use crate::registry::{self, ConfigError, Target};
use crate::report::{build_report, write_report, Report};

/// Fatal run errors. Anything else is recovered inside the run.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("persistence error: {0}")]
    Persistence(#[from] HistoryError),
}

/// Owns the stores for one run.
pub struct Collector {
    config: RunConfig,
    store: HistoryStore,
    archive: Option<HistoryStore>,
    prober: Prober,
    retention: RetentionPolicy,
}

impl Collector {
    pub fn new(config: RunConfig) -> Self {
        Self {
            store: HistoryStore::new(&config.results_path),
            archive: config.archive_path.as_ref().map(HistoryStore::new),
            prober: Prober::from_config(&config),
            retention: RetentionPolicy::new(config.retention_days),
            config,
        }
    }

    /// The override list wins over the file when present.
    pub fn load_targets(&self) -> Result<Vec<Target>, ConfigError> {
        let targets = match &self.config.targets_override {
            Some(list) => {
                tracing::info!("Using target override list from environment");
                registry::parse_override(list)?
            }
            None => registry::load_targets(&self.config.targets_file)?,
        };
        tracing::info!("Loaded {} targets", targets.len());
        Ok(targets)
    }

    /// Execute a full run. Targets being Down is not an error.
    pub async fn run(&self) -> Result<Report, RunError> {
        let targets = self.load_targets()?;
        let mut history = self.store.load();

        // All probes finish before the history is touched.
        let observations = self.prober.check_all(&targets).await;

        self.record(&mut history, observations, &targets, Utc::now())
    }

    /// Merge, prune, persist and summarize a batch of observations.
    pub fn record(
        &self,
        history: &mut History,
        observations: Vec<Observation>,
        targets: &[Target],
        now: DateTime<Utc>,
    ) -> Result<Report, RunError> {
        let down = observations
            .iter()
            .filter(|o| o.status == Status::Down)
            .count();
        tracing::info!(
            "Recording {} observations ({} down)",
            observations.len(),
            down
        );

        history.merge(observations);
        let pruned = history.prune(self.retention, now);

        self.store.save(history)?;
        self.archive_pruned(pruned);

        let report = build_report(history, targets, self.retention, now);
        write_report(&self.config.summary_path, &report)?;
        Ok(report)
    }

    /// The archive is auxiliary; failures are logged, not propagated.
    fn archive_pruned(&self, pruned: Vec<Observation>) {
        if pruned.is_empty() {
            return;
        }
        let Some(archive) = &self.archive else {
            tracing::info!("Discarded {} expired observations", pruned.len());
            return;
        };

        match archive.append(pruned) {
            Ok(n) => tracing::info!("Archived {} expired observations to {}", n, archive.path().display()),
            Err(e) => tracing::error!("Failed to archive expired observations: {}", e),
        }
    }
}
