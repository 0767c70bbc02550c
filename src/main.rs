//! upwatch - periodic reachability checks with a retained history.
//!
//! Each invocation probes every configured target once, folds the results
//! into a 30 day history and writes the summary consumed by the report
//! renderer, then exits.

mod collector;
mod config;
mod history;
mod probe;
mod registry;
mod report;

use collector::Collector;
use config::RunConfig;
use report::LastStatus;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("upwatch=info".parse()?))
        .init();

    let cfg = match RunConfig::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!("Invalid configuration: {}", e);
            return Err(e.into());
        }
    };
    tracing::info!("Using history at {}", cfg.results_path.display());
    tracing::info!("Probe policy {:?}, timeout {:?}", cfg.probe_policy, cfg.timeout);

    let collector = Collector::new(cfg);
    let report = match collector.run().await {
        Ok(report) => report,
        Err(e) => {
            tracing::error!("Run failed: {}", e);
            return Err(e.into());
        }
    };

    let up = report
        .targets
        .iter()
        .filter(|s| s.last_status == LastStatus::Up)
        .count();
    tracing::info!("Run complete: {}/{} targets up", up, report.targets.len());

    Ok(())
}
