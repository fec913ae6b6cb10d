//! labhub entry point.
//!
//! Loads a blueprint, pre-warms a lab hub over dry-run backends and keeps it
//! up until Ctrl-C, then tears every lab down.

mod config;
mod dry_run;

use config::CliConfig;
use labhub_core::{Blueprint, BoxError, Hub, ProgressSink};
use std::io::Write;
use std::sync::Arc;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Writes pre-warm progress straight to stderr.
struct StderrProgress;

impl ProgressSink for StderrProgress {
    fn send(&self, msg: &str) -> Result<(), BoxError> {
        writeln!(std::io::stderr(), "{msg}")?;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr, next to the progress stream
    tracing_subscriber::registry()
        .with(
            EnvFilter::from_default_env()
                .add_directive("labhub=info".parse()?)
                .add_directive("labhub_core=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("Starting labhub");

    let config = CliConfig::from_env()?;
    config.validate()?;
    tracing::info!(?config, "Configuration loaded");

    let blueprint = Blueprint::from_path(&config.blueprint_path)?;
    tracing::info!(
        exercise = %blueprint.name,
        containers = blueprint.containers.len(),
        vms = blueprint.vms.len(),
        "Blueprint loaded"
    );

    let hub = Hub::builder(blueprint, dry_run::backends(&config.network_prefix))
        .config(config.hub.clone())
        .progress(Arc::new(StderrProgress))
        .build()
        .await?;

    for flag in hub.flags() {
        tracing::info!(name = %flag.name, env = %flag.env, points = flag.points, "Flag");
    }
    tracing::info!(
        available = hub.available(),
        remaining_capacity = hub.remaining_capacity(),
        "Hub ready"
    );

    // Wait for shutdown signal
    signal::ctrl_c().await?;
    tracing::info!("Received shutdown signal, cleaning up...");

    hub.close().await?;

    let stats = hub.stats();
    tracing::info!(
        created = stats.created(),
        dispensed = stats.dispensed(),
        failed = stats.failed(),
        closed = stats.closed(),
        "Shutdown complete"
    );
    Ok(())
}
