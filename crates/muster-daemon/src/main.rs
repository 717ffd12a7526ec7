//! Daemon entry point: opens the store, wires the engine, and hosts the
//! expiry sweep. The command boundary (bot transport) embeds
//! [`muster_daemon::RunService`] in its own task against the same database;
//! this binary is the scheduler host.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use muster_core::authz::ExpiryBypass;
use muster_core::clock::SystemClock;
use muster_core::{Clock, RunLifecycle};
use muster_daemon::{
    ConfigRoleMapSource, DaemonConfig, ExpirySweeper, FlatRateResolver, SqliteStore,
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "muster-daemon", about = "Run tracker daemon and expiry sweeper")]
struct Args {
    /// Path to the TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the configured database path.
    #[arg(long)]
    db: Option<PathBuf>,

    /// Override the configured sweep interval, in seconds.
    #[arg(long)]
    sweep_interval_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => DaemonConfig::load(path).context("loading config")?,
        None => DaemonConfig::default(),
    };
    if let Some(db) = args.db {
        config.db_path = db;
    }
    if let Some(secs) = args.sweep_interval_secs {
        config.sweep_interval_secs = secs;
    }

    let store = Arc::new(
        SqliteStore::open(&config.db_path)
            .with_context(|| format!("opening database {}", config.db_path.display()))?,
    );
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let lifecycle = Arc::new(RunLifecycle::new(
        Arc::clone(&store),
        Arc::new(ConfigRoleMapSource::new(config.guilds.clone())),
        Arc::new(FlatRateResolver::new(config.points.clone())),
        Arc::clone(&clock),
    ));

    tracing::info!(
        db_path = %config.db_path.display(),
        sweep_interval_secs = config.sweep_interval_secs,
        guilds = config.guilds.len(),
        "muster daemon starting"
    );

    let sweeper = Arc::new(ExpirySweeper::new(
        lifecycle,
        clock,
        ExpiryBypass::new(),
        Duration::from_secs(config.sweep_interval_secs),
    ));
    sweeper.run().await;
    Ok(())
}
