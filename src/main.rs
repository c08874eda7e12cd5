use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use mandi_price_engine::config::AppConfig;
use mandi_price_engine::db::store::Store;
use mandi_price_engine::monitoring::dashboard::{spawn_dashboard, DashboardState};
use mandi_price_engine::monitoring::health::HealthState;
use mandi_price_engine::monitoring::logger;
use mandi_price_engine::resolver::PriceResolver;
use mandi_price_engine::scheduler::RefreshScheduler;

#[derive(Debug, Parser)]
#[command(name = "mandi-price-engine", version, about = "Commodity price resolution and cache refresh service")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "config/default.toml")]
    config: PathBuf,

    /// Run one cache refresh and exit.
    #[arg(long)]
    refresh_once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (config, secrets, ignored_overrides) = AppConfig::load(&cli.config)?;

    logger::init_logging(&config.monitoring)?;
    for message in &ignored_overrides {
        warn!("{message}");
    }

    info!(
        config = %cli.config.display(),
        database = %config.database.path,
        refresh_interval_s = config.scheduler.interval_seconds,
        "Mandi price engine starting"
    );

    if let Some(parent) = Path::new(&config.database.path)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create database directory {}", parent.display()))?;
    }

    let store = Arc::new(
        Store::new(&config.database.path)
            .await?
            .with_freshness(config.cache.freshness()),
    );

    let resolver = Arc::new(PriceResolver::standard(&config, &secrets, store.clone())?);
    let live = resolver
        .live_tier()
        .context("Resolver was built without a live market tier")?;

    let health = HealthState::new(live.is_available(), secrets.anthropic_api_key.is_some());
    let scheduler = Arc::new(
        RefreshScheduler::new(live, store.clone(), &config.scheduler, &config.cache)
            .with_health(health.clone()),
    );

    if cli.refresh_once {
        let report = scheduler.run_once().await;
        info!(updated = report.updated, skipped = report.skipped, "One-off refresh finished");
        return Ok(());
    }

    let scheduler_handle = if config.scheduler.enabled {
        Some(scheduler.clone().spawn(&config.scheduler))
    } else {
        info!("Refresh scheduler disabled");
        None
    };

    let dashboard_handle = spawn_dashboard(
        DashboardState::new(resolver, scheduler, store, health),
        &config.monitoring.bind,
        config.monitoring.port,
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    if let Some(handle) = scheduler_handle {
        handle.abort();
    }
    dashboard_handle.abort();

    Ok(())
}
