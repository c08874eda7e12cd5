//! Background refresh: keeps the price cache warm by fetching live prices
//! for every catalog (commodity, region) pair on a fixed interval, then
//! reaps entries past the retention window.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

use crate::config::{CacheConfig, SchedulerConfig};
use crate::db::PriceCache;
use crate::monitoring::health::HealthState;
use crate::pricing::catalog;
use crate::pricing::location::rebase;
use crate::pricing::models::{PriceQuery, PriceSource, Region};
use crate::sources::PriceTier;

/// Outcome of one refresh run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    pub attempted: usize,
    pub updated: usize,
    /// Pairs the live source had no data for.
    pub declined: usize,
    /// Pairs that errored, timed out or could not be written.
    pub failed: usize,
    pub purged: u64,
    /// The live source is not configured; nothing was attempted.
    pub skipped: bool,
    pub duration_ms: u64,
}

pub struct RefreshScheduler {
    live: Arc<dyn PriceTier>,
    cache: Arc<dyn PriceCache>,
    pairs: Vec<(String, Region)>,
    pair_timeout: Duration,
    retention: chrono::Duration,
    health: Option<HealthState>,
}

impl RefreshScheduler {
    pub fn new(
        live: Arc<dyn PriceTier>,
        cache: Arc<dyn PriceCache>,
        config: &SchedulerConfig,
        cache_config: &CacheConfig,
    ) -> Self {
        Self {
            live,
            cache,
            pairs: catalog::refresh_catalog(),
            pair_timeout: Duration::from_secs(config.pair_timeout_seconds.max(1)),
            retention: cache_config.retention(),
            health: None,
        }
    }

    /// Replace the default catalog of pairs.
    pub fn with_pairs(mut self, pairs: Vec<(String, Region)>) -> Self {
        self.pairs = pairs;
        self
    }

    pub fn with_pair_timeout(mut self, timeout: Duration) -> Self {
        self.pair_timeout = timeout;
        self
    }

    pub fn with_health(mut self, health: HealthState) -> Self {
        self.health = Some(health);
        self
    }

    /// Refresh every pair once and return the number of cache entries
    /// updated.
    pub async fn refresh_all_prices(&self) -> usize {
        self.run_once().await.updated
    }

    #[instrument(skip(self), fields(pairs = self.pairs.len()))]
    pub async fn run_once(&self) -> RefreshReport {
        let start = Instant::now();
        let mut report = RefreshReport::default();

        if !self.live.is_available() {
            info!("Live market source not configured, skipping price refresh");
            report.skipped = true;
            return report;
        }

        for (commodity, region) in &self.pairs {
            report.attempted += 1;
            let query = PriceQuery::new(commodity.clone(), Some(region.clone()));

            let outcome = tokio::time::timeout(self.pair_timeout, self.live.resolve(&query)).await;
            let record = match outcome {
                Ok(Ok(Some(record))) => record,
                Ok(Ok(None)) => {
                    report.declined += 1;
                    continue;
                }
                Ok(Err(e)) => {
                    debug!(commodity = %commodity, region = %region, error = %e, "Refresh failed for pair");
                    report.failed += 1;
                    continue;
                }
                Err(_) => {
                    warn!(commodity = %commodity, region = %region, "Refresh timed out for pair");
                    report.failed += 1;
                    continue;
                }
            };

            let Some(mut record) = rebase(record, region) else {
                debug!(commodity = %commodity, region = %region, "Refreshed price overflowed region adjustment");
                report.failed += 1;
                continue;
            };
            record.source = PriceSource::Live;
            if let Err(e) = record.validate() {
                debug!(commodity = %commodity, region = %region, error = %e, "Refreshed price is invalid");
                report.failed += 1;
                continue;
            }

            match self.cache.upsert(&record).await {
                Ok(()) => report.updated += 1,
                Err(e) => {
                    warn!(commodity = %commodity, region = %region, error = %e, "Failed to cache refreshed price");
                    report.failed += 1;
                }
            }
        }

        report.purged = self.reap().await;
        report.duration_ms = start.elapsed().as_millis() as u64;

        info!(
            attempted = report.attempted,
            updated = report.updated,
            declined = report.declined,
            failed = report.failed,
            purged = report.purged,
            duration_ms = report.duration_ms,
            "Price refresh complete"
        );

        if let Some(health) = &self.health {
            health.record_refresh(&report).await;
        }
        report
    }

    /// Delete cache entries last written before the retention window.
    pub async fn reap(&self) -> u64 {
        let cutoff = Utc::now() - self.retention;
        match self.cache.purge_older_than(cutoff).await {
            Ok(purged) => purged,
            Err(e) => {
                warn!(error = %e, "Failed to purge expired cache entries");
                0
            }
        }
    }

    /// Run the refresh on a fixed interval until the task is aborted. With
    /// `run_on_startup` the first run starts immediately.
    pub fn spawn(self: Arc<Self>, config: &SchedulerConfig) -> JoinHandle<()> {
        let interval = Duration::from_secs(config.interval_seconds.max(1));
        let run_on_startup = config.run_on_startup;

        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

            // The first tick completes immediately.
            if !run_on_startup {
                tick.tick().await;
            }

            info!(interval_s = interval.as_secs(), run_on_startup, "Refresh scheduler started");
            loop {
                tick.tick().await;
                self.run_once().await;
            }
        })
    }
}
