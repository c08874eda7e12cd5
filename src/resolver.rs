//! Price resolution: walk the tiers in priority order and return the first
//! usable answer, rebased to the requested region.
//!
//! Resolution never fails. When every tier declines, a synthetic price is
//! derived from the catalog's baseline range (or a generic range for
//! unknown commodities).

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use rust_decimal_macros::dec;
use tracing::{debug, info, instrument, warn};

use crate::config::{AppConfig, Secrets};
use crate::db::store::Store;
use crate::db::{PriceCache, ProfileStore, ReferencePrice};
use crate::pricing::catalog::{self, normalize_commodity};
use crate::pricing::location::{normalize_location, rebase};
use crate::pricing::models::{round_price, PriceQuery, PriceRecord, PriceSource, Region};
use crate::sources::agmarknet::AgmarknetSource;
use crate::sources::alternative::AlternativeSource;
use crate::sources::baseline::BaselineSource;
use crate::sources::cached::CachedSource;
use crate::sources::claude::ClaudeClient;
use crate::sources::estimate::AiEstimator;
use crate::sources::PriceTier;

pub struct PriceResolver {
    tiers: Vec<Arc<dyn PriceTier>>,
    cache: Arc<dyn PriceCache>,
    profiles: Option<Arc<dyn ProfileStore>>,
    tier_timeout: Option<Duration>,
}

impl PriceResolver {
    /// Tiers are consulted in the order given.
    pub fn new(tiers: Vec<Arc<dyn PriceTier>>, cache: Arc<dyn PriceCache>) -> Self {
        Self {
            tiers,
            cache,
            profiles: None,
            tier_timeout: None,
        }
    }

    /// Copy every live price onto the commodity profile's reference price.
    pub fn with_profile_sync(mut self, profiles: Arc<dyn ProfileStore>) -> Self {
        self.profiles = Some(profiles);
        self
    }

    /// Bound each tier's work; a tier that runs over counts as a decline.
    pub fn with_tier_timeout(mut self, limit: Duration) -> Self {
        self.tier_timeout = Some(limit);
        self
    }

    /// The production chain: live market, AI estimate, simulated, cache,
    /// stored baseline.
    pub fn standard(config: &AppConfig, secrets: &Secrets, store: Arc<Store>) -> Result<Self> {
        let live = AgmarknetSource::new(
            &config.live_market,
            &config.rate_limit,
            secrets.agmarknet_api_key.clone(),
        )?;
        if !live.is_configured() {
            warn!("AGMARKNET_API_KEY not set, live market prices disabled");
        }

        let claude = match &secrets.anthropic_api_key {
            Some(key) => Some(ClaudeClient::new(&config.estimation, key.clone())?),
            None => {
                warn!("ANTHROPIC_API_KEY not set, AI price estimates disabled");
                None
            }
        };

        let cache: Arc<dyn PriceCache> = store.clone();
        let tiers: Vec<Arc<dyn PriceTier>> = vec![
            Arc::new(live),
            Arc::new(AiEstimator::new(claude)),
            Arc::new(AlternativeSource::new(cache.clone())),
            Arc::new(CachedSource::new(cache.clone())),
            Arc::new(BaselineSource::new(store.clone())),
        ];

        let resolver = Self::new(tiers, cache).with_tier_timeout(config.engine.tier_timeout());
        Ok(if config.engine.sync_profiles {
            resolver.with_profile_sync(store)
        } else {
            resolver
        })
    }

    /// The live market tier, shared with the refresh scheduler.
    pub fn live_tier(&self) -> Option<Arc<dyn PriceTier>> {
        self.tiers
            .iter()
            .find(|t| t.source() == PriceSource::Live)
            .cloned()
    }

    /// Resolve one commodity price. Always returns a record with a positive
    /// `current` and ordered bounds.
    #[instrument(skip(self))]
    pub async fn resolve_price(
        &self,
        commodity_name: &str,
        location: Option<&str>,
        network_available: bool,
    ) -> PriceRecord {
        let query = PriceQuery::new(
            normalize_commodity(commodity_name),
            location.and_then(normalize_location),
        );
        let target = query.target_region();

        for tier in &self.tiers {
            if tier.online_only() && !network_available {
                continue;
            }
            if !tier.is_available() {
                continue;
            }

            let Some(candidate) = self.run_tier(tier.as_ref(), &query).await else {
                continue;
            };

            let Some(record) = rebase(candidate, &target) else {
                warn!(tier = tier.name(), region = %target, "Price overflowed region adjustment, skipping tier");
                continue;
            };
            if let Err(e) = record.validate() {
                warn!(tier = tier.name(), error = %e, "Rebased record is invalid, skipping tier");
                continue;
            }

            if tier.persist_on_success() {
                self.persist(&record).await;
            }
            if record.source == PriceSource::Live {
                self.sync_profile(&record).await;
            }

            info!(
                commodity = %record.commodity,
                region = %record.region,
                source = %record.source,
                current = %record.current,
                "Price resolved"
            );
            return record;
        }

        let record = synthetic(&query);
        info!(
            commodity = %record.commodity,
            region = %record.region,
            current = %record.current,
            "All tiers declined, using synthetic price"
        );
        record
    }

    /// Resolve several commodities for one location, one after another.
    /// Keys are the normalized commodity names.
    pub async fn resolve_prices<S: AsRef<str>>(
        &self,
        commodities: &[S],
        location: Option<&str>,
        network_available: bool,
    ) -> BTreeMap<String, PriceRecord> {
        let mut prices = BTreeMap::new();
        for name in commodities {
            let record = self
                .resolve_price(name.as_ref(), location, network_available)
                .await;
            prices.insert(record.commodity.clone(), record);
        }
        prices
    }

    /// Run one tier, folding errors, timeouts and invalid output into a
    /// decline.
    async fn run_tier(&self, tier: &dyn PriceTier, query: &PriceQuery) -> Option<PriceRecord> {
        let outcome = match self.tier_timeout {
            Some(limit) => match tokio::time::timeout(limit, tier.resolve(query)).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(
                        tier = tier.name(),
                        timeout_ms = limit.as_millis() as u64,
                        "Price tier timed out"
                    );
                    return None;
                }
            },
            None => tier.resolve(query).await,
        };

        match outcome {
            Ok(Some(mut record)) => {
                record.source = tier.source();
                match record.validate() {
                    Ok(()) => Some(record),
                    Err(e) => {
                        warn!(tier = tier.name(), error = %e, "Price tier returned an invalid record");
                        None
                    }
                }
            }
            Ok(None) => {
                debug!(tier = tier.name(), "Price tier declined");
                None
            }
            Err(e) => {
                if tier.online_only() {
                    debug!(tier = tier.name(), error = %e, "Price tier failed");
                } else {
                    warn!(tier = tier.name(), error = %e, "Price tier failed");
                }
                None
            }
        }
    }

    async fn persist(&self, record: &PriceRecord) {
        if let Err(e) = self.cache.upsert(record).await {
            warn!(
                commodity = %record.commodity,
                region = %record.region,
                error = %e,
                "Failed to cache resolved price"
            );
        }
    }

    /// Profiles hold an all-regions reference, so the live price is rebased
    /// back to all-regions first.
    async fn sync_profile(&self, record: &PriceRecord) {
        let Some(profiles) = &self.profiles else {
            return;
        };

        let Some(neutral) = rebase(record.clone(), &Region::all()) else {
            warn!(commodity = %record.commodity, "Live price overflowed all-regions adjustment, profile not synced");
            return;
        };
        let reference = ReferencePrice {
            current: neutral.current,
            unit: neutral.unit,
            currency: neutral.currency,
            updated_at: Utc::now(),
        };
        if let Err(e) = profiles
            .update_reference_price(&record.commodity, &reference)
            .await
        {
            warn!(commodity = %record.commodity, error = %e, "Failed to sync profile reference price");
        }
    }
}

/// Last-resort price: the baseline range midpoint, rebased to the target.
fn synthetic(query: &PriceQuery) -> PriceRecord {
    let (min, max, unit) = catalog::baseline_range(&query.commodity);
    let midpoint = round_price((min + max) / dec!(2));

    let record = PriceRecord::new(
        query.commodity.clone(),
        Region::all(),
        midpoint,
        PriceSource::SyntheticMock,
    )
    .with_range(Some(min), Some(max))
    .with_unit(unit)
    .with_note("synthetic baseline estimate");

    // Unscaled catalog prices if the adjustment overflows.
    let target = query.target_region();
    match rebase(record.clone(), &target) {
        Some(rebased) => rebased,
        None => PriceRecord {
            region: target,
            ..record
        },
    }
}
