//! Simulated prices for when neither the live market nor the estimator
//! answers: the most recent cached price for the commodity anywhere, or the
//! catalog's baseline range midpoint. Commodities with neither decline.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, warn};

use crate::db::{CacheEntry, PriceCache};
use crate::pricing::catalog;
use crate::pricing::models::{round_price, scale_price, PriceQuery, PriceRecord, PriceSource, Region};
use crate::sources::PriceTier;

/// Half-width of the simulated range around `current`.
const SPREAD: Decimal = dec!(0.05);

pub struct AlternativeSource {
    cache: Arc<dyn PriceCache>,
}

impl AlternativeSource {
    pub fn new(cache: Arc<dyn PriceCache>) -> Self {
        Self { cache }
    }

    /// A failed cache read counts as no anchor.
    async fn latest_anchor(&self, commodity: &str) -> Option<CacheEntry> {
        match self.cache.latest_for_commodity(commodity).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!(commodity, error = %e, "Cache read failed, simulating from baseline range");
                None
            }
        }
    }
}

#[async_trait]
impl PriceTier for AlternativeSource {
    async fn resolve(&self, query: &PriceQuery) -> Result<Option<PriceRecord>> {
        let (anchor_region, current, unit, note) = match self.latest_anchor(&query.commodity).await {
            Some(entry) => (
                entry.record.region,
                entry.record.current,
                entry.record.unit,
                "simulated from latest cached price",
            ),
            None => {
                let Some(info) = catalog::commodity_info(&query.commodity) else {
                    return Ok(None);
                };
                (
                    Region::all(),
                    round_price(info.baseline_midpoint()),
                    catalog::baseline_range(info.key).2.to_string(),
                    "simulated from baseline range",
                )
            }
        };

        debug!(commodity = %query.commodity, anchor = %anchor_region, %current, "Simulated price");

        let (Some(min), Some(max)) = (
            scale_price(current, Decimal::ONE - SPREAD),
            scale_price(current, Decimal::ONE + SPREAD),
        ) else {
            return Ok(None);
        };

        let record = PriceRecord::new(
            query.commodity.clone(),
            anchor_region,
            current,
            PriceSource::AlternativeSimulated,
        )
        .with_range(Some(min), Some(max))
        .with_unit(unit)
        .with_note(note);

        Ok(Some(record))
    }

    fn source(&self) -> PriceSource {
        PriceSource::AlternativeSimulated
    }

    fn online_only(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "alternative"
    }
}
