pub mod store;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::pricing::models::{PriceRecord, Region};

/// A cached price with its write time and freshness deadline.
///
/// "Fresh" (before `expires_at`) and "present" are different predicates:
/// stale entries stay readable until the reaper removes them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheEntry {
    pub record: PriceRecord,
    pub last_updated: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Persistent (commodity, region) price cache.
///
/// The only shared mutable resource of the engine. Upserts replace the
/// whole record (last writer wins).
#[async_trait]
pub trait PriceCache: Send + Sync {
    async fn get(&self, commodity: &str, region: &Region) -> Result<Option<CacheEntry>>;

    /// Most recently written entry for the commodity in any region.
    async fn latest_for_commodity(&self, commodity: &str) -> Result<Option<CacheEntry>>;

    async fn upsert(&self, record: &PriceRecord) -> Result<()>;

    /// Delete entries last written before `cutoff`. Returns the number removed.
    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    /// Tiered lookup: exact region, then the all-regions entry, then the
    /// latest entry for the commodity anywhere.
    async fn lookup(&self, commodity: &str, region: &Region) -> Result<Option<CacheEntry>> {
        if let Some(entry) = self.get(commodity, region).await? {
            return Ok(Some(entry));
        }
        if !region.is_all() {
            if let Some(entry) = self.get(commodity, &Region::all()).await? {
                return Ok(Some(entry));
            }
        }
        self.latest_for_commodity(commodity).await
    }
}

/// Slow-changing reference price kept on a commodity's profile record,
/// independent of the price cache.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReferencePrice {
    pub current: Decimal,
    pub unit: String,
    pub currency: String,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn reference_price(&self, commodity: &str) -> Result<Option<ReferencePrice>>;

    async fn update_reference_price(&self, commodity: &str, price: &ReferencePrice) -> Result<()>;
}
