use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;

use crate::db::PriceCache;
use crate::pricing::models::{PriceQuery, PriceRecord, PriceSource};
use crate::sources::PriceTier;

/// Last-known prices from the cache, fresh or stale. Read-only: a hit is
/// never written back.
pub struct CachedSource {
    cache: Arc<dyn PriceCache>,
}

impl CachedSource {
    pub fn new(cache: Arc<dyn PriceCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl PriceTier for CachedSource {
    async fn resolve(&self, query: &PriceQuery) -> Result<Option<PriceRecord>> {
        let Some(entry) = self
            .cache
            .lookup(&query.commodity, &query.target_region())
            .await?
        else {
            return Ok(None);
        };

        let stale = !entry.is_fresh(Utc::now());
        let mut record = entry.record;
        record.source = PriceSource::CachedOffline;
        record.last_updated = Some(entry.last_updated);
        if stale {
            record.note = Some(format!("stale cache entry from {}", entry.last_updated.format("%Y-%m-%d")));
        }
        Ok(Some(record))
    }

    fn source(&self) -> PriceSource {
        PriceSource::CachedOffline
    }

    fn online_only(&self) -> bool {
        false
    }

    fn persist_on_success(&self) -> bool {
        false
    }

    fn name(&self) -> &str {
        "cache"
    }
}
