//! Price tiers consulted by the resolver, in priority order.
//!
//! Every tier either produces a [`PriceRecord`] or declines. `Ok(None)` is
//! the ordinary "nothing here" answer; an `Err` is a failure the resolver
//! logs and then treats exactly like a decline. Tiers never write to the
//! price cache themselves.

pub mod agmarknet;
pub mod alternative;
pub mod baseline;
pub mod cached;
pub mod claude;
pub mod estimate;

use anyhow::Result;
use async_trait::async_trait;

use crate::pricing::models::{PriceQuery, PriceRecord, PriceSource};

#[async_trait]
pub trait PriceTier: Send + Sync {
    /// Produce a price for the query, anchored to whatever region the value
    /// actually describes (`record.region`). The resolver rebases it.
    async fn resolve(&self, query: &PriceQuery) -> Result<Option<PriceRecord>>;

    /// Provenance tag stamped on records from this tier.
    fn source(&self) -> PriceSource;

    /// Only consulted while the network is available.
    fn online_only(&self) -> bool;

    /// Whether a hit from this tier is written back to the cache.
    fn persist_on_success(&self) -> bool {
        true
    }

    /// False when required configuration (credentials) is missing.
    fn is_available(&self) -> bool {
        true
    }

    /// Human-readable name for logs.
    fn name(&self) -> &str;
}
