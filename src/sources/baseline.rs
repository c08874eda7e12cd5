use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::db::ProfileStore;
use crate::pricing::models::{PriceQuery, PriceRecord, PriceSource, Region};
use crate::sources::PriceTier;

/// Reference price kept on the commodity's profile. Describes no particular
/// region, so it is anchored to all-regions and takes the target region's
/// multiplier on rebase.
pub struct BaselineSource {
    profiles: Arc<dyn ProfileStore>,
}

impl BaselineSource {
    pub fn new(profiles: Arc<dyn ProfileStore>) -> Self {
        Self { profiles }
    }
}

#[async_trait]
impl PriceTier for BaselineSource {
    async fn resolve(&self, query: &PriceQuery) -> Result<Option<PriceRecord>> {
        let Some(reference) = self.profiles.reference_price(&query.commodity).await? else {
            return Ok(None);
        };

        let mut record = PriceRecord::new(
            query.commodity.clone(),
            Region::all(),
            reference.current,
            PriceSource::StoredBaseline,
        )
        .with_unit(reference.unit)
        .with_note("commodity profile reference price");
        record.currency = reference.currency;
        record.observed_at = reference.updated_at;
        Ok(Some(record))
    }

    fn source(&self) -> PriceSource {
        PriceSource::StoredBaseline
    }

    fn online_only(&self) -> bool {
        false
    }

    fn name(&self) -> &str {
        "baseline"
    }
}
