use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Region key used when no location is known.
pub const ALL_REGIONS: &str = "All-India";

pub const DEFAULT_UNIT: &str = "per quintal";
pub const DEFAULT_CURRENCY: &str = "INR";

/// Largest price any tier may report. Anything above is a malformed payload.
pub const MAX_PRICE: Decimal = dec!(10000000);

/// Canonical region key (a state name, a cleaned free-text location, or the
/// all-regions sentinel).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Region(String);

impl Region {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn all() -> Self {
        Self(ALL_REGIONS.to_string())
    }

    pub fn is_all(&self) -> bool {
        self.0 == ALL_REGIONS
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which tier produced a price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PriceSource {
    #[serde(rename = "Live")]
    Live,
    #[serde(rename = "AI-Estimated")]
    AiEstimated,
    #[serde(rename = "Alternative-Simulated")]
    AlternativeSimulated,
    #[serde(rename = "Cached-Offline")]
    CachedOffline,
    #[serde(rename = "Stored-Baseline")]
    StoredBaseline,
    #[serde(rename = "Synthetic-Mock")]
    SyntheticMock,
}

impl PriceSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Live => "Live",
            Self::AiEstimated => "AI-Estimated",
            Self::AlternativeSimulated => "Alternative-Simulated",
            Self::CachedOffline => "Cached-Offline",
            Self::StoredBaseline => "Stored-Baseline",
            Self::SyntheticMock => "Synthetic-Mock",
        }
    }
}

impl fmt::Display for PriceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PriceSource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Live" => Ok(Self::Live),
            "AI-Estimated" => Ok(Self::AiEstimated),
            "Alternative-Simulated" => Ok(Self::AlternativeSimulated),
            "Cached-Offline" => Ok(Self::CachedOffline),
            "Stored-Baseline" => Ok(Self::StoredBaseline),
            "Synthetic-Mock" => Ok(Self::SyntheticMock),
            other => anyhow::bail!("Unknown price source: {other}"),
        }
    }
}

/// Self-reported confidence of an AI estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl FromStr for Confidence {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => anyhow::bail!("Unknown confidence: {other}"),
        }
    }
}

/// Violations of the canonical record invariants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("{field} price {value} exceeds the plausible maximum")]
    OutOfRange { field: &'static str, value: Decimal },
    #[error("current price must be positive, got {0}")]
    NonPositive(Decimal),
    #[error("min price {min} exceeds current price {current}")]
    MinAboveCurrent { min: Decimal, current: Decimal },
    #[error("current price {current} exceeds max price {max}")]
    CurrentAboveMax { current: Decimal, max: Decimal },
}

/// The normalized price value every tier produces and the engine returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRecord {
    pub commodity: String,
    /// Region this price describes. Tiers set it to the region their value is
    /// anchored to; the resolver rebases it to the requested region.
    pub region: Region,
    pub current: Decimal,
    pub min: Option<Decimal>,
    pub max: Option<Decimal>,
    pub modal: Option<Decimal>,
    pub unit: String,
    pub currency: String,
    pub source: PriceSource,
    pub observed_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<Confidence>,
    /// Market (mandi) that reported the price, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// Cache write time, only set on records read back from the cache.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl PriceRecord {
    pub fn new(
        commodity: impl Into<String>,
        region: Region,
        current: Decimal,
        source: PriceSource,
    ) -> Self {
        Self {
            commodity: commodity.into(),
            region,
            current,
            min: None,
            max: None,
            modal: None,
            unit: DEFAULT_UNIT.to_string(),
            currency: DEFAULT_CURRENCY.to_string(),
            source,
            observed_at: Utc::now(),
            confidence: None,
            market: None,
            note: None,
            last_updated: None,
        }
    }

    pub fn with_range(mut self, min: Option<Decimal>, max: Option<Decimal>) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// Check the record invariants: positive `current` no larger than
    /// [`MAX_PRICE`], and `min <= current <= max` for whichever bounds are
    /// present.
    pub fn validate(&self) -> Result<(), RecordError> {
        if self.current <= Decimal::ZERO {
            return Err(RecordError::NonPositive(self.current));
        }
        for (field, value) in [("current", Some(self.current)), ("max", self.max)] {
            if let Some(value) = value.filter(|v| *v > MAX_PRICE) {
                return Err(RecordError::OutOfRange { field, value });
            }
        }
        if let Some(min) = self.min {
            if min > self.current {
                return Err(RecordError::MinAboveCurrent {
                    min,
                    current: self.current,
                });
            }
        }
        if let Some(max) = self.max {
            if self.current > max {
                return Err(RecordError::CurrentAboveMax {
                    current: self.current,
                    max,
                });
            }
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Scale every price field by `ratio`, rounding to whole currency units.
    /// Rounding is monotone, so ordered bounds stay ordered. `None` when any
    /// field overflows.
    pub fn scaled(mut self, ratio: Decimal) -> Option<Self> {
        self.current = scale_price(self.current, ratio)?;
        self.min = scale_optional(self.min, ratio)?;
        self.max = scale_optional(self.max, ratio)?;
        self.modal = scale_optional(self.modal, ratio)?;
        Some(self)
    }
}

/// Round half away from zero to whole currency units.
pub fn round_price(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
}

/// `value * ratio` rounded to whole units, or `None` on overflow.
pub fn scale_price(value: Decimal, ratio: Decimal) -> Option<Decimal> {
    value.checked_mul(ratio).map(round_price)
}

fn scale_optional(value: Option<Decimal>, ratio: Decimal) -> Option<Option<Decimal>> {
    match value {
        Some(v) => scale_price(v, ratio).map(Some),
        None => Some(None),
    }
}

/// Normalized request for a single commodity price.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceQuery {
    pub commodity: String,
    /// `None` when the location was empty or meant "anywhere".
    pub region: Option<Region>,
}

impl PriceQuery {
    pub fn new(commodity: impl Into<String>, region: Option<Region>) -> Self {
        Self {
            commodity: commodity.into(),
            region,
        }
    }

    /// Region the final record must describe.
    pub fn target_region(&self) -> Region {
        self.region.clone().unwrap_or_else(Region::all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(current: Decimal) -> PriceRecord {
        PriceRecord::new("rice", Region::all(), current, PriceSource::Live)
    }

    #[test]
    fn test_new_record_defaults() {
        let r = record(dec!(2500));
        assert_eq!(r.unit, "per quintal");
        assert_eq!(r.currency, "INR");
        assert!(r.region.is_all());
        assert!(r.is_valid());
    }

    #[test]
    fn test_validate_rejects_non_positive_current() {
        assert_eq!(
            record(Decimal::ZERO).validate(),
            Err(RecordError::NonPositive(Decimal::ZERO))
        );
        assert!(!record(dec!(-5)).is_valid());
    }

    #[test]
    fn test_validate_rejects_inverted_bounds() {
        let r = record(dec!(100)).with_range(Some(dec!(200)), Some(dec!(50)));
        assert!(matches!(
            r.validate(),
            Err(RecordError::MinAboveCurrent { .. })
        ));

        let r = record(dec!(100)).with_range(None, Some(dec!(90)));
        assert!(matches!(
            r.validate(),
            Err(RecordError::CurrentAboveMax { .. })
        ));
    }

    #[test]
    fn test_validate_accepts_partial_bounds() {
        assert!(record(dec!(100)).with_range(Some(dec!(90)), None).is_valid());
        assert!(record(dec!(100)).with_range(None, Some(dec!(100))).is_valid());
    }

    #[test]
    fn test_scaled_rounds_half_away_from_zero() {
        let r = record(dec!(2500))
            .with_range(Some(dec!(2400)), Some(dec!(2600)))
            .scaled(dec!(1.0502))
            .unwrap();
        assert_eq!(r.current, dec!(2626)); // 2625.5
        assert_eq!(r.min, Some(dec!(2520)));
        assert_eq!(r.max, Some(dec!(2731)));
        assert!(r.is_valid());
    }

    #[test]
    fn test_scaled_overflow_is_none() {
        assert!(record(Decimal::MAX).scaled(dec!(1.10)).is_none());
        let r = record(dec!(100)).with_range(None, Some(Decimal::MAX));
        assert!(r.scaled(dec!(2)).is_none());
    }

    #[test]
    fn test_validate_rejects_implausible_magnitude() {
        assert_eq!(
            record(MAX_PRICE + Decimal::ONE).validate(),
            Err(RecordError::OutOfRange {
                field: "current",
                value: MAX_PRICE + Decimal::ONE
            })
        );
        let r = record(dec!(2500)).with_range(Some(dec!(2400)), Some(dec!(99000000)));
        assert!(matches!(r.validate(), Err(RecordError::OutOfRange { field: "max", .. })));
        assert!(record(MAX_PRICE).is_valid());
    }

    #[test]
    fn test_price_source_round_trips_through_str() {
        for source in [
            PriceSource::Live,
            PriceSource::AiEstimated,
            PriceSource::AlternativeSimulated,
            PriceSource::CachedOffline,
            PriceSource::StoredBaseline,
            PriceSource::SyntheticMock,
        ] {
            assert_eq!(source.as_str().parse::<PriceSource>().unwrap(), source);
        }
        assert!("Mock".parse::<PriceSource>().is_err());
    }

    #[test]
    fn test_price_source_serializes_as_tag() {
        let json = serde_json::to_string(&PriceSource::CachedOffline).unwrap();
        assert_eq!(json, "\"Cached-Offline\"");
    }

    #[test]
    fn test_target_region_defaults_to_all() {
        assert!(PriceQuery::new("rice", None).target_region().is_all());
        let q = PriceQuery::new("rice", Some(Region::new("Punjab")));
        assert_eq!(q.target_region().as_str(), "Punjab");
    }
}
