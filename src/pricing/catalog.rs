//! Static commodity catalog.
//!
//! Upstream commodity names, baseline price ranges used by the simulated
//! and synthetic tiers, the region-to-market map for market-scoped live
//! queries, and the (commodity, region) pairs the refresh job keeps warm.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::pricing::models::{Region, DEFAULT_UNIT};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommodityInfo {
    /// Canonical lowercase key.
    pub key: &'static str,
    /// Name the live market API files the commodity under.
    pub upstream_name: &'static str,
    pub baseline_min: Decimal,
    pub baseline_max: Decimal,
}

impl CommodityInfo {
    pub fn baseline_midpoint(&self) -> Decimal {
        (self.baseline_min + self.baseline_max) / dec!(2)
    }
}

/// Range used when a commodity is not in the catalog at all.
pub const GENERIC_BASELINE_MIN: Decimal = dec!(3000);
pub const GENERIC_BASELINE_MAX: Decimal = dec!(5000);

const COMMODITIES: &[CommodityInfo] = &[
    CommodityInfo { key: "rice", upstream_name: "Rice", baseline_min: dec!(2200), baseline_max: dec!(3500) },
    CommodityInfo { key: "wheat", upstream_name: "Wheat", baseline_min: dec!(2400), baseline_max: dec!(3200) },
    CommodityInfo { key: "maize", upstream_name: "Maize", baseline_min: dec!(1800), baseline_max: dec!(2800) },
    CommodityInfo { key: "cotton", upstream_name: "Cotton", baseline_min: dec!(5500), baseline_max: dec!(8000) },
    CommodityInfo { key: "sugarcane", upstream_name: "Sugarcane", baseline_min: dec!(3800), baseline_max: dec!(5200) },
    CommodityInfo { key: "tomato", upstream_name: "Tomato", baseline_min: dec!(800), baseline_max: dec!(2500) },
    CommodityInfo { key: "potato", upstream_name: "Potato", baseline_min: dec!(1200), baseline_max: dec!(2800) },
    CommodityInfo { key: "onion", upstream_name: "Onion", baseline_min: dec!(1500), baseline_max: dec!(3500) },
    CommodityInfo { key: "chili", upstream_name: "Chilli", baseline_min: dec!(6000), baseline_max: dec!(14000) },
    CommodityInfo { key: "groundnut", upstream_name: "Groundnut", baseline_min: dec!(4500), baseline_max: dec!(7500) },
    CommodityInfo { key: "soybean", upstream_name: "Soybean", baseline_min: dec!(4000), baseline_max: dec!(6500) },
    CommodityInfo { key: "mustard", upstream_name: "Mustard", baseline_min: dec!(4800), baseline_max: dec!(7200) },
    CommodityInfo { key: "jute", upstream_name: "Jute", baseline_min: dec!(3500), baseline_max: dec!(6000) },
    CommodityInfo { key: "coffee", upstream_name: "Coffee", baseline_min: dec!(12000), baseline_max: dec!(18000) },
];

/// Alternate spellings mapped onto catalog keys.
const COMMODITY_ALIASES: &[(&str, &str)] = &[
    ("chilli", "chili"),
    ("chillies", "chili"),
    ("chilies", "chili"),
    ("paddy", "rice"),
    ("soyabean", "soybean"),
    ("soya bean", "soybean"),
    ("corn", "maize"),
];

/// Market (mandi) queried when a region-scoped live query yields nothing.
const REGION_MARKETS: &[(&str, &str)] = &[
    ("Maharashtra", "Bombay"),
    ("Karnataka", "Bangalore"),
    ("Tamil Nadu", "Chennai"),
    ("Telangana", "Hyderabad"),
    ("Andhra Pradesh", "Hyderabad"),
    ("West Bengal", "Kolkata"),
    ("Uttar Pradesh", "Delhi"),
    ("Punjab", "Chandigarh"),
    ("Haryana", "Delhi"),
    ("Madhya Pradesh", "Indore"),
    ("Rajasthan", "Jaipur"),
    ("Bihar", "Patna"),
    ("Gujarat", "Ahmedabad"),
];

/// Normalize a commodity name to its canonical lowercase key.
///
/// Unknown commodities keep their (trimmed, lowercased, whitespace-collapsed)
/// name so they still get their own cache entries.
pub fn normalize_commodity(name: &str) -> String {
    let cleaned = name
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();

    COMMODITY_ALIASES
        .iter()
        .find(|(alias, _)| *alias == cleaned)
        .map(|(_, key)| key.to_string())
        .unwrap_or(cleaned)
}

pub fn commodity_info(key: &str) -> Option<&'static CommodityInfo> {
    COMMODITIES.iter().find(|c| c.key == key)
}

/// Upstream commodity name; unknown keys are passed through title-cased.
pub fn upstream_name(key: &str) -> String {
    match commodity_info(key) {
        Some(info) => info.upstream_name.to_string(),
        None => title_case(key),
    }
}

/// Baseline `(min, max)` range and unit for a commodity, falling back to
/// the generic range for unknown commodities.
pub fn baseline_range(key: &str) -> (Decimal, Decimal, &'static str) {
    match commodity_info(key) {
        Some(info) => (info.baseline_min, info.baseline_max, DEFAULT_UNIT),
        None => (GENERIC_BASELINE_MIN, GENERIC_BASELINE_MAX, DEFAULT_UNIT),
    }
}

pub fn market_for_region(region: &Region) -> Option<&'static str> {
    REGION_MARKETS
        .iter()
        .find(|(state, _)| *state == region.as_str())
        .map(|(_, market)| *market)
}

/// Every (commodity, region) pair the refresh job keeps warm.
pub fn refresh_catalog() -> Vec<(String, Region)> {
    COMMODITIES
        .iter()
        .flat_map(|c| {
            REGION_MARKETS
                .iter()
                .map(move |(state, _)| (c.key.to_string(), Region::new(*state)))
        })
        .collect()
}

pub(crate) fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(|c| c.to_lowercase())).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_commodity() {
        assert_eq!(normalize_commodity("  Rice "), "rice");
        assert_eq!(normalize_commodity("Chilli"), "chili");
        assert_eq!(normalize_commodity("Soya   Bean"), "soybean");
        assert_eq!(normalize_commodity("Dragon Fruit"), "dragon fruit");
    }

    #[test]
    fn test_upstream_name() {
        assert_eq!(upstream_name("chili"), "Chilli");
        assert_eq!(upstream_name("rice"), "Rice");
        assert_eq!(upstream_name("dragon fruit"), "Dragon Fruit");
    }

    #[test]
    fn test_baseline_range_unknown_is_generic() {
        let (min, max, unit) = baseline_range("unknownfruit");
        assert_eq!(min, dec!(3000));
        assert_eq!(max, dec!(5000));
        assert_eq!(unit, "per quintal");
    }

    #[test]
    fn test_baseline_midpoint() {
        let rice = commodity_info("rice").unwrap();
        assert_eq!(rice.baseline_midpoint(), dec!(2850));
    }

    #[test]
    fn test_market_for_region() {
        assert_eq!(market_for_region(&Region::new("Punjab")), Some("Chandigarh"));
        assert_eq!(market_for_region(&Region::new("Goa")), None);
        assert_eq!(market_for_region(&Region::all()), None);
    }

    #[test]
    fn test_refresh_catalog_covers_every_pair() {
        let pairs = refresh_catalog();
        assert_eq!(pairs.len(), COMMODITIES.len() * REGION_MARKETS.len());
        assert!(pairs.contains(&("onion".to_string(), Region::new("Maharashtra"))));
    }
}
