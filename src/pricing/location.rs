//! Location normalization and regional price adjustment.
//!
//! Free-text locations collapse onto canonical region keys, and every
//! region carries a price multiplier relative to the neutral all-regions
//! baseline (1.0).

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::pricing::catalog::title_case;
use crate::pricing::models::{PriceRecord, Region};

const CANONICAL_REGIONS: &[&str] = &[
    "Andhra Pradesh",
    "Assam",
    "Bihar",
    "Chhattisgarh",
    "Goa",
    "Gujarat",
    "Haryana",
    "Himachal Pradesh",
    "Jharkhand",
    "Karnataka",
    "Kerala",
    "Madhya Pradesh",
    "Maharashtra",
    "Odisha",
    "Punjab",
    "Rajasthan",
    "Tamil Nadu",
    "Telangana",
    "Uttar Pradesh",
    "Uttarakhand",
    "West Bengal",
];

/// Abbreviations and alternate spellings.
const REGION_ALIASES: &[(&str, &str)] = &[
    ("mh", "Maharashtra"),
    ("ka", "Karnataka"),
    ("tn", "Tamil Nadu"),
    ("tamilnadu", "Tamil Nadu"),
    ("tg", "Telangana"),
    ("ts", "Telangana"),
    ("ap", "Andhra Pradesh"),
    ("andhra", "Andhra Pradesh"),
    ("wb", "West Bengal"),
    ("bengal", "West Bengal"),
    ("up", "Uttar Pradesh"),
    ("pb", "Punjab"),
    ("hr", "Haryana"),
    ("mp", "Madhya Pradesh"),
    ("rj", "Rajasthan"),
    ("br", "Bihar"),
    ("gj", "Gujarat"),
    ("kl", "Kerala"),
    ("orissa", "Odisha"),
    ("od", "Odisha"),
    ("uttaranchal", "Uttarakhand"),
    ("hp", "Himachal Pradesh"),
    ("cg", "Chhattisgarh"),
];

/// Inputs that mean "no particular region".
const ALL_REGION_ALIASES: &[&str] = &["india", "all india", "all-india", "all regions", "all-regions"];

const COUNTRY_SUFFIXES: &[&str] = &[", india", " india", ",india"];

const DEFAULT_REGION_MULTIPLIERS: &[(&str, Decimal)] = &[
    ("Maharashtra", dec!(1.06)),
    ("Karnataka", dec!(1.03)),
    ("Tamil Nadu", dec!(1.04)),
    ("Telangana", dec!(1.02)),
    ("Andhra Pradesh", dec!(1.01)),
    ("West Bengal", dec!(1.05)),
    ("Uttar Pradesh", dec!(0.98)),
    ("Punjab", dec!(0.97)),
    ("Haryana", dec!(0.96)),
    ("Madhya Pradesh", dec!(1.00)),
    ("Rajasthan", dec!(0.99)),
    ("Bihar", dec!(1.02)),
    ("Gujarat", dec!(1.01)),
];

/// Commodity-specific multipliers; these win over the regional default.
const COMMODITY_REGION_MULTIPLIERS: &[(&str, &str, Decimal)] = &[
    ("onion", "Maharashtra", dec!(1.10)),
    ("onion", "Haryana", dec!(0.95)),
    ("onion", "Karnataka", dec!(1.05)),
    ("tomato", "Tamil Nadu", dec!(1.15)),
    ("tomato", "Karnataka", dec!(1.10)),
    ("tomato", "Telangana", dec!(0.95)),
    ("potato", "Punjab", dec!(0.90)),
    ("potato", "Uttar Pradesh", dec!(0.95)),
    ("potato", "Bihar", dec!(1.05)),
    ("cotton", "Maharashtra", dec!(1.05)),
    ("cotton", "Gujarat", dec!(1.00)),
    ("cotton", "Telangana", dec!(0.98)),
];

/// Resolve free-text location input to a region key.
///
/// Returns `None` for empty input or input meaning "all of India". Known
/// states (by name, abbreviation or alternate spelling) map to their
/// canonical key; any other text becomes its own title-cased key so it is
/// priced consistently with a stable pseudo-multiplier.
pub fn normalize_location(input: &str) -> Option<Region> {
    let collapsed = input.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut key = collapsed.to_lowercase();

    for suffix in COUNTRY_SUFFIXES {
        if let Some(stripped) = key.strip_suffix(*suffix) {
            key = stripped.to_string();
            break;
        }
    }
    let key = key.trim().trim_end_matches(',').trim();

    if key.is_empty() || ALL_REGION_ALIASES.contains(&key) {
        return None;
    }

    if let Some((_, canonical)) = REGION_ALIASES.iter().find(|(alias, _)| *alias == key) {
        return Some(Region::new(*canonical));
    }

    if let Some(canonical) = CANONICAL_REGIONS
        .iter()
        .find(|name| name.to_lowercase() == key)
    {
        return Some(Region::new(*canonical));
    }

    Some(Region::new(title_case(key)))
}

/// Price multiplier for a commodity in a region, relative to the
/// all-regions baseline.
pub fn region_multiplier(commodity: &str, region: &Region) -> Decimal {
    if region.is_all() {
        return Decimal::ONE;
    }

    if let Some((_, _, m)) = COMMODITY_REGION_MULTIPLIERS
        .iter()
        .find(|(c, r, _)| *c == commodity && *r == region.as_str())
    {
        return *m;
    }

    if let Some((_, m)) = DEFAULT_REGION_MULTIPLIERS
        .iter()
        .find(|(r, _)| *r == region.as_str())
    {
        return *m;
    }

    pseudo_multiplier(region.as_str())
}

/// Stable multiplier in `0.95..=1.05` derived from the region text.
fn pseudo_multiplier(region: &str) -> Decimal {
    let hash: u64 = region.chars().map(|c| c as u64).sum();
    dec!(0.95) + Decimal::from(hash % 11) / dec!(100)
}

/// Move a record from the region it describes to `target`, scaling prices
/// by the ratio of the two regions' multipliers. `None` when a scaled price
/// overflows.
pub fn rebase(record: PriceRecord, target: &Region) -> Option<PriceRecord> {
    if record.region == *target {
        return Some(record);
    }

    let from = region_multiplier(&record.commodity, &record.region);
    let to = region_multiplier(&record.commodity, target);
    let ratio = to.checked_div(from).unwrap_or(Decimal::ONE);

    let mut rebased = record.scaled(ratio)?;
    rebased.region = target.clone();
    Some(rebased)
}
