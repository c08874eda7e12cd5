//! Live mandi prices from the Agmarknet open-data API (api.data.gov.in).
//!
//! Queries run from most to least specific: state filter (retried with the
//! alternate `state_name` field), the region's reference market, and finally
//! the whole commodity. Transport failures abort the chain and surface as
//! errors; an empty result moves on to the next query.

use std::num::NonZeroU32;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::config::{LiveMarketConfig, RateLimitConfig};
use crate::pricing::catalog;
use crate::pricing::location::normalize_location;
use crate::pricing::models::{PriceQuery, PriceRecord, PriceSource, Region, MAX_PRICE};
use crate::sources::PriceTier;

type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

pub struct AgmarknetSource {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<SecretString>,
    retries: u32,
    backoff: Duration,
    page_limit: u32,
    log_errors: bool,
    limiter: Arc<Limiter>,
}

impl AgmarknetSource {
    pub fn new(
        config: &LiveMarketConfig,
        rate_limit: &RateLimitConfig,
        api_key: Option<SecretString>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("mandi-price-engine/0.1")
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            api_key,
            retries: config.retries,
            backoff: Duration::from_millis(config.backoff_ms),
            page_limit: config.page_limit,
            log_errors: config.log_errors,
            limiter: create_rate_limiter(rate_limit),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    /// Fetch the best live record for a commodity. The returned record is
    /// anchored to `region` when the answer is region-scoped, otherwise to
    /// the all-regions key.
    #[instrument(skip(self))]
    pub async fn fetch(&self, commodity: &str, region: Option<&Region>) -> Result<Option<PriceRecord>> {
        let Some(api_key) = &self.api_key else {
            return Ok(None);
        };
        let upstream = catalog::upstream_name(commodity);
        let region = region.filter(|r| !r.is_all());

        if let Some(region) = region {
            for field in ["filters[state]", "filters[state_name]"] {
                let records = self
                    .query(api_key, &upstream, Some((field, region.as_str())))
                    .await?;
                if let Some(best) = pick_in_region(&records, region) {
                    debug!(field, region = %region, "Region-scoped Agmarknet hit");
                    return Ok(Some(best.into_record(commodity, region.clone())));
                }
            }

            if let Some(market) = catalog::market_for_region(region) {
                let records = self
                    .query(api_key, &upstream, Some(("filters[market_name]", market)))
                    .await?;
                if let Some(best) = pick_best(&records, None) {
                    debug!(market, region = %region, "Market-scoped Agmarknet hit");
                    return Ok(Some(best.into_record(commodity, region.clone())));
                }
            }
        }

        let records = self.query(api_key, &upstream, None).await?;
        let Some(best) = pick_best(&records, region) else {
            return Ok(None);
        };

        let anchor = match region {
            Some(r) if best.state.as_ref() == Some(r) => r.clone(),
            _ => Region::all(),
        };
        Ok(Some(best.into_record(commodity, anchor)))
    }

    async fn query(
        &self,
        api_key: &SecretString,
        commodity: &str,
        filter: Option<(&str, &str)>,
    ) -> Result<Vec<AgmarknetRecord>> {
        let mut params: Vec<(&str, String)> = vec![
            ("api-key", api_key.expose_secret().to_string()),
            ("format", "json".to_string()),
            ("limit", self.page_limit.to_string()),
            ("filters[commodity_name]", commodity.to_string()),
        ];
        if let Some((field, value)) = filter {
            params.push((field, value.to_string()));
        }

        let params = &params;
        let response: AgmarknetResponse = self
            .with_retry(move || async move {
                self.limiter.until_ready().await;
                let resp = self
                    .client
                    .get(&self.base_url)
                    .query(params)
                    .send()
                    .await
                    .context("Agmarknet request failed")?;

                let status = resp.status();
                if !status.is_success() {
                    bail!("Agmarknet API error ({status})");
                }

                resp.json::<AgmarknetResponse>()
                    .await
                    .context("Failed to parse Agmarknet response")
            })
            .await?;

        Ok(response.records)
    }

    async fn with_retry<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;

        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    let err_str = e.to_string();
                    if err_str.contains("401") || err_str.contains("403") {
                        return Err(e.context("Authentication failure, not retrying"));
                    }
                    if attempt >= self.retries {
                        return Err(e.context(format!("Failed after {} retries", self.retries)));
                    }

                    attempt += 1;
                    let backoff = self.backoff * attempt;
                    debug!(
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Retrying Agmarknet request"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

#[async_trait]
impl PriceTier for AgmarknetSource {
    async fn resolve(&self, query: &PriceQuery) -> Result<Option<PriceRecord>> {
        if !self.is_configured() {
            debug!("AGMARKNET_API_KEY not set, skipping live prices");
            return Ok(None);
        }

        match self.fetch(&query.commodity, query.region.as_ref()).await {
            Ok(Some(record)) => {
                info!(
                    commodity = %record.commodity,
                    region = %record.region,
                    current = %record.current,
                    "Live price fetched"
                );
                Ok(Some(record))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                if self.log_errors {
                    warn!(error = %e, commodity = %query.commodity, "Agmarknet fetch failed");
                } else {
                    debug!(error = %e, commodity = %query.commodity, "Agmarknet fetch failed");
                }
                Err(e)
            }
        }
    }

    fn source(&self) -> PriceSource {
        PriceSource::Live
    }

    fn online_only(&self) -> bool {
        true
    }

    fn is_available(&self) -> bool {
        self.is_configured()
    }

    fn name(&self) -> &str {
        "agmarknet"
    }
}

fn create_rate_limiter(config: &RateLimitConfig) -> Arc<Limiter> {
    let rps = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);
    let burst = NonZeroU32::new(config.burst_size).unwrap_or(rps);

    let quota = Quota::per_second(rps).allow_burst(burst);
    Arc::new(RateLimiter::direct(quota))
}

// --- Response Types ---

#[derive(Debug, Deserialize)]
struct AgmarknetResponse {
    #[serde(default)]
    records: Vec<AgmarknetRecord>,
}

/// One mandi report. Prices arrive as numbers or as strings with thousands
/// separators, so they are kept raw until normalized.
#[derive(Debug, Default, Deserialize)]
struct AgmarknetRecord {
    state: Option<String>,
    state_name: Option<String>,
    market: Option<String>,
    market_name: Option<String>,
    arrival_date: Option<String>,
    min_price: Option<Value>,
    max_price: Option<Value>,
    modal_price: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
struct MandiQuote {
    current: Decimal,
    min: Option<Decimal>,
    max: Option<Decimal>,
    modal: Option<Decimal>,
    arrival: Option<NaiveDate>,
    market: Option<String>,
    state: Option<Region>,
}

impl MandiQuote {
    /// `None` when the report carries no usable price or its bounds are
    /// inconsistent.
    fn from_record(record: &AgmarknetRecord) -> Option<Self> {
        let min = record.min_price.as_ref().and_then(parse_price);
        let max = record.max_price.as_ref().and_then(parse_price);
        let modal = record.modal_price.as_ref().and_then(parse_price);
        let current = modal.or(max).or(min)?;

        if min.is_some_and(|m| m > current) || max.is_some_and(|m| current > m) {
            return None;
        }

        let state = record
            .state
            .as_deref()
            .or(record.state_name.as_deref())
            .and_then(normalize_location);

        Some(Self {
            current,
            min,
            max,
            modal,
            arrival: record.arrival_date.as_deref().and_then(parse_arrival_date),
            market: record.market.clone().or_else(|| record.market_name.clone()),
            state,
        })
    }

    fn into_record(self, commodity: &str, anchor: Region) -> PriceRecord {
        let mut record = PriceRecord::new(commodity, anchor, self.current, PriceSource::Live)
            .with_range(self.min, self.max);
        record.modal = self.modal;
        record.market = self.market;
        if let Some(observed) = self.arrival.and_then(|d| d.and_hms_opt(0, 0, 0)) {
            record.observed_at = observed.and_utc();
        } else {
            record.observed_at = Utc::now();
        }
        record
    }
}

/// Choose the most representative report: restrict to the region when any
/// report matches it, then take the most recent.
fn pick_best(records: &[AgmarknetRecord], region: Option<&Region>) -> Option<MandiQuote> {
    let quotes: Vec<MandiQuote> = records.iter().filter_map(MandiQuote::from_record).collect();

    let in_region: Vec<&MandiQuote> = match region {
        Some(r) => quotes.iter().filter(|q| q.state.as_ref() == Some(r)).collect(),
        None => Vec::new(),
    };
    if in_region.is_empty() {
        most_recent(quotes.iter())
    } else {
        most_recent(in_region.into_iter())
    }
}

/// Results of a state-filtered query. Reports naming another state are
/// dropped; reports without a state are trusted to the server filter.
fn pick_in_region(records: &[AgmarknetRecord], region: &Region) -> Option<MandiQuote> {
    let quotes: Vec<MandiQuote> = records.iter().filter_map(MandiQuote::from_record).collect();
    most_recent(
        quotes
            .iter()
            .filter(|q| q.state.as_ref().map_or(true, |s| s == region)),
    )
}

/// Latest arrival first, then the highest modal price, then the highest max.
fn most_recent<'a>(quotes: impl Iterator<Item = &'a MandiQuote>) -> Option<MandiQuote> {
    quotes.max_by_key(|q| (q.arrival, q.modal, q.max)).cloned()
}

/// Parse a price that may be a JSON number or a string like `"2,450"`.
/// Non-positive, non-finite and implausibly large values count as absent.
fn parse_price(value: &Value) -> Option<Decimal> {
    let parsed = match value {
        Value::Number(n) => n
            .as_f64()
            .filter(|f| f.is_finite())
            .and_then(|f| Decimal::try_from(f).ok()),
        Value::String(s) => {
            let cleaned = s.replace(',', "");
            let cleaned = cleaned.trim();
            Decimal::from_str(cleaned).ok().or_else(|| {
                cleaned
                    .parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite())
                    .and_then(|f| Decimal::try_from(f).ok())
            })
        }
        _ => None,
    };
    parsed.filter(|d| *d > Decimal::ZERO && *d <= MAX_PRICE)
}

/// Arrival dates come as `dd/mm/yyyy`, `dd-mm-yyyy` or with a two-digit year.
fn parse_arrival_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    let parts: Vec<&str> = raw.split(['/', '-']).collect();

    if parts.len() == 3 && parts[0].len() <= 2 {
        let day: u32 = parts[0].parse().ok()?;
        let month: u32 = parts[1].parse().ok()?;
        let mut year: i32 = parts[2].parse().ok()?;
        if parts[2].len() == 2 {
            year += 2000;
        }
        return NaiveDate::from_ymd_opt(year, month, day);
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| {
            chrono::DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|dt| dt.date_naive())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param, query_param_is_missing};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer, retries: u32) -> LiveMarketConfig {
        LiveMarketConfig {
            base_url: format!("{}/resource/test", server.uri()),
            timeout_ms: 2_000,
            retries,
            backoff_ms: 10,
            page_limit: 100,
            log_errors: true,
        }
    }

    fn source(server: &MockServer, retries: u32) -> AgmarknetSource {
        AgmarknetSource::new(
            &config(server, retries),
            &RateLimitConfig::default(),
            Some(SecretString::from("test-key")),
        )
        .unwrap()
    }

    fn body(records: Value) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({ "records": records }))
    }

    fn record(state: &str, date: &str, min: Value, max: Value, modal: Value) -> AgmarknetRecord {
        AgmarknetRecord {
            state: Some(state.to_string()),
            arrival_date: Some(date.to_string()),
            min_price: Some(min),
            max_price: Some(max),
            modal_price: Some(modal),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_price_strips_separators() {
        assert_eq!(parse_price(&json!("2,450")), Some(dec!(2450)));
        assert_eq!(parse_price(&json!(" 1,02,300 ")), Some(dec!(102300)));
        assert_eq!(parse_price(&json!(2500)), Some(dec!(2500)));
        assert_eq!(parse_price(&json!("0")), None);
        assert_eq!(parse_price(&json!("-10")), None);
        assert_eq!(parse_price(&json!("NA")), None);
        assert_eq!(parse_price(&json!(null)), None);
        assert_eq!(parse_price(&json!("79228162514264337593543950335")), None);
        assert_eq!(parse_price(&json!(1e30)), None);
    }

    #[test]
    fn test_parse_arrival_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 5);
        assert_eq!(parse_arrival_date("05/03/2024"), expected);
        assert_eq!(parse_arrival_date("05-03-2024"), expected);
        assert_eq!(parse_arrival_date("5/3/24"), expected);
        assert_eq!(parse_arrival_date("2024-03-05"), expected);
        assert_eq!(parse_arrival_date("31/02/2024"), None);
        assert_eq!(parse_arrival_date("yesterday"), None);
    }

    #[test]
    fn test_current_falls_back_from_modal_to_max_to_min() {
        let r = record("Punjab", "01/01/2024", json!("2400"), json!("2600"), json!(null));
        assert_eq!(MandiQuote::from_record(&r).unwrap().current, dec!(2600));

        let r = record("Punjab", "01/01/2024", json!("2400"), json!(null), json!(null));
        assert_eq!(MandiQuote::from_record(&r).unwrap().current, dec!(2400));

        let r = record("Punjab", "01/01/2024", json!(null), json!(null), json!(null));
        assert!(MandiQuote::from_record(&r).is_none());
    }

    #[test]
    fn test_inconsistent_report_is_skipped() {
        let r = record("Punjab", "01/01/2024", json!("3000"), json!("2600"), json!("2500"));
        assert!(MandiQuote::from_record(&r).is_none());
    }

    #[test]
    fn test_pick_best_prefers_region_then_latest_then_modal() {
        let records = vec![
            record("Haryana", "10/01/2024", json!(1), json!(9000), json!(5000)),
            record("Punjab", "01/01/2024", json!(1), json!(3000), json!(2500)),
            record("Punjab", "02/01/2024", json!(1), json!(3000), json!(2400)),
            record("Punjab", "02/01/2024", json!(1), json!(3000), json!(2450)),
        ];

        let best = pick_best(&records, Some(&Region::new("Punjab"))).unwrap();
        assert_eq!(best.current, dec!(2450));

        let best = pick_best(&records, Some(&Region::new("Kerala"))).unwrap();
        assert_eq!(best.current, dec!(5000));
    }

    #[test]
    fn test_pick_in_region_drops_other_states() {
        let records = vec![
            record("Haryana", "10/01/2024", json!(1), json!(9000), json!(5000)),
            record("Gujarat", "11/01/2024", json!(1), json!(9000), json!(6000)),
        ];
        assert!(pick_in_region(&records, &Region::new("Punjab")).is_none());

        let unlabelled = AgmarknetRecord {
            modal_price: Some(json!("2300")),
            ..Default::default()
        };
        let records = vec![unlabelled, record("Haryana", "10/01/2024", json!(1), json!(9000), json!(5000))];
        let best = pick_in_region(&records, &Region::new("Punjab")).unwrap();
        assert_eq!(best.current, dec!(2300));
    }

    #[tokio::test]
    async fn test_state_query_reporting_other_states_falls_back_to_commodity_wide() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("filters[state]", "Kerala"))
            .respond_with(body(json!([{
                "state": "Gujarat",
                "arrival_date": "12/06/2024",
                "modal_price": "2,000"
            }])))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param_is_missing("filters[state]"))
            .and(query_param_is_missing("filters[state_name]"))
            .respond_with(body(json!([{
                "state": "Gujarat",
                "arrival_date": "12/06/2024",
                "modal_price": "2,000"
            }])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(body(json!([])))
            .mount(&server)
            .await;

        let record = source(&server, 0)
            .fetch("onion", Some(&Region::new("Kerala")))
            .await
            .unwrap()
            .unwrap();
        // Not Gujarat's price passed off as Kerala's.
        assert!(record.region.is_all());
        assert_eq!(record.current, dec!(2000));
    }

    #[tokio::test]
    async fn test_region_scoped_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/resource/test"))
            .and(query_param("api-key", "test-key"))
            .and(query_param("filters[commodity_name]", "Rice"))
            .and(query_param("filters[state]", "Punjab"))
            .respond_with(body(json!([{
                "state": "Punjab",
                "market": "Khanna",
                "arrival_date": "12/06/2024",
                "min_price": "2,400",
                "max_price": "2,600",
                "modal_price": "2,500"
            }])))
            .expect(1)
            .mount(&server)
            .await;

        let record = source(&server, 0)
            .fetch("rice", Some(&Region::new("Punjab")))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(record.region.as_str(), "Punjab");
        assert_eq!(record.current, dec!(2500));
        assert_eq!(record.min, Some(dec!(2400)));
        assert_eq!(record.max, Some(dec!(2600)));
        assert_eq!(record.market.as_deref(), Some("Khanna"));
        assert_eq!(record.source, PriceSource::Live);
        assert_eq!(record.observed_at.date_naive(), NaiveDate::from_ymd_opt(2024, 6, 12).unwrap());
    }

    #[tokio::test]
    async fn test_state_name_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("filters[state]", "Punjab"))
            .respond_with(body(json!([])))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("filters[state_name]", "Punjab"))
            .respond_with(body(json!([{
                "state_name": "Punjab",
                "arrival_date": "12/06/2024",
                "modal_price": 2300
            }])))
            .expect(1)
            .mount(&server)
            .await;

        let record = source(&server, 0)
            .fetch("wheat", Some(&Region::new("Punjab")))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.current, dec!(2300));
        assert_eq!(record.region.as_str(), "Punjab");
    }

    #[tokio::test]
    async fn test_commodity_wide_fallback_anchors_all_regions() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param_is_missing("filters[state]"))
            .and(query_param_is_missing("filters[state_name]"))
            .and(query_param_is_missing("filters[market_name]"))
            .respond_with(body(json!([{
                "state": "Gujarat",
                "arrival_date": "12/06/2024",
                "modal_price": "2,000"
            }])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(body(json!([])))
            .mount(&server)
            .await;

        let record = source(&server, 0)
            .fetch("onion", Some(&Region::new("Maharashtra")))
            .await
            .unwrap()
            .unwrap();
        assert!(record.region.is_all());
        assert_eq!(record.current, dec!(2000));
    }

    #[tokio::test]
    async fn test_missing_key_makes_no_calls() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(body(json!([])))
            .expect(0)
            .mount(&server)
            .await;

        let source = AgmarknetSource::new(&config(&server, 0), &RateLimitConfig::default(), None)
            .unwrap();
        assert!(!source.is_available());

        let query = PriceQuery::new("rice", Some(Region::new("Punjab")));
        assert!(source.resolve(&query).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_server_error_surfaces_after_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(2)
            .mount(&server)
            .await;

        let query = PriceQuery::new("rice", Some(Region::new("Punjab")));
        let err = source(&server, 1).resolve(&query).await.unwrap_err();
        assert!(format!("{err:#}").contains("500"));
    }

    #[tokio::test]
    async fn test_auth_failure_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&server)
            .await;

        let query = PriceQuery::new("rice", None);
        assert!(source(&server, 3).resolve(&query).await.is_err());
    }
}
