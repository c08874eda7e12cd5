//! AI-estimated prices.
//!
//! Asks the model for a structured price estimate and accepts it only when
//! every number is finite and positive and `min <= current <= max`.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, info, instrument};

use crate::pricing::models::{
    round_price, Confidence, PriceQuery, PriceRecord, PriceSource, DEFAULT_CURRENCY, DEFAULT_UNIT,
    MAX_PRICE,
};
use crate::sources::claude::ClaudeClient;
use crate::sources::PriceTier;

pub struct AiEstimator {
    claude: Option<ClaudeClient>,
}

impl AiEstimator {
    /// `None` leaves the tier permanently unavailable (no API key).
    pub fn new(claude: Option<ClaudeClient>) -> Self {
        Self { claude }
    }

    #[instrument(skip(self, claude, query), fields(commodity = %query.commodity))]
    async fn estimate(&self, claude: &ClaudeClient, query: &PriceQuery) -> Result<PriceRecord> {
        let user_prompt = build_user_prompt(query);
        let reply = claude.complete(SYSTEM_PROMPT, &user_prompt).await?;
        let record = parse_estimate(&reply.text, query)?;

        info!(
            region = %record.region,
            current = %record.current,
            tokens = reply.input_tokens + reply.output_tokens,
            "AI price estimate accepted"
        );
        Ok(record)
    }
}

#[async_trait]
impl PriceTier for AiEstimator {
    async fn resolve(&self, query: &PriceQuery) -> Result<Option<PriceRecord>> {
        let Some(claude) = &self.claude else {
            debug!("ANTHROPIC_API_KEY not set, skipping AI estimate");
            return Ok(None);
        };
        self.estimate(claude, query).await.map(Some)
    }

    fn source(&self) -> PriceSource {
        PriceSource::AiEstimated
    }

    fn online_only(&self) -> bool {
        true
    }

    fn is_available(&self) -> bool {
        self.claude.is_some()
    }

    fn name(&self) -> &str {
        "ai-estimate"
    }
}

const SYSTEM_PROMPT: &str = r#"You estimate current wholesale agricultural commodity prices in Indian mandis.
Respond with ONLY valid JSON, no explanations outside the JSON structure.

Your response MUST follow this exact schema:
{
  "currentPrice": <number>,
  "minPrice": <number>,
  "maxPrice": <number>,
  "unit": "per quintal",
  "currency": "INR",
  "confidence": "<low|medium|high>",
  "note": "<one short sentence>"
}

All prices must be positive and satisfy minPrice <= currentPrice <= maxPrice."#;

/// Commodity and location text are cleaned caller input; strip anything
/// that could break out of the prompt structure.
fn sanitize(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_control())
        .take(80)
        .collect::<String>()
        .replace("```", "")
}

fn build_user_prompt(query: &PriceQuery) -> String {
    let location = query
        .region
        .as_ref()
        .map(|r| sanitize(r.as_str()))
        .unwrap_or_else(|| "India (national average)".to_string());

    format!(
        "Commodity: {commodity}\nLocation: {location}\n\n\
         Estimate today's wholesale mandi price per quintal in INR.",
        commodity = sanitize(&query.commodity),
        location = location,
    )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEstimate {
    current_price: f64,
    min_price: f64,
    max_price: f64,
    #[serde(default)]
    unit: Option<String>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    confidence: Option<String>,
    #[serde(default)]
    note: Option<String>,
}

impl RawEstimate {
    /// Reject non-finite or non-positive values and inverted bounds, then
    /// round each price to whole currency units.
    fn try_into_record(self, query: &PriceQuery) -> Result<PriceRecord> {
        let current = to_price("currentPrice", self.current_price)?;
        let min = to_price("minPrice", self.min_price)?;
        let max = to_price("maxPrice", self.max_price)?;

        if min > current || current > max {
            bail!("Estimate bounds out of order: min={min} current={current} max={max}");
        }

        let mut record = PriceRecord::new(
            query.commodity.clone(),
            query.target_region(),
            current,
            PriceSource::AiEstimated,
        )
        .with_range(Some(min), Some(max))
        .with_unit(non_empty(self.unit).unwrap_or_else(|| DEFAULT_UNIT.to_string()));
        record.currency = non_empty(self.currency).unwrap_or_else(|| DEFAULT_CURRENCY.to_string());
        record.confidence = self.confidence.and_then(|c| c.parse::<Confidence>().ok());
        record.note = non_empty(self.note);
        Ok(record)
    }
}

fn to_price(field: &'static str, value: f64) -> Result<Decimal> {
    if !value.is_finite() {
        bail!("Estimate returned non-finite {field}: {value}");
    }
    let price = Decimal::try_from(value)
        .with_context(|| format!("Failed to convert {field} to Decimal"))?;
    let price = round_price(price);
    if price <= Decimal::ZERO {
        bail!("Estimate returned non-positive {field}: {value}");
    }
    if price > MAX_PRICE {
        bail!("Estimate returned implausible {field}: {value}");
    }
    Ok(price)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Parse the model's reply into a record anchored to the requested region.
fn parse_estimate(text: &str, query: &PriceQuery) -> Result<PriceRecord> {
    let json_str = extract_json(text).context("No valid JSON found in estimate response")?;

    let raw: RawEstimate = serde_json::from_str(&json_str)
        .with_context(|| format!("Failed to parse estimate JSON: {json_str}"))?;

    raw.try_into_record(query)
}

/// Extract a JSON object from text that may wrap it in a markdown code block
/// or surround it with prose.
pub fn extract_json(text: &str) -> Option<String> {
    try_markdown_block(text, "```json")
        .or_else(|| try_markdown_block(text, "```"))
        .or_else(|| try_raw_json_object(text))
}

fn try_markdown_block(text: &str, marker: &str) -> Option<String> {
    let start = text.find(marker)? + marker.len();
    let body_start = text[start..]
        .find('\n')
        .map(|n| start + n + 1)
        .unwrap_or(start);
    let end = text[body_start..].find("```")?;
    let candidate = text[body_start..body_start + end].trim();

    serde_json::from_str::<serde_json::Value>(candidate).ok()?;
    Some(candidate.to_string())
}

/// Brace-depth scan that ignores braces inside string literals.
fn try_raw_json_object(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let mut depth: i32 = 0;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in text[start..].char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    let candidate = &text[start..start + i + 1];
                    return serde_json::from_str::<serde_json::Value>(candidate)
                        .ok()
                        .map(|_| candidate.to_string());
                }
            }
            _ => {}
        }
    }
    None
}
