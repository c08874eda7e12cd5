use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::Deserialize;

/// Engine configuration. Every field has a default so a missing file or
/// section degrades to the simulated and stored tiers instead of failing.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub live_market: LiveMarketConfig,
    pub estimation: EstimationConfig,
    pub rate_limit: RateLimitConfig,
    pub cache: CacheConfig,
    pub scheduler: SchedulerConfig,
    pub monitoring: MonitoringConfig,
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on a single tier's work within one resolution.
    pub tier_timeout_ms: u64,
    /// Copy live prices onto the commodity profile's reference price.
    pub sync_profiles: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tier_timeout_ms: 30_000,
            sync_profiles: true,
        }
    }
}

impl EngineConfig {
    pub fn tier_timeout(&self) -> Duration {
        Duration::from_millis(self.tier_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LiveMarketConfig {
    pub base_url: String,
    pub timeout_ms: u64,
    pub retries: u32,
    pub backoff_ms: u64,
    pub page_limit: u32,
    /// Log upstream failures at warn instead of debug.
    pub log_errors: bool,
}

impl Default for LiveMarketConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.data.gov.in/resource/9ef84268-d588-465a-a308-a864a43d0070"
                .to_string(),
            timeout_ms: 12_000,
            retries: 1,
            backoff_ms: 500,
            page_limit: 100,
            log_errors: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EstimationConfig {
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub timeout_ms: u64,
}

impl Default for EstimationConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.anthropic.com".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            max_tokens: 180,
            timeout_ms: 20_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub requests_per_second: u32,
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 5,
            burst_size: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub freshness_hours: i64,
    pub retention_days: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            freshness_hours: 24,
            retention_days: 30,
        }
    }
}

impl CacheConfig {
    pub fn freshness(&self) -> chrono::Duration {
        chrono::Duration::hours(self.freshness_hours)
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.retention_days)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub interval_seconds: u64,
    /// Upper bound on one (commodity, region) refresh.
    pub pair_timeout_seconds: u64,
    pub run_on_startup: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: 6 * 60 * 60,
            pair_timeout_seconds: 30,
            run_on_startup: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub log_level: String,
    pub json_logs: bool,
    pub bind: String,
    pub port: u16,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: true,
            bind: "127.0.0.1".to_string(),
            port: 9090,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "data/prices.db".to_string(),
        }
    }
}

impl DatabaseConfig {
}

/// Secrets loaded exclusively from environment variables.
/// Not serializable, not stored in config files.
pub struct Secrets {
    pub agmarknet_api_key: Option<SecretString>,
    pub anthropic_api_key: Option<SecretString>,
}

impl Secrets {
    pub fn from_env() -> Self {
        Self {
            agmarknet_api_key: secret_var("AGMARKNET_API_KEY"),
            anthropic_api_key: secret_var("ANTHROPIC_API_KEY"),
        }
    }
}

fn secret_var(name: &str) -> Option<SecretString> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(SecretString::from)
}

impl AppConfig {
    /// Load configuration from `path` (defaults if the file is absent),
    /// then apply environment overrides and read secrets. Also returns the
    /// overrides that were ignored, for logging once a subscriber exists.
    pub fn load(path: &Path) -> Result<(Self, Secrets, Vec<String>)> {
        dotenvy::dotenv().ok();

        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::from_toml_str(&contents)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        } else {
            Self::default()
        };

        let ignored = config.apply_overrides(|name| std::env::var(name).ok());

        Ok((config, Secrets::from_env(), ignored))
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("Invalid configuration")
    }

    /// Apply the recognized environment overrides via `lookup`. Values that
    /// fail to parse leave the setting unchanged and are returned as
    /// messages.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Vec<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut ignored = Vec::new();
        if let Some(v) = parse_override::<u64, _>(&lookup, "AGMARKNET_TIMEOUT_MS", &mut ignored) {
            self.live_market.timeout_ms = v;
        }
        if let Some(v) = parse_override::<u32, _>(&lookup, "AGMARKNET_RETRIES", &mut ignored) {
            self.live_market.retries = v;
        }
        if let Some(v) = parse_override::<bool, _>(&lookup, "LOG_AGMARKNET_ERRORS", &mut ignored) {
            self.live_market.log_errors = v;
        }
        if let Some(v) = parse_override::<u64, _>(&lookup, "PRICE_REFRESH_INTERVAL_SECS", &mut ignored) {
            self.scheduler.interval_seconds = v;
        }
        if let Some(v) = lookup("ESTIMATION_MODEL").filter(|v| !v.trim().is_empty()) {
            self.estimation.model = v;
        }
        ignored
    }
}

fn parse_override<T, F>(lookup: &F, name: &str, ignored: &mut Vec<String>) -> Option<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(name).filter(|v| !v.trim().is_empty())?;
    match raw.trim().to_lowercase().parse::<T>() {
        Ok(v) => Some(v),
        Err(e) => {
            ignored.push(format!("Ignoring {name}={raw}: {e}"));
            None
        }
    }
}
