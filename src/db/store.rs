use std::str::FromStr;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};

use crate::db::{CacheEntry, PriceCache, ProfileStore, ReferencePrice};
use crate::pricing::models::{Confidence, PriceRecord, PriceSource, Region};

const MIGRATIONS: &[(&str, &str)] = &[
    ("001_init", include_str!("../../migrations/001_init.sql")),
    ("002_seed_profiles", include_str!("../../migrations/002_seed_profiles.sql")),
];

/// SQLite-backed price cache and commodity profile store.
pub struct Store {
    pool: SqlitePool,
    freshness: Duration,
}

#[derive(Debug, Clone, FromRow)]
struct CacheRow {
    commodity: String,
    region: String,
    current_price: String,
    min_price: Option<String>,
    max_price: Option<String>,
    modal_price: Option<String>,
    unit: String,
    currency: String,
    source: String,
    confidence: Option<String>,
    market: Option<String>,
    note: Option<String>,
    observed_at: String,
    last_updated: String,
    expires_at: String,
}

#[derive(Debug, Clone, FromRow)]
struct ProfileRow {
    reference_price: String,
    unit: String,
    currency: String,
    updated_at: String,
}

/// Counts for the health endpoint.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheSummary {
    pub entries: i64,
    pub fresh_entries: i64,
    pub newest_update: Option<String>,
}

impl Store {
    pub async fn new(database_path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{database_path}"))
            .context("Invalid database path")?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        // Every in-memory connection is its own database, so pin the pool to
        // a single connection that never expires.
        let pool_options = if database_path == ":memory:" {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        let store = Self {
            pool,
            freshness: Duration::hours(24),
        };
        store.migrate().await?;

        Ok(store)
    }

    /// Override the 24h freshness window applied to new entries.
    pub fn with_freshness(mut self, window: Duration) -> Self {
        self.freshness = window;
        self
    }

    async fn migrate(&self) -> Result<()> {
        for (name, sql) in MIGRATIONS {
            // sqlx doesn't run multiple statements in one call
            for statement in sql.split(';') {
                let trimmed = statement.trim();
                if !trimmed.is_empty() {
                    sqlx::query(trimmed)
                        .execute(&self.pool)
                        .await
                        .with_context(|| format!("Failed to execute migration {name}: {trimmed}"))?;
                }
            }
        }
        Ok(())
    }

    /// Upsert a record as if written at `now`.
    pub async fn upsert_at(&self, record: &PriceRecord, now: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO price_cache
             (commodity, region, current_price, min_price, max_price, modal_price, unit, currency,
              source, confidence, market, note, observed_at, last_updated, expires_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.commodity)
        .bind(record.region.as_str())
        .bind(record.current.to_string())
        .bind(record.min.map(|d| d.to_string()))
        .bind(record.max.map(|d| d.to_string()))
        .bind(record.modal.map(|d| d.to_string()))
        .bind(&record.unit)
        .bind(&record.currency)
        .bind(record.source.as_str())
        .bind(record.confidence.map(|c| c.as_str()))
        .bind(&record.market)
        .bind(&record.note)
        .bind(timestamp(record.observed_at))
        .bind(timestamp(now))
        .bind(timestamp(now + self.freshness))
        .execute(&self.pool)
        .await
        .context("Failed to upsert cached price")?;
        Ok(())
    }

    pub async fn summary(&self) -> Result<CacheSummary> {
        let now = timestamp(Utc::now());
        let row: (i64, i64, Option<String>) = sqlx::query_as(
            "SELECT COUNT(*),
                    COALESCE(SUM(CASE WHEN expires_at > ? THEN 1 ELSE 0 END), 0),
                    MAX(last_updated)
             FROM price_cache",
        )
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .context("Failed to summarize price cache")?;

        Ok(CacheSummary {
            entries: row.0,
            fresh_entries: row.1,
            newest_update: row.2,
        })
    }
}

#[async_trait]
impl PriceCache for Store {
    async fn get(&self, commodity: &str, region: &Region) -> Result<Option<CacheEntry>> {
        let row = sqlx::query_as::<_, CacheRow>(
            "SELECT * FROM price_cache WHERE commodity = ? AND region = ?",
        )
        .bind(commodity)
        .bind(region.as_str())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch cached price")?;

        row.map(CacheEntry::try_from).transpose()
    }

    async fn latest_for_commodity(&self, commodity: &str) -> Result<Option<CacheEntry>> {
        let row = sqlx::query_as::<_, CacheRow>(
            "SELECT * FROM price_cache WHERE commodity = ? ORDER BY last_updated DESC LIMIT 1",
        )
        .bind(commodity)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch latest cached price")?;

        row.map(CacheEntry::try_from).transpose()
    }

    async fn upsert(&self, record: &PriceRecord) -> Result<()> {
        self.upsert_at(record, Utc::now()).await
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM price_cache WHERE last_updated < ?")
            .bind(timestamp(cutoff))
            .execute(&self.pool)
            .await
            .context("Failed to purge old cached prices")?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl ProfileStore for Store {
    async fn reference_price(&self, commodity: &str) -> Result<Option<ReferencePrice>> {
        let row = sqlx::query_as::<_, ProfileRow>(
            "SELECT reference_price, unit, currency, updated_at
             FROM commodity_profiles WHERE commodity = ?",
        )
        .bind(commodity)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch commodity profile")?;

        match row {
            Some(row) => Ok(Some(ReferencePrice {
                current: parse_decimal(&row.reference_price)?,
                unit: row.unit,
                currency: row.currency,
                updated_at: parse_timestamp(&row.updated_at)?,
            })),
            None => Ok(None),
        }
    }

    async fn update_reference_price(&self, commodity: &str, price: &ReferencePrice) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO commodity_profiles (commodity, reference_price, unit, currency, updated_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(commodity)
        .bind(price.current.to_string())
        .bind(&price.unit)
        .bind(&price.currency)
        .bind(timestamp(price.updated_at))
        .execute(&self.pool)
        .await
        .context("Failed to update commodity profile")?;
        Ok(())
    }
}

impl TryFrom<CacheRow> for CacheEntry {
    type Error = anyhow::Error;

    fn try_from(row: CacheRow) -> Result<Self> {
        let record = PriceRecord {
            commodity: row.commodity,
            region: Region::new(row.region),
            current: parse_decimal(&row.current_price)?,
            min: row.min_price.as_deref().map(parse_decimal).transpose()?,
            max: row.max_price.as_deref().map(parse_decimal).transpose()?,
            modal: row.modal_price.as_deref().map(parse_decimal).transpose()?,
            unit: row.unit,
            currency: row.currency,
            source: row.source.parse::<PriceSource>()?,
            observed_at: parse_timestamp(&row.observed_at)?,
            confidence: row.confidence.as_deref().and_then(|c| c.parse::<Confidence>().ok()),
            market: row.market,
            note: row.note,
            last_updated: None,
        };
        let last_updated = parse_timestamp(&row.last_updated)?;

        Ok(CacheEntry {
            record: PriceRecord {
                last_updated: Some(last_updated),
                ..record
            },
            last_updated,
            expires_at: parse_timestamp(&row.expires_at)?,
        })
    }
}

/// Fixed-width RFC 3339 so lexical order matches time order.
fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("Invalid timestamp in store: {s}"))?
        .with_timezone(&Utc))
}

fn parse_decimal(s: &str) -> Result<Decimal> {
    Decimal::from_str(s).with_context(|| format!("Invalid decimal in store: {s}"))
}
