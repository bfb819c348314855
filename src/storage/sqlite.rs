//! SQLite-backed store.
//!
//! One table per namespace. Payloads are stored as JSON text, timestamps
//! as Unix milliseconds. Expired weather rows are left in place until the
//! periodic purge removes them; reads never depend on that purge.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::{debug, info};

use super::{ApiKeyStore, HistoryStore, PersistenceError, SummaryStore, WeatherCacheStore};
use crate::types::{
    CacheEntry, Coordinates, CurrentConditions, HistoryRecord, LocationKey, SnapshotFingerprint,
    StoredWeather, SummaryEntry, WeatherSnapshot,
};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS weather_cache (
        location_key TEXT PRIMARY KEY,
        latitude     REAL NOT NULL,
        longitude    REAL NOT NULL,
        payload      TEXT NOT NULL,
        stored_at    INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_weather_cache_stored_at ON weather_cache (stored_at)",
    "CREATE TABLE IF NOT EXISTS weather_history (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        location_key TEXT NOT NULL,
        recorded_at  INTEGER NOT NULL,
        sequence     INTEGER NOT NULL,
        payload      TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_weather_history_key_time
        ON weather_history (location_key, recorded_at)",
    "CREATE TABLE IF NOT EXISTS ai_summaries (
        location_key TEXT PRIMARY KEY,
        summary      TEXT NOT NULL,
        generated_at INTEGER NOT NULL,
        temperature  REAL NOT NULL,
        weather_code INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS api_keys (
        provider TEXT PRIMARY KEY,
        secret   TEXT NOT NULL
    )",
];

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `url` and ensure the schema.
    pub async fn connect(url: &str) -> Result<Self, PersistenceError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        // In-memory databases are per-connection, so keep a single one.
        let max_connections = if url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        info!(url, "SQLite store ready");
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), PersistenceError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

fn from_millis(key: &str, ms: i64) -> Result<DateTime<Utc>, PersistenceError> {
    DateTime::<Utc>::from_timestamp_millis(ms).ok_or_else(|| PersistenceError::Corrupt {
        key: key.to_string(),
        message: format!("timestamp out of range: {ms}"),
    })
}

#[async_trait]
impl WeatherCacheStore for SqliteStore {
    async fn get(
        &self,
        key: &LocationKey,
    ) -> Result<Option<CacheEntry<StoredWeather>>, PersistenceError> {
        let row = sqlx::query_as::<_, (f64, f64, String, i64)>(
            "SELECT latitude, longitude, payload, stored_at FROM weather_cache WHERE location_key = ?",
        )
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some((latitude, longitude, payload, stored_at)) = row else {
            return Ok(None);
        };
        let snapshot: WeatherSnapshot = serde_json::from_str(&payload)?;
        Ok(Some(CacheEntry::new(
            StoredWeather {
                coordinates: Coordinates::new(latitude, longitude),
                snapshot,
            },
            from_millis(key.as_str(), stored_at)?,
        )))
    }

    async fn put(
        &self,
        key: &LocationKey,
        entry: CacheEntry<StoredWeather>,
    ) -> Result<(), PersistenceError> {
        let payload = serde_json::to_string(&entry.payload.snapshot)?;
        sqlx::query(
            "INSERT INTO weather_cache (location_key, latitude, longitude, payload, stored_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(location_key) DO UPDATE SET
                latitude = excluded.latitude,
                longitude = excluded.longitude,
                payload = excluded.payload,
                stored_at = excluded.stored_at",
        )
        .bind(key.as_str())
        .bind(entry.payload.coordinates.latitude)
        .bind(entry.payload.coordinates.longitude)
        .bind(payload)
        .bind(entry.stored_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn purge_stored_before(&self, cutoff: DateTime<Utc>) -> Result<u64, PersistenceError> {
        let result = sqlx::query("DELETE FROM weather_cache WHERE stored_at < ?")
            .bind(cutoff.timestamp_millis())
            .execute(&self.pool)
            .await?;
        debug!(removed = result.rows_affected(), "Purged expired weather cache rows");
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl HistoryStore for SqliteStore {
    async fn append(&self, record: HistoryRecord) -> Result<(), PersistenceError> {
        let payload = serde_json::to_string(&record.current)?;
        sqlx::query(
            "INSERT INTO weather_history (location_key, recorded_at, sequence, payload)
             VALUES (?, ?, ?, ?)",
        )
        .bind(record.location_key.as_str())
        .bind(record.recorded_at.timestamp_millis())
        .bind(record.sequence as i64)
        .bind(payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent(
        &self,
        key: &LocationKey,
        limit: usize,
    ) -> Result<Vec<HistoryRecord>, PersistenceError> {
        let rows = sqlx::query_as::<_, (i64, i64, String)>(
            "SELECT recorded_at, sequence, payload FROM weather_history
             WHERE location_key = ?
             ORDER BY recorded_at DESC, sequence DESC, id DESC
             LIMIT ?",
        )
        .bind(key.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(recorded_at, sequence, payload)| -> Result<HistoryRecord, PersistenceError> {
                let current: CurrentConditions = serde_json::from_str(&payload)?;
                Ok(HistoryRecord {
                    location_key: key.clone(),
                    recorded_at: from_millis(key.as_str(), recorded_at)?,
                    sequence: sequence as u64,
                    current,
                })
            })
            .collect()
    }

    async fn purge_recorded_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, PersistenceError> {
        let result = sqlx::query("DELETE FROM weather_history WHERE recorded_at < ?")
            .bind(cutoff.timestamp_millis())
            .execute(&self.pool)
            .await?;
        debug!(removed = result.rows_affected(), "Purged aged-out history rows");
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl SummaryStore for SqliteStore {
    async fn get(&self, key: &LocationKey) -> Result<Option<SummaryEntry>, PersistenceError> {
        let row = sqlx::query_as::<_, (String, i64, f64, i64)>(
            "SELECT summary, generated_at, temperature, weather_code
             FROM ai_summaries WHERE location_key = ?",
        )
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(text, generated_at, temperature, weather_code)| -> Result<SummaryEntry, PersistenceError> {
            Ok(SummaryEntry {
                location_key: key.clone(),
                text,
                generated_at: from_millis(key.as_str(), generated_at)?,
                fingerprint: SnapshotFingerprint {
                    temperature,
                    weather_code: weather_code as i32,
                },
            })
        })
        .transpose()
    }

    async fn put(&self, entry: SummaryEntry) -> Result<(), PersistenceError> {
        sqlx::query(
            "INSERT INTO ai_summaries (location_key, summary, generated_at, temperature, weather_code)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(location_key) DO UPDATE SET
                summary = excluded.summary,
                generated_at = excluded.generated_at,
                temperature = excluded.temperature,
                weather_code = excluded.weather_code",
        )
        .bind(entry.location_key.as_str())
        .bind(&entry.text)
        .bind(entry.generated_at.timestamp_millis())
        .bind(entry.fingerprint.temperature)
        .bind(entry.fingerprint.weather_code as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ApiKeyStore for SqliteStore {
    async fn get(&self, provider: &str) -> Result<Option<SecretString>, PersistenceError> {
        let row = sqlx::query_as::<_, (String,)>("SELECT secret FROM api_keys WHERE provider = ?")
            .bind(provider)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(secret,)| SecretString::new(secret)))
    }

    async fn put(&self, provider: &str, secret: SecretString) -> Result<(), PersistenceError> {
        sqlx::query(
            "INSERT INTO api_keys (provider, secret) VALUES (?, ?)
             ON CONFLICT(provider) DO UPDATE SET secret = excluded.secret",
        )
        .bind(provider)
        .bind(secret.expose_secret().as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
