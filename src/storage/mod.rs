//! Persistence layer.
//!
//! Four independent namespaces keyed by location key (weather cache,
//! AI summaries, history) or provider name (credentials). Each is a trait
//! with single-key atomic operations only; no multi-key transactions.
//!
//! Two backends ship: [`memory::MemoryStore`] (moka-bounded weather cache,
//! in-process maps) and [`sqlite::SqliteStore`] (sqlx pool).

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;

use crate::types::{
    CacheEntry, HistoryRecord, LocationKey, StoredWeather, SummaryEntry, WeatherError,
};

/// Store read/write failure.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt record for {key}: {message}")]
    Corrupt { key: String, message: String },

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl From<PersistenceError> for WeatherError {
    fn from(err: PersistenceError) -> Self {
        WeatherError::Persistence(err.to_string())
    }
}

/// Weather cache namespace. Freshness is judged by the caller.
#[async_trait]
pub trait WeatherCacheStore: Send + Sync {
    async fn get(
        &self,
        key: &LocationKey,
    ) -> Result<Option<CacheEntry<StoredWeather>>, PersistenceError>;

    /// Overwrite any prior entry for `key`.
    async fn put(
        &self,
        key: &LocationKey,
        entry: CacheEntry<StoredWeather>,
    ) -> Result<(), PersistenceError>;

    /// Delete entries stored before `cutoff`. Returns the number removed.
    async fn purge_stored_before(&self, cutoff: DateTime<Utc>) -> Result<u64, PersistenceError>;
}

/// Append-only history namespace.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn append(&self, record: HistoryRecord) -> Result<(), PersistenceError>;

    /// Most recent records for `key`, newest first.
    async fn recent(
        &self,
        key: &LocationKey,
        limit: usize,
    ) -> Result<Vec<HistoryRecord>, PersistenceError>;

    async fn purge_recorded_before(&self, cutoff: DateTime<Utc>)
        -> Result<u64, PersistenceError>;
}

/// AI summary namespace.
#[async_trait]
pub trait SummaryStore: Send + Sync {
    async fn get(&self, key: &LocationKey) -> Result<Option<SummaryEntry>, PersistenceError>;

    /// Overwrite any prior summary for the entry's key.
    async fn put(&self, entry: SummaryEntry) -> Result<(), PersistenceError>;
}

/// Provider credentials namespace. A missing key is `Ok(None)`.
#[async_trait]
pub trait ApiKeyStore: Send + Sync {
    async fn get(&self, provider: &str) -> Result<Option<SecretString>, PersistenceError>;

    async fn put(&self, provider: &str, secret: SecretString) -> Result<(), PersistenceError>;
}
