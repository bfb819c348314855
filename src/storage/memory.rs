//! In-process store.
//!
//! The weather cache is a moka cache bounded by entry count whose own TTL
//! only purges; read-path freshness is still decided by `WeatherCache`.
//! History, summaries and credentials live in `RwLock`ed maps.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use moka::future::Cache;
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;

use super::{ApiKeyStore, HistoryStore, PersistenceError, SummaryStore, WeatherCacheStore};
use crate::types::{CacheEntry, HistoryRecord, LocationKey, StoredWeather, SummaryEntry};

pub struct MemoryStore {
    weather: Cache<LocationKey, CacheEntry<StoredWeather>>,
    history: RwLock<HashMap<LocationKey, Vec<HistoryRecord>>>,
    summaries: RwLock<HashMap<LocationKey, SummaryEntry>>,
    api_keys: RwLock<HashMap<String, String>>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("weather_entries", &self.weather.entry_count())
            .finish_non_exhaustive()
    }
}

impl MemoryStore {
    /// `capacity` bounds the weather cache; `expire_after` is the eager purge
    /// horizon (normally the weather TTL).
    pub fn new(capacity: u64, expire_after: Duration) -> Self {
        Self {
            weather: Cache::builder()
                .max_capacity(capacity)
                .time_to_live(expire_after)
                .build(),
            history: RwLock::new(HashMap::new()),
            summaries: RwLock::new(HashMap::new()),
            api_keys: RwLock::new(HashMap::new()),
        }
    }

    /// Seed a provider credential, typically from the environment.
    pub async fn with_api_key(self, provider: &str, secret: SecretString) -> Self {
        self.api_keys
            .write()
            .await
            .insert(provider.to_string(), secret.expose_secret().clone());
        self
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(10_000, Duration::from_secs(3600))
    }
}

#[async_trait]
impl WeatherCacheStore for MemoryStore {
    async fn get(
        &self,
        key: &LocationKey,
    ) -> Result<Option<CacheEntry<StoredWeather>>, PersistenceError> {
        Ok(self.weather.get(key).await)
    }

    async fn put(
        &self,
        key: &LocationKey,
        entry: CacheEntry<StoredWeather>,
    ) -> Result<(), PersistenceError> {
        self.weather.insert(key.clone(), entry).await;
        Ok(())
    }

    async fn purge_stored_before(&self, cutoff: DateTime<Utc>) -> Result<u64, PersistenceError> {
        let stale: Vec<_> = self
            .weather
            .iter()
            .filter(|(_, entry)| entry.stored_at < cutoff)
            .map(|(key, _)| key)
            .collect();
        for key in &stale {
            self.weather.invalidate(key.as_ref()).await;
        }
        self.weather.run_pending_tasks().await;
        Ok(stale.len() as u64)
    }
}

#[async_trait]
impl HistoryStore for MemoryStore {
    async fn append(&self, record: HistoryRecord) -> Result<(), PersistenceError> {
        self.history
            .write()
            .await
            .entry(record.location_key.clone())
            .or_default()
            .push(record);
        Ok(())
    }

    async fn recent(
        &self,
        key: &LocationKey,
        limit: usize,
    ) -> Result<Vec<HistoryRecord>, PersistenceError> {
        let history = self.history.read().await;
        let mut records = history.get(key).cloned().unwrap_or_default();
        records.sort_by(|a, b| {
            (b.recorded_at, b.sequence).cmp(&(a.recorded_at, a.sequence))
        });
        records.truncate(limit);
        Ok(records)
    }

    async fn purge_recorded_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, PersistenceError> {
        let mut history = self.history.write().await;
        let mut removed = 0u64;
        for records in history.values_mut() {
            let before = records.len();
            records.retain(|r| r.recorded_at >= cutoff);
            removed += (before - records.len()) as u64;
        }
        history.retain(|_, records| !records.is_empty());
        Ok(removed)
    }
}

#[async_trait]
impl SummaryStore for MemoryStore {
    async fn get(&self, key: &LocationKey) -> Result<Option<SummaryEntry>, PersistenceError> {
        Ok(self.summaries.read().await.get(key).cloned())
    }

    async fn put(&self, entry: SummaryEntry) -> Result<(), PersistenceError> {
        self.summaries
            .write()
            .await
            .insert(entry.location_key.clone(), entry);
        Ok(())
    }
}

#[async_trait]
impl ApiKeyStore for MemoryStore {
    async fn get(&self, provider: &str) -> Result<Option<SecretString>, PersistenceError> {
        Ok(self
            .api_keys
            .read()
            .await
            .get(provider)
            .map(|s| SecretString::new(s.clone())))
    }

    async fn put(&self, provider: &str, secret: SecretString) -> Result<(), PersistenceError> {
        self.api_keys
            .write()
            .await
            .insert(provider.to_string(), secret.expose_secret().clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{fixtures, Coordinates, SnapshotFingerprint};
    use chrono::{Duration as ChronoDuration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 1, 8, 0, 0).unwrap()
    }

    fn stored(temp: f64) -> StoredWeather {
        StoredWeather {
            coordinates: Coordinates::new(-17.83, 31.05),
            snapshot: fixtures::snapshot(temp, 1),
        }
    }

    fn record(key: &str, at: DateTime<Utc>, seq: u64) -> HistoryRecord {
        HistoryRecord {
            location_key: LocationKey::from_slug(key),
            recorded_at: at,
            sequence: seq,
            current: fixtures::snapshot(20.0, 0).current,
        }
    }

    #[tokio::test]
    async fn test_weather_put_overwrites() {
        let store = MemoryStore::default();
        let key = LocationKey::from_slug("harare");

        WeatherCacheStore::put(&store, &key, CacheEntry::new(stored(20.0), t0())).await.unwrap();
        WeatherCacheStore::put(&store, &key, CacheEntry::new(stored(25.0), t0())).await.unwrap();

        let entry = WeatherCacheStore::get(&store, &key).await.unwrap().unwrap();
        assert!((entry.payload.snapshot.current.temperature - 25.0).abs() < 1e-10);
    }

    #[tokio::test]
    async fn test_weather_missing_key() {
        let store = MemoryStore::default();
        let got = WeatherCacheStore::get(&store, &LocationKey::from_slug("nowhere")).await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn test_weather_purge() {
        let store = MemoryStore::default();
        let old = LocationKey::from_slug("old");
        let new = LocationKey::from_slug("new");
        WeatherCacheStore::put(&store, &old, CacheEntry::new(stored(20.0), t0())).await.unwrap();
        WeatherCacheStore::put(
            &store,
            &new,
            CacheEntry::new(stored(20.0), t0() + ChronoDuration::hours(1)),
        )
        .await
        .unwrap();

        let removed = store.purge_stored_before(t0() + ChronoDuration::minutes(30)).await.unwrap();
        assert_eq!(removed, 1);
        assert!(WeatherCacheStore::get(&store, &old).await.unwrap().is_none());
        assert!(WeatherCacheStore::get(&store, &new).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_history_recent_newest_first_with_sequence_tiebreak() {
        let store = MemoryStore::default();
        store.append(record("harare", t0(), 1)).await.unwrap();
        store.append(record("harare", t0() + ChronoDuration::minutes(20), 3)).await.unwrap();
        store.append(record("harare", t0() + ChronoDuration::minutes(20), 2)).await.unwrap();
        store.append(record("bulawayo", t0(), 4)).await.unwrap();

        let recent = store.recent(&LocationKey::from_slug("harare"), 10).await.unwrap();
        let seqs: Vec<u64> = recent.iter().map(|r| r.sequence).collect();
        assert_eq!(seqs, vec![3, 2, 1]);

        let limited = store.recent(&LocationKey::from_slug("harare"), 1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_history_purge() {
        let store = MemoryStore::default();
        store.append(record("harare", t0(), 1)).await.unwrap();
        store.append(record("harare", t0() + ChronoDuration::days(2), 2)).await.unwrap();

        let removed = store.purge_recorded_before(t0() + ChronoDuration::days(1)).await.unwrap();
        assert_eq!(removed, 1);
        let left = store.recent(&LocationKey::from_slug("harare"), 10).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].sequence, 2);
    }

    #[tokio::test]
    async fn test_summary_roundtrip() {
        let store = MemoryStore::default();
        let entry = SummaryEntry {
            location_key: LocationKey::from_slug("kariba"),
            text: "Hot and clear.".into(),
            generated_at: t0(),
            fingerprint: SnapshotFingerprint { temperature: 31.0, weather_code: 0 },
        };
        SummaryStore::put(&store, entry.clone()).await.unwrap();
        let got = SummaryStore::get(&store, &entry.location_key).await.unwrap();
        assert_eq!(got, Some(entry));
    }

    #[tokio::test]
    async fn test_api_key_absent_is_not_error() {
        let store = MemoryStore::default();
        assert!(ApiKeyStore::get(&store, "weatherapi").await.unwrap().is_none());

        let store = store.with_api_key("weatherapi", SecretString::new("k".into())).await;
        let key = ApiKeyStore::get(&store, "weatherapi").await.unwrap().unwrap();
        assert_eq!(key.expose_secret(), "k");
    }
}
