//! Weather cache: last fetched snapshot per location key, with a TTL.

use chrono::Duration;
use std::sync::Arc;
use tracing::{debug, error};

use crate::clock::Clock;
use crate::storage::{PersistenceError, WeatherCacheStore};
use crate::types::{CacheEntry, Coordinates, LocationKey, StoredWeather, WeatherSnapshot};

/// TTL view over a [`WeatherCacheStore`].
///
/// Read-path correctness depends only on the freshness check here, never on
/// the backing store having purged expired rows.
#[derive(Clone)]
pub struct WeatherCache {
    store: Arc<dyn WeatherCacheStore>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl WeatherCache {
    pub fn new(store: Arc<dyn WeatherCacheStore>, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self { store, ttl, clock }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The fresh snapshot for `key`, or `None`.
    ///
    /// Absent, expired and unreadable entries are all a miss.
    pub async fn get(&self, key: &LocationKey) -> Option<WeatherSnapshot> {
        let entry = match self.store.get(key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                debug!(location_key = %key, "Weather cache miss (absent)");
                return None;
            }
            Err(e) => {
                error!(location_key = %key, error = %e, "Weather cache read failed, treating as miss");
                return None;
            }
        };

        let now = self.clock.now();
        if entry.is_fresh(now, self.ttl) {
            debug!(location_key = %key, age_secs = (now - entry.stored_at).num_seconds(), "Weather cache hit");
            Some(entry.payload.snapshot)
        } else {
            debug!(location_key = %key, "Weather cache miss (expired)");
            None
        }
    }

    /// Overwrite the entry for `key`, resetting its age to zero.
    pub async fn put(
        &self,
        key: &LocationKey,
        coordinates: Coordinates,
        snapshot: WeatherSnapshot,
    ) -> Result<(), PersistenceError> {
        let entry = CacheEntry::new(StoredWeather { coordinates, snapshot }, self.clock.now());
        self.store.put(key, entry).await
    }

    /// Delete entries that can no longer be served.
    pub async fn purge_expired(&self) -> Result<u64, PersistenceError> {
        self.store.purge_stored_before(self.clock.now() - self.ttl).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::memory::MemoryStore;
    use crate::types::fixtures;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};

    fn setup() -> (WeatherCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 1, 15, 9, 0, 0).unwrap()));
        let cache = WeatherCache::new(
            Arc::new(MemoryStore::default()),
            Duration::minutes(15),
            clock.clone(),
        );
        (cache, clock)
    }

    fn harare() -> (LocationKey, Coordinates) {
        (LocationKey::from_slug("harare"), Coordinates::new(-17.83, 31.05))
    }

    #[tokio::test]
    async fn test_hit_just_before_ttl_miss_after() {
        let (cache, clock) = setup();
        let (key, coords) = harare();
        cache.put(&key, coords, fixtures::snapshot(22.0, 1)).await.unwrap();

        clock.advance(Duration::minutes(15) - Duration::milliseconds(1));
        assert!(cache.get(&key).await.is_some());

        clock.advance(Duration::milliseconds(2));
        assert!(cache.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_exact_ttl_is_a_miss() {
        let (cache, clock) = setup();
        let (key, coords) = harare();
        cache.put(&key, coords, fixtures::snapshot(22.0, 1)).await.unwrap();
        clock.advance(Duration::minutes(15));
        assert!(cache.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_put_resets_age() {
        let (cache, clock) = setup();
        let (key, coords) = harare();
        cache.put(&key, coords, fixtures::snapshot(22.0, 1)).await.unwrap();
        clock.advance(Duration::minutes(14));
        cache.put(&key, coords, fixtures::snapshot(30.0, 1)).await.unwrap();
        clock.advance(Duration::minutes(14));

        let snap = cache.get(&key).await.unwrap();
        assert!((snap.current.temperature - 30.0).abs() < 1e-10);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let (cache, clock) = setup();
        let (key, coords) = harare();
        cache.put(&key, coords, fixtures::snapshot(22.0, 1)).await.unwrap();
        clock.advance(Duration::minutes(20));
        assert_eq!(cache.purge_expired().await.unwrap(), 1);
    }

    struct BrokenStore;

    #[async_trait]
    impl WeatherCacheStore for BrokenStore {
        async fn get(
            &self,
            _key: &LocationKey,
        ) -> Result<Option<CacheEntry<StoredWeather>>, PersistenceError> {
            Err(PersistenceError::Unavailable("disk on fire".into()))
        }

        async fn put(
            &self,
            _key: &LocationKey,
            _entry: CacheEntry<StoredWeather>,
        ) -> Result<(), PersistenceError> {
            Err(PersistenceError::Unavailable("disk on fire".into()))
        }

        async fn purge_stored_before(&self, _cutoff: DateTime<Utc>) -> Result<u64, PersistenceError> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_read_failure_is_a_miss() {
        let cache = WeatherCache::new(
            Arc::new(BrokenStore),
            Duration::minutes(15),
            Arc::new(crate::clock::SystemClock),
        );
        let (key, coords) = harare();
        assert!(cache.get(&key).await.is_none());
        assert!(cache.put(&key, coords, fixtures::snapshot(20.0, 0)).await.is_err());
    }
}
