//! Fetch orchestrator.
//!
//! The cache-aside control flow behind every weather request:
//!
//! 1. Reject coordinates outside the supported bounding box.
//! 2. Resolve the location key.
//! 3. Serve a fresh cache entry if there is one.
//! 4. Otherwise try the premium provider, then the free one.
//! 5. Spawn the cache write and history append as detached tasks.
//!
//! Only a free-provider failure surfaces as an error. Concurrent misses for
//! one key may each fetch and write; the last write wins.

use futures::future::join_all;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cache::WeatherCache;
use crate::geo::{BoundingBox, GeoResolver, NearestLocation, Resolution};
use crate::history::HistoryRecorder;
use crate::providers::{PremiumAttempt, ProviderGateway};
use crate::types::{
    Coordinates, HistoryRecord, LocationKey, WeatherError, WeatherSnapshot, WeatherSource,
};

// ---------------------------------------------------------------------------
// Pending writes
// ---------------------------------------------------------------------------

/// Handles to the best-effort writes a fresh fetch spawned.
///
/// The tasks run to completion whether or not this is kept. Each logs its
/// own failure; dropping the handle detaches them.
#[derive(Debug, Default)]
pub struct PendingWrites {
    tasks: Vec<JoinHandle<bool>>,
}

impl PendingWrites {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait for every write. Returns how many failed.
    pub async fn settle(self) -> usize {
        join_all(self.tasks)
            .await
            .into_iter()
            .filter(|r| !matches!(r, Ok(true)))
            .count()
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Result of one weather request.
#[derive(Debug)]
pub struct WeatherOutcome {
    pub snapshot: WeatherSnapshot,
    pub source: WeatherSource,
    pub location_key: LocationKey,
    pub nearest: Option<NearestLocation>,
    /// Provider that answered; `None` on a cache hit.
    pub provider: Option<String>,
    pub pending: PendingWrites,
}

pub struct FetchOrchestrator {
    bounds: BoundingBox,
    geo: Arc<GeoResolver>,
    cache: WeatherCache,
    gateway: Arc<ProviderGateway>,
    history: HistoryRecorder,
}

impl FetchOrchestrator {
    pub fn new(
        bounds: BoundingBox,
        geo: Arc<GeoResolver>,
        cache: WeatherCache,
        gateway: Arc<ProviderGateway>,
        history: HistoryRecorder,
    ) -> Self {
        Self {
            bounds,
            geo,
            cache,
            gateway,
            history,
        }
    }

    pub fn bounds(&self) -> BoundingBox {
        self.bounds
    }

    pub fn resolver(&self) -> &GeoResolver {
        &self.geo
    }

    pub fn gateway(&self) -> &ProviderGateway {
        &self.gateway
    }

    pub fn history(&self) -> &HistoryRecorder {
        &self.history
    }

    pub fn cache(&self) -> &WeatherCache {
        &self.cache
    }

    /// Accept only finite coordinates inside the bounding box.
    pub fn check_bounds(&self, coords: Coordinates) -> Result<(), WeatherError> {
        let Coordinates { latitude, longitude } = coords;
        if !latitude.is_finite() || !longitude.is_finite() {
            return Err(WeatherError::InvalidInput("coordinates must be finite numbers".into()));
        }
        if !self.bounds.contains(latitude, longitude) {
            let b = self.bounds;
            return Err(WeatherError::InvalidInput(format!(
                "coordinates {coords} outside supported region lat [{}, {}], lon [{}, {}]",
                b.min_lat, b.max_lat, b.min_lon, b.max_lon
            )));
        }
        Ok(())
    }

    /// Resolve `coords` inside the bounding box.
    pub fn resolve(&self, coords: Coordinates) -> Result<Resolution, WeatherError> {
        self.check_bounds(coords)?;
        Ok(self.geo.resolve(coords))
    }

    /// The nearest known location to `coords` and its cache key.
    ///
    /// `NotFound` outside the bounding box or with an empty catalog.
    pub fn nearest_known(&self, coords: Coordinates) -> Result<(NearestLocation, LocationKey), WeatherError> {
        self.check_bounds(coords)
            .map_err(|_| WeatherError::NotFound(format!("no known location near {coords}: outside the supported region")))?;
        let Resolution { key, nearest } = self.geo.resolve(coords);
        let nearest = nearest.ok_or_else(|| WeatherError::NotFound("no known locations are loaded".into()))?;
        Ok((nearest, key))
    }

    /// Most recent history for the location `coords` resolves to, newest first.
    pub async fn recent_history(
        &self,
        coords: Coordinates,
        limit: usize,
    ) -> Result<(LocationKey, Vec<HistoryRecord>), WeatherError> {
        let Resolution { key, .. } = self.resolve(coords)?;
        let records = self.history.recent(&key, limit).await?;
        Ok((key, records))
    }

    pub async fn get_weather(&self, coords: Coordinates) -> Result<WeatherOutcome, WeatherError> {
        let Resolution { key, nearest } = self.resolve(coords)?;

        if let Some(snapshot) = self.cache.get(&key).await {
            return Ok(WeatherOutcome {
                snapshot,
                source: WeatherSource::Cache,
                location_key: key,
                nearest,
                provider: None,
                pending: PendingWrites::none(),
            });
        }

        let (snapshot, source, provider) = self.fetch_upstream(&key, coords).await?;
        info!(location_key = %key, %source, provider = %provider, "Fetched fresh weather");

        let pending = self.persist(&key, coords, &snapshot);
        Ok(WeatherOutcome {
            snapshot,
            source,
            location_key: key,
            nearest,
            provider: Some(provider),
            pending,
        })
    }

    /// Premium first when eligible, then free. Premium failures of any kind
    /// are logged and absorbed.
    async fn fetch_upstream(
        &self,
        key: &LocationKey,
        coords: Coordinates,
    ) -> Result<(WeatherSnapshot, WeatherSource, String), WeatherError> {
        match self.gateway.fetch_premium(coords).await {
            PremiumAttempt::Fetched(Ok(snapshot)) => {
                let name = self.gateway.premium_name().unwrap_or("premium").to_string();
                return Ok((snapshot, WeatherSource::Premium, name));
            }
            PremiumAttempt::Fetched(Err(e)) => match WeatherError::from(e) {
                WeatherError::RateLimited { provider } => {
                    warn!(%provider, location_key = %key, "Premium provider rate limited, falling back");
                }
                cause => {
                    warn!(location_key = %key, error = %cause, "Premium provider failed, falling back");
                }
            },
            PremiumAttempt::Skipped(reason) => {
                debug!(location_key = %key, ?reason, "Premium provider skipped");
            }
        }

        match self.gateway.fetch_free(coords).await {
            Ok(snapshot) => Ok((snapshot, WeatherSource::Free, self.gateway.free_name().to_string())),
            Err(e) => {
                let cause = WeatherError::from(e);
                error!(location_key = %key, error = %cause, "Free provider failed, no fallback left");
                Err(WeatherError::ProvidersExhausted {
                    location_key: key.clone(),
                    message: cause.to_string(),
                })
            }
        }
    }

    /// Spawn the cache write and the history append.
    ///
    /// Both are detached and independent: each is attempted regardless of
    /// the other, and neither can fail the request that triggered it.
    fn persist(&self, key: &LocationKey, coords: Coordinates, snapshot: &WeatherSnapshot) -> PendingWrites {
        let cache = self.cache.clone();
        let cache_key = key.clone();
        let cached = snapshot.clone();
        let cache_write = tokio::spawn(async move {
            match cache.put(&cache_key, coords, cached).await {
                Ok(()) => true,
                Err(e) => {
                    error!(location_key = %cache_key, error = %e, "Weather cache write failed");
                    false
                }
            }
        });

        let history = self.history.clone();
        let history_key = key.clone();
        let current = snapshot.current.clone();
        let history_write = tokio::spawn(async move {
            match history.append(&history_key, current).await {
                Ok(_) => true,
                Err(e) => {
                    error!(location_key = %history_key, error = %e, "History append failed");
                    false
                }
            }
        });

        PendingWrites {
            tasks: vec![cache_write, history_write],
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
