//! Shared types for the weather service.
//!
//! These types form the data model used across all modules. Providers
//! normalise into [`WeatherSnapshot`], the caches and history store wrap it,
//! and the HTTP layer serialises it unchanged.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of days in every forecast snapshot.
pub const FORECAST_DAYS: usize = 7;

/// Number of hourly entries in every forecast snapshot.
pub const FORECAST_HOURS: usize = FORECAST_DAYS * 24;

// ---------------------------------------------------------------------------
// Locations
// ---------------------------------------------------------------------------

/// A latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.4}, {:.4})", self.latitude, self.longitude)
    }
}

/// Identifies one cache bucket: a known location's slug or a synthetic
/// rounded-coordinate key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocationKey(String);

impl LocationKey {
    /// Precision used for synthetic keys (decimal places).
    pub const SYNTHETIC_PRECISION: i32 = 2;

    pub fn from_slug(slug: impl Into<String>) -> Self {
        Self(slug.into())
    }

    /// Build the synthetic key for coordinates that have no known location.
    ///
    /// Identical rounded coordinates always produce the identical key.
    pub fn synthetic(coords: Coordinates) -> Self {
        let lat = round_to(coords.latitude, Self::SYNTHETIC_PRECISION);
        let lon = round_to(coords.longitude, Self::SYNTHETIC_PRECISION);
        Self(format!("geo:{lat:.2}:{lon:.2}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_synthetic(&self) -> bool {
        self.0.starts_with("geo:")
    }
}

impl fmt::Display for LocationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Round to `places` decimals, folding negative zero into zero so that
/// `-0.001` and `0.001` land in the same bucket.
fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor + 0.0
}

/// Immutable reference data for a named place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnownLocation {
    pub slug: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Metres above sea level.
    pub elevation: f64,
    #[serde(default)]
    pub province: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl KnownLocation {
    pub fn coordinates(&self) -> Coordinates {
        Coordinates::new(self.latitude, self.longitude)
    }

    pub fn key(&self) -> LocationKey {
        LocationKey::from_slug(self.slug.clone())
    }
}

// ---------------------------------------------------------------------------
// Weather snapshot
// ---------------------------------------------------------------------------

/// The canonical weather payload for one location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherSnapshot {
    pub latitude: f64,
    pub longitude: f64,
    /// IANA timezone the hourly/daily axes are expressed in.
    pub timezone: String,
    pub utc_offset_seconds: i32,
    pub current: CurrentConditions,
    pub hourly: HourlySeries,
    pub daily: DailySeries,
}

/// Current conditions at observation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentConditions {
    pub observed_at: NaiveDateTime,
    /// °C
    pub temperature: f64,
    /// °C
    pub apparent_temperature: f64,
    /// %
    pub humidity: f64,
    /// mm
    pub precipitation: f64,
    /// WMO weather interpretation code.
    pub weather_code: i32,
    /// %
    pub cloud_cover: f64,
    /// km/h
    pub wind_speed: f64,
    /// degrees
    pub wind_direction: f64,
    /// km/h
    pub wind_gusts: f64,
    pub uv_index: f64,
    /// hPa
    pub surface_pressure: f64,
    pub is_day: bool,
}

/// Hourly forecast: parallel arrays sharing the `time` axis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HourlySeries {
    pub time: Vec<NaiveDateTime>,
    pub temperature: Vec<f64>,
    pub humidity: Vec<f64>,
    pub precipitation_probability: Vec<f64>,
    pub precipitation: Vec<f64>,
    pub weather_code: Vec<i32>,
    pub cloud_cover: Vec<f64>,
    pub wind_speed: Vec<f64>,
    pub wind_direction: Vec<f64>,
    pub uv_index: Vec<f64>,
    pub is_day: Vec<bool>,
}

impl HourlySeries {
    /// Lengths of every field, in declaration order.
    pub fn field_lengths(&self) -> [usize; 11] {
        [
            self.time.len(),
            self.temperature.len(),
            self.humidity.len(),
            self.precipitation_probability.len(),
            self.precipitation.len(),
            self.weather_code.len(),
            self.cloud_cover.len(),
            self.wind_speed.len(),
            self.wind_direction.len(),
            self.uv_index.len(),
            self.is_day.len(),
        ]
    }
}

/// Daily forecast: parallel arrays sharing the `time` axis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DailySeries {
    pub time: Vec<NaiveDate>,
    pub weather_code: Vec<i32>,
    pub temperature_max: Vec<f64>,
    pub temperature_min: Vec<f64>,
    pub precipitation_sum: Vec<f64>,
    pub precipitation_probability_max: Vec<f64>,
    pub wind_speed_max: Vec<f64>,
    pub wind_gusts_max: Vec<f64>,
    pub uv_index_max: Vec<f64>,
}

impl DailySeries {
    pub fn field_lengths(&self) -> [usize; 9] {
        [
            self.time.len(),
            self.weather_code.len(),
            self.temperature_max.len(),
            self.temperature_min.len(),
            self.precipitation_sum.len(),
            self.precipitation_probability_max.len(),
            self.wind_speed_max.len(),
            self.wind_gusts_max.len(),
            self.uv_index_max.len(),
        ]
    }
}

impl WeatherSnapshot {
    /// Check the granularity contract: 7×24 hourly and 7 daily entries,
    /// equal parallel lengths, strictly increasing timestamps.
    ///
    /// Returns a description of the first violation found.
    pub fn validate(&self) -> Result<(), String> {
        let hourly = self.hourly.field_lengths();
        if hourly.iter().any(|&n| n != FORECAST_HOURS) {
            return Err(format!(
                "hourly series must have {FORECAST_HOURS} entries per field, got {hourly:?}"
            ));
        }
        let daily = self.daily.field_lengths();
        if daily.iter().any(|&n| n != FORECAST_DAYS) {
            return Err(format!(
                "daily series must have {FORECAST_DAYS} entries per field, got {daily:?}"
            ));
        }
        if !self.hourly.time.windows(2).all(|w| w[0] < w[1]) {
            return Err("hourly timestamps are not strictly increasing".to_string());
        }
        if !self.daily.time.windows(2).all(|w| w[0] < w[1]) {
            return Err("daily dates are not strictly increasing".to_string());
        }
        if !self.current.temperature.is_finite() {
            return Err("current temperature is not a finite number".to_string());
        }
        Ok(())
    }

    /// The fingerprint used to decide whether a derived summary is stale.
    pub fn fingerprint(&self) -> SnapshotFingerprint {
        self.current.fingerprint()
    }
}

impl CurrentConditions {
    pub fn fingerprint(&self) -> SnapshotFingerprint {
        SnapshotFingerprint {
            temperature: self.temperature,
            weather_code: self.weather_code,
        }
    }
}

// ---------------------------------------------------------------------------
// Cache and history records
// ---------------------------------------------------------------------------

/// A payload plus the time it was stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub payload: T,
    pub stored_at: DateTime<Utc>,
}

impl<T> CacheEntry<T> {
    pub fn new(payload: T, stored_at: DateTime<Utc>) -> Self {
        Self { payload, stored_at }
    }

    /// Fresh iff `now - stored_at < ttl`.
    pub fn is_fresh(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        now - self.stored_at < ttl
    }
}

/// A cached weather entry, with the coordinates it was fetched for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredWeather {
    pub coordinates: Coordinates,
    pub snapshot: WeatherSnapshot,
}

/// One appended observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub location_key: LocationKey,
    pub recorded_at: DateTime<Utc>,
    /// Per-process monotonic tie-break for records sharing a timestamp.
    pub sequence: u64,
    pub current: CurrentConditions,
}

/// The conditions a summary was generated from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SnapshotFingerprint {
    pub temperature: f64,
    pub weather_code: i32,
}

/// A cached AI summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryEntry {
    pub location_key: LocationKey,
    pub text: String,
    pub generated_at: DateTime<Utc>,
    pub fingerprint: SnapshotFingerprint,
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Where a weather response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeatherSource {
    Cache,
    Premium,
    Free,
}

impl WeatherSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            WeatherSource::Cache => "cache",
            WeatherSource::Premium => "premium",
            WeatherSource::Free => "free",
        }
    }
}

impl fmt::Display for WeatherSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Caller-facing error taxonomy.
///
/// Only `InvalidInput`, `NotFound` and `ProvidersExhausted` ever reach a
/// client; the rest are recovered where they occur and logged.
#[derive(Debug, thiserror::Error)]
pub enum WeatherError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Provider {provider} is rate limited")]
    RateLimited { provider: String },

    #[error("Provider {provider} failed: {message}")]
    Provider { provider: String, message: String },

    #[error("All weather providers failed for {location_key}: {message}")]
    ProvidersExhausted { location_key: LocationKey, message: String },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Summary generator unavailable: {0}")]
    GeneratorUnavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

// ---------------------------------------------------------------------------
// Test fixtures
// ---------------------------------------------------------------------------


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_synthetic_key_is_stable_within_bucket() {
        let a = LocationKey::synthetic(Coordinates::new(-17.8312, 31.0464));
        let b = LocationKey::synthetic(Coordinates::new(-17.8288, 31.0451));
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "geo:-17.83:31.05");
        assert!(a.is_synthetic());
    }

    #[test]
    fn test_synthetic_key_differs_across_buckets() {
        let a = LocationKey::synthetic(Coordinates::new(-17.83, 31.05));
        let b = LocationKey::synthetic(Coordinates::new(-17.84, 31.05));
        assert_ne!(a, b);
    }

    #[test]
    fn test_synthetic_key_folds_negative_zero() {
        let a = LocationKey::synthetic(Coordinates::new(-0.001, 0.0));
        let b = LocationKey::synthetic(Coordinates::new(0.001, -0.002));
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "geo:0.00:0.00");
    }

    #[test]
    fn test_slug_key_is_not_synthetic() {
        assert!(!LocationKey::from_slug("harare").is_synthetic());
    }

    #[test]
    fn test_fixture_snapshot_is_valid() {
        let snap = fixtures::snapshot(24.0, 1);
        assert!(snap.validate().is_ok());
        assert_eq!(snap.hourly.time.len(), FORECAST_HOURS);
        assert_eq!(snap.daily.time.len(), FORECAST_DAYS);
    }

    #[test]
    fn test_validate_rejects_short_hourly() {
        let mut snap = fixtures::snapshot(24.0, 1);
        snap.hourly.temperature.pop();
        let err = snap.validate().unwrap_err();
        assert!(err.contains("hourly"));
    }

    #[test]
    fn test_validate_rejects_short_daily() {
        let mut snap = fixtures::snapshot(24.0, 1);
        snap.daily.uv_index_max.truncate(3);
        assert!(snap.validate().unwrap_err().contains("daily"));
    }

    #[test]
    fn test_validate_rejects_non_monotonic_time() {
        let mut snap = fixtures::snapshot(24.0, 1);
        snap.hourly.time.swap(10, 11);
        assert!(snap.validate().unwrap_err().contains("increasing"));
    }

    #[test]
    fn test_cache_entry_freshness_boundary() {
        let t0 = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let ttl = Duration::minutes(15);
        let entry = CacheEntry::new((), t0);

        assert!(entry.is_fresh(t0, ttl));
        assert!(entry.is_fresh(t0 + ttl - Duration::milliseconds(1), ttl));
        assert!(!entry.is_fresh(t0 + ttl, ttl));
        assert!(!entry.is_fresh(t0 + ttl + Duration::milliseconds(1), ttl));
    }

    #[test]
    fn test_weather_source_serialises_lowercase() {
        let json = serde_json::to_string(&WeatherSource::Premium).unwrap();
        assert_eq!(json, "\"premium\"");
        assert_eq!(WeatherSource::Cache.to_string(), "cache");
    }

    #[test]
    fn test_fingerprint_captures_temperature_and_code() {
        let snap = fixtures::snapshot(20.0, 0);
        let fp = snap.fingerprint();
        assert_eq!(fp.weather_code, 0);
        assert!((fp.temperature - 20.0).abs() < 1e-10);
    }

    #[test]
    fn test_error_display() {
        let err = WeatherError::ProvidersExhausted {
            location_key: LocationKey::from_slug("harare"),
            message: "timeout".into(),
        };
        assert!(err.to_string().contains("harare"));
    }
}
