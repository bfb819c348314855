//! Route handlers.
//!
//! All endpoints return JSON. State is shared via `Arc<ApiState>`.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use super::error::ApiError;
use crate::cache::AiSummaryCache;
use crate::engine::FetchOrchestrator;
use crate::geo::NearestLocation;
use crate::llm::SummaryContext;
use crate::types::{
    Coordinates, CurrentConditions, DailySeries, HistoryRecord, KnownLocation, LocationKey,
    WeatherSnapshot, WeatherSource,
};

pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");
pub const X_WEATHER_PROVIDER: HeaderName = HeaderName::from_static("x-weather-provider");

const DEFAULT_HISTORY_LIMIT: usize = 24;
const MAX_HISTORY_LIMIT: usize = 500;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Shared state accessible by all route handlers.
pub struct ApiState {
    pub orchestrator: Arc<FetchOrchestrator>,
    pub summaries: Arc<AiSummaryCache>,
}

pub type AppState = Arc<ApiState>;

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

/// `?lat=&lon=` kept as raw strings so missing and non-numeric values both
/// become a JSON 400 rather than an extractor rejection.
#[derive(Debug, Default, Deserialize)]
pub struct CoordsQuery {
    pub lat: Option<String>,
    pub lon: Option<String>,
}

impl CoordsQuery {
    pub fn coordinates(&self) -> Result<Coordinates, ApiError> {
        let lat = parse_coord("lat", self.lat.as_deref())?;
        let lon = parse_coord("lon", self.lon.as_deref())?;
        Ok(Coordinates::new(lat, lon))
    }
}

fn parse_coord(name: &str, raw: Option<&str>) -> Result<f64, ApiError> {
    let raw = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::BadRequest(format!("{name} is required")))?;
    raw.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| ApiError::BadRequest(format!("{name} must be a number, got {raw:?}")))
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub lat: Option<String>,
    pub lon: Option<String>,
    pub limit: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SummaryQuery {
    pub lat: Option<String>,
    pub lon: Option<String>,
    /// Display name override; defaults to the nearest known location.
    pub location: Option<String>,
    /// Comma-separated.
    pub activities: Option<String>,
}

/// `POST /ai-summary` body.
#[derive(Debug, Deserialize)]
pub struct SummaryRequest {
    #[serde(default, rename = "weatherData", alias = "weather_data")]
    pub weather_data: Option<serde_json::Value>,
    #[serde(default)]
    pub location: Option<LocationInput>,
    #[serde(default)]
    pub activities: Vec<String>,
}

/// A location given either as a bare name or as an object.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum LocationInput {
    Name(String),
    Detailed {
        name: String,
        #[serde(default)]
        slug: Option<String>,
    },
}

impl LocationInput {
    fn name(&self) -> &str {
        match self {
            LocationInput::Name(name) | LocationInput::Detailed { name, .. } => name,
        }
    }

    fn slug(&self) -> Option<&str> {
        match self {
            LocationInput::Name(_) => None,
            LocationInput::Detailed { slug, .. } => slug.as_deref(),
        }
    }
}

/// The part of a snapshot a summary needs. A full snapshot also parses.
#[derive(Debug, Deserialize)]
struct SummaryWeather {
    latitude: f64,
    longitude: f64,
    current: CurrentConditions,
    #[serde(default)]
    daily: Option<DailySeries>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct LocationSummary {
    pub slug: String,
    pub name: String,
    pub distance_km: f64,
}

impl From<&NearestLocation> for LocationSummary {
    fn from(n: &NearestLocation) -> Self {
        Self {
            slug: n.location.slug.clone(),
            name: n.location.name.clone(),
            distance_km: n.distance_km,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WeatherResponse {
    pub snapshot: WeatherSnapshot,
    pub source: WeatherSource,
    pub location_key: LocationKey,
    pub location: Option<LocationSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SummaryResponse {
    pub summary: String,
    pub cached: bool,
    pub location_key: LocationKey,
}

#[derive(Debug, Clone, Serialize)]
pub struct GeoResponse {
    #[serde(flatten)]
    pub location: KnownLocation,
    pub distance_km: f64,
    pub location_key: LocationKey,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryResponse {
    pub location_key: LocationKey,
    pub records: Vec<HistoryRecord>,
}

fn cache_header(hit: bool) -> (HeaderName, HeaderValue) {
    (X_CACHE, HeaderValue::from_static(if hit { "HIT" } else { "MISS" }))
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /weather?lat=&lon=
pub async fn get_weather(
    State(state): State<AppState>,
    Query(query): Query<CoordsQuery>,
) -> Result<Response, ApiError> {
    let coords = query.coordinates()?;
    let outcome = state.orchestrator.get_weather(coords).await?;
    // Writes keep running detached once the handle is dropped.
    drop(outcome.pending);

    let mut headers = HeaderMap::new();
    let (name, value) = cache_header(outcome.source == WeatherSource::Cache);
    headers.insert(name, value);
    if let Some(provider) = outcome.provider.as_deref() {
        if let Ok(value) = HeaderValue::from_str(provider) {
            headers.insert(X_WEATHER_PROVIDER, value);
        }
    }

    let body = WeatherResponse {
        location: outcome.nearest.as_ref().map(LocationSummary::from),
        snapshot: outcome.snapshot,
        source: outcome.source,
        location_key: outcome.location_key,
    };
    Ok((headers, Json(body)).into_response())
}

/// GET /ai-summary?lat=&lon=&location=&activities=
///
/// Summarises the live weather at the coordinates.
pub async fn get_ai_summary(
    State(state): State<AppState>,
    Query(query): Query<SummaryQuery>,
) -> Result<Response, ApiError> {
    let coords = CoordsQuery {
        lat: query.lat.clone(),
        lon: query.lon.clone(),
    }
    .coordinates()?;

    let outcome = state.orchestrator.get_weather(coords).await?;
    drop(outcome.pending);

    let name = query
        .location
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .or_else(|| outcome.nearest.as_ref().map(|n| n.location.name.clone()))
        .ok_or_else(|| ApiError::BadRequest("location is required".into()))?;

    let activities = query
        .activities
        .as_deref()
        .map(|s| {
            s.split(',')
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let snapshot = outcome.snapshot;
    let context = SummaryContext::new(
        name,
        coords.latitude,
        snapshot.current,
        Some(snapshot.daily),
        activities,
    );
    summarise(&state, outcome.location_key, &context).await
}

/// POST /ai-summary with `{ weatherData, location, activities }`.
pub async fn post_ai_summary(
    State(state): State<AppState>,
    body: Result<Json<SummaryRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let raw_weather = request
        .weather_data
        .filter(|v| !v.is_null())
        .ok_or_else(|| ApiError::BadRequest("weatherData is required".into()))?;
    let location = request
        .location
        .ok_or_else(|| ApiError::BadRequest("location is required".into()))?;
    let weather: SummaryWeather = serde_json::from_value(raw_weather)
        .map_err(|e| ApiError::BadRequest(format!("weatherData is malformed: {e}")))?;

    let resolver = state.orchestrator.resolver();
    let key = location
        .slug()
        .and_then(|slug| resolver.find_slug(slug))
        .map(KnownLocation::key)
        .unwrap_or_else(|| resolver.resolve(Coordinates::new(weather.latitude, weather.longitude)).key);

    let context = SummaryContext::new(
        location.name(),
        weather.latitude,
        weather.current,
        weather.daily,
        request.activities,
    );
    summarise(&state, key, &context).await
}

async fn summarise(
    state: &ApiState,
    key: LocationKey,
    context: &SummaryContext,
) -> Result<Response, ApiError> {
    let outcome = state.summaries.get_or_generate(&key, context).await?;
    debug!(location_key = %key, cached = outcome.cached, "AI summary served");

    let (name, value) = cache_header(outcome.cached);
    let body = SummaryResponse {
        summary: outcome.text,
        cached: outcome.cached,
        location_key: key,
    };
    Ok(([(name, value)], Json(body)).into_response())
}

/// GET /geo?lat=&lon=
pub async fn get_geo(
    State(state): State<AppState>,
    Query(query): Query<CoordsQuery>,
) -> Result<Json<GeoResponse>, ApiError> {
    let coords = query.coordinates()?;
    let (nearest, location_key) = state.orchestrator.nearest_known(coords)?;

    Ok(Json(GeoResponse {
        location: nearest.location,
        distance_km: nearest.distance_km,
        location_key,
    }))
}

/// GET /history?lat=&lon=&limit=
pub async fn get_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let coords = CoordsQuery {
        lat: query.lat,
        lon: query.lon,
    }
    .coordinates()?;

    let limit = match query.limit.as_deref().map(str::trim) {
        None | Some("") => DEFAULT_HISTORY_LIMIT,
        Some(raw) => raw
            .parse::<usize>()
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| ApiError::BadRequest(format!("limit must be a positive integer, got {raw:?}")))?
            .min(MAX_HISTORY_LIMIT),
    };

    let (location_key, records) = state.orchestrator.recent_history(coords, limit).await?;

    Ok(Json(HistoryResponse {
        location_key,
        records,
    }))
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
