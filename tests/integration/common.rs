//! Shared harness: scripted providers and generators, a manual clock, and
//! a router wired over the in-memory store.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, Response};
use chrono::{Duration, NaiveDate, TimeZone, Utc};
use secrecy::SecretString;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tower::ServiceExt;

use weatherline::api::{self, ApiState, AppState};
use weatherline::cache::{AiSummaryCache, ConditionCategories, WeatherCache};
use weatherline::clock::ManualClock;
use weatherline::engine::FetchOrchestrator;
use weatherline::geo::{catalog, BoundingBox, GeoResolver};
use weatherline::history::HistoryRecorder;
use weatherline::llm::{GeneratorError, SummaryContext, SummaryGenerator};
use weatherline::providers::{GatewayConfig, ProviderError, ProviderGateway, WeatherProvider};
use weatherline::storage::memory::MemoryStore;
use weatherline::types::{
    Coordinates, CurrentConditions, DailySeries, HourlySeries, LocationKey, WeatherSnapshot,
    FORECAST_DAYS, FORECAST_HOURS,
};

pub const PREMIUM: &str = "premium-stub";
pub const FREE: &str = "free-stub";

pub const HARARE: (f64, f64) = (-17.83, 31.05);
pub const BULAWAYO: (f64, f64) = (-20.15, 28.58);
pub const MUTARE: (f64, f64) = (-18.97, 32.67);

/// A well-formed 7-day snapshot.
pub fn snapshot(temperature: f64, weather_code: i32) -> WeatherSnapshot {
    let start = NaiveDate::from_ymd_opt(2026, 2, 10)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .expect("valid start");

    let mut hourly = HourlySeries::default();
    for h in 0..FORECAST_HOURS {
        hourly.time.push(start + Duration::hours(h as i64));
        hourly.temperature.push(temperature);
        hourly.humidity.push(70.0);
        hourly.precipitation_probability.push(30.0);
        hourly.precipitation.push(0.2);
        hourly.weather_code.push(weather_code);
        hourly.cloud_cover.push(40.0);
        hourly.wind_speed.push(11.0);
        hourly.wind_direction.push(45.0);
        hourly.uv_index.push(6.0);
        hourly.is_day.push((6..18).contains(&(h % 24)));
    }

    let mut daily = DailySeries::default();
    for d in 0..FORECAST_DAYS {
        daily.time.push(start.date() + Duration::days(d as i64));
        daily.weather_code.push(weather_code);
        daily.temperature_max.push(temperature + 5.0);
        daily.temperature_min.push(temperature - 7.0);
        daily.precipitation_sum.push(1.5);
        daily.precipitation_probability_max.push(40.0);
        daily.wind_speed_max.push(20.0);
        daily.wind_gusts_max.push(32.0);
        daily.uv_index_max.push(10.0);
    }

    WeatherSnapshot {
        latitude: HARARE.0,
        longitude: HARARE.1,
        timezone: "Africa/Harare".to_string(),
        utc_offset_seconds: 7200,
        current: CurrentConditions {
            observed_at: start + Duration::hours(14),
            temperature,
            apparent_temperature: temperature + 1.0,
            humidity: 65.0,
            precipitation: 0.0,
            weather_code,
            cloud_cover: 35.0,
            wind_speed: 10.0,
            wind_direction: 60.0,
            wind_gusts: 22.0,
            uv_index: 7.0,
            surface_pressure: 855.0,
            is_day: true,
        },
        hourly,
        daily,
    }
}

// ---------------------------------------------------------------------------
// Scripted collaborators
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub enum Script {
    Succeed,
    RateLimited,
    Fail,
}

/// A provider that follows its script and counts calls.
pub struct ScriptedProvider {
    name: &'static str,
    script: Script,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(name: &'static str, script: Script) -> Arc<Self> {
        Arc::new(Self {
            name,
            script,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WeatherProvider for ScriptedProvider {
    fn name(&self) -> &str {
        self.name
    }

    async fn fetch(
        &self,
        coords: Coordinates,
        _api_key: Option<&SecretString>,
    ) -> Result<WeatherSnapshot, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.script {
            Script::Succeed => {
                let mut snap = snapshot(24.0, 2);
                snap.latitude = coords.latitude;
                snap.longitude = coords.longitude;
                Ok(snap)
            }
            Script::RateLimited => Err(ProviderError::RateLimited {
                provider: self.name.to_string(),
                retry_after: None,
            }),
            Script::Fail => Err(ProviderError::Failed {
                provider: self.name.to_string(),
                message: "HTTP 500: upstream exploded".to_string(),
            }),
        }
    }
}

/// A generator that numbers its outputs.
#[derive(Default)]
pub struct CountingGenerator {
    calls: AtomicUsize,
}

impl CountingGenerator {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SummaryGenerator for CountingGenerator {
    fn name(&self) -> &str {
        "counting"
    }

    async fn generate(&self, context: &SummaryContext) -> Result<String, GeneratorError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!(
            "summary #{n} for {} at {:.1}°C",
            context.location_name, context.current.temperature
        ))
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub state: AppState,
    pub clock: Arc<ManualClock>,
    pub premium: Arc<ScriptedProvider>,
    pub free: Arc<ScriptedProvider>,
    pub generator: Arc<CountingGenerator>,
}

impl Harness {
    pub async fn new(premium: Script, free: Script) -> Self {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 2, 10, 12, 0, 0).unwrap(),
        ));
        let store = Arc::new(
            MemoryStore::default()
                .with_api_key(PREMIUM, SecretString::new("test-key".to_string()))
                .await,
        );
        let premium = ScriptedProvider::new(PREMIUM, premium);
        let free = ScriptedProvider::new(FREE, free);
        let generator = Arc::new(CountingGenerator::default());

        let gateway = ProviderGateway::new(
            Some(premium.clone() as Arc<dyn WeatherProvider>),
            free.clone() as Arc<dyn WeatherProvider>,
            store.clone(),
            clock.clone(),
            GatewayConfig::default(),
        );
        let orchestrator = FetchOrchestrator::new(
            BoundingBox::default(),
            Arc::new(GeoResolver::new(catalog::builtin(), 25.0)),
            WeatherCache::new(store.clone(), Duration::minutes(15), clock.clone()),
            Arc::new(gateway),
            HistoryRecorder::new(store.clone(), clock.clone()),
        );
        let summaries = AiSummaryCache::new(
            store,
            Some(generator.clone() as Arc<dyn SummaryGenerator>),
            ConditionCategories::builtin(),
            2.0,
            clock.clone(),
        );

        Self {
            state: Arc::new(ApiState {
                orchestrator: Arc::new(orchestrator),
                summaries: Arc::new(summaries),
            }),
            clock,
            premium,
            free,
            generator,
        }
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        api::build_router(self.state.clone())
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    pub async fn post_json(&self, uri: &str, body: serde_json::Value) -> Response<Body> {
        api::build_router(self.state.clone())
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    /// Writes triggered by a request are detached; poll until the cache
    /// holds a fresh entry for `key`.
    pub async fn wait_for_cache(&self, key: &str) {
        let key = LocationKey::from_slug(key);
        for _ in 0..100 {
            if self.state.orchestrator.cache().get(&key).await.is_some() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        panic!("cache entry for {key} never appeared");
    }

    pub async fn wait_for_history(&self, key: &str, count: usize) {
        let key = LocationKey::from_slug(key);
        for _ in 0..100 {
            let records = self.state.orchestrator.history().recent(&key, 100).await.unwrap();
            if records.len() >= count {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        panic!("history for {key} never reached {count} records");
    }
}

pub fn weather_uri((lat, lon): (f64, f64)) -> String {
    format!("/weather?lat={lat}&lon={lon}")
}

pub async fn json_body(resp: Response<Body>) -> serde_json::Value {
    let bytes = axum::body::to_bytes(resp.into_body(), 2_000_000).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
