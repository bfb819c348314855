//! Open-Meteo forecast provider.
//!
//! The free tier: no key, generous limits, WMO weather codes natively.
//!
//! API: `https://api.open-meteo.com/v1/forecast`
//! Auth: None required.
//!
//! The variable list is fixed so the response always maps onto the
//! snapshot schema without per-request negotiation.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use reqwest::{Client, StatusCode};
use secrecy::SecretString;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::{retry_after, truncate_body, ProviderError, WeatherProvider};
use crate::types::{
    Coordinates, CurrentConditions, DailySeries, HourlySeries, WeatherSnapshot, FORECAST_DAYS,
};

pub const PROVIDER_NAME: &str = "open-meteo";

const CURRENT_VARS: &str = "temperature_2m,relative_humidity_2m,apparent_temperature,is_day,\
precipitation,weather_code,cloud_cover,surface_pressure,wind_speed_10m,wind_direction_10m,\
wind_gusts_10m,uv_index";

const HOURLY_VARS: &str = "temperature_2m,relative_humidity_2m,precipitation_probability,\
precipitation,weather_code,cloud_cover,wind_speed_10m,wind_direction_10m,uv_index,is_day";

const DAILY_VARS: &str = "weather_code,temperature_2m_max,temperature_2m_min,precipitation_sum,\
precipitation_probability_max,wind_speed_10m_max,wind_gusts_10m_max,uv_index_max";

const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M";

// ---------------------------------------------------------------------------
// Open-Meteo response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    timezone: String,
    #[serde(default)]
    utc_offset_seconds: i32,
    current: CurrentBlock,
    hourly: HourlyBlock,
    daily: DailyBlock,
}

#[derive(Debug, Deserialize)]
struct CurrentBlock {
    time: String,
    temperature_2m: f64,
    #[serde(default)]
    apparent_temperature: Option<f64>,
    #[serde(default)]
    relative_humidity_2m: Option<f64>,
    #[serde(default)]
    precipitation: Option<f64>,
    weather_code: i32,
    #[serde(default)]
    cloud_cover: Option<f64>,
    #[serde(default)]
    wind_speed_10m: Option<f64>,
    #[serde(default)]
    wind_direction_10m: Option<f64>,
    #[serde(default)]
    wind_gusts_10m: Option<f64>,
    #[serde(default)]
    uv_index: Option<f64>,
    #[serde(default)]
    surface_pressure: Option<f64>,
    #[serde(default)]
    is_day: Option<u8>,
}

#[derive(Debug, Deserialize)]
struct HourlyBlock {
    time: Vec<String>,
    temperature_2m: Vec<Option<f64>>,
    #[serde(default)]
    relative_humidity_2m: Vec<Option<f64>>,
    #[serde(default)]
    precipitation_probability: Vec<Option<f64>>,
    #[serde(default)]
    precipitation: Vec<Option<f64>>,
    weather_code: Vec<Option<i32>>,
    #[serde(default)]
    cloud_cover: Vec<Option<f64>>,
    #[serde(default)]
    wind_speed_10m: Vec<Option<f64>>,
    #[serde(default)]
    wind_direction_10m: Vec<Option<f64>>,
    #[serde(default)]
    uv_index: Vec<Option<f64>>,
    #[serde(default)]
    is_day: Vec<Option<u8>>,
}

#[derive(Debug, Deserialize)]
struct DailyBlock {
    time: Vec<String>,
    weather_code: Vec<Option<i32>>,
    temperature_2m_max: Vec<Option<f64>>,
    temperature_2m_min: Vec<Option<f64>>,
    #[serde(default)]
    precipitation_sum: Vec<Option<f64>>,
    #[serde(default)]
    precipitation_probability_max: Vec<Option<f64>>,
    #[serde(default)]
    wind_speed_10m_max: Vec<Option<f64>>,
    #[serde(default)]
    wind_gusts_10m_max: Vec<Option<f64>>,
    #[serde(default)]
    uv_index_max: Vec<Option<f64>>,
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

pub struct OpenMeteoProvider {
    http: Client,
    base_url: String,
    timeout: Duration,
}

impl OpenMeteoProvider {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("weatherline/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build Open-Meteo HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    fn malformed(message: impl Into<String>) -> ProviderError {
        ProviderError::Malformed {
            provider: PROVIDER_NAME.to_string(),
            message: message.into(),
        }
    }

    fn into_snapshot(resp: ForecastResponse) -> Result<WeatherSnapshot, ProviderError> {
        let c = resp.current;
        let current = CurrentConditions {
            observed_at: parse_hour(&c.time)?,
            temperature: c.temperature_2m,
            apparent_temperature: c.apparent_temperature.unwrap_or(c.temperature_2m),
            humidity: c.relative_humidity_2m.unwrap_or(0.0),
            precipitation: c.precipitation.unwrap_or(0.0),
            weather_code: c.weather_code,
            cloud_cover: c.cloud_cover.unwrap_or(0.0),
            wind_speed: c.wind_speed_10m.unwrap_or(0.0),
            wind_direction: c.wind_direction_10m.unwrap_or(0.0),
            wind_gusts: c.wind_gusts_10m.unwrap_or(0.0),
            uv_index: c.uv_index.unwrap_or(0.0),
            surface_pressure: c.surface_pressure.unwrap_or(0.0),
            is_day: c.is_day.unwrap_or(1) != 0,
        };

        let h = resp.hourly;
        let hourly = HourlySeries {
            time: h.time.iter().map(|t| parse_hour(t)).collect::<Result<_, _>>()?,
            temperature: required("hourly.temperature_2m", h.temperature_2m)?,
            humidity: lenient(h.relative_humidity_2m),
            precipitation_probability: lenient(h.precipitation_probability),
            precipitation: lenient(h.precipitation),
            weather_code: required("hourly.weather_code", h.weather_code)?,
            cloud_cover: lenient(h.cloud_cover),
            wind_speed: lenient(h.wind_speed_10m),
            wind_direction: lenient(h.wind_direction_10m),
            uv_index: lenient(h.uv_index),
            is_day: h.is_day.into_iter().map(|v| v.unwrap_or(0) != 0).collect(),
        };

        let d = resp.daily;
        let daily = DailySeries {
            time: d.time.iter().map(|t| parse_day(t)).collect::<Result<_, _>>()?,
            weather_code: required("daily.weather_code", d.weather_code)?,
            temperature_max: required("daily.temperature_2m_max", d.temperature_2m_max)?,
            temperature_min: required("daily.temperature_2m_min", d.temperature_2m_min)?,
            precipitation_sum: lenient(d.precipitation_sum),
            precipitation_probability_max: lenient(d.precipitation_probability_max),
            wind_speed_max: lenient(d.wind_speed_10m_max),
            wind_gusts_max: lenient(d.wind_gusts_10m_max),
            uv_index_max: lenient(d.uv_index_max),
        };

        Ok(WeatherSnapshot {
            latitude: resp.latitude,
            longitude: resp.longitude,
            timezone: resp.timezone,
            utc_offset_seconds: resp.utc_offset_seconds,
            current,
            hourly,
            daily,
        })
    }
}

fn parse_hour(s: &str) -> Result<NaiveDateTime, ProviderError> {
    NaiveDateTime::parse_from_str(s, TIME_FORMAT)
        .map_err(|e| OpenMeteoProvider::malformed(format!("bad timestamp {s:?}: {e}")))
}

fn parse_day(s: &str) -> Result<NaiveDate, ProviderError> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| OpenMeteoProvider::malformed(format!("bad date {s:?}: {e}")))
}

/// Series that must be complete; a single null rejects the payload.
fn required<T>(field: &str, values: Vec<Option<T>>) -> Result<Vec<T>, ProviderError> {
    values
        .into_iter()
        .collect::<Option<Vec<T>>>()
        .ok_or_else(|| OpenMeteoProvider::malformed(format!("{field} contains nulls")))
}

/// Series where a missing reading is treated as zero.
fn lenient(values: Vec<Option<f64>>) -> Vec<f64> {
    values.into_iter().map(|v| v.unwrap_or(0.0)).collect()
}

#[async_trait]
impl WeatherProvider for OpenMeteoProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn fetch(
        &self,
        coords: Coordinates,
        _api_key: Option<&SecretString>,
    ) -> Result<WeatherSnapshot, ProviderError> {
        let url = format!("{}/forecast", self.base_url);
        let forecast_days = FORECAST_DAYS.to_string();

        let resp = self
            .http
            .get(&url)
            .query(&[
                ("latitude", coords.latitude.to_string().as_str()),
                ("longitude", coords.longitude.to_string().as_str()),
                ("current", CURRENT_VARS),
                ("hourly", HOURLY_VARS),
                ("daily", DAILY_VARS),
                ("forecast_days", forecast_days.as_str()),
                ("timezone", "auto"),
            ])
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(PROVIDER_NAME, e, self.timeout))?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::RateLimited {
                provider: PROVIDER_NAME.to_string(),
                retry_after: retry_after(resp.headers()),
            });
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Failed {
                provider: PROVIDER_NAME.to_string(),
                message: format!("HTTP {status}: {}", truncate_body(&body)),
            });
        }

        let body = resp
            .text()
            .await
            .map_err(|e| ProviderError::from_reqwest(PROVIDER_NAME, e, self.timeout))?;
        let parsed: ForecastResponse = serde_json::from_str(&body)
            .map_err(|e| Self::malformed(format!("unexpected response shape: {e}")))?;

        debug!(%coords, hours = parsed.hourly.time.len(), "Open-Meteo forecast received");
        Self::into_snapshot(parsed)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
