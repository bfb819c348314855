//! WeatherAPI.com forecast provider.
//!
//! The premium tier: keyed, metered, and the first choice whenever a key
//! is configured. Condition codes are WeatherAPI's own and are mapped onto
//! WMO codes so every snapshot speaks one vocabulary.
//!
//! API: `https://api.weatherapi.com/v1/forecast.json`
//! Auth: `key` query parameter.
//! Rate limit: HTTP 429, or HTTP 403 with error code 2007 when the monthly
//! quota is spent.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::{retry_after, truncate_body, ProviderError, WeatherProvider};
use crate::types::{
    Coordinates, CurrentConditions, DailySeries, HourlySeries, WeatherSnapshot, FORECAST_DAYS,
};

pub const PROVIDER_NAME: &str = "weatherapi";

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M";

/// WeatherAPI error code for an exhausted monthly quota.
const QUOTA_EXCEEDED: i32 = 2007;

// ---------------------------------------------------------------------------
// WeatherAPI response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    location: Location,
    current: Current,
    forecast: Forecast,
}

#[derive(Debug, Deserialize)]
struct Location {
    lat: f64,
    lon: f64,
    tz_id: String,
    localtime_epoch: i64,
    localtime: String,
}

#[derive(Debug, Deserialize)]
struct Condition {
    code: i32,
}

#[derive(Debug, Deserialize)]
struct Current {
    last_updated: String,
    temp_c: f64,
    #[serde(default)]
    feelslike_c: Option<f64>,
    #[serde(default)]
    humidity: f64,
    #[serde(default)]
    precip_mm: f64,
    condition: Condition,
    #[serde(default)]
    cloud: f64,
    #[serde(default)]
    wind_kph: f64,
    #[serde(default)]
    wind_degree: f64,
    #[serde(default)]
    gust_kph: f64,
    #[serde(default)]
    uv: f64,
    #[serde(default)]
    pressure_mb: f64,
    #[serde(default)]
    is_day: u8,
}

#[derive(Debug, Deserialize)]
struct Forecast {
    forecastday: Vec<ForecastDay>,
}

#[derive(Debug, Deserialize)]
struct ForecastDay {
    date: String,
    day: Day,
    hour: Vec<Hour>,
}

#[derive(Debug, Deserialize)]
struct Day {
    maxtemp_c: f64,
    mintemp_c: f64,
    #[serde(default)]
    totalprecip_mm: f64,
    #[serde(default)]
    daily_chance_of_rain: f64,
    #[serde(default)]
    maxwind_kph: f64,
    #[serde(default)]
    uv: f64,
    condition: Condition,
}

#[derive(Debug, Deserialize)]
struct Hour {
    time: String,
    temp_c: f64,
    #[serde(default)]
    humidity: f64,
    #[serde(default)]
    chance_of_rain: f64,
    #[serde(default)]
    precip_mm: f64,
    condition: Condition,
    #[serde(default)]
    cloud: f64,
    #[serde(default)]
    wind_kph: f64,
    #[serde(default)]
    wind_degree: f64,
    #[serde(default)]
    gust_kph: f64,
    #[serde(default)]
    uv: f64,
    #[serde(default)]
    is_day: u8,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: i32,
    #[serde(default)]
    message: String,
}

// ---------------------------------------------------------------------------
// Condition code mapping
// ---------------------------------------------------------------------------

/// Map a WeatherAPI condition code onto the closest WMO code.
///
/// Unknown codes map to overcast (3).
pub fn to_wmo(code: i32) -> i32 {
    match code {
        1000 => 0,
        1003 => 2,
        1006 | 1009 => 3,
        1030 | 1135 => 45,
        1147 => 48,
        1063 | 1240 => 80,
        1243 => 81,
        1246 => 82,
        1150 | 1153 => 51,
        1168 | 1171 => 57,
        1180 | 1183 => 61,
        1186 | 1189 => 63,
        1192 | 1195 => 65,
        1198 | 1201 => 67,
        1066 | 1069 | 1204 | 1207 | 1210 | 1213 | 1249 | 1252 | 1255 => 71,
        1114 | 1216 | 1219 | 1258 => 73,
        1117 | 1222 | 1225 => 75,
        1237 | 1261 | 1264 => 77,
        1072 => 56,
        1087 | 1273 | 1279 => 95,
        1276 | 1282 => 99,
        _ => 3,
    }
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

pub struct WeatherApiProvider {
    http: Client,
    base_url: String,
    timeout: Duration,
}

impl WeatherApiProvider {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("weatherline/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build WeatherAPI HTTP client")?;
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
            observed_at: parse_time(&c.last_updated)?,
            temperature: c.temp_c,
            apparent_temperature: c.feelslike_c.unwrap_or(c.temp_c),
            humidity: c.humidity,
            precipitation: c.precip_mm,
            weather_code: to_wmo(c.condition.code),
            cloud_cover: c.cloud,
            wind_speed: c.wind_kph,
            wind_direction: c.wind_degree,
            wind_gusts: c.gust_kph,
            uv_index: c.uv,
            surface_pressure: c.pressure_mb,
            is_day: c.is_day != 0,
        };

        let mut hourly = HourlySeries::default();
        let mut daily = DailySeries::default();

        for day in resp.forecast.forecastday {
            let date = NaiveDate::parse_from_str(&day.date, "%Y-%m-%d")
                .map_err(|e| Self::malformed(format!("bad date {:?}: {e}", day.date)))?;

            let mut gusts_max = 0.0f64;
            for hour in &day.hour {
                hourly.time.push(parse_time(&hour.time)?);
                hourly.temperature.push(hour.temp_c);
                hourly.humidity.push(hour.humidity);
                hourly.precipitation_probability.push(hour.chance_of_rain);
                hourly.precipitation.push(hour.precip_mm);
                hourly.weather_code.push(to_wmo(hour.condition.code));
                hourly.cloud_cover.push(hour.cloud);
                hourly.wind_speed.push(hour.wind_kph);
                hourly.wind_direction.push(hour.wind_degree);
                hourly.uv_index.push(hour.uv);
                hourly.is_day.push(hour.is_day != 0);
                gusts_max = gusts_max.max(hour.gust_kph);
            }

            daily.time.push(date);
            daily.weather_code.push(to_wmo(day.day.condition.code));
            daily.temperature_max.push(day.day.maxtemp_c);
            daily.temperature_min.push(day.day.mintemp_c);
            daily.precipitation_sum.push(day.day.totalprecip_mm);
            daily.precipitation_probability_max.push(day.day.daily_chance_of_rain);
            daily.wind_speed_max.push(day.day.maxwind_kph);
            daily.wind_gusts_max.push(gusts_max);
            daily.uv_index_max.push(day.day.uv);
        }

        let loc = resp.location;
        Ok(WeatherSnapshot {
            latitude: loc.lat,
            longitude: loc.lon,
            utc_offset_seconds: utc_offset(loc.localtime_epoch, &loc.localtime)?,
            timezone: loc.tz_id,
            current,
            hourly,
            daily,
        })
    }
}

fn parse_time(s: &str) -> Result<NaiveDateTime, ProviderError> {
    NaiveDateTime::parse_from_str(s, TIME_FORMAT)
        .map_err(|e| WeatherApiProvider::malformed(format!("bad timestamp {s:?}: {e}")))
}

/// Derive the UTC offset from the local wall time and its epoch, rounded to
/// the nearest quarter hour (the local time is only minute-precise).
fn utc_offset(epoch: i64, localtime: &str) -> Result<i32, ProviderError> {
    let utc = DateTime::from_timestamp(epoch, 0)
        .ok_or_else(|| WeatherApiProvider::malformed(format!("bad epoch {epoch}")))?
        .naive_utc();
    let local = NaiveDateTime::parse_from_str(localtime.trim(), TIME_FORMAT)
        .map_err(|e| WeatherApiProvider::malformed(format!("bad localtime {localtime:?}: {e}")))?;
    let secs = (local - utc).num_seconds() as f64;
    Ok(((secs / 900.0).round() * 900.0) as i32)
}

#[async_trait]
impl WeatherProvider for WeatherApiProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn fetch(
        &self,
        coords: Coordinates,
        api_key: Option<&SecretString>,
    ) -> Result<WeatherSnapshot, ProviderError> {
        let key = api_key.ok_or_else(|| ProviderError::Failed {
            provider: PROVIDER_NAME.to_string(),
            message: "no API key supplied".to_string(),
        })?;

        let url = format!("{}/forecast.json", self.base_url);
        let q = format!("{},{}", coords.latitude, coords.longitude);
        let days = FORECAST_DAYS.to_string();

        let resp = self
            .http
            .get(&url)
            .query(&[
                ("key", key.expose_secret().as_str()),
                ("q", q.as_str()),
                ("days", days.as_str()),
                ("aqi", "no"),
                ("alerts", "no"),
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
            let wait = retry_after(resp.headers());
            let body = resp.text().await.unwrap_or_default();
            if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(&body) {
                if envelope.error.code == QUOTA_EXCEEDED {
                    return Err(ProviderError::RateLimited {
                        provider: PROVIDER_NAME.to_string(),
                        retry_after: wait,
                    });
                }
                return Err(ProviderError::Failed {
                    provider: PROVIDER_NAME.to_string(),
                    message: format!(
                        "HTTP {status}: error {} {}",
                        envelope.error.code, envelope.error.message
                    ),
                });
            }
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

        debug!(%coords, days = parsed.forecast.forecastday.len(), "WeatherAPI forecast received");
        Self::into_snapshot(parsed)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
