//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` (every field has a default, so the file is optional)
//! and then applies environment overrides. Secrets are referenced by env-var
//! name in the config and resolved at runtime via `std::env::var`.

use anyhow::{bail, Context, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::geo::BoundingBox;

/// Longest accepted weather cache TTL (one day).
const MAX_CACHE_TTL_SECS: u64 = 86_400;

/// Longest accepted history retention (ten years).
const MAX_HISTORY_RETENTION_DAYS: i64 = 3650;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub weather: WeatherConfig,
    pub ai: AiConfig,
    pub storage: StorageConfig,
    pub locations: LocationsConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WeatherConfig {
    pub cache_ttl_secs: u64,
    pub bounding_box: BoundingBox,
    /// Queries within this distance of a known location share its cache key.
    pub resolution_radius_km: f64,
    pub request_timeout_secs: u64,
    /// How long the premium provider is skipped after a rate-limit response
    /// that carried no `Retry-After`.
    pub rate_limit_cooldown_secs: u64,
    /// Env var holding the premium provider key. Absent key = free-only mode.
    pub premium_api_key_env: String,
    pub premium_base_url: String,
    pub free_base_url: String,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 900,
            bounding_box: BoundingBox::default(),
            resolution_radius_km: 25.0,
            request_timeout_secs: 10,
            rate_limit_cooldown_secs: 60,
            premium_api_key_env: "WEATHERAPI_KEY".to_string(),
            premium_base_url: "https://api.weatherapi.com/v1".to_string(),
            free_base_url: "https://api.open-meteo.com/v1".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AiConfig {
    /// Regenerate when the current temperature moved more than this (°C).
    pub temp_delta_threshold: f64,
    pub api_key_env: String,
    pub model: String,
    pub max_tokens: u32,
    pub base_url: String,
    pub request_timeout_secs: u64,
    /// Category name → WMO codes. Empty = built-in table.
    pub condition_categories: BTreeMap<String, Vec<i32>>,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            temp_delta_threshold: 2.0,
            api_key_env: "OPENROUTER_API_KEY".to_string(),
            model: "anthropic/claude-3.5-haiku".to_string(),
            max_tokens: 400,
            base_url: "https://openrouter.ai/api/v1".to_string(),
            request_timeout_secs: 30,
            condition_categories: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Sqlite,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub database_url: String,
    /// Upper bound on in-memory weather cache entries.
    pub cache_capacity: u64,
    pub history_retention_days: i64,
    pub purge_interval_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            database_url: "sqlite://weatherline.db".to_string(),
            cache_capacity: 10_000,
            history_retention_days: 30,
            purge_interval_secs: 3600,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct LocationsConfig {
    /// TOML file with `[[locations]]` entries replacing the built-in catalog.
    pub catalog_file: Option<String>,
}

impl AppConfig {
    /// Load configuration from a TOML file, falling back to defaults when
    /// the file does not exist, then apply environment overrides.
    pub fn load(path: &str) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {path}"))?;
            Self::from_toml(&contents)
                .with_context(|| format!("Failed to parse config file: {path}"))?
        } else {
            Self::default()
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML text without touching the environment.
    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Apply the recognised environment overrides.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = lookup("WEATHER_CACHE_TTL_SECS") {
            self.weather.cache_ttl_secs = v
                .trim()
                .parse()
                .with_context(|| format!("WEATHER_CACHE_TTL_SECS is not an integer: {v}"))?;
        }
        if let Some(v) = lookup("AI_TEMP_DELTA_THRESHOLD") {
            self.ai.temp_delta_threshold = v
                .trim()
                .parse()
                .with_context(|| format!("AI_TEMP_DELTA_THRESHOLD is not a number: {v}"))?;
        }
        if let Some(v) = lookup("WEATHER_BBOX") {
            self.weather.bounding_box = v.parse()?;
        }
        if let Some(v) = lookup("WEATHERLINE_BIND") {
            self.server.bind = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.weather.cache_ttl_secs == 0 || self.weather.cache_ttl_secs > MAX_CACHE_TTL_SECS {
            bail!(
                "weather.cache_ttl_secs must be between 1 and {MAX_CACHE_TTL_SECS}, got {}",
                self.weather.cache_ttl_secs
            );
        }
        if !(1..=MAX_HISTORY_RETENTION_DAYS).contains(&self.storage.history_retention_days) {
            bail!(
                "storage.history_retention_days must be between 1 and {MAX_HISTORY_RETENTION_DAYS}, got {}",
                self.storage.history_retention_days
            );
        }
        if !(self.ai.temp_delta_threshold >= 0.0) {
            bail!("ai.temp_delta_threshold must be a non-negative number");
        }
        if self.weather.request_timeout_secs == 0 {
            bail!("weather.request_timeout_secs must be positive");
        }
        Ok(())
    }

    /// Resolve an environment variable name to its value.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// Resolve an optional secret; empty values count as absent.
    pub fn resolve_secret(env_name: &str) -> Option<SecretString> {
        Self::resolve_env(env_name)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(SecretString::new)
    }

    /// Weather cache TTL, clamped to the accepted range.
    pub fn cache_ttl(&self) -> chrono::Duration {
        let secs = self.weather.cache_ttl_secs.clamp(1, MAX_CACHE_TTL_SECS);
        chrono::Duration::seconds(secs as i64)
    }

    /// History retention, clamped to the accepted range.
    pub fn history_retention(&self) -> chrono::Duration {
        let days = self.storage.history_retention_days.clamp(1, MAX_HISTORY_RETENTION_DAYS);
        chrono::Duration::days(days)
    }
}
