//! Upstream weather providers.
//!
//! Defines the `WeatherProvider` trait, the typed `ProviderError` that keeps
//! rate limiting distinct from generic failure, and the `ProviderGateway`
//! that wraps every call with credential lookup, a timeout, payload
//! validation and rate-limit backoff. The gateway neither caches nor
//! persists; fallback order is the orchestrator's decision.

pub mod open_meteo;
pub mod weatherapi;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::storage::ApiKeyStore;
use crate::types::{Coordinates, WeatherError, WeatherSnapshot};

/// Maximum characters of an upstream error body kept in messages.
const MAX_ERROR_BODY: usize = 200;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    /// The provider signalled throttling (HTTP 429 or a provider quota code).
    #[error("{provider} is rate limited")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("{provider} request failed: {message}")]
    Failed { provider: String, message: String },

    #[error("{provider} did not answer within {secs}s")]
    Timeout { provider: String, secs: u64 },

    #[error("{provider} returned malformed data: {message}")]
    Malformed { provider: String, message: String },
}

impl ProviderError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ProviderError::RateLimited { .. })
    }

    pub fn provider(&self) -> &str {
        match self {
            ProviderError::RateLimited { provider, .. }
            | ProviderError::Failed { provider, .. }
            | ProviderError::Timeout { provider, .. }
            | ProviderError::Malformed { provider, .. } => provider,
        }
    }

    /// Classify a transport error from reqwest.
    ///
    /// The URL is dropped first: keyed providers carry credentials in the
    /// query string and reqwest prints the full URL.
    pub(crate) fn from_reqwest(provider: &str, err: reqwest::Error, timeout: Duration) -> Self {
        let err = err.without_url();
        if err.is_timeout() {
            ProviderError::Timeout {
                provider: provider.to_string(),
                secs: timeout.as_secs(),
            }
        } else {
            ProviderError::Failed {
                provider: provider.to_string(),
                message: err.to_string(),
            }
        }
    }
}

impl From<ProviderError> for WeatherError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::RateLimited { provider, .. } => WeatherError::RateLimited { provider },
            other => WeatherError::Provider {
                provider: other.provider().to_string(),
                message: other.to_string(),
            },
        }
    }
}

/// Parse a `Retry-After` header given in seconds.
pub(crate) fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

pub(crate) fn truncate_body(body: &str) -> String {
    if body.chars().count() > MAX_ERROR_BODY {
        let cut: String = body.chars().take(MAX_ERROR_BODY).collect();
        format!("{cut}...")
    } else {
        body.to_string()
    }
}

// ---------------------------------------------------------------------------
// Provider trait
// ---------------------------------------------------------------------------

/// Something that can fetch a normalised snapshot for coordinates, or fail.
#[async_trait]
pub trait WeatherProvider: Send + Sync {
    /// Stable identifier, also the credentials-store key.
    fn name(&self) -> &str;

    /// `api_key` is `Some` only for providers the gateway treats as keyed.
    async fn fetch(
        &self,
        coords: Coordinates,
        api_key: Option<&SecretString>,
    ) -> Result<WeatherSnapshot, ProviderError>;
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

/// Gateway tuning.
#[derive(Debug, Clone, Copy)]
pub struct GatewayConfig {
    /// Upper bound on every provider call.
    pub request_timeout: Duration,
    /// Premium skip window after a rate limit without `Retry-After`.
    pub rate_limit_cooldown: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            rate_limit_cooldown: Duration::from_secs(60),
        }
    }
}

/// Why the premium provider was not attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PremiumSkip {
    NotConfigured,
    NoApiKey,
    BackingOff,
}

/// Outcome of asking the gateway for the premium provider.
#[derive(Debug)]
pub enum PremiumAttempt {
    Skipped(PremiumSkip),
    Fetched(Result<WeatherSnapshot, ProviderError>),
}

pub struct ProviderGateway {
    premium: Option<Arc<dyn WeatherProvider>>,
    free: Arc<dyn WeatherProvider>,
    api_keys: Arc<dyn ApiKeyStore>,
    clock: Arc<dyn Clock>,
    config: GatewayConfig,
    premium_backoff_until: RwLock<Option<DateTime<Utc>>>,
}

impl std::fmt::Debug for ProviderGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderGateway")
            .field("premium", &self.premium.as_ref().map(|p| p.name().to_string()))
            .field("free", &self.free.name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ProviderGateway {
    pub fn new(
        premium: Option<Arc<dyn WeatherProvider>>,
        free: Arc<dyn WeatherProvider>,
        api_keys: Arc<dyn ApiKeyStore>,
        clock: Arc<dyn Clock>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            premium,
            free,
            api_keys,
            clock,
            config,
            premium_backoff_until: RwLock::new(None),
        }
    }

    pub fn premium_name(&self) -> Option<&str> {
        self.premium.as_ref().map(|p| p.name())
    }

    pub fn free_name(&self) -> &str {
        self.free.name()
    }

    /// When the premium provider becomes eligible again, if it is backing off.
    pub async fn premium_backoff_until(&self) -> Option<DateTime<Utc>> {
        let until = *self.premium_backoff_until.read().await;
        until.filter(|t| *t > self.clock.now())
    }

    /// Try the premium provider, unless it is unconfigured, has no key, or
    /// is backing off after a rate limit. Skips are not failures.
    pub async fn fetch_premium(&self, coords: Coordinates) -> PremiumAttempt {
        let Some(provider) = self.premium.as_ref() else {
            return PremiumAttempt::Skipped(PremiumSkip::NotConfigured);
        };

        if let Some(until) = self.premium_backoff_until().await {
            debug!(provider = provider.name(), %until, "Premium provider backing off, skipping");
            return PremiumAttempt::Skipped(PremiumSkip::BackingOff);
        }

        let key = match self.api_keys.get(provider.name()).await {
            Ok(Some(key)) => key,
            Ok(None) => {
                debug!(provider = provider.name(), "No API key configured, skipping premium");
                return PremiumAttempt::Skipped(PremiumSkip::NoApiKey);
            }
            Err(e) => {
                warn!(provider = provider.name(), error = %e, "API key lookup failed, skipping premium");
                return PremiumAttempt::Skipped(PremiumSkip::NoApiKey);
            }
        };

        let result = self.call(provider.as_ref(), coords, Some(&key)).await;

        if let Err(ProviderError::RateLimited { retry_after, .. }) = &result {
            let wait = retry_after.unwrap_or(self.config.rate_limit_cooldown);
            let until = self.clock.now()
                + chrono::Duration::from_std(wait).unwrap_or_else(|_| chrono::Duration::seconds(60));
            *self.premium_backoff_until.write().await = Some(until);
            debug!(provider = provider.name(), %until, "Premium provider backoff armed");
        }

        PremiumAttempt::Fetched(result)
    }

    /// Fetch from the free provider. It has no fallback behind it.
    pub async fn fetch_free(&self, coords: Coordinates) -> Result<WeatherSnapshot, ProviderError> {
        self.call(self.free.as_ref(), coords, None).await
    }

    /// One bounded, validated provider call.
    async fn call(
        &self,
        provider: &dyn WeatherProvider,
        coords: Coordinates,
        key: Option<&SecretString>,
    ) -> Result<WeatherSnapshot, ProviderError> {
        let timeout = self.config.request_timeout;
        let snapshot = tokio::time::timeout(timeout, provider.fetch(coords, key))
            .await
            .map_err(|_| ProviderError::Timeout {
                provider: provider.name().to_string(),
                secs: timeout.as_secs(),
            })??;

        snapshot.validate().map_err(|message| ProviderError::Malformed {
            provider: provider.name().to_string(),
            message,
        })?;
        Ok(snapshot)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
