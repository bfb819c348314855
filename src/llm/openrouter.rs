//! OpenRouter summary generator.
//!
//! Uses OpenRouter's OpenAI-compatible chat completions endpoint, so any
//! hosted model can write the summaries with a single API key.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::template::describe;
use super::{GeneratorError, SummaryContext, SummaryGenerator};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

const DEFAULT_MODEL: &str = "anthropic/claude-3.5-haiku";

const DEFAULT_MAX_TOKENS: u32 = 400;

/// Maximum retries on rate limit / server errors.
const MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff (ms).
const BASE_BACKOFF_MS: u64 = 1000;

const SYSTEM_PROMPT: &str = "You are a concise outdoor weather assistant. \
Write two or three plain sentences summarising the conditions for a traveller: \
the current weather, what to expect today, and practical advice for the listed \
activities. No markdown, no lists, metric units.";

// ---------------------------------------------------------------------------
// API types (OpenAI-compatible)
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    total_tokens: u32,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct OpenRouterGenerator {
    http: Client,
    api_key: SecretString,
    base_url: String,
    model: String,
    max_tokens: u32,
    max_retries: u32,
    base_backoff: Duration,
}

impl OpenRouterGenerator {
    /// - `api_key`: OpenRouter API key.
    /// - `model`: model ID, e.g. "anthropic/claude-3.5-haiku".
    /// - `timeout`: per-request bound.
    pub fn new(
        api_key: SecretString,
        base_url: Option<String>,
        model: Option<String>,
        max_tokens: Option<u32>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build OpenRouter HTTP client")?;

        Ok(Self {
            http,
            api_key,
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            max_tokens: max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            max_retries: MAX_RETRIES,
            base_backoff: Duration::from_millis(BASE_BACKOFF_MS),
        })
    }

    /// Override the retry budget and backoff base.
    pub fn with_retry_policy(mut self, max_retries: u32, base_backoff: Duration) -> Self {
        self.max_retries = max_retries;
        self.base_backoff = base_backoff;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Build the user message from the summary context.
    fn build_prompt(ctx: &SummaryContext) -> String {
        let c = &ctx.current;
        let mut prompt = format!(
            "Location: {}\nSeason: {}\nObserved: {}\nNow: {:.1}°C (feels like {:.1}°C), {}, \
             humidity {:.0}%, wind {:.0} km/h gusting {:.0} km/h, UV {:.1}, {}\n",
            ctx.location_name,
            ctx.season.label(),
            c.observed_at.format("%Y-%m-%d %H:%M"),
            c.temperature,
            c.apparent_temperature,
            describe(c.weather_code),
            c.humidity,
            c.wind_speed,
            c.wind_gusts,
            c.uv_index,
            if c.is_day { "daytime" } else { "night" },
        );

        if let Some(daily) = &ctx.daily {
            prompt.push_str("Outlook:\n");
            for (i, date) in daily.time.iter().enumerate().take(3) {
                let lo = daily.temperature_min.get(i).copied().unwrap_or_default();
                let hi = daily.temperature_max.get(i).copied().unwrap_or_default();
                let rain = daily.precipitation_probability_max.get(i).copied().unwrap_or_default();
                let code = daily.weather_code.get(i).copied().unwrap_or_default();
                let _ = writeln!(
                    prompt,
                    "  {date}: {lo:.0}–{hi:.0}°C, {}, {rain:.0}% chance of rain",
                    describe(code)
                );
            }
        }

        if ctx.activities.is_empty() {
            prompt.push_str("Activities: general sightseeing\n");
        } else {
            let _ = writeln!(prompt, "Activities: {}", ctx.activities.join(", "));
        }
        prompt
    }

    /// Send one chat completion request with retry + exponential backoff.
    async fn call_api(&self, user_message: String) -> Result<String, GeneratorError> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user_message,
                },
            ],
        };

        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.base_backoff * 2u32.pow(attempt - 1);
                debug!(attempt, delay_ms = delay.as_millis() as u64, model = %self.model, "Retrying OpenRouter call");
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .http
                .post(&url)
                .bearer_auth(self.api_key.expose_secret())
                .header("X-Title", "weatherline")
                .json(&request)
                .send()
                .await;

            let response = match resp {
                Ok(response) => response,
                Err(e) => {
                    warn!(attempt, model = %self.model, error = %e, "OpenRouter request failed");
                    last_error = Some(format!("Request error: {e}"));
                    continue;
                }
            };

            let status = response.status();
            if status.is_success() {
                let body: ChatResponse = response
                    .json()
                    .await
                    .map_err(|e| GeneratorError::Failed(format!("Unparseable OpenRouter response: {e}")))?;

                let text = body
                    .choices
                    .first()
                    .and_then(|c| c.message.as_ref())
                    .map(|m| m.content.trim().to_string())
                    .unwrap_or_default();
                if text.is_empty() {
                    return Err(GeneratorError::Failed("OpenRouter returned an empty completion".into()));
                }

                let tokens = body.usage.map(|u| u.total_tokens).unwrap_or(0);
                info!(model = %self.model, tokens, "Summary generated (OpenRouter)");
                return Ok(text);
            }

            let error_text = response.text().await.unwrap_or_default();
            if status.as_u16() == 429 || status.is_server_error() {
                warn!(status = %status, attempt, model = %self.model, error = %error_text, "Retryable OpenRouter error");
                last_error = Some(format!("HTTP {status}: {error_text}"));
                continue;
            }

            if status.as_u16() == 401 || status.as_u16() == 403 {
                return Err(GeneratorError::Unavailable(format!(
                    "OpenRouter rejected the API key ({status}): {error_text}"
                )));
            }

            return Err(GeneratorError::Failed(format!(
                "OpenRouter API error {status} (model={}): {error_text}",
                self.model
            )));
        }

        Err(GeneratorError::Failed(format!(
            "OpenRouter failed after {} retries (model={}): {}",
            self.max_retries,
            self.model,
            last_error.unwrap_or_default()
        )))
    }
}

#[async_trait]
impl SummaryGenerator for OpenRouterGenerator {
    fn name(&self) -> &str {
        "openrouter"
    }

    async fn generate(&self, context: &SummaryContext) -> Result<String, GeneratorError> {
        debug!(location = %context.location_name, model = %self.model, "Requesting summary via OpenRouter");
        self.call_api(Self::build_prompt(context)).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::fixtures;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn context() -> SummaryContext {
        let snap = fixtures::snapshot(24.0, 2);
        SummaryContext::new("Harare", -17.83, snap.current, Some(snap.daily), vec!["hiking".into()])
    }

    fn generator(server: &MockServer) -> OpenRouterGenerator {
        OpenRouterGenerator::new(
            SecretString::new("or-key".into()),
            Some(server.uri()),
            None,
            None,
            Duration::from_secs(5),
        )
        .unwrap()
        .with_retry_policy(2, Duration::from_millis(1))
    }

    fn completion(text: &str) -> serde_json::Value {
        json!({
            "choices": [{"message": {"role": "assistant", "content": text}}],
            "usage": {"prompt_tokens": 120, "completion_tokens": 40, "total_tokens": 160}
        })
    }

    #[test]
    fn test_defaults() {
        let g = OpenRouterGenerator::new(SecretString::new("k".into()), None, None, None, Duration::from_secs(1))
            .unwrap();
        assert_eq!(g.model(), DEFAULT_MODEL);
        assert_eq!(g.max_tokens, DEFAULT_MAX_TOKENS);
        assert_eq!(g.base_url, DEFAULT_BASE_URL);
        assert_eq!(g.name(), "openrouter");
    }

    #[test]
    fn test_prompt_mentions_context() {
        let prompt = OpenRouterGenerator::build_prompt(&context());
        assert!(prompt.contains("Location: Harare"));
        assert!(prompt.contains("rainy season"));
        assert!(prompt.contains("partly cloudy skies"));
        assert!(prompt.contains("Activities: hiking"));
        assert!(prompt.contains("2026-01-15: 18–30°C"));
    }

    #[tokio::test]
    async fn test_generate_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer or-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("  Warm and bright.  ")))
            .expect(1)
            .mount(&server)
            .await;

        let text = generator(&server).generate(&context()).await.unwrap();
        assert_eq!(text, "Warm and bright.");
    }

    #[tokio::test]
    async fn test_retries_then_gives_up() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .expect(3)
            .mount(&server)
            .await;

        let err = generator(&server).generate(&context()).await.unwrap_err();
        assert!(matches!(err, GeneratorError::Failed(_)));
        assert!(err.to_string().contains("overloaded"));
    }

    #[tokio::test]
    async fn test_client_error_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .expect(1)
            .mount(&server)
            .await;

        let err = generator(&server).generate(&context()).await.unwrap_err();
        assert!(matches!(err, GeneratorError::Unavailable(_)));
        assert!(err.to_string().contains("401"));
    }

    #[tokio::test]
    async fn test_bad_request_is_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(400).set_body_string("unknown model"))
            .expect(1)
            .mount(&server)
            .await;

        let err = generator(&server).generate(&context()).await.unwrap_err();
        assert!(matches!(err, GeneratorError::Failed(_)));
        assert!(err.to_string().contains("unknown model"));
    }

    #[tokio::test]
    async fn test_empty_completion_is_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&server)
            .await;

        assert!(generator(&server).generate(&context()).await.is_err());
    }
}
