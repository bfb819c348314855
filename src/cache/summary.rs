//! AI summary cache.
//!
//! A summary is served until the weather it describes has drifted: the
//! temperature moved more than the threshold, or the weather code left its
//! condition category. Age alone never invalidates a summary.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::llm::{template, SummaryContext, SummaryGenerator};
use crate::storage::SummaryStore;
use crate::types::{LocationKey, SnapshotFingerprint, SummaryEntry, WeatherError};

// ---------------------------------------------------------------------------
// Condition categories
// ---------------------------------------------------------------------------

/// WMO weather code → condition category.
///
/// Codes missing from the table are each their own category, so moving to
/// or from an unmapped code always counts as a change.
#[derive(Debug, Clone)]
pub struct ConditionCategories {
    by_code: HashMap<i32, String>,
}

impl ConditionCategories {
    pub fn builtin() -> Self {
        let table: [(&str, Vec<i32>); 7] = [
            ("clear", vec![0, 1]),
            ("cloudy", vec![2, 3]),
            ("fog", vec![45, 48]),
            ("drizzle", (51..=57).collect()),
            ("rain", (61..=67).chain(80..=82).collect()),
            ("snow", (71..=77).chain(85..=86).collect()),
            ("thunderstorm", (95..=99).collect()),
        ];
        let by_code = table
            .into_iter()
            .flat_map(|(name, codes)| codes.into_iter().map(move |c| (c, name.to_string())))
            .collect();
        Self { by_code }
    }

    /// Build from a configured table; an empty table means the built-in one.
    pub fn from_table(table: &BTreeMap<String, Vec<i32>>) -> Self {
        if table.is_empty() {
            return Self::builtin();
        }
        let by_code = table
            .iter()
            .flat_map(|(name, codes)| codes.iter().map(move |c| (*c, name.clone())))
            .collect();
        Self { by_code }
    }

    pub fn category(&self, code: i32) -> Cow<'_, str> {
        match self.by_code.get(&code) {
            Some(name) => Cow::Borrowed(name.as_str()),
            None => Cow::Owned(format!("unmapped:{code}")),
        }
    }

    pub fn same_category(&self, a: i32, b: i32) -> bool {
        self.category(a) == self.category(b)
    }
}

impl Default for ConditionCategories {
    fn default() -> Self {
        Self::builtin()
    }
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SummaryError {
    /// Neither the generator nor the template could produce text.
    #[error("Summary unavailable: {0}")]
    FallbackUnavailable(String),
}

impl From<SummaryError> for WeatherError {
    fn from(err: SummaryError) -> Self {
        match err {
            SummaryError::FallbackUnavailable(msg) => WeatherError::GeneratorUnavailable(msg),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SummaryOutcome {
    pub text: String,
    pub cached: bool,
}

pub struct AiSummaryCache {
    store: Arc<dyn SummaryStore>,
    generator: Option<Arc<dyn SummaryGenerator>>,
    categories: ConditionCategories,
    temp_delta_threshold: f64,
    clock: Arc<dyn Clock>,
}

impl AiSummaryCache {
    pub fn new(
        store: Arc<dyn SummaryStore>,
        generator: Option<Arc<dyn SummaryGenerator>>,
        categories: ConditionCategories,
        temp_delta_threshold: f64,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            generator,
            categories,
            temp_delta_threshold,
            clock,
        }
    }

    /// Stale iff |Δtemperature| > threshold or the condition category changed.
    pub fn is_stale(&self, stored: &SnapshotFingerprint, current: &SnapshotFingerprint) -> bool {
        (current.temperature - stored.temperature).abs() > self.temp_delta_threshold
            || !self
                .categories
                .same_category(stored.weather_code, current.weather_code)
    }

    /// Serve the cached summary for `key` when it still describes `context`,
    /// otherwise write a new one and cache it.
    pub async fn get_or_generate(
        &self,
        key: &LocationKey,
        context: &SummaryContext,
    ) -> Result<SummaryOutcome, SummaryError> {
        let current = context.current.fingerprint();

        match self.store.get(key).await {
            Ok(Some(entry)) if !self.is_stale(&entry.fingerprint, &current) => {
                debug!(location_key = %key, "AI summary cache hit");
                return Ok(SummaryOutcome {
                    text: entry.text,
                    cached: true,
                });
            }
            Ok(Some(entry)) => {
                info!(
                    location_key = %key,
                    stored_temp = entry.fingerprint.temperature,
                    current_temp = current.temperature,
                    stored_code = entry.fingerprint.weather_code,
                    current_code = current.weather_code,
                    "AI summary stale, regenerating"
                );
            }
            Ok(None) => debug!(location_key = %key, "AI summary cache miss"),
            Err(e) => {
                error!(location_key = %key, error = %e, "AI summary read failed, regenerating");
            }
        }

        let text = self.produce(key, context).await?;

        let entry = SummaryEntry {
            location_key: key.clone(),
            text: text.clone(),
            generated_at: self.clock.now(),
            fingerprint: current,
        };
        if let Err(e) = self.store.put(entry).await {
            error!(location_key = %key, error = %e, "Failed to store AI summary");
        }

        Ok(SummaryOutcome { text, cached: false })
    }

    /// Generator output, or the template when the generator is absent or fails.
    async fn produce(&self, key: &LocationKey, context: &SummaryContext) -> Result<String, SummaryError> {
        if let Some(generator) = &self.generator {
            match generator.generate(context).await {
                Ok(text) => return Ok(text),
                Err(e) => {
                    warn!(
                        location_key = %key,
                        generator = generator.name(),
                        error = %e,
                        "Summary generator failed, using template"
                    );
                }
            }
        }

        template::render(context).ok_or_else(|| {
            SummaryError::FallbackUnavailable(format!("no location name to summarise for {key}"))
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
