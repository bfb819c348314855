//! Natural-language weather summaries.
//!
//! Defines the `SummaryGenerator` trait and the context it is given, plus
//! an OpenRouter-backed generator and the deterministic template used when
//! no generator is available.

pub mod openrouter;
pub mod template;

use async_trait::async_trait;
use chrono::Datelike;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{CurrentConditions, DailySeries};

/// Southern tropic; inside it the wet/dry cycle replaces the four seasons.
const TROPIC_OF_CAPRICORN: f64 = -23.44;

#[derive(Debug, thiserror::Error)]
pub enum GeneratorError {
    /// No credentials or no client configured.
    #[error("Generator unavailable: {0}")]
    Unavailable(String),

    #[error("Generation failed: {0}")]
    Failed(String),
}

// ---------------------------------------------------------------------------
// Season
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Season {
    /// Southern tropics, November to March.
    Rainy,
    /// Southern tropics, April to August.
    CoolDry,
    /// Southern tropics, September and October.
    HotDry,
    Summer,
    Autumn,
    Winter,
    Spring,
}

impl Season {
    /// Season for an observation at `latitude` in calendar `month` (1-12).
    pub fn for_observation(latitude: f64, month: u32) -> Self {
        if (TROPIC_OF_CAPRICORN..0.0).contains(&latitude) {
            return match month {
                11 | 12 | 1 | 2 | 3 => Season::Rainy,
                4..=8 => Season::CoolDry,
                _ => Season::HotDry,
            };
        }

        let northern = match month {
            12 | 1 | 2 => Season::Winter,
            3..=5 => Season::Spring,
            6..=8 => Season::Summer,
            _ => Season::Autumn,
        };
        if latitude >= 0.0 {
            northern
        } else {
            match northern {
                Season::Winter => Season::Summer,
                Season::Summer => Season::Winter,
                Season::Spring => Season::Autumn,
                _ => Season::Spring,
            }
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Season::Rainy => "rainy season",
            Season::CoolDry => "cool dry season",
            Season::HotDry => "hot dry season",
            Season::Summer => "summer",
            Season::Autumn => "autumn",
            Season::Winter => "winter",
            Season::Spring => "spring",
        }
    }
}

impl fmt::Display for Season {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// Generator contract
// ---------------------------------------------------------------------------

/// Everything a summary is written from.
#[derive(Debug, Clone)]
pub struct SummaryContext {
    pub location_name: String,
    pub latitude: f64,
    pub current: CurrentConditions,
    /// Daily outlook, when the caller has one.
    pub daily: Option<DailySeries>,
    pub activities: Vec<String>,
    pub season: Season,
}

impl SummaryContext {
    pub fn new(
        location_name: impl Into<String>,
        latitude: f64,
        current: CurrentConditions,
        daily: Option<DailySeries>,
        activities: Vec<String>,
    ) -> Self {
        let season = Season::for_observation(latitude, current.observed_at.month());
        Self {
            location_name: location_name.into(),
            latitude,
            current,
            daily,
            activities,
            season,
        }
    }
}

/// Produces summary text. Implementations are costly and rate limited, so
/// callers go through the summary cache.
#[async_trait]
pub trait SummaryGenerator: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, context: &SummaryContext) -> Result<String, GeneratorError>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
