//! Caches in front of the providers and the summary generator.
//!
//! [`weather::WeatherCache`] judges freshness purely by age; the
//! [`summary::AiSummaryCache`] judges it by how far conditions drifted
//! since the summary was written.

pub mod summary;
pub mod weather;

pub use summary::{AiSummaryCache, ConditionCategories, SummaryError, SummaryOutcome};
pub use weather::WeatherCache;
