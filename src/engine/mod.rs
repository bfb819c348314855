//! Core engine: resolve → cache → providers → persist.

pub mod orchestrator;

pub use orchestrator::{FetchOrchestrator, PendingWrites, WeatherOutcome};
