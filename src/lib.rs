//! Weatherline: location-based weather service.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod api;
pub mod cache;
pub mod clock;
pub mod config;
pub mod engine;
pub mod geo;
pub mod history;
pub mod llm;
pub mod providers;
pub mod storage;
pub mod types;
