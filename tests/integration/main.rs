//! End-to-end tests over the HTTP router with scripted providers.

mod common;
mod summaries;
mod weather_flow;
