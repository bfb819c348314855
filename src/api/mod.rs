//! HTTP boundary: axum router over the weather engine.
//!
//! CORS is open for browser clients; every request runs in a span carrying
//! a fresh `request_id`.

pub mod error;
pub mod routes;

use axum::{
    extract::Request,
    http::{header, Method},
    routing::get,
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info_span;
use uuid::Uuid;

pub use error::ApiError;
pub use routes::{ApiState, AppState};

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
        .expose_headers([routes::X_CACHE, routes::X_WEATHER_PROVIDER]);

    let trace = TraceLayer::new_for_http().make_span_with(|req: &Request| {
        info_span!(
            "request",
            request_id = %Uuid::new_v4(),
            method = %req.method(),
            uri = %req.uri(),
        )
    });

    Router::new()
        .route("/weather", get(routes::get_weather))
        .route(
            "/ai-summary",
            get(routes::get_ai_summary).post(routes::post_ai_summary),
        )
        .route("/geo", get(routes::get_geo))
        .route("/history", get(routes::get_history))
        .route("/health", get(routes::health))
        .layer(trace)
        .layer(cors)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
