//! Cache, fallback and backoff behaviour as seen through `/weather`.

use axum::http::StatusCode;
use chrono::Duration;

use crate::common::{json_body, weather_uri, Harness, Script, BULAWAYO, FREE, HARARE, MUTARE, PREMIUM};

#[tokio::test]
async fn test_out_of_bounds_never_reaches_a_provider() {
    let h = Harness::new(Script::Succeed, Script::Succeed).await;

    let resp = h.get("/weather?lat=0&lon=0").await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body = json_body(resp).await;
    assert!(body["error"].as_str().unwrap().contains("outside"));

    assert_eq!(h.premium.calls(), 0);
    assert_eq!(h.free.calls(), 0);
}

#[tokio::test]
async fn test_miss_then_hit_then_expiry() {
    let h = Harness::new(Script::Succeed, Script::Succeed).await;

    let resp = h.get(&weather_uri(HARARE)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["x-cache"], "MISS");
    assert_eq!(resp.headers()["x-weather-provider"], PREMIUM);
    let body = json_body(resp).await;
    assert_eq!(body["source"], "premium");
    assert_eq!(body["location_key"], "harare");

    h.wait_for_cache("harare").await;

    let resp = h.get(&weather_uri(HARARE)).await;
    assert_eq!(resp.headers()["x-cache"], "HIT");
    assert!(resp.headers().get("x-weather-provider").is_none());
    assert_eq!(json_body(resp).await["source"], "cache");
    assert_eq!(h.premium.calls(), 1);

    // Past the 15 minute TTL the entry no longer counts.
    h.clock.advance(Duration::minutes(15));
    let resp = h.get(&weather_uri(HARARE)).await;
    assert_eq!(resp.headers()["x-cache"], "MISS");
    assert_eq!(h.premium.calls(), 2);
    assert_eq!(h.free.calls(), 0);
}

#[tokio::test]
async fn test_rate_limited_premium_falls_back_and_backs_off() {
    let h = Harness::new(Script::RateLimited, Script::Succeed).await;

    let resp = h.get(&weather_uri(HARARE)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["x-weather-provider"], FREE);
    assert_eq!(json_body(resp).await["source"], "free");
    assert_eq!((h.premium.calls(), h.free.calls()), (1, 1));

    // Within the cooldown the premium provider is not contacted at all.
    let resp = h.get(&weather_uri(BULAWAYO)).await;
    assert_eq!(json_body(resp).await["source"], "free");
    assert_eq!((h.premium.calls(), h.free.calls()), (1, 2));
    assert!(h.state.orchestrator.gateway().premium_backoff_until().await.is_some());

    h.clock.advance(Duration::seconds(61));
    assert!(h.state.orchestrator.gateway().premium_backoff_until().await.is_none());

    let resp = h.get(&weather_uri(MUTARE)).await;
    assert_eq!(json_body(resp).await["source"], "free");
    assert_eq!((h.premium.calls(), h.free.calls()), (2, 3));
}

#[tokio::test]
async fn test_failing_premium_falls_back_without_backoff() {
    let h = Harness::new(Script::Fail, Script::Succeed).await;

    h.get(&weather_uri(HARARE)).await;
    h.get(&weather_uri(BULAWAYO)).await;

    assert_eq!((h.premium.calls(), h.free.calls()), (2, 2));
    assert!(h.state.orchestrator.gateway().premium_backoff_until().await.is_none());
}

#[tokio::test]
async fn test_both_providers_down_is_502() {
    let h = Harness::new(Script::Fail, Script::Fail).await;

    let resp = h.get(&weather_uri(HARARE)).await;
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    let body = json_body(resp).await;
    assert!(body["error"].as_str().unwrap().contains("harare"));
    assert_eq!((h.premium.calls(), h.free.calls()), (1, 1));
}

#[tokio::test]
async fn test_remote_coordinates_use_a_synthetic_key() {
    let h = Harness::new(Script::Succeed, Script::Succeed).await;

    let resp = h.get("/weather?lat=-22.5&lon=24.5").await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body["location_key"], "geo:-22.50:24.50");
    // The nearest known place is still reported for display.
    assert!(body["location"]["slug"].is_string());
    assert!(body["location"]["distance_km"].as_f64().unwrap() > 25.0);
}

#[tokio::test]
async fn test_fetch_is_recorded_in_history() {
    let h = Harness::new(Script::Succeed, Script::Succeed).await;

    h.get(&weather_uri(HARARE)).await;
    h.wait_for_history("harare", 1).await;

    let resp = h.get("/history?lat=-17.83&lon=31.05&limit=10").await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body["location_key"], "harare");
    let records = body["records"].as_array().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["current"]["temperature"], 24.0);
}
