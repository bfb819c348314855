//! AI summary staleness as seen through `/ai-summary`.

use axum::http::StatusCode;
use serde_json::json;

use crate::common::{json_body, snapshot, Harness, Script};

fn request(temperature: f64, code: i32) -> serde_json::Value {
    json!({
        "weatherData": serde_json::to_value(snapshot(temperature, code)).unwrap(),
        "location": { "name": "Harare", "slug": "harare" },
        "activities": ["hiking"],
    })
}

#[tokio::test]
async fn test_summary_reused_until_weather_drifts() {
    let h = Harness::new(Script::Succeed, Script::Succeed).await;

    let resp = h.post_json("/ai-summary", request(20.0, 1)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["x-cache"], "MISS");
    let first = json_body(resp).await;
    assert_eq!(first["cached"], false);
    assert_eq!(first["location_key"], "harare");
    assert!(first["summary"].as_str().unwrap().starts_with("summary #1"));

    // +1°C, same category: the stored text is still accurate.
    let resp = h.post_json("/ai-summary", request(21.0, 1)).await;
    assert_eq!(resp.headers()["x-cache"], "HIT");
    let body = json_body(resp).await;
    assert_eq!(body["cached"], true);
    assert_eq!(body["summary"], first["summary"]);

    // +5°C from the stored fingerprint.
    let body = json_body(h.post_json("/ai-summary", request(25.0, 1)).await).await;
    assert_eq!(body["cached"], false);
    assert!(body["summary"].as_str().unwrap().starts_with("summary #2"));

    // Same temperature, clear → cloudy.
    let body = json_body(h.post_json("/ai-summary", request(25.0, 3)).await).await;
    assert_eq!(body["cached"], false);

    // Codes 2 and 3 are both cloudy.
    let body = json_body(h.post_json("/ai-summary", request(25.5, 2)).await).await;
    assert_eq!(body["cached"], true);

    assert_eq!(h.generator.calls(), 3);
}

#[tokio::test]
async fn test_summary_request_validation() {
    let h = Harness::new(Script::Succeed, Script::Succeed).await;

    let resp = h
        .post_json("/ai-summary", json!({ "location": "Harare" }))
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(json_body(resp).await["error"].as_str().unwrap().contains("weatherData"));

    let resp = h
        .post_json(
            "/ai-summary",
            json!({ "weatherData": serde_json::to_value(snapshot(20.0, 1)).unwrap() }),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(json_body(resp).await["error"].as_str().unwrap().contains("location"));

    let resp = h
        .post_json("/ai-summary", json!({ "weatherData": { "current": 3 }, "location": "Harare" }))
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    assert_eq!(h.generator.calls(), 0);
}

#[tokio::test]
async fn test_summary_from_live_weather() {
    let h = Harness::new(Script::Succeed, Script::Succeed).await;

    let resp = h.get("/ai-summary?lat=-17.83&lon=31.05&activities=hiking,%20golf").await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body["cached"], false);
    assert_eq!(body["location_key"], "harare");
    assert_eq!(body["summary"], "summary #1 for Harare at 24.0°C");

    let body = json_body(h.get("/ai-summary?lat=-17.83&lon=31.05").await).await;
    assert_eq!(body["cached"], true);
    assert_eq!(h.generator.calls(), 1);
}

#[tokio::test]
async fn test_summary_out_of_bounds_is_400() {
    let h = Harness::new(Script::Succeed, Script::Succeed).await;

    let resp = h.get("/ai-summary?lat=0&lon=0").await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(h.generator.calls(), 0);
    assert_eq!(h.premium.calls(), 0);
}
