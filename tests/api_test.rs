// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - HTTP Submission Endpoint Tests
 * Exercises the validation server contract against the fake browser stack
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use common::{FakeApp, FakeLauncher};
use http_body_util::BodyExt;
use pistin::api::{router, ApiConfig, ApiState};
use pistin::config::DetectOptions;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

const INPUT: &str = "input[name=q]";

fn state(rate_limit: u32) -> Arc<ApiState> {
    let launcher = Arc::new(FakeLauncher::new(FakeApp::reflecting(INPUT)));

    let mut defaults = DetectOptions::new();
    defaults.timeouts.execution = 10;

    Arc::new(ApiState::new(
        launcher,
        defaults,
        ApiConfig {
            port: 0,
            max_concurrent_pages: 2,
            rate_limit_per_minute: rate_limit,
        },
    ))
}

fn submission(html: &str, payload: &str) -> Request<Body> {
    let body = json!({
        "http-response": BASE64.encode(html),
        "http-url": BASE64.encode("https://t.example/"),
        "http-headers": BASE64.encode(""),
        "payload": payload,
        "browser": "chromium"
    });
    Request::builder()
        .method("POST")
        .uri("/")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_submission_with_executing_payload_returns_200() {
    let app = router(state(100));

    let response = app
        .oneshot(submission(
            "<p><script>alert(1)</script></p>",
            "<script>alert(1)</script>",
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["value"], 1);
    assert_eq!(body["enhanced"]["detected"], true);
    assert_eq!(body["enhanced"]["executed"], true);
    assert_eq!(body["enhanced"]["severity"], "high");
    assert!(body["enhanced"]["confidence"].as_f64().unwrap() >= 0.9);
    assert!(body["enhanced"]["detectionMethods"]
        .as_array()
        .unwrap()
        .iter()
        .any(|m| m == "dialog"));
}

#[tokio::test]
async fn test_clean_response_returns_201() {
    let app = router(state(100));

    let response = app
        .oneshot(submission("<p>nothing here</p>", "<script>alert(1)</script>"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert_eq!(body["value"], 0);
    assert_eq!(body["enhanced"]["detected"], false);
}

#[tokio::test]
async fn test_reflection_only_is_low_severity() {
    let app = router(state(100));

    let response = app
        .oneshot(submission("<p>&lt;b&gt;</p><b>hi</b>", "<b>hi</b>"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["enhanced"]["executed"], false);
    assert_eq!(body["enhanced"]["severity"], "low");
    assert!((body["enhanced"]["confidence"].as_f64().unwrap() - 0.6).abs() < 1e-9);
}

#[tokio::test]
async fn test_invalid_base64_returns_400() {
    let body = json!({
        "http-response": "!!not-base64!!",
        "http-url": BASE64.encode("https://t.example/"),
        "payload": "<b>x</b>"
    });
    let request = Request::builder()
        .method("POST")
        .uri("/")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();

    let response = router(state(100)).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_browser_returns_400() {
    let app = router(state(100));

    let body = json!({
        "http-response": BASE64.encode("<p>x</p>"),
        "http-url": BASE64.encode("https://t.example/"),
        "payload": "<b>x</b>",
        "browser": "netscape"
    });
    let request = Request::builder()
        .method("POST")
        .uri("/")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_rate_limit_returns_429_with_retry_after() {
    let shared = state(1);

    let first = router(shared.clone())
        .oneshot(submission("<p>x</p>", "<b>x</b>"))
        .await
        .unwrap();
    assert_ne!(first.status(), StatusCode::TOO_MANY_REQUESTS);

    let second = router(shared)
        .oneshot(submission("<p>x</p>", "<b>x</b>"))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    let body = body_json(second).await;
    assert!(body["retryAfter"].as_u64().unwrap() >= 1);
}

#[tokio::test]
async fn test_health_and_metrics_endpoints() {
    let shared = state(100);

    let _ = router(shared.clone())
        .oneshot(submission(
            "<p><script>alert(1)</script></p>",
            "<script>alert(1)</script>",
        ))
        .await
        .unwrap();

    let health = router(shared.clone())
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(health.status(), StatusCode::OK);
    let health_body = body_json(health).await;
    assert_eq!(health_body["status"], "healthy");
    assert!(health_body["maxConcurrentPages"].as_u64().unwrap() >= 1);
    assert!(health_body["browserPool"]["chromium"]["contexts"].is_number());

    let metrics = router(shared)
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(metrics.status(), StatusCode::OK);
    let metrics_body = body_json(metrics).await;
    assert_eq!(metrics_body["requestsTotal"], 1);
    assert_eq!(metrics_body["xssFound"], 1);
}
