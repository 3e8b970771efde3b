//! HTTP front-end tests: routing, qualifier selection and status mapping.

mod common;

use std::sync::Arc;
use std::time::Instant;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use common::{harness, records, FakeUpstream, Harness};
use top100_cache::provider::FetchError;
use top100_cache::server::api::{build_router, AppState};

fn router(h: &Harness) -> Router {
    build_router(Arc::new(AppState {
        engine: h.engine.clone(),
        start_time: Instant::now(),
    }))
}

async fn get(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

fn json_body(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes).unwrap()
}

#[tokio::test]
async fn test_top100_returns_records() {
    let h = harness(FakeUpstream::returning(json!(records(3))));

    let (status, body) = get(router(&h), "/api/top100/crypto").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body), json!(records(3)));
}

#[tokio::test]
async fn test_year_query_param_selects_entry() {
    let h = harness(FakeUpstream::returning(json!(records(2))));

    let (status, _) = get(router(&h), "/api/top100/cars?year=2019").await;
    assert_eq!(status, StatusCode::OK);
    assert!(h
        .store
        .document_ids()
        .await
        .contains(&"cars-2019-metadata".to_string()));
}

#[tokio::test]
async fn test_unknown_category_is_bad_request() {
    let h = harness(FakeUpstream::returning(json!(records(1))));

    let (status, body) = get(router(&h), "/api/top100/weather").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json_body(&body), json!({ "error": "Invalid category" }));
    assert_eq!(h.upstream.calls(), 0);
}

#[tokio::test]
async fn test_upstream_failure_is_server_error() {
    let h = harness(FakeUpstream::failing(FetchError::Status(502)));

    let (status, body) = get(router(&h), "/api/top100/movies").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(&body);
    assert_eq!(body["error"], "Failed to fetch data");
    assert!(body["details"].as_str().unwrap().contains("502"));
}

#[tokio::test]
async fn test_health_lists_categories() {
    let h = harness(FakeUpstream::returning(json!([])));

    let (status, body) = get(router(&h), "/health").await;
    assert_eq!(status, StatusCode::OK);
    let body = json_body(&body);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["categories"].as_array().unwrap().len(), 7);
}

#[tokio::test]
async fn test_metrics_exposes_lookups() {
    let h = harness(FakeUpstream::returning(json!(records(1))));
    let app = router(&h);

    get(app.clone(), "/api/top100/crypto").await;
    get(app.clone(), "/api/top100/crypto").await;

    let (status, body) = get(app, "/metrics").await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(body).unwrap();
    assert!(text.contains("top100_cache_lookups_total"));
    assert!(text.contains("outcome=\"hit\""));
    assert!(text.contains("outcome=\"miss\""));
}
