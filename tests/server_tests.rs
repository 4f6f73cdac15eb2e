//! Integration tests for the HTTP API.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::bail;
use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use prometheus::Registry;
use tower::ServiceExt;

use asset_fetch_cache::cache::{CacheKey, CostCache};
use asset_fetch_cache::fetch::{
    Asset, AssetSource, AssetWeigher, CoordinatorOptions, FetchCoordinator,
};
use asset_fetch_cache::metrics::CacheMetrics;
use asset_fetch_cache::server::asset_api::ErrorBody;
use asset_fetch_cache::server::{build_router, AppState};

/// Serves a fixed PNG for every URL except those containing "broken".
struct FakeSource {
    calls: AtomicUsize,
}

#[async_trait]
impl AssetSource for FakeSource {
    async fn fetch(&self, key: &CacheKey) -> anyhow::Result<Asset> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if key.as_str().contains("broken") {
            bail!("upstream returned 500");
        }
        Ok(Asset::new(&b"\x89PNG fake"[..], Some("image/png")))
    }
}

fn app() -> (Router, Arc<FakeSource>) {
    let registry = Registry::new();
    let metrics = CacheMetrics::register(&registry).unwrap();
    let source = Arc::new(FakeSource {
        calls: AtomicUsize::new(0),
    });
    let state = Arc::new(AppState {
        coordinator: FetchCoordinator::with_options(
            CostCache::new(16, 1 << 20),
            AssetWeigher,
            CoordinatorOptions {
                metrics: Some(metrics),
                ..Default::default()
            },
        ),
        source: source.clone(),
        registry,
        start_time: Instant::now(),
    });
    (build_router(state), source)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn delete(uri: &str) -> Request<Body> {
    Request::builder()
        .method("DELETE")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

const ASSET: &str = "/v1/assets?url=https%3A%2F%2Fcdn.example.com%2Fa.png";

#[tokio::test]
async fn test_miss_then_hit() {
    let (app, source) = app();

    let response = app.clone().oneshot(get(ASSET)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-cache"], "miss");
    assert_eq!(response.headers()["content-type"], "image/png");
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"\x89PNG fake");

    let response = app.oneshot(get(ASSET)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-cache"], "hit");
    assert_eq!(source.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_upstream_failure_is_bad_gateway() {
    let (app, source) = app();
    let uri = "/v1/assets?url=https%3A%2F%2Fcdn.example.com%2Fbroken.png";

    let response = app.clone().oneshot(get(uri)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let err: ErrorBody = serde_json::from_slice(&body).unwrap();
    assert!(err.error.contains("upstream returned 500"));

    // Failures are not cached.
    let response = app.oneshot(get(uri)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(source.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_invalid_url_is_bad_request() {
    let (app, source) = app();

    let response = app.oneshot(get("/v1/assets?url=file%3A%2F%2F%2Fetc%2Fpasswd")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(source.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_invalidate() {
    let (app, source) = app();

    app.clone().oneshot(get(ASSET)).await.unwrap();

    let response = app.clone().oneshot(delete(ASSET)).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let response = app.clone().oneshot(delete(ASSET)).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app.oneshot(get(ASSET)).await.unwrap();
    assert_eq!(response.headers()["x-cache"], "miss");
    assert_eq!(source.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_stats_and_health() {
    let (app, _source) = app();
    app.clone().oneshot(get(ASSET)).await.unwrap();

    let response = app.clone().oneshot(get("/v1/cache/stats")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let stats: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(stats["entry_count"], 1);
    assert_eq!(stats["total_cost"], 9);
    assert_eq!(stats["in_flight"], 0);

    let response = app.oneshot(get("/health")).await.unwrap();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["cache"]["count_limit"], 16);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let (app, _source) = app();
    app.clone().oneshot(get(ASSET)).await.unwrap();

    let response = app.oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("asset_cache_lookups_total{result=\"miss\"} 1"));
    assert!(text.contains("asset_cache_resident_entries 1"));
}
