//! HTTP API in front of the fetch coordinator.
//!
//! - GET /v1/assets?url=…
//! - DELETE /v1/assets?url=…
//! - GET /v1/cache/stats
//! - GET /health
//! - GET /metrics

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use prometheus::Registry;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;

use crate::cache::{CacheKey, CacheStats, KeyError};
use crate::fetch::{Asset, AssetSource, FetchCoordinator, FetchError};
use crate::metrics;

/// Response header reporting how the asset was served: `hit`, `joined` or `miss`.
pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

/// Application state shared across handlers.
pub struct AppState {
    pub coordinator: FetchCoordinator<Asset>,
    pub source: Arc<dyn AssetSource>,
    pub registry: Registry,
    pub start_time: Instant,
}

/// Build the axum router with all API routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/assets", get(get_asset).delete(invalidate_asset))
        .route("/v1/cache/stats", get(cache_stats))
        .route("/health", get(health))
        .route("/metrics", get(metrics_text))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

// ─── Request/Response Types ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AssetQuery {
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Cache statistics response.
#[derive(Debug, Serialize)]
pub struct CacheStatsResponse {
    #[serde(flatten)]
    pub cache: CacheStats,
    pub cost_utilization: f64,
    pub in_flight: usize,
}

impl CacheStatsResponse {
    fn collect(coordinator: &FetchCoordinator<Asset>) -> Self {
        let cache = coordinator.stats();
        Self {
            cost_utilization: cache.cost_utilization(),
            cache,
            in_flight: coordinator.in_flight_count(),
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub cache: CacheStatsResponse,
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    BadKey(#[from] KeyError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadKey(_) => StatusCode::BAD_REQUEST,
            ApiError::Fetch(FetchError::FetchFailed(_)) => StatusCode::BAD_GATEWAY,
            ApiError::Fetch(FetchError::Cancelled) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %self, "Request failed");
        }
        let body = ErrorBody {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

// ─── Route Handlers ────────────────────────────────────────────────────────

async fn get_asset(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AssetQuery>,
) -> Result<Response, ApiError> {
    let request_id = Uuid::new_v4();
    let key = CacheKey::from_url(&query.url)?;

    let source = Arc::clone(&state.source);
    let lookup = state
        .coordinator
        .request(key.clone(), move |key| async move { source.fetch(&key).await });
    let served = lookup.lookup_result();

    info!(
        request_id = %request_id,
        key = %key,
        cache = served.as_str(),
        "Asset request"
    );

    // Dropping this future (client went away) withdraws the waiter.
    let asset = lookup.resolve().await?;

    let mut response = asset.bytes.into_response();
    let headers = response.headers_mut();
    if let Some(value) = asset
        .content_type
        .as_deref()
        .and_then(|ct| HeaderValue::from_str(ct).ok())
    {
        headers.insert(CONTENT_TYPE, value);
    }
    headers.insert(X_CACHE, HeaderValue::from_static(served.as_str()));
    Ok(response)
}

async fn invalidate_asset(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AssetQuery>,
) -> Result<StatusCode, ApiError> {
    let key = CacheKey::from_url(&query.url)?;
    let removed = state.coordinator.invalidate(&key);
    info!(key = %key, removed, "Invalidate request");
    Ok(if removed {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    })
}

async fn cache_stats(State(state): State<Arc<AppState>>) -> Json<CacheStatsResponse> {
    Json(CacheStatsResponse::collect(&state.coordinator))
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        cache: CacheStatsResponse::collect(&state.coordinator),
    })
}

async fn metrics_text(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let body = metrics::render(&state.registry)?;
    Ok((
        [(CONTENT_TYPE, HeaderValue::from_static("text/plain; version=0.0.4"))],
        body,
    )
        .into_response())
}
