//! HTTP API over the cache engine.
//!
//! - GET /api/top100/{category}?year=&date=&query=
//! - GET /health
//! - GET /metrics

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;

use crate::cache::chunk::Record;
use crate::cache::key::QualifierKind;
use crate::cache::{CacheEngine, CacheError};

/// Application state shared across handlers.
pub struct AppState {
    pub engine: Arc<CacheEngine>,
    pub start_time: Instant,
}

/// Build the axum router with all API routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/top100/{category}", get(top100))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

// ─── Request/Response Types ────────────────────────────────────────────────

/// Qualifier candidates from the query string. Only the one matching the
/// category's qualifier kind is used.
#[derive(Debug, Default, Deserialize)]
pub struct QualifierParams {
    pub year: Option<String>,
    pub date: Option<String>,
    pub query: Option<String>,
}

impl QualifierParams {
    pub fn select(&self, kind: &QualifierKind) -> Option<&str> {
        match kind {
            QualifierKind::None => None,
            QualifierKind::Year => self.year.as_deref(),
            QualifierKind::Date => self.date.as_deref(),
            QualifierKind::Query { .. } => self.query.as_deref(),
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub categories: Vec<String>,
}

/// Engine error rendered as a JSON body.
#[derive(Debug)]
pub struct ApiError(CacheError);

impl From<CacheError> for ApiError {
    fn from(err: CacheError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self.0 {
            CacheError::UnknownCategory(_) => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "Invalid category" })),
            )
                .into_response(),
            other => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": "Failed to fetch data",
                    "details": other.to_string(),
                })),
            )
                .into_response(),
        }
    }
}

// ─── Route Handlers ────────────────────────────────────────────────────────

async fn top100(
    State(state): State<Arc<AppState>>,
    Path(category): Path<String>,
    Query(params): Query<QualifierParams>,
) -> Result<Json<Vec<Record>>, ApiError> {
    let request_id = Uuid::new_v4().to_string();
    let started = Instant::now();

    let kind = state.engine.qualifier_kind(&category)?;
    match state
        .engine
        .fetch_category(&category, params.select(&kind))
        .await
    {
        Ok(records) => {
            info!(
                request_id = %request_id,
                category = %category,
                items = records.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Served top100 request"
            );
            Ok(Json(records))
        }
        Err(e) => {
            error!(request_id = %request_id, category = %category, error = %e, "top100 request failed");
            Err(e.into())
        }
    }
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        categories: state.engine.categories(),
    })
}

async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    match state.engine.metrics().render() {
        Ok(text) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to render metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
