//! API Handlers
//!
//! HTTP request handlers for each cache admin endpoint. Every handler is a
//! thin wrapper over one [`CacheEngine`] operation.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::cache::CacheEngine;
use crate::error::Result;
use crate::models::{
    GetResponse, HealthResponse, InvalidateResponse, InvalidateSetsRequest, PurgeResponse,
    PutItemRequest, PutResponse, StatsResponse,
};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// The engine itself holds no cached data, so no lock is needed
    pub engine: Arc<CacheEngine>,
}

impl AppState {
    pub fn new(engine: Arc<CacheEngine>) -> Self {
        Self { engine }
    }
}

/// Handler for PUT /items
pub async fn put_handler(
    State(state): State<AppState>,
    Json(req): Json<PutItemRequest>,
) -> Result<Json<PutResponse>> {
    let expiration = req.expiration()?;
    state
        .engine
        .put_item(&req.key, &req.value, &req.dependent_sets, expiration, None)
        .await?;

    Ok(Json(PutResponse::new(req.key)))
}

/// Handler for GET /items/:key
///
/// Answers 404 with `found: false` when no live entry exists.
pub async fn get_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<(StatusCode, Json<GetResponse>)> {
    let value: Option<serde_json::Value> = state.engine.get_item(&key, None).await?;
    let status = if value.is_some() {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    };

    Ok((status, Json(GetResponse::new(key, value))))
}

/// Handler for DELETE /items/:key
pub async fn delete_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<InvalidateResponse>> {
    state.engine.invalidate_item(&key, None).await?;
    Ok(Json(InvalidateResponse::item(&key)))
}

/// Handler for POST /sets/invalidate
pub async fn invalidate_sets_handler(
    State(state): State<AppState>,
    Json(req): Json<InvalidateSetsRequest>,
) -> Result<Json<InvalidateResponse>> {
    state.engine.invalidate_sets(&req.sets, None).await?;
    Ok(Json(InvalidateResponse::sets(&req.sets)))
}

/// Handler for POST /purge
pub async fn purge_handler(State(state): State<AppState>) -> Json<PurgeResponse> {
    let purged = state.engine.purge().await;
    Json(PurgeResponse { purged })
}

/// Handler for POST /flush
///
/// Answers 403 unless the server runs with `ALLOW_ADMIN`.
pub async fn flush_handler(State(state): State<AppState>) -> Result<StatusCode> {
    state.engine.flush_all().await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Handler for GET /stats
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    let key_count = state.engine.count().await;
    Json(StatsResponse::new(state.engine.stats(), key_count))
}

/// Handler for GET /health
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}
