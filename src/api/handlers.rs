//! API Handlers
//!
//! HTTP request handlers mapping wire requests onto store operations.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};

use crate::error::{Result, StoreError};
use crate::models::{
    DeleteResponse, GetQuery, GetResponse, HealthResponse, PurgeResponse, PutRequest, PutResponse,
    StatsResponse,
};
use crate::store::{KvStore, ShardedStore};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// The sharded store; internally synchronized
    pub store: Arc<ShardedStore>,
}

impl AppState {
    /// Creates a new AppState around an opened store.
    pub fn new(store: ShardedStore) -> Self {
        Self {
            store: Arc::new(store),
        }
    }
}

/// Handler for GET /get/:key
///
/// Reads from a replica unless `?consistent=true` is given.
pub async fn get_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<GetQuery>,
) -> Result<Json<GetResponse>> {
    let value = state.store.get(&key, query.consistent).await?;
    Ok(Json(GetResponse::new(key, value)))
}

/// Handler for PUT /put
pub async fn put_handler(
    State(state): State<AppState>,
    Json(req): Json<PutRequest>,
) -> Result<Json<PutResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(StoreError::InvalidRequest(error_msg));
    }

    let expiry = state.store.put(&req.key, &req.value).await?;
    Ok(Json(PutResponse::new(req.key, expiry)))
}

/// Handler for DELETE /delete/:key
pub async fn delete_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<DeleteResponse>> {
    state.store.delete(&key).await?;
    Ok(Json(DeleteResponse::new(key)))
}

/// Handler for POST /purge
pub async fn purge_handler(State(state): State<AppState>) -> Result<Json<PurgeResponse>> {
    let report = state.store.purge().await?;
    Ok(Json(report.into()))
}

/// Handler for GET /stats
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse::new(
        state.store.stats(),
        state.store.shard_count(),
    ))
}

/// Handler for GET /health
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse::healthy(state.store.shard_count()))
}
