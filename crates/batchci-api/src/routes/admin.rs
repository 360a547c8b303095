//! Access-key management and the webhook delivery log.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use batchci_db::WebhookEventRecord;
use serde::Deserialize;
use tracing::info;

use crate::AppState;
use crate::auth::Operator;
use crate::error::ApiError;
use crate::views::{AccessKeyView, IssuedAccessKey};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/keys", get(list_keys).post(create_key))
        .route("/keys/{name}", delete(delete_key))
        .route("/keys/{name}/rotate", post(rotate_key))
        .route("/webhooks", get(list_webhook_events))
}

async fn list_keys(
    _operator: Operator,
    State(state): State<AppState>,
) -> Result<Json<Vec<AccessKeyView>>, ApiError> {
    let keys = state.store.access_keys.list().await?;
    Ok(Json(keys.iter().map(AccessKeyView::from).collect()))
}

#[derive(Debug, Deserialize)]
struct CreateKeyRequest {
    name: String,
    remark: Option<String>,
}

async fn create_key(
    _operator: Operator,
    State(state): State<AppState>,
    Json(req): Json<CreateKeyRequest>,
) -> Result<(StatusCode, Json<IssuedAccessKey>), ApiError> {
    if req.name.trim().is_empty() {
        return Err(ApiError::BadRequest("key name must not be empty".to_string()));
    }
    let key = state
        .store
        .access_keys
        .create(&req.name, req.remark.as_deref())
        .await?;
    info!(key = %key.name, "Created access key");
    Ok((StatusCode::CREATED, Json(key.into())))
}

async fn rotate_key(
    _operator: Operator,
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<IssuedAccessKey>, ApiError> {
    let key = state.store.access_keys.rotate(&name).await?;
    info!(key = %key.name, "Rotated access key");
    Ok(Json(key.into()))
}

async fn delete_key(
    _operator: Operator,
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.store.access_keys.delete(&name).await?;
    info!(key = %name, "Deleted access key");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct EventsQuery {
    limit: Option<i64>,
}

async fn list_webhook_events(
    _operator: Operator,
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<Vec<WebhookEventRecord>>, ApiError> {
    let events = state
        .store
        .webhook_events
        .list(query.limit.unwrap_or(50))
        .await?;
    Ok(Json(events))
}
