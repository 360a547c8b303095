//! Operator build actions.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use batchci_orchestrator::{CommitRef, JobPolicy};
use serde::Deserialize;
use tracing::info;

use crate::AppState;
use crate::auth::Operator;
use crate::error::ApiError;
use crate::views::BuildView;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(build_latest))
        .route("/{sha}", post(build_action).delete(delete_build))
}

/// Sync the newest commit and start its build.
async fn build_latest(
    _operator: Operator,
    State(state): State<AppState>,
) -> Result<Json<BuildView>, ApiError> {
    let build = state
        .reconciler
        .sync_build(CommitRef::Latest, JobPolicy::CreateIfMissing)
        .await?;
    info!(sha = %build.id, state = %build.state, "Triggered build of latest commit");
    Ok(Json(BuildView::from(&build)))
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildAction {
    Refresh,
    Rebuild,
    Suppress,
}

#[derive(Debug, Deserialize)]
struct BuildActionRequest {
    action: BuildAction,
}

async fn build_action(
    _operator: Operator,
    State(state): State<AppState>,
    Path(sha): Path<String>,
    Json(req): Json<BuildActionRequest>,
) -> Result<Json<BuildView>, ApiError> {
    if state.store.builds.get(&sha).await?.is_none() {
        return Err(ApiError::NotFound(format!("build {} is not found", sha)));
    }

    let build = match req.action {
        BuildAction::Refresh => {
            state
                .reconciler
                .sync_build(CommitRef::Sha(sha), JobPolicy::Observe)
                .await?
        }
        BuildAction::Rebuild => {
            info!(sha = %sha, "Rebuild requested");
            state
                .reconciler
                .sync_build(CommitRef::Sha(sha), JobPolicy::Rebuild)
                .await?
        }
        BuildAction::Suppress => {
            state.reconciler.suppress_build(&sha).await?;
            state
                .store
                .builds
                .get(&sha)
                .await?
                .ok_or_else(|| ApiError::NotFound(format!("build {} is not found", sha)))?
        }
    };
    Ok(Json(BuildView::from(&build)))
}

async fn delete_build(
    _operator: Operator,
    State(state): State<AppState>,
    Path(sha): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.reconciler.delete_build(&sha).await?;
    Ok(StatusCode::NO_CONTENT)
}
