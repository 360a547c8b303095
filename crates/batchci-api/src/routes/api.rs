//! Machine-facing endpoints under `/api`.
//!
//! Reads are public. Writes are task callbacks, authenticated by the
//! per-job secret the task was created with, and the inbound webhook.

use axum::extract::rejection::FormRejection;
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use batchci_orchestrator::{CallbackKind, CallbackOutcome};
use serde::Deserialize;

use crate::AppState;
use crate::error::ApiError;
use crate::routes::webhooks;
use crate::views::{BuildSummary, BuildView, Snapshot, TestRunDetail, TestRunSummary, TestRunView};

const DEFAULT_LIMIT: i64 = 50;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/build", post(webhooks::receive))
        .route("/builds", get(list_builds))
        .route("/build/{sha}", get(get_build).put(build_callback))
        .route("/tests", get(list_test_runs))
        .route("/test/{job_id}", get(get_test_run).put(test_run_callback))
}

#[derive(Debug, Deserialize)]
struct CallbackForm {
    secret: Option<String>,
}

/// Secret from a form body. An absent or unreadable body carries none.
fn callback_secret(form: Result<Form<CallbackForm>, FormRejection>) -> Option<String> {
    form.ok().and_then(|Form(form)| form.secret)
}

async fn build_callback(
    State(state): State<AppState>,
    Path(sha): Path<String>,
    form: Result<Form<CallbackForm>, FormRejection>,
) -> Result<Json<BuildView>, ApiError> {
    let secret = callback_secret(form);
    match state
        .gatekeeper
        .authenticate_and_reconcile(&sha, secret.as_deref(), CallbackKind::Build)
        .await?
    {
        CallbackOutcome::Build(build) => Ok(Json(BuildView::from(&build))),
        CallbackOutcome::TestRun(_) => Err(ApiError::Internal(
            "build callback reconciled a test run".to_string(),
        )),
    }
}

async fn test_run_callback(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    form: Result<Form<CallbackForm>, FormRejection>,
) -> Result<Json<TestRunView>, ApiError> {
    let secret = callback_secret(form);
    match state
        .gatekeeper
        .authenticate_and_reconcile(&job_id, secret.as_deref(), CallbackKind::TestRun)
        .await?
    {
        CallbackOutcome::TestRun(run) => Ok(Json(TestRunView::from(&run))),
        CallbackOutcome::Build(_) => Err(ApiError::Internal(
            "test run callback reconciled a build".to_string(),
        )),
    }
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    limit: Option<i64>,
    #[serde(default)]
    include_suppressed: bool,
}

async fn list_builds(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<BuildSummary>>, ApiError> {
    let builds = state
        .store
        .builds
        .list(query.include_suppressed, query.limit.unwrap_or(DEFAULT_LIMIT))
        .await?;
    Ok(Json(builds.iter().map(BuildSummary::from).collect()))
}

async fn get_build(
    State(state): State<AppState>,
    Path(sha): Path<String>,
) -> Result<Json<Snapshot>, ApiError> {
    let build = state
        .store
        .builds
        .get(&sha)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("build {} is not found", sha)))?;

    let live_run = state.store.test_runs.latest_live_for_build(&sha).await?;
    let cases = match &live_run {
        Some(run) => state.store.test_runs.list_cases(&run.id).await?,
        None => Vec::new(),
    };
    Ok(Json(Snapshot::new(&build, live_run.as_ref(), cases)))
}

async fn list_test_runs(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<TestRunSummary>>, ApiError> {
    let runs = state
        .store
        .test_runs
        .list(query.limit.unwrap_or(DEFAULT_LIMIT))
        .await?;
    Ok(Json(runs.iter().map(TestRunSummary::from).collect()))
}

async fn get_test_run(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<TestRunDetail>, ApiError> {
    let run = state
        .store
        .test_runs
        .get(&job_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("test run {} is not found", job_id)))?;
    let cases = state.store.test_runs.list_cases(&job_id).await?;
    Ok(Json(TestRunDetail {
        summary: TestRunSummary::from(&run),
        cases: cases.into_iter().map(Into::into).collect(),
    }))
}
