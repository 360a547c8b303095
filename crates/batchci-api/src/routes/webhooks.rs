//! Inbound webhook at `POST /api/build`.
//!
//! GitHub push deliveries are signed with one of an access key's two
//! values and sync the pushed commits. A request carrying
//! `X-Batch-Event: build-finished` is a remote build notification and goes
//! through the callback gatekeeper instead.

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, header};
use axum::response::{IntoResponse, Response};
use axum::Json;
use batchci_core::source::PushEvent;
use batchci_db::{AccessKeyRecord, BuildRecord};
use batchci_orchestrator::{CallbackKind, CallbackOutcome};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use tracing::{info, warn};

use crate::AppState;
use crate::error::ApiError;
use crate::views::BuildView;

pub const BATCH_EVENT_HEADER: &str = "X-Batch-Event";
pub const BUILD_FINISHED_EVENT: &str = "build-finished";
const GITHUB_SOURCE: &str = "github";
const BATCH_SOURCE: &str = "batch";
const REDACTED: &str = "[redacted]";
const UNPARSABLE: &str = "[unparsable body]";

#[derive(Debug, Deserialize)]
pub struct WebhookQuery {
    /// Name of the access key the delivery is signed with.
    key: Option<String>,
}

pub async fn receive(
    State(state): State<AppState>,
    Query(query): Query<WebhookQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let batch_event = header_str(&headers, BATCH_EVENT_HEADER);
    if batch_event == Some(BUILD_FINISHED_EVENT) {
        return build_finished(&state, &headers, &body).await;
    }
    github_delivery(&state, query, &headers, &body).await
}

#[derive(Debug, Default, Deserialize)]
struct BuildFinished {
    sha: Option<String>,
    secret: Option<String>,
}

impl BuildFinished {
    fn parse(headers: &HeaderMap, body: &[u8]) -> Result<Self, ApiError> {
        let is_json = header_str(headers, header::CONTENT_TYPE.as_str())
            .is_some_and(|ct| ct.starts_with("application/json"));
        if is_json {
            return serde_json::from_slice(body)
                .map_err(|e| ApiError::BadRequest(format!("Invalid JSON: {}", e)));
        }
        let mut notice = Self::default();
        for (name, value) in url::form_urlencoded::parse(body) {
            match name.as_ref() {
                "sha" => notice.sha = Some(value.into_owned()),
                "secret" => notice.secret = Some(value.into_owned()),
                _ => {}
            }
        }
        Ok(notice)
    }

    /// Audit log content. The secret is never stored.
    fn redacted(&self) -> String {
        json!({
            "sha": self.sha,
            "secret": self.secret.as_ref().map(|_| REDACTED),
        })
        .to_string()
    }
}

async fn build_finished(
    state: &AppState,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Response, ApiError> {
    let notice = BuildFinished::parse(headers, body);
    let content = match &notice {
        Ok(notice) => notice.redacted(),
        Err(_) => UNPARSABLE.to_string(),
    };
    let event = state
        .store
        .webhook_events
        .append(BATCH_SOURCE, &content, None)
        .await?;

    let outcome = match notice {
        Ok(notice) => process_build_finished(state, notice).await,
        Err(e) => Err(e),
    };
    let remark = match &outcome {
        Ok(build) => format!("build {} is {}", build.id, build.state),
        Err(e) => format!("rejected: {:?}", e),
    };
    state
        .store
        .webhook_events
        .set_remark(event.id, &remark)
        .await?;

    let build = outcome?;
    Ok(Json(BuildView::from(&build)).into_response())
}

async fn process_build_finished(
    state: &AppState,
    notice: BuildFinished,
) -> Result<BuildRecord, ApiError> {
    let sha = notice
        .sha
        .ok_or_else(|| ApiError::BadRequest("missing sha".to_string()))?;
    info!(sha = %sha, "Received build-finished notification");

    match state
        .gatekeeper
        .authenticate_and_reconcile(&sha, notice.secret.as_deref(), CallbackKind::Build)
        .await?
    {
        CallbackOutcome::Build(build) => Ok(build),
        CallbackOutcome::TestRun(_) => Err(ApiError::Internal(
            "build notification reconciled a test run".to_string(),
        )),
    }
}

async fn github_delivery(
    state: &AppState,
    query: WebhookQuery,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Response, ApiError> {
    let event_type = header_str(headers, "X-GitHub-Event").unwrap_or("unknown");
    let signature = header_str(headers, "X-Hub-Signature-256");

    let event = state
        .store
        .webhook_events
        .append(GITHUB_SOURCE, &String::from_utf8_lossy(body), signature)
        .await?;

    let outcome = process_github_delivery(state, query, event_type, signature, body).await;
    let remark = match &outcome {
        Ok(remark) => remark.clone(),
        Err(e) => format!("rejected: {:?}", e),
    };
    state
        .store
        .webhook_events
        .set_remark(event.id, &remark)
        .await?;

    let remark = outcome?;
    info!(event = %event_type, delivery = event.id, remark = %remark, "Processed GitHub webhook");
    Ok(Json(json!({ "event": event.id, "remark": remark })).into_response())
}

/// Authenticate and act on a GitHub delivery, returning the remark to
/// store with it.
async fn process_github_delivery(
    state: &AppState,
    query: WebhookQuery,
    event_type: &str,
    signature: Option<&str>,
    body: &[u8],
) -> Result<String, ApiError> {
    let key_name = query
        .key
        .ok_or_else(|| ApiError::Forbidden("missing access key name".to_string()))?;
    let key = state
        .store
        .access_keys
        .get(&key_name)
        .await?
        .ok_or_else(|| ApiError::Forbidden(format!("unknown access key {}", key_name)))?;

    if !verify_github_signature(&key, body, signature) {
        warn!(key = %key_name, "Invalid webhook signature");
        return Err(ApiError::Forbidden("invalid signature".to_string()));
    }

    match event_type {
        "ping" => Ok("ping".to_string()),
        "push" => {
            let push: PushEvent = serde_json::from_slice(body)
                .map_err(|e| ApiError::BadRequest(format!("Invalid push payload: {}", e)))?;
            let tracked = format!("refs/heads/{}", state.branch);
            if push.git_ref != tracked {
                return Ok(format!("ignored push to {}", push.git_ref));
            }
            let builds = state.reconciler.sync_push(&push).await?;
            Ok(format!("synced {} commits", builds.len()))
        }
        other => Ok(format!("ignored {} event", other)),
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Verify a `sha256=<hex>` signature against either value of the key.
fn verify_github_signature(key: &AccessKeyRecord, body: &[u8], signature: Option<&str>) -> bool {
    let Some(sig_hex) = signature.and_then(|s| s.strip_prefix("sha256=")) else {
        return false;
    };
    let Ok(sig_bytes) = hex::decode(sig_hex) else {
        return false;
    };

    key.values().iter().fold(false, |valid, secret| {
        let matches = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .map(|mut mac| {
                mac.update(body);
                mac.verify_slice(&sig_bytes).is_ok()
            })
            .unwrap_or(false);
        valid | matches
    })
}
