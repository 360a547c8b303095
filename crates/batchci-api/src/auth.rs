//! Operator authentication.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use batchci_core::secret::secrets_match;
use tracing::warn;

use crate::AppState;
use crate::error::ApiError;

/// Extractor proving the caller presented the operator bearer token.
#[derive(Debug, Clone, Copy)]
pub struct Operator;

impl FromRequestParts<AppState> for Operator {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected) = &state.operator_token else {
            return Err(ApiError::Unauthorized(
                "operator access is not configured".to_string(),
            ));
        };

        let provided = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or_else(|| ApiError::Unauthorized("missing bearer token".to_string()))?;

        if !secrets_match(expected.expose(), provided) {
            warn!(path = %parts.uri.path(), "Rejected operator token");
            return Err(ApiError::Unauthorized("invalid bearer token".to_string()));
        }
        Ok(Operator)
    }
}
