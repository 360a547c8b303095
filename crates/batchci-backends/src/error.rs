//! Backend client errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("invalid credentials: {0}")]
    Credentials(String),
}

impl BackendError {
    /// Read a failed response into an `Api` error.
    pub(crate) async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status().as_u16();
        let message = response.text().await.unwrap_or_default();
        BackendError::Api { status, message }
    }
}

impl From<BackendError> for batchci_core::Error {
    fn from(err: BackendError) -> Self {
        batchci_core::Error::Remote(err.to_string())
    }
}
