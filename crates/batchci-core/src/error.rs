//! Error types for batch CI orchestration.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("no compute pool tagged for {0}")]
    PoolNotFound(String),

    #[error("build artifact not found for build {0}")]
    BuildArtifactNotFound(String),

    #[error("task '{task}' is missing from remote job {job}")]
    BuildTaskMissing { job: String, task: String },

    #[error("remote job {0} is not found")]
    RemoteJobMissing(String),

    #[error("missing secret")]
    MissingSecret,

    #[error("invalid secret")]
    SecretMismatch,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("remote service error: {0}")]
    Remote(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error means the addressed thing does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
