//! Database error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("duplicate: {0}")]
    Duplicate(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

pub type DbResult<T> = std::result::Result<T, DbError>;

impl DbError {
    /// Classify a failed write by the constraint it violated.
    pub(crate) fn from_write(err: sqlx::Error, what: impl Into<String>) -> Self {
        if let Some(db_err) = err.as_database_error() {
            if db_err.is_unique_violation() {
                return DbError::Duplicate(what.into());
            }
            if db_err.is_foreign_key_violation() {
                return DbError::NotFound(format!("parent of {}", what.into()));
            }
            if db_err.is_check_violation() {
                return DbError::InvalidData(what.into());
            }
        }
        DbError::Database(err)
    }
}

impl From<DbError> for batchci_core::Error {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(what) => batchci_core::Error::NotFound(what),
            DbError::Duplicate(what) => batchci_core::Error::Conflict(what),
            DbError::InvalidData(what) => batchci_core::Error::InvalidInput(what),
            other => batchci_core::Error::Storage(other.to_string()),
        }
    }
}
