//! Error taxonomy for the project core.

use std::time::Duration;

use thiserror::Error;

use crate::agents::AgentError;

/// Every failure the core surfaces to its caller.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("project not found: {0}")]
    NotFound(String),

    #[error("project already exists: {0}")]
    DuplicateId(String),

    #[error("unsupported action: {0}")]
    UnsupportedAction(String),

    #[error("agent rejected the request: {0}")]
    Agent(#[from] AgentError),

    /// The agent computed a mutation but it was not durably saved.
    /// Callers retry the whole operation, not just the save.
    #[error("mutation was not persisted: {0}")]
    PersistenceFailed(#[source] Box<CoreError>),

    #[error("no connection available after waiting {0:?}")]
    PoolExhausted(Duration),

    #[error("schema unavailable: {0}")]
    SchemaUnavailable(String),

    #[error("database error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(String),

    #[error("store has been closed")]
    Closed,

    #[error("stored data is corrupt: {0}")]
    Corrupt(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    /// Whether repeating the same call may succeed without the caller
    /// changing anything.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::PersistenceFailed(_) | Self::PoolExhausted(_) => true,
            Self::Storage(e) => is_contention(e),
            _ => false,
        }
    }
}

impl From<tokio::task::JoinError> for CoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        CoreError::Pool(format!("blocking task failed: {err}"))
    }
}

/// SQLITE_BUSY / SQLITE_LOCKED: another writer holds the database.
pub(crate) fn is_contention(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error {
                code: rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked,
                ..
            },
            _,
        )
    )
}

/// Primary-key or unique constraint failure.
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error {
                code: rusqlite::ErrorCode::ConstraintViolation,
                extended_code,
            },
            _,
        ) if *extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
            || *extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persistence_failures_are_retryable() {
        let err = CoreError::PersistenceFailed(Box::new(CoreError::Closed));
        assert!(err.is_retryable());
        assert!(CoreError::PoolExhausted(Duration::from_millis(5)).is_retryable());
        assert!(!CoreError::NotFound("p1".into()).is_retryable());
        assert!(!CoreError::UnsupportedAction("fly".into()).is_retryable());
    }
}
