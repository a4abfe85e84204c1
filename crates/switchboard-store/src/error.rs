use switchboard_core::{Classify, ErrorKind};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("{what} not found: {id}")]
    NotFound { what: &'static str, id: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// SQLITE_BUSY / SQLITE_LOCKED are the transient cases worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Database(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

impl Classify for StoreError {
    fn kind(&self) -> ErrorKind {
        match self {
            StoreError::NotFound { .. } => ErrorKind::NotFound,
            StoreError::Conflict(_) => ErrorKind::Conflict,
            e if e.is_transient() => ErrorKind::TransientNetwork,
            _ => ErrorKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
