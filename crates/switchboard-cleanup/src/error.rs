use switchboard_core::{Classify, ErrorKind};
use switchboard_isolation::IsolationError;
use switchboard_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CleanupError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Isolation(#[from] IsolationError),

    #[error("Codebase not found: {0}")]
    CodebaseNotFound(String),
}

impl Classify for CleanupError {
    fn kind(&self) -> ErrorKind {
        match self {
            CleanupError::Store(e) => e.kind(),
            CleanupError::Isolation(e) => e.kind(),
            CleanupError::CodebaseNotFound(_) => ErrorKind::NotFound,
        }
    }
}

pub type Result<T> = std::result::Result<T, CleanupError>;
