use switchboard_core::{Classify, ErrorKind};
use switchboard_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IsolationError {
    #[error("Branch {branch} already has an active environment")]
    AlreadyExists { branch: String },

    #[error("Worktree at {path} has uncommitted changes")]
    Dirty { path: String },

    #[error("Environment {env_id} is still referenced by {count} conversation(s)")]
    StillReferenced { env_id: String, count: usize },

    #[error("Environment not found: {0}")]
    NotFound(String),

    #[error("git {args} failed: {message}")]
    Git { args: String, message: String },

    #[error("git {args} timed out after {secs}s")]
    GitTimeout { args: String, secs: u64 },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Classify for IsolationError {
    fn kind(&self) -> ErrorKind {
        match self {
            IsolationError::AlreadyExists { .. } => ErrorKind::Conflict,
            IsolationError::Dirty { .. } => ErrorKind::DirtyWorktree,
            IsolationError::StillReferenced { .. } => ErrorKind::Conflict,
            IsolationError::NotFound(_) => ErrorKind::NotFound,
            IsolationError::Git { .. } => ErrorKind::Internal,
            IsolationError::GitTimeout { .. } => ErrorKind::TransientNetwork,
            IsolationError::Store(e) => e.kind(),
            IsolationError::Io(_) => ErrorKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, IsolationError>;
