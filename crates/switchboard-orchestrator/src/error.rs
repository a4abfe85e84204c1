use switchboard_assistants::AssistantError;
use switchboard_channels::ChannelError;
use switchboard_cleanup::CleanupError;
use switchboard_core::{Classify, ErrorKind};
use switchboard_isolation::IsolationError;
use switchboard_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Isolation(#[from] IsolationError),

    #[error(transparent)]
    Assistant(#[from] AssistantError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Cleanup(#[from] CleanupError),

    #[error("no codebase configured")]
    NoCodebase,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Classify for OrchestratorError {
    fn kind(&self) -> ErrorKind {
        match self {
            OrchestratorError::Store(e) => e.kind(),
            OrchestratorError::Isolation(e) => e.kind(),
            OrchestratorError::Assistant(e) => e.kind(),
            OrchestratorError::Channel(e) => e.kind(),
            OrchestratorError::Cleanup(e) => e.kind(),
            OrchestratorError::NoCodebase => ErrorKind::NotFound,
            OrchestratorError::Io(_) => ErrorKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
