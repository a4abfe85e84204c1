use switchboard_core::{Classify, ErrorKind};
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum AssistantError {
    #[error("{assistant} is not configured — set its command in the assistants config")]
    NotConfigured { assistant: String },

    #[error("failed to start {command}: {message}")]
    Spawn { command: String, message: String },

    #[error("assistant session not found")]
    SessionNotFound,

    #[error("assistant process failed: {0}")]
    ProcessFailed(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl AssistantError {
    /// The one failure the orchestrator retries: a stale resume id.
    pub fn is_session_not_found(&self) -> bool {
        matches!(self, AssistantError::SessionNotFound)
    }
}

impl Classify for AssistantError {
    fn kind(&self) -> ErrorKind {
        match self {
            AssistantError::NotConfigured { .. } => ErrorKind::AiUnavailable,
            AssistantError::Spawn { .. } => ErrorKind::AiUnavailable,
            AssistantError::SessionNotFound => ErrorKind::AiUnavailable,
            AssistantError::ProcessFailed(_) => ErrorKind::AiUnavailable,
            AssistantError::Protocol(_) => ErrorKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, AssistantError>;
