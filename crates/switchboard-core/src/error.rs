use thiserror::Error;

/// User-visible error categories.
///
/// Every component error maps onto one of these via [`Classify`]. The
/// orchestrator renders `user_message()` to the platform; the full error
/// chain goes to logs only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    TransientNetwork,
    AiUnavailable,
    Auth,
    LimitReached,
    DirtyWorktree,
    NotFound,
    Conflict,
    Internal,
}

impl ErrorKind {
    /// Short machine-readable code, logged alongside the user message.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::TransientNetwork => "TRANSIENT_NETWORK",
            ErrorKind::AiUnavailable => "AI_UNAVAILABLE",
            ErrorKind::Auth => "AUTH",
            ErrorKind::LimitReached => "LIMIT_REACHED",
            ErrorKind::DirtyWorktree => "DIRTY_WORKTREE",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Conflict => "CONFLICT",
            ErrorKind::Internal => "INTERNAL",
        }
    }

    /// Short, actionable, platform-neutral text shown to the user.
    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorKind::TransientNetwork => {
                "A network hiccup interrupted that request. Please try again."
            }
            ErrorKind::AiUnavailable => {
                "The AI assistant is unavailable. Check its credentials and installation."
            }
            ErrorKind::Auth => "You are not authorized to do that here.",
            ErrorKind::LimitReached => {
                "A resource limit was reached. Run /status for a breakdown and /worktree cleanup to free space."
            }
            ErrorKind::DirtyWorktree => {
                "That worktree has uncommitted changes. Commit or stash them, or pass --force."
            }
            ErrorKind::NotFound => "Not found. Run /status to see what this conversation is bound to.",
            ErrorKind::Conflict => "That conflicts with existing state. Run /status and retry.",
            ErrorKind::Internal => "Something went wrong on our side. The incident has been logged.",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Mapping from a component error to its user-visible category.
pub trait Classify {
    fn kind(&self) -> ErrorKind;
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Classify for CoreError {
    fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Config(_) => ErrorKind::Internal,
            CoreError::Internal(_) => ErrorKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
