use switchboard_core::{Classify, ErrorKind};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("send failed on {platform}: {reason}")]
    Send { platform: String, reason: String },

    #[error("sender not on the {platform} allow-list")]
    Unauthorized { platform: String },

    #[error("thread creation failed: {0}")]
    ThreadCreation(String),
}

impl Classify for ChannelError {
    fn kind(&self) -> ErrorKind {
        match self {
            ChannelError::Send { .. } => ErrorKind::TransientNetwork,
            ChannelError::Unauthorized { .. } => ErrorKind::Auth,
            ChannelError::ThreadCreation(_) => ErrorKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, ChannelError>;
