//! Sender authorization — a comma-separated allow-list per platform.
//!
//! An empty list means open access. Unauthorized senders are dropped
//! silently; only a masked id reaches the logs.

use tracing::warn;

#[derive(Debug, Clone, Default)]
pub struct AllowList {
    entries: Vec<String>,
}

impl AllowList {
    /// Parse from the raw comma-separated config value.
    pub fn parse(raw: &str) -> Self {
        let entries = raw
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        Self { entries }
    }

    pub fn is_open(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check a sender, logging a masked id on rejection.
    pub fn check(&self, platform: &str, sender_id: &str) -> bool {
        if self.is_open() || self.entries.iter().any(|e| e == sender_id) {
            return true;
        }
        warn!(
            platform,
            sender = %mask_id(sender_id),
            "dropping message from unauthorized sender"
        );
        false
    }
}

/// Mask an id for logging: keep two characters on each end.
pub fn mask_id(id: &str) -> String {
    let chars: Vec<char> = id.chars().collect();
    if chars.len() <= 4 {
        return "***".to_string();
    }
    let head: String = chars[..2].iter().collect();
    let tail: String = chars[chars.len() - 2..].iter().collect();
    format!("{head}…{tail}")
}
