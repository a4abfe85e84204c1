use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use switchboard_core::types::PlatformType;

use crate::error::Result;

/// How the orchestrator relays assistant chunks on this platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamingMode {
    /// Relay each assistant/tool chunk as it arrives.
    Stream,
    /// Buffer and send one consolidated message when the turn ends.
    Batch,
}

/// Minimal contract every chat integration satisfies.
///
/// Implementations must be `Send + Sync` so the orchestrator can drive them
/// from any task. Authorization is enforced *inside* the adapter: the
/// inbound path silently drops unauthorized senders after logging a masked
/// id, so nothing past the adapter ever sees them.
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    fn platform_type(&self) -> PlatformType;

    /// GitHub and Slack batch by default; Discord, Telegram, and the test
    /// adapter stream.
    fn streaming_mode(&self) -> StreamingMode {
        match self.platform_type() {
            PlatformType::Github | PlatformType::Slack => StreamingMode::Batch,
            PlatformType::Discord | PlatformType::Telegram | PlatformType::Test => {
                StreamingMode::Stream
            }
        }
    }

    /// Deliver one message, splitting to the platform's length limit.
    /// Failures are logged by the caller and never abort the pipeline.
    async fn send_message(&self, conversation_id: &str, message: &str) -> Result<()>;

    /// Force-thread policy hook. Thread-capable adapters (Discord) create a
    /// thread from the triggering message on the first bot response and
    /// return its id; everything else returns the id unchanged. On creation
    /// failure the adapter falls back silently to the original channel, and
    /// concurrent calls for one triggering message de-duplicate to a single
    /// creation.
    async fn ensure_thread(&self, conversation_id: &str, _context: Option<&str>) -> Result<String> {
        Ok(conversation_id.to_string())
    }
}

/// Practical per-platform message length limits.
pub fn message_limit(platform: PlatformType) -> usize {
    match platform {
        PlatformType::Discord => 2000,
        PlatformType::Slack => 4000,
        PlatformType::Telegram => 4096,
        PlatformType::Github => 65_000,
        PlatformType::Test => 65_000,
    }
}
