//! In-process Test adapter — the E2E harness's platform.
//!
//! Streams chunks, records everything sent per conversation, and never
//! touches the network. The gateway exposes its buffers over
//! `GET/DELETE /test/messages/{conversationId}`.

use async_trait::async_trait;
use dashmap::DashMap;

use switchboard_core::types::PlatformType;

use crate::adapter::{PlatformAdapter, StreamingMode};
use crate::error::Result;

#[derive(Default)]
pub struct TestAdapter {
    sent: DashMap<String, Vec<String>>,
}

impl TestAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// All messages emitted for a conversation, in send order.
    pub fn messages(&self, conversation_id: &str) -> Vec<String> {
        self.sent
            .get(conversation_id)
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    pub fn clear(&self, conversation_id: &str) {
        self.sent.remove(conversation_id);
    }
}

#[async_trait]
impl PlatformAdapter for TestAdapter {
    fn platform_type(&self) -> PlatformType {
        PlatformType::Test
    }

    fn streaming_mode(&self) -> StreamingMode {
        StreamingMode::Stream
    }

    async fn send_message(&self, conversation_id: &str, message: &str) -> Result<()> {
        self.sent
            .entry(conversation_id.to_string())
            .or_default()
            .push(message.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_in_order_and_clears() {
        let adapter = TestAdapter::new();
        adapter.send_message("t1", "first").await.unwrap();
        adapter.send_message("t1", "second").await.unwrap();
        adapter.send_message("t2", "other").await.unwrap();

        assert_eq!(adapter.messages("t1"), vec!["first", "second"]);
        assert_eq!(adapter.messages("t2"), vec!["other"]);

        adapter.clear("t1");
        assert!(adapter.messages("t1").is_empty());
        assert_eq!(adapter.messages("t2").len(), 1);
    }

    #[test]
    fn test_adapter_streams() {
        assert_eq!(TestAdapter::new().streaming_mode(), StreamingMode::Stream);
    }
}
