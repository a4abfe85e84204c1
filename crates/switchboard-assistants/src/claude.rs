//! Claude Code CLI client (`claude -p --output-format stream-json`).
//!
//! Claude Code runs its own tool loop; this client only relays the typed
//! event stream and captures the session id for resumption. Resuming
//! requires invoking from the same working directory the session started
//! in, which the broker guarantees by always passing the conversation cwd.

use std::path::Path;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::chunk::{AssistantChunk, ChunkResult};
use crate::client::AssistantClient;
use crate::error::Result;
use crate::subprocess::{spawn_stream, JsonlCommand, StreamState};

const SESSION_NOT_FOUND_MARKERS: &[&str] =
    &["no conversation found with session id", "session not found"];

pub struct ClaudeClient {
    command: String,
}

impl ClaudeClient {
    pub fn new(command: String) -> Self {
        Self { command }
    }
}

#[async_trait]
impl AssistantClient for ClaudeClient {
    fn name(&self) -> &str {
        "claude"
    }

    async fn send_query(
        &self,
        prompt: &str,
        cwd: &Path,
        resume_session_id: Option<&str>,
    ) -> Result<mpsc::Receiver<ChunkResult>> {
        let mut args = vec![
            "-p".to_string(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--verbose".to_string(),
        ];
        if let Some(id) = resume_session_id {
            args.push("--resume".to_string());
            args.push(id.to_string());
        }

        spawn_stream(
            JsonlCommand {
                program: self.command.clone(),
                args,
                cwd: cwd.to_path_buf(),
                stdin_payload: Some(prompt.to_string()),
                session_not_found_markers: SESSION_NOT_FOUND_MARKERS,
            },
            map_claude_event,
        )
    }
}

/// Map one Claude Code stream-json event to chunks.
pub fn map_claude_event(value: &serde_json::Value, state: &mut StreamState) -> Vec<AssistantChunk> {
    if let Some(sid) = value.get("session_id").and_then(|v| v.as_str()) {
        state.session_id = Some(sid.to_string());
    }

    match value.get("type").and_then(|t| t.as_str()) {
        Some("assistant") => {
            let mut chunks = Vec::new();
            let blocks = value
                .pointer("/message/content")
                .and_then(|c| c.as_array())
                .cloned()
                .unwrap_or_default();
            for block in blocks {
                match block.get("type").and_then(|t| t.as_str()) {
                    Some("text") => {
                        if let Some(text) = block.get("text").and_then(|t| t.as_str()) {
                            if !text.is_empty() {
                                chunks.push(AssistantChunk::Assistant {
                                    text: text.to_string(),
                                });
                            }
                        }
                    }
                    Some("tool_use") => {
                        let name = block
                            .get("name")
                            .and_then(|n| n.as_str())
                            .unwrap_or("tool")
                            .to_string();
                        let input = block.get("input").cloned().unwrap_or(serde_json::json!({}));
                        chunks.push(AssistantChunk::Tool { name, input });
                    }
                    Some("thinking") => {
                        if let Some(text) = block.get("thinking").and_then(|t| t.as_str()) {
                            chunks.push(AssistantChunk::Thinking {
                                text: text.to_string(),
                            });
                        }
                    }
                    _ => {}
                }
            }
            chunks
        }
        Some("system") => {
            // Init events carry no user-relevant text; compaction and other
            // notices do.
            match value.get("subtype").and_then(|s| s.as_str()) {
                Some("init") | None => Vec::new(),
                Some(subtype) => vec![AssistantChunk::System {
                    text: format!("[{subtype}]"),
                }],
            }
        }
        Some("result") => {
            let session_id = value
                .get("session_id")
                .and_then(|v| v.as_str())
                .map(String::from)
                .or_else(|| state.session_id.clone());
            vec![AssistantChunk::Result { session_id }]
        }
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assistant_text_and_tool_blocks() {
        let mut state = StreamState::default();
        let event = serde_json::json!({
            "type": "assistant",
            "session_id": "s-1",
            "message": {"content": [
                {"type": "text", "text": "Working on it."},
                {"type": "tool_use", "name": "Bash", "input": {"command": "ls"}}
            ]}
        });
        let chunks = map_claude_event(&event, &mut state);
        assert_eq!(chunks.len(), 2);
        assert_eq!(
            chunks[0],
            AssistantChunk::Assistant {
                text: "Working on it.".into()
            }
        );
        assert!(matches!(&chunks[1], AssistantChunk::Tool { name, .. } if name == "Bash"));
        assert_eq!(state.session_id.as_deref(), Some("s-1"));
    }

    #[test]
    fn result_carries_session_id() {
        let mut state = StreamState::default();
        let event = serde_json::json!({"type": "result", "session_id": "s-9", "is_error": false});
        let chunks = map_claude_event(&event, &mut state);
        assert_eq!(
            chunks,
            vec![AssistantChunk::Result {
                session_id: Some("s-9".into())
            }]
        );
    }

    #[test]
    fn init_system_event_is_silent() {
        let mut state = StreamState::default();
        let event = serde_json::json!({"type": "system", "subtype": "init", "session_id": "s-2"});
        assert!(map_claude_event(&event, &mut state).is_empty());
        assert_eq!(state.session_id.as_deref(), Some("s-2"));
    }
}
