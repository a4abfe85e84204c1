//! Codex CLI client (`codex exec --json`).
//!
//! Codex calls the resumable handle a thread; the broker persists it as an
//! opaque session id. Resumption goes through `codex exec resume <thread>`.

use std::path::Path;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::chunk::{AssistantChunk, ChunkResult};
use crate::client::AssistantClient;
use crate::error::Result;
use crate::subprocess::{spawn_stream, JsonlCommand, StreamState};

const SESSION_NOT_FOUND_MARKERS: &[&str] = &["thread not found", "no thread with id"];

pub struct CodexClient {
    command: String,
}

impl CodexClient {
    pub fn new(command: String) -> Self {
        Self { command }
    }
}

#[async_trait]
impl AssistantClient for CodexClient {
    fn name(&self) -> &str {
        "codex"
    }

    async fn send_query(
        &self,
        prompt: &str,
        cwd: &Path,
        resume_session_id: Option<&str>,
    ) -> Result<mpsc::Receiver<ChunkResult>> {
        let mut args = vec!["exec".to_string()];
        if let Some(id) = resume_session_id {
            args.push("resume".to_string());
            args.push(id.to_string());
        }
        args.push("--json".to_string());
        args.push("--skip-git-repo-check".to_string());
        args.push("-".to_string());

        spawn_stream(
            JsonlCommand {
                program: self.command.clone(),
                args,
                cwd: cwd.to_path_buf(),
                stdin_payload: Some(prompt.to_string()),
                session_not_found_markers: SESSION_NOT_FOUND_MARKERS,
            },
            map_codex_event,
        )
    }
}

/// Map one Codex JSONL event to chunks.
pub fn map_codex_event(value: &serde_json::Value, state: &mut StreamState) -> Vec<AssistantChunk> {
    if let Some(tid) = value
        .get("thread_id")
        .or_else(|| value.pointer("/thread/id"))
        .and_then(|v| v.as_str())
    {
        state.session_id = Some(tid.to_string());
    }

    match value.get("type").and_then(|t| t.as_str()) {
        Some("item.completed") => {
            let Some(item) = value.get("item") else {
                return Vec::new();
            };
            match item.get("type").and_then(|t| t.as_str()) {
                Some("agent_message") => item
                    .get("text")
                    .and_then(|t| t.as_str())
                    .filter(|t| !t.is_empty())
                    .map(|t| vec![AssistantChunk::Assistant { text: t.to_string() }])
                    .unwrap_or_default(),
                Some("reasoning") => item
                    .get("text")
                    .and_then(|t| t.as_str())
                    .map(|t| vec![AssistantChunk::Thinking { text: t.to_string() }])
                    .unwrap_or_default(),
                Some("command_execution") => {
                    let command = item
                        .get("command")
                        .and_then(|c| c.as_str())
                        .unwrap_or_default();
                    vec![AssistantChunk::Tool {
                        name: "shell".to_string(),
                        input: serde_json::json!({"command": command}),
                    }]
                }
                Some("file_change") => vec![AssistantChunk::Tool {
                    name: "apply_patch".to_string(),
                    input: item.get("changes").cloned().unwrap_or(serde_json::json!({})),
                }],
                _ => Vec::new(),
            }
        }
        Some("turn.completed") => vec![AssistantChunk::Result {
            session_id: state.session_id.clone(),
        }],
        Some("turn.failed") => {
            let message = value
                .pointer("/error/message")
                .and_then(|m| m.as_str())
                .unwrap_or("turn failed");
            vec![
                AssistantChunk::System {
                    text: message.to_string(),
                },
                AssistantChunk::Result {
                    session_id: state.session_id.clone(),
                },
            ]
        }
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_started_then_message_then_done() {
        let mut state = StreamState::default();

        let started = serde_json::json!({"type": "thread.started", "thread_id": "th_1"});
        assert!(map_codex_event(&started, &mut state).is_empty());
        assert_eq!(state.session_id.as_deref(), Some("th_1"));

        let msg = serde_json::json!({
            "type": "item.completed",
            "item": {"type": "agent_message", "text": "done"}
        });
        assert_eq!(
            map_codex_event(&msg, &mut state),
            vec![AssistantChunk::Assistant { text: "done".into() }]
        );

        let completed = serde_json::json!({"type": "turn.completed", "usage": {}});
        assert_eq!(
            map_codex_event(&completed, &mut state),
            vec![AssistantChunk::Result {
                session_id: Some("th_1".into())
            }]
        );
    }

    #[test]
    fn command_execution_becomes_tool_chunk() {
        let mut state = StreamState::default();
        let event = serde_json::json!({
            "type": "item.completed",
            "item": {"type": "command_execution", "command": "cargo test"}
        });
        let chunks = map_codex_event(&event, &mut state);
        assert!(matches!(&chunks[0], AssistantChunk::Tool { name, .. } if name == "shell"));
    }
}
