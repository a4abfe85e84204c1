//! OpenCode CLI client (`opencode run --print-logs=false --format json`).
//!
//! OpenCode streams part events; the session id arrives on the first part
//! and resumption uses `--session`.

use std::path::Path;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::chunk::{AssistantChunk, ChunkResult};
use crate::client::AssistantClient;
use crate::error::Result;
use crate::subprocess::{spawn_stream, JsonlCommand, StreamState};

const SESSION_NOT_FOUND_MARKERS: &[&str] = &["session not found", "unknown session"];

pub struct OpencodeClient {
    command: String,
}

impl OpencodeClient {
    pub fn new(command: String) -> Self {
        Self { command }
    }
}

#[async_trait]
impl AssistantClient for OpencodeClient {
    fn name(&self) -> &str {
        "opencode"
    }

    async fn send_query(
        &self,
        prompt: &str,
        cwd: &Path,
        resume_session_id: Option<&str>,
    ) -> Result<mpsc::Receiver<ChunkResult>> {
        let mut args = vec!["run".to_string(), "--format".to_string(), "json".to_string()];
        if let Some(id) = resume_session_id {
            args.push("--session".to_string());
            args.push(id.to_string());
        }
        args.push(prompt.to_string());

        spawn_stream(
            JsonlCommand {
                program: self.command.clone(),
                args,
                cwd: cwd.to_path_buf(),
                stdin_payload: None,
                session_not_found_markers: SESSION_NOT_FOUND_MARKERS,
            },
            map_opencode_event,
        )
    }
}

/// Map one OpenCode part event to chunks.
pub fn map_opencode_event(
    value: &serde_json::Value,
    state: &mut StreamState,
) -> Vec<AssistantChunk> {
    if let Some(sid) = value
        .get("sessionID")
        .or_else(|| value.pointer("/part/sessionID"))
        .and_then(|v| v.as_str())
    {
        state.session_id = Some(sid.to_string());
    }

    let part = value.get("part").unwrap_or(value);
    match part.get("type").and_then(|t| t.as_str()) {
        Some("text") => part
            .get("text")
            .and_then(|t| t.as_str())
            .filter(|t| !t.is_empty())
            .map(|t| vec![AssistantChunk::Assistant { text: t.to_string() }])
            .unwrap_or_default(),
        Some("reasoning") => part
            .get("text")
            .and_then(|t| t.as_str())
            .map(|t| vec![AssistantChunk::Thinking { text: t.to_string() }])
            .unwrap_or_default(),
        Some("tool") => {
            let name = part
                .get("tool")
                .and_then(|n| n.as_str())
                .unwrap_or("tool")
                .to_string();
            let input = part
                .pointer("/state/input")
                .cloned()
                .unwrap_or(serde_json::json!({}));
            vec![AssistantChunk::Tool { name, input }]
        }
        Some("step-finish") => vec![AssistantChunk::Result {
            session_id: state.session_id.clone(),
        }],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_part_then_step_finish() {
        let mut state = StreamState::default();

        let text = serde_json::json!({
            "sessionID": "ses_7",
            "part": {"type": "text", "text": "hello"}
        });
        assert_eq!(
            map_opencode_event(&text, &mut state),
            vec![AssistantChunk::Assistant { text: "hello".into() }]
        );

        let finish = serde_json::json!({"part": {"type": "step-finish"}});
        assert_eq!(
            map_opencode_event(&finish, &mut state),
            vec![AssistantChunk::Result {
                session_id: Some("ses_7".into())
            }]
        );
    }

    #[test]
    fn tool_part_maps_name_and_input() {
        let mut state = StreamState::default();
        let event = serde_json::json!({
            "part": {"type": "tool", "tool": "edit", "state": {"input": {"filePath": "a.rs"}}}
        });
        let chunks = map_opencode_event(&event, &mut state);
        assert!(matches!(&chunks[0], AssistantChunk::Tool { name, .. } if name == "edit"));
    }
}
