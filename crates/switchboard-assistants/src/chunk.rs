use crate::error::AssistantError;

/// Events emitted while an assistant processes one query.
///
/// The sequence is finite and single-pass; `Result` is always the last chunk
/// observed for a query and carries the (possibly new) session id to persist.
#[derive(Debug, Clone, PartialEq)]
pub enum AssistantChunk {
    /// Text addressed to the user.
    Assistant { text: String },

    /// The assistant invoked a tool.
    Tool {
        name: String,
        input: serde_json::Value,
    },

    /// Internal reasoning — callers decide whether to surface or discard.
    Thinking { text: String },

    /// Out-of-band notice (model switched, context compacted, …).
    System { text: String },

    /// Terminal chunk. `session_id` resumes this conversation next query.
    Result { session_id: Option<String> },
}

impl AssistantChunk {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AssistantChunk::Result { .. })
    }

    /// Compact single-line rendering of a tool invocation for relay.
    pub fn format_tool(name: &str, input: &serde_json::Value) -> String {
        let summary = match input {
            serde_json::Value::Object(map) => {
                let parts: Vec<String> = map
                    .iter()
                    .take(3)
                    .map(|(k, v)| format!("{}: {}", k, summarize_value(v)))
                    .collect();
                parts.join(", ")
            }
            other => summarize_value(other),
        };
        format!("`{}({})`", name, summary)
    }
}

fn summarize_value(v: &serde_json::Value) -> String {
    let rendered = match v {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if rendered.chars().count() > 80 {
        let cut: String = rendered.chars().take(77).collect();
        format!("{cut}...")
    } else {
        rendered
    }
}

/// Item type of the stream a client returns: chunks interleaved with errors
/// that abort the query (the mid-stream analogue of a failed `send_query`).
pub type ChunkResult = std::result::Result<AssistantChunk, AssistantError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_formatting_truncates_long_input() {
        let input = serde_json::json!({"command": "x".repeat(200)});
        let line = AssistantChunk::format_tool("bash", &input);
        assert!(line.starts_with("`bash(command: "));
        assert!(line.ends_with("...)`"));
        assert!(line.len() < 120);
    }

    #[test]
    fn result_is_terminal() {
        assert!(AssistantChunk::Result { session_id: None }.is_terminal());
        assert!(!AssistantChunk::Assistant { text: "hi".into() }.is_terminal());
    }
}
