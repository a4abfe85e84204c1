use std::path::Path;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::chunk::ChunkResult;
use crate::error::Result;

/// Common interface for all AI coding assistant backends.
///
/// `send_query` starts one turn and returns a finite, single-pass stream of
/// chunks; [`AssistantChunk::Result`](crate::AssistantChunk::Result) is
/// always last. Session ids are opaque — a Claude session, a Codex thread,
/// an OpenCode session — and each client encapsulates its own resume
/// mechanics (original cwd, CLI flags, turn-complete breaks).
#[async_trait]
pub trait AssistantClient: Send + Sync {
    /// Backend name for logging and error messages.
    fn name(&self) -> &str;

    async fn send_query(
        &self,
        prompt: &str,
        cwd: &Path,
        resume_session_id: Option<&str>,
    ) -> Result<mpsc::Receiver<ChunkResult>>;
}
