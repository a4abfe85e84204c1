//! Shared JSONL subprocess plumbing for CLI-backed assistants.
//!
//! Each assistant CLI is spawned with piped stdio and emits one JSON event
//! per stdout line. A reader task maps lines to chunks through a
//! client-supplied mapper and forwards them over an mpsc channel; the
//! channel closing is the stream's end. Stderr is buffered for failure
//! classification only.

use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::chunk::{AssistantChunk, ChunkResult};
use crate::error::{AssistantError, Result};

/// Buffered chunks before backpressure pauses the reader.
const CHANNEL_CAPACITY: usize = 64;

/// One assistant CLI invocation.
pub struct JsonlCommand {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    /// Written to the child's stdin, which is then closed.
    pub stdin_payload: Option<String>,
    /// Substrings of stderr/stdout that mean "the resume id is stale".
    pub session_not_found_markers: &'static [&'static str],
}

/// Mutable state threaded through the mapper across lines.
#[derive(Debug, Default)]
pub struct StreamState {
    /// Session id noticed so far; used for the synthesized terminal chunk
    /// when the CLI exits cleanly without emitting an explicit result event.
    pub session_id: Option<String>,
}

/// Spawn the CLI and stream mapped chunks.
///
/// The mapper turns one parsed JSON line into zero or more chunks. Once a
/// `Result` chunk is produced the stream terminates promptly — long-polling
/// backends must not keep the consumer waiting after the turn completes.
pub fn spawn_stream<M>(cmd: JsonlCommand, mut mapper: M) -> Result<mpsc::Receiver<ChunkResult>>
where
    M: FnMut(&serde_json::Value, &mut StreamState) -> Vec<AssistantChunk> + Send + 'static,
{
    let mut child = Command::new(&cmd.program)
        .args(&cmd.args)
        .current_dir(&cmd.cwd)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AssistantError::Spawn {
                    command: cmd.program.clone(),
                    message: format!("'{}' not found on PATH — is it installed?", cmd.program),
                }
            } else {
                AssistantError::Spawn {
                    command: cmd.program.clone(),
                    message: e.to_string(),
                }
            }
        })?;

    let stdin = child.stdin.take();
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let (tx, rx) = mpsc::channel::<ChunkResult>(CHANNEL_CAPACITY);
    let markers = cmd.session_not_found_markers;
    let program = cmd.program.clone();

    tokio::spawn(async move {
        if let Some(mut sink) = stdin {
            if let Some(payload) = cmd.stdin_payload {
                if let Err(e) = sink.write_all(payload.as_bytes()).await {
                    warn!(program = %program, error = %e, "failed writing assistant stdin");
                }
            }
            drop(sink);
        }

        // Drain stderr concurrently so the child never blocks on a full pipe.
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(mut err) = stderr {
                let _ = err.read_to_string(&mut buf).await;
            }
            buf
        });

        let mut state = StreamState::default();
        let mut finished = false;

        if let Some(out) = stdout {
            let mut lines = BufReader::new(out).lines();
            'read: while let Ok(Some(line)) = lines.next_line().await {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let value: serde_json::Value = match serde_json::from_str(trimmed) {
                    Ok(v) => v,
                    Err(_) => {
                        debug!(program = %program, "skipping non-JSON assistant output line");
                        continue;
                    }
                };

                for chunk in mapper(&value, &mut state) {
                    let terminal = chunk.is_terminal();
                    if tx.send(Ok(chunk)).await.is_err() {
                        // Consumer went away; nothing left to deliver.
                        finished = true;
                        break 'read;
                    }
                    if terminal {
                        finished = true;
                        break 'read;
                    }
                }
            }
        }

        let status = child.wait().await;
        let stderr_text = stderr_task.await.unwrap_or_default();

        if finished {
            return;
        }

        match status {
            Ok(s) if s.success() => {
                let _ = tx
                    .send(Ok(AssistantChunk::Result {
                        session_id: state.session_id,
                    }))
                    .await;
            }
            Ok(s) => {
                let lower = stderr_text.to_lowercase();
                let err = if markers.iter().any(|m| lower.contains(&m.to_lowercase())) {
                    AssistantError::SessionNotFound
                } else {
                    AssistantError::ProcessFailed(format!(
                        "{} exited with {}: {}",
                        program,
                        s.code().unwrap_or(-1),
                        stderr_text.trim()
                    ))
                };
                let _ = tx.send(Err(err)).await;
            }
            Err(e) => {
                let _ = tx
                    .send(Err(AssistantError::ProcessFailed(format!(
                        "{program} wait failed: {e}"
                    ))))
                    .await;
            }
        }
    });

    Ok(rx)
}
