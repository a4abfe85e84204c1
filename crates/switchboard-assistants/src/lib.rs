pub mod chunk;
pub mod claude;
pub mod client;
pub mod codex;
pub mod error;
pub mod factory;
pub mod opencode;
pub mod subprocess;

pub use chunk::{AssistantChunk, ChunkResult};
pub use client::AssistantClient;
pub use error::AssistantError;
pub use factory::AssistantFactory;
