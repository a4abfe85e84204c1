pub mod commands;
pub mod context;
pub mod error;
pub mod parse;
pub mod pipeline;

pub use context::BrokerContext;
pub use error::{OrchestratorError, Result};
pub use pipeline::{AutoIsolation, InboundRequest, Orchestrator};
