pub mod db;
pub mod error;
pub mod store;
pub mod types;

pub use error::{Result, StoreError};
pub use store::{ConversationPatch, Store};
pub use types::{
    Codebase, CommandEntry, CommandTemplate, Conversation, EnvWithAge, IsolationEnvironment,
    NewIsolationEnv, Session,
};
