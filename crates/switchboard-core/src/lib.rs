pub mod config;
pub mod error;
pub mod types;

pub use config::BrokerConfig;
pub use error::{Classify, CoreError, ErrorKind};
