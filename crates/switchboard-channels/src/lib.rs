pub mod adapter;
pub mod auth;
pub mod error;
pub mod ids;
pub mod split;
pub mod test_adapter;

pub use adapter::{PlatformAdapter, StreamingMode};
pub use auth::AllowList;
pub use error::{ChannelError, Result};
pub use test_adapter::TestAdapter;
