pub mod error;
pub mod reaper;
pub mod scheduler;

pub use error::{CleanupError, Result};
pub use reaper::{CleanupOutcome, EnvClass, WorktreeStatusBreakdown};
pub use scheduler::CleanupScheduler;
