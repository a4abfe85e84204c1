use async_trait::async_trait;

use switchboard_core::types::{PlatformType, WorkflowType};
use switchboard_store::IsolationEnvironment;

use crate::error::Result;

/// Everything needed to create (or adopt) one isolated environment.
#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub codebase_id: String,
    /// The canonical (non-worktree) checkout the worktree hangs off.
    pub canonical_repo_path: String,
    pub workflow_type: WorkflowType,
    /// Issue number, PR number, thread id, or task name.
    pub identifier: String,
    /// Head branch of the PR, when known — enables adoption by branch match.
    pub pr_branch: Option<String>,
    /// Exact SHA for reproducible PR reviews.
    pub pr_sha: Option<String>,
    pub description: Option<String>,
    pub created_by_platform: PlatformType,
}

/// Strategy abstraction over per-work-unit filesystem environments.
///
/// Only the worktree strategy ships; container/vm/remote implementations
/// plug in behind the same capability set. `adopt` is optional — providers
/// without an external discovery surface return `None`.
#[async_trait]
pub trait IsolationProvider: Send + Sync {
    /// Create a new environment, or adopt an existing one discovered through
    /// the provider's shared surface (for worktrees: git itself).
    async fn create(&self, request: &CreateRequest) -> Result<IsolationEnvironment>;

    /// Tear an environment down. Idempotent: a missing or already-destroyed
    /// environment is success. Without `force`, uncommitted changes fail
    /// with `Dirty`; a still-referenced environment fails with
    /// `StillReferenced` either way.
    async fn destroy(&self, env_id: &str, force: bool) -> Result<()>;

    async fn get(&self, env_id: &str) -> Result<Option<IsolationEnvironment>>;

    /// Active environments for a codebase, per the store's view.
    async fn list(&self, codebase_id: &str) -> Result<Vec<IsolationEnvironment>>;

    /// True iff the working path exists and carries a `.git` pointer.
    async fn health_check(&self, env_id: &str) -> Result<bool>;

    /// Record an environment for a working path the broker didn't create.
    /// Default: not supported.
    async fn adopt(
        &self,
        _codebase_id: &str,
        _working_path: &str,
    ) -> Result<Option<IsolationEnvironment>> {
        Ok(None)
    }
}
