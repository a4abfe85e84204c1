use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use switchboard_core::types::{
    AssistantType, EnvStatus, PlatformType, ProviderKind, WorkflowType,
};

/// A cloned repository the broker can route work into.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Codebase {
    pub id: String,
    pub name: String,
    pub repository_url: Option<String>,
    /// Canonical (non-worktree) checkout directory.
    pub default_cwd: String,
    pub ai_assistant_type: AssistantType,
    /// Per-codebase prompt commands, keyed by command name.
    pub commands: BTreeMap<String, CommandEntry>,
    pub created_at: String,
    pub updated_at: String,
}

/// One per-codebase prompt command: where its markdown body lives and what it does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandEntry {
    pub path: String,
    pub description: String,
}

/// A durable mapping from `(platform, external-id)` to broker state.
///
/// `ai_assistant_type` is write-once: set at creation, never updated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub platform_type: PlatformType,
    pub platform_conversation_id: String,
    pub codebase_id: Option<String>,
    /// Directory requests currently run in; equals the isolation working
    /// path while isolated, the codebase default otherwise.
    pub cwd: Option<String>,
    /// The only isolation reference — reverse lookups go through the store.
    pub isolation_env_id: Option<String>,
    pub ai_assistant_type: AssistantType,
    pub last_activity_at: String,
    pub created_at: String,
    pub updated_at: String,
}

/// An AI-side conversation handle. At most one active per conversation,
/// enforced by a partial unique index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub conversation_id: String,
    pub codebase_id: Option<String>,
    /// Opaque id returned by the assistant SDK, used for resumption.
    pub assistant_session_id: Option<String>,
    pub ai_assistant_type: AssistantType,
    pub active: bool,
    pub metadata: serde_json::Value,
    pub created_at: String,
}

impl Session {
    /// The `lastCommand` metadata key drives the plan→execute transition.
    pub fn last_command(&self) -> Option<&str> {
        self.metadata.get("lastCommand").and_then(|v| v.as_str())
    }
}

/// One isolated unit of work: a working directory + branch + provider tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationEnvironment {
    pub id: String,
    pub codebase_id: String,
    pub provider: ProviderKind,
    pub working_path: String,
    pub branch_name: String,
    pub workflow_type: WorkflowType,
    /// Free string scoped to `(codebase_id, workflow_type)` — issue number,
    /// PR number, thread id, or task name.
    pub identifier: String,
    pub status: EnvStatus,
    pub created_by_platform: PlatformType,
    pub metadata: serde_json::Value,
    pub created_at: String,
}

/// Insert payload for a new isolation environment row.
#[derive(Debug, Clone)]
pub struct NewIsolationEnv {
    pub codebase_id: String,
    pub provider: ProviderKind,
    pub working_path: String,
    pub branch_name: String,
    pub workflow_type: WorkflowType,
    pub identifier: String,
    pub created_by_platform: PlatformType,
    pub metadata: serde_json::Value,
}

/// An active environment annotated with whole days since its last activity.
///
/// Activity is the greater of the env's age and the time since the most
/// recent referencing conversation moved.
#[derive(Debug, Clone)]
pub struct EnvWithAge {
    pub env: IsolationEnvironment,
    pub days_since_activity: i64,
}

/// A named markdown prompt body with `$N` / `$ARGUMENTS` placeholders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandTemplate {
    pub name: String,
    pub description: Option<String>,
    pub content: String,
    pub created_at: String,
    pub updated_at: String,
}
