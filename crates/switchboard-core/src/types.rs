use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Chat platform a conversation originates from.
///
/// `Test` is the in-process adapter used by the E2E harness — it behaves like
/// a real platform (streaming mode, message buffers) but never touches the
/// network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformType {
    Github,
    Slack,
    Discord,
    Telegram,
    Test,
}

impl PlatformType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformType::Github => "github",
            PlatformType::Slack => "slack",
            PlatformType::Discord => "discord",
            PlatformType::Telegram => "telegram",
            PlatformType::Test => "test",
        }
    }
}

impl fmt::Display for PlatformType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PlatformType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "github" => Ok(PlatformType::Github),
            "slack" => Ok(PlatformType::Slack),
            "discord" => Ok(PlatformType::Discord),
            "telegram" => Ok(PlatformType::Telegram),
            "test" => Ok(PlatformType::Test),
            other => Err(format!("unknown platform: {}", other)),
        }
    }
}

/// Which AI coding assistant backs a conversation.
///
/// Write-once on a conversation: inherited from the codebase at creation and
/// immutable thereafter, so every session under a conversation shares it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AssistantType {
    #[default]
    Claude,
    Codex,
    Opencode,
}

impl AssistantType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssistantType::Claude => "claude",
            AssistantType::Codex => "codex",
            AssistantType::Opencode => "opencode",
        }
    }
}

impl fmt::Display for AssistantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AssistantType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "claude" => Ok(AssistantType::Claude),
            "codex" => Ok(AssistantType::Codex),
            "opencode" => Ok(AssistantType::Opencode),
            other => Err(format!("unknown assistant type: {}", other)),
        }
    }
}

/// The unit-of-work shape an isolation environment was created for.
///
/// Drives branch naming: `issue-42`, `pr-42`, `pr-42-review`,
/// `thread-{hash8}`, `task-{slug}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowType {
    Issue,
    Pr,
    Review,
    Thread,
    Task,
}

impl WorkflowType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowType::Issue => "issue",
            WorkflowType::Pr => "pr",
            WorkflowType::Review => "review",
            WorkflowType::Thread => "thread",
            WorkflowType::Task => "task",
        }
    }
}

impl fmt::Display for WorkflowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WorkflowType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "issue" => Ok(WorkflowType::Issue),
            "pr" => Ok(WorkflowType::Pr),
            "review" => Ok(WorkflowType::Review),
            "thread" => Ok(WorkflowType::Thread),
            "task" => Ok(WorkflowType::Task),
            other => Err(format!("unknown workflow type: {}", other)),
        }
    }
}

/// Isolation strategy tag. Only `worktree` is implemented; the others are
/// reserved so the column doesn't need a migration when they land.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Worktree,
    Container,
    Vm,
    Remote,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Worktree => "worktree",
            ProviderKind::Container => "container",
            ProviderKind::Vm => "vm",
            ProviderKind::Remote => "remote",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "worktree" => Ok(ProviderKind::Worktree),
            "container" => Ok(ProviderKind::Container),
            "vm" => Ok(ProviderKind::Vm),
            "remote" => Ok(ProviderKind::Remote),
            other => Err(format!("unknown isolation provider: {}", other)),
        }
    }
}

/// Lifecycle state of an isolation environment. `Destroyed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvStatus {
    Active,
    Destroyed,
}

impl EnvStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvStatus::Active => "active",
            EnvStatus::Destroyed => "destroyed",
        }
    }
}

impl fmt::Display for EnvStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EnvStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "active" => Ok(EnvStatus::Active),
            "destroyed" => Ok(EnvStatus::Destroyed),
            other => Err(format!("unknown environment status: {}", other)),
        }
    }
}

/// Mint a fresh opaque row id (UUIDv7 — time-sortable for log correlation).
pub fn new_id() -> String {
    Uuid::now_v7().to_string()
}
