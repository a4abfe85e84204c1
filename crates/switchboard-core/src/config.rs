use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::types::AssistantType;

pub const DEFAULT_PORT: u16 = 18920;
pub const DEFAULT_BIND: &str = "127.0.0.1";
/// Timeout for read-only git subprocesses (status, branch, worktree list).
pub const GIT_READ_TIMEOUT_SECS: u64 = 10;
/// Timeout for mutating git subprocesses (clone, fetch, worktree add).
pub const GIT_WRITE_TIMEOUT_SECS: u64 = 300;

/// Top-level immutable configuration, built once at startup.
///
/// Sources, in increasing precedence: struct defaults, `switchboard.toml`,
/// `SWITCHBOARD_*` env vars, and the bare well-known env names
/// (`WORKSPACE_PATH`, `MAX_WORKTREES_PER_CODEBASE`, …).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Root directory for `/clone` checkouts.
    #[serde(default = "default_workspace_path")]
    pub workspace_path: String,

    /// Root directory for worktrees. `None` means `<repo>/../worktrees`.
    /// A leading `~` is expanded against `$HOME`.
    #[serde(default)]
    pub worktree_base: Option<String>,

    /// Global cap on concurrently processed conversations.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_conversations: usize,

    /// Per-codebase cap on active isolation environments.
    #[serde(default = "default_max_worktrees")]
    pub max_worktrees_per_codebase: u32,

    /// Days without activity before a worktree counts as stale.
    #[serde(default = "default_stale_days")]
    pub stale_threshold_days: i64,

    /// Hours between background cleanup passes.
    #[serde(default = "default_cleanup_hours")]
    pub cleanup_interval_hours: u64,

    /// Assistant used when a codebase doesn't dictate one.
    #[serde(default)]
    pub default_ai_assistant: AssistantType,

    /// Seed the built-in template set on startup.
    #[serde(default = "bool_true")]
    pub load_builtin_commands: bool,

    /// Directory holding the built-in `*.md` templates.
    #[serde(default = "default_builtin_dir")]
    pub builtin_commands_dir: String,

    /// Comma-separated allow-lists. Empty string = open.
    #[serde(default)]
    pub github_allowed_users: String,
    #[serde(default)]
    pub slack_allowed_users: String,
    #[serde(default)]
    pub discord_allowed_user_ids: String,
    #[serde(default)]
    pub telegram_allowed_user_ids: String,

    /// Shared secret for GitHub webhook HMAC verification. `None` = unsigned.
    #[serde(default)]
    pub github_webhook_secret: Option<String>,

    /// Token for posting issue/PR comments back to GitHub. `None` = replies
    /// are logged but not delivered.
    #[serde(default)]
    pub github_token: Option<String>,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub assistants: AssistantsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

/// Per-assistant CLI commands. An empty/absent command disables the client,
/// which the factory reports as a descriptive error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantsConfig {
    #[serde(default = "default_claude_command")]
    pub claude_command: Option<String>,
    #[serde(default)]
    pub codex_command: Option<String>,
    #[serde(default)]
    pub opencode_command: Option<String>,
}

impl Default for AssistantsConfig {
    fn default() -> Self {
        Self {
            claude_command: default_claude_command(),
            codex_command: None,
            opencode_command: None,
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            workspace_path: default_workspace_path(),
            worktree_base: None,
            max_concurrent_conversations: default_max_concurrent(),
            max_worktrees_per_codebase: default_max_worktrees(),
            stale_threshold_days: default_stale_days(),
            cleanup_interval_hours: default_cleanup_hours(),
            default_ai_assistant: AssistantType::default(),
            load_builtin_commands: true,
            builtin_commands_dir: default_builtin_dir(),
            github_allowed_users: String::new(),
            slack_allowed_users: String::new(),
            discord_allowed_user_ids: String::new(),
            telegram_allowed_user_ids: String::new(),
            github_webhook_secret: None,
            github_token: None,
            database: DatabaseConfig::default(),
            gateway: GatewayConfig::default(),
            assistants: AssistantsConfig::default(),
        }
    }
}

/// Bare env names recognized for compatibility with the deployment docs.
/// Each maps to the lowercased field of the same name.
const WELL_KNOWN_ENV: &[&str] = &[
    "WORKSPACE_PATH",
    "WORKTREE_BASE",
    "MAX_CONCURRENT_CONVERSATIONS",
    "MAX_WORKTREES_PER_CODEBASE",
    "STALE_THRESHOLD_DAYS",
    "CLEANUP_INTERVAL_HOURS",
    "DEFAULT_AI_ASSISTANT",
    "LOAD_BUILTIN_COMMANDS",
    "GITHUB_ALLOWED_USERS",
    "SLACK_ALLOWED_USERS",
    "DISCORD_ALLOWED_USER_IDS",
    "TELEGRAM_ALLOWED_USER_IDS",
    "GITHUB_WEBHOOK_SECRET",
    "GITHUB_TOKEN",
];

impl BrokerConfig {
    /// Load config: explicit path > `SWITCHBOARD_CONFIG` env > `./switchboard.toml`.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .or_else(|| std::env::var("SWITCHBOARD_CONFIG").ok())
            .unwrap_or_else(|| "switchboard.toml".to_string());

        let config: BrokerConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("SWITCHBOARD_").split("__"))
            .merge(Env::raw().only(WELL_KNOWN_ENV))
            .extract()
            .map_err(|e| CoreError::Config(e.to_string()))?;

        Ok(config)
    }

    /// The comma-separated allow-list string for a platform, raw.
    pub fn allow_list_raw(&self, platform: crate::types::PlatformType) -> &str {
        use crate::types::PlatformType;
        match platform {
            PlatformType::Github => &self.github_allowed_users,
            PlatformType::Slack => &self.slack_allowed_users,
            PlatformType::Discord => &self.discord_allowed_user_ids,
            PlatformType::Telegram => &self.telegram_allowed_user_ids,
            PlatformType::Test => "",
        }
    }
}

/// Expand a leading `~` or `~/` against `$HOME`.
pub fn expand_tilde(path: &str) -> String {
    if path == "~" || path.starts_with("~/") {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        if path == "~" {
            home
        } else {
            format!("{}/{}", home, &path[2..])
        }
    } else {
        path.to_string()
    }
}

fn default_workspace_path() -> String {
    "/workspace".to_string()
}
fn default_max_concurrent() -> usize {
    10
}
fn default_max_worktrees() -> u32 {
    25
}
fn default_stale_days() -> i64 {
    14
}
fn default_cleanup_hours() -> u64 {
    6
}
fn default_builtin_dir() -> String {
    "commands".to_string()
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.switchboard/switchboard.db", home)
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_claude_command() -> Option<String> {
    Some("claude".to_string())
}
fn bool_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = BrokerConfig::default();
        assert_eq!(cfg.workspace_path, "/workspace");
        assert_eq!(cfg.max_concurrent_conversations, 10);
        assert_eq!(cfg.max_worktrees_per_codebase, 25);
        assert_eq!(cfg.stale_threshold_days, 14);
        assert_eq!(cfg.cleanup_interval_hours, 6);
        assert!(cfg.load_builtin_commands);
        assert_eq!(cfg.default_ai_assistant, AssistantType::Claude);
    }

    #[test]
    fn tilde_expansion() {
        std::env::set_var("HOME", "/home/sb");
        assert_eq!(expand_tilde("~/trees"), "/home/sb/trees");
        assert_eq!(expand_tilde("~"), "/home/sb");
        assert_eq!(expand_tilde("/abs/path"), "/abs/path");
    }

    #[test]
    fn empty_allow_list_means_open() {
        let cfg = BrokerConfig::default();
        assert!(cfg.allow_list_raw(crate::types::PlatformType::Github).is_empty());
    }
}
