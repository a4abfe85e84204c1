//! Deterministic slash commands — resolved by explicit lookup, never by
//! falling through to the AI.
//!
//! Every handler returns a [`CommandOutcome`]; `modified` tells the pipeline
//! to reload the conversation row before anything else reads it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, instrument, warn};

use switchboard_core::types::{AssistantType, WorkflowType};
use switchboard_isolation::git::{list_worktrees, run_git_write};
use switchboard_isolation::naming::is_valid_task_branch;
use switchboard_isolation::{CreateRequest, IsolationError};
use switchboard_store::{Codebase, CommandEntry, ConversationPatch, Conversation};

use crate::context::BrokerContext;
use crate::error::Result;

/// Result of one deterministic command.
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub success: bool,
    pub message: String,
    /// The conversation row changed; callers must reload it.
    pub modified: bool,
}

impl CommandOutcome {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            modified: false,
        }
    }

    fn ok_modified(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            modified: true,
        }
    }

    fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            modified: false,
        }
    }
}

const HELP_TEXT: &str = "**Switchboard Commands**\n\
- `/help` — show this help\n\
- `/status` — codebase, cwd, isolation, and worktree quota\n\
- `/reset` — start a fresh assistant session\n\
- `/getcwd` / `/setcwd <path>` — inspect or move the working directory\n\
- `/clone <url>` — clone a repository and bind this conversation to it\n\
- `/repos` / `/repo <#|name> [pull]` — list and switch codebases\n\
- `/command-set <name> <relpath> [body]` — register a per-codebase command\n\
- `/load-commands <folder>` — bulk-register commands from a folder\n\
- `/commands` — list per-codebase commands\n\
- `/template-add <name> <relpath>` / `/templates` / `/template-delete <name>` — global templates\n\
- `/worktree create <branch> | list | remove [--force] | orphans | cleanup merged|stale`";

const NO_CODEBASE: &str = "No codebase configured. Use /clone first.";

pub struct CommandHandler {
    ctx: Arc<BrokerContext>,
}

impl CommandHandler {
    pub fn new(ctx: Arc<BrokerContext>) -> Self {
        Self { ctx }
    }

    /// Dispatch a parsed command. `Ok(None)` means the name is not in the
    /// deterministic catalog and the pipeline should try templates next.
    #[instrument(skip(self, conversation, args), fields(conversation_id = %conversation.id))]
    pub async fn dispatch(
        &self,
        conversation: &Conversation,
        name: &str,
        args: &[String],
    ) -> Result<Option<CommandOutcome>> {
        let outcome = match name {
            "help" => CommandOutcome::ok(HELP_TEXT),
            "status" => self.status(conversation).await?,
            "reset" => self.reset(conversation)?,
            "getcwd" => self.getcwd(conversation)?,
            "setcwd" => self.setcwd(conversation, args)?,
            "clone" => self.clone_repo(conversation, args).await?,
            "repos" => self.repos(conversation)?,
            "repo" => self.switch_repo(conversation, args).await?,
            "command-set" => self.command_set(conversation, args)?,
            "load-commands" => self.load_commands(conversation, args)?,
            "commands" => self.list_commands(conversation)?,
            "template-add" => self.template_add(conversation, args)?,
            "template-list" | "templates" => self.template_list()?,
            "template-delete" => self.template_delete(args)?,
            "worktree" => self.worktree(conversation, args).await?,
            _ => return Ok(None),
        };
        Ok(Some(outcome))
    }

    // -----------------------------------------------------------------------
    // Conversation & codebase state
    // -----------------------------------------------------------------------

    async fn status(&self, conversation: &Conversation) -> Result<CommandOutcome> {
        let Some(codebase) = self.codebase_of(conversation)? else {
            return Ok(CommandOutcome::ok(
                "No codebase configured. Use /clone <url> to get started.",
            ));
        };

        let mut lines = vec![
            format!("Codebase: {}", codebase.name),
            format!(
                "Cwd: {}",
                conversation.cwd.as_deref().unwrap_or(&codebase.default_cwd)
            ),
            format!("Assistant: {}", conversation.ai_assistant_type),
        ];

        if let Some(env_id) = &conversation.isolation_env_id {
            if let Some(env) = self.ctx.store.get_isolation_env(env_id)? {
                lines.push(format!(
                    "Isolation: {} ({})",
                    short_path(&env.working_path),
                    env.branch_name
                ));
            }
        }

        let breakdown = self.ctx.cleanup.breakdown(&codebase).await?;
        lines.push(breakdown.status_line());

        Ok(CommandOutcome::ok(lines.join("\n")))
    }

    fn reset(&self, conversation: &Conversation) -> Result<CommandOutcome> {
        if self.ctx.store.deactivate_active_session(&conversation.id)? {
            Ok(CommandOutcome::ok(
                "Session reset. The next message starts a fresh assistant context.",
            ))
        } else {
            Ok(CommandOutcome::ok("No active session to reset."))
        }
    }

    fn getcwd(&self, conversation: &Conversation) -> Result<CommandOutcome> {
        match &conversation.cwd {
            Some(cwd) => Ok(CommandOutcome::ok(format!("Cwd: {cwd}"))),
            None => Ok(CommandOutcome::ok(NO_CODEBASE)),
        }
    }

    fn setcwd(&self, conversation: &Conversation, args: &[String]) -> Result<CommandOutcome> {
        let Some(path) = args.first() else {
            return Ok(CommandOutcome::fail("Usage: /setcwd <path>"));
        };
        let workspace = &self.ctx.config.workspace_path;
        let normalized = normalize_path(path);
        if !is_within(&normalized, workspace) {
            return Ok(CommandOutcome::fail(format!(
                "Refusing to leave the workspace root ({workspace})."
            )));
        }
        if !Path::new(&normalized).is_dir() {
            return Ok(CommandOutcome::fail(format!(
                "Not a directory: {normalized}"
            )));
        }

        self.ctx.store.update_conversation(
            &conversation.id,
            &ConversationPatch {
                cwd: Some(Some(normalized.clone())),
                ..Default::default()
            },
        )?;
        Ok(CommandOutcome::ok_modified(format!("Cwd: {normalized}")))
    }

    // -----------------------------------------------------------------------
    // Clone & repository switching
    // -----------------------------------------------------------------------

    async fn clone_repo(&self, conversation: &Conversation, args: &[String]) -> Result<CommandOutcome> {
        let Some(url) = args.first() else {
            return Ok(CommandOutcome::fail("Usage: /clone <repository-url>"));
        };
        let Some(name) = repo_name_from_url(url) else {
            return Ok(CommandOutcome::fail(format!(
                "Could not derive a repository name from {url}"
            )));
        };

        let workspace = PathBuf::from(&self.ctx.config.workspace_path);
        let target = workspace.join(&name);
        let target_str = target.to_string_lossy().to_string();

        let note = if target.is_dir() {
            format!("Reusing existing checkout at {target_str}")
        } else {
            std::fs::create_dir_all(&workspace)?;
            run_git_write(&workspace, &["clone", url, &name]).await?;
            format!("Cloned to {target_str}")
        };

        // Match an existing codebase by URL first, then by checkout path.
        let codebase = match self.ctx.store.find_codebase_by_repository_url(url)? {
            Some(cb) => cb,
            None => match self.ctx.store.find_codebase_by_default_cwd(&target_str)? {
                Some(cb) => cb,
                None => {
                    let assistant =
                        detect_assistant(&target, self.ctx.config.default_ai_assistant);
                    self.ctx
                        .store
                        .create_codebase(&name, Some(url), &target_str, assistant)?
                }
            },
        };

        self.autoload_codebase_commands(&codebase, &target)?;

        self.ctx.store.deactivate_active_session(&conversation.id)?;
        self.ctx.store.update_conversation(
            &conversation.id,
            &ConversationPatch {
                codebase_id: Some(Some(codebase.id.clone())),
                cwd: Some(Some(codebase.default_cwd.clone())),
                isolation_env_id: Some(None),
            },
        )?;

        info!(codebase = %codebase.name, conversation_id = %conversation.id, "conversation bound to codebase");
        Ok(CommandOutcome::ok_modified(format!(
            "Codebase: {}\n{}\nAssistant: {}",
            codebase.name, note, codebase.ai_assistant_type
        )))
    }

    fn repos(&self, conversation: &Conversation) -> Result<CommandOutcome> {
        let folders = workspace_folders(&self.ctx.config.workspace_path);
        if folders.is_empty() {
            return Ok(CommandOutcome::ok(format!(
                "No repositories under {}. Use /clone <url>.",
                self.ctx.config.workspace_path
            )));
        }

        let active_cwd = self
            .codebase_of(conversation)?
            .map(|cb| cb.default_cwd);
        let lines: Vec<String> = folders
            .iter()
            .enumerate()
            .map(|(i, folder)| {
                let path = format!("{}/{}", self.ctx.config.workspace_path, folder);
                let marker = if active_cwd.as_deref() == Some(path.as_str()) {
                    " *"
                } else {
                    ""
                };
                format!("{}. {}{}", i + 1, folder, marker)
            })
            .collect();
        Ok(CommandOutcome::ok(lines.join("\n")))
    }

    async fn switch_repo(&self, conversation: &Conversation, args: &[String]) -> Result<CommandOutcome> {
        let Some(selector) = args.first() else {
            return Ok(CommandOutcome::fail("Usage: /repo <#|name> [pull]"));
        };
        let folders = workspace_folders(&self.ctx.config.workspace_path);
        let Some(folder) = resolve_repo_selector(&folders, selector) else {
            return Ok(CommandOutcome::fail(format!(
                "No repository matches '{selector}'. Run /repos."
            )));
        };

        let target = PathBuf::from(&self.ctx.config.workspace_path).join(&folder);
        let target_str = target.to_string_lossy().to_string();

        let mut pull_note = String::new();
        if args.get(1).map(String::as_str) == Some("pull") {
            match run_git_write(&target, &["pull"]).await {
                Ok(_) => pull_note = "\nPulled latest changes.".to_string(),
                Err(e) => {
                    warn!(repo = %folder, error = %e, "git pull failed on /repo switch");
                    pull_note = "\ngit pull failed; using the checkout as-is.".to_string();
                }
            }
        }

        let codebase = match self.ctx.store.find_codebase_by_default_cwd(&target_str)? {
            Some(cb) => cb,
            None => {
                let assistant = detect_assistant(&target, self.ctx.config.default_ai_assistant);
                self.ctx
                    .store
                    .create_codebase(&folder, None, &target_str, assistant)?
            }
        };
        self.autoload_codebase_commands(&codebase, &target)?;

        self.ctx.store.deactivate_active_session(&conversation.id)?;
        self.ctx.store.update_conversation(
            &conversation.id,
            &ConversationPatch {
                codebase_id: Some(Some(codebase.id.clone())),
                cwd: Some(Some(codebase.default_cwd.clone())),
                isolation_env_id: Some(None),
            },
        )?;

        Ok(CommandOutcome::ok_modified(format!(
            "Codebase: {}\nCwd: {}{}",
            codebase.name, codebase.default_cwd, pull_note
        )))
    }

    // -----------------------------------------------------------------------
    // Per-codebase commands
    // -----------------------------------------------------------------------

    fn command_set(&self, conversation: &Conversation, args: &[String]) -> Result<CommandOutcome> {
        let Some(codebase) = self.codebase_of(conversation)? else {
            return Ok(CommandOutcome::fail(NO_CODEBASE));
        };
        let (Some(name), Some(relpath)) = (args.first(), args.get(1)) else {
            return Ok(CommandOutcome::fail(
                "Usage: /command-set <name> <relpath> [body]",
            ));
        };

        let cwd = conversation
            .cwd
            .clone()
            .unwrap_or_else(|| codebase.default_cwd.clone());

        if let Some(body) = args.get(2) {
            let file = Path::new(&cwd).join(relpath);
            if let Some(parent) = file.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&file, body)?;
        }

        let mut commands = codebase.commands.clone();
        commands.insert(
            name.clone(),
            CommandEntry {
                path: relpath.clone(),
                description: format!("Custom: {name}"),
            },
        );
        self.ctx.store.update_codebase_commands(&codebase.id, &commands)?;

        Ok(CommandOutcome::ok(format!(
            "Command /{name} -> {relpath} registered for {}.",
            codebase.name
        )))
    }

    fn load_commands(&self, conversation: &Conversation, args: &[String]) -> Result<CommandOutcome> {
        let Some(codebase) = self.codebase_of(conversation)? else {
            return Ok(CommandOutcome::fail(NO_CODEBASE));
        };
        let Some(folder) = args.first() else {
            return Ok(CommandOutcome::fail("Usage: /load-commands <folder>"));
        };

        let cwd = conversation
            .cwd
            .clone()
            .unwrap_or_else(|| codebase.default_cwd.clone());
        let loaded = scan_command_folder(Path::new(&cwd), folder);
        if loaded.is_empty() {
            return Ok(CommandOutcome::fail(format!(
                "No *.md commands found under {folder}."
            )));
        }

        let mut commands = codebase.commands.clone();
        let count = loaded.len();
        commands.extend(loaded);
        self.ctx.store.update_codebase_commands(&codebase.id, &commands)?;

        Ok(CommandOutcome::ok(format!(
            "Loaded {count} command(s) from {folder}."
        )))
    }

    fn list_commands(&self, conversation: &Conversation) -> Result<CommandOutcome> {
        let Some(codebase) = self.codebase_of(conversation)? else {
            return Ok(CommandOutcome::fail(NO_CODEBASE));
        };
        if codebase.commands.is_empty() {
            return Ok(CommandOutcome::ok(
                "No per-codebase commands. Use /command-set or /load-commands.",
            ));
        }
        let lines: Vec<String> = codebase
            .commands
            .iter()
            .map(|(name, entry)| format!("/{name} — {} ({})", entry.description, entry.path))
            .collect();
        Ok(CommandOutcome::ok(lines.join("\n")))
    }

    // -----------------------------------------------------------------------
    // Global templates
    // -----------------------------------------------------------------------

    fn template_add(&self, conversation: &Conversation, args: &[String]) -> Result<CommandOutcome> {
        let (Some(name), Some(relpath)) = (args.first(), args.get(1)) else {
            return Ok(CommandOutcome::fail("Usage: /template-add <name> <relpath>"));
        };
        let Some(cwd) = conversation.cwd.as_deref() else {
            return Ok(CommandOutcome::fail(NO_CODEBASE));
        };

        let file = Path::new(cwd).join(relpath);
        let content = match std::fs::read_to_string(&file) {
            Ok(c) => c,
            Err(e) => {
                return Ok(CommandOutcome::fail(format!(
                    "Could not read {}: {e}",
                    file.display()
                )))
            }
        };

        self.ctx.templates.upsert(name, None, &content)?;
        Ok(CommandOutcome::ok(format!("Template '{name}' saved.")))
    }

    fn template_list(&self) -> Result<CommandOutcome> {
        let templates = self.ctx.templates.list()?;
        if templates.is_empty() {
            return Ok(CommandOutcome::ok("No templates registered."));
        }
        let lines: Vec<String> = templates
            .iter()
            .map(|t| match &t.description {
                Some(d) => format!("/{} — {}", t.name, d),
                None => format!("/{}", t.name),
            })
            .collect();
        Ok(CommandOutcome::ok(lines.join("\n")))
    }

    fn template_delete(&self, args: &[String]) -> Result<CommandOutcome> {
        let Some(name) = args.first() else {
            return Ok(CommandOutcome::fail("Usage: /template-delete <name>"));
        };
        if self.ctx.templates.delete(name)? {
            Ok(CommandOutcome::ok(format!("Template '{name}' deleted.")))
        } else {
            Ok(CommandOutcome::fail(format!("No template named '{name}'.")))
        }
    }

    // -----------------------------------------------------------------------
    // Worktrees
    // -----------------------------------------------------------------------

    async fn worktree(&self, conversation: &Conversation, args: &[String]) -> Result<CommandOutcome> {
        match args.first().map(String::as_str) {
            Some("create") => self.worktree_create(conversation, args.get(1)).await,
            Some("list") => self.worktree_list(conversation).await,
            Some("remove") => {
                let force = args.iter().any(|a| a == "--force");
                self.worktree_remove(conversation, force).await
            }
            Some("orphans") => self.worktree_orphans(conversation).await,
            Some("cleanup") => self.worktree_cleanup(conversation, args.get(1)).await,
            _ => Ok(CommandOutcome::fail(
                "Usage: /worktree create <branch> | list | remove [--force] | orphans | cleanup merged|stale",
            )),
        }
    }

    async fn worktree_create(
        &self,
        conversation: &Conversation,
        branch: Option<&String>,
    ) -> Result<CommandOutcome> {
        let Some(codebase) = self.codebase_of(conversation)? else {
            return Ok(CommandOutcome::fail(NO_CODEBASE));
        };
        let Some(branch) = branch else {
            return Ok(CommandOutcome::fail("Usage: /worktree create <branch>"));
        };
        if !is_valid_task_branch(branch) {
            return Ok(CommandOutcome::fail(
                "Branch names may only contain letters, digits, '_' and '-'.",
            ));
        }
        if conversation.isolation_env_id.is_some() {
            return Ok(CommandOutcome::fail(
                "This conversation already has a worktree. Run /worktree remove first.",
            ));
        }

        // Quota check with one automatic merged-cleanup attempt.
        let mut cleanup_note = String::new();
        if self.ctx.store.count_active_envs(&codebase.id)?
            >= self.ctx.config.max_worktrees_per_codebase
        {
            let outcome = self.ctx.cleanup.cleanup_to_make_room(&codebase).await?;
            if outcome.removed.is_empty() {
                let breakdown = self.ctx.cleanup.breakdown(&codebase).await?;
                return Ok(CommandOutcome::fail(breakdown.render_limit_message()));
            }
            cleanup_note = format!(
                "Cleaned up {} merged worktree(s) to make room.\n",
                outcome.removed.len()
            );
        }

        let env = match self
            .ctx
            .isolation
            .create(&CreateRequest {
                codebase_id: codebase.id.clone(),
                canonical_repo_path: codebase.default_cwd.clone(),
                workflow_type: WorkflowType::Task,
                identifier: branch.clone(),
                pr_branch: None,
                pr_sha: None,
                description: None,
                created_by_platform: conversation.platform_type,
            })
            .await
        {
            Ok(env) => env,
            Err(IsolationError::AlreadyExists { branch }) => {
                return Ok(CommandOutcome::fail(format!(
                    "Branch {branch} already has a worktree. Pick another name."
                )));
            }
            Err(e) => return Err(e.into()),
        };

        // Binding only — the active session survives so the assistant keeps
        // its context inside the new directory.
        self.ctx.store.update_conversation(
            &conversation.id,
            &ConversationPatch {
                isolation_env_id: Some(Some(env.id.clone())),
                cwd: Some(Some(env.working_path.clone())),
                ..Default::default()
            },
        )?;

        Ok(CommandOutcome::ok_modified(format!(
            "{}Worktree ready: {} at {}",
            cleanup_note, env.branch_name, env.working_path
        )))
    }

    async fn worktree_list(&self, conversation: &Conversation) -> Result<CommandOutcome> {
        let Some(codebase) = self.codebase_of(conversation)? else {
            return Ok(CommandOutcome::fail(NO_CODEBASE));
        };

        let envs = self.ctx.store.list_envs_by_codebase(&codebase.id)?;
        let on_disk = list_worktrees(Path::new(&codebase.default_cwd))
            .await
            .unwrap_or_default();

        let mut lines = Vec::new();
        for env in &envs {
            let current = conversation.isolation_env_id.as_deref() == Some(env.id.as_str());
            let missing = !on_disk.iter().any(|w| w.path == env.working_path);
            let mut line = format!("{} — {}", env.branch_name, short_path(&env.working_path));
            if current {
                line.push_str(" *");
            }
            if missing {
                line.push_str(" (missing on disk)");
            }
            lines.push(line);
        }
        for w in &on_disk {
            let tracked = envs.iter().any(|e| e.working_path == w.path)
                || w.path == codebase.default_cwd;
            if !tracked {
                lines.push(format!(
                    "{} — {} (untracked)",
                    w.branch.as_deref().unwrap_or("detached"),
                    short_path(&w.path)
                ));
            }
        }

        if lines.is_empty() {
            return Ok(CommandOutcome::ok("No worktrees."));
        }
        Ok(CommandOutcome::ok(lines.join("\n")))
    }

    async fn worktree_remove(&self, conversation: &Conversation, force: bool) -> Result<CommandOutcome> {
        let Some(codebase) = self.codebase_of(conversation)? else {
            return Ok(CommandOutcome::fail(NO_CODEBASE));
        };
        let Some(env_id) = conversation.isolation_env_id.clone() else {
            return Ok(CommandOutcome::fail(
                "No worktree is bound to this conversation.",
            ));
        };

        // Unbind first so the reference count below reflects other
        // conversations only; re-bind if the dirty check refuses.
        let unbind = ConversationPatch {
            isolation_env_id: Some(None),
            cwd: Some(Some(codebase.default_cwd.clone())),
            ..Default::default()
        };
        self.ctx.store.update_conversation(&conversation.id, &unbind)?;

        match self.ctx.isolation.destroy(&env_id, force).await {
            Ok(()) => {
                self.ctx.store.deactivate_active_session(&conversation.id)?;
                Ok(CommandOutcome::ok_modified(format!(
                    "Worktree removed. Back to {}.",
                    codebase.default_cwd
                )))
            }
            Err(IsolationError::Dirty { path }) => {
                // Restore the binding exactly as it was.
                self.ctx.store.update_conversation(
                    &conversation.id,
                    &ConversationPatch {
                        isolation_env_id: Some(conversation.isolation_env_id.clone()),
                        cwd: Some(conversation.cwd.clone()),
                        ..Default::default()
                    },
                )?;
                Ok(CommandOutcome::fail(format!(
                    "Worktree at {path} has uncommitted changes. Commit or stash them, or run /worktree remove --force."
                )))
            }
            Err(IsolationError::StillReferenced { count, .. }) => {
                self.ctx.store.deactivate_active_session(&conversation.id)?;
                Ok(CommandOutcome::ok_modified(format!(
                    "Unbound from this conversation; the worktree stays ({count} other conversation(s) still use it)."
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn worktree_orphans(&self, conversation: &Conversation) -> Result<CommandOutcome> {
        let Some(codebase) = self.codebase_of(conversation)? else {
            return Ok(CommandOutcome::fail(NO_CODEBASE));
        };

        let envs = self.ctx.store.list_envs_by_codebase(&codebase.id)?;
        let on_disk = list_worktrees(Path::new(&codebase.default_cwd))
            .await
            .unwrap_or_default();

        let mut lines = Vec::new();
        for env in &envs {
            if !on_disk.iter().any(|w| w.path == env.working_path) {
                lines.push(format!(
                    "missing from git: {} ({})",
                    env.branch_name,
                    short_path(&env.working_path)
                ));
            }
        }
        for w in &on_disk {
            if w.path == codebase.default_cwd {
                continue;
            }
            if envs.iter().any(|e| e.working_path == w.path) {
                continue;
            }
            match self.ctx.isolation.adopt(&codebase.id, &w.path).await {
                Ok(Some(env)) => lines.push(format!(
                    "adopted from disk: {} ({})",
                    env.branch_name,
                    short_path(&env.working_path)
                )),
                Ok(None) => lines.push(format!("untracked on disk: {}", short_path(&w.path))),
                Err(e) => {
                    warn!(path = %w.path, error = %e, "orphan adoption failed");
                    lines.push(format!("untracked on disk: {}", short_path(&w.path)));
                }
            }
        }

        if lines.is_empty() {
            return Ok(CommandOutcome::ok("Database and git agree — no orphans."));
        }
        Ok(CommandOutcome::ok(lines.join("\n")))
    }

    async fn worktree_cleanup(
        &self,
        conversation: &Conversation,
        mode: Option<&String>,
    ) -> Result<CommandOutcome> {
        let Some(codebase) = self.codebase_of(conversation)? else {
            return Ok(CommandOutcome::fail(NO_CODEBASE));
        };
        let outcome = match mode.map(String::as_str) {
            Some("merged") => self.ctx.cleanup.cleanup_merged(&codebase).await?,
            Some("stale") => self.ctx.cleanup.cleanup_stale(&codebase).await?,
            _ => {
                return Ok(CommandOutcome::fail(
                    "Usage: /worktree cleanup merged|stale",
                ))
            }
        };
        Ok(CommandOutcome::ok(outcome.summary()))
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn codebase_of(&self, conversation: &Conversation) -> Result<Option<Codebase>> {
        match &conversation.codebase_id {
            Some(id) => Ok(self.ctx.store.get_codebase(id)?),
            None => Ok(None),
        }
    }

    /// Pick up a `.claude/commands` or `.agents/commands` folder when the
    /// codebase has no commands registered yet.
    fn autoload_codebase_commands(&self, codebase: &Codebase, root: &Path) -> Result<()> {
        if !codebase.commands.is_empty() {
            return Ok(());
        }
        for folder in [".claude/commands", ".agents/commands"] {
            let loaded = scan_command_folder(root, folder);
            if !loaded.is_empty() {
                info!(codebase = %codebase.name, folder, count = loaded.len(), "auto-loaded commands");
                self.ctx.store.update_codebase_commands(&codebase.id, &loaded)?;
                break;
            }
        }
        Ok(())
    }
}

/// `*.md` files under `root/folder`, keyed by file stem.
fn scan_command_folder(root: &Path, folder: &str) -> BTreeMap<String, CommandEntry> {
    let mut out = BTreeMap::new();
    let dir = root.join(folder);
    let Ok(entries) = std::fs::read_dir(&dir) else {
        return out;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("md") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let Some(file_name) = path.file_name().and_then(|s| s.to_str()) else {
            continue;
        };
        out.insert(
            stem.to_string(),
            CommandEntry {
                path: format!("{folder}/{file_name}"),
                description: stem.to_string(),
            },
        );
    }
    out
}

/// Repository name from a clone URL: last path segment, `.git` stripped.
/// Handles both `https://host/owner/repo.git` and `git@host:owner/repo.git`.
pub fn repo_name_from_url(url: &str) -> Option<String> {
    let tail = url
        .rsplit(['/', ':'])
        .next()?
        .trim_end_matches(".git")
        .trim();
    if tail.is_empty() {
        return None;
    }
    Some(tail.to_string())
}

/// `.codex/` beats `.claude/`; anything else keeps the configured default.
pub fn detect_assistant(repo: &Path, default: AssistantType) -> AssistantType {
    if repo.join(".codex").is_dir() {
        AssistantType::Codex
    } else if repo.join(".claude").is_dir() {
        AssistantType::Claude
    } else {
        default
    }
}

/// Directories directly under the workspace root, name-sorted.
fn workspace_folders(workspace: &str) -> Vec<String> {
    let mut folders: Vec<String> = std::fs::read_dir(workspace)
        .into_iter()
        .flatten()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .filter_map(|e| e.file_name().to_str().map(String::from))
        .filter(|name| !name.starts_with('.'))
        .collect();
    folders.sort();
    folders
}

/// `/repo 2` or `/repo lib` — 1-based index or unambiguous name prefix.
pub fn resolve_repo_selector(folders: &[String], selector: &str) -> Option<String> {
    if let Ok(index) = selector.parse::<usize>() {
        return folders.get(index.checked_sub(1)?).cloned();
    }
    if let Some(exact) = folders.iter().find(|f| f.as_str() == selector) {
        return Some(exact.clone());
    }
    let mut matches = folders.iter().filter(|f| f.starts_with(selector));
    let first = matches.next()?;
    if matches.next().is_some() {
        return None;
    }
    Some(first.clone())
}

/// Last two components of a path — enough to recognize `<repo>/<branch>`.
fn short_path(path: &str) -> String {
    let parts: Vec<&str> = path.rsplit('/').take(2).collect();
    parts.into_iter().rev().collect::<Vec<_>>().join("/")
}

/// Collapse `.` and `..` without touching the filesystem.
fn normalize_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    format!("/{}", parts.join("/"))
}

fn is_within(path: &str, root: &str) -> bool {
    let root = root.trim_end_matches('/');
    path == root || path.starts_with(&format!("{root}/"))
}
