//! The dispatch pipeline: parse → route → resolve isolation → resolve
//! session → stream the assistant → persist.
//!
//! `handle` is the adapter-facing entry point. It serializes per
//! conversation through the lock manager, never returns an error to the
//! adapter, and reports failures to the user as one short classified
//! message while the full chain goes to the logs.

use std::path::Path;
use std::sync::Arc;

use tracing::{error, info, instrument, warn};

use switchboard_assistants::{AssistantChunk, AssistantError};
use switchboard_channels::{PlatformAdapter, StreamingMode};
use switchboard_core::types::WorkflowType;
use switchboard_core::Classify;
use switchboard_isolation::{CreateRequest, IsolationError};
use switchboard_store::{Codebase, ConversationPatch, Conversation, Session};
use switchboard_templates::substitute;

use crate::commands::CommandHandler;
use crate::context::BrokerContext;
use crate::error::{OrchestratorError, Result};

const NO_CODEBASE: &str = "No codebase configured. Use /clone first.";
const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

/// Isolation the adapter wants created automatically (GitHub issues/PRs).
#[derive(Debug, Clone)]
pub struct AutoIsolation {
    pub workflow_type: WorkflowType,
    pub identifier: String,
    pub pr_branch: Option<String>,
    pub pr_sha: Option<String>,
}

/// One inbound message, after adapter-side auth and thread promotion.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    /// Platform-native conversation id (`owner/repo#42`, `channel:ts`, …).
    pub conversation_id: String,
    pub text: String,
    /// Issue/PR body and recent comments, appended for GitHub non-slash messages.
    pub issue_context: Option<String>,
    /// Parent-thread history, when the platform has it.
    pub thread_context: Option<String>,
    /// Platform id of the parent conversation for promoted threads.
    pub parent_conversation_id: Option<String>,
    pub auto_isolation: Option<AutoIsolation>,
}

impl InboundRequest {
    pub fn text_only(conversation_id: &str, text: &str) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            text: text.to_string(),
            issue_context: None,
            thread_context: None,
            parent_conversation_id: None,
            auto_isolation: None,
        }
    }
}

/// What step 4–6 of the pipeline decided to send to the assistant.
struct RoutedPrompt {
    prompt: String,
    /// Set on the template, router, and command-invoke paths; drives the
    /// `lastCommand` metadata and the plan→execute transition.
    command_name: Option<String>,
}

pub struct Orchestrator {
    ctx: Arc<BrokerContext>,
    commands: CommandHandler,
}

impl Orchestrator {
    pub fn new(ctx: Arc<BrokerContext>) -> Self {
        let commands = CommandHandler::new(Arc::clone(&ctx));
        Self { ctx, commands }
    }

    pub fn context(&self) -> &Arc<BrokerContext> {
        &self.ctx
    }

    /// Adapter entry point: per-conversation FIFO, global cap, no error
    /// escapes — the adapter's own sent messages are the only observable.
    pub async fn handle(&self, adapter: &dyn PlatformAdapter, request: InboundRequest) {
        let lock_key = format!("{}:{}", adapter.platform_type(), request.conversation_id);
        self.ctx
            .locks
            .run_exclusive(&lock_key, async {
                if let Err(e) = self.handle_inner(adapter, &request).await {
                    let kind = e.kind();
                    error!(
                        conversation_id = %request.conversation_id,
                        code = %kind.code(),
                        error = %e,
                        "message processing failed"
                    );
                    self.send(adapter, &request.conversation_id, kind.user_message())
                        .await;
                }
            })
            .await;
    }

    #[instrument(skip(self, adapter, request), fields(conversation_id = %request.conversation_id))]
    async fn handle_inner(
        &self,
        adapter: &dyn PlatformAdapter,
        request: &InboundRequest,
    ) -> Result<()> {
        let platform = adapter.platform_type();

        // 1. Load or create the conversation and stamp activity.
        let mut conversation = self.ctx.store.get_or_create_conversation(
            platform,
            &request.conversation_id,
            None,
            self.ctx.config.default_ai_assistant,
        )?;
        self.ctx.store.touch_conversation(&conversation.id)?;

        // Promoted threads inherit the parent conversation's codebase.
        if conversation.codebase_id.is_none() {
            if let Some(parent_ext) = &request.parent_conversation_id {
                self.inherit_from_parent(&mut conversation, platform, parent_ext)?;
            }
        }

        // 2–3. Deterministic commands short-circuit the pipeline.
        let parsed = crate::parse::parse_slash_command(&request.text);
        if let Some(cmd) = &parsed {
            if let Some(outcome) = self
                .commands
                .dispatch(&conversation, &cmd.name, &cmd.args)
                .await?
            {
                self.send(adapter, &request.conversation_id, &outcome.message)
                    .await;
                return Ok(());
            }
        }

        // 4–6. Route to a prompt.
        let routed = match self.route(adapter, request, &conversation, parsed.as_ref()).await? {
            Some(r) => r,
            None => return Ok(()), // route already replied
        };

        // 7. Context injection, once per message.
        let mut prompt = routed.prompt;
        for extra in [&request.issue_context, &request.thread_context] {
            if let Some(context) = extra {
                prompt.push_str(CONTEXT_SEPARATOR);
                prompt.push_str(context);
            }
        }

        // 8–9. Resolve isolation, creating it on demand for GitHub work.
        let Some(codebase) = self.codebase_of(&conversation)? else {
            self.send(adapter, &request.conversation_id, NO_CODEBASE).await;
            return Ok(());
        };
        if !self
            .resolve_isolation(adapter, request, &mut conversation, &codebase)
            .await?
        {
            return Ok(()); // limit reached; already reported
        }

        // 10. Resolve the session, honoring the plan→execute transition.
        let cwd = conversation
            .cwd
            .clone()
            .unwrap_or_else(|| codebase.default_cwd.clone());
        let session = self.resolve_session(&conversation, &codebase, routed.command_name.as_deref())?;

        // 11. Stream the assistant and relay chunks.
        let session = self
            .stream_assistant(adapter, request, &conversation, session, &prompt, &cwd)
            .await?;

        // 12. Record the command for the next transition check.
        if let Some(name) = &routed.command_name {
            let mut metadata = session.metadata.clone();
            if !metadata.is_object() {
                metadata = serde_json::json!({});
            }
            metadata["lastCommand"] = serde_json::Value::String(name.clone());
            self.ctx.store.update_session_metadata(&session.id, &metadata)?;
        }

        Ok(())
    }

    /// Steps 4–6: template, command-invoke, router, or raw prompt.
    /// `None` means a reply was already sent and processing stops.
    async fn route(
        &self,
        adapter: &dyn PlatformAdapter,
        request: &InboundRequest,
        conversation: &Conversation,
        parsed: Option<&crate::parse::ParsedCommand>,
    ) -> Result<Option<RoutedPrompt>> {
        if let Some(cmd) = parsed {
            // Legacy per-codebase command invocation.
            if cmd.name == "command-invoke" {
                return self
                    .route_command_invoke(adapter, request, conversation, &cmd.args)
                    .await;
            }

            if let Some(template) = self.ctx.templates.get(&cmd.name)? {
                return Ok(Some(RoutedPrompt {
                    prompt: substitute(&template.content, &cmd.args),
                    command_name: Some(cmd.name.clone()),
                }));
            }

            // Per-codebase commands are invocable directly by name too.
            if let Some(prompt) = self.read_codebase_command(conversation, &cmd.name, &cmd.args)? {
                return Ok(Some(RoutedPrompt {
                    prompt,
                    command_name: Some(cmd.name.clone()),
                }));
            }

            self.send(
                adapter,
                &request.conversation_id,
                &format!("Unknown command: /{}. Type /help or /templates", cmd.name),
            )
            .await;
            return Ok(None);
        }

        // Router flow: free-form text on a bound codebase goes through the
        // user-authored `router` template when one exists.
        if conversation.codebase_id.is_some() {
            if let Some(router) = self.ctx.templates.get("router")? {
                return Ok(Some(RoutedPrompt {
                    prompt: substitute(&router.content, &[request.text.clone()]),
                    command_name: Some("router".to_string()),
                }));
            }
        } else {
            self.send(adapter, &request.conversation_id, NO_CODEBASE).await;
            return Ok(None);
        }

        Ok(Some(RoutedPrompt {
            prompt: request.text.clone(),
            command_name: None,
        }))
    }

    async fn route_command_invoke(
        &self,
        adapter: &dyn PlatformAdapter,
        request: &InboundRequest,
        conversation: &Conversation,
        args: &[String],
    ) -> Result<Option<RoutedPrompt>> {
        let Some(name) = args.first() else {
            self.send(
                adapter,
                &request.conversation_id,
                "Usage: /command-invoke <name> [args…]",
            )
            .await;
            return Ok(None);
        };
        match self.read_codebase_command(conversation, name, &args[1..])? {
            Some(prompt) => Ok(Some(RoutedPrompt {
                prompt,
                command_name: Some(name.clone()),
            })),
            None => {
                self.send(
                    adapter,
                    &request.conversation_id,
                    &format!("Unknown command: /{name}. Type /help or /templates"),
                )
                .await;
                Ok(None)
            }
        }
    }

    /// Read `codebase.commands[name]`'s file relative to the conversation
    /// cwd and substitute the arguments into it.
    fn read_codebase_command(
        &self,
        conversation: &Conversation,
        name: &str,
        args: &[String],
    ) -> Result<Option<String>> {
        let Some(codebase) = self.codebase_of(conversation)? else {
            return Ok(None);
        };
        let Some(entry) = codebase.commands.get(name) else {
            return Ok(None);
        };
        let cwd = conversation
            .cwd
            .clone()
            .unwrap_or_else(|| codebase.default_cwd.clone());
        let file = Path::new(&cwd).join(&entry.path);
        let content = std::fs::read_to_string(&file)?;
        Ok(Some(substitute(&content, args)))
    }

    /// Steps 8–9. Returns false when the worktree quota aborted processing.
    async fn resolve_isolation(
        &self,
        adapter: &dyn PlatformAdapter,
        request: &InboundRequest,
        conversation: &mut Conversation,
        codebase: &Codebase,
    ) -> Result<bool> {
        // Heal a stale binding: an env whose directory vanished is cleared
        // and work continues in the canonical checkout.
        if let Some(env_id) = conversation.isolation_env_id.clone() {
            let env = self.ctx.store.get_isolation_env(&env_id)?;
            let alive = env
                .as_ref()
                .map(|e| Path::new(&e.working_path).is_dir())
                .unwrap_or(false);
            if alive {
                return Ok(true);
            }
            warn!(env_id, conversation_id = %conversation.id, "stale isolation binding cleared");
            self.ctx.store.update_conversation(
                &conversation.id,
                &ConversationPatch {
                    isolation_env_id: Some(None),
                    cwd: Some(Some(codebase.default_cwd.clone())),
                    ..Default::default()
                },
            )?;
            conversation.isolation_env_id = None;
            conversation.cwd = Some(codebase.default_cwd.clone());
        }

        let Some(auto) = &request.auto_isolation else {
            return Ok(true);
        };

        // Quota enforcement with one automatic merged-cleanup attempt.
        if self.ctx.store.count_active_envs(&codebase.id)?
            >= self.ctx.config.max_worktrees_per_codebase
        {
            let outcome = self.ctx.cleanup.cleanup_to_make_room(codebase).await?;
            if outcome.removed.is_empty() {
                let breakdown = self.ctx.cleanup.breakdown(codebase).await?;
                self.send(
                    adapter,
                    &request.conversation_id,
                    &breakdown.render_limit_message(),
                )
                .await;
                return Ok(false);
            }
            self.send(
                adapter,
                &request.conversation_id,
                &format!(
                    "Cleaned up {} merged worktree(s) to make room.",
                    outcome.removed.len()
                ),
            )
            .await;
        }

        let create = CreateRequest {
            codebase_id: codebase.id.clone(),
            canonical_repo_path: codebase.default_cwd.clone(),
            workflow_type: auto.workflow_type,
            identifier: auto.identifier.clone(),
            pr_branch: auto.pr_branch.clone(),
            pr_sha: auto.pr_sha.clone(),
            description: None,
            created_by_platform: adapter.platform_type(),
        };
        let env = match self.ctx.isolation.create(&create).await {
            Ok(env) => env,
            // A distinct environment holds the branch (issue and PR sharing
            // one unit of work): bind to it instead of failing.
            Err(IsolationError::AlreadyExists { branch }) => {
                match self
                    .ctx
                    .store
                    .find_active_env_by_branch(&codebase.id, &branch)?
                {
                    Some(existing) => existing,
                    None => return Err(IsolationError::AlreadyExists { branch }.into()),
                }
            }
            Err(e) => return Err(e.into()),
        };

        self.ctx.store.update_conversation(
            &conversation.id,
            &ConversationPatch {
                isolation_env_id: Some(Some(env.id.clone())),
                cwd: Some(Some(env.working_path.clone())),
                ..Default::default()
            },
        )?;
        conversation.isolation_env_id = Some(env.id.clone());
        conversation.cwd = Some(env.working_path.clone());
        info!(env_id = %env.id, branch = %env.branch_name, "conversation isolated");
        Ok(true)
    }

    /// Step 10: reuse the active session, or rotate it on plan→execute.
    fn resolve_session(
        &self,
        conversation: &Conversation,
        codebase: &Codebase,
        command_name: Option<&str>,
    ) -> Result<Session> {
        let active = self.ctx.store.get_active_session(&conversation.id)?;

        if let Some(session) = active {
            let plan_to_execute =
                command_name == Some("execute") && session.last_command() == Some("plan");
            if !plan_to_execute {
                return Ok(session);
            }
            info!(session_id = %session.id, "plan→execute: rotating session");
            self.ctx.store.deactivate_session(&session.id)?;
        }

        Ok(self.ctx.store.create_session(
            &conversation.id,
            Some(codebase.id.as_str()),
            conversation.ai_assistant_type,
        )?)
    }

    /// Step 11: run one assistant turn, relaying chunks per the adapter's
    /// streaming mode. A stale resume id is retried once on a fresh session.
    async fn stream_assistant(
        &self,
        adapter: &dyn PlatformAdapter,
        request: &InboundRequest,
        conversation: &Conversation,
        mut session: Session,
        prompt: &str,
        cwd: &str,
    ) -> Result<Session> {
        let client = self.ctx.assistants.client_for(conversation.ai_assistant_type)?;
        let mode = adapter.streaming_mode();

        for attempt in 0..2 {
            let resume = session.assistant_session_id.clone();
            let mut rx = client
                .send_query(prompt, Path::new(cwd), resume.as_deref())
                .await?;

            let mut buffer: Vec<String> = Vec::new();
            let mut retry_with_fresh_session = false;

            while let Some(item) = rx.recv().await {
                match item {
                    Ok(AssistantChunk::Assistant { text }) => match mode {
                        StreamingMode::Stream => {
                            self.send(adapter, &request.conversation_id, &text).await
                        }
                        StreamingMode::Batch => buffer.push(text),
                    },
                    Ok(AssistantChunk::Tool { name, input }) => {
                        let line = AssistantChunk::format_tool(&name, &input);
                        match mode {
                            StreamingMode::Stream => {
                                self.send(adapter, &request.conversation_id, &line).await
                            }
                            StreamingMode::Batch => buffer.push(line),
                        }
                    }
                    Ok(AssistantChunk::System { text }) => match mode {
                        StreamingMode::Stream => {
                            self.send(adapter, &request.conversation_id, &text).await
                        }
                        StreamingMode::Batch => buffer.push(text),
                    },
                    Ok(AssistantChunk::Thinking { .. }) => {}
                    Ok(AssistantChunk::Result { session_id }) => {
                        if let Some(sid) = session_id {
                            self.ctx.store.update_session_assistant_id(&session.id, &sid)?;
                            session.assistant_session_id = Some(sid);
                        }
                        break;
                    }
                    Err(e) if e.is_session_not_found() && resume.is_some() && attempt == 0 => {
                        warn!(
                            session_id = %session.id,
                            "assistant session vanished; retrying with a fresh session"
                        );
                        self.ctx.store.deactivate_session(&session.id)?;
                        session = self.ctx.store.create_session(
                            &conversation.id,
                            session.codebase_id.as_deref(),
                            conversation.ai_assistant_type,
                        )?;
                        retry_with_fresh_session = true;
                        break;
                    }
                    Err(e) => return Err(OrchestratorError::Assistant(e)),
                }
            }

            if retry_with_fresh_session {
                continue;
            }

            if mode == StreamingMode::Batch && !buffer.is_empty() {
                self.send(adapter, &request.conversation_id, &buffer.join("\n\n"))
                    .await;
            }
            return Ok(session);
        }

        Err(OrchestratorError::Assistant(AssistantError::SessionNotFound))
    }

    fn codebase_of(&self, conversation: &Conversation) -> Result<Option<Codebase>> {
        match &conversation.codebase_id {
            Some(id) => Ok(self.ctx.store.get_codebase(id)?),
            None => Ok(None),
        }
    }

    fn inherit_from_parent(
        &self,
        conversation: &mut Conversation,
        platform: switchboard_core::types::PlatformType,
        parent_external_id: &str,
    ) -> Result<()> {
        let parent = self.ctx.store.get_or_create_conversation(
            platform,
            parent_external_id,
            None,
            self.ctx.config.default_ai_assistant,
        )?;
        if let Some(codebase_id) = parent.codebase_id {
            self.ctx.store.update_conversation(
                &conversation.id,
                &ConversationPatch {
                    codebase_id: Some(Some(codebase_id.clone())),
                    cwd: Some(parent.cwd.clone()),
                    ..Default::default()
                },
            )?;
            conversation.codebase_id = Some(codebase_id);
            conversation.cwd = parent.cwd;
        }
        Ok(())
    }

    /// Adapter sends are best-effort: failures are logged, never propagated.
    async fn send(&self, adapter: &dyn PlatformAdapter, conversation_id: &str, message: &str) {
        if let Err(e) = adapter.send_message(conversation_id, message).await {
            warn!(conversation_id, error = %e, "adapter send failed");
        }
    }
}
