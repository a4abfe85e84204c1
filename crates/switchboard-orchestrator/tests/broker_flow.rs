//! End-to-end pipeline tests: test adapter in, scripted assistant out.
//!
//! No network, no git, no real CLI — the isolation provider and assistant
//! are in-process doubles, the store is in-memory SQLite. What's real is
//! the broker behavior itself: routing, substitution, session lifecycle,
//! quota enforcement, and the messages users actually see.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use switchboard_assistants::{
    AssistantChunk, AssistantClient, AssistantError, AssistantFactory, ChunkResult,
};
use switchboard_channels::TestAdapter;
use switchboard_cleanup::CleanupScheduler;
use switchboard_core::types::{AssistantType, PlatformType, ProviderKind, WorkflowType};
use switchboard_core::BrokerConfig;
use switchboard_isolation::{CreateRequest, IsolationError, IsolationProvider};
use switchboard_orchestrator::{AutoIsolation, BrokerContext, InboundRequest, Orchestrator};
use switchboard_store::{IsolationEnvironment, NewIsolationEnv, Store};

// ---------------------------------------------------------------------------
// Doubles
// ---------------------------------------------------------------------------

/// Assistant double: acks every prompt, returns a fresh session id per turn,
/// and can be scripted to reject the first resumed call.
struct ScriptedAssistant {
    calls: StdMutex<Vec<(String, Option<String>)>>,
    turns: AtomicUsize,
    reject_first_resume: bool,
    rejected: AtomicUsize,
}

impl ScriptedAssistant {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: StdMutex::new(Vec::new()),
            turns: AtomicUsize::new(0),
            reject_first_resume: false,
            rejected: AtomicUsize::new(0),
        })
    }

    fn rejecting_first_resume() -> Arc<Self> {
        Arc::new(Self {
            calls: StdMutex::new(Vec::new()),
            turns: AtomicUsize::new(0),
            reject_first_resume: true,
            rejected: AtomicUsize::new(0),
        })
    }

    fn prompts(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(p, _)| p.clone()).collect()
    }
}

#[async_trait]
impl AssistantClient for ScriptedAssistant {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn send_query(
        &self,
        prompt: &str,
        _cwd: &Path,
        resume_session_id: Option<&str>,
    ) -> switchboard_assistants::error::Result<mpsc::Receiver<ChunkResult>> {
        self.calls
            .lock()
            .unwrap()
            .push((prompt.to_string(), resume_session_id.map(String::from)));

        let (tx, rx) = mpsc::channel(8);

        if self.reject_first_resume
            && resume_session_id.is_some()
            && self.rejected.fetch_add(1, Ordering::SeqCst) == 0
        {
            tx.send(Err(AssistantError::SessionNotFound)).await.unwrap();
            return Ok(rx);
        }

        let turn = self.turns.fetch_add(1, Ordering::SeqCst);
        tx.send(Ok(AssistantChunk::Assistant {
            text: format!("ack: {}", prompt.lines().next().unwrap_or_default()),
        }))
        .await
        .unwrap();
        tx.send(Ok(AssistantChunk::Result {
            session_id: Some(format!("scripted-{turn}")),
        }))
        .await
        .unwrap();
        Ok(rx)
    }
}

/// Isolation double: real store rows and real directories, no git.
struct DirIsolation {
    store: Arc<Store>,
    base: std::path::PathBuf,
}

#[async_trait]
impl IsolationProvider for DirIsolation {
    async fn create(
        &self,
        request: &CreateRequest,
    ) -> switchboard_isolation::Result<IsolationEnvironment> {
        let branch = switchboard_isolation::naming::branch_name(
            request.workflow_type,
            &request.identifier,
            request.pr_sha.as_deref(),
        );
        if let Some(existing) = self
            .store
            .find_active_env_by_branch(&request.codebase_id, &branch)?
        {
            return Ok(existing);
        }
        let path = self.base.join(&branch);
        std::fs::create_dir_all(&path).unwrap();
        Ok(self.store.create_isolation_env(&NewIsolationEnv {
            codebase_id: request.codebase_id.clone(),
            provider: ProviderKind::Worktree,
            working_path: path.to_string_lossy().to_string(),
            branch_name: branch,
            workflow_type: request.workflow_type,
            identifier: request.identifier.clone(),
            created_by_platform: request.created_by_platform,
            metadata: serde_json::json!({}),
        })?)
    }

    async fn destroy(&self, env_id: &str, _force: bool) -> switchboard_isolation::Result<()> {
        if let Some(env) = self.store.get_isolation_env(env_id)? {
            let users = self.store.conversations_using_env(env_id)?;
            if !users.is_empty() {
                return Err(IsolationError::StillReferenced {
                    env_id: env_id.to_string(),
                    count: users.len(),
                });
            }
            let _ = std::fs::remove_dir_all(&env.working_path);
            self.store.mark_env_destroyed(env_id)?;
        }
        Ok(())
    }

    async fn get(
        &self,
        env_id: &str,
    ) -> switchboard_isolation::Result<Option<IsolationEnvironment>> {
        Ok(self.store.get_isolation_env(env_id)?)
    }

    async fn list(
        &self,
        codebase_id: &str,
    ) -> switchboard_isolation::Result<Vec<IsolationEnvironment>> {
        Ok(self.store.list_envs_by_codebase(codebase_id)?)
    }

    async fn health_check(&self, env_id: &str) -> switchboard_isolation::Result<bool> {
        Ok(self
            .store
            .get_isolation_env(env_id)?
            .map(|e| Path::new(&e.working_path).is_dir())
            .unwrap_or(false))
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    orchestrator: Orchestrator,
    adapter: TestAdapter,
    assistant: Arc<ScriptedAssistant>,
    store: Arc<Store>,
    _workspace: tempfile::TempDir,
}

impl Harness {
    fn new() -> Self {
        Self::with_assistant(ScriptedAssistant::new(), 25)
    }

    fn with_assistant(assistant: Arc<ScriptedAssistant>, max_worktrees: u32) -> Self {
        let workspace = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open_in_memory().unwrap());

        let config = BrokerConfig {
            workspace_path: workspace.path().to_string_lossy().to_string(),
            max_worktrees_per_codebase: max_worktrees,
            ..Default::default()
        };

        let isolation = Arc::new(DirIsolation {
            store: Arc::clone(&store),
            base: workspace.path().join("worktrees"),
        });
        let cleanup = Arc::new(CleanupScheduler::new(
            Arc::clone(&store),
            isolation.clone() as Arc<dyn IsolationProvider>,
            config.stale_threshold_days,
            config.max_worktrees_per_codebase,
            config.cleanup_interval_hours,
        ));

        let mut ctx = BrokerContext::new(
            config,
            Arc::clone(&store),
            isolation as Arc<dyn IsolationProvider>,
            cleanup,
        );
        ctx.assistants = {
            let mut factory = AssistantFactory::new(&ctx.config.assistants);
            factory.override_client(AssistantType::Claude, assistant.clone());
            factory
        };

        Self {
            orchestrator: Orchestrator::new(Arc::new(ctx)),
            adapter: TestAdapter::new(),
            assistant,
            store,
            _workspace: workspace,
        }
    }

    /// Create a repo folder in the workspace and bind `conv` to it via /repo.
    async fn bind_codebase(&self, conv: &str, name: &str) {
        let root = std::path::PathBuf::from(
            &self.orchestrator.context().config.workspace_path,
        )
        .join(name);
        std::fs::create_dir_all(&root).unwrap();
        self.send(conv, &format!("/repo {name}")).await;
    }

    async fn send(&self, conv: &str, text: &str) {
        self.orchestrator
            .handle(&self.adapter, InboundRequest::text_only(conv, text))
            .await;
    }

    fn last_message(&self, conv: &str) -> String {
        self.adapter.messages(conv).last().cloned().unwrap_or_default()
    }

    fn conversation_row(&self, conv: &str) -> switchboard_store::Conversation {
        self.store
            .get_or_create_conversation(PlatformType::Test, conv, None, AssistantType::Claude)
            .unwrap()
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn bind_and_status_report_codebase_and_quota() {
    let h = Harness::new();
    h.bind_codebase("t1", "lib").await;
    assert!(h.last_message("t1").contains("Codebase: lib"));

    let conv = h.conversation_row("t1");
    assert!(conv.codebase_id.is_some());

    h.send("t1", "/status").await;
    let status = h.last_message("t1");
    assert!(status.contains("Codebase: lib"));
    assert!(status.contains("Worktrees: 0/25"));
}

#[tokio::test]
async fn command_set_with_quoted_body_writes_file_and_registers() {
    let h = Harness::new();
    h.bind_codebase("t2", "lib").await;

    h.send("t2", "/command-set plan .claude/plan.md \"Task: $1\"")
        .await;

    let conv = h.conversation_row("t2");
    let codebase = h
        .store
        .get_codebase(conv.codebase_id.as_deref().unwrap())
        .unwrap()
        .unwrap();
    let entry = codebase.commands.get("plan").expect("command registered");
    assert_eq!(entry.path, ".claude/plan.md");
    assert_eq!(entry.description, "Custom: plan");

    let file = Path::new(&codebase.default_cwd).join(".claude/plan.md");
    assert_eq!(std::fs::read_to_string(file).unwrap(), "Task: $1");
}

#[tokio::test]
async fn template_invocation_substitutes_and_persists_session() {
    let h = Harness::new();
    h.bind_codebase("t3", "lib").await;
    h.orchestrator
        .context()
        .templates
        .upsert("plan", Some("plan work"), "Plan the following task: $1")
        .unwrap();

    h.send("t3", "/plan \"Add dark mode\"").await;

    let prompts = h.assistant.prompts();
    assert_eq!(prompts, vec!["Plan the following task: Add dark mode"]);

    // At least one assistant chunk reached the adapter.
    assert!(h.last_message("t3").starts_with("ack:"));

    // The result chunk's session id was persisted on the active session.
    let conv = h.conversation_row("t3");
    let session = h.store.get_active_session(&conv.id).unwrap().unwrap();
    assert_eq!(session.assistant_session_id.as_deref(), Some("scripted-0"));
    assert_eq!(session.last_command(), Some("plan"));
}

#[tokio::test]
async fn router_wraps_free_form_text() {
    let h = Harness::new();
    h.bind_codebase("t4", "lib").await;
    h.orchestrator
        .context()
        .templates
        .upsert(
            "router",
            None,
            "Pick the right workflow and run it silently.\nUser request: $ARGUMENTS",
        )
        .unwrap();

    let raw = "the login form isn't redirecting";
    h.send("t4", raw).await;

    let prompts = h.assistant.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains(raw));
    assert_ne!(prompts[0], raw);
}

#[tokio::test]
async fn free_form_without_router_goes_raw() {
    let h = Harness::new();
    h.bind_codebase("t5", "lib").await;

    h.send("t5", "just do the thing").await;
    assert_eq!(h.assistant.prompts(), vec!["just do the thing"]);
}

#[tokio::test]
async fn no_codebase_rejects_free_form() {
    let h = Harness::new();
    h.send("t6", "hello?").await;
    assert!(h.last_message("t6").contains("No codebase configured"));
    assert!(h.assistant.prompts().is_empty());
}

#[tokio::test]
async fn unknown_command_is_reported() {
    let h = Harness::new();
    h.bind_codebase("t7", "lib").await;
    h.send("t7", "/frobnicate now").await;
    assert_eq!(
        h.last_message("t7"),
        "Unknown command: /frobnicate. Type /help or /templates"
    );
}

#[tokio::test]
async fn worktree_create_preserves_active_session() {
    let h = Harness::new();
    h.bind_codebase("t8", "lib").await;

    // First message establishes session s0.
    h.send("t8", "start here").await;
    let conv = h.conversation_row("t8");
    let s0 = h.store.get_active_session(&conv.id).unwrap().unwrap();

    h.send("t8", "/worktree create feat-a").await;
    assert!(h.last_message("t8").contains("Worktree ready: task-feat-a"));

    // Binding switched, session did not.
    let conv = h.conversation_row("t8");
    assert!(conv.isolation_env_id.is_some());
    let still_active = h.store.get_active_session(&conv.id).unwrap().unwrap();
    assert_eq!(still_active.id, s0.id);
}

#[tokio::test]
async fn worktree_create_then_remove_restores_canonical_cwd() {
    let h = Harness::new();
    h.bind_codebase("t9", "lib").await;
    h.send("t9", "/worktree create feat-b").await;

    let conv = h.conversation_row("t9");
    let isolated_cwd = conv.cwd.clone().unwrap();
    assert!(isolated_cwd.contains("task-feat-b"));

    h.send("t9", "/worktree remove").await;
    let conv = h.conversation_row("t9");
    assert_eq!(conv.isolation_env_id, None);
    let codebase = h
        .store
        .get_codebase(conv.codebase_id.as_deref().unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(conv.cwd.as_deref(), Some(codebase.default_cwd.as_str()));
}

#[tokio::test]
async fn worktree_create_refuses_when_already_isolated() {
    let h = Harness::new();
    h.bind_codebase("t10", "lib").await;
    h.send("t10", "/worktree create feat-c").await;
    h.send("t10", "/worktree create feat-d").await;
    assert!(h
        .last_message("t10")
        .contains("already has a worktree"));
}

#[tokio::test]
async fn plan_execute_transition_rotates_session() {
    let h = Harness::new();
    h.bind_codebase("t11", "lib").await;
    for (name, body) in [("plan", "Plan: $ARGUMENTS"), ("execute", "Execute the plan.")] {
        h.orchestrator
            .context()
            .templates
            .upsert(name, None, body)
            .unwrap();
    }

    h.send("t11", "/plan ship it").await;
    let conv = h.conversation_row("t11");
    let planning = h.store.get_active_session(&conv.id).unwrap().unwrap();
    assert_eq!(planning.last_command(), Some("plan"));

    h.send("t11", "/execute").await;
    let executing = h.store.get_active_session(&conv.id).unwrap().unwrap();
    assert_ne!(planning.id, executing.id);
    assert_eq!(executing.last_command(), Some("execute"));

    // The old session is really gone, not just shadowed.
    assert_eq!(
        h.store.get_active_session(&conv.id).unwrap().unwrap().id,
        executing.id
    );
}

#[tokio::test]
async fn worktree_limit_blocks_auto_isolation_with_breakdown() {
    let h = Harness::with_assistant(ScriptedAssistant::new(), 2);
    h.bind_codebase("t12", "lib").await;
    let conv = h.conversation_row("t12");
    let codebase_id = conv.codebase_id.clone().unwrap();

    // Saturate the quota with envs nothing references.
    for branch in ["task-one", "task-two"] {
        h.store
            .create_isolation_env(&NewIsolationEnv {
                codebase_id: codebase_id.clone(),
                provider: ProviderKind::Worktree,
                working_path: format!("/nonexistent/{branch}"),
                branch_name: branch.to_string(),
                workflow_type: WorkflowType::Task,
                identifier: branch.to_string(),
                created_by_platform: PlatformType::Test,
                metadata: serde_json::json!({}),
            })
            .unwrap();
    }

    let request = InboundRequest {
        auto_isolation: Some(AutoIsolation {
            workflow_type: WorkflowType::Issue,
            identifier: "999".to_string(),
            pr_branch: None,
            pr_sha: None,
        }),
        ..InboundRequest::text_only("t12", "please fix issue 999")
    };
    h.orchestrator.handle(&h.adapter, request).await;

    let message = h.last_message("t12");
    assert!(message.contains("Worktree limit reached"));
    assert!(message.contains("0 merged"));
    assert!(message.contains("0 stale"));

    // No environment was created and the conversation stayed unisolated.
    assert_eq!(h.store.count_active_envs(&codebase_id).unwrap(), 2);
    assert_eq!(h.conversation_row("t12").isolation_env_id, None);
    assert!(h.assistant.prompts().is_empty());
}

#[tokio::test]
async fn auto_isolation_creates_issue_worktree() {
    let h = Harness::new();
    h.bind_codebase("t13", "lib").await;

    let request = InboundRequest {
        auto_isolation: Some(AutoIsolation {
            workflow_type: WorkflowType::Issue,
            identifier: "42".to_string(),
            pr_branch: None,
            pr_sha: None,
        }),
        ..InboundRequest::text_only("t13", "take a look at this issue")
    };
    h.orchestrator.handle(&h.adapter, request).await;

    let conv = h.conversation_row("t13");
    let env_id = conv.isolation_env_id.expect("env bound");
    let env = h.store.get_isolation_env(&env_id).unwrap().unwrap();
    assert_eq!(env.branch_name, "issue-42");
    assert_eq!(conv.cwd.as_deref(), Some(env.working_path.as_str()));

    // Subsequent messages for the same issue reuse the environment.
    let request = InboundRequest {
        auto_isolation: Some(AutoIsolation {
            workflow_type: WorkflowType::Issue,
            identifier: "42".to_string(),
            pr_branch: None,
            pr_sha: None,
        }),
        ..InboundRequest::text_only("t13", "and another thing")
    };
    h.orchestrator.handle(&h.adapter, request).await;
    assert_eq!(
        h.conversation_row("t13").isolation_env_id.as_deref(),
        Some(env_id.as_str())
    );
}

#[tokio::test]
async fn stale_session_retried_once_on_fresh_session() {
    let h = Harness::with_assistant(ScriptedAssistant::rejecting_first_resume(), 25);
    h.bind_codebase("t14", "lib").await;

    // Turn one establishes a session id.
    h.send("t14", "first message").await;
    let conv = h.conversation_row("t14");
    let first = h.store.get_active_session(&conv.id).unwrap().unwrap();
    assert!(first.assistant_session_id.is_some());

    // Turn two resumes, gets rejected, and silently retries fresh.
    h.send("t14", "second message").await;
    let second = h.store.get_active_session(&conv.id).unwrap().unwrap();
    assert_ne!(first.id, second.id);
    assert!(h.last_message("t14").starts_with("ack:"));

    // Three calls total: initial, failed resume, fresh retry.
    assert_eq!(h.assistant.prompts().len(), 3);
}

#[tokio::test]
async fn context_injection_appends_once() {
    let h = Harness::new();
    h.bind_codebase("t15", "lib").await;

    let request = InboundRequest {
        issue_context: Some("Issue #7: button does nothing".to_string()),
        ..InboundRequest::text_only("t15", "please investigate")
    };
    h.orchestrator.handle(&h.adapter, request).await;

    let prompts = h.assistant.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].starts_with("please investigate"));
    assert!(prompts[0].contains("\n\n---\n\nIssue #7"));
}
