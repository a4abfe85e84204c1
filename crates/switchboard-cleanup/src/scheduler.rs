//! Background reaping of merged and stale worktrees.
//!
//! Runs on a fixed interval and on demand from the orchestrator (quota
//! pressure) and the command handler (`/worktree cleanup`). Safety rules are
//! absolute: never destroy with uncommitted changes unless the user forced
//! it, never destroy while any conversation still references the
//! environment, never stale-reap Telegram-created environments.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

use switchboard_core::types::PlatformType;
use switchboard_isolation::git::{default_branch, has_uncommitted_changes, merged_branches};
use switchboard_isolation::{IsolationError, IsolationProvider};
use switchboard_store::{Codebase, ConversationPatch, EnvWithAge, Store};

use crate::error::{CleanupError, Result};
use crate::reaper::{classify_env, CleanupOutcome, EnvClass, WorktreeStatusBreakdown};

pub struct CleanupScheduler {
    store: Arc<Store>,
    provider: Arc<dyn IsolationProvider>,
    stale_threshold_days: i64,
    max_worktrees_per_codebase: u32,
    interval_hours: u64,
}

impl CleanupScheduler {
    pub fn new(
        store: Arc<Store>,
        provider: Arc<dyn IsolationProvider>,
        stale_threshold_days: i64,
        max_worktrees_per_codebase: u32,
        interval_hours: u64,
    ) -> Self {
        Self {
            store,
            provider,
            stale_threshold_days,
            max_worktrees_per_codebase,
            interval_hours,
        }
    }

    /// Periodic loop. Ticks every `interval_hours` until `shutdown` flips.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(interval_hours = self.interval_hours, "cleanup scheduler started");
        let period = Duration::from_secs(self.interval_hours.max(1) * 3600);
        let mut interval = tokio::time::interval(period);
        // The first tick fires immediately; skip it so startup isn't a sweep.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.sweep_all().await {
                        error!(error = %e, "cleanup sweep failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("cleanup scheduler shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One pass over every codebase: merged first, then stale.
    async fn sweep_all(&self) -> Result<()> {
        for codebase in self.store.list_codebases()? {
            let merged = self.cleanup_merged(&codebase).await?;
            let stale = self.cleanup_stale(&codebase).await?;
            if !merged.removed.is_empty() || !stale.removed.is_empty() {
                info!(
                    codebase = %codebase.name,
                    merged = merged.removed.len(),
                    stale = stale.removed.len(),
                    "scheduled cleanup removed worktrees"
                );
            }
        }
        Ok(())
    }

    /// The quota picture for `/status` and the limit-reached message.
    #[instrument(skip(self, codebase), fields(codebase = %codebase.name))]
    pub async fn breakdown(&self, codebase: &Codebase) -> Result<WorktreeStatusBreakdown> {
        let envs = self.store.list_envs_by_codebase_with_age(&codebase.id)?;
        let merged_set = self.merged_branch_set(codebase).await;

        let mut merged = Vec::new();
        let mut stale = Vec::new();
        let mut active = Vec::new();
        for e in &envs {
            match classify_env(e, &merged_set, self.stale_threshold_days) {
                EnvClass::Merged => merged.push(e.env.branch_name.clone()),
                EnvClass::Stale => stale.push((e.env.branch_name.clone(), e.days_since_activity)),
                EnvClass::Active => active.push(e.env.branch_name.clone()),
            }
        }

        Ok(WorktreeStatusBreakdown {
            total: envs.len() as u32,
            limit: self.max_worktrees_per_codebase,
            merged,
            stale,
            active,
        })
    }

    /// Destroy every merged, unprotected environment of the codebase.
    #[instrument(skip(self, codebase), fields(codebase = %codebase.name))]
    pub async fn cleanup_merged(&self, codebase: &Codebase) -> Result<CleanupOutcome> {
        let merged_set = self.merged_branch_set(codebase).await;
        let envs = self.store.list_envs_by_codebase_with_age(&codebase.id)?;
        let merged: Vec<&EnvWithAge> = envs
            .iter()
            .filter(|e| merged_set.contains(&e.env.branch_name))
            .collect();
        self.destroy_unprotected(merged).await
    }

    /// Destroy every stale, unprotected environment. Telegram-created
    /// environments are exempt regardless of age.
    #[instrument(skip(self, codebase), fields(codebase = %codebase.name))]
    pub async fn cleanup_stale(&self, codebase: &Codebase) -> Result<CleanupOutcome> {
        let envs = self.store.list_envs_by_codebase_with_age(&codebase.id)?;
        let stale: Vec<&EnvWithAge> = envs
            .iter()
            .filter(|e| {
                e.days_since_activity >= self.stale_threshold_days
                    && e.env.created_by_platform != PlatformType::Telegram
            })
            .collect();
        self.destroy_unprotected(stale).await
    }

    /// Quota pressure relief: merged worktrees are the only ones safe to
    /// remove without asking.
    pub async fn cleanup_to_make_room(&self, codebase: &Codebase) -> Result<CleanupOutcome> {
        self.cleanup_merged(codebase).await
    }

    /// Platform close event (issue/PR closed, thread archived): drop this
    /// conversation's reference, then destroy the environment if it was the
    /// last one.
    #[instrument(skip(self))]
    pub async fn on_conversation_closed(&self, conversation_id: &str) -> Result<()> {
        let Some(conv) = self.store.get_conversation(conversation_id)? else {
            return Ok(());
        };
        let Some(env_id) = conv.isolation_env_id else {
            return Ok(());
        };

        // Clear the reference first so the count below sees reality.
        self.store.update_conversation(
            conversation_id,
            &ConversationPatch {
                isolation_env_id: Some(None),
                cwd: Some(
                    conv.codebase_id
                        .as_deref()
                        .and_then(|id| self.store.get_codebase(id).ok().flatten())
                        .map(|c| c.default_cwd),
                ),
                ..Default::default()
            },
        )?;

        let remaining = self.store.conversations_using_env(&env_id)?;
        if !remaining.is_empty() {
            info!(env_id, refs = remaining.len(), "environment kept: still referenced");
            return Ok(());
        }

        match self.provider.destroy(&env_id, false).await {
            Ok(()) => Ok(()),
            Err(IsolationError::Dirty { path }) => {
                warn!(env_id, %path, "environment kept after close: uncommitted changes");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn destroy_unprotected(&self, candidates: Vec<&EnvWithAge>) -> Result<CleanupOutcome> {
        let mut outcome = CleanupOutcome::default();

        for candidate in candidates {
            let env = &candidate.env;
            let refs = self.store.conversations_using_env(&env.id)?;
            if !refs.is_empty() {
                outcome
                    .skipped
                    .push((env.branch_name.clone(), "still referenced".to_string()));
                continue;
            }
            let path = Path::new(&env.working_path);
            if path.exists() {
                match has_uncommitted_changes(path).await {
                    Ok(true) => {
                        outcome
                            .skipped
                            .push((env.branch_name.clone(), "uncommitted changes".to_string()));
                        continue;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!(branch = %env.branch_name, error = %e, "dirty check failed, skipping");
                        outcome
                            .skipped
                            .push((env.branch_name.clone(), "dirty check failed".to_string()));
                        continue;
                    }
                }
            }

            match self.provider.destroy(&env.id, false).await {
                Ok(()) => outcome.removed.push(env.branch_name.clone()),
                Err(IsolationError::Dirty { .. }) => outcome
                    .skipped
                    .push((env.branch_name.clone(), "uncommitted changes".to_string())),
                Err(IsolationError::StillReferenced { .. }) => outcome
                    .skipped
                    .push((env.branch_name.clone(), "still referenced".to_string())),
                Err(e) => {
                    warn!(branch = %env.branch_name, error = %e, "destroy failed during cleanup");
                    outcome
                        .skipped
                        .push((env.branch_name.clone(), "destroy failed".to_string()));
                }
            }
        }

        Ok(outcome)
    }

    /// Branches merged into the repo's default branch, per git. Any git
    /// failure degrades to "nothing merged" — cleanup must never guess.
    async fn merged_branch_set(&self, codebase: &Codebase) -> HashSet<String> {
        let canonical = Path::new(&codebase.default_cwd);
        if !canonical.is_dir() {
            return HashSet::new();
        }
        let base = match default_branch(canonical).await {
            Ok(b) => b,
            Err(_) => return HashSet::new(),
        };
        match merged_branches(canonical, &base).await {
            Ok(list) => list.into_iter().filter(|b| *b != base).collect(),
            Err(e) => {
                warn!(codebase = %codebase.name, error = %e, "merged-branch query failed");
                HashSet::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use switchboard_core::types::{AssistantType, ProviderKind, WorkflowType};
    use switchboard_isolation::CreateRequest;
    use switchboard_store::{IsolationEnvironment, NewIsolationEnv};

    /// Provider double that only marks rows destroyed — no git involved.
    struct StoreOnlyProvider {
        store: Arc<Store>,
        destroyed: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl IsolationProvider for StoreOnlyProvider {
        async fn create(
            &self,
            _request: &CreateRequest,
        ) -> switchboard_isolation::Result<IsolationEnvironment> {
            unimplemented!("not used by cleanup tests")
        }

        async fn destroy(&self, env_id: &str, _force: bool) -> switchboard_isolation::Result<()> {
            let users = self.store.conversations_using_env(env_id).unwrap();
            if !users.is_empty() {
                return Err(IsolationError::StillReferenced {
                    env_id: env_id.to_string(),
                    count: users.len(),
                });
            }
            self.store.mark_env_destroyed(env_id).unwrap();
            self.destroyed.lock().unwrap().push(env_id.to_string());
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

        async fn health_check(&self, _env_id: &str) -> switchboard_isolation::Result<bool> {
            Ok(true)
        }
    }

    fn setup() -> (Arc<Store>, Arc<CleanupScheduler>, Codebase) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let codebase = store
            .create_codebase("lib", None, "/nonexistent/lib", AssistantType::Claude)
            .unwrap();
        let provider = Arc::new(StoreOnlyProvider {
            store: Arc::clone(&store),
            destroyed: StdMutex::new(Vec::new()),
        });
        let scheduler = Arc::new(CleanupScheduler::new(
            Arc::clone(&store),
            provider,
            14,
            25,
            6,
        ));
        (store, scheduler, codebase)
    }

    fn insert_env(store: &Store, codebase_id: &str, branch: &str, platform: PlatformType) -> String {
        store
            .create_isolation_env(&NewIsolationEnv {
                codebase_id: codebase_id.to_string(),
                provider: ProviderKind::Worktree,
                working_path: format!("/nonexistent/worktrees/lib/{branch}"),
                branch_name: branch.to_string(),
                workflow_type: WorkflowType::Task,
                identifier: branch.to_string(),
                created_by_platform: platform,
                metadata: serde_json::json!({}),
            })
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn breakdown_counts_fresh_envs_as_active() {
        let (store, scheduler, codebase) = setup();
        insert_env(&store, &codebase.id, "task-a", PlatformType::Test);
        insert_env(&store, &codebase.id, "task-b", PlatformType::Telegram);

        let breakdown = scheduler.breakdown(&codebase).await.unwrap();
        assert_eq!(breakdown.total, 2);
        assert_eq!(breakdown.limit, 25);
        assert_eq!(breakdown.merged_count(), 0);
        assert_eq!(breakdown.stale_count(), 0);
        assert_eq!(breakdown.active_count(), 2);
    }

    #[tokio::test]
    async fn referenced_env_survives_close_of_one_conversation() {
        let (store, scheduler, codebase) = setup();
        let env_id = insert_env(&store, &codebase.id, "pr-9", PlatformType::Github);

        let issue = store
            .get_or_create_conversation(
                PlatformType::Github,
                "acme/lib#8",
                Some(&codebase),
                AssistantType::Claude,
            )
            .unwrap();
        let pr = store
            .get_or_create_conversation(
                PlatformType::Github,
                "acme/lib#9",
                Some(&codebase),
                AssistantType::Claude,
            )
            .unwrap();
        for conv in [&issue, &pr] {
            store
                .update_conversation(
                    &conv.id,
                    &ConversationPatch {
                        isolation_env_id: Some(Some(env_id.clone())),
                        ..Default::default()
                    },
                )
                .unwrap();
        }

        // First close clears one reference but keeps the env.
        scheduler.on_conversation_closed(&issue.id).await.unwrap();
        assert!(store.get_isolation_env(&env_id).unwrap().unwrap().status
            == switchboard_core::types::EnvStatus::Active);

        // Last reference gone: env destroyed.
        scheduler.on_conversation_closed(&pr.id).await.unwrap();
        assert!(store.get_isolation_env(&env_id).unwrap().unwrap().status
            == switchboard_core::types::EnvStatus::Destroyed);
    }

    #[tokio::test]
    async fn stale_cleanup_skips_referenced_envs() {
        let (store, scheduler, codebase) = setup();
        let env_id = insert_env(&store, &codebase.id, "task-old", PlatformType::Github);
        let conv = store
            .get_or_create_conversation(
                PlatformType::Github,
                "acme/lib#1",
                Some(&codebase),
                AssistantType::Claude,
            )
            .unwrap();
        store
            .update_conversation(
                &conv.id,
                &ConversationPatch {
                    isolation_env_id: Some(Some(env_id.clone())),
                    ..Default::default()
                },
            )
            .unwrap();

        // Even with a zero threshold nothing referenced is touched.
        let scheduler_zero = CleanupScheduler::new(
            Arc::clone(&store),
            Arc::new(StoreOnlyProvider {
                store: Arc::clone(&store),
                destroyed: StdMutex::new(Vec::new()),
            }),
            0,
            25,
            6,
        );
        let outcome = scheduler_zero.cleanup_stale(&codebase).await.unwrap();
        assert!(outcome.removed.is_empty());
        assert_eq!(outcome.skipped[0].1, "still referenced");
        let _ = scheduler;
    }

    #[tokio::test]
    async fn telegram_envs_exempt_from_stale() {
        let (store, _scheduler, codebase) = setup();
        insert_env(&store, &codebase.id, "task-tg", PlatformType::Telegram);

        let scheduler_zero = CleanupScheduler::new(
            Arc::clone(&store),
            Arc::new(StoreOnlyProvider {
                store: Arc::clone(&store),
                destroyed: StdMutex::new(Vec::new()),
            }),
            0,
            25,
            6,
        );
        let outcome = scheduler_zero.cleanup_stale(&codebase).await.unwrap();
        assert!(outcome.removed.is_empty());
        assert!(outcome.skipped.is_empty());
    }

    #[tokio::test]
    async fn unreferenced_stale_env_is_removed() {
        let (store, _scheduler, codebase) = setup();
        let env_id = insert_env(&store, &codebase.id, "task-gone", PlatformType::Github);

        let scheduler_zero = CleanupScheduler::new(
            Arc::clone(&store),
            Arc::new(StoreOnlyProvider {
                store: Arc::clone(&store),
                destroyed: StdMutex::new(Vec::new()),
            }),
            0,
            25,
            6,
        );
        let outcome = scheduler_zero.cleanup_stale(&codebase).await.unwrap();
        assert_eq!(outcome.removed, vec!["task-gone".to_string()]);
        assert!(store.get_isolation_env(&env_id).unwrap().unwrap().status
            == switchboard_core::types::EnvStatus::Destroyed);
    }
}
