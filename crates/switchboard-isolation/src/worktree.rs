//! Git-worktree isolation — create, adopt, reuse, destroy.
//!
//! The discovery surface is git itself: before creating anything we consult
//! `git worktree list --porcelain`, so worktrees made by other tooling
//! (skills, humans) are adopted rather than duplicated, and branch-level
//! exclusivity is ultimately enforced by git.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use switchboard_store::{IsolationEnvironment, NewIsolationEnv, Store, StoreError};

use crate::error::{IsolationError, Result};
use crate::git::{
    classify_git_failure, has_uncommitted_changes, is_not_a_working_tree, list_worktrees,
    register_safe_directory, run_git_write,
};
use crate::naming::{branch_name, workflow_from_branch, worktree_path};
use crate::provider::{CreateRequest, IsolationProvider};

pub struct WorktreeProvider {
    store: Arc<Store>,
    worktree_base: Option<String>,
}

impl WorktreeProvider {
    pub fn new(store: Arc<Store>, worktree_base: Option<String>) -> Self {
        Self {
            store,
            worktree_base,
        }
    }

    fn compute_path(&self, canonical: &Path, branch: &str) -> PathBuf {
        worktree_path(self.worktree_base.as_deref(), canonical, branch)
    }

    /// Insert the row for an adopted worktree. Contents on disk are never
    /// touched; the branch recorded is whatever the worktree actually has.
    fn record_adopted(
        &self,
        request: &CreateRequest,
        working_path: &str,
        actual_branch: &str,
    ) -> Result<IsolationEnvironment> {
        let row = self.store.create_isolation_env(&NewIsolationEnv {
            codebase_id: request.codebase_id.clone(),
            provider: Default::default(),
            working_path: working_path.to_string(),
            branch_name: actual_branch.to_string(),
            workflow_type: request.workflow_type,
            identifier: request.identifier.clone(),
            created_by_platform: request.created_by_platform,
            metadata: serde_json::json!({
                "adopted": true,
                "prBranch": request.pr_branch,
                "prSha": request.pr_sha,
                "description": request.description,
            }),
        });
        match row {
            Ok(env) => {
                info!(path = %working_path, branch = %actual_branch, "adopted existing worktree");
                Ok(env)
            }
            Err(StoreError::Conflict(_)) => Err(IsolationError::AlreadyExists {
                branch: actual_branch.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl IsolationProvider for WorktreeProvider {
    #[instrument(skip(self, request), fields(codebase_id = %request.codebase_id, identifier = %request.identifier))]
    async fn create(&self, request: &CreateRequest) -> Result<IsolationEnvironment> {
        let canonical = PathBuf::from(&request.canonical_repo_path);
        let branch = branch_name(
            request.workflow_type,
            &request.identifier,
            request.pr_sha.as_deref(),
        );
        let path = self.compute_path(&canonical, &branch);
        let path_str = path.to_string_lossy().to_string();

        // Reuse: the same unit of work resolves to the same environment.
        if let Some(existing) = self
            .store
            .find_active_env_by_branch(&request.codebase_id, &branch)?
        {
            if existing.working_path == path_str {
                return Ok(existing);
            }
            return Err(IsolationError::AlreadyExists { branch });
        }

        // Adoption: if git already knows a worktree for this work, record it.
        let known = list_worktrees(&canonical).await?;
        let adopted = known.iter().find(|w| {
            if w.path == path_str {
                return true;
            }
            if matches!(
                request.workflow_type,
                switchboard_core::types::WorkflowType::Pr
                    | switchboard_core::types::WorkflowType::Review
            ) {
                if let Some(ref wb) = w.branch {
                    if request.pr_branch.as_deref() == Some(wb.as_str()) || wb.starts_with(&branch)
                    {
                        return true;
                    }
                }
            }
            false
        });
        if let Some(entry) = adopted {
            register_safe_directory(Path::new(&entry.path)).await;
            let actual = entry.branch.as_deref().unwrap_or(&branch);
            return self.record_adopted(request, &entry.path, actual);
        }

        // Creation.
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let result = if matches!(
            request.workflow_type,
            switchboard_core::types::WorkflowType::Pr | switchboard_core::types::WorkflowType::Review
        ) {
            // Fetch the PR head ref so fork branches resolve locally, then
            // pin to the exact SHA when one was given.
            let fetch_ref = format!("pull/{}/head", request.identifier);
            run_git_write(&canonical, &["fetch", "origin", &fetch_ref]).await?;
            let start_point = request.pr_sha.as_deref().unwrap_or("FETCH_HEAD");
            run_git_write(
                &canonical,
                &["worktree", "add", &path_str, start_point, "-b", &branch],
            )
            .await
        } else {
            run_git_write(&canonical, &["worktree", "add", &path_str, "-b", &branch]).await
        };

        if let Err(e) = result {
            return Err(classify_git_failure(&branch, &path_str, e));
        }

        register_safe_directory(&path).await;

        let env = self
            .store
            .create_isolation_env(&NewIsolationEnv {
                codebase_id: request.codebase_id.clone(),
                provider: Default::default(),
                working_path: path_str.clone(),
                branch_name: branch.clone(),
                workflow_type: request.workflow_type,
                identifier: request.identifier.clone(),
                created_by_platform: request.created_by_platform,
                metadata: serde_json::json!({
                    "prBranch": request.pr_branch,
                    "prSha": request.pr_sha,
                    "description": request.description,
                }),
            })
            .map_err(|e| match e {
                StoreError::Conflict(_) => IsolationError::AlreadyExists {
                    branch: branch.clone(),
                },
                other => other.into(),
            })?;

        info!(env_id = %env.id, branch = %branch, path = %path_str, "worktree created");
        Ok(env)
    }

    #[instrument(skip(self))]
    async fn destroy(&self, env_id: &str, force: bool) -> Result<()> {
        let Some(env) = self.store.get_isolation_env(env_id)? else {
            return Ok(());
        };
        if env.status == switchboard_core::types::EnvStatus::Destroyed {
            return Ok(());
        }

        let working = Path::new(&env.working_path);
        if working.exists() && !force && has_uncommitted_changes(working).await? {
            return Err(IsolationError::Dirty {
                path: env.working_path.clone(),
            });
        }

        let users = self.store.conversations_using_env(env_id)?;
        if !users.is_empty() {
            return Err(IsolationError::StillReferenced {
                env_id: env_id.to_string(),
                count: users.len(),
            });
        }

        let canonical = self
            .store
            .get_codebase(&env.codebase_id)?
            .map(|c| PathBuf::from(c.default_cwd))
            .ok_or_else(|| IsolationError::NotFound(env.codebase_id.clone()))?;

        let mut args = vec!["worktree", "remove"];
        if force {
            args.push("--force");
        }
        args.push(&env.working_path);

        match run_git_write(&canonical, &args).await {
            Ok(_) => {}
            Err(e) if is_not_a_working_tree(&e) => {
                warn!(env_id, path = %env.working_path, "worktree already gone, marking destroyed");
            }
            Err(e) => return Err(e),
        }

        self.store.mark_env_destroyed(env_id)?;
        info!(env_id, branch = %env.branch_name, "environment destroyed");
        Ok(())
    }

    async fn get(&self, env_id: &str) -> Result<Option<IsolationEnvironment>> {
        Ok(self.store.get_isolation_env(env_id)?)
    }

    async fn list(&self, codebase_id: &str) -> Result<Vec<IsolationEnvironment>> {
        Ok(self.store.list_envs_by_codebase(codebase_id)?)
    }

    async fn health_check(&self, env_id: &str) -> Result<bool> {
        let Some(env) = self.store.get_isolation_env(env_id)? else {
            return Ok(false);
        };
        let path = Path::new(&env.working_path);
        Ok(path.is_dir() && path.join(".git").exists())
    }

    /// Synthesize a row for a worktree git knows about but the store doesn't.
    /// Used by `/worktree orphans` diagnostics.
    async fn adopt(
        &self,
        codebase_id: &str,
        working_path: &str,
    ) -> Result<Option<IsolationEnvironment>> {
        if let Some(existing) = self.store.find_active_env_by_path(working_path)? {
            return Ok(Some(existing));
        }

        let Some(codebase) = self.store.get_codebase(codebase_id)? else {
            return Err(IsolationError::NotFound(codebase_id.to_string()));
        };
        let canonical = PathBuf::from(&codebase.default_cwd);
        let known = list_worktrees(&canonical).await?;
        let Some(entry) = known.iter().find(|w| w.path == working_path) else {
            return Ok(None);
        };

        let branch = entry
            .branch
            .clone()
            .unwrap_or_else(|| format!("detached-{}", crate::naming::stable_hash8(working_path)));
        let (workflow, identifier) = workflow_from_branch(&branch);

        let env = self.store.create_isolation_env(&NewIsolationEnv {
            codebase_id: codebase_id.to_string(),
            provider: Default::default(),
            working_path: working_path.to_string(),
            branch_name: branch,
            workflow_type: workflow,
            identifier,
            created_by_platform: switchboard_core::types::PlatformType::Test,
            metadata: serde_json::json!({"adopted": true, "orphanRecovery": true}),
        })?;
        Ok(Some(env))
    }
}
