//! Deterministic branch names and worktree path layout.
//!
//! Branch names are the contract between the broker, git, and humans reading
//! `git branch` output: `issue-42`, `pr-42`, `pr-42-review`, `thread-9f3c21ab`,
//! `task-dark-mode`.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use switchboard_core::config::expand_tilde;
use switchboard_core::types::WorkflowType;

/// Derive the branch name for a unit of work.
///
/// A PR with a pinned SHA gets the `-review` suffix so review worktrees at an
/// exact commit never collide with the live PR worktree.
pub fn branch_name(workflow: WorkflowType, identifier: &str, pr_sha: Option<&str>) -> String {
    match workflow {
        WorkflowType::Issue => format!("issue-{identifier}"),
        WorkflowType::Pr => {
            if pr_sha.is_some() {
                format!("pr-{identifier}-review")
            } else {
                format!("pr-{identifier}")
            }
        }
        WorkflowType::Review => format!("pr-{identifier}-review"),
        WorkflowType::Thread => format!("thread-{}", stable_hash8(identifier)),
        WorkflowType::Task => format!("task-{}", slug(identifier)),
    }
}

/// First 8 hex chars of the SHA-256 of `input` — stable across runs and hosts.
pub fn stable_hash8(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(&digest[..4])
}

/// Lowercase, collapse every non-alphanumeric run to a single `-`, trim.
pub fn slug(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last_dash = true;
    for c in input.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}

/// User-supplied task branches are restricted to `[A-Za-z0-9_-]+`.
pub fn is_valid_task_branch(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Worktree directory for a branch:
/// `${WORKTREE_BASE:-<canonical>/../worktrees}/<repoBasename>/<branchName>`.
pub fn worktree_path(
    worktree_base: Option<&str>,
    canonical_repo_path: &Path,
    branch: &str,
) -> PathBuf {
    let repo_name = canonical_repo_path
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "repo".to_string());

    let base = match worktree_base {
        Some(b) => PathBuf::from(expand_tilde(b)),
        None => canonical_repo_path
            .parent()
            .map(|p| p.join("worktrees"))
            .unwrap_or_else(|| PathBuf::from("worktrees")),
    };

    base.join(repo_name).join(branch)
}

/// Best-effort inverse of [`branch_name`], used when adopting a worktree the
/// broker didn't create. Unrecognized shapes fall back to `task`.
pub fn workflow_from_branch(branch: &str) -> (WorkflowType, String) {
    if let Some(rest) = branch.strip_prefix("issue-") {
        return (WorkflowType::Issue, rest.to_string());
    }
    if let Some(rest) = branch.strip_prefix("pr-") {
        if let Some(ident) = rest.strip_suffix("-review") {
            return (WorkflowType::Review, ident.to_string());
        }
        return (WorkflowType::Pr, rest.to_string());
    }
    if let Some(rest) = branch.strip_prefix("thread-") {
        return (WorkflowType::Thread, rest.to_string());
    }
    if let Some(rest) = branch.strip_prefix("task-") {
        return (WorkflowType::Task, rest.to_string());
    }
    (WorkflowType::Task, branch.to_string())
}
