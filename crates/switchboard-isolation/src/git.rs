//! Thin async wrapper over the `git` binary.
//!
//! Every invocation runs under a bounded timeout: short for read-only
//! queries, longer for clone/fetch/worktree mutations. Output is captured,
//! never streamed — git here is plumbing, not UI.

use std::path::Path;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use switchboard_core::config::{GIT_READ_TIMEOUT_SECS, GIT_WRITE_TIMEOUT_SECS};

use crate::error::{IsolationError, Result};

/// One worktree as reported by `git worktree list --porcelain`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeEntry {
    pub path: String,
    /// Short branch name (`refs/heads/` stripped). `None` for detached HEAD.
    pub branch: Option<String>,
}

/// Run git with `args` in `repo`, enforcing `timeout`.
///
/// Returns trimmed stdout on success; non-zero exit becomes
/// [`IsolationError::Git`] carrying stderr.
pub async fn run_git(repo: &Path, args: &[&str], timeout: Duration) -> Result<String> {
    let rendered = args.join(" ");
    debug!(repo = %repo.display(), args = %rendered, "running git");

    let child = Command::new("git")
        .arg("-C")
        .arg(repo)
        .args(args)
        .kill_on_drop(true)
        .output();

    let output = tokio::time::timeout(timeout, child)
        .await
        .map_err(|_| IsolationError::GitTimeout {
            args: rendered.clone(),
            secs: timeout.as_secs(),
        })?
        .map_err(IsolationError::Io)?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(IsolationError::Git {
            args: rendered,
            message: stderr,
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Read-only git call with the short timeout.
pub async fn run_git_read(repo: &Path, args: &[&str]) -> Result<String> {
    run_git(repo, args, Duration::from_secs(GIT_READ_TIMEOUT_SECS)).await
}

/// Mutating git call (clone, fetch, worktree add/remove) with the long timeout.
pub async fn run_git_write(repo: &Path, args: &[&str]) -> Result<String> {
    run_git(repo, args, Duration::from_secs(GIT_WRITE_TIMEOUT_SECS)).await
}

/// `git worktree list --porcelain`, parsed.
pub async fn list_worktrees(repo: &Path) -> Result<Vec<WorktreeEntry>> {
    let out = run_git_read(repo, &["worktree", "list", "--porcelain"]).await?;
    Ok(parse_worktree_porcelain(&out))
}

/// True when `git status --porcelain` reports anything.
pub async fn has_uncommitted_changes(path: &Path) -> Result<bool> {
    let out = run_git_read(path, &["status", "--porcelain"]).await?;
    Ok(!out.is_empty())
}

/// Branches fully merged into `base`, short names, current-branch marker stripped.
pub async fn merged_branches(repo: &Path, base: &str) -> Result<Vec<String>> {
    let out = run_git_read(repo, &["branch", "--merged", base]).await?;
    Ok(out
        .lines()
        .map(|l| l.trim_start_matches(['*', '+']).trim().to_string())
        .filter(|l| !l.is_empty())
        .collect())
}

/// The repository's default branch: `origin/HEAD` if known, else `main`.
pub async fn default_branch(repo: &Path) -> Result<String> {
    match run_git_read(repo, &["symbolic-ref", "refs/remotes/origin/HEAD", "--short"]).await {
        Ok(r) => Ok(r
            .rsplit('/')
            .next()
            .unwrap_or("main")
            .to_string()),
        Err(_) => Ok("main".to_string()),
    }
}

/// Register a path with `safe.directory` so git trusts it across uids.
/// Failures are non-fatal — some environments forbid global config writes.
pub async fn register_safe_directory(path: &Path) {
    let result = Command::new("git")
        .args(["config", "--global", "--add", "safe.directory"])
        .arg(path)
        .output()
        .await;
    if let Err(e) = result {
        debug!(path = %path.display(), error = %e, "safe.directory registration failed");
    }
}

/// Parse `git worktree list --porcelain` output: stanzas separated by blank
/// lines, each starting with `worktree <path>` and optionally carrying
/// `branch refs/heads/<name>` or `detached`.
pub fn parse_worktree_porcelain(out: &str) -> Vec<WorktreeEntry> {
    let mut entries = Vec::new();
    let mut path: Option<String> = None;
    let mut branch: Option<String> = None;

    for line in out.lines().chain(std::iter::once("")) {
        if line.is_empty() {
            if let Some(p) = path.take() {
                entries.push(WorktreeEntry {
                    path: p,
                    branch: branch.take(),
                });
            }
            continue;
        }
        if let Some(p) = line.strip_prefix("worktree ") {
            path = Some(p.to_string());
        } else if let Some(b) = line.strip_prefix("branch ") {
            branch = Some(b.strip_prefix("refs/heads/").unwrap_or(b).to_string());
        }
    }

    entries
}

/// Map a git failure message onto the errors callers branch on.
pub fn classify_git_failure(branch: &str, path: &str, err: IsolationError) -> IsolationError {
    if let IsolationError::Git { ref message, .. } = err {
        let lower = message.to_lowercase();
        if lower.contains("already exists") || lower.contains("already checked out") {
            return IsolationError::AlreadyExists {
                branch: branch.to_string(),
            };
        }
        if lower.contains("uncommitted changes") || lower.contains("contains modified") {
            return IsolationError::Dirty {
                path: path.to_string(),
            };
        }
    }
    err
}

/// "not a working tree" means the worktree is already gone — removal treats
/// it as success.
pub fn is_not_a_working_tree(err: &IsolationError) -> bool {
    matches!(err, IsolationError::Git { message, .. }
        if message.to_lowercase().contains("not a working tree"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn porcelain_parsing() {
        let out = "worktree /workspace/lib\nHEAD abc123\nbranch refs/heads/main\n\n\
                   worktree /worktrees/lib/issue-42\nHEAD def456\nbranch refs/heads/issue-42\n\n\
                   worktree /worktrees/lib/detached-one\nHEAD 0123abc\ndetached\n";
        let entries = parse_worktree_porcelain(out);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].path, "/workspace/lib");
        assert_eq!(entries[0].branch.as_deref(), Some("main"));
        assert_eq!(entries[1].branch.as_deref(), Some("issue-42"));
        assert_eq!(entries[2].branch, None);
    }

    #[test]
    fn porcelain_empty_output() {
        assert!(parse_worktree_porcelain("").is_empty());
    }

    #[test]
    fn classify_already_exists() {
        let err = IsolationError::Git {
            args: "worktree add".into(),
            message: "fatal: 'issue-42' is already checked out at '/worktrees/lib/issue-42'".into(),
        };
        assert!(matches!(
            classify_git_failure("issue-42", "/x", err),
            IsolationError::AlreadyExists { .. }
        ));
    }

    #[test]
    fn classify_passthrough() {
        let err = IsolationError::Git {
            args: "fetch".into(),
            message: "fatal: could not read from remote repository".into(),
        };
        assert!(matches!(
            classify_git_failure("b", "/x", err),
            IsolationError::Git { .. }
        ));
    }

    #[test]
    fn not_a_working_tree_detection() {
        let err = IsolationError::Git {
            args: "worktree remove".into(),
            message: "fatal: '/worktrees/lib/gone' is not a working tree".into(),
        };
        assert!(is_not_a_working_tree(&err));
    }
}
