//! Worktree classification and the user-visible status breakdown.
//!
//! Classification is pure so it can be tested without git:
//! - merged: the branch is in `git branch --merged <default>`
//! - stale: `days_since_activity >= threshold` and not Telegram-created
//! - active: neither
//!
//! Protection (uncommitted changes, live conversation references) is
//! checked separately at destroy time — a protected env can still *count*
//! as merged or stale in the breakdown.

use std::collections::HashSet;

use serde::Serialize;
use switchboard_core::types::PlatformType;
use switchboard_store::EnvWithAge;

/// Why a cleanup pass classified an environment the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvClass {
    Merged,
    Stale,
    Active,
}

pub fn classify_env(
    env: &EnvWithAge,
    merged_branches: &HashSet<String>,
    stale_threshold_days: i64,
) -> EnvClass {
    if merged_branches.contains(&env.env.branch_name) {
        return EnvClass::Merged;
    }
    if env.days_since_activity >= stale_threshold_days
        && env.env.created_by_platform != PlatformType::Telegram
    {
        return EnvClass::Stale;
    }
    EnvClass::Active
}

/// Per-codebase worktree quota picture, rendered into `/status` and the
/// limit-reached message.
#[derive(Debug, Clone, Serialize)]
pub struct WorktreeStatusBreakdown {
    pub total: u32,
    pub limit: u32,
    pub merged: Vec<String>,
    pub stale: Vec<(String, i64)>,
    pub active: Vec<String>,
}

impl WorktreeStatusBreakdown {
    pub fn merged_count(&self) -> usize {
        self.merged.len()
    }

    pub fn stale_count(&self) -> usize {
        self.stale.len()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// One-line summary for `/status`.
    pub fn status_line(&self) -> String {
        format!(
            "Worktrees: {}/{} ({} merged, {} stale, {} active)",
            self.total,
            self.limit,
            self.merged_count(),
            self.stale_count(),
            self.active_count()
        )
    }

    /// Full block shown when the quota stops a new environment.
    pub fn render_limit_message(&self) -> String {
        let mut out = format!(
            "Worktree limit reached ({}/{}).\nBreakdown: {} merged, {} stale, {} active.\n",
            self.total,
            self.limit,
            self.merged_count(),
            self.stale_count(),
            self.active_count()
        );

        if !self.merged.is_empty() {
            out.push_str(&format!(
                "Merged (auto-cleanable): {}\n",
                self.merged.join(", ")
            ));
        }
        if !self.stale.is_empty() {
            let stale: Vec<String> = self
                .stale
                .iter()
                .map(|(b, d)| format!("{b} ({d}d)"))
                .collect();
            out.push_str(&format!("Stale: {}\n", stale.join(", ")));
        }

        if self.merged.is_empty() && self.stale.is_empty() {
            out.push_str("Nothing can be auto-cleaned: all worktrees are active.\n");
        }
        out.push_str(
            "Use /worktree list to inspect, /worktree cleanup merged or \
             /worktree cleanup stale to free space, or /worktree remove in a bound conversation.",
        );
        out
    }
}

/// What one cleanup pass did, with reasons for everything it left alone.
#[derive(Debug, Clone, Default)]
pub struct CleanupOutcome {
    pub removed: Vec<String>,
    pub skipped: Vec<(String, String)>,
}

impl CleanupOutcome {
    pub fn summary(&self) -> String {
        if self.removed.is_empty() {
            return "No worktrees removed.".to_string();
        }
        let mut out = format!(
            "Cleaned up {} worktree(s): {}",
            self.removed.len(),
            self.removed.join(", ")
        );
        if !self.skipped.is_empty() {
            let skipped: Vec<String> = self
                .skipped
                .iter()
                .map(|(b, r)| format!("{b} ({r})"))
                .collect();
            out.push_str(&format!("\nSkipped: {}", skipped.join(", ")));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_core::types::{EnvStatus, ProviderKind, WorkflowType};
    use switchboard_store::IsolationEnvironment;

    fn env(branch: &str, platform: PlatformType, days: i64) -> EnvWithAge {
        EnvWithAge {
            env: IsolationEnvironment {
                id: format!("env-{branch}"),
                codebase_id: "cb".into(),
                provider: ProviderKind::Worktree,
                working_path: format!("/worktrees/lib/{branch}"),
                branch_name: branch.into(),
                workflow_type: WorkflowType::Task,
                identifier: branch.into(),
                status: EnvStatus::Active,
                created_by_platform: platform,
                metadata: serde_json::json!({}),
                created_at: "2026-01-01T00:00:00Z".into(),
            },
            days_since_activity: days,
        }
    }

    #[test]
    fn merged_wins_over_stale() {
        let merged: HashSet<String> = ["task-a".to_string()].into();
        let e = env("task-a", PlatformType::Github, 100);
        assert_eq!(classify_env(&e, &merged, 14), EnvClass::Merged);
    }

    #[test]
    fn stale_requires_threshold_and_non_telegram() {
        let merged = HashSet::new();
        assert_eq!(
            classify_env(&env("task-b", PlatformType::Github, 20), &merged, 14),
            EnvClass::Stale
        );
        assert_eq!(
            classify_env(&env("task-c", PlatformType::Github, 3), &merged, 14),
            EnvClass::Active
        );
        // Telegram-created envs never go stale.
        assert_eq!(
            classify_env(&env("task-d", PlatformType::Telegram, 200), &merged, 14),
            EnvClass::Active
        );
    }

    #[test]
    fn limit_message_with_nothing_cleanable() {
        let breakdown = WorktreeStatusBreakdown {
            total: 25,
            limit: 25,
            merged: vec![],
            stale: vec![],
            active: (0..25).map(|i| format!("task-{i}")).collect(),
        };
        let msg = breakdown.render_limit_message();
        assert!(msg.contains("Worktree limit reached"));
        assert!(msg.contains("0 merged"));
        assert!(msg.contains("0 stale"));
        assert!(msg.contains("25 active"));
    }

    #[test]
    fn status_line_shape() {
        let breakdown = WorktreeStatusBreakdown {
            total: 3,
            limit: 25,
            merged: vec!["pr-1".into()],
            stale: vec![("task-x".into(), 30)],
            active: vec!["issue-2".into()],
        };
        assert_eq!(
            breakdown.status_line(),
            "Worktrees: 3/25 (1 merged, 1 stale, 1 active)"
        );
    }

    #[test]
    fn outcome_summary() {
        let outcome = CleanupOutcome {
            removed: vec!["pr-1".into(), "pr-2".into()],
            skipped: vec![("task-x".into(), "uncommitted changes".into())],
        };
        let s = outcome.summary();
        assert!(s.contains("Cleaned up 2 worktree(s)"));
        assert!(s.contains("task-x (uncommitted changes)"));
    }
}
