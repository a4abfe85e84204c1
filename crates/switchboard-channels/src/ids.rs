//! Wire-level conversation id formats.
//!
//! - GitHub: literal `owner/repo#number`
//! - Slack: `channel:thread_ts` when threaded, `channel:ts` otherwise; bare
//!   channel ids are tolerated read-only
//! - Discord: thread id after promotion, else channel id
//! - Telegram: chat id as a string

/// `owner/repo#number` for a GitHub issue or PR conversation.
pub fn github_conversation_id(owner: &str, repo: &str, number: u64) -> String {
    format!("{owner}/{repo}#{number}")
}

/// Parse `owner/repo#number` back into parts.
pub fn parse_github_id(id: &str) -> Option<(String, String, u64)> {
    let (repo_part, number) = id.rsplit_once('#')?;
    let (owner, repo) = repo_part.split_once('/')?;
    if owner.is_empty() || repo.is_empty() {
        return None;
    }
    Some((owner.to_string(), repo.to_string(), number.parse().ok()?))
}

/// `channel:ts` / `channel:thread_ts` for Slack.
pub fn slack_conversation_id(channel: &str, ts: &str) -> String {
    format!("{channel}:{ts}")
}

/// Split a Slack conversation id. Any colon-separated form is treated as
/// `(channel, ts_or_thread_ts)`; a bare channel id yields no timestamp.
pub fn parse_slack_id(id: &str) -> (String, Option<String>) {
    match id.split_once(':') {
        Some((channel, ts)) if !ts.is_empty() => (channel.to_string(), Some(ts.to_string())),
        _ => (id.to_string(), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn github_roundtrip() {
        let id = github_conversation_id("acme", "lib", 42);
        assert_eq!(id, "acme/lib#42");
        assert_eq!(
            parse_github_id(&id),
            Some(("acme".to_string(), "lib".to_string(), 42))
        );
    }

    #[test]
    fn github_rejects_malformed() {
        assert_eq!(parse_github_id("no-separator"), None);
        assert_eq!(parse_github_id("acme/lib#notanumber"), None);
        assert_eq!(parse_github_id("/lib#1"), None);
    }

    #[test]
    fn slack_threaded_and_bare() {
        assert_eq!(
            parse_slack_id("C123:1699.42"),
            ("C123".to_string(), Some("1699.42".to_string()))
        );
        assert_eq!(parse_slack_id("C123"), ("C123".to_string(), None));
    }
}
