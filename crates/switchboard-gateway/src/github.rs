//! GitHub ingress/egress at the broker's contract level.
//!
//! Inbound webhook payloads are parsed into broker messages or close
//! events; outbound replies are posted as issue/PR comments. Everything
//! heavier (checkouts, review APIs, app auth) stays outside the core.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use switchboard_channels::adapter::message_limit;
use switchboard_channels::ids::{github_conversation_id, parse_github_id};
use switchboard_channels::split::split_message;
use switchboard_channels::{AllowList, ChannelError, PlatformAdapter};
use switchboard_core::types::{PlatformType, WorkflowType};
use switchboard_core::BrokerConfig;

const GITHUB_API: &str = "https://api.github.com";

pub struct GithubAdapter {
    http: reqwest::Client,
    token: Option<String>,
    allow: AllowList,
}

impl GithubAdapter {
    pub fn new(config: &BrokerConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            token: config.github_token.clone(),
            allow: AllowList::parse(&config.github_allowed_users),
        }
    }

    /// Allow-list gate; logs a masked id and returns false on rejection.
    pub fn is_sender_allowed(&self, login: &str) -> bool {
        self.allow.check("github", login)
    }
}

#[async_trait]
impl PlatformAdapter for GithubAdapter {
    fn platform_type(&self) -> PlatformType {
        PlatformType::Github
    }

    async fn send_message(
        &self,
        conversation_id: &str,
        message: &str,
    ) -> switchboard_channels::Result<()> {
        let Some((owner, repo, number)) = parse_github_id(conversation_id) else {
            return Err(ChannelError::Send {
                platform: "github".into(),
                reason: format!("malformed conversation id: {conversation_id}"),
            });
        };
        let Some(token) = &self.token else {
            info!(conversation_id, "no GitHub token configured; reply not delivered");
            return Ok(());
        };

        let url = format!("{GITHUB_API}/repos/{owner}/{repo}/issues/{number}/comments");
        for piece in split_message(message, message_limit(PlatformType::Github)) {
            let response = self
                .http
                .post(&url)
                .bearer_auth(token)
                .header("User-Agent", "switchboard")
                .header("Accept", "application/vnd.github+json")
                .json(&serde_json::json!({ "body": piece }))
                .send()
                .await
                .map_err(|e| ChannelError::Send {
                    platform: "github".into(),
                    reason: e.to_string(),
                })?;
            if !response.status().is_success() {
                return Err(ChannelError::Send {
                    platform: "github".into(),
                    reason: format!("comment POST returned {}", response.status()),
                });
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Webhook payload parsing
// ---------------------------------------------------------------------------

/// A webhook payload reduced to what the broker acts on.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundGithubEvent {
    Message(Box<GithubMessage>),
    Closed { conversation_id: String },
    Ignored,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GithubMessage {
    pub conversation_id: String,
    pub sender: String,
    pub text: String,
    /// `Issue #N: title\n\nbody`, appended to non-slash prompts.
    pub issue_context: String,
    pub workflow_type: WorkflowType,
    pub identifier: String,
    pub pr_branch: Option<String>,
    pub pr_sha: Option<String>,
}

/// Reduce `(X-GitHub-Event, payload)` to an [`InboundGithubEvent`].
///
/// Bot senders are ignored outright so the broker never converses with its
/// own comments.
pub fn parse_event(event: &str, payload: &Value) -> InboundGithubEvent {
    let repo_full = payload
        .pointer("/repository/full_name")
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    let Some((owner, repo)) = repo_full.split_once('/') else {
        return InboundGithubEvent::Ignored;
    };
    let action = payload.get("action").and_then(|a| a.as_str()).unwrap_or("");

    match event {
        "issues" => {
            let Some(number) = payload.pointer("/issue/number").and_then(|n| n.as_u64()) else {
                return InboundGithubEvent::Ignored;
            };
            let conversation_id = github_conversation_id(owner, repo, number);
            match action {
                "closed" => InboundGithubEvent::Closed { conversation_id },
                "opened" => {
                    let sender = str_at(payload, "/issue/user/login");
                    if sender.ends_with("[bot]") {
                        return InboundGithubEvent::Ignored;
                    }
                    let title = str_at(payload, "/issue/title");
                    let body = str_at(payload, "/issue/body");
                    InboundGithubEvent::Message(Box::new(GithubMessage {
                        conversation_id,
                        sender,
                        text: body.clone(),
                        issue_context: format!("Issue #{number}: {title}\n\n{body}"),
                        workflow_type: WorkflowType::Issue,
                        identifier: number.to_string(),
                        pr_branch: None,
                        pr_sha: None,
                    }))
                }
                _ => InboundGithubEvent::Ignored,
            }
        }
        "issue_comment" => {
            if action != "created" {
                return InboundGithubEvent::Ignored;
            }
            let Some(number) = payload.pointer("/issue/number").and_then(|n| n.as_u64()) else {
                return InboundGithubEvent::Ignored;
            };
            let sender = str_at(payload, "/comment/user/login");
            if sender.ends_with("[bot]") {
                return InboundGithubEvent::Ignored;
            }
            let is_pr = payload.pointer("/issue/pull_request").is_some();
            let title = str_at(payload, "/issue/title");
            let body = str_at(payload, "/issue/body");
            let kind = if is_pr { "PR" } else { "Issue" };
            InboundGithubEvent::Message(Box::new(GithubMessage {
                conversation_id: github_conversation_id(owner, repo, number),
                sender,
                text: str_at(payload, "/comment/body"),
                issue_context: format!("{kind} #{number}: {title}\n\n{body}"),
                workflow_type: if is_pr {
                    WorkflowType::Pr
                } else {
                    WorkflowType::Issue
                },
                identifier: number.to_string(),
                pr_branch: None,
                pr_sha: None,
            }))
        }
        "pull_request" => {
            let Some(number) = payload
                .pointer("/pull_request/number")
                .and_then(|n| n.as_u64())
            else {
                return InboundGithubEvent::Ignored;
            };
            let conversation_id = github_conversation_id(owner, repo, number);
            match action {
                "closed" => InboundGithubEvent::Closed { conversation_id },
                "opened" | "ready_for_review" => {
                    let sender = str_at(payload, "/pull_request/user/login");
                    if sender.ends_with("[bot]") {
                        return InboundGithubEvent::Ignored;
                    }
                    let title = str_at(payload, "/pull_request/title");
                    let body = str_at(payload, "/pull_request/body");
                    InboundGithubEvent::Message(Box::new(GithubMessage {
                        conversation_id,
                        sender,
                        text: body.clone(),
                        issue_context: format!("PR #{number}: {title}\n\n{body}"),
                        workflow_type: WorkflowType::Pr,
                        identifier: number.to_string(),
                        pr_branch: payload
                            .pointer("/pull_request/head/ref")
                            .and_then(|v| v.as_str())
                            .map(String::from),
                        pr_sha: payload
                            .pointer("/pull_request/head/sha")
                            .and_then(|v| v.as_str())
                            .map(String::from),
                    }))
                }
                _ => InboundGithubEvent::Ignored,
            }
        }
        other => {
            debug!(event = other, "unhandled webhook event type");
            InboundGithubEvent::Ignored
        }
    }
}

fn str_at(payload: &Value, pointer: &str) -> String {
    payload
        .pointer(pointer)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}
