//! GitHub webhook ingress — POST /webhooks/github.
//!
//! Signature verification is GitHub-style HMAC-SHA256 over the raw body
//! (`X-Hub-Signature-256: sha256=<hex>`). With no secret configured the
//! endpoint accepts unsigned payloads — the operator opted out.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use std::sync::Arc;
use tracing::{info, warn};

use switchboard_core::types::PlatformType;
use switchboard_orchestrator::{AutoIsolation, InboundRequest};

use crate::app::AppState;
use crate::github::{parse_event, InboundGithubEvent};

type HmacSha256 = Hmac<Sha256>;

/// POST /webhooks/github
pub async fn github_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    if let Some(secret) = &state.ctx.config.github_webhook_secret {
        verify_signature(&headers, &body, secret).map_err(|reason| {
            warn!(reason, "webhook signature rejected");
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "signature verification failed"})),
            )
        })?;
    }

    let event = headers
        .get("x-github-event")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();
    let payload: Value = serde_json::from_slice(&body).map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "invalid JSON body"})),
        )
    })?;

    match parse_event(&event, &payload) {
        InboundGithubEvent::Ignored => Ok(Json(json!({"ok": true, "ignored": true}))),

        InboundGithubEvent::Closed { conversation_id } => {
            // Close events tear down isolation when the last reference goes.
            if let Ok(Some(conv)) = state
                .ctx
                .store
                .find_conversation(PlatformType::Github, &conversation_id)
            {
                if let Err(e) = state.ctx.cleanup.on_conversation_closed(&conv.id).await {
                    warn!(conversation_id, error = %e, "close-event cleanup failed");
                }
            }
            info!(conversation_id, "conversation closed");
            Ok(Json(json!({"ok": true})))
        }

        InboundGithubEvent::Message(message) => {
            // Unauthorized senders are dropped silently (masked id logged).
            if !state.github_adapter.is_sender_allowed(&message.sender) {
                return Ok(Json(json!({"ok": true})));
            }

            let is_slash = message.text.trim_start().starts_with('/');
            let request = InboundRequest {
                conversation_id: message.conversation_id.clone(),
                text: message.text.clone(),
                issue_context: (!is_slash).then(|| message.issue_context.clone()),
                thread_context: None,
                parent_conversation_id: None,
                auto_isolation: Some(AutoIsolation {
                    workflow_type: message.workflow_type,
                    identifier: message.identifier.clone(),
                    pr_branch: message.pr_branch.clone(),
                    pr_sha: message.pr_sha.clone(),
                }),
            };

            let orchestrator = Arc::clone(&state.orchestrator);
            let adapter = Arc::clone(&state.github_adapter);
            tokio::spawn(async move {
                orchestrator.handle(adapter.as_ref(), request).await;
            });

            Ok(Json(json!({"ok": true})))
        }
    }
}

/// Verify `X-Hub-Signature-256: sha256=<hex>` over the raw body.
fn verify_signature(headers: &HeaderMap, body: &Bytes, secret: &str) -> Result<(), &'static str> {
    let sig_header = headers
        .get("x-hub-signature-256")
        .and_then(|v| v.to_str().ok())
        .ok_or("missing X-Hub-Signature-256 header")?;
    let sig_hex = sig_header
        .strip_prefix("sha256=")
        .ok_or("malformed X-Hub-Signature-256 header")?;
    let expected = hex::decode(sig_hex).map_err(|_| "signature is not valid hex")?;

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| "invalid HMAC key length")?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| "HMAC signature mismatch")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_roundtrip() {
        let secret = "topsecret";
        let body = Bytes::from_static(b"{\"action\":\"opened\"}");

        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(&body);
        let sig = format!("sha256={}", hex::encode(mac.finalize().into_bytes()));

        let mut headers = HeaderMap::new();
        headers.insert("x-hub-signature-256", sig.parse().unwrap());
        assert!(verify_signature(&headers, &body, secret).is_ok());
        assert!(verify_signature(&headers, &body, "wrong").is_err());
    }

    #[test]
    fn missing_signature_is_rejected() {
        let headers = HeaderMap::new();
        let body = Bytes::from_static(b"{}");
        assert!(verify_signature(&headers, &body, "secret").is_err());
    }
}
