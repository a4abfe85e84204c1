//! Test adapter HTTP surface — drives E2E flows with no real network.
//!
//! `POST /test/message` enqueues an inbound message (fire-and-forget, like
//! every adapter); `GET /test/messages/{id}` returns everything the broker
//! emitted for that conversation in order; `DELETE` clears the buffer.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use switchboard_orchestrator::InboundRequest;

use crate::app::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestMessage {
    pub conversation_id: String,
    pub message: String,
}

/// POST /test/message
pub async fn post_message(
    State(state): State<Arc<AppState>>,
    Json(body): Json<TestMessage>,
) -> Json<Value> {
    let orchestrator = Arc::clone(&state.orchestrator);
    let adapter = Arc::clone(&state.test_adapter);
    let request = InboundRequest::text_only(&body.conversation_id, &body.message);

    // Completion is observable only through the adapter's sent messages.
    tokio::spawn(async move {
        orchestrator.handle(adapter.as_ref(), request).await;
    });

    Json(json!({"ok": true}))
}

/// GET /test/messages/{conversation_id}
pub async fn get_messages(
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<String>,
) -> Json<Value> {
    Json(json!({
        "conversationId": conversation_id,
        "messages": state.test_adapter.messages(&conversation_id),
    }))
}

/// DELETE /test/messages/{conversation_id}
pub async fn delete_messages(
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<String>,
) -> Json<Value> {
    state.test_adapter.clear(&conversation_id);
    Json(json!({"ok": true}))
}
