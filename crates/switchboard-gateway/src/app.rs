use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use switchboard_channels::TestAdapter;
use switchboard_orchestrator::{BrokerContext, Orchestrator};

use crate::github::GithubAdapter;
use crate::http;

/// Central shared state — passed as `Arc<AppState>` to all Axum handlers.
pub struct AppState {
    pub ctx: Arc<BrokerContext>,
    pub orchestrator: Arc<Orchestrator>,
    pub test_adapter: Arc<TestAdapter>,
    pub github_adapter: Arc<GithubAdapter>,
}

impl AppState {
    pub fn new(ctx: Arc<BrokerContext>, orchestrator: Arc<Orchestrator>) -> Self {
        let github_adapter = Arc::new(GithubAdapter::new(&ctx.config));
        Self {
            ctx,
            orchestrator,
            test_adapter: Arc::new(TestAdapter::new()),
            github_adapter,
        }
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(http::health::health_handler))
        .route("/test/message", post(http::test_api::post_message))
        .route(
            "/test/messages/{conversation_id}",
            get(http::test_api::get_messages).delete(http::test_api::delete_messages),
        )
        .route("/webhooks/github", post(http::webhooks::github_webhook))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}
