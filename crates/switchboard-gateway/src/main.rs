use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use switchboard_cleanup::CleanupScheduler;
use switchboard_core::BrokerConfig;
use switchboard_isolation::{IsolationProvider, WorktreeProvider};
use switchboard_orchestrator::{BrokerContext, Orchestrator};
use switchboard_store::Store;

mod app;
mod github;
mod http;

#[derive(Parser)]
#[command(name = "switchboard-gateway", about = "Multi-platform broker for AI coding assistants")]
struct Cli {
    /// Path to switchboard.toml (default: ./switchboard.toml or SWITCHBOARD_CONFIG)
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "switchboard=info,tower_http=warn".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = BrokerConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({e}), using defaults");
        BrokerConfig::default()
    });

    let store = Arc::new(Store::open(&config.database.path)?);
    let isolation: Arc<dyn IsolationProvider> = Arc::new(WorktreeProvider::new(
        Arc::clone(&store),
        config.worktree_base.clone(),
    ));
    let cleanup = Arc::new(CleanupScheduler::new(
        Arc::clone(&store),
        Arc::clone(&isolation),
        config.stale_threshold_days,
        config.max_worktrees_per_codebase,
        config.cleanup_interval_hours,
    ));

    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;
    let ctx = Arc::new(BrokerContext::new(
        config,
        Arc::clone(&store),
        isolation,
        Arc::clone(&cleanup),
    ));

    // Seed the shipped template set (idempotent upsert) unless disabled.
    if ctx.config.load_builtin_commands {
        let dir = Path::new(&ctx.config.builtin_commands_dir).to_path_buf();
        if let Err(e) = ctx.templates.seed_builtin(&dir) {
            warn!(error = %e, "built-in template seeding failed");
        }
    }

    let orchestrator = Arc::new(Orchestrator::new(Arc::clone(&ctx)));

    // Background reaper until shutdown flips.
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let cleanup_task = tokio::spawn(Arc::clone(&cleanup).run(shutdown_rx));

    let state = Arc::new(app::AppState::new(ctx, orchestrator));
    let router = app::build_router(Arc::clone(&state));

    let addr: SocketAddr = format!("{}:{}", bind, port).parse()?;
    info!("Switchboard gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    // Stop adapters and drain the background loop; the store closes on drop.
    let _ = shutdown_tx.send(true);
    let _ = cleanup_task.await;
    info!("goodbye");
    Ok(())
}
