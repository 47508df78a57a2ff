//! mcp-relay HTTP Server
//!
//! Axum-based server exposing the relay engine over REST and WebSocket.
//! Tools come from the child process named by `RELAY_MCP_COMMAND`.

mod config;
mod handlers;
mod state;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use relay_core::Engine;

use crate::config::ServerConfig;
use crate::handlers::router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env()?;
    let providers = config.provider_registry();

    tracing::info!("Registered providers: {:?}", providers.names());
    match &config.engine.mcp {
        Some(server) => {
            tracing::info!("Tool server: {} {}", server.command, server.args.join(" "));
        }
        None => tracing::warn!("RELAY_MCP_COMMAND not set - running without tools"),
    }

    let mut engine = Engine::builder()
        .config(config.engine.clone())
        .providers(providers)
        .build()?;

    // A failed start is retried by the first turn
    if engine.initialize().await {
        let tools = engine.available_tools().await;
        tracing::info!("✓ Engine ready with {} tools", tools.len());
        for tool in &tools {
            tracing::info!("  • {} ({})", tool.name, tool.category);
        }
    } else {
        tracing::warn!("⚠ Engine initialization failed - check provider and tool server");
    }

    let state = AppState::new(engine, config.history_window);
    let app = router(state.clone());

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;

    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("🚀 mcp-relay server running on http://{}", config.bind_addr);
    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("");
    tracing::info!("Endpoints:");
    tracing::info!("  GET  /health          - Health check");
    tracing::info!("  GET  /api/providers   - Registered providers");
    tracing::info!("  GET  /api/tools       - Tool catalog by category");
    tracing::info!("  POST /api/chat        - Send message");
    tracing::info!("  GET  /api/chat/stream - WebSocket with thinking steps");
    tracing::info!("  POST /api/clear       - Clear conversation");
    tracing::info!("");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.engine.lock().await.shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutting down");
}
