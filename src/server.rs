//! MCP server transports.
//!
//! Serves the [`McpBridge`] over one of two transports:
//!
//! | Transport | How |
//! |-----------|-----|
//! | `stdio` | JSON-RPC over stdin/stdout, for clients that spawn the binary |
//! | `http` | MCP Streamable HTTP at `POST /mcp` on `[server].bind`, plus `GET /health` |
//!
//! With stdio, stdout belongs to the protocol: nothing else may print to
//! it. Logs go to stderr.
//!
//! # Cursor Integration
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "reposearch": {
//!       "command": "reposearch",
//!       "args": ["--config", "/path/to/reposearch.toml", "serve", "mcp"]
//!     }
//!   }
//! }
//! ```

use std::sync::Arc;

use anyhow::Result;
use axum::{routing::get, Json, Router};
use clap::ValueEnum;
use rmcp::transport::streamable_http_server::{
    session::local::LocalSessionManager, StreamableHttpService,
};
use rmcp::ServiceExt;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::config::Config;
use crate::engine::SearchEngine;
use crate::mcp::McpBridge;
use crate::tools::{ToolContext, ToolRegistry};

/// How the MCP server talks to its client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Transport {
    #[default]
    Stdio,
    Http,
}

/// Open the engine and serve MCP until the client disconnects (stdio) or
/// the process is terminated (http).
pub async fn run_server(config: &Config, transport: Transport) -> Result<()> {
    let engine = Arc::new(SearchEngine::open(config).await?);
    let bridge = McpBridge::new(
        Arc::new(ToolRegistry::with_builtins()),
        ToolContext::new(engine),
    );

    match transport {
        Transport::Stdio => serve_stdio(bridge).await,
        Transport::Http => serve_http(bridge, &config.server.bind).await,
    }
}

async fn serve_stdio(bridge: McpBridge) -> Result<()> {
    info!("MCP server running on stdio");
    let server = bridge.serve(rmcp::transport::stdio()).await?;
    server.waiting().await?;
    Ok(())
}

/// The HTTP application: MCP at `/mcp` and a health probe.
pub fn router(bridge: McpBridge) -> Router {
    let mcp = StreamableHttpService::new(
        move || Ok(bridge.clone()),
        LocalSessionManager::default().into(),
        Default::default(),
    );

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .nest_service("/mcp", mcp)
        .layer(cors)
}

async fn serve_http(bridge: McpBridge, bind_addr: &str) -> Result<()> {
    let app = router(bridge);
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!(addr = %bind_addr, "MCP server listening on http://{}/mcp", bind_addr);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
