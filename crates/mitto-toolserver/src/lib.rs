// SPDX-License-Identifier: Apache-2.0
//! `mitto-toolserver` — exposes mitto's fixed set of meta-tools
//! (`list_conversations`, `send_prompt_to_conversation`, `ui_ask_yes_no`,
//! `conversation_start`, …) to any MCP-speaking agent or client, over
//! **stdio** (line-delimited JSON-RPC, via `rmcp`) or a loopback **HTTP**
//! JSON-RPC endpoint sharing the same registry and dispatch path.
//!
//! # Architecture
//!
//! ```text
//! ACP agent's "call a tool" request
//!       │  stdio (rmcp) or HTTP POST /rpc
//!       ▼
//! MittoMcpServer::dispatch   ── resolveSelfID, capability + recursion checks
//!       │
//!       ▼
//! ToolRegistry  ──►  Tool::execute()  ──►  SessionManager / Session
//! ```

pub mod bridge;
pub mod context;
pub mod http;
pub mod registry;
pub mod server;
pub mod tools;

pub use context::ToolContext;
pub use registry::{build_tool_registry, DEFAULT_TOOL_NAMES};
pub use server::MittoMcpServer;

use std::sync::Arc;

use anyhow::Result;
use mitto_tools::ToolRegistry;
use rmcp::ServiceExt;

/// Start an MCP stdio server, serving `registry` on `stdin`/`stdout`. Blocks
/// until the client disconnects (stdin EOF) or the process is terminated.
pub async fn serve_stdio(registry: Arc<ToolRegistry>, ctx: Arc<ToolContext>) -> Result<()> {
    let server = MittoMcpServer::new(registry, ctx);
    let running = server
        .serve((tokio::io::stdin(), tokio::io::stdout()))
        .await
        .map_err(|e| anyhow::anyhow!("MCP server init error: {e}"))?;
    running
        .waiting()
        .await
        .map_err(|e| anyhow::anyhow!("MCP server error: {e}"))?;
    Ok(())
}

/// Bind the loopback HTTP tool-server's listening socket. Split out from
/// [`serve_http`] so a caller can surface a bind failure (port already in
/// use, permission denied) as a fatal startup error before committing to
/// the rest of the server's lifecycle.
pub async fn bind_http(host: &str, port: u16) -> std::io::Result<tokio::net::TcpListener> {
    tokio::net::TcpListener::bind((host, port)).await
}

/// Serve the loopback HTTP tool-server transport on an already-bound
/// `listener`, blocking until it is closed.
pub async fn serve_http(
    registry: Arc<ToolRegistry>,
    ctx: Arc<ToolContext>,
    listener: tokio::net::TcpListener,
) -> Result<()> {
    let app = http::router(registry, ctx);
    axum::serve(listener, app).await?;
    Ok(())
}
