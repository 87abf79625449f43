// SPDX-License-Identifier: Apache-2.0
//! Loopback HTTP transport for the tool server: a single JSON-RPC 2.0 POST
//! route sharing the same registry and dispatch helpers as the stdio path,
//! rather than a second protocol implementation layered on top of `rmcp`.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use mitto_tools::ToolOutput;
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use crate::context::ToolContext;
use crate::server::MittoMcpServer;

#[derive(Clone)]
pub struct HttpState {
    server: MittoMcpServer,
}

#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    #[serde(default)]
    id: Value,
    method: String,
    #[serde(default)]
    params: Value,
}

/// Build the axum router for the loopback HTTP tool-server mode.
pub fn router(registry: Arc<mitto_tools::ToolRegistry>, ctx: Arc<ToolContext>) -> Router {
    let state = HttpState {
        server: MittoMcpServer::new(registry, ctx),
    };
    Router::new()
        .route("/rpc", post(handle_rpc))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn handle_rpc(State(state): State<HttpState>, Json(req): Json<JsonRpcRequest>) -> Json<Value> {
    let result = match req.method.as_str() {
        "tools/list" => json!({ "tools": state.server.tool_schemas_json() }),
        "tools/call" => {
            let name = req
                .params
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let args = req.params.get("arguments").cloned().unwrap_or(json!({}));
            let output = state.server.dispatch(Uuid::new_v4().to_string(), name, args).await;
            tool_output_to_json(output)
        }
        other => {
            return Json(json!({
                "jsonrpc": "2.0",
                "id": req.id,
                "error": { "code": -32601, "message": format!("unknown method: {other}") }
            }))
        }
    };

    Json(json!({ "jsonrpc": "2.0", "id": req.id, "result": result }))
}

fn tool_output_to_json(output: ToolOutput) -> Value {
    json!({
        "call_id": output.call_id,
        "content": output.content,
        "is_error": output.is_error,
    })
}
