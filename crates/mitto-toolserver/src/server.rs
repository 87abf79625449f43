// SPDX-License-Identifier: Apache-2.0
//! [`MittoMcpServer`] — the rmcp [`ServerHandler`] implementation.
//!
//! This is where `resolveSelfID`, capability-flag enforcement, and the
//! child-session recursion guard all happen, once, before a call ever
//! reaches a [`Tool::execute`] — so individual tools stay pure functions
//! that can trust `args["self_id"]` is already the real, resolved session id.

use std::sync::Arc;

use mitto_tools::{Tool, ToolCall, ToolOutput, ToolRegistry};
use rmcp::{
    handler::server::ServerHandler,
    model::{
        CallToolRequestParams, CallToolResult, ListToolsResult, PaginatedRequestParams,
        ServerCapabilities, ServerInfo,
    },
    service::{RequestContext, RoleServer},
    ErrorData as McpError,
};
use uuid::Uuid;

use crate::bridge::{output_to_call_result, schema_to_mcp_tool};
use crate::context::ToolContext;

#[derive(Clone)]
pub struct MittoMcpServer {
    registry: Arc<ToolRegistry>,
    ctx: Arc<ToolContext>,
}

impl MittoMcpServer {
    pub fn new(registry: Arc<ToolRegistry>, ctx: Arc<ToolContext>) -> Self {
        Self { registry, ctx }
    }

    /// Tool schemas as a plain JSON array, for the HTTP transport's
    /// `tools/list` method.
    pub fn tool_schemas_json(&self) -> serde_json::Value {
        serde_json::Value::Array(
            self.registry
                .schemas()
                .into_iter()
                .map(|s| serde_json::json!({ "name": s.name, "description": s.description, "parameters": s.parameters }))
                .collect(),
        )
    }

    /// Resolve `selfID`, enforce the tool's capability flag and recursion
    /// guard, and dispatch. Returns a [`ToolOutput`] either way — this never
    /// fails the MCP call itself, it reports the failure as a tool error so
    /// the calling agent can see and react to it.
    pub(crate) async fn dispatch(&self, call_id: String, name: String, mut args: serde_json::Value) -> ToolOutput {
        let Some(tool) = self.registry.get(&name) else {
            return ToolOutput::err(&call_id, format!("unknown tool: {name}"));
        };

        let raw_self_id = match args.get("self_id").and_then(serde_json::Value::as_str) {
            Some(id) => id.to_string(),
            None => return ToolOutput::err(&call_id, "missing required argument: self_id"),
        };

        let session = match self.ctx.resolve_self_id(&raw_self_id).await {
            Ok(session) => session,
            Err(err) => return ToolOutput::err(&call_id, format!("could not resolve caller session: {err}")),
        };
        let metadata = session.metadata().await;

        if let Some(capability) = tool.required_capability() {
            let granted = metadata.advanced_settings.get(capability).copied().unwrap_or(false);
            if !granted {
                return ToolOutput::err(
                    &call_id,
                    format!("tool {name} requires capability {capability}, which is not enabled for this conversation"),
                );
            }
        }

        if tool.forbidden_for_child_sessions() && metadata.parent_session_id.is_some() {
            return ToolOutput::err(
                &call_id,
                format!("tool {name} is not available to a child conversation"),
            );
        }

        if let Some(obj) = args.as_object_mut() {
            obj.insert("self_id".to_string(), serde_json::Value::String(session.id.clone()));
        }

        let call = ToolCall {
            id: call_id,
            name,
            args,
        };
        tool.execute(&call).await
    }
}

impl ServerHandler for MittoMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..ServerInfo::default()
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        let registry = self.registry.clone();
        async move {
            let tools = registry
                .schemas()
                .into_iter()
                .map(schema_to_mcp_tool)
                .collect();
            Ok(ListToolsResult {
                tools,
                next_cursor: None,
                meta: None,
            })
        }
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let args = request
            .arguments
            .map(|m| serde_json::Value::Object(m.into_iter().collect()))
            .unwrap_or(serde_json::Value::Object(serde_json::Map::new()));

        let output = self
            .dispatch(Uuid::new_v4().to_string(), request.name.to_string(), args)
            .await;
        Ok(output_to_call_result(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_info_enables_tools_capability() {
        let ctx = crate::registry::tests_support::test_ctx();
        let registry = Arc::new(ToolRegistry::new());
        let server = MittoMcpServer::new(registry, ctx);
        let info = server.get_info();
        assert!(info.capabilities.tools.is_some());
    }

    #[test]
    fn get_info_has_no_resources_capability_by_default() {
        let ctx = crate::registry::tests_support::test_ctx();
        let registry = Arc::new(ToolRegistry::new());
        let server = MittoMcpServer::new(registry, ctx);
        let info = server.get_info();
        assert!(info.capabilities.resources.is_none());
        assert!(info.capabilities.prompts.is_none());
    }

    #[test]
    fn server_is_cloneable() {
        let ctx = crate::registry::tests_support::test_ctx();
        let registry = Arc::new(ToolRegistry::new());
        let server = MittoMcpServer::new(registry, ctx);
        let _clone = server.clone();
    }

    #[tokio::test]
    async fn dispatch_unknown_tool_is_error() {
        let ctx = crate::registry::tests_support::test_ctx();
        let registry = Arc::new(ToolRegistry::new());
        let server = MittoMcpServer::new(registry, ctx);
        let out = server
            .dispatch("c1".into(), "nope".into(), serde_json::json!({}))
            .await;
        assert!(out.is_error);
    }

    #[tokio::test]
    async fn dispatch_without_self_id_is_error() {
        let ctx = crate::registry::tests_support::test_ctx();
        let registry = Arc::new(crate::registry::build_tool_registry(ctx.clone(), None));
        let server = MittoMcpServer::new(registry, ctx);
        let out = server
            .dispatch("c1".into(), "get_config".into(), serde_json::json!({}))
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("self_id"));
    }
}
