// SPDX-License-Identifier: Apache-2.0
//! End-to-end integration tests for the mitto MCP server.
//!
//! Each test drives a real [`MittoMcpServer`] over in-memory pipes, sending
//! raw JSON-RPC 2.0 messages and validating the responses. This exercises
//! the full rmcp dispatch path plus the `resolveSelfID`/capability/
//! recursion-guard enforcement in [`mitto_toolserver::server`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use mitto_config::Config;
use mitto_core::hooks::ResolvedAttachment;
use mitto_core::{
    AgentConnection, AgentUpdate, CoreResult, CreateSessionArgs, HookPipeline,
    PendingToolCorrelation, Session, SessionManager, StopReason,
};
use mitto_tools::{Tool, ToolCall, ToolOutput};
use mitto_toolserver::server::MittoMcpServer;
use mitto_toolserver::{build_tool_registry, ToolContext};
use rmcp::ServiceExt;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, WriteHalf};
use tokio::sync::mpsc;

// ── Test fixtures ────────────────────────────────────────────────────────

struct NoopAgent;

#[async_trait]
impl AgentConnection for NoopAgent {
    async fn initialize(&self) -> CoreResult<()> {
        Ok(())
    }
    async fn new_session(&self, _working_dir: &Path) -> CoreResult<String> {
        Ok("agent-1".into())
    }
    async fn resume_session(&self, _agent_session_id: &str) -> CoreResult<()> {
        Ok(())
    }
    async fn prompt(
        &self,
        _agent_session_id: &str,
        _text: &str,
        _attachments: &[ResolvedAttachment],
        _updates: mpsc::Sender<AgentUpdate>,
    ) -> CoreResult<StopReason> {
        Ok(StopReason::EndTurn)
    }
    async fn cancel(&self, _agent_session_id: &str) -> CoreResult<()> {
        Ok(())
    }
    async fn set_mode(&self, _agent_session_id: &str, _mode_id: &str) -> CoreResult<()> {
        Ok(())
    }
    async fn shutdown(&self) -> CoreResult<()> {
        Ok(())
    }
    fn is_unusable(&self) -> bool {
        false
    }
}

/// A fixture tool gated behind a capability flag, to exercise the
/// enforcement layer without depending on any real meta-tool's semantics.
struct GatedTool;

#[async_trait]
impl Tool for GatedTool {
    fn name(&self) -> &str {
        "gated"
    }
    fn description(&self) -> &str {
        "requires the demo-capability flag"
    }
    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": { "self_id": { "type": "string" } } })
    }
    fn required_capability(&self) -> Option<&str> {
        Some("demo-capability")
    }
    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        ToolOutput::ok(&call.id, "granted")
    }
}

/// A fixture tool that a child (delegated) session must never reach.
struct ParentOnlyTool;

#[async_trait]
impl Tool for ParentOnlyTool {
    fn name(&self) -> &str {
        "parent_only"
    }
    fn description(&self) -> &str {
        "forbidden for child sessions"
    }
    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": { "self_id": { "type": "string" } } })
    }
    fn forbidden_for_child_sessions(&self) -> bool {
        true
    }
    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        ToolOutput::ok(&call.id, "top-level only")
    }
}

struct Harness {
    manager: Arc<SessionManager>,
    correlation: Arc<PendingToolCorrelation>,
    ctx: Arc<ToolContext>,
    _dir: tempfile::TempDir,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let manager = Arc::new(SessionManager::new(
        dir.path().to_path_buf(),
        10,
        Arc::new(HookPipeline::new(vec![])),
        Arc::new(|_name: &str| Ok(Arc::new(NoopAgent) as Arc<dyn AgentConnection>)),
    ));
    let correlation = Arc::new(PendingToolCorrelation::new());
    let ctx = Arc::new(ToolContext::new(
        manager.clone(),
        correlation.clone(),
        Arc::new(Config::default()),
    ));
    Harness {
        manager,
        correlation,
        ctx,
        _dir: dir,
    }
}

async fn new_session(h: &Harness, working_dir: &PathBuf, parent: Option<String>) -> Arc<Session> {
    h.manager
        .create(CreateSessionArgs {
            name: "test".into(),
            description: String::new(),
            acp_server: "mock".into(),
            working_dir: working_dir.clone(),
            parent_session_id: parent,
        })
        .await
        .unwrap()
}

// ── In-process MCP server harness (raw JSON-RPC over tokio::io::duplex) ────

async fn start_test_server(
    registry: Arc<mitto_tools::ToolRegistry>,
    ctx: Arc<ToolContext>,
) -> (
    WriteHalf<DuplexStream>,
    BufReader<tokio::io::ReadHalf<DuplexStream>>,
) {
    let (client_stream, server_stream) = tokio::io::duplex(65536);
    tokio::spawn(async move {
        let server = MittoMcpServer::new(registry, ctx);
        if let Ok(running) = server.serve(server_stream).await {
            let _ = running.waiting().await;
        }
    });
    let (client_read, client_write) = tokio::io::split(client_stream);
    (client_write, BufReader::new(client_read))
}

async fn send_msg(writer: &mut WriteHalf<DuplexStream>, msg: &Value) {
    let line = serde_json::to_string(msg).expect("message must serialize");
    writer.write_all(line.as_bytes()).await.expect("write failed");
    writer.write_all(b"\n").await.expect("newline write failed");
    writer.flush().await.expect("flush failed");
}

async fn recv_msg(reader: &mut BufReader<tokio::io::ReadHalf<DuplexStream>>) -> Value {
    let mut line = String::new();
    tokio::time::timeout(std::time::Duration::from_secs(5), reader.read_line(&mut line))
        .await
        .expect("timed out waiting for server response")
        .expect("read error");
    serde_json::from_str(line.trim()).expect("server response must be valid JSON")
}

async fn initialize(
    writer: &mut WriteHalf<DuplexStream>,
    reader: &mut BufReader<tokio::io::ReadHalf<DuplexStream>>,
) -> Value {
    send_msg(
        writer,
        &json!({
            "jsonrpc": "2.0",
            "id": 0,
            "method": "initialize",
            "params": {
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "clientInfo": { "name": "mitto-test-client", "version": "0.0.0" }
            }
        }),
    )
    .await;

    let init_resp = recv_msg(reader).await;
    assert_eq!(init_resp["jsonrpc"], "2.0");
    assert!(init_resp["result"].is_object());

    send_msg(
        writer,
        &json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }),
    )
    .await;

    init_resp["result"].clone()
}

// ── Tests ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn initialize_declares_tools_capability() {
    let h = harness();
    let reg = Arc::new(mitto_tools::ToolRegistry::new());
    let (mut writer, mut reader) = start_test_server(reg, h.ctx.clone()).await;
    let result = initialize(&mut writer, &mut reader).await;
    assert!(result["capabilities"]["tools"].is_object());
}

#[tokio::test]
async fn tools_list_empty_registry() {
    let h = harness();
    let reg = Arc::new(mitto_tools::ToolRegistry::new());
    let (mut writer, mut reader) = start_test_server(reg, h.ctx.clone()).await;
    initialize(&mut writer, &mut reader).await;

    send_msg(&mut writer, &json!({ "jsonrpc": "2.0", "id": 1, "method": "tools/list", "params": {} })).await;
    let resp = recv_msg(&mut reader).await;
    assert!(resp["result"]["tools"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn default_registry_tools_are_listed_by_server() {
    let h = harness();
    let reg = Arc::new(build_tool_registry(h.ctx.clone(), None));
    let (mut writer, mut reader) = start_test_server(reg, h.ctx.clone()).await;
    initialize(&mut writer, &mut reader).await;

    send_msg(&mut writer, &json!({ "jsonrpc": "2.0", "id": 1, "method": "tools/list", "params": {} })).await;
    let resp = recv_msg(&mut reader).await;
    let names: Vec<&str> = resp["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|t| t["name"].as_str())
        .collect();
    assert!(names.contains(&"list_conversations"));
    assert!(names.contains(&"conversation_start"));
    assert!(names.contains(&"archive"));
}

#[tokio::test]
async fn filtered_registry_limits_exposed_tools() {
    let h = harness();
    let reg = Arc::new(build_tool_registry(h.ctx.clone(), Some("get_config,archive")));
    let (mut writer, mut reader) = start_test_server(reg, h.ctx.clone()).await;
    initialize(&mut writer, &mut reader).await;

    send_msg(&mut writer, &json!({ "jsonrpc": "2.0", "id": 1, "method": "tools/list", "params": {} })).await;
    let resp = recv_msg(&mut reader).await;
    let names: std::collections::HashSet<&str> = resp["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|t| t["name"].as_str())
        .collect();
    assert_eq!(names.len(), 2);
    assert!(names.contains("get_config"));
    assert!(names.contains("archive"));
}

#[tokio::test]
async fn tools_call_with_real_session_resolves_self_id_directly() {
    let h = harness();
    let session = new_session(&h, &PathBuf::from("/tmp"), None).await;
    let reg = Arc::new(build_tool_registry(h.ctx.clone(), Some("get_config")));
    let (mut writer, mut reader) = start_test_server(reg, h.ctx.clone()).await;
    initialize(&mut writer, &mut reader).await;

    send_msg(
        &mut writer,
        &json!({
            "jsonrpc": "2.0", "id": 2, "method": "tools/call",
            "params": { "name": "get_config", "arguments": { "self_id": session.id } }
        }),
    )
    .await;
    let resp = recv_msg(&mut reader).await;
    assert_eq!(resp["result"]["isError"], false);
}

#[tokio::test]
async fn tools_call_missing_self_id_returns_is_error() {
    let h = harness();
    let reg = Arc::new(build_tool_registry(h.ctx.clone(), Some("get_config")));
    let (mut writer, mut reader) = start_test_server(reg, h.ctx.clone()).await;
    initialize(&mut writer, &mut reader).await;

    send_msg(
        &mut writer,
        &json!({
            "jsonrpc": "2.0", "id": 2, "method": "tools/call",
            "params": { "name": "get_config", "arguments": {} }
        }),
    )
    .await;
    let resp = recv_msg(&mut reader).await;
    assert_eq!(resp["result"]["isError"], true);
}

#[tokio::test]
async fn tools_call_unknown_tool_returns_is_error() {
    let h = harness();
    let reg = Arc::new(mitto_tools::ToolRegistry::new());
    let (mut writer, mut reader) = start_test_server(reg, h.ctx.clone()).await;
    initialize(&mut writer, &mut reader).await;

    send_msg(
        &mut writer,
        &json!({
            "jsonrpc": "2.0", "id": 2, "method": "tools/call",
            "params": { "name": "nonexistent", "arguments": {} }
        }),
    )
    .await;
    let resp = recv_msg(&mut reader).await;
    assert_eq!(resp["result"]["isError"], true);
}

#[tokio::test]
async fn tools_call_self_id_resolved_via_correlation() {
    let h = harness();
    let session = new_session(&h, &PathBuf::from("/tmp"), None).await;
    h.correlation.register("opaque-call-1", session.id.clone()).await;

    let reg = Arc::new(build_tool_registry(h.ctx.clone(), Some("get_config")));
    let (mut writer, mut reader) = start_test_server(reg, h.ctx.clone()).await;
    initialize(&mut writer, &mut reader).await;

    send_msg(
        &mut writer,
        &json!({
            "jsonrpc": "2.0", "id": 2, "method": "tools/call",
            "params": { "name": "get_config", "arguments": { "self_id": "opaque-call-1" } }
        }),
    )
    .await;
    let resp = recv_msg(&mut reader).await;
    assert_eq!(resp["result"]["isError"], false);
}

#[tokio::test]
async fn tools_call_without_required_capability_is_rejected() {
    let h = harness();
    let session = new_session(&h, &PathBuf::from("/tmp"), None).await;
    let mut reg = mitto_tools::ToolRegistry::new();
    reg.register(GatedTool);
    let (mut writer, mut reader) = start_test_server(Arc::new(reg), h.ctx.clone()).await;
    initialize(&mut writer, &mut reader).await;

    send_msg(
        &mut writer,
        &json!({
            "jsonrpc": "2.0", "id": 2, "method": "tools/call",
            "params": { "name": "gated", "arguments": { "self_id": session.id } }
        }),
    )
    .await;
    let resp = recv_msg(&mut reader).await;
    assert_eq!(resp["result"]["isError"], true);
    let content = resp["result"]["content"].as_array().unwrap();
    assert!(content[0]["text"].as_str().unwrap().contains("demo-capability"));
}

#[tokio::test]
async fn tools_call_forbidden_for_child_session_is_rejected() {
    let h = harness();
    let parent = new_session(&h, &PathBuf::from("/tmp"), None).await;
    let child = new_session(&h, &PathBuf::from("/tmp"), Some(parent.id.clone())).await;

    let mut reg = mitto_tools::ToolRegistry::new();
    reg.register(ParentOnlyTool);
    let (mut writer, mut reader) = start_test_server(Arc::new(reg), h.ctx.clone()).await;
    initialize(&mut writer, &mut reader).await;

    send_msg(
        &mut writer,
        &json!({
            "jsonrpc": "2.0", "id": 2, "method": "tools/call",
            "params": { "name": "parent_only", "arguments": { "self_id": child.id } }
        }),
    )
    .await;
    let resp = recv_msg(&mut reader).await;
    assert_eq!(resp["result"]["isError"], true);
}

#[tokio::test]
async fn tools_call_allowed_for_top_level_session() {
    let h = harness();
    let top_level = new_session(&h, &PathBuf::from("/tmp"), None).await;

    let mut reg = mitto_tools::ToolRegistry::new();
    reg.register(ParentOnlyTool);
    let (mut writer, mut reader) = start_test_server(Arc::new(reg), h.ctx.clone()).await;
    initialize(&mut writer, &mut reader).await;

    send_msg(
        &mut writer,
        &json!({
            "jsonrpc": "2.0", "id": 2, "method": "tools/call",
            "params": { "name": "parent_only", "arguments": { "self_id": top_level.id } }
        }),
    )
    .await;
    let resp = recv_msg(&mut reader).await;
    assert_eq!(resp["result"]["isError"], false);
}
