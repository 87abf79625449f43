// SPDX-License-Identifier: Apache-2.0
use std::path::Path;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::CoreResult;
use crate::hooks::ResolvedAttachment;

/// One streamed fragment of an agent's response to a prompt, translated
/// from the wire protocol's `session/update` notification.
#[derive(Debug, Clone)]
pub enum AgentUpdate {
    AgentMessageChunk(String),
    AgentThoughtChunk(String),
    ToolCall {
        tool_call_id: String,
        name: String,
        args: serde_json::Value,
    },
    ToolCallUpdate {
        tool_call_id: String,
        status: String,
        result: Option<serde_json::Value>,
    },
    CurrentModeUpdate {
        mode_id: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    EndTurn,
    Cancelled,
    Error(String),
}

/// Abstraction over a single ACP subprocess: spawn, request/notify,
/// cancellation, shutdown. The connection is single-writer — at most one
/// outstanding `prompt` call at a time — and streams updates for the
/// current turn as they arrive over `updates`.
#[async_trait]
pub trait AgentConnection: Send + Sync {
    /// Perform the ACP `initialize` handshake.
    async fn initialize(&self) -> CoreResult<()>;

    /// Start a new agent-side session bound to `working_dir`, returning the
    /// agent's own session handle (distinct from mitto's `SessionID`).
    async fn new_session(&self, working_dir: &Path) -> CoreResult<String>;

    /// Resume an existing agent-side session after a connection was replaced.
    async fn resume_session(&self, agent_session_id: &str) -> CoreResult<()>;

    /// Send a prompt and stream updates until the turn ends. Returns the
    /// final stop reason.
    async fn prompt(
        &self,
        agent_session_id: &str,
        text: &str,
        attachments: &[ResolvedAttachment],
        updates: mpsc::Sender<AgentUpdate>,
    ) -> CoreResult<StopReason>;

    /// Request cancellation of the in-flight prompt and await acknowledgement.
    async fn cancel(&self, agent_session_id: &str) -> CoreResult<()>;

    async fn set_mode(&self, agent_session_id: &str, mode_id: &str) -> CoreResult<()>;

    async fn shutdown(&self) -> CoreResult<()>;

    /// `true` once a non-zero exit, unparseable frame, or protocol error has
    /// made this connection unusable for further prompts.
    fn is_unusable(&self) -> bool;
}
