// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::Value;

/// A single tool invocation requested by a caller (another agent, the web
/// UI, or any other tool-server client).
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Opaque identifier supplied by the caller (forwarded verbatim in the
    /// result, and — for ACP-originated calls — the correlation key the
    /// host uses to resolve the caller's real session id).
    pub id: String,
    pub name: String,
    /// Parsed JSON arguments.
    pub args: Value,
}

/// The result of executing a tool.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub call_id: String,
    /// Plain-text content. Always set; always readable.
    pub content: String,
    /// If true, the tool execution failed; `content` carries the error message.
    pub is_error: bool,
}

impl ToolOutput {
    /// Successful plain-text result.
    pub fn ok(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    /// Error result containing a plain-text error message.
    pub fn err(call_id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: msg.into(),
            is_error: true,
        }
    }
}

/// Trait every tool exposed by the tool-server core must implement.
///
/// Implementations typically close over a `SessionManager` handle and act as
/// a pure function over `(SessionManager, SessionLock, EventLog,
/// UIPromptRegistry)`; this crate only defines the shape, not the
/// session-aware implementations (those live in `mitto-toolserver`, which
/// depends on `mitto-core`).
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for parameters.
    fn parameters_schema(&self) -> Value;
    /// Capability flag in the caller session's `advanced-settings` map
    /// required to invoke this tool. `None` means no flag is required.
    fn required_capability(&self) -> Option<&str> {
        None
    }
    /// `true` for tools a child session (one with `parent_session_id` set)
    /// must never be allowed to call — the recursion guard.
    fn forbidden_for_child_sessions(&self) -> bool {
        false
    }
    /// Execute the tool. Errors should be wrapped in [`ToolOutput::err`].
    async fn execute(&self, call: &ToolCall) -> ToolOutput;
}
