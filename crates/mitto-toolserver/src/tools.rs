// SPDX-License-Identifier: Apache-2.0
//! The fixed set of meta-tools exposed to an external orchestrator. Each
//! tool is a pure function over `(SessionManager, SessionLock, EventLog,
//! UIPromptRegistry)` reached through a shared [`ToolContext`] — capability
//! enforcement and `selfID` resolution happen once, in the server layer,
//! before a tool ever sees a call.

use std::sync::Arc;

use async_trait::async_trait;
use mitto_core::{
    CoreError, CreateSessionArgs, Frequency, FrequencyUnit, UIPromptOption, UIPromptOutcome,
    UIPromptRequest, UIPromptType,
};
use mitto_tools::{Tool, ToolCall, ToolOutput};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::context::ToolContext;

fn arg_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}

fn missing_arg(call_id: &str, key: &str) -> ToolOutput {
    ToolOutput::err(call_id, format!("missing required argument: {key}"))
}

fn from_core_error(call_id: &str, err: CoreError) -> ToolOutput {
    ToolOutput::err(call_id, err.to_string())
}

/// Names of every tool registered by [`crate::registry::build_tool_registry`],
/// in the order the handlers are declared below.
pub const META_TOOL_NAMES: &[&str] = &[
    "list_conversations",
    "get_runtime_info",
    "get_config",
    "get_current_session",
    "get_conversation",
    "get_conversation_summary",
    "send_prompt_to_conversation",
    "ui_ask_yes_no",
    "ui_options_buttons",
    "ui_options_combo",
    "conversation_start",
    "set_periodic",
    "archive",
];

// ── list_conversations ──────────────────────────────────────────────────────

pub struct ListConversationsTool(pub Arc<ToolContext>);

#[async_trait]
impl Tool for ListConversationsTool {
    fn name(&self) -> &str {
        "list_conversations"
    }
    fn description(&self) -> &str {
        "List every currently running conversation (session) known to this host."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "self_id": { "type": "string" } },
            "required": ["self_id"]
        })
    }
    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let metas = self.0.manager.list_running().await;
        let out: Vec<Value> = metas
            .into_iter()
            .map(|m| {
                json!({
                    "id": m.session_id,
                    "name": m.name,
                    "description": m.description,
                    "acp_server": m.acp_server,
                    "archived": m.archived,
                    "parent_session_id": m.parent_session_id,
                    "last_user_message_at": m.last_user_message_at,
                })
            })
            .collect();
        ToolOutput::ok(&call.id, Value::Array(out).to_string())
    }
}

// ── get_runtime_info ────────────────────────────────────────────────────────

pub struct GetRuntimeInfoTool(pub Arc<ToolContext>);

#[async_trait]
impl Tool for GetRuntimeInfoTool {
    fn name(&self) -> &str {
        "get_runtime_info"
    }
    fn description(&self) -> &str {
        "Report this mitto process's version, uptime, and pid."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "self_id": { "type": "string" } },
            "required": ["self_id"]
        })
    }
    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let uptime = chrono::Utc::now() - self.0.started_at;
        let body = json!({
            "version": env!("CARGO_PKG_VERSION"),
            "uptime_seconds": uptime.num_seconds().max(0),
            "pid": std::process::id(),
        });
        ToolOutput::ok(&call.id, body.to_string())
    }
}

// ── get_config ───────────────────────────────────────────────────────────

pub struct GetConfigTool(pub Arc<ToolContext>);

#[async_trait]
impl Tool for GetConfigTool {
    fn name(&self) -> &str {
        "get_config"
    }
    fn description(&self) -> &str {
        "Return the resolved, merged mitto configuration."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "self_id": { "type": "string" } },
            "required": ["self_id"]
        })
    }
    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        match serde_json::to_value(self.0.config.as_ref()) {
            Ok(v) => ToolOutput::ok(&call.id, v.to_string()),
            Err(err) => ToolOutput::err(&call.id, err.to_string()),
        }
    }
}

// ── get_current_session (resolveSelfID) ─────────────────────────────────────

pub struct GetCurrentSessionTool(pub Arc<ToolContext>);

#[async_trait]
impl Tool for GetCurrentSessionTool {
    fn name(&self) -> &str {
        "get_current_session"
    }
    fn description(&self) -> &str {
        "Resolve the caller's own session id and return its metadata."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "self_id": { "type": "string" } },
            "required": ["self_id"]
        })
    }
    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let Some(self_id) = arg_str(&call.args, "self_id") else {
            return missing_arg(&call.id, "self_id");
        };
        // The server layer already resolved self_id to the real session id
        // before dispatching, so a direct lookup suffices here.
        match self.0.manager.get(self_id).await {
            Some(session) => {
                let meta = session.metadata().await;
                ToolOutput::ok(&call.id, json!(meta).to_string())
            }
            None => ToolOutput::err(&call.id, format!("session {self_id} not found")),
        }
    }
}

// ── get_conversation ─────────────────────────────────────────────────────

pub struct GetConversationTool(pub Arc<ToolContext>);

#[async_trait]
impl Tool for GetConversationTool {
    fn name(&self) -> &str {
        "get_conversation"
    }
    fn description(&self) -> &str {
        "Return a conversation's metadata and full event history."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "self_id": { "type": "string" },
                "conversation_id": { "type": "string" }
            },
            "required": ["self_id", "conversation_id"]
        })
    }
    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let Some(conversation_id) = arg_str(&call.args, "conversation_id") else {
            return missing_arg(&call.id, "conversation_id");
        };
        let Some(session) = self.0.manager.get(conversation_id).await else {
            return ToolOutput::err(&call.id, format!("conversation {conversation_id} not found"));
        };
        let meta = session.metadata().await;
        let events = session.event_log.read(0).await;
        let body = json!({ "metadata": meta, "events": events });
        ToolOutput::ok(&call.id, body.to_string())
    }
}

// ── get_conversation_summary ───────────────────────────────────────────────

pub struct GetConversationSummaryTool(pub Arc<ToolContext>);

#[async_trait]
impl Tool for GetConversationSummaryTool {
    fn name(&self) -> &str {
        "get_conversation_summary"
    }
    fn description(&self) -> &str {
        "Return a conversation's metadata and lock status, without its full event history."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "self_id": { "type": "string" },
                "conversation_id": { "type": "string" }
            },
            "required": ["self_id", "conversation_id"]
        })
    }
    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let Some(conversation_id) = arg_str(&call.args, "conversation_id") else {
            return missing_arg(&call.id, "conversation_id");
        };
        let Some(session) = self.0.manager.get(conversation_id).await else {
            return ToolOutput::err(&call.id, format!("conversation {conversation_id} not found"));
        };
        let meta = session.metadata().await;
        let lock = session.lock.status().await;
        let body = json!({ "metadata": meta, "lock": lock, "event_count": session.event_log.len().await });
        ToolOutput::ok(&call.id, body.to_string())
    }
}

// ── send_prompt_to_conversation ─────────────────────────────────────────────

pub struct SendPromptToConversationTool(pub Arc<ToolContext>);

#[async_trait]
impl Tool for SendPromptToConversationTool {
    fn name(&self) -> &str {
        "send_prompt_to_conversation"
    }
    fn description(&self) -> &str {
        "Submit a prompt to another conversation, queuing it if that conversation is busy."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "self_id": { "type": "string" },
                "conversation_id": { "type": "string" },
                "text": { "type": "string" }
            },
            "required": ["self_id", "conversation_id", "text"]
        })
    }
    fn required_capability(&self) -> Option<&str> {
        Some("send-prompt-to-another-conversation")
    }
    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let Some(self_id) = arg_str(&call.args, "self_id") else {
            return missing_arg(&call.id, "self_id");
        };
        let Some(conversation_id) = arg_str(&call.args, "conversation_id") else {
            return missing_arg(&call.id, "conversation_id");
        };
        let Some(text) = arg_str(&call.args, "text") else {
            return missing_arg(&call.id, "text");
        };
        let Some(target) = self.0.manager.get(conversation_id).await else {
            return ToolOutput::err(&call.id, format!("conversation {conversation_id} not found"));
        };

        let result = if target.lock.is_free().await {
            target.submit_prompt(text, vec![], Some(self_id.to_string())).await
        } else {
            target
                .queue_prompt(text, Some(self_id.to_string()))
                .await
                .map(|_| ())
        };
        match result {
            Ok(()) => ToolOutput::ok(&call.id, json!({ "delivered": true }).to_string()),
            Err(err) => from_core_error(&call.id, err),
        }
    }
}

// ── ui_ask_yes_no / ui_options_buttons / ui_options_combo ───────────────────

async fn run_ui_prompt(
    ctx: &ToolContext,
    call: &ToolCall,
    self_id: &str,
    prompt_type: UIPromptType,
    question: String,
    options: Vec<UIPromptOption>,
) -> ToolOutput {
    let Some(session) = ctx.manager.get(self_id).await else {
        return ToolOutput::err(&call.id, format!("session {self_id} not found"));
    };
    let timeout_seconds = call
        .args
        .get("timeout_seconds")
        .and_then(Value::as_u64)
        .unwrap_or(mitto_core::ui_prompt::DEFAULT_TIMEOUT_SECS);
    let request = UIPromptRequest {
        request_id: Uuid::new_v4().to_string(),
        prompt_type,
        question,
        options,
        timeout_seconds,
        blocking: true,
        persistent: false,
        tool_call_id: Some(call.id.clone()),
    };
    let outcome = session.ask(request, &CancellationToken::new()).await;
    let body = match outcome {
        UIPromptOutcome::Answered(answer) => json!({ "outcome": "answered", "answer": answer }),
        UIPromptOutcome::TimedOut => json!({ "outcome": "timed_out" }),
        UIPromptOutcome::Cancelled => json!({ "outcome": "cancelled" }),
        UIPromptOutcome::Superseded => json!({ "outcome": "superseded" }),
        UIPromptOutcome::Dismissed => json!({ "outcome": "dismissed" }),
    };
    ToolOutput::ok(&call.id, body.to_string())
}

pub struct UiAskYesNoTool(pub Arc<ToolContext>);

#[async_trait]
impl Tool for UiAskYesNoTool {
    fn name(&self) -> &str {
        "ui_ask_yes_no"
    }
    fn description(&self) -> &str {
        "Ask the human a blocking yes/no question."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "self_id": { "type": "string" },
                "question": { "type": "string" },
                "timeout_seconds": { "type": "integer" }
            },
            "required": ["self_id", "question"]
        })
    }
    fn required_capability(&self) -> Option<&str> {
        Some("ask-user")
    }
    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let Some(self_id) = arg_str(&call.args, "self_id") else {
            return missing_arg(&call.id, "self_id");
        };
        let Some(question) = arg_str(&call.args, "question") else {
            return missing_arg(&call.id, "question");
        };
        let options = vec![
            UIPromptOption {
                id: "yes".into(),
                label: "Yes".into(),
                response: Some("yes".into()),
                kind: None,
                style: None,
            },
            UIPromptOption {
                id: "no".into(),
                label: "No".into(),
                response: Some("no".into()),
                kind: None,
                style: None,
            },
        ];
        run_ui_prompt(
            &self.0,
            call,
            self_id,
            UIPromptType::YesNo,
            question.to_string(),
            options,
        )
        .await
    }
}

pub struct UiOptionsButtonsTool(pub Arc<ToolContext>);

#[async_trait]
impl Tool for UiOptionsButtonsTool {
    fn name(&self) -> &str {
        "ui_options_buttons"
    }
    fn description(&self) -> &str {
        "Present the human with a blocking set of button choices."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "self_id": { "type": "string" },
                "question": { "type": "string" },
                "options": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "id": { "type": "string" },
                            "label": { "type": "string" }
                        },
                        "required": ["id", "label"]
                    }
                }
            },
            "required": ["self_id", "question", "options"]
        })
    }
    fn required_capability(&self) -> Option<&str> {
        Some("ask-user")
    }
    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let Some(self_id) = arg_str(&call.args, "self_id") else {
            return missing_arg(&call.id, "self_id");
        };
        let Some(question) = arg_str(&call.args, "question") else {
            return missing_arg(&call.id, "question");
        };
        let options = match parse_options(&call.args) {
            Ok(opts) => opts,
            Err(msg) => return ToolOutput::err(&call.id, msg),
        };
        run_ui_prompt(
            &self.0,
            call,
            self_id,
            UIPromptType::OptionsButtons,
            question.to_string(),
            options,
        )
        .await
    }
}

pub struct UiOptionsComboTool(pub Arc<ToolContext>);

#[async_trait]
impl Tool for UiOptionsComboTool {
    fn name(&self) -> &str {
        "ui_options_combo"
    }
    fn description(&self) -> &str {
        "Present the human with a blocking dropdown/combo selection."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "self_id": { "type": "string" },
                "question": { "type": "string" },
                "options": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "id": { "type": "string" },
                            "label": { "type": "string" }
                        },
                        "required": ["id", "label"]
                    }
                }
            },
            "required": ["self_id", "question", "options"]
        })
    }
    fn required_capability(&self) -> Option<&str> {
        Some("ask-user")
    }
    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let Some(self_id) = arg_str(&call.args, "self_id") else {
            return missing_arg(&call.id, "self_id");
        };
        let Some(question) = arg_str(&call.args, "question") else {
            return missing_arg(&call.id, "question");
        };
        let options = match parse_options(&call.args) {
            Ok(opts) => opts,
            Err(msg) => return ToolOutput::err(&call.id, msg),
        };
        run_ui_prompt(
            &self.0,
            call,
            self_id,
            UIPromptType::Select,
            question.to_string(),
            options,
        )
        .await
    }
}

fn parse_options(args: &Value) -> Result<Vec<UIPromptOption>, String> {
    let raw = args
        .get("options")
        .and_then(Value::as_array)
        .ok_or_else(|| "missing required argument: options".to_string())?;
    raw.iter()
        .map(|o| {
            let id = o
                .get("id")
                .and_then(Value::as_str)
                .ok_or("each option requires an id")?;
            let label = o
                .get("label")
                .and_then(Value::as_str)
                .ok_or("each option requires a label")?;
            Ok(UIPromptOption {
                id: id.to_string(),
                label: label.to_string(),
                response: Some(id.to_string()),
                kind: None,
                style: None,
            })
        })
        .collect::<Result<Vec<_>, &str>>()
        .map_err(str::to_string)
}

// ── conversation_start ──────────────────────────────────────────────────────

pub struct ConversationStartTool(pub Arc<ToolContext>);

#[async_trait]
impl Tool for ConversationStartTool {
    fn name(&self) -> &str {
        "conversation_start"
    }
    fn description(&self) -> &str {
        "Start a new child conversation bound to an ACP agent server."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "self_id": { "type": "string" },
                "name": { "type": "string" },
                "description": { "type": "string" },
                "acp_server": { "type": "string" },
                "working_dir": { "type": "string" }
            },
            "required": ["self_id", "name", "acp_server", "working_dir"]
        })
    }
    fn required_capability(&self) -> Option<&str> {
        Some("start-child-conversation")
    }
    fn forbidden_for_child_sessions(&self) -> bool {
        true
    }
    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let Some(self_id) = arg_str(&call.args, "self_id") else {
            return missing_arg(&call.id, "self_id");
        };
        let Some(name) = arg_str(&call.args, "name") else {
            return missing_arg(&call.id, "name");
        };
        let Some(acp_server) = arg_str(&call.args, "acp_server") else {
            return missing_arg(&call.id, "acp_server");
        };
        let Some(working_dir) = arg_str(&call.args, "working_dir") else {
            return missing_arg(&call.id, "working_dir");
        };
        let description = arg_str(&call.args, "description").unwrap_or_default();

        let result = self
            .0
            .manager
            .create(CreateSessionArgs {
                name: name.to_string(),
                description: description.to_string(),
                acp_server: acp_server.to_string(),
                working_dir: working_dir.into(),
                parent_session_id: Some(self_id.to_string()),
            })
            .await;
        match result {
            Ok(session) => ToolOutput::ok(&call.id, json!({ "conversation_id": session.id }).to_string()),
            Err(err) => from_core_error(&call.id, err),
        }
    }
}

// ── set_periodic ─────────────────────────────────────────────────────────

pub struct SetPeriodicTool(pub Arc<ToolContext>);

#[async_trait]
impl Tool for SetPeriodicTool {
    fn name(&self) -> &str {
        "set_periodic"
    }
    fn description(&self) -> &str {
        "Configure (or clear) the caller's own periodic prompt schedule."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "self_id": { "type": "string" },
                "prompt_text": { "type": "string" },
                "frequency_value": { "type": "integer" },
                "frequency_unit": { "type": "string", "enum": ["minutes", "hours", "days"] },
                "at": { "type": "string" },
                "enabled": { "type": "boolean" },
                "clear": { "type": "boolean" }
            },
            "required": ["self_id"]
        })
    }
    fn required_capability(&self) -> Option<&str> {
        Some("set-periodic")
    }
    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let Some(self_id) = arg_str(&call.args, "self_id") else {
            return missing_arg(&call.id, "self_id");
        };
        let Some(session) = self.0.manager.get(self_id).await else {
            return ToolOutput::err(&call.id, format!("session {self_id} not found"));
        };

        if call.args.get("clear").and_then(Value::as_bool).unwrap_or(false) {
            return match session.clear_periodic().await {
                Ok(()) => ToolOutput::ok(&call.id, json!({ "cleared": true }).to_string()),
                Err(err) => from_core_error(&call.id, err),
            };
        }

        let Some(prompt_text) = arg_str(&call.args, "prompt_text") else {
            return missing_arg(&call.id, "prompt_text");
        };
        let unit = match arg_str(&call.args, "frequency_unit") {
            Some("minutes") => FrequencyUnit::Minutes,
            Some("hours") => FrequencyUnit::Hours,
            Some("days") => FrequencyUnit::Days,
            Some(other) => return ToolOutput::err(&call.id, format!("unknown frequency_unit: {other}")),
            None => return missing_arg(&call.id, "frequency_unit"),
        };
        let Some(value) = call.args.get("frequency_value").and_then(Value::as_u64) else {
            return missing_arg(&call.id, "frequency_value");
        };
        let frequency = Frequency {
            value: value as u32,
            unit,
            at: arg_str(&call.args, "at").map(str::to_string),
        };
        let enabled = call.args.get("enabled").and_then(Value::as_bool).unwrap_or(true);

        match session.set_periodic(prompt_text, frequency, enabled).await {
            Ok(()) => ToolOutput::ok(&call.id, json!({ "scheduled": true }).to_string()),
            Err(err) => from_core_error(&call.id, err),
        }
    }
}

// ── archive ──────────────────────────────────────────────────────────────

pub struct ArchiveTool(pub Arc<ToolContext>);

#[async_trait]
impl Tool for ArchiveTool {
    fn name(&self) -> &str {
        "archive"
    }
    fn description(&self) -> &str {
        "Archive a conversation (defaults to the caller's own), shutting down its agent connection."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "self_id": { "type": "string" },
                "conversation_id": { "type": "string" }
            },
            "required": ["self_id"]
        })
    }
    fn required_capability(&self) -> Option<&str> {
        Some("archive")
    }
    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let Some(self_id) = arg_str(&call.args, "self_id") else {
            return missing_arg(&call.id, "self_id");
        };
        let target_id = arg_str(&call.args, "conversation_id").unwrap_or(self_id);
        let Some(session) = self.0.manager.get(target_id).await else {
            return ToolOutput::err(&call.id, format!("conversation {target_id} not found"));
        };
        match session.archive().await {
            Ok(()) => ToolOutput::ok(&call.id, json!({ "archived": true }).to_string()),
            Err(err) => from_core_error(&call.id, err),
        }
    }
}
