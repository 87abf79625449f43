// SPDX-License-Identifier: Apache-2.0
//! A concrete `AgentConnection` that drives one ACP-compliant coding-agent
//! subprocess over the real wire protocol.
//!
//! `agent_client_protocol`'s `ClientSideConnection` pumps its I/O with
//! `tokio::task::spawn_local`, so its futures are `!Send`. The whole
//! connection therefore lives on a dedicated OS thread running a
//! current-thread runtime and a `LocalSet`; everything in this file talks
//! to that thread over a command channel and gets a reply back, so the
//! public `AgentConnection` impl itself is an ordinary `Send + Sync` type.

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};

use agent_client_protocol::{
    Agent as _, CancelNotification, ClientCapabilities, ClientSideConnection, ContentBlock, Implementation,
    InitializeRequest, LoadSessionRequest, NewSessionRequest, PermissionOptionId, PromptRequest,
    ProtocolVersion, RequestPermissionOutcome, RequestPermissionRequest, RequestPermissionResponse,
    SelectedPermissionOutcome, SessionId, SessionNotification, SessionUpdate, SetSessionModeRequest,
    StopReason as AcpStopReason, TextContent, ImageContent,
};
use async_trait::async_trait;
use base64::Engine;
use mitto_core::{AgentConnection, AgentUpdate, CoreError, CoreResult, ResolvedAttachment, StopReason};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tokio_util::compat::{TokioAsyncReadCompatExt, TokioAsyncWriteCompatExt};
use tracing::{debug, warn};

use crate::error::ConnectionError;

/// How to spawn the agent subprocess: one per configured `acp_servers` entry.
#[derive(Debug, Clone)]
pub struct AgentSpawnSpec {
    pub command: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl AgentSpawnSpec {
    pub fn new(command: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            env: Vec::new(),
        }
    }
}

enum Op {
    NewSession {
        working_dir: PathBuf,
        reply: oneshot::Sender<CoreResult<String>>,
    },
    ResumeSession {
        agent_session_id: String,
        reply: oneshot::Sender<CoreResult<()>>,
    },
    Prompt {
        agent_session_id: String,
        text: String,
        attachments: Vec<ResolvedAttachment>,
        updates: mpsc::Sender<AgentUpdate>,
        reply: oneshot::Sender<CoreResult<StopReason>>,
    },
    Cancel {
        agent_session_id: String,
        reply: oneshot::Sender<CoreResult<()>>,
    },
    SetMode {
        agent_session_id: String,
        mode_id: String,
        reply: oneshot::Sender<CoreResult<()>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// One live ACP subprocess. Implements `mitto_core::AgentConnection` by
/// forwarding every call to a dedicated worker thread that owns the actual
/// `ClientSideConnection`.
pub struct AcpConnection {
    ops: mpsc::Sender<Op>,
    unusable: std::sync::Arc<AtomicBool>,
    worker: std::sync::Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl AcpConnection {
    /// Spawn `spec` and bring up the ACP handshake. Returns once the agent
    /// has acknowledged `initialize`.
    pub async fn spawn(spec: AgentSpawnSpec) -> Result<Self, ConnectionError> {
        let (ops_tx, ops_rx) = mpsc::channel::<Op>(8);
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<(), String>>();
        let unusable = std::sync::Arc::new(AtomicBool::new(false));
        let unusable_for_thread = unusable.clone();

        let worker = std::thread::spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                Ok(rt) => rt,
                Err(err) => {
                    let _ = ready_tx.send(Err(format!("failed to build worker runtime: {err}")));
                    return;
                }
            };
            let local_set = tokio::task::LocalSet::new();
            local_set.block_on(&runtime, async move {
                run_worker(spec, ops_rx, ready_tx, unusable_for_thread).await;
            });
        });

        let ready = tokio::task::spawn_blocking(move || ready_rx.recv())
            .await
            .map_err(|e| ConnectionError::Spawn(format!("worker thread join error: {e}")))?
            .map_err(|_| ConnectionError::Spawn("worker thread exited before ready".into()))?;
        ready.map_err(ConnectionError::Handshake)?;

        Ok(Self {
            ops: ops_tx,
            unusable,
            worker: std::sync::Mutex::new(Some(worker)),
        })
    }

    async fn call<T>(&self, build: impl FnOnce(oneshot::Sender<CoreResult<T>>) -> Op) -> CoreResult<T> {
        let (reply, rx) = oneshot::channel();
        self.ops
            .send(build(reply))
            .await
            .map_err(|_| CoreError::from(ConnectionError::WorkerGone))?;
        rx.await.map_err(|_| CoreError::from(ConnectionError::WorkerGone))?
    }
}

#[async_trait]
impl AgentConnection for AcpConnection {
    async fn initialize(&self) -> CoreResult<()> {
        // The handshake already ran in `spawn`; nothing further to do.
        Ok(())
    }

    async fn new_session(&self, working_dir: &Path) -> CoreResult<String> {
        self.call(|reply| Op::NewSession {
            working_dir: working_dir.to_path_buf(),
            reply,
        })
        .await
    }

    async fn resume_session(&self, agent_session_id: &str) -> CoreResult<()> {
        self.call(|reply| Op::ResumeSession {
            agent_session_id: agent_session_id.to_string(),
            reply,
        })
        .await
    }

    async fn prompt(
        &self,
        agent_session_id: &str,
        text: &str,
        attachments: &[ResolvedAttachment],
        updates: mpsc::Sender<AgentUpdate>,
    ) -> CoreResult<StopReason> {
        let result = self
            .call(|reply| Op::Prompt {
                agent_session_id: agent_session_id.to_string(),
                text: text.to_string(),
                attachments: attachments.to_vec(),
                updates,
                reply,
            })
            .await;
        if matches!(result, Err(CoreError::FatalToSession(_))) {
            self.unusable.store(true, Ordering::SeqCst);
        }
        result
    }

    async fn cancel(&self, agent_session_id: &str) -> CoreResult<()> {
        self.call(|reply| Op::Cancel {
            agent_session_id: agent_session_id.to_string(),
            reply,
        })
        .await
    }

    async fn set_mode(&self, agent_session_id: &str, mode_id: &str) -> CoreResult<()> {
        self.call(|reply| Op::SetMode {
            agent_session_id: agent_session_id.to_string(),
            mode_id: mode_id.to_string(),
            reply,
        })
        .await
    }

    async fn shutdown(&self) -> CoreResult<()> {
        let (reply, rx) = oneshot::channel();
        let _ = self.ops.send(Op::Shutdown { reply }).await;
        let _ = rx.await;
        let handle = self.worker.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = tokio::task::spawn_blocking(move || handle.join()).await;
        }
        Ok(())
    }

    fn is_unusable(&self) -> bool {
        self.unusable.load(Ordering::SeqCst)
    }
}

/// The `agent_client_protocol::Client` side: receives notifications the
/// agent pushes back at us during a turn. Lives entirely inside the
/// worker's `LocalSet`, so it is free to hold `!Send` state.
struct BridgeClient {
    active_updates: Rc<RefCell<Option<mpsc::Sender<AgentUpdate>>>>,
}

#[async_trait(?Send)]
impl agent_client_protocol::Client for BridgeClient {
    async fn request_permission(
        &self,
        args: RequestPermissionRequest,
    ) -> agent_client_protocol::Result<RequestPermissionResponse> {
        // The operator already consented to running this agent subprocess
        // by configuring it; auto-approve its own internal tool-use asks
        // rather than surfacing a second prompt on top of mitto's own
        // UI-prompt/tool-approval machinery.
        debug!(?args, "auto-approving ACP permission request");
        let option_id = args
            .options
            .first()
            .map(|opt| opt.option_id.clone())
            .unwrap_or_else(|| PermissionOptionId::new("approve"));
        Ok(RequestPermissionResponse::new(RequestPermissionOutcome::Selected(
            SelectedPermissionOutcome::new(option_id),
        )))
    }

    async fn session_notification(&self, notification: SessionNotification) -> agent_client_protocol::Result<()> {
        let Some(tx) = self.active_updates.borrow().clone() else {
            return Ok(());
        };
        if let Some(update) = translate_update(&notification.update) {
            let _ = tx.send(update).await;
        }
        Ok(())
    }
}

fn translate_update(update: &SessionUpdate) -> Option<AgentUpdate> {
    match update {
        SessionUpdate::AgentMessageChunk(chunk) => {
            text_of(&chunk.content).map(AgentUpdate::AgentMessageChunk)
        }
        SessionUpdate::AgentThoughtChunk(chunk) => {
            text_of(&chunk.content).map(AgentUpdate::AgentThoughtChunk)
        }
        SessionUpdate::ToolCall(tool_call) => Some(AgentUpdate::ToolCall {
            tool_call_id: tool_call.tool_call_id.0.to_string(),
            name: tool_call.title.clone(),
            args: serde_json::to_value(tool_call).unwrap_or(serde_json::Value::Null),
        }),
        SessionUpdate::ToolCallUpdate(update) => Some(AgentUpdate::ToolCallUpdate {
            tool_call_id: update.tool_call_id.0.to_string(),
            status: update
                .fields
                .status
                .as_ref()
                .map(|s| format!("{s:?}").to_lowercase())
                .unwrap_or_else(|| "unknown".to_string()),
            result: serde_json::to_value(&update.fields).ok(),
        }),
        SessionUpdate::CurrentModeUpdate(mode) => Some(AgentUpdate::CurrentModeUpdate {
            mode_id: mode.current_mode_id.0.to_string(),
        }),
        _ => {
            debug!(?update, "ignoring unhandled session update kind");
            None
        }
    }
}

fn text_of(block: &ContentBlock) -> Option<String> {
    match block {
        ContentBlock::Text(text) => Some(text.text.clone()),
        _ => None,
    }
}

/// Best-effort mapping of a file name to an image mime type, used only to
/// decide whether an attachment can be sent as an ACP `ContentBlock::Image`
/// instead of an inlined text block.
fn guess_image_mime(name: &str) -> Option<&'static str> {
    let ext = Path::new(name).extension()?.to_str()?.to_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

fn attachment_to_block(att: &ResolvedAttachment) -> ContentBlock {
    match guess_image_mime(&att.name) {
        Some(mime) => {
            ContentBlock::Image(ImageContent::new(att.content_base64.clone(), mime).uri(att.name.clone()))
        }
        None => match base64::engine::general_purpose::STANDARD
            .decode(&att.content_base64)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
        {
            Some(text) => ContentBlock::Text(TextContent::new(format!(
                "[attachment: {}]\n```\n{}\n```",
                att.name, text
            ))),
            None => ContentBlock::Text(TextContent::new(format!(
                "[attachment: {}] (binary, not inlined)",
                att.name
            ))),
        },
    }
}

fn map_stop_reason(reason: AcpStopReason) -> StopReason {
    match reason {
        AcpStopReason::EndTurn => StopReason::EndTurn,
        AcpStopReason::Cancelled => StopReason::Cancelled,
        other => StopReason::Error(format!("{other:?}")),
    }
}

async fn run_worker(
    spec: AgentSpawnSpec,
    mut ops: mpsc::Receiver<Op>,
    ready: std::sync::mpsc::Sender<Result<(), String>>,
    unusable: std::sync::Arc<AtomicBool>,
) {
    let mut cmd = Command::new(&spec.command);
    cmd.args(&spec.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);
    for (key, value) in &spec.env {
        cmd.env(key, value);
    }

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(err) => {
            let _ = ready.send(Err(format!("failed to spawn agent: {err}")));
            return;
        }
    };

    let Some(stdin) = child.stdin.take() else {
        let _ = ready.send(Err("agent did not expose stdin".into()));
        return;
    };
    let Some(stdout) = child.stdout.take() else {
        let _ = ready.send(Err("agent did not expose stdout".into()));
        return;
    };

    let active_updates: Rc<RefCell<Option<mpsc::Sender<AgentUpdate>>>> = Rc::new(RefCell::new(None));
    let client = BridgeClient {
        active_updates: active_updates.clone(),
    };

    let (connection, io_future) = ClientSideConnection::new(client, stdin.compat_write(), stdout.compat(), |fut| {
        tokio::task::spawn_local(fut);
    });
    tokio::task::spawn_local(async move {
        if let Err(err) = io_future.await {
            warn!(%err, "ACP connection IO loop ended with an error");
        }
    });

    let init_request = InitializeRequest::new(ProtocolVersion::LATEST)
        .client_capabilities(ClientCapabilities::default())
        .client_info(Implementation::new("mitto", env!("CARGO_PKG_VERSION")));
    if let Err(err) = connection.initialize(init_request).await {
        let _ = ready.send(Err(format!("ACP initialize failed: {err}")));
        let _ = child.kill().await;
        return;
    }
    let _ = ready.send(Ok(()));

    let mut working_dir: Option<PathBuf> = None;
    while let Some(op) = ops.recv().await {
        match op {
            Op::NewSession { working_dir: dir, reply } => {
                let result = connection
                    .new_session(NewSessionRequest::new(dir.clone()))
                    .await
                    .map(|resp| resp.session_id.0.to_string())
                    .map_err(|err| CoreError::from(ConnectionError::Protocol(err.to_string())));
                if result.is_ok() {
                    working_dir = Some(dir);
                }
                let _ = reply.send(result);
            }
            Op::ResumeSession { agent_session_id, reply } => {
                let dir = working_dir.clone().unwrap_or_else(|| {
                    std::env::current_dir().unwrap_or_default()
                });
                let result = connection
                    .load_session(LoadSessionRequest::new(SessionId::new(agent_session_id), dir))
                    .await
                    .map(|_| ())
                    .map_err(|err| CoreError::from(ConnectionError::Protocol(err.to_string())));
                let _ = reply.send(result);
            }
            Op::Prompt {
                agent_session_id,
                text,
                attachments,
                updates,
                reply,
            } => {
                *active_updates.borrow_mut() = Some(updates);
                let mut blocks = vec![ContentBlock::Text(TextContent::new(text))];
                blocks.extend(attachments.iter().map(attachment_to_block));
                let prompt_request = PromptRequest::new(SessionId::new(agent_session_id), blocks);
                let result = connection
                    .prompt(prompt_request)
                    .await
                    .map(|resp| map_stop_reason(resp.stop_reason))
                    .map_err(|err| {
                        unusable.store(true, Ordering::SeqCst);
                        CoreError::from(ConnectionError::Protocol(err.to_string()))
                    });
                *active_updates.borrow_mut() = None;
                let _ = reply.send(result);
            }
            Op::Cancel { agent_session_id, reply } => {
                let result = connection
                    .cancel(CancelNotification::new(SessionId::new(agent_session_id)))
                    .await
                    .map_err(|err| CoreError::from(ConnectionError::Protocol(err.to_string())));
                let _ = reply.send(result);
            }
            Op::SetMode {
                agent_session_id,
                mode_id,
                reply,
            } => {
                let result = connection
                    .set_session_mode(SetSessionModeRequest::new(SessionId::new(agent_session_id), mode_id))
                    .await
                    .map(|_| ())
                    .map_err(|err| CoreError::from(ConnectionError::Protocol(err.to_string())));
                let _ = reply.send(result);
            }
            Op::Shutdown { reply } => {
                let _ = child.kill().await;
                let _ = reply.send(());
                break;
            }
        }
    }
}
