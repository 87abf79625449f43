// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::agent_connection::{AgentConnection, AgentUpdate, StopReason};
use crate::error::{CoreError, CoreResult};
use crate::event::{Event, EventLog, EventSubscription, EventType};
use crate::hooks::{HookPipeline, ResolvedAttachment};
use crate::lock::{LockInfo, LockStatus, SessionLock, DEFAULT_LEASE_SECS};
use crate::periodic::{Frequency, PeriodicPrompt};
use crate::persistence;
use crate::queue::Queue;
use crate::ui_prompt::{UIPromptOutcome, UIPromptRegistry, UIPromptRequest};

/// Coarse lifecycle stage of a session, independent of its lock status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Spawn,
    Attached,
    Prompting,
    Idle,
    Archived,
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub session_id: String,
    pub name: String,
    pub description: String,
    pub acp_server: String,
    pub working_dir: PathBuf,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub archived: bool,
    pub archived_at: Option<DateTime<Utc>>,
    pub parent_session_id: Option<String>,
    #[serde(default)]
    pub advanced_settings: HashMap<String, bool>,
    pub last_user_message_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub event_count: i64,
    #[serde(default = "default_mode")]
    pub mode: String,
}

fn default_mode() -> String {
    "default".to_string()
}

pub struct NewSessionArgs {
    pub session_id: String,
    pub name: String,
    pub description: String,
    pub acp_server: String,
    pub working_dir: PathBuf,
    pub parent_session_id: Option<String>,
    pub queue_max_size: usize,
}

/// The central state machine composing a session's log, lock, queue, hooks,
/// agent connection, and UI-prompt registry.
pub struct Session {
    pub id: String,
    dir: PathBuf,
    metadata: Mutex<SessionMetadata>,
    state: Mutex<SessionState>,
    pub event_log: Arc<EventLog>,
    pub lock: Arc<SessionLock>,
    pub queue: Arc<Queue>,
    pub ui_prompts: Arc<UIPromptRegistry>,
    hooks: Mutex<Arc<HookPipeline>>,
    agent: Mutex<Arc<dyn AgentConnection>>,
    agent_session_id: Mutex<Option<String>>,
    periodic: Mutex<Option<PeriodicPrompt>>,
    turn_done: Notify,
}

impl Session {
    pub fn new(
        args: NewSessionArgs,
        dir: PathBuf,
        hooks: Arc<HookPipeline>,
        agent: Arc<dyn AgentConnection>,
    ) -> CoreResult<Arc<Self>> {
        let now = Utc::now();
        let metadata = SessionMetadata {
            session_id: args.session_id.clone(),
            name: args.name,
            description: args.description,
            acp_server: args.acp_server,
            working_dir: args.working_dir,
            created_at: now,
            updated_at: now,
            archived: false,
            archived_at: None,
            parent_session_id: args.parent_session_id,
            advanced_settings: HashMap::new(),
            last_user_message_at: None,
            event_count: 0,
            mode: default_mode(),
        };
        let event_log = Arc::new(EventLog::open(&dir, &args.session_id)?);
        Ok(Arc::new(Self {
            id: args.session_id,
            dir,
            metadata: Mutex::new(metadata),
            state: Mutex::new(SessionState::Spawn),
            event_log,
            lock: Arc::new(SessionLock::new()),
            queue: Arc::new(Queue::new(args.queue_max_size)),
            ui_prompts: Arc::new(UIPromptRegistry::new()),
            hooks: Mutex::new(hooks),
            agent: Mutex::new(agent),
            agent_session_id: Mutex::new(None),
            periodic: Mutex::new(None),
            turn_done: Notify::new(),
        }))
    }

    async fn persist_periodic(&self) -> CoreResult<()> {
        let periodic = self.periodic.lock().await;
        match periodic.as_ref() {
            Some(p) => persistence::write_json_atomic(&self.dir.join("periodic.json"), p),
            None => persistence::remove_if_exists(&self.dir.join("periodic.json")),
        }
    }

    pub async fn periodic(&self) -> Option<PeriodicPrompt> {
        self.periodic.lock().await.clone()
    }

    pub async fn set_periodic(
        &self,
        prompt_text: impl Into<String>,
        frequency: Frequency,
        enabled: bool,
    ) -> CoreResult<()> {
        frequency.validate()?;
        let mut prompt = PeriodicPrompt::new(prompt_text, frequency)?;
        prompt.enabled = enabled;
        *self.periodic.lock().await = Some(prompt);
        self.persist_periodic().await
    }

    pub async fn clear_periodic(&self) -> CoreResult<()> {
        *self.periodic.lock().await = None;
        self.persist_periodic().await
    }

    /// Submit the periodic prompt through the normal `submit_prompt` path
    /// if the lock is free, or enqueue it if the lock is held — so user
    /// activity pre-empts scheduled activity but nothing is lost. Updates
    /// `last_sent_at`/`next_scheduled_at` regardless of which path is taken.
    pub async fn fire_periodic(&self) -> CoreResult<()> {
        let prompt_text = {
            let periodic = self.periodic.lock().await;
            match periodic.as_ref() {
                Some(p) if p.enabled => p.prompt_text.clone(),
                _ => return Ok(()),
            }
        };

        if self.lock.is_free().await {
            self.submit_prompt(prompt_text, vec![], None).await?;
        } else {
            self.queue_prompt(prompt_text, None).await?;
        }

        let mut periodic = self.periodic.lock().await;
        if let Some(p) = periodic.as_mut() {
            p.mark_fired(Utc::now());
        }
        drop(periodic);
        self.persist_periodic().await
    }

    pub async fn metadata(&self) -> SessionMetadata {
        self.metadata.lock().await.clone()
    }

    pub async fn state(&self) -> SessionState {
        *self.state.lock().await
    }

    async fn persist_metadata(&self) -> CoreResult<()> {
        let metadata = self.metadata.lock().await.clone();
        persistence::write_json_atomic(&self.dir.join("metadata.json"), &metadata)
    }

    /// Establish the agent-side session handle on first use.
    async fn ensure_agent_session(&self) -> CoreResult<String> {
        let mut handle = self.agent_session_id.lock().await;
        if let Some(id) = handle.as_ref() {
            return Ok(id.clone());
        }
        let working_dir = self.metadata.lock().await.working_dir.clone();
        let agent = self.agent.lock().await.clone();
        agent.initialize().await?;
        let new_id = agent.new_session(&working_dir).await?;
        *handle = Some(new_id.clone());
        *self.state.lock().await = SessionState::Attached;
        Ok(new_id)
    }

    /// Replace the agent connection (e.g. after `ResumeSession`) without
    /// losing the event log.
    pub async fn replace_agent_connection(&self, agent: Arc<dyn AgentConnection>) {
        *self.agent.lock().await = agent;
        *self.agent_session_id.lock().await = None;
    }

    pub async fn attach(&self) -> (Vec<Event>, EventSubscription, LockInfo) {
        let (snapshot, sub) = self.event_log.subscribe().await;
        let lock_info = self.lock.status().await;
        (snapshot, sub, lock_info)
    }

    pub async fn submit_prompt(
        &self,
        text: impl Into<String>,
        attachments: Vec<String>,
        submitter_session_id: Option<String>,
    ) -> CoreResult<()> {
        self.ensure_not_archived().await?;
        let is_first_message = self.event_log.is_empty().await;
        self.run_turn(text.into(), attachments, submitter_session_id, is_first_message)
            .await
    }

    pub async fn queue_prompt(
        &self,
        text: impl Into<String>,
        submitter_session_id: Option<String>,
    ) -> CoreResult<usize> {
        self.ensure_not_archived().await?;
        let len = self
            .queue
            .add(text.into(), submitter_session_id, vec![], None)
            .await?;
        self.event_log
            .append(EventType::System, json!({ "kind": "queued", "queue_len": len }))
            .await?;
        Ok(len)
    }

    pub async fn cancel(&self) -> CoreResult<()> {
        let status = self.lock.status().await;
        if status.status != LockStatus::Processing {
            return Err(CoreError::Validation("not-processing".into()));
        }
        let agent_session_id = self
            .agent_session_id
            .lock()
            .await
            .clone()
            .ok_or_else(|| CoreError::FatalToTurn("no active agent session".into()))?;
        let agent = self.agent.lock().await.clone();
        agent.cancel(&agent_session_id).await?;
        Ok(())
    }

    pub async fn set_mode(&self, mode_id: impl Into<String>) -> CoreResult<()> {
        if self.lock.status().await.status == LockStatus::Processing {
            return Err(CoreError::Validation("processing".into()));
        }
        let mode_id = mode_id.into();
        let agent_session_id = self.ensure_agent_session().await?;
        let agent = self.agent.lock().await.clone();
        agent.set_mode(&agent_session_id, &mode_id).await?;
        {
            let mut metadata = self.metadata.lock().await;
            metadata.mode = mode_id.clone();
            metadata.updated_at = Utc::now();
        }
        self.persist_metadata().await?;
        self.event_log
            .append(EventType::CurrentModeUpdate, json!({ "mode_id": mode_id }))
            .await?;
        Ok(())
    }

    pub async fn ask(
        &self,
        request: UIPromptRequest,
        cancellation: &CancellationToken,
    ) -> UIPromptOutcome {
        self.ui_prompts.prompt(&request, cancellation).await
    }

    pub async fn archive(&self) -> CoreResult<()> {
        self.ensure_not_archived().await?;
        let agent = self.agent.lock().await.clone();
        if let Err(err) = agent.shutdown().await {
            warn!(session = %self.id, %err, "agent shutdown during archive failed, archiving anyway");
        }
        {
            let mut metadata = self.metadata.lock().await;
            metadata.archived = true;
            metadata.archived_at = Some(Utc::now());
            metadata.updated_at = Utc::now();
        }
        *self.state.lock().await = SessionState::Archived;
        self.persist_metadata().await
    }

    /// Reactivate an archived session. The caller (`SessionManager`, which
    /// owns the agent-connection factory) must supply a fresh connection.
    pub async fn unarchive(&self, agent: Arc<dyn AgentConnection>) -> CoreResult<()> {
        {
            let metadata = self.metadata.lock().await;
            if !metadata.archived {
                return Err(CoreError::Validation("not archived".into()));
            }
        }
        self.replace_agent_connection(agent).await;
        {
            let mut metadata = self.metadata.lock().await;
            metadata.archived = false;
            metadata.archived_at = None;
            metadata.updated_at = Utc::now();
        }
        *self.state.lock().await = SessionState::Spawn;
        self.persist_metadata().await
    }

    pub async fn wait_for_lock_free(&self, timeout: std::time::Duration) -> bool {
        if self.lock.is_free().await {
            return true;
        }
        let wait = tokio::time::timeout(timeout, self.turn_done.notified());
        matches!(wait.await, Ok(())) || self.lock.is_free().await
    }

    async fn ensure_not_archived(&self) -> CoreResult<()> {
        if self.metadata.lock().await.archived {
            return Err(CoreError::Validation("archived".into()));
        }
        Ok(())
    }

    /// Run a submitted prompt to completion, then drain the queue while the
    /// lock stays free-to-held in the same call, per the control-flow spec.
    async fn run_turn(
        &self,
        mut text: String,
        mut attachments: Vec<String>,
        mut submitter_session_id: Option<String>,
        mut is_first_message: bool,
    ) -> CoreResult<()> {
        loop {
            let token = self
                .lock
                .try_acquire("session", chrono::Duration::seconds(DEFAULT_LEASE_SECS))
                .await
                .ok_or_else(|| CoreError::Resource("session busy".into()))?;

            let workspace_name = None; // resolved by the caller's workspace lookup, not the core.
            let working_dir = self.metadata.lock().await.working_dir.clone();
            let hooks = self.hooks.lock().await.clone();
            let hook_outcome = match hooks
                .apply(&text, &self.id, &working_dir, workspace_name, is_first_message)
                .await
            {
                Ok(outcome) => outcome,
                Err(err) => {
                    self.lock.release(token).await;
                    return Err(err);
                }
            };

            if hook_outcome.text != text {
                self.event_log
                    .append(
                        EventType::System,
                        json!({ "kind": "pre_hook_prompt", "text": text }),
                    )
                    .await?;
            }

            self.event_log
                .append(
                    EventType::UserPrompt,
                    json!({
                        "text": hook_outcome.text,
                        "attachments": attachments,
                        "submitter_session_id": submitter_session_id,
                    }),
                )
                .await?;

            if !self.lock.promote(token).await {
                self.lock.release(token).await;
                return Err(CoreError::FatalToTurn("lock vanished before promote".into()));
            }
            *self.state.lock().await = SessionState::Prompting;

            let resolved_attachments: Vec<ResolvedAttachment> = hook_outcome.attachments;
            let stop_reason = self
                .drive_agent_turn(&hook_outcome.text, &resolved_attachments)
                .await;

            self.lock.release(token).await;
            *self.state.lock().await = SessionState::Idle;
            self.turn_done.notify_waiters();

            {
                let mut metadata = self.metadata.lock().await;
                metadata.last_user_message_at = Some(Utc::now());
                metadata.updated_at = Utc::now();
            }
            self.persist_metadata().await?;

            let _ = stop_reason;

            match self.queue.drain_one().await {
                Some(next) => {
                    text = next.text;
                    attachments = next.attachments;
                    submitter_session_id = next.submitter_session_id;
                    is_first_message = false;
                }
                None => return Ok(()),
            }
        }
    }

    async fn drive_agent_turn(
        &self,
        text: &str,
        attachments: &[ResolvedAttachment],
    ) -> CoreResult<StopReason> {
        let agent_session_id = self.ensure_agent_session().await?;
        let agent = self.agent.lock().await.clone();

        let (tx, mut rx) = mpsc::channel(256);
        let prompt_fut = agent.prompt(&agent_session_id, text, attachments, tx);
        tokio::pin!(prompt_fut);

        let mut buffer = String::new();
        let mut buffer_kind: Option<EventType> = None;

        let outcome = loop {
            tokio::select! {
                biased;
                update = rx.recv() => {
                    if let Some(update) = update {
                        if let Err(err) = self
                            .handle_update(update, &mut buffer, &mut buffer_kind)
                            .await
                        {
                            break Err(err);
                        }
                    }
                }
                result = &mut prompt_fut => {
                    break result;
                }
            }
        };

        self.flush_buffer(&mut buffer, &mut buffer_kind).await?;

        match outcome {
            Ok(stop_reason) => {
                let reason_str = match &stop_reason {
                    StopReason::EndTurn => "end_turn",
                    StopReason::Cancelled => "cancelled",
                    StopReason::Error(_) => "error",
                };
                self.event_log
                    .append(EventType::System, json!({ "stop_reason": reason_str }))
                    .await?;
                if let StopReason::Error(msg) = &stop_reason {
                    error!(session = %self.id, %msg, "agent turn ended in error");
                    self.event_log
                        .append(EventType::Error, json!({ "message": msg }))
                        .await?;
                }
                Ok(stop_reason)
            }
            Err(err) => {
                error!(session = %self.id, %err, "agent connection failed mid-turn");
                self.event_log
                    .append(EventType::Error, json!({ "message": err.to_string() }))
                    .await?;
                self.event_log
                    .append(EventType::System, json!({ "stop_reason": "error" }))
                    .await?;
                Err(err)
            }
        }
    }

    async fn handle_update(
        &self,
        update: AgentUpdate,
        buffer: &mut String,
        buffer_kind: &mut Option<EventType>,
    ) -> CoreResult<()> {
        match update {
            AgentUpdate::AgentMessageChunk(chunk) => {
                self.accumulate(buffer, buffer_kind, EventType::AgentMessage, &chunk)
                    .await?;
            }
            AgentUpdate::AgentThoughtChunk(chunk) => {
                self.accumulate(buffer, buffer_kind, EventType::AgentThought, &chunk)
                    .await?;
            }
            AgentUpdate::ToolCall {
                tool_call_id,
                name,
                args,
            } => {
                self.flush_buffer(buffer, buffer_kind).await?;
                self.event_log
                    .append(
                        EventType::ToolCall,
                        json!({ "tool_call_id": tool_call_id, "name": name, "args": args }),
                    )
                    .await?;
            }
            AgentUpdate::ToolCallUpdate {
                tool_call_id,
                status,
                result,
            } => {
                self.flush_buffer(buffer, buffer_kind).await?;
                self.event_log
                    .append(
                        EventType::ToolCallUpdate,
                        json!({ "tool_call_id": tool_call_id, "status": status, "result": result }),
                    )
                    .await?;
            }
            AgentUpdate::CurrentModeUpdate { mode_id } => {
                self.flush_buffer(buffer, buffer_kind).await?;
                {
                    let mut metadata = self.metadata.lock().await;
                    metadata.mode = mode_id.clone();
                }
                self.event_log
                    .append(EventType::CurrentModeUpdate, json!({ "mode_id": mode_id }))
                    .await?;
            }
        }
        Ok(())
    }

    /// Accumulate consecutive same-kind chunks into a single event, flushing
    /// the buffer first if a different kind is being accumulated.
    async fn accumulate(
        &self,
        buffer: &mut String,
        buffer_kind: &mut Option<EventType>,
        kind: EventType,
        chunk: &str,
    ) -> CoreResult<()> {
        if *buffer_kind != Some(kind) {
            self.flush_buffer(buffer, buffer_kind).await?;
            *buffer_kind = Some(kind);
        }
        buffer.push_str(chunk);
        Ok(())
    }

    async fn flush_buffer(
        &self,
        buffer: &mut String,
        buffer_kind: &mut Option<EventType>,
    ) -> CoreResult<()> {
        if let Some(kind) = buffer_kind.take() {
            if !buffer.is_empty() {
                let text = std::mem::take(buffer);
                self.event_log.append(kind, json!({ "text": text })).await?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("id", &self.id).finish()
    }
}
