// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::agent_connection::AgentConnection;
use crate::error::{CoreError, CoreResult};
use crate::hooks::HookPipeline;
use crate::persistence;
use crate::session::{NewSessionArgs, Session, SessionMetadata};

/// Factory closure the manager uses to spawn a fresh [`AgentConnection`]
/// for a named ACP server — supplied by the binary's composition root
/// (which knows how to launch the configured subprocess).
pub type AgentConnectionFactory =
    Arc<dyn Fn(&str) -> CoreResult<Arc<dyn AgentConnection>> + Send + Sync>;

/// Generate a timestamp-derived, collision-resistant session id.
pub fn new_session_id() -> String {
    format!("{}-{}", chrono::Utc::now().format("%Y%m%dT%H%M%S%6f"), Uuid::new_v4())
}

pub struct CreateSessionArgs {
    pub name: String,
    pub description: String,
    pub acp_server: String,
    pub working_dir: PathBuf,
    pub parent_session_id: Option<String>,
}

/// Directory of live [`Session`]s plus the on-disk archive of
/// inactive/archived ones. Supplies the dependencies tool handlers need.
pub struct SessionManager {
    state_dir: PathBuf,
    queue_max_size: usize,
    hooks: Arc<HookPipeline>,
    agent_factory: AgentConnectionFactory,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionManager {
    pub fn new(
        state_dir: PathBuf,
        queue_max_size: usize,
        hooks: Arc<HookPipeline>,
        agent_factory: AgentConnectionFactory,
    ) -> Self {
        Self {
            state_dir,
            queue_max_size,
            hooks,
            agent_factory,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    fn session_dir(&self, id: &str) -> PathBuf {
        self.state_dir.join("sessions").join(id)
    }

    pub async fn create(&self, args: CreateSessionArgs) -> CoreResult<Arc<Session>> {
        if let Some(parent_id) = &args.parent_session_id {
            if !self.sessions.read().await.contains_key(parent_id) {
                return Err(CoreError::NotFound(format!(
                    "parent session {parent_id} not found"
                )));
            }
        }

        let session_id = new_session_id();
        let agent = (self.agent_factory)(&args.acp_server)?;
        let session = Session::new(
            NewSessionArgs {
                session_id: session_id.clone(),
                name: args.name,
                description: args.description,
                acp_server: args.acp_server,
                working_dir: args.working_dir,
                parent_session_id: args.parent_session_id,
                queue_max_size: self.queue_max_size,
            },
            self.session_dir(&session_id),
            self.hooks.clone(),
            agent,
        )?;

        self.sessions.write().await.insert(session_id, session.clone());
        Ok(session)
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn list_running(&self) -> Vec<SessionMetadata> {
        let sessions = self.sessions.read().await;
        let mut metas = Vec::with_capacity(sessions.len());
        for session in sessions.values() {
            metas.push(session.metadata().await);
        }
        metas.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        metas
    }

    /// Reactivate an archived session, or load one from the on-disk archive
    /// that isn't currently in memory.
    pub async fn resume(
        &self,
        id: &str,
        name: Option<String>,
        working_dir: Option<PathBuf>,
    ) -> CoreResult<Arc<Session>> {
        if let Some(session) = self.get(id).await {
            let metadata = session.metadata().await;
            let agent = (self.agent_factory)(&metadata.acp_server)?;
            session.unarchive(agent).await?;
            return Ok(session);
        }

        let dir = self.session_dir(id);
        let stored: Option<SessionMetadata> =
            persistence::read_json_optional(&dir.join("metadata.json"))?;
        let Some(mut metadata) = stored else {
            return Err(CoreError::NotFound(format!("session {id} not found")));
        };
        if let Some(name) = name {
            metadata.name = name;
        }
        if let Some(working_dir) = working_dir {
            metadata.working_dir = working_dir;
        }

        let agent = (self.agent_factory)(&metadata.acp_server)?;
        let session = Session::new(
            NewSessionArgs {
                session_id: metadata.session_id.clone(),
                name: metadata.name.clone(),
                description: metadata.description.clone(),
                acp_server: metadata.acp_server.clone(),
                working_dir: metadata.working_dir.clone(),
                parent_session_id: metadata.parent_session_id.clone(),
                queue_max_size: self.queue_max_size,
            },
            dir,
            self.hooks.clone(),
            agent,
        )?;
        self.sessions
            .write()
            .await
            .insert(metadata.session_id.clone(), session.clone());
        Ok(session)
    }

    /// Observe the lock: if `processing`, wait up to `timeout` for release
    /// before closing; otherwise close immediately.
    pub async fn close_gracefully(
        &self,
        id: &str,
        _reason: impl Into<String>,
        timeout: Duration,
    ) -> CoreResult<bool> {
        let Some(session) = self.get(id).await else {
            return Err(CoreError::NotFound(format!("session {id} not found")));
        };
        let released = session.wait_for_lock_free(timeout).await;
        if released {
            self.close(id, "graceful").await?;
        }
        Ok(released)
    }

    /// Force-close a session, removing it from `listRunning` regardless of
    /// lock state.
    pub async fn close(&self, id: &str, reason: impl Into<String>) -> CoreResult<()> {
        let session = self
            .sessions
            .write()
            .await
            .remove(id)
            .ok_or_else(|| CoreError::NotFound(format!("session {id} not found")))?;
        info!(session = %id, reason = %reason.into(), "closing session");
        let _ = session; // drop releases the Arc; agent connection is left to the caller's factory lifetime.
        Ok(())
    }

    pub fn hooks(&self) -> Arc<HookPipeline> {
        self.hooks.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_connection::{AgentUpdate, StopReason};
    use async_trait::async_trait;
    use std::path::Path;
    use tokio::sync::mpsc;

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
            _attachments: &[crate::hooks::ResolvedAttachment],
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

    fn factory() -> AgentConnectionFactory {
        Arc::new(|_name: &str| Ok(Arc::new(NoopAgent) as Arc<dyn AgentConnection>))
    }

    fn manager(dir: &Path) -> SessionManager {
        SessionManager::new(
            dir.to_path_buf(),
            10,
            Arc::new(HookPipeline::new(vec![])),
            factory(),
        )
    }

    #[tokio::test]
    async fn create_then_get_returns_same_session() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path());
        let session = mgr
            .create(CreateSessionArgs {
                name: "s".into(),
                description: "".into(),
                acp_server: "mock".into(),
                working_dir: dir.path().to_path_buf(),
                parent_session_id: None,
            })
            .await
            .unwrap();
        let fetched = mgr.get(&session.id).await.unwrap();
        assert_eq!(fetched.id, session.id);
    }

    #[tokio::test]
    async fn create_with_missing_parent_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path());
        let err = mgr
            .create(CreateSessionArgs {
                name: "s".into(),
                description: "".into(),
                acp_server: "mock".into(),
                working_dir: dir.path().to_path_buf(),
                parent_session_id: Some("ghost".into()),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn close_removes_from_list_running() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path());
        let session = mgr
            .create(CreateSessionArgs {
                name: "s".into(),
                description: "".into(),
                acp_server: "mock".into(),
                working_dir: dir.path().to_path_buf(),
                parent_session_id: None,
            })
            .await
            .unwrap();
        mgr.close(&session.id, "test").await.unwrap();
        assert!(mgr.get(&session.id).await.is_none());
    }

    #[tokio::test]
    async fn close_gracefully_on_idle_session_closes_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path());
        let session = mgr
            .create(CreateSessionArgs {
                name: "s".into(),
                description: "".into(),
                acp_server: "mock".into(),
                working_dir: dir.path().to_path_buf(),
                parent_session_id: None,
            })
            .await
            .unwrap();
        let closed = mgr
            .close_gracefully(&session.id, "test", Duration::from_millis(50))
            .await
            .unwrap();
        assert!(closed);
        assert!(mgr.get(&session.id).await.is_none());
    }

    #[tokio::test]
    async fn list_running_reflects_created_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path());
        mgr.create(CreateSessionArgs {
            name: "a".into(),
            description: "".into(),
            acp_server: "mock".into(),
            working_dir: dir.path().to_path_buf(),
            parent_session_id: None,
        })
        .await
        .unwrap();
        let running = mgr.list_running().await;
        assert_eq!(running.len(), 1);
    }
}
