// SPDX-License-Identifier: Apache-2.0
//! Dependencies every meta-tool closes over: a `SessionManager` handle (tools
//! look sessions up by id on every call, never cache one across a suspension
//! point), the correlation map, and the resolved config.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use mitto_config::Config;
use mitto_core::correlation::DEFAULT_RESOLVE_TIMEOUT_SECS;
use mitto_core::{CoreError, CoreResult, PendingToolCorrelation, Session, SessionManager};

pub struct ToolContext {
    pub manager: Arc<SessionManager>,
    pub correlation: Arc<PendingToolCorrelation>,
    pub config: Arc<Config>,
    pub started_at: DateTime<Utc>,
}

impl ToolContext {
    pub fn new(
        manager: Arc<SessionManager>,
        correlation: Arc<PendingToolCorrelation>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            manager,
            correlation,
            config,
            started_at: Utc::now(),
        }
    }

    /// `resolveSelfID`: direct session lookup first, then a one-shot
    /// correlation poll for callers that only hold an opaque tool-call id.
    pub async fn resolve_self_id(&self, self_id: &str) -> CoreResult<Arc<Session>> {
        if let Some(session) = self.manager.get(self_id).await {
            return Ok(session);
        }
        let resolved = self
            .correlation
            .resolve(
                self_id,
                chrono::Duration::seconds(DEFAULT_RESOLVE_TIMEOUT_SECS as i64),
            )
            .await?;
        self.manager
            .get(&resolved)
            .await
            .ok_or_else(|| CoreError::NotFound(format!("session {resolved} not found")))
    }
}
