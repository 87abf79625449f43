// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tokio::time::sleep;

use crate::error::{CoreError, CoreResult};

/// Entry TTL: a registered correlation not consumed within this window is
/// treated as not-found and cleaned up opportunistically.
pub const ENTRY_TTL_SECS: i64 = 30;

/// Poll cadence and overall budget for [`PendingToolCorrelation::resolve`].
pub const POLL_INTERVAL_MS: u64 = 50;
pub const DEFAULT_RESOLVE_TIMEOUT_SECS: u64 = 5;

struct Entry {
    session_id: String,
    registered_at: DateTime<Utc>,
}

/// Maps an externally-issued tool-call id to the real session that
/// triggered it, so a tool handler that only knows an opaque caller
/// identifier can still be linked back to its true session.
///
/// Each entry is consumed at most once: a second `resolve` for the same
/// request id — whether or not the first succeeded — returns not-found.
pub struct PendingToolCorrelation {
    entries: Mutex<HashMap<String, Entry>>,
}

impl PendingToolCorrelation {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn register(&self, request_id: impl Into<String>, session_id: impl Into<String>) {
        let mut entries = self.entries.lock().await;
        entries.insert(
            request_id.into(),
            Entry {
                session_id: session_id.into(),
                registered_at: Utc::now(),
            },
        );
    }

    /// Poll for a registered correlation for up to `timeout`, consuming it
    /// exactly once on success. Expired entries are dropped as encountered.
    pub async fn resolve(&self, request_id: &str, timeout: Duration) -> CoreResult<String> {
        let deadline = Utc::now() + timeout;
        loop {
            {
                let mut entries = self.entries.lock().await;
                self.evict_expired_locked(&mut entries);
                if let Some(entry) = entries.remove(request_id) {
                    return Ok(entry.session_id);
                }
            }
            if Utc::now() >= deadline {
                return Err(CoreError::NotFound(format!(
                    "no correlation for request {request_id}"
                )));
            }
            sleep(std::time::Duration::from_millis(POLL_INTERVAL_MS)).await;
        }
    }

    fn evict_expired_locked(&self, entries: &mut HashMap<String, Entry>) {
        let now = Utc::now();
        entries.retain(|_, e| now - e.registered_at < Duration::seconds(ENTRY_TTL_SECS));
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

impl Default for PendingToolCorrelation {
    fn default() -> Self {
        Self::new()
    }
}
