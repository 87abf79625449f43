// SPDX-License-Identifier: Apache-2.0
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// Default lease duration for a held (not yet processing) lock. A lock
/// whose lease expires without being promoted or released is treated as
/// free by the next caller to observe it.
pub const DEFAULT_LEASE_SECS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockStatus {
    Free,
    Held,
    Processing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    pub status: LockStatus,
    pub client_type: Option<String>,
    pub lease_expiry: Option<DateTime<Utc>>,
}

impl Default for LockInfo {
    fn default() -> Self {
        Self {
            status: LockStatus::Free,
            client_type: None,
            lease_expiry: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AcquireResult {
    pub granted: bool,
    pub held_by: Option<()>,
}

/// Advisory single-writer lock gating who may currently drive a session's
/// agent turn. Acquisition is the only gate on speaking to the agent: queue
/// drain, periodic injection, and direct user prompts all contend for it
/// the same way.
pub struct SessionLock {
    inner: Mutex<LockState>,
}

struct LockState {
    info: LockInfo,
    /// Opaque token identifying the current holder; compared on
    /// promote/release/renew so only the holder can mutate the lock.
    holder_token: Option<u64>,
    next_token: u64,
}

impl SessionLock {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(LockState {
                info: LockInfo::default(),
                holder_token: None,
                next_token: 1,
            }),
        }
    }

    pub fn from_info(info: LockInfo) -> Self {
        Self {
            inner: Mutex::new(LockState {
                info,
                holder_token: None,
                next_token: 1,
            }),
        }
    }

    /// Reap an expired lease, treating the lock as free.
    fn reap_if_expired(state: &mut LockState) {
        if state.info.status == LockStatus::Held {
            if let Some(expiry) = state.info.lease_expiry {
                if Utc::now() >= expiry {
                    state.info = LockInfo::default();
                    state.holder_token = None;
                }
            }
        }
    }

    /// Attempt to take the lock for `client_type`. Returns a holder token
    /// on success; the caller must present it to `promote`/`release`.
    pub async fn try_acquire(
        &self,
        client_type: impl Into<String>,
        lease: Duration,
    ) -> Option<u64> {
        let mut state = self.inner.lock().await;
        Self::reap_if_expired(&mut state);
        if state.info.status != LockStatus::Free {
            return None;
        }
        let token = state.next_token;
        state.next_token += 1;
        state.holder_token = Some(token);
        state.info = LockInfo {
            status: LockStatus::Held,
            client_type: Some(client_type.into()),
            lease_expiry: Some(Utc::now() + lease),
        };
        Some(token)
    }

    /// Promote a held lock to `processing`. Only the current holder may do so.
    pub async fn promote(&self, token: u64) -> bool {
        let mut state = self.inner.lock().await;
        Self::reap_if_expired(&mut state);
        if state.holder_token != Some(token) {
            return false;
        }
        state.info.status = LockStatus::Processing;
        state.info.lease_expiry = None;
        true
    }

    /// Release the lock, returning it to `free`. Only the current holder
    /// may do so (or an expired-lease reaper, via `try_acquire`/`status`).
    pub async fn release(&self, token: u64) -> bool {
        let mut state = self.inner.lock().await;
        if state.holder_token != Some(token) {
            return false;
        }
        state.info = LockInfo::default();
        state.holder_token = None;
        true
    }

    /// Extend the lease of a currently-held (not yet processing) lock.
    pub async fn lease_renew(&self, token: u64, lease: Duration) -> bool {
        let mut state = self.inner.lock().await;
        if state.holder_token != Some(token) || state.info.status != LockStatus::Held {
            return false;
        }
        state.info.lease_expiry = Some(Utc::now() + lease);
        true
    }

    pub async fn status(&self) -> LockInfo {
        let mut state = self.inner.lock().await;
        Self::reap_if_expired(&mut state);
        state.info.clone()
    }

    pub async fn is_free(&self) -> bool {
        matches!(self.status().await.status, LockStatus::Free)
    }
}

impl Default for SessionLock {
    fn default() -> Self {
        Self::new()
    }
}
