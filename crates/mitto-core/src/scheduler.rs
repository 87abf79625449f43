// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;
use std::time::Duration as StdDuration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::manager::SessionManager;

/// Lower bound between scheduler wake-ups, so a misconfigured periodic
/// whose `next_scheduled_at` is already due doesn't spin the worker.
const MIN_POLL_INTERVAL: StdDuration = StdDuration::from_millis(500);
/// Upper bound: re-check the session table at least this often even if no
/// periodic is currently due, since sessions come and go.
const MAX_POLL_INTERVAL: StdDuration = StdDuration::from_secs(30);

/// Single background worker, one per process, that fires due periodic
/// prompts. Looks sessions up by id on every tick rather than retaining
/// handles, so a closed session is never rescheduled against.
pub struct PeriodicScheduler {
    cancel: CancellationToken,
    handle: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    wake: Arc<Notify>,
}

impl PeriodicScheduler {
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            handle: tokio::sync::Mutex::new(None),
            wake: Arc::new(Notify::new()),
        }
    }

    /// Start the background loop against `manager`. Idempotent: calling
    /// `start` twice without `stop` is a no-op.
    pub async fn start(self: &Arc<Self>, manager: Arc<SessionManager>) {
        let mut handle = self.handle.lock().await;
        if handle.is_some() {
            return;
        }
        let scheduler = self.clone();
        *handle = Some(tokio::spawn(async move {
            scheduler.run(manager).await;
        }));
    }

    pub async fn stop(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.lock().await.take() {
            let _ = handle.await;
        }
    }

    /// Nudge the scheduler to re-evaluate immediately (e.g. after a
    /// periodic was just created or modified).
    pub fn wake_now(&self) {
        self.wake.notify_one();
    }

    async fn run(&self, manager: Arc<SessionManager>) {
        loop {
            let sleep_for = self.tick(&manager).await;
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(sleep_for) => {}
                _ = self.wake.notified() => {}
            }
        }
    }

    /// Fire every due periodic once; return how long to sleep until the
    /// next check.
    async fn tick(&self, manager: &SessionManager) -> StdDuration {
        let running = manager.list_running().await;
        let mut next_wake = MAX_POLL_INTERVAL;
        let now = chrono::Utc::now();

        for meta in running {
            if meta.archived {
                continue;
            }
            let Some(session) = manager.get(&meta.session_id).await else {
                continue;
            };
            let Some(periodic) = session.periodic().await else {
                continue;
            };
            if !periodic.enabled {
                continue;
            }
            let Some(next_at) = periodic.next_scheduled_at else {
                continue;
            };

            if next_at <= now {
                debug!(session = %meta.session_id, "firing periodic prompt");
                if let Err(err) = session.fire_periodic().await {
                    warn!(session = %meta.session_id, %err, "periodic fire failed");
                }
            } else {
                let wait = (next_at - now)
                    .to_std()
                    .unwrap_or(MIN_POLL_INTERVAL)
                    .max(MIN_POLL_INTERVAL);
                next_wake = next_wake.min(wait);
            }
        }

        next_wake.max(MIN_POLL_INTERVAL)
    }

    /// Run now, bypassing the wall-clock wait. If the lock is `processing`,
    /// returns `false` ("busy") instead of enqueuing; otherwise submits
    /// synchronously and reschedules from the new `last_sent_at`.
    pub async fn run_now(&self, manager: &SessionManager, session_id: &str) -> bool {
        let Some(session) = manager.get(session_id).await else {
            return false;
        };
        if !session.lock.is_free().await {
            return false;
        }
        session.fire_periodic().await.is_ok()
    }
}

impl Default for PeriodicScheduler {
    fn default() -> Self {
        Self::new()
    }
}
