// SPDX-License-Identifier: Apache-2.0
use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, Mutex};
use tracing::warn;

use crate::error::{CoreError, CoreResult};

/// Capacity of each subscriber's broadcast channel. A subscriber whose
/// consumption falls behind the producer by this many events is marked
/// lagging and resynced rather than blocking the appender.
const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    UserPrompt,
    AgentMessage,
    AgentThought,
    ToolCall,
    ToolCallUpdate,
    CurrentModeUpdate,
    Error,
    System,
    /// Forward-compatibility fallback: any type this build does not know
    /// about round-trips through this arm instead of failing to parse.
    #[serde(other)]
    Unknown,
}

/// A single durable, sequence-numbered event belonging to one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub session_id: String,
    pub seq: i64,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    /// Opaque payload; shape depends on `event_type`.
    pub data: Value,
}

struct Inner {
    session_id: String,
    path: PathBuf,
    events: VecDeque<Event>,
    next_seq: i64,
    tx: broadcast::Sender<Event>,
}

/// Append-only, monotonically-sequenced event store for one session, with
/// broadcast fan-out to live subscribers.
///
/// Append is serialised by the `Mutex`; the in-memory `events` deque mirrors
/// the on-disk `events.jsonl` file and is the source of truth for
/// `read`/snapshot — the file exists for crash recovery, not for reads.
pub struct EventLog {
    inner: Mutex<Inner>,
}

impl EventLog {
    /// Open (or create) the event log for a session directory, replaying
    /// `events.jsonl` to recover in-memory state. Malformed trailing lines
    /// (a crash mid-write) are dropped with a warning — the highest
    /// complete, parseable seq wins.
    pub fn open(session_dir: &Path, session_id: &str) -> CoreResult<Self> {
        std::fs::create_dir_all(session_dir)?;
        let path = session_dir.join("events.jsonl");
        let mut events = VecDeque::new();
        if path.is_file() {
            let text = std::fs::read_to_string(&path)?;
            for (i, line) in text.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Event>(line) {
                    Ok(ev) => events.push_back(ev),
                    Err(err) => {
                        warn!(line = i, %err, "dropping unparseable trailing event line");
                        break;
                    }
                }
            }
        }
        let next_seq = events.back().map(|e| e.seq + 1).unwrap_or(0);
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        Ok(Self {
            inner: Mutex::new(Inner {
                session_id: session_id.to_string(),
                path,
                events,
                next_seq,
                tx,
            }),
        })
    }

    /// Append a new event, assigning it `prevMax + 1`. Flushes to disk
    /// before publishing to subscribers (durability precedes visibility).
    pub async fn append(&self, event_type: EventType, data: Value) -> CoreResult<i64> {
        let mut inner = self.inner.lock().await;
        let seq = inner.next_seq;
        let event = Event {
            session_id: inner.session_id.clone(),
            seq,
            event_type,
            timestamp: Utc::now(),
            data,
        };

        let line = serde_json::to_string(&event)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&inner.path)?;
        writeln!(file, "{line}")?;
        file.sync_data()?;

        inner.events.push_back(event.clone());
        inner.next_seq = seq + 1;
        // No subscribers is not an error: the event is still durable.
        let _ = inner.tx.send(event);
        Ok(seq)
    }

    /// Snapshot of all events with `seq >= from_seq`.
    pub async fn read(&self, from_seq: i64) -> Vec<Event> {
        let inner = self.inner.lock().await;
        inner
            .events
            .iter()
            .filter(|e| e.seq >= from_seq)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.events.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.events.is_empty()
    }

    /// Atomically take a snapshot and a live [`EventSubscription`] positioned
    /// so that concatenating the two yields a gap-free, duplicate-free
    /// stream: the subscription's backfill-on-lag logic is seeded with the
    /// snapshot's last seq, so even a subscriber that falls behind before
    /// consuming anything past the snapshot never loses or duplicates an
    /// event.
    pub async fn subscribe(self: &Arc<Self>) -> (Vec<Event>, EventSubscription) {
        let inner = self.inner.lock().await;
        let rx = inner.tx.subscribe();
        let snapshot: Vec<Event> = inner.events.iter().cloned().collect();
        let last_seq = snapshot.last().map(|e| e.seq).unwrap_or(-1);
        (
            snapshot,
            EventSubscription {
                log: self.clone(),
                rx,
                last_seq,
                backlog: VecDeque::new(),
            },
        )
    }
}

/// A live subscription to one session's event stream, returned alongside a
/// snapshot by [`EventLog::subscribe`].
///
/// `tokio::sync::broadcast` drops events out from under a slow subscriber
/// rather than blocking the appender; [`Self::recv`] turns that lag back
/// into a correct, gap-free stream by re-reading the missed range from the
/// durable log (which never drops anything) instead of skipping it.
pub struct EventSubscription {
    log: Arc<EventLog>,
    rx: broadcast::Receiver<Event>,
    last_seq: i64,
    backlog: VecDeque<Event>,
}

impl EventSubscription {
    /// Next event in sequence order. Transparently backfills from
    /// [`EventLog::read`] when the broadcast channel reports the
    /// subscriber lagged, so a caller never observes a gap.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            if let Some(event) = self.backlog.pop_front() {
                self.last_seq = event.seq;
                return Some(event);
            }
            match self.rx.recv().await {
                Ok(event) => {
                    // Already delivered via a prior backfill.
                    if event.seq <= self.last_seq {
                        continue;
                    }
                    self.last_seq = event.seq;
                    return Some(event);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(
                        missed = n,
                        from_seq = self.last_seq + 1,
                        "event subscriber lagged, backfilling from durable log"
                    );
                    self.backlog.extend(self.log.read(self.last_seq + 1).await);
                }
            }
        }
    }
}

impl From<broadcast::error::RecvError> for CoreError {
    fn from(err: broadcast::error::RecvError) -> Self {
        CoreError::Transient(err.to_string())
    }
}
