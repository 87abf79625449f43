// SPDX-License-Identifier: Apache-2.0
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<String>,
    pub submitter_session_id: Option<String>,
    pub queued_at: DateTime<Utc>,
    pub title: Option<String>,
}

/// Default bound on a session's prompt queue when no override is configured.
pub const DEFAULT_QUEUE_MAX_SIZE: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveDirection {
    Up,
    Down,
}

/// Bounded FIFO of prompts waiting to be drained once a session's lock
/// goes free. Inspected only when the lock is free or the holder
/// explicitly drains — callers are responsible for honoring that contract.
pub struct Queue {
    max_size: usize,
    items: Mutex<Vec<QueuedMessage>>,
}

impl Queue {
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            items: Mutex::new(Vec::new()),
        }
    }

    pub fn from_items(max_size: usize, items: Vec<QueuedMessage>) -> Self {
        Self {
            max_size,
            items: Mutex::new(items),
        }
    }

    pub async fn add(
        &self,
        text: impl Into<String>,
        submitter_session_id: Option<String>,
        attachments: Vec<String>,
        title: Option<String>,
    ) -> CoreResult<usize> {
        let mut items = self.items.lock().await;
        if items.len() >= self.max_size {
            return Err(CoreError::Resource("queue-full".into()));
        }
        items.push(QueuedMessage {
            id: Uuid::new_v4().to_string(),
            text: text.into(),
            attachments,
            submitter_session_id,
            queued_at: Utc::now(),
            title,
        });
        Ok(items.len())
    }

    pub async fn remove(&self, id: &str) -> bool {
        let mut items = self.items.lock().await;
        let before = items.len();
        items.retain(|m| m.id != id);
        items.len() != before
    }

    /// Move an item one position in the queue; no-op at the boundary.
    pub async fn move_item(&self, id: &str, direction: MoveDirection) -> bool {
        let mut items = self.items.lock().await;
        let Some(pos) = items.iter().position(|m| m.id == id) else {
            return false;
        };
        let new_pos = match direction {
            MoveDirection::Up => pos.checked_sub(1),
            MoveDirection::Down if pos + 1 < items.len() => Some(pos + 1),
            MoveDirection::Down => None,
        };
        match new_pos {
            Some(new_pos) => {
                items.swap(pos, new_pos);
                true
            }
            None => false,
        }
    }

    /// Remove and return the head of the queue, if any.
    pub async fn drain_one(&self) -> Option<QueuedMessage> {
        let mut items = self.items.lock().await;
        if items.is_empty() {
            None
        } else {
            Some(items.remove(0))
        }
    }

    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.lock().await.is_empty()
    }

    pub async fn snapshot(&self) -> Vec<QueuedMessage> {
        self.items.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_increases_length() {
        let q = Queue::new(2);
        let len = q.add("a", None, vec![], None).await.unwrap();
        assert_eq!(len, 1);
    }

    #[tokio::test]
    async fn add_beyond_max_fails_with_queue_full() {
        let q = Queue::new(1);
        q.add("a", None, vec![], None).await.unwrap();
        let err = q.add("b", None, vec![], None).await.unwrap_err();
        assert!(matches!(err, CoreError::Resource(_)));
    }

    #[tokio::test]
    async fn drain_one_removes_head_in_fifo_order() {
        let q = Queue::new(10);
        q.add("first", None, vec![], None).await.unwrap();
        q.add("second", None, vec![], None).await.unwrap();
        let head = q.drain_one().await.unwrap();
        assert_eq!(head.text, "first");
        assert_eq!(q.len().await, 1);
    }

    #[tokio::test]
    async fn drain_one_on_empty_returns_none() {
        let q = Queue::new(10);
        assert!(q.drain_one().await.is_none());
    }

    #[tokio::test]
    async fn remove_by_id() {
        let q = Queue::new(10);
        q.add("a", None, vec![], None).await.unwrap();
        let id = q.snapshot().await[0].id.clone();
        assert!(q.remove(&id).await);
        assert!(q.is_empty().await);
    }

    #[tokio::test]
    async fn move_up_swaps_with_previous() {
        let q = Queue::new(10);
        q.add("a", None, vec![], None).await.unwrap();
        q.add("b", None, vec![], None).await.unwrap();
        let id_b = q.snapshot().await[1].id.clone();
        assert!(q.move_item(&id_b, MoveDirection::Up).await);
        assert_eq!(q.snapshot().await[0].text, "b");
    }

    #[tokio::test]
    async fn move_down_at_tail_is_noop() {
        let q = Queue::new(10);
        q.add("a", None, vec![], None).await.unwrap();
        let id_a = q.snapshot().await[0].id.clone();
        assert!(!q.move_item(&id_a, MoveDirection::Down).await);
    }

    #[tokio::test]
    async fn conservation_across_add_move_remove() {
        let q = Queue::new(10);
        q.add("a", None, vec![], None).await.unwrap();
        q.add("b", None, vec![], None).await.unwrap();
        q.add("c", None, vec![], None).await.unwrap();
        let id_b = q.snapshot().await[1].id.clone();
        q.move_item(&id_b, MoveDirection::Up).await;
        let id_c = q.snapshot().await.last().unwrap().id.clone();
        q.remove(&id_c).await;
        let mut texts: Vec<String> = q.snapshot().await.into_iter().map(|m| m.text).collect();
        texts.sort();
        assert_eq!(texts, vec!["a".to_string(), "b".to_string()]);
    }
}
