// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, Mutex};
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UIPromptType {
    YesNo,
    Select,
    OptionsButtons,
    ActionButtons,
    Permission,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UIPromptOption {
    pub id: String,
    pub label: String,
    pub response: Option<String>,
    pub kind: Option<String>,
    pub style: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UIPromptRequest {
    pub request_id: String,
    #[serde(rename = "type")]
    pub prompt_type: UIPromptType,
    pub question: String,
    pub options: Vec<UIPromptOption>,
    pub timeout_seconds: u64,
    pub blocking: bool,
    pub persistent: bool,
    pub tool_call_id: Option<String>,
}

/// Default UI-prompt timeout, per the concurrency model's default timeout table.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UIPromptOutcome {
    Answered(String),
    TimedOut,
    Cancelled,
    Superseded,
    Dismissed,
}

struct Slot {
    request_id: String,
    responder: Option<oneshot::Sender<UIPromptOutcome>>,
}

/// Per-session, one-slot blocking rendezvous between an agent-side tool
/// request and a human answer.
///
/// Non-blocking (`action_buttons`) prompts bypass the slot entirely: callers
/// persist them alongside session metadata and clear them on the next user
/// prompt submission or an explicit dismiss — this registry only arbitrates
/// the single active *blocking* prompt.
pub struct UIPromptRegistry {
    slot: Mutex<Option<Slot>>,
}

impl UIPromptRegistry {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Block until `request` is answered, times out, is cancelled, or is
    /// superseded by a subsequent call to `prompt`.
    pub async fn prompt(
        &self,
        request: &UIPromptRequest,
        cancellation: &CancellationToken,
    ) -> UIPromptOutcome {
        let (tx, rx) = oneshot::channel();
        {
            let mut slot = self.slot.lock().await;
            if let Some(previous) = slot.take() {
                if let Some(responder) = previous.responder {
                    let _ = responder.send(UIPromptOutcome::Superseded);
                }
            }
            *slot = Some(Slot {
                request_id: request.request_id.clone(),
                responder: Some(tx),
            });
        }

        let wait = timeout(Duration::from_secs(request.timeout_seconds), rx);
        tokio::select! {
            result = wait => {
                match result {
                    Ok(Ok(outcome)) => outcome,
                    Ok(Err(_)) => UIPromptOutcome::Cancelled,
                    Err(_) => {
                        self.clear_if_current(&request.request_id).await;
                        UIPromptOutcome::TimedOut
                    }
                }
            }
            _ = cancellation.cancelled() => {
                self.clear_if_current(&request.request_id).await;
                UIPromptOutcome::Cancelled
            }
        }
    }

    /// Resolve the active prompt if its `request_id` matches.
    pub async fn respond(&self, request_id: &str, answer: impl Into<String>) -> bool {
        let mut slot = self.slot.lock().await;
        if slot.as_ref().map(|s| s.request_id.as_str()) != Some(request_id) {
            return false;
        }
        if let Some(mut s) = slot.take() {
            if let Some(responder) = s.responder.take() {
                let _ = responder.send(UIPromptOutcome::Answered(answer.into()));
            }
        }
        true
    }

    pub async fn dismiss(&self, request_id: &str) -> bool {
        let mut slot = self.slot.lock().await;
        if slot.as_ref().map(|s| s.request_id.as_str()) != Some(request_id) {
            return false;
        }
        if let Some(mut s) = slot.take() {
            if let Some(responder) = s.responder.take() {
                let _ = responder.send(UIPromptOutcome::Dismissed);
            }
        }
        true
    }

    pub async fn active_request_id(&self) -> Option<String> {
        self.slot.lock().await.as_ref().map(|s| s.request_id.clone())
    }

    async fn clear_if_current(&self, request_id: &str) {
        let mut slot = self.slot.lock().await;
        if slot.as_ref().map(|s| s.request_id.as_str()) == Some(request_id) {
            *slot = None;
        }
    }
}

impl Default for UIPromptRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request(request_id: &str, timeout_seconds: u64) -> UIPromptRequest {
        UIPromptRequest {
            request_id: request_id.to_string(),
            prompt_type: UIPromptType::YesNo,
            question: "Proceed?".into(),
            options: vec![],
            timeout_seconds,
            blocking: true,
            persistent: false,
            tool_call_id: None,
        }
    }

    #[tokio::test]
    async fn respond_resolves_matching_request() {
        let registry = UIPromptRegistry::new();
        let token = CancellationToken::new();
        let req = sample_request("r1", 5);
        let registry_ref = &registry;
        let (result, _) = tokio::join!(
            registry_ref.prompt(&req, &token),
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                registry_ref.respond("r1", "yes").await
            }
        );
        assert_eq!(result, UIPromptOutcome::Answered("yes".into()));
    }

    #[tokio::test]
    async fn respond_to_wrong_id_is_ignored() {
        let registry = UIPromptRegistry::new();
        assert!(!registry.respond("nope", "yes").await);
    }

    #[tokio::test]
    async fn new_blocking_prompt_supersedes_previous() {
        let registry = UIPromptRegistry::new();
        let token = CancellationToken::new();
        let req1 = sample_request("r1", 5);
        let req2 = sample_request("r2", 5);
        let registry_ref = &registry;
        let (first, _second) = tokio::join!(
            registry_ref.prompt(&req1, &token),
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                registry_ref.prompt(&req2, &token).await
            }
        );
        assert_eq!(first, UIPromptOutcome::Superseded);
    }

    #[tokio::test]
    async fn cancellation_resolves_cancelled() {
        let registry = UIPromptRegistry::new();
        let token = CancellationToken::new();
        let req = sample_request("r1", 5);
        let token_clone = token.clone();
        let (result, _) = tokio::join!(registry.prompt(&req, &token), async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            token_clone.cancel();
        });
        assert_eq!(result, UIPromptOutcome::Cancelled);
    }

    #[tokio::test]
    async fn dismiss_resolves_dismissed() {
        let registry = UIPromptRegistry::new();
        let token = CancellationToken::new();
        let req = sample_request("r1", 5);
        let registry_ref = &registry;
        let (result, _) = tokio::join!(
            registry_ref.prompt(&req, &token),
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                registry_ref.dismiss("r1").await
            }
        );
        assert_eq!(result, UIPromptOutcome::Dismissed);
    }

    #[tokio::test]
    async fn timeout_elapses_when_unanswered() {
        let registry = UIPromptRegistry::new();
        let token = CancellationToken::new();
        let req = sample_request("r1", 0);
        let result = registry.prompt(&req, &token).await;
        assert_eq!(result, UIPromptOutcome::TimedOut);
    }
}
