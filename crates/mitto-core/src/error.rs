// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

/// Error kinds produced by the session runtime.
///
/// The variants map onto the error taxonomy every caller (tool server, web
/// handler, CLI) needs to branch on: local/no-side-effect errors that a
/// caller may retry or fix and resubmit, versus errors that already changed
/// session state and must be observed as an `error` event in the stream.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Malformed input: unknown mode, bad frequency unit, `at` without
    /// `unit=days`, etc. Returned before any side effect.
    #[error("validation: {0}")]
    Validation(String),

    /// Required capability flag missing, or a child session attempting an
    /// operation reserved for top-level sessions.
    #[error("not authorized: {0}")]
    Authorization(String),

    /// Unknown session, conversation, or correlation id.
    #[error("not found: {0}")]
    NotFound(String),

    /// Queue full, UI-prompt slot busy, session store unavailable.
    #[error("resource unavailable: {0}")]
    Resource(String),

    /// Transient failure that does not abort the caller's turn (hook
    /// timeout under `on-error=skip`, correlation poll timeout).
    #[error("transient: {0}")]
    Transient(String),

    /// The current turn cannot continue; the session itself may still be
    /// usable once the agent connection is respawned.
    #[error("fatal to turn: {0}")]
    FatalToTurn(String),

    /// The session is no longer usable; it transitions to `closed`.
    #[error("fatal to session: {0}")]
    FatalToSession(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl CoreError {
    /// `true` for kinds that are returned to the caller before any session
    /// state changes (validation, authorization, not-found, resource) as
    /// opposed to kinds surfaced only via the event stream.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            CoreError::Validation(_)
                | CoreError::Authorization(_)
                | CoreError::NotFound(_)
                | CoreError::Resource(_)
        )
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
