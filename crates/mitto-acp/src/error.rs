// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

/// Failures in spawning or talking to an ACP agent subprocess, before they
/// are folded into a `mitto_core::CoreError` at the trait boundary.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("failed to spawn agent process: {0}")]
    Spawn(String),

    #[error("ACP handshake failed: {0}")]
    Handshake(String),

    #[error("ACP request failed: {0}")]
    Protocol(String),

    #[error("agent connection is no longer usable")]
    Unusable,

    #[error("the connection's worker thread is gone")]
    WorkerGone,
}

impl From<ConnectionError> for mitto_core::CoreError {
    fn from(err: ConnectionError) -> Self {
        match err {
            ConnectionError::Spawn(msg) => mitto_core::CoreError::FatalToSession(msg),
            ConnectionError::Handshake(msg) => mitto_core::CoreError::FatalToSession(msg),
            ConnectionError::Unusable => {
                mitto_core::CoreError::FatalToSession("agent connection is unusable".into())
            }
            ConnectionError::WorkerGone => {
                mitto_core::CoreError::FatalToSession("agent connection worker exited".into())
            }
            ConnectionError::Protocol(msg) => mitto_core::CoreError::FatalToTurn(msg),
        }
    }
}
