// SPDX-License-Identifier: Apache-2.0
//! The Agent Client Protocol transport: spawns a coding-agent subprocess
//! and drives it as a `mitto_core::AgentConnection`.

pub mod connection;
pub mod error;

pub use connection::{AcpConnection, AgentSpawnSpec};
pub use error::ConnectionError;
