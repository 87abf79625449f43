// SPDX-License-Identifier: Apache-2.0
//! Layered YAML configuration for mitto: workspaces, ACP servers, prompt
//! templates, the web server, session limits, UI passthrough, and hooks.

mod error;
mod loader;
mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{load, load_with_env_override};
pub use schema::*;
