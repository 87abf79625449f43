// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

/// Top-level mitto configuration, merged from the layered YAML search path
/// (see [`crate::load`]) plus an optional explicit `--config` file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Workspaces the UI/CLI may create sessions against.
    #[serde(default)]
    pub workspaces: Vec<WorkspaceConfig>,

    /// Named ACP agent servers sessions can be bound to.
    #[serde(default)]
    pub acp_servers: Vec<AcpServerConfig>,

    /// Global quick-send prompt templates, independent of any one session.
    #[serde(default)]
    pub prompts: Vec<PromptTemplate>,

    #[serde(default)]
    pub web: WebConfig,

    #[serde(default)]
    pub session: SessionLimitsConfig,

    #[serde(default)]
    pub ui: UiConfig,

    /// Hook definitions applied to outgoing user messages.
    #[serde(default)]
    pub hooks: Vec<HookConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    pub name: String,
    pub path: PathBuf,
    /// Opaque, workspace-schema-driven attributes (stored verbatim in each
    /// session's `user-data.json`; the core never interprets these).
    #[serde(default)]
    pub schema: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcpServerConfig {
    pub name: String,
    /// Executable plus arguments used to spawn the subprocess.
    pub command: Vec<String>,
    /// Server-specific quick-send prompts, layered on top of the global ones.
    #[serde(default)]
    pub prompts: Vec<PromptTemplate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub name: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Externally-tunnelled port advertised to clients, when different from
    /// `port` (e.g. behind a reverse proxy or tunnel).
    pub external_port: Option<u16>,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub hooks: WebHooksConfig,
    #[serde(default)]
    pub security: SecurityConfig,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            external_port: None,
            auth: AuthConfig::default(),
            hooks: WebHooksConfig::default(),
            security: SecurityConfig::default(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5757
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    pub simple: Option<SimpleAuthConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimpleAuthConfig {
    pub username: String,
    pub password: String,
}

/// Commands run around the web server lifecycle (e.g. to start/stop a
/// reverse tunnel). Best-effort: failures are logged, not fatal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebHooksConfig {
    pub up: Option<WebHookCommand>,
    pub down: Option<WebHookCommand>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebHookCommand {
    pub command: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default = "default_rate_limit")]
    pub rate_limit_rps: u32,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            rate_limit_rps: default_rate_limit(),
        }
    }
}

fn default_rate_limit() -> u32 {
    20
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionLimitsConfig {
    #[serde(default = "default_max_messages")]
    pub max_messages_per_session: u64,
    #[serde(default = "default_max_session_bytes")]
    pub max_session_size_bytes: u64,
    /// How long an archived session is kept on disk before being eligible
    /// for removal by an out-of-core housekeeping job. `None` = forever.
    pub archive_retention_period: Option<String>,
}

impl Default for SessionLimitsConfig {
    fn default() -> Self {
        Self {
            max_messages_per_session: default_max_messages(),
            max_session_size_bytes: default_max_session_bytes(),
            archive_retention_period: None,
        }
    }
}

fn default_max_messages() -> u64 {
    10_000
}

fn default_max_session_bytes() -> u64 {
    256 * 1024 * 1024
}

/// Platform-specific UI preferences. Opaque to the core; carried through
/// untouched for the (out-of-scope) frontends to interpret.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UiConfig {
    #[serde(default)]
    pub platform: HashMap<String, serde_json::Value>,
}

/// A single hook definition applied to outgoing user messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookConfig {
    pub name: String,
    pub command: Vec<String>,
    #[serde(default)]
    pub when: HookWhen,
    pub workspaces: Option<Vec<String>>,
    #[serde(default)]
    pub input: HookInput,
    #[serde(default)]
    pub output: HookOutput,
    #[serde(default = "default_hook_priority")]
    pub priority: i32,
    #[serde(default = "default_hook_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub on_error: HookOnError,
    #[serde(default)]
    pub env_additions: HashMap<String, String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_hook_priority() -> i32 {
    0
}

fn default_hook_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookWhen {
    #[default]
    All,
    First,
    AllExceptFirst,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookInput {
    #[default]
    None,
    Message,
    Conversation,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookOutput {
    #[default]
    Transform,
    Prepend,
    Append,
    Discard,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookOnError {
    #[default]
    Skip,
    Fail,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_default_port() {
        let cfg = Config::default();
        assert_eq!(cfg.web.port, 5757);
    }

    #[test]
    fn default_session_limits_are_nonzero() {
        let cfg = SessionLimitsConfig::default();
        assert!(cfg.max_messages_per_session > 0);
        assert!(cfg.max_session_size_bytes > 0);
    }

    #[test]
    fn hook_defaults_round_trip() {
        let yaml = "name: ctx\ncommand: [\"echo\", \"hi\"]\n";
        let hook: HookConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(hook.when, HookWhen::All);
        assert_eq!(hook.input, HookInput::None);
        assert_eq!(hook.output, HookOutput::Transform);
        assert_eq!(hook.on_error, HookOnError::Skip);
        assert!(hook.enabled);
        assert_eq!(hook.timeout_secs, 30);
    }

    #[test]
    fn hook_when_serializes_snake_case() {
        let s = serde_json::to_string(&HookWhen::AllExceptFirst).unwrap();
        assert_eq!(s, "\"all_except_first\"");
    }

    #[test]
    fn full_config_round_trips_through_yaml() {
        let yaml = r#"
workspaces:
  - name: demo
    path: /tmp/demo
acp_servers:
  - name: claude
    command: ["claude-agent", "--acp"]
web:
  port: 6000
session:
  max_messages_per_session: 500
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.workspaces.len(), 1);
        assert_eq!(cfg.acp_servers[0].name, "claude");
        assert_eq!(cfg.web.port, 6000);
        assert_eq!(cfg.session.max_messages_per_session, 500);
    }
}
