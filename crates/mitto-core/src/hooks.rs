// SPDX-License-Identifier: Apache-2.0
use std::path::Path;
use std::time::Duration;

use base64::Engine;
use mitto_config::{HookConfig, HookInput, HookOnError, HookOutput, HookWhen};
use serde::Deserialize;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::warn;

use crate::error::{CoreError, CoreResult};

/// A resolved attachment handed to the agent: either raw text or base64
/// content read from disk (paths are never forwarded to the agent directly).
#[derive(Debug, Clone)]
pub struct ResolvedAttachment {
    pub name: String,
    pub content_base64: String,
}

#[derive(Debug, Clone, Default)]
pub struct HookOutcome {
    pub text: String,
    pub attachments: Vec<ResolvedAttachment>,
}

#[derive(Debug, Deserialize, Default)]
struct HookStdout {
    message: Option<String>,
    text: Option<String>,
    #[serde(default)]
    attachments: Vec<String>,
    error: Option<String>,
}

/// Runs the configured hooks over an outgoing user message, in ascending
/// priority order, combining their output per each hook's `output` mode.
pub struct HookPipeline {
    hooks: Vec<HookConfig>,
}

impl HookPipeline {
    pub fn new(mut hooks: Vec<HookConfig>) -> Self {
        // Stable sort: priority ties keep discovery order.
        hooks.sort_by_key(|h| h.priority);
        Self { hooks }
    }

    /// Apply all matching, enabled hooks to `text`, returning the
    /// transformed text plus any attachments the hooks contributed.
    ///
    /// `is_first_message` and `workspace` drive the `when`/`workspaces`
    /// match; `session_id` and `working_dir` are forwarded to the hook
    /// process as environment variables.
    pub async fn apply(
        &self,
        text: &str,
        session_id: &str,
        working_dir: &Path,
        workspace_name: Option<&str>,
        is_first_message: bool,
    ) -> CoreResult<HookOutcome> {
        let mut current = text.to_string();
        let mut attachments = Vec::new();

        for hook in &self.hooks {
            if !hook.enabled {
                continue;
            }
            if !matches_when(hook.when, is_first_message) {
                continue;
            }
            if let Some(workspaces) = &hook.workspaces {
                let matches = workspace_name
                    .map(|w| workspaces.iter().any(|ws| ws == w))
                    .unwrap_or(false);
                if !matches {
                    continue;
                }
            }

            let result = run_hook(hook, &current, session_id, working_dir, is_first_message).await;
            match result {
                Ok(stdout) => {
                    if let Some(err) = stdout.error {
                        match hook.on_error {
                            HookOnError::Skip => {
                                warn!(hook = %hook.name, %err, "hook reported error, skipping");
                                if let Some(fallback) = stdout.message {
                                    current = fallback;
                                }
                                continue;
                            }
                            HookOnError::Fail => {
                                return Err(CoreError::FatalToTurn(format!(
                                    "hook {} failed: {err}",
                                    hook.name
                                )));
                            }
                        }
                    }
                    current = combine(hook.output, &current, stdout.text.as_deref());
                    for path in stdout.attachments {
                        match resolve_attachment(&path).await {
                            Ok(resolved) => attachments.push(resolved),
                            Err(err) => warn!(hook = %hook.name, %err, "could not resolve attachment"),
                        }
                    }
                }
                Err(err) => match hook.on_error {
                    HookOnError::Skip => {
                        warn!(hook = %hook.name, %err, "hook execution failed, skipping");
                    }
                    HookOnError::Fail => return Err(err),
                },
            }
        }

        Ok(HookOutcome {
            text: current,
            attachments,
        })
    }
}

fn matches_when(when: HookWhen, is_first_message: bool) -> bool {
    match when {
        HookWhen::All => true,
        HookWhen::First => is_first_message,
        HookWhen::AllExceptFirst => !is_first_message,
    }
}

fn combine(output: HookOutput, current: &str, hook_text: Option<&str>) -> String {
    let Some(hook_text) = hook_text else {
        return current.to_string();
    };
    match output {
        HookOutput::Transform => hook_text.to_string(),
        HookOutput::Prepend => format!("{hook_text}{current}"),
        HookOutput::Append => format!("{current}{hook_text}"),
        HookOutput::Discard => current.to_string(),
    }
}

async fn run_hook(
    hook: &HookConfig,
    message: &str,
    session_id: &str,
    working_dir: &Path,
    is_first_message: bool,
) -> CoreResult<HookStdout> {
    let Some((program, args)) = hook.command.split_first() else {
        return Ok(HookStdout::default());
    };

    let stdin_payload = match hook.input {
        HookInput::None => None,
        HookInput::Message => Some(serde_json::json!({ "message": message }).to_string()),
        HookInput::Conversation => {
            Some(serde_json::json!({ "message": message, "recent_history": [] }).to_string())
        }
    };

    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(working_dir)
        .env("MITTO_SESSION_ID", session_id)
        .env("MITTO_WORKING_DIR", working_dir)
        .env("MITTO_IS_FIRST_MESSAGE", is_first_message.to_string())
        .envs(&hook.env_additions)
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped());
    if stdin_payload.is_some() {
        cmd.stdin(std::process::Stdio::piped());
    } else {
        cmd.stdin(std::process::Stdio::null());
    }

    let mut child = cmd
        .spawn()
        .map_err(|e| CoreError::Transient(format!("spawning hook {}: {e}", hook.name)))?;

    if let Some(payload) = stdin_payload {
        if let Some(mut stdin) = child.stdin.take() {
            use tokio::io::AsyncWriteExt;
            let _ = stdin.write_all(payload.as_bytes()).await;
        }
    }

    let output = timeout(
        Duration::from_secs(hook.timeout_secs),
        child.wait_with_output(),
    )
    .await
    .map_err(|_| CoreError::Transient(format!("hook {} timed out", hook.name)))?
    .map_err(|e| CoreError::Transient(format!("hook {} io error: {e}", hook.name)))?;

    if !output.status.success() {
        return Ok(HookStdout {
            error: Some(format!(
                "hook exited with status {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            )),
            ..Default::default()
        });
    }

    let stdout_text = String::from_utf8_lossy(&output.stdout);
    if stdout_text.trim().is_empty() {
        return Ok(HookStdout::default());
    }
    serde_json::from_str(stdout_text.trim())
        .map_err(|e| CoreError::Transient(format!("hook {} produced unparseable stdout: {e}", hook.name)))
}

async fn resolve_attachment(path_or_text: &str) -> CoreResult<ResolvedAttachment> {
    let path = Path::new(path_or_text);
    if path.is_file() {
        let bytes = tokio::fs::read(path).await?;
        Ok(ResolvedAttachment {
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| path_or_text.to_string()),
            content_base64: base64::engine::general_purpose::STANDARD.encode(bytes),
        })
    } else {
        Ok(ResolvedAttachment {
            name: "attachment".to_string(),
            content_base64: base64::engine::general_purpose::STANDARD.encode(path_or_text),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hook(output: HookOutput, command: Vec<&str>) -> HookConfig {
        HookConfig {
            name: "test-hook".into(),
            command: command.into_iter().map(String::from).collect(),
            when: HookWhen::All,
            workspaces: None,
            input: HookInput::None,
            output,
            priority: 0,
            timeout_secs: 5,
            on_error: HookOnError::Skip,
            env_additions: Default::default(),
            enabled: true,
        }
    }

    #[tokio::test]
    async fn disabled_hook_is_a_noop() {
        let mut h = hook(HookOutput::Prepend, vec!["echo", "ignored"]);
        h.enabled = false;
        let pipeline = HookPipeline::new(vec![h]);
        let out = pipeline
            .apply("build", "s1", Path::new("."), None, true)
            .await
            .unwrap();
        assert_eq!(out.text, "build");
    }

    #[tokio::test]
    async fn hook_prepends_stdout_text() {
        let script = r#"printf '{"text":"CTX: "}'"#;
        let h = hook(HookOutput::Prepend, vec!["sh", "-c", script]);
        let pipeline = HookPipeline::new(vec![h]);
        let out = pipeline
            .apply("build", "s1", Path::new("."), None, true)
            .await
            .unwrap();
        assert_eq!(out.text, "CTX: build");
    }

    #[tokio::test]
    async fn hook_when_first_skips_non_first_message() {
        let mut h = hook(HookOutput::Append, vec!["echo", "ignored"]);
        h.when = HookWhen::First;
        let pipeline = HookPipeline::new(vec![h]);
        let out = pipeline
            .apply("build", "s1", Path::new("."), None, false)
            .await
            .unwrap();
        assert_eq!(out.text, "build");
    }

    #[tokio::test]
    async fn failing_hook_with_fail_policy_aborts() {
        let mut h = hook(HookOutput::Transform, vec!["sh", "-c", "exit 1"]);
        h.on_error = HookOnError::Fail;
        let pipeline = HookPipeline::new(vec![h]);
        let err = pipeline
            .apply("build", "s1", Path::new("."), None, true)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::FatalToTurn(_)));
    }

    #[tokio::test]
    async fn failing_hook_with_skip_policy_continues() {
        let mut h = hook(HookOutput::Transform, vec!["sh", "-c", "exit 1"]);
        h.on_error = HookOnError::Skip;
        let pipeline = HookPipeline::new(vec![h]);
        let out = pipeline
            .apply("build", "s1", Path::new("."), None, true)
            .await
            .unwrap();
        assert_eq!(out.text, "build");
    }
}
