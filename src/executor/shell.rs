//! Unsandboxed reference implementation of [`IsolatedExecutor`]
//!
//! Spawns `<shell> -c <command>` with the task input exposed as JSON in
//! `TASKGRID_INPUT`. Resource limits are advisory here; a real sandbox is
//! expected to enforce them.

use super::{IsolatedExecutor, IsolatedOutput, ResourceLimits};
use crate::error::TaskError;
use crate::model::Payload;
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use tracing::{debug, warn};

/// Environment variable carrying the serialized task input
pub const INPUT_ENV_VAR: &str = "TASKGRID_INPUT";

#[derive(Debug, Clone)]
pub struct ShellExecutor {
    shell: String,
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self::new("sh")
    }
}

impl ShellExecutor {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }

    pub fn shell(&self) -> &str {
        &self.shell
    }
}

/// Lossy UTF-8 decode capped at `max_bytes`
fn capture(bytes: &[u8], max_bytes: usize) -> String {
    let end = bytes.len().min(max_bytes);
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

#[async_trait]
impl IsolatedExecutor for ShellExecutor {
    async fn run(
        &self,
        command: &str,
        input: &Payload,
        limits: &ResourceLimits,
    ) -> Result<IsolatedOutput, TaskError> {
        let input_json = serde_json::to_string(input)
            .map_err(|e| TaskError::failed(format!("Failed to serialize task input: {e}")))?;

        debug!(
            shell = %self.shell,
            command = %command,
            memory_limit_mb = limits.memory_limit_mb,
            cpu_time_secs = limits.cpu_time_secs,
            "Spawning shell command"
        );

        let start = Instant::now();
        let output = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .env(INPUT_ENV_VAR, input_json)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await?;
        let duration = start.elapsed();

        let exit_code = match output.status.code() {
            Some(code) => code,
            None => {
                warn!(command = %command, "Shell command terminated by signal");
                -1
            }
        };

        Ok(IsolatedOutput {
            exit_code,
            stdout: capture(&output.stdout, limits.max_output_bytes),
            stderr: capture(&output.stderr, limits.max_output_bytes),
            duration,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_capture_truncates() {
        assert_eq!(capture(b"hello world", 5), "hello");
        assert_eq!(capture(b"hi", 64), "hi");
        assert_eq!(capture(b"", 64), "");
    }

    #[test]
    fn test_default_shell() {
        assert_eq!(ShellExecutor::default().shell(), "sh");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runs_command_and_captures_output() {
        let executor = ShellExecutor::default();
        let output = executor
            .run("echo out; echo err >&2", &Payload::new(), &ResourceLimits::default())
            .await
            .unwrap();

        assert_eq!(output.exit_code, 0);
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exposes_input_as_env() {
        let executor = ShellExecutor::default();
        let input = json!({"name": "grid"}).as_object().cloned().unwrap();
        let output = executor
            .run(
                &format!("printf '%s' \"${INPUT_ENV_VAR}\""),
                &input,
                &ResourceLimits::default(),
            )
            .await
            .unwrap();

        let echoed: serde_json::Value = serde_json::from_str(&output.stdout).unwrap();
        assert_eq!(echoed["name"], json!("grid"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_reports_exit_code() {
        let executor = ShellExecutor::default();
        let output = executor
            .run("exit 3", &Payload::new(), &ResourceLimits::default())
            .await
            .unwrap();
        assert_eq!(output.exit_code, 3);
    }

    #[tokio::test]
    async fn test_missing_shell_is_spawn_error() {
        let executor = ShellExecutor::new("/definitely/not/a/shell");
        let err = executor
            .run("true", &Payload::new(), &ResourceLimits::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::Spawn { .. }));
    }
}
