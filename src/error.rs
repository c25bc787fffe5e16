//! Error taxonomy for the task execution core
//!
//! Task-level failures are always written onto the [`Task`](crate::model::Task)
//! before one of these errors propagates. [`CoreError::TaskFailed`] and
//! [`CoreError::TaskTimeout`] carry that final record; use
//! [`CoreError::task`] or [`CoreError::into_task`] to get it back.

use crate::config::ConfigError;
use crate::model::{ExecutionMode, Task};
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use uuid::Uuid;

/// Maximum length of an error message stored on a task
pub const MAX_ERROR_MESSAGE_LEN: usize = 500;

/// One failing task inside a stage
#[derive(Debug, Clone, PartialEq)]
pub struct TaskFailure {
    pub task_id: Uuid,
    pub message: String,
}

/// Main error type for pool, engine and orchestrator operations
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Agent pool '{agent_type}' exhausted: {reason}")]
    PoolExhausted { agent_type: String, reason: String },

    #[error("Task {task_id} exceeded the {mode} deadline of {deadline_ms}ms")]
    TaskTimeout {
        task_id: Uuid,
        mode: ExecutionMode,
        deadline_ms: u64,
        task: Box<Task>,
    },

    #[error("Task {task_id} failed: {message}")]
    TaskFailed {
        task_id: Uuid,
        message: String,
        task: Box<Task>,
    },

    #[error("Stage '{stage}' failed: {}", format_failures(.failures))]
    StageExecution {
        stage: String,
        failures: Vec<TaskFailure>,
    },

    #[error("Pipeline not found: {id}")]
    PipelineNotFound { id: Uuid },

    #[error("No agent pool configured for agent type '{agent_type}'")]
    DependencyNotConfigured { agent_type: String },

    #[error("Invalid stage specification at index {index}: {message}")]
    InvalidStageSpec { index: usize, message: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl CoreError {
    pub fn pool_exhausted<S: Into<String>, R: Into<String>>(agent_type: S, reason: R) -> Self {
        Self::PoolExhausted {
            agent_type: agent_type.into(),
            reason: reason.into(),
        }
    }

    /// Wrap a task already marked TIMED_OUT
    pub fn task_timeout(task: Task) -> Self {
        Self::TaskTimeout {
            task_id: task.id,
            mode: task.mode,
            deadline_ms: task.mode.deadline().as_millis() as u64,
            task: Box::new(task),
        }
    }

    /// Wrap a task already marked FAILED
    pub fn task_failed<S: Into<String>>(task: Task, message: S) -> Self {
        Self::TaskFailed {
            task_id: task.id,
            message: message.into(),
            task: Box::new(task),
        }
    }

    pub fn stage_execution<S: Into<String>>(stage: S, failures: Vec<TaskFailure>) -> Self {
        Self::StageExecution {
            stage: stage.into(),
            failures,
        }
    }

    pub fn dependency_not_configured<S: Into<String>>(agent_type: S) -> Self {
        Self::DependencyNotConfigured {
            agent_type: agent_type.into(),
        }
    }

    pub fn invalid_stage_spec<S: Into<String>>(index: usize, message: S) -> Self {
        Self::InvalidStageSpec {
            index,
            message: message.into(),
        }
    }

    pub fn invalid_input<S: Into<String>>(message: S) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn invalid_state<S: Into<String>>(message: S) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    pub fn is_pool_exhausted(&self) -> bool {
        matches!(self, Self::PoolExhausted { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TaskTimeout { .. })
    }

    /// Final record of the task this error is about, if any
    pub fn task(&self) -> Option<&Task> {
        match self {
            Self::TaskFailed { task, .. } | Self::TaskTimeout { task, .. } => Some(task),
            _ => None,
        }
    }

    pub fn into_task(self) -> Option<Task> {
        match self {
            Self::TaskFailed { task, .. } | Self::TaskTimeout { task, .. } => Some(*task),
            _ => None,
        }
    }
}

/// Error returned by a task executor
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TaskError {
    #[error("{message}")]
    Failed { message: String },

    #[error("Command exited with status {exit_code}: {stderr}")]
    NonZeroExit { exit_code: i32, stderr: String },

    #[error("Failed to spawn command: {message}")]
    Spawn { message: String },
}

impl TaskError {
    pub fn failed<S: Into<String>>(message: S) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for TaskError {
    fn from(err: std::io::Error) -> Self {
        Self::Spawn {
            message: err.to_string(),
        }
    }
}

fn format_failures(failures: &[TaskFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{}: {}", f.task_id, f.message))
        .collect::<Vec<_>>()
        .join("; ")
}

static SECRET_PATTERN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?i)(password|token|key|secret)[=:]\s*\S+").ok());

/// Redact secret-looking `key=value` pairs and cap the length of a message
/// before it is recorded on a task
pub fn sanitize_error_message(message: &str) -> String {
    let mut sanitized = match SECRET_PATTERN.as_ref() {
        Some(pattern) => pattern.replace_all(message, "${1}=***").to_string(),
        None => message.to_string(),
    };

    if sanitized.len() > MAX_ERROR_MESSAGE_LEN {
        let suffix = "...[truncated]";
        let mut cut = MAX_ERROR_MESSAGE_LEN - suffix.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized.truncate(cut);
        sanitized.push_str(suffix);
    }

    sanitized
}

/// Result type for core operations
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_execution_aggregates_failures() {
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        let error = CoreError::stage_execution(
            "build",
            vec![
                TaskFailure {
                    task_id: first,
                    message: "lint failed".to_string(),
                },
                TaskFailure {
                    task_id: second,
                    message: "tests failed".to_string(),
                },
            ],
        );

        let text = error.to_string();
        assert!(text.starts_with("Stage 'build' failed: "));
        assert!(text.contains(&format!("{first}: lint failed")));
        assert!(text.contains(&format!("{second}: tests failed")));
    }

    #[test]
    fn test_task_timeout_carries_deadline() {
        let task = Task::new("x", crate::model::Payload::new()).with_mode(ExecutionMode::Fast);
        let id = task.id;
        let error = CoreError::task_timeout(task);
        assert!(error.is_timeout());
        assert!(error.to_string().contains("500ms"));
        assert!(error.to_string().contains("fast"));
        assert_eq!(error.task().map(|t| t.id), Some(id));
    }

    #[test]
    fn test_into_task_only_for_task_level_errors() {
        let task = Task::new("build", crate::model::Payload::new());
        let id = task.id;
        assert_eq!(
            CoreError::task_failed(task, "boom").into_task().map(|t| t.id),
            Some(id)
        );
        assert!(CoreError::invalid_input("bad").into_task().is_none());
    }

    #[test]
    fn test_pool_exhausted_constructor() {
        let error = CoreError::pool_exhausted("analyzer", "pool is draining");
        assert!(error.is_pool_exhausted());
        assert_eq!(
            error.to_string(),
            "Agent pool 'analyzer' exhausted: pool is draining"
        );
    }

    #[test]
    fn test_dependency_not_configured_message() {
        let error = CoreError::dependency_not_configured("builder");
        assert_eq!(
            error.to_string(),
            "No agent pool configured for agent type 'builder'"
        );
    }

    #[test]
    fn test_task_error_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "no such shell");
        let error: TaskError = io.into();
        assert!(matches!(error, TaskError::Spawn { .. }));
        assert!(error.to_string().contains("no such shell"));
    }

    #[test]
    fn test_sanitize_redacts_secrets() {
        let sanitized = sanitize_error_message("auth failed: password=hunter2 token: abc123");
        assert!(!sanitized.contains("hunter2"));
        assert!(!sanitized.contains("abc123"));
        assert!(sanitized.contains("password=***"));
    }

    #[test]
    fn test_sanitize_truncates_long_messages() {
        let sanitized = sanitize_error_message(&"x".repeat(600));
        assert!(sanitized.len() <= MAX_ERROR_MESSAGE_LEN);
        assert!(sanitized.ends_with("...[truncated]"));
    }

    #[test]
    fn test_sanitize_truncates_on_char_boundary() {
        let sanitized = sanitize_error_message(&"é".repeat(400));
        assert!(sanitized.len() <= MAX_ERROR_MESSAGE_LEN);
        assert!(sanitized.ends_with("...[truncated]"));
    }

    #[test]
    fn test_sanitize_keeps_short_messages() {
        assert_eq!(sanitize_error_message("plain failure"), "plain failure");
        assert_eq!(sanitize_error_message(""), "");
    }
}
