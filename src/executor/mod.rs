//! Task executor contract
//!
//! Agent pools and the execution engine never run commands themselves. They
//! hand each task to a [`TaskExecutor`] and record whatever comes back.
//! Sandboxed command execution lives behind [`IsolatedExecutor`]; the
//! [`IsolatedTaskExecutor`] adapter bridges the two.

pub mod shell;

pub use shell::ShellExecutor;

use crate::error::TaskError;
use crate::model::{Payload, Task};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Runs a single task and returns its result payload
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, task: &Task) -> Result<Payload, TaskError>;
}

#[async_trait]
impl<E: TaskExecutor + ?Sized> TaskExecutor for Arc<E> {
    async fn execute(&self, task: &Task) -> Result<Payload, TaskError> {
        (**self).execute(task).await
    }
}

/// Adapts an async closure into a [`TaskExecutor`]
///
/// The closure receives an owned clone of the task.
pub struct FnExecutor<F> {
    func: F,
}

impl<F, Fut> FnExecutor<F>
where
    F: Fn(Task) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Payload, TaskError>> + Send,
{
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F, Fut> TaskExecutor for FnExecutor<F>
where
    F: Fn(Task) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Payload, TaskError>> + Send,
{
    async fn execute(&self, task: &Task) -> Result<Payload, TaskError> {
        (self.func)(task.clone()).await
    }
}

/// Resource limits handed to the isolated executor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub memory_limit_mb: u64,
    pub cpu_time_secs: u64,
    pub max_output_bytes: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory_limit_mb: 512,
            cpu_time_secs: 60,
            max_output_bytes: 64 * 1024,
        }
    }
}

/// Outcome of one isolated command run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolatedOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

/// Process-level sandbox boundary
#[async_trait]
pub trait IsolatedExecutor: Send + Sync {
    async fn run(
        &self,
        command: &str,
        input: &Payload,
        limits: &ResourceLimits,
    ) -> Result<IsolatedOutput, TaskError>;
}

/// Runs task commands through an [`IsolatedExecutor`]
pub struct IsolatedTaskExecutor<E> {
    isolated: E,
    limits: ResourceLimits,
}

impl<E: IsolatedExecutor> IsolatedTaskExecutor<E> {
    pub fn new(isolated: E, limits: ResourceLimits) -> Self {
        Self { isolated, limits }
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }
}

#[async_trait]
impl<E: IsolatedExecutor> TaskExecutor for IsolatedTaskExecutor<E> {
    async fn execute(&self, task: &Task) -> Result<Payload, TaskError> {
        let output = self
            .isolated
            .run(&task.command, &task.input_data, &self.limits)
            .await?;

        debug!(
            task_id = %task.id,
            exit_code = output.exit_code,
            duration_ms = output.duration.as_millis() as u64,
            "Isolated command finished"
        );

        if output.exit_code != 0 {
            return Err(TaskError::NonZeroExit {
                exit_code: output.exit_code,
                stderr: output.stderr,
            });
        }

        let mut result = Payload::new();
        result.insert("exit_code".to_string(), Value::from(output.exit_code));
        result.insert("stdout".to_string(), Value::String(output.stdout));
        result.insert("stderr".to_string(), Value::String(output.stderr));
        result.insert(
            "duration_seconds".to_string(),
            Value::from(output.duration.as_secs_f64()),
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mocks::MockIsolatedExecutor;
    use serde_json::json;

    #[tokio::test]
    async fn test_fn_executor_receives_task() {
        let executor = FnExecutor::new(|task: Task| async move {
            let mut out = Payload::new();
            out.insert("echo".to_string(), json!(task.command));
            Ok(out)
        });

        let task = Task::new("hello", Payload::new());
        let result = executor.execute(&task).await.unwrap();
        assert_eq!(result["echo"], json!("hello"));
    }

    #[tokio::test]
    async fn test_arc_executor_delegates() {
        let executor: Arc<dyn TaskExecutor> =
            Arc::new(FnExecutor::new(|_task: Task| async { Err(TaskError::failed("nope")) }));
        let task = Task::new("x", Payload::new());
        let err = executor.execute(&task).await.unwrap_err();
        assert_eq!(err, TaskError::failed("nope"));
    }

    #[tokio::test]
    async fn test_isolated_success_maps_to_payload() {
        let isolated = MockIsolatedExecutor::exiting_with(0, "done", "");
        let executor = IsolatedTaskExecutor::new(isolated, ResourceLimits::default());

        let task = Task::new("make", Payload::new());
        let result = executor.execute(&task).await.unwrap();

        assert_eq!(result["exit_code"], json!(0));
        assert_eq!(result["stdout"], json!("done"));
        assert!(result.contains_key("duration_seconds"));
    }

    #[tokio::test]
    async fn test_isolated_non_zero_exit_fails() {
        let isolated = MockIsolatedExecutor::exiting_with(2, "", "missing target");
        let executor = IsolatedTaskExecutor::new(isolated, ResourceLimits::default());

        let task = Task::new("make", Payload::new());
        let err = executor.execute(&task).await.unwrap_err();

        assert_eq!(
            err,
            TaskError::NonZeroExit {
                exit_code: 2,
                stderr: "missing target".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_isolated_receives_limits() {
        let isolated = MockIsolatedExecutor::exiting_with(0, "", "");
        let limits = ResourceLimits {
            memory_limit_mb: 64,
            cpu_time_secs: 5,
            max_output_bytes: 128,
        };
        let executor = IsolatedTaskExecutor::new(isolated.clone(), limits.clone());

        executor
            .execute(&Task::new("true", Payload::new()))
            .await
            .unwrap();

        let calls = isolated.calls().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "true");
        assert_eq!(calls[0].1, limits);
    }
}
