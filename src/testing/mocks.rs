//! Mock executors for testing
//!
//! Scriptable [`TaskExecutor`] and [`IsolatedExecutor`] implementations that
//! record every call and can measure how many tasks were in flight at once.

use crate::error::TaskError;
use crate::executor::{IsolatedExecutor, IsolatedOutput, ResourceLimits, TaskExecutor};
use crate::model::{Payload, Task};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Tracks current and peak concurrency of an executor
#[derive(Debug, Clone, Default)]
pub struct ConcurrencyProbe {
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl ConcurrencyProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark one task as entered; the returned guard marks it as left on drop
    pub fn enter(&self) -> ProbeGuard {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        ProbeGuard {
            current: Arc::clone(&self.current),
        }
    }

    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct ProbeGuard {
    current: Arc<AtomicUsize>,
}

impl Drop for ProbeGuard {
    fn drop(&mut self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, PartialEq)]
enum MockOutcome {
    Succeed,
    Fail(String),
    Hang,
}

/// Scriptable task executor
///
/// By default every task succeeds with `{"command": ..., "input": ...}`.
/// Clones share call history and the concurrency probe.
#[derive(Debug, Clone)]
pub struct MockExecutor {
    outcome: MockOutcome,
    delay: Option<Duration>,
    failing_commands: HashMap<String, String>,
    calls: Arc<Mutex<Vec<Task>>>,
    probe: ConcurrencyProbe,
}

impl Default for MockExecutor {
    fn default() -> Self {
        Self::succeeding()
    }
}

impl MockExecutor {
    pub fn succeeding() -> Self {
        Self {
            outcome: MockOutcome::Succeed,
            delay: None,
            failing_commands: HashMap::new(),
            calls: Arc::new(Mutex::new(Vec::new())),
            probe: ConcurrencyProbe::new(),
        }
    }

    /// Every task fails with `message`
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            outcome: MockOutcome::Fail(message.into()),
            ..Self::succeeding()
        }
    }

    /// Every task waits forever
    pub fn hanging() -> Self {
        Self {
            outcome: MockOutcome::Hang,
            ..Self::succeeding()
        }
    }

    /// Sleep for `delay` before producing the outcome
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail only the tasks whose command equals `command`
    pub fn fail_on(mut self, command: impl Into<String>, message: impl Into<String>) -> Self {
        self.failing_commands.insert(command.into(), message.into());
        self
    }

    pub fn probe(&self) -> ConcurrencyProbe {
        self.probe.clone()
    }

    pub async fn calls(&self) -> Vec<Task> {
        self.calls.lock().await.clone()
    }

    pub async fn call_count(&self) -> usize {
        self.calls.lock().await.len()
    }

    pub async fn called_commands(&self) -> Vec<String> {
        self.calls
            .lock()
            .await
            .iter()
            .map(|task| task.command.clone())
            .collect()
    }

    pub async fn clear_history(&self) {
        self.calls.lock().await.clear();
    }
}

#[async_trait]
impl TaskExecutor for MockExecutor {
    async fn execute(&self, task: &Task) -> Result<Payload, TaskError> {
        let _guard = self.probe.enter();
        self.calls.lock().await.push(task.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(message) = self.failing_commands.get(&task.command) {
            return Err(TaskError::failed(message.clone()));
        }

        match &self.outcome {
            MockOutcome::Succeed => {
                let mut result = Payload::new();
                result.insert("command".to_string(), Value::String(task.command.clone()));
                result.insert("input".to_string(), Value::Object(task.input_data.clone()));
                Ok(result)
            }
            MockOutcome::Fail(message) => Err(TaskError::failed(message.clone())),
            MockOutcome::Hang => std::future::pending().await,
        }
    }
}

/// Isolated executor returning a fixed output
#[derive(Debug, Clone)]
pub struct MockIsolatedExecutor {
    output: IsolatedOutput,
    calls: Arc<Mutex<Vec<(String, ResourceLimits)>>>,
}

impl MockIsolatedExecutor {
    pub fn exiting_with(exit_code: i32, stdout: &str, stderr: &str) -> Self {
        Self {
            output: IsolatedOutput {
                exit_code,
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
                duration: Duration::from_millis(5),
            },
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub async fn calls(&self) -> Vec<(String, ResourceLimits)> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl IsolatedExecutor for MockIsolatedExecutor {
    async fn run(
        &self,
        command: &str,
        _input: &Payload,
        limits: &ResourceLimits,
    ) -> Result<IsolatedOutput, TaskError> {
        self.calls
            .lock()
            .await
            .push((command.to_string(), limits.clone()));
        Ok(self.output.clone())
    }
}
