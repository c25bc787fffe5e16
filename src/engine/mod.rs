//! Single-task execution engine with SLA-tiered deadlines
//!
//! Independent of any [`AgentPool`](crate::pool::AgentPool): the engine has
//! its own concurrency ceiling and enforces the deadline of each task's
//! [`ExecutionMode`].

use crate::error::{sanitize_error_message, CoreError, CoreResult};
use crate::events::{CoreEvent, EventRecorder, EventSink};
use crate::executor::TaskExecutor;
use crate::model::{ExecutionMode, Payload, Task, TaskStatus};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

/// Default number of tasks the engine runs at once
pub const DEFAULT_MAX_CONCURRENT: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
    Idle,
    Running,
    Stopped,
}

/// Untyped request accepted by [`EngineProtocol::execute`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnginePayload {
    pub command: String,
    #[serde(default)]
    pub input_data: Payload,
    #[serde(default)]
    pub mode: Option<ExecutionMode>,
}

impl EnginePayload {
    pub fn into_task(self) -> Task {
        Task::new(self.command, self.input_data).with_mode(self.mode.unwrap_or_default())
    }
}

/// Response of [`EngineProtocol::execute`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSummary {
    pub task_id: Uuid,
    pub status: TaskStatus,
    pub result: Option<Payload>,
    /// Seconds between start and completion
    pub duration: f64,
    pub mode: ExecutionMode,
}

impl From<&Task> for EngineSummary {
    fn from(task: &Task) -> Self {
        Self {
            task_id: task.id,
            status: task.status(),
            result: task.result().cloned(),
            duration: task.duration_seconds(),
            mode: task.mode,
        }
    }
}

/// Generic entry point used by code that only speaks JSON
#[async_trait]
pub trait EngineProtocol: Send + Sync {
    async fn execute(&self, payload: Value) -> CoreResult<Value>;
    fn start(&self);
    fn stop(&self);
}

pub struct ExecutionEngine {
    handler: Arc<dyn TaskExecutor>,
    max_concurrent: usize,
    slots: Semaphore,
    status: Mutex<EngineStatus>,
    events: EventRecorder,
}

impl ExecutionEngine {
    pub fn new(handler: Arc<dyn TaskExecutor>) -> Self {
        Self {
            handler,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            slots: Semaphore::new(DEFAULT_MAX_CONCURRENT),
            status: Mutex::new(EngineStatus::Idle),
            events: EventRecorder::new(),
        }
    }

    /// Replace the concurrency ceiling. Values below one are raised to one.
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        self.max_concurrent = max_concurrent;
        self.slots = Semaphore::new(max_concurrent);
        self
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events.set_sink(sink);
        self
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    pub fn status(&self) -> EngineStatus {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn events(&self) -> Vec<CoreEvent> {
        self.events.snapshot()
    }

    fn set_status(&self, status: EngineStatus) {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = status;
    }

    /// Mode the engine will actually run `task` under
    pub fn resolve_mode(task: &Task) -> ExecutionMode {
        if task.mode == ExecutionMode::Standard && !task.command.is_empty() {
            ExecutionMode::for_input(&task.command, &task.input_data)
        } else {
            task.mode
        }
    }

    /// Run one task under its tier deadline.
    ///
    /// Returns the completed task. A deadline overrun marks the task
    /// TIMED_OUT and returns [`CoreError::TaskTimeout`]; any other handler
    /// error marks it FAILED and returns [`CoreError::TaskFailed`]. Both
    /// errors carry the final task record.
    pub async fn execute_task(&self, mut task: Task) -> CoreResult<Task> {
        task.mode = Self::resolve_mode(&task);
        let span = crate::task_span!(task_id = %task.id, mode = %task.mode);

        async move {
            let _permit = self
                .slots
                .acquire()
                .await
                .map_err(|_| CoreError::invalid_state("execution engine is closed"))?;

            task.mark_running();
            self.events.record(CoreEvent::TaskDispatched {
                task_id: task.id,
                command: task.command.clone(),
                agent_id: None,
                mode: task.mode,
            });

            let started = Instant::now();
            let deadline = task.mode.deadline();
            let outcome = tokio::time::timeout(deadline, self.handler.execute(&task)).await;
            let duration_seconds = started.elapsed().as_secs_f64();

            let task_id = task.id;
            let (result, outcome) = match outcome {
                Ok(Ok(result)) => {
                    task.mark_completed(result.clone());
                    (Some(result), Ok(task))
                }
                Ok(Err(err)) => {
                    let message = sanitize_error_message(&err.to_string());
                    task.mark_failed(message.clone());
                    warn!(error = %message, "Task failed");
                    (None, Err(CoreError::task_failed(task, message)))
                }
                Err(_) => {
                    task.mark_timed_out(format!(
                        "exceeded the {} deadline of {}ms",
                        task.mode,
                        deadline.as_millis()
                    ));
                    warn!(
                        deadline_ms = deadline.as_millis() as u64,
                        "Task exceeded its deadline"
                    );
                    (None, Err(CoreError::task_timeout(task)))
                }
            };

            self.events.record(CoreEvent::TaskCompleted {
                task_id,
                success: outcome.is_ok(),
                duration_seconds,
                result,
            });

            if outcome.is_ok() {
                debug!(duration_seconds, "Task completed");
            }
            outcome
        }
        .instrument(span)
        .await
    }
}

#[async_trait]
impl EngineProtocol for ExecutionEngine {
    async fn execute(&self, payload: Value) -> CoreResult<Value> {
        let request: EnginePayload = serde_json::from_value(payload)
            .map_err(|e| CoreError::invalid_input(format!("Malformed engine payload: {e}")))?;

        let task = self.execute_task(request.into_task()).await?;
        serde_json::to_value(EngineSummary::from(&task))
            .map_err(|e| CoreError::invalid_state(format!("Failed to encode summary: {e}")))
    }

    fn start(&self) {
        self.set_status(EngineStatus::Running);
        info!(max_concurrent = self.max_concurrent, "Execution engine started");
    }

    fn stop(&self) {
        self.set_status(EngineStatus::Stopped);
        info!("Execution engine stopped");
    }
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("max_concurrent", &self.max_concurrent)
            .field("available_slots", &self.available_slots())
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mocks::MockExecutor;
    use serde_json::json;
    use std::time::Duration;

    fn engine(executor: MockExecutor) -> ExecutionEngine {
        ExecutionEngine::new(Arc::new(executor))
    }

    #[test]
    fn test_status_toggles() {
        let engine = engine(MockExecutor::succeeding());
        assert_eq!(engine.status(), EngineStatus::Idle);
        engine.start();
        assert_eq!(engine.status(), EngineStatus::Running);
        engine.stop();
        assert_eq!(engine.status(), EngineStatus::Stopped);
    }

    #[test]
    fn test_resolve_mode_honors_pinned_mode() {
        let task = Task::new("x", Payload::new()).with_mode(ExecutionMode::Background);
        assert_eq!(ExecutionEngine::resolve_mode(&task), ExecutionMode::Background);

        let task = Task::new("ls", Payload::new());
        assert_eq!(ExecutionEngine::resolve_mode(&task), ExecutionMode::Instant);

        let task = Task::new("", Payload::new());
        assert_eq!(ExecutionEngine::resolve_mode(&task), ExecutionMode::Standard);
    }

    #[test]
    fn test_max_concurrent_floor() {
        let engine = engine(MockExecutor::succeeding()).with_max_concurrent(0);
        assert_eq!(engine.max_concurrent(), 1);
        assert_eq!(engine.available_slots(), 1);
    }

    #[tokio::test]
    async fn test_execute_task_records_events() {
        let engine = engine(MockExecutor::succeeding());
        let task = engine
            .execute_task(Task::new("echo", Payload::new()))
            .await
            .unwrap();

        assert_eq!(task.status(), TaskStatus::Completed);
        let events = engine.events();
        assert_eq!(events.len(), 2);
        match &events[0] {
            CoreEvent::TaskDispatched { agent_id, mode, .. } => {
                assert!(agent_id.is_none());
                assert_eq!(*mode, ExecutionMode::Instant);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_task_times_out_at_deadline() {
        let engine = engine(MockExecutor::hanging());
        let started = tokio::time::Instant::now();

        let err = engine
            .execute_task(Task::new("ls", Payload::new()))
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        assert!(started.elapsed() >= Duration::from_millis(100));
        let task = err.task().unwrap();
        assert_eq!(task.status(), TaskStatus::TimedOut);
        assert!(task.completed_at().is_some());
        assert!(task.error().unwrap().contains("100ms"));
        match &engine.events()[1] {
            CoreEvent::TaskCompleted { success, result, .. } => {
                assert!(!success);
                assert!(result.is_none());
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_within_deadline_completes() {
        let engine = engine(MockExecutor::succeeding().with_delay(Duration::from_millis(90)));
        let task = engine
            .execute_task(Task::new("ls", Payload::new()))
            .await
            .unwrap();
        assert_eq!(task.mode, ExecutionMode::Instant);
        assert_eq!(task.status(), TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_protocol_returns_summary() {
        let engine = engine(MockExecutor::succeeding());
        let value = engine
            .execute(json!({"command": "build", "input_data": {"target": "all"}, "mode": "fast"}))
            .await
            .unwrap();

        assert_eq!(value["status"], json!("completed"));
        assert_eq!(value["mode"], json!("fast"));
        assert_eq!(value["result"]["input"]["target"], json!("all"));
        assert!(value["task_id"].is_string());
        assert!(value["duration"].is_number());
    }

    #[tokio::test]
    async fn test_protocol_rejects_malformed_payload() {
        let engine = engine(MockExecutor::succeeding());
        let err = engine.execute(json!({"input_data": {}})).await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput { .. }));
        assert!(engine.events().is_empty());
    }

    #[tokio::test]
    async fn test_handler_error_is_task_failed() {
        let engine = engine(MockExecutor::failing("exploded"));
        let err = engine
            .execute_task(Task::new("run", Payload::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::TaskFailed { ref message, .. } if message == "exploded"));

        let task = err.into_task().unwrap();
        assert_eq!(task.status(), TaskStatus::Failed);
        assert_eq!(task.error(), Some("exploded"));
        assert!(task.completed_at().is_some());
    }
}
