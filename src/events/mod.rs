//! Append-only lifecycle events emitted by pools, the engine and the orchestrator
//!
//! Every component owns an [`EventRecorder`]: a private [`EventLog`] backing its
//! read-only `events()` accessor, plus an optional injected [`EventSink`] that
//! receives the same events in the same order.

use crate::model::{ExecutionMode, Payload};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Observable lifecycle events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CoreEvent {
    TaskDispatched {
        task_id: Uuid,
        command: String,
        agent_id: Option<String>,
        mode: ExecutionMode,
    },
    TaskCompleted {
        task_id: Uuid,
        success: bool,
        duration_seconds: f64,
        result: Option<Payload>,
    },
    StageStarted {
        pipeline_id: Uuid,
        stage_name: String,
        agent_type: String,
    },
    StageCompleted {
        pipeline_id: Uuid,
        stage_name: String,
        duration_seconds: f64,
        task_count: usize,
    },
    PipelineStarted {
        pipeline_id: Uuid,
        pipeline_name: String,
        stage_count: usize,
    },
    PipelineCompleted {
        pipeline_id: Uuid,
        pipeline_name: String,
        duration_seconds: f64,
        stages_completed: usize,
    },
    PipelineFailed {
        pipeline_id: Uuid,
        pipeline_name: String,
        failed_stage: String,
        error: String,
    },
}

impl CoreEvent {
    /// Wire name of the event, matching its serialized `event` tag
    pub fn name(&self) -> &'static str {
        match self {
            CoreEvent::TaskDispatched { .. } => "task_dispatched",
            CoreEvent::TaskCompleted { .. } => "task_completed",
            CoreEvent::StageStarted { .. } => "stage_started",
            CoreEvent::StageCompleted { .. } => "stage_completed",
            CoreEvent::PipelineStarted { .. } => "pipeline_started",
            CoreEvent::PipelineCompleted { .. } => "pipeline_completed",
            CoreEvent::PipelineFailed { .. } => "pipeline_failed",
        }
    }
}

/// Destination for emitted events
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &CoreEvent);
}

/// In-memory append-only event log. Clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    entries: Arc<Mutex<Vec<CoreEvent>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<CoreEvent> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of recorded events with the given wire name
    pub fn count(&self, name: &str) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|event| event.name() == name)
            .count()
    }

    /// Event names in emission order
    pub fn names(&self) -> Vec<&'static str> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(CoreEvent::name)
            .collect()
    }
}

impl EventSink for EventLog {
    fn emit(&self, event: &CoreEvent) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}

/// Mirrors events into structured logs
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &CoreEvent) {
        match event {
            CoreEvent::TaskDispatched {
                task_id,
                command,
                agent_id,
                mode,
            } => debug!(
                task_id = %task_id,
                command = %command,
                agent_id = agent_id.as_deref().unwrap_or("-"),
                mode = %mode,
                "Task dispatched"
            ),
            CoreEvent::TaskCompleted {
                task_id,
                success,
                duration_seconds,
                ..
            } => debug!(
                task_id = %task_id,
                success = success,
                duration_seconds = duration_seconds,
                "Task completed"
            ),
            CoreEvent::StageStarted {
                pipeline_id,
                stage_name,
                agent_type,
            } => info!(
                pipeline_id = %pipeline_id,
                stage = %stage_name,
                agent_type = %agent_type,
                "Stage started"
            ),
            CoreEvent::StageCompleted {
                pipeline_id,
                stage_name,
                duration_seconds,
                task_count,
            } => info!(
                pipeline_id = %pipeline_id,
                stage = %stage_name,
                duration_seconds = duration_seconds,
                task_count = task_count,
                "Stage completed"
            ),
            CoreEvent::PipelineStarted {
                pipeline_id,
                pipeline_name,
                stage_count,
            } => info!(
                pipeline_id = %pipeline_id,
                pipeline = %pipeline_name,
                stage_count = stage_count,
                "Pipeline started"
            ),
            CoreEvent::PipelineCompleted {
                pipeline_id,
                pipeline_name,
                duration_seconds,
                stages_completed,
            } => info!(
                pipeline_id = %pipeline_id,
                pipeline = %pipeline_name,
                duration_seconds = duration_seconds,
                stages_completed = stages_completed,
                "Pipeline completed"
            ),
            CoreEvent::PipelineFailed {
                pipeline_id,
                pipeline_name,
                failed_stage,
                error,
            } => warn!(
                pipeline_id = %pipeline_id,
                pipeline = %pipeline_name,
                failed_stage = %failed_stage,
                error = %error,
                "Pipeline failed"
            ),
        }
    }
}

/// Forwards events over an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<CoreEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<CoreEvent>) -> Self {
        Self { tx }
    }

    /// Create a sink together with the receiving end
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<CoreEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: &CoreEvent) {
        // A dropped receiver only means nobody is listening anymore
        let _ = self.tx.send(event.clone());
    }
}

/// Per-component event fan-out: own log plus optional forward sink
#[derive(Clone, Default)]
pub struct EventRecorder {
    log: EventLog,
    forward: Option<Arc<dyn EventSink>>,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(sink: Arc<dyn EventSink>) -> Self {
        Self {
            log: EventLog::new(),
            forward: Some(sink),
        }
    }

    pub fn set_sink(&mut self, sink: Arc<dyn EventSink>) {
        self.forward = Some(sink);
    }

    pub fn record(&self, event: CoreEvent) {
        if let Some(sink) = &self.forward {
            sink.emit(&event);
        }
        self.log.emit(&event);
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    pub fn snapshot(&self) -> Vec<CoreEvent> {
        self.log.snapshot()
    }
}

impl std::fmt::Debug for EventRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRecorder")
            .field("events", &self.log.len())
            .field("forwarding", &self.forward.is_some())
            .finish()
    }
}
