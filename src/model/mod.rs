//! Work entities: tasks, agents, stages and pipelines
//!
//! These are plain state-carrying records. Each component that owns one is the
//! only writer; the records themselves only do bookkeeping.

pub mod agent;
pub mod mode;
pub mod pipeline;
pub mod task;

pub use agent::{Agent, AgentStatus};
pub use mode::{payload_size, ExecutionMode};
pub use pipeline::{Pipeline, PipelineStatus, Stage, StageBudget, StageStatus};
pub use task::{Task, TaskStatus};

/// Opaque key/value map used for task inputs, results and pipeline metadata
pub type Payload = serde_json::Map<String, serde_json::Value>;
