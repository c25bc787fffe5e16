//! taskgrid - bounded-concurrency task execution core
//!
//! Three cooperating components run work handed to a pluggable
//! [`TaskExecutor`]:
//!
//! - [`AgentPool`]: a fixed set of execution slots with first-fit assignment,
//!   a hard concurrency ceiling and best-effort draining
//! - [`ExecutionEngine`]: one-off execution with SLA-tiered deadlines
//!   ([`ExecutionMode`]) under its own concurrency ceiling
//! - [`PipelineOrchestrator`]: sequential stages, each fanning out to a pool,
//!   aborting on the first failed stage
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use taskgrid::testing::MockExecutor;
//! use taskgrid::{AgentPool, Payload, PipelineOrchestrator, StageSpec};
//!
//! # async fn demo() -> taskgrid::CoreResult<()> {
//! let pool = Arc::new(AgentPool::new("analyzer", 4, Arc::new(MockExecutor::succeeding())));
//! let orchestrator = PipelineOrchestrator::new();
//! orchestrator.register_pool("analyzer", pool);
//!
//! let pipeline = orchestrator
//!     .create_and_run(
//!         "release",
//!         vec![StageSpec::new("build"), StageSpec::new("test")],
//!         Payload::new(),
//!     )
//!     .await?;
//! println!("{:?}", pipeline.status());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod executor;
pub mod health;
pub mod model;
pub mod observability;
pub mod orchestrator;
pub mod pool;
pub mod runtime;
pub mod testing;

pub use config::{ConfigError, CoreConfig};
pub use engine::{EnginePayload, EngineProtocol, EngineStatus, EngineSummary, ExecutionEngine};
pub use error::{CoreError, CoreResult, TaskError, TaskFailure};
pub use events::{ChannelSink, CoreEvent, EventLog, EventSink, TracingSink};
pub use executor::{
    FnExecutor, IsolatedExecutor, IsolatedOutput, IsolatedTaskExecutor, ResourceLimits,
    ShellExecutor, TaskExecutor,
};
pub use model::{
    Agent, AgentStatus, ExecutionMode, Payload, Pipeline, PipelineStatus, Stage, StageBudget,
    StageStatus, Task, TaskStatus,
};
pub use orchestrator::{stage_specs_from_json, PipelineOrchestrator, StageSpec, StageTaskSpec};
pub use pool::{AgentPool, DrainReport, PoolHealth};
pub use runtime::{CoreRuntime, PipelineRun};
