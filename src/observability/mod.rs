//! Observability for the task execution core
//!
//! Structured logging setup and the span macros used by pools, the engine and
//! the orchestrator. Lifecycle events are mirrored into these logs by
//! [`TracingSink`](crate::events::TracingSink).

pub mod logging;

pub use logging::{init_default_logging, init_logging, parse_level, LogFormat};

pub use logging::{pipeline_span, pool_span, stage_span, task_span};
