//! Test helpers and utilities for integration tests

use std::sync::Arc;
use taskgrid::testing::MockExecutor;
use taskgrid::{AgentPool, Payload, Task};

/// Pool of `size` analyzer agents backed by `executor`
#[allow(dead_code)]
pub fn analyzer_pool(size: usize, executor: &MockExecutor) -> Arc<AgentPool> {
    Arc::new(AgentPool::new("analyzer", size, Arc::new(executor.clone())))
}

/// Pending task with an empty input
#[allow(dead_code)]
pub fn task(command: &str) -> Task {
    Task::new(command, Payload::new())
}

/// Input payload whose only value is a string of `len` characters
#[allow(dead_code)]
pub fn payload_with_text(len: usize) -> Payload {
    let mut payload = Payload::new();
    payload.insert("text".to_string(), "x".repeat(len).into());
    payload
}
