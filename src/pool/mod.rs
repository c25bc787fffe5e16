//! Fixed-size pool of logical execution slots
//!
//! The `AgentPool` caps the number of tasks in flight at `pool_size`. Each
//! dispatch waits for a semaphore permit, takes the first idle agent
//! (first-fit), runs the task through the pool's [`TaskExecutor`] and records
//! the outcome on both the task and the agent.
//!
//! Draining is best-effort: it stops admissions and waits up to a timeout for
//! in-flight work, then takes every agent offline whether or not that work
//! finished. Nothing in flight is cancelled.

mod lease;

use crate::error::{sanitize_error_message, CoreError, CoreResult};
use crate::events::{CoreEvent, EventRecorder, EventSink};
use crate::executor::TaskExecutor;
use crate::model::{Agent, AgentStatus, Task};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use lease::SlotLease;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

/// Outcome of [`AgentPool::drain`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// The timeout elapsed before in-flight work settled
    pub timed_out: bool,
    /// Dispatches still running when the agents went offline
    pub still_active: usize,
}

/// Per-agent entry of a [`PoolHealth`] snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentHealth {
    pub id: String,
    pub status: AgentStatus,
    pub current_task_id: Option<Uuid>,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub last_heartbeat: DateTime<Utc>,
}

/// Read-only snapshot of a pool
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolHealth {
    pub pool_size: usize,
    pub agent_type: String,
    pub available_count: usize,
    pub active_count: usize,
    pub draining: bool,
    pub agents: Vec<AgentHealth>,
}

pub struct AgentPool {
    agent_type: String,
    pool_size: usize,
    agents: Mutex<Vec<Agent>>,
    slots: Semaphore,
    draining: AtomicBool,
    active: AtomicUsize,
    settled: Notify,
    executor: Arc<dyn TaskExecutor>,
    events: EventRecorder,
}

impl AgentPool {
    /// Create a pool of `pool_size` idle agents of `agent_type`
    pub fn new(
        agent_type: impl Into<String>,
        pool_size: usize,
        executor: Arc<dyn TaskExecutor>,
    ) -> Self {
        let agent_type = agent_type.into();
        let agents = (0..pool_size)
            .map(|index| Agent::new(format!("{agent_type}-{index}"), agent_type.clone()))
            .collect();

        Self {
            agent_type,
            pool_size,
            agents: Mutex::new(agents),
            slots: Semaphore::new(pool_size),
            draining: AtomicBool::new(false),
            active: AtomicUsize::new(0),
            settled: Notify::new(),
            executor,
            events: EventRecorder::new(),
        }
    }

    /// Forward every event to `sink` in addition to the pool's own log
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events.set_sink(sink);
        self
    }

    pub fn agent_type(&self) -> &str {
        &self.agent_type
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Free slots right now
    pub fn available_count(&self) -> usize {
        self.slots.available_permits()
    }

    /// Dispatches currently holding a slot
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    pub fn agents(&self) -> Vec<Agent> {
        self.lock_agents().clone()
    }

    pub fn events(&self) -> Vec<CoreEvent> {
        self.events.snapshot()
    }

    pub(crate) fn lock_agents(&self) -> MutexGuard<'_, Vec<Agent>> {
        self.agents.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run one task on the first idle agent, waiting for a free slot first.
    ///
    /// Returns the completed task. An executor error is recorded on the task
    /// (FAILED) and on the agent, then returned as [`CoreError::TaskFailed`]
    /// carrying that FAILED record.
    /// Fails with [`CoreError::PoolExhausted`] while the pool is draining.
    pub async fn dispatch_task(&self, task: Task) -> CoreResult<Task> {
        let (task, outcome) = self.run_dispatch(task).await;
        outcome.map(|()| task)
    }

    /// Dispatch all tasks concurrently and wait for every one to settle.
    ///
    /// Results keep input order. A dispatch that errored shows up as a FAILED
    /// task instead of an error.
    pub async fn dispatch_many(&self, tasks: Vec<Task>) -> Vec<Task> {
        let count = tasks.len();
        let settled = join_all(tasks.into_iter().map(|task| self.run_dispatch(task))).await;

        let results: Vec<Task> = settled.into_iter().map(|(task, _)| task).collect();
        let failed = results.iter().filter(|task| task.is_failed()).count();
        debug!(
            agent_type = %self.agent_type,
            dispatched = count,
            failed = failed,
            "Fan-in dispatch settled"
        );
        results
    }

    pub(crate) async fn run_dispatch(&self, mut task: Task) -> (Task, CoreResult<()>) {
        let span = crate::task_span!(task_id = %task.id, agent_type = %self.agent_type);
        async move {
            let lease = match self.acquire_slot(task.id).await {
                Ok(lease) => lease,
                Err(err) => {
                    task.mark_failed(err.to_string());
                    return (task, Err(err));
                }
            };

            task.mark_running();
            self.events.record(CoreEvent::TaskDispatched {
                task_id: task.id,
                command: task.command.clone(),
                agent_id: Some(lease.agent_id().to_string()),
                mode: task.mode,
            });

            let started = Instant::now();
            let outcome = self.executor.execute(&task).await;
            let duration_seconds = started.elapsed().as_secs_f64();

            match outcome {
                Ok(result) => {
                    task.mark_completed(result.clone());
                    lease.finish(true);
                    self.events.record(CoreEvent::TaskCompleted {
                        task_id: task.id,
                        success: true,
                        duration_seconds,
                        result: Some(result),
                    });
                    debug!(duration_seconds, "Task completed");
                    (task, Ok(()))
                }
                Err(err) => {
                    let message = sanitize_error_message(&err.to_string());
                    task.mark_failed(message.clone());
                    lease.finish(false);
                    self.events.record(CoreEvent::TaskCompleted {
                        task_id: task.id,
                        success: false,
                        duration_seconds,
                        result: None,
                    });
                    warn!(error = %message, "Task failed");
                    let err = CoreError::task_failed(task.clone(), message);
                    (task, Err(err))
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn acquire_slot(&self, task_id: Uuid) -> CoreResult<SlotLease<'_>> {
        if self.pool_size == 0 {
            return Err(CoreError::pool_exhausted(
                &self.agent_type,
                "pool has no agents",
            ));
        }
        if self.is_draining() {
            return Err(CoreError::pool_exhausted(&self.agent_type, "pool is draining"));
        }

        let permit = self
            .slots
            .acquire()
            .await
            .map_err(|_| CoreError::pool_exhausted(&self.agent_type, "pool is closed"))?;

        // Draining may have started while this dispatch was queued
        if self.is_draining() {
            return Err(CoreError::pool_exhausted(&self.agent_type, "pool is draining"));
        }

        let assigned = {
            let mut agents = self.lock_agents();
            agents
                .iter_mut()
                .enumerate()
                .find(|(_, agent)| agent.is_idle())
                .map(|(index, agent)| {
                    agent.assign(task_id);
                    // Raised under the agents lock that drain also takes
                    self.active.fetch_add(1, Ordering::SeqCst);
                    (index, agent.id.clone())
                })
        };

        match assigned {
            Some((index, agent_id)) => Ok(SlotLease::new(self, index, agent_id, task_id, permit)),
            None => Err(CoreError::pool_exhausted(
                &self.agent_type,
                "no idle agent available",
            )),
        }
    }

    /// Stop admissions and wait up to `timeout` for in-flight dispatches.
    ///
    /// All agents end OFFLINE regardless of whether the wait timed out.
    pub async fn drain(&self, timeout: Duration) -> DrainReport {
        let span = crate::pool_span!(agent_type = %self.agent_type, operation = "drain");
        self.drain_within(timeout).instrument(span).await
    }

    async fn drain_within(&self, timeout: Duration) -> DrainReport {
        self.draining.store(true, Ordering::SeqCst);
        for agent in self.lock_agents().iter_mut() {
            agent.begin_draining();
        }
        info!(
            active = self.active_count(),
            timeout_ms = timeout.as_millis() as u64,
            "Draining agent pool"
        );

        let settled = async {
            loop {
                let notified = self.settled.notified();
                if self.active_count() == 0 {
                    break;
                }
                notified.await;
            }
        };
        let timed_out = tokio::time::timeout(timeout, settled).await.is_err();
        let still_active = self.active_count();

        for agent in self.lock_agents().iter_mut() {
            agent.take_offline();
        }

        if timed_out {
            warn!(
                still_active = still_active,
                "Drain timed out; taking agents offline with work in flight"
            );
        } else {
            info!("Agent pool drained");
        }

        DrainReport {
            timed_out,
            still_active,
        }
    }

    /// Clear the draining flag and return every agent to IDLE
    pub fn reset(&self) {
        self.draining.store(false, Ordering::SeqCst);
        for agent in self.lock_agents().iter_mut() {
            agent.reset();
        }
        info!(agent_type = %self.agent_type, "Agent pool reset");
    }

    pub fn health_summary(&self) -> PoolHealth {
        let agents = self
            .lock_agents()
            .iter()
            .map(|agent| AgentHealth {
                id: agent.id.clone(),
                status: agent.status(),
                current_task_id: agent.current_task_id(),
                tasks_completed: agent.tasks_completed(),
                tasks_failed: agent.tasks_failed(),
                last_heartbeat: agent.last_heartbeat(),
            })
            .collect();

        PoolHealth {
            pool_size: self.pool_size,
            agent_type: self.agent_type.clone(),
            available_count: self.available_count(),
            active_count: self.active_count(),
            draining: self.is_draining(),
            agents,
        }
    }
}

impl std::fmt::Debug for AgentPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentPool")
            .field("agent_type", &self.agent_type)
            .field("pool_size", &self.pool_size)
            .field("active", &self.active_count())
            .field("draining", &self.is_draining())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Payload, TaskStatus};
    use crate::testing::mocks::MockExecutor;

    fn task(command: &str) -> Task {
        Task::new(command, Payload::new())
    }

    #[test]
    fn test_new_pool_has_idle_agents() {
        let pool = AgentPool::new("analyzer", 3, Arc::new(MockExecutor::succeeding()));
        let agents = pool.agents();

        assert_eq!(agents.len(), 3);
        assert_eq!(agents[0].id, "analyzer-0");
        assert_eq!(agents[2].id, "analyzer-2");
        assert!(agents.iter().all(|a| a.status() == AgentStatus::Idle));
        assert_eq!(pool.available_count(), 3);
        assert_eq!(pool.active_count(), 0);
    }

    #[tokio::test]
    async fn test_dispatch_uses_first_idle_agent() {
        let pool = AgentPool::new("analyzer", 2, Arc::new(MockExecutor::succeeding()));
        let done = pool.dispatch_task(task("one")).await.unwrap();

        assert_eq!(done.status(), TaskStatus::Completed);
        let summary = pool.health_summary();
        assert_eq!(summary.agents[0].tasks_completed, 1);
        assert_eq!(summary.agents[1].tasks_completed, 0);
    }

    #[tokio::test]
    async fn test_zero_sized_pool_is_exhausted() {
        let pool = AgentPool::new("analyzer", 0, Arc::new(MockExecutor::succeeding()));
        let err = pool.dispatch_task(task("one")).await.unwrap_err();
        assert!(err.is_pool_exhausted());
        assert!(pool.events().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_dispatch_releases_slot() {
        let executor = Arc::new(MockExecutor::hanging());
        let pool = AgentPool::new("analyzer", 1, executor);

        let result =
            tokio::time::timeout(Duration::from_millis(20), pool.dispatch_task(task("hang"))).await;
        assert!(result.is_err(), "dispatch should still be hanging");

        assert_eq!(pool.available_count(), 1);
        assert_eq!(pool.active_count(), 0);
        let agent = &pool.agents()[0];
        assert_eq!(agent.status(), AgentStatus::Idle);
        assert_eq!(agent.tasks_failed(), 1);
    }

    #[tokio::test]
    async fn test_failed_dispatch_records_sanitized_error() {
        let pool = AgentPool::new(
            "analyzer",
            1,
            Arc::new(MockExecutor::failing("login failed password=hunter2")),
        );
        let results = pool.dispatch_many(vec![task("login")]).await;

        assert_eq!(results[0].status(), TaskStatus::Failed);
        let error = results[0].error().unwrap();
        assert!(!error.contains("hunter2"));
        assert!(error.contains("password=***"));
    }

    #[tokio::test]
    async fn test_reset_after_drain_restores_idle() {
        let pool = AgentPool::new("analyzer", 2, Arc::new(MockExecutor::succeeding()));
        let report = pool.drain(Duration::from_millis(10)).await;
        assert!(!report.timed_out);
        assert!(pool.agents().iter().all(|a| a.status() == AgentStatus::Offline));

        pool.reset();
        assert!(!pool.is_draining());
        assert!(pool.agents().iter().all(|a| a.status() == AgentStatus::Idle));
        assert!(pool.dispatch_task(task("again")).await.is_ok());
    }
}
