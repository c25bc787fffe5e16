//! Wiring of pools, engine and orchestrator from a [`CoreConfig`]

use crate::config::{CoreConfig, ExecutorSection};
use crate::engine::{EngineProtocol, ExecutionEngine};
use crate::error::CoreResult;
use crate::model::Pipeline;
use crate::events::EventSink;
use crate::executor::{IsolatedTaskExecutor, ShellExecutor, TaskExecutor};
use crate::health::{EngineHealthCheck, HealthCheckManager, PoolHealthCheck};
use crate::orchestrator::PipelineOrchestrator;
use crate::pool::{AgentPool, DrainReport};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Task executor running commands through `sh -c` with the configured limits
pub fn shell_task_executor(section: &ExecutorSection) -> Arc<dyn TaskExecutor> {
    Arc::new(IsolatedTaskExecutor::new(
        ShellExecutor::new(section.shell.clone()),
        section.resource_limits(),
    ))
}

/// Result of [`CoreRuntime::run_pipeline_until`]
#[derive(Debug)]
pub struct PipelineRun {
    /// `None` when the run was abandoned because a pool did not drain in time
    pub outcome: Option<CoreResult<Pipeline>>,
    pub interrupted: bool,
    pub drain_reports: Vec<(String, DrainReport)>,
}

pub struct CoreRuntime {
    config: CoreConfig,
    pools: BTreeMap<String, Arc<AgentPool>>,
    engine: Arc<ExecutionEngine>,
    orchestrator: Arc<PipelineOrchestrator>,
}

impl CoreRuntime {
    /// Build every component from `config`, all sharing `executor`
    pub fn from_config(config: &CoreConfig, executor: Arc<dyn TaskExecutor>) -> CoreResult<Self> {
        Self::build(config, executor, None)
    }

    /// Like [`from_config`](Self::from_config), forwarding every component's
    /// events to `sink`
    pub fn from_config_with_sink(
        config: &CoreConfig,
        executor: Arc<dyn TaskExecutor>,
        sink: Arc<dyn EventSink>,
    ) -> CoreResult<Self> {
        Self::build(config, executor, Some(sink))
    }

    fn build(
        config: &CoreConfig,
        executor: Arc<dyn TaskExecutor>,
        sink: Option<Arc<dyn EventSink>>,
    ) -> CoreResult<Self> {
        config.validate()?;

        let pools: BTreeMap<String, Arc<AgentPool>> = config
            .pools
            .iter()
            .map(|entry| {
                let mut pool =
                    AgentPool::new(entry.agent_type.clone(), entry.size, Arc::clone(&executor));
                if let Some(sink) = &sink {
                    pool = pool.with_event_sink(Arc::clone(sink));
                }
                (entry.agent_type.clone(), Arc::new(pool))
            })
            .collect();

        let mut engine = ExecutionEngine::new(Arc::clone(&executor))
            .with_max_concurrent(config.engine.max_concurrent);
        let mut orchestrator = PipelineOrchestrator::new();
        if let Some(sink) = &sink {
            engine = engine.with_event_sink(Arc::clone(sink));
            orchestrator = orchestrator.with_event_sink(Arc::clone(sink));
        }

        if let Some(default_pool) = config
            .orchestrator
            .default_pool
            .as_ref()
            .and_then(|name| pools.get(name))
        {
            orchestrator = orchestrator.with_default_pool(Arc::clone(default_pool));
        }
        for (agent_type, pool) in &pools {
            orchestrator.register_pool(agent_type.clone(), Arc::clone(pool));
        }

        Ok(Self {
            config: config.clone(),
            pools,
            engine: Arc::new(engine),
            orchestrator: Arc::new(orchestrator),
        })
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn engine(&self) -> Arc<ExecutionEngine> {
        Arc::clone(&self.engine)
    }

    pub fn orchestrator(&self) -> Arc<PipelineOrchestrator> {
        Arc::clone(&self.orchestrator)
    }

    pub fn pool(&self, agent_type: &str) -> Option<Arc<AgentPool>> {
        self.pools.get(agent_type).cloned()
    }

    pub fn pools(&self) -> impl Iterator<Item = &Arc<AgentPool>> {
        self.pools.values()
    }

    pub fn start(&self) {
        self.engine.start();
        info!(
            pools = self.pools.len(),
            engine_capacity = self.engine.max_concurrent(),
            "Task runtime started"
        );
    }

    /// Drain every pool concurrently, then stop the engine
    pub async fn shutdown(&self) -> Vec<(String, DrainReport)> {
        let timeout = self.config.drain_timeout();
        info!(timeout_secs = timeout.as_secs(), "Shutting down task runtime");

        let reports = join_all(self.pools.iter().map(|(agent_type, pool)| async move {
            (agent_type.clone(), pool.drain(timeout).await)
        }))
        .await;

        self.engine.stop();
        info!("Task runtime stopped");
        reports
    }

    /// Run pipeline `id` until it settles or `interrupt` resolves, then shut
    /// down.
    ///
    /// On interrupt the pools drain while the run is still polled: in-flight
    /// tasks keep running and queued dispatches are rejected, so the current
    /// stage fails and the pipeline ends FAILED. If a pool is still busy when
    /// its drain times out, the run is dropped and `outcome` is `None`.
    pub async fn run_pipeline_until<F>(&self, id: Uuid, interrupt: F) -> PipelineRun
    where
        F: Future<Output = ()>,
    {
        let run = self.orchestrator.run_pipeline(id);
        tokio::pin!(run);
        tokio::pin!(interrupt);

        tokio::select! {
            outcome = &mut run => {
                return PipelineRun {
                    outcome: Some(outcome),
                    interrupted: false,
                    drain_reports: self.shutdown().await,
                };
            }
            () = &mut interrupt => {
                warn!(pipeline_id = %id, "Pipeline interrupted, draining pools");
            }
        }

        let drain = self.shutdown();
        tokio::pin!(drain);
        let mut drain_reports = None;
        let outcome = loop {
            tokio::select! {
                outcome = &mut run => break Some(outcome),
                reports = &mut drain, if drain_reports.is_none() => {
                    let stuck = reports.iter().any(|(_, report)| report.timed_out);
                    drain_reports = Some(reports);
                    if stuck {
                        warn!(pipeline_id = %id, "Pools still busy after drain, abandoning run");
                        break None;
                    }
                }
            }
        };

        let drain_reports = match drain_reports {
            Some(reports) => reports,
            None => drain.await,
        };
        PipelineRun {
            outcome,
            interrupted: true,
            drain_reports,
        }
    }

    /// Health checks for every pool plus the engine
    pub fn health_manager(&self) -> HealthCheckManager {
        let mut manager = HealthCheckManager::new();
        for pool in self.pools.values() {
            manager.add_health_check(Box::new(PoolHealthCheck::new(Arc::clone(pool))));
        }
        manager.add_health_check(Box::new(EngineHealthCheck::new(Arc::clone(&self.engine))));
        manager
    }
}
