//! Multi-stage pipeline orchestrator
//!
//! Stages run strictly in list order. Each stage fans its tasks out to the
//! [`AgentPool`] registered for its agent type and waits for all of them to
//! settle. The first failing stage fails the whole pipeline and the remaining
//! stages never start.

mod spec;

pub use spec::{stage_specs_from_json, StageSpec, StageTaskSpec};

use crate::error::{CoreError, CoreResult, TaskFailure};
use crate::events::{CoreEvent, EventRecorder, EventSink};
use crate::model::{Payload, Pipeline, PipelineStatus, Task};
use crate::pool::AgentPool;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

pub struct PipelineOrchestrator {
    pools: RwLock<HashMap<String, Arc<AgentPool>>>,
    default_pool: Option<Arc<AgentPool>>,
    pipelines: RwLock<HashMap<Uuid, Pipeline>>,
    events: EventRecorder,
}

impl Default for PipelineOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineOrchestrator {
    pub fn new() -> Self {
        Self {
            pools: RwLock::new(HashMap::new()),
            default_pool: None,
            pipelines: RwLock::new(HashMap::new()),
            events: EventRecorder::new(),
        }
    }

    /// Pool used for stages whose agent type has no registered pool
    pub fn with_default_pool(mut self, pool: Arc<AgentPool>) -> Self {
        self.default_pool = Some(pool);
        self
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events.set_sink(sink);
        self
    }

    pub fn register_pool(&self, agent_type: impl Into<String>, pool: Arc<AgentPool>) {
        let agent_type = agent_type.into();
        info!(agent_type = %agent_type, pool_size = pool.pool_size(), "Registered agent pool");
        self.pools
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(agent_type, pool);
    }

    pub fn events(&self) -> Vec<CoreEvent> {
        self.events.snapshot()
    }

    pub fn get_pipeline(&self, id: Uuid) -> Option<Pipeline> {
        self.pipelines
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    /// All known pipelines, oldest first
    pub fn list_pipelines(&self) -> Vec<Pipeline> {
        let mut pipelines: Vec<Pipeline> = self
            .pipelines
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        pipelines.sort_by_key(|p| p.created_at());
        pipelines
    }

    fn resolve_pool(&self, agent_type: &str) -> CoreResult<Arc<AgentPool>> {
        let registered = self
            .pools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(agent_type)
            .cloned();

        registered
            .or_else(|| self.default_pool.clone())
            .ok_or_else(|| CoreError::dependency_not_configured(agent_type))
    }

    /// Apply `update` to the stored pipeline under the write lock
    fn update<R>(&self, id: Uuid, update: impl FnOnce(&mut Pipeline) -> R) -> CoreResult<R> {
        let mut pipelines = self
            .pipelines
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let pipeline = pipelines
            .get_mut(&id)
            .ok_or(CoreError::PipelineNotFound { id })?;
        Ok(update(pipeline))
    }

    /// Validate the stage specs and register a PENDING pipeline. Nothing runs.
    pub fn create_pipeline(
        &self,
        name: impl Into<String>,
        stage_specs: Vec<StageSpec>,
        metadata: Payload,
    ) -> CoreResult<Pipeline> {
        for (index, spec) in stage_specs.iter().enumerate() {
            spec.validate(index)?;
        }

        let stages = stage_specs.iter().map(StageSpec::build).collect();
        let pipeline = Pipeline::new(name, stages, metadata);
        info!(
            pipeline_id = %pipeline.id,
            pipeline = %pipeline.name,
            stage_count = pipeline.stages.len(),
            "Pipeline created"
        );

        self.pipelines
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(pipeline.id, pipeline.clone());
        Ok(pipeline)
    }

    /// Run every stage of a PENDING pipeline in order.
    ///
    /// Returns the COMPLETED pipeline, or the first stage's error after the
    /// stage and the pipeline have been marked FAILED.
    pub async fn run_pipeline(&self, id: Uuid) -> CoreResult<Pipeline> {
        let (name, stage_count) = self.update(id, |pipeline| {
            if pipeline.status() != PipelineStatus::Pending {
                return Err(CoreError::invalid_state(format!(
                    "pipeline {id} is {:?}, only pending pipelines can run",
                    pipeline.status()
                )));
            }
            pipeline.mark_running();
            Ok((pipeline.name.clone(), pipeline.stages.len()))
        })??;

        let span = crate::pipeline_span!(pipeline_id = %id, pipeline = %name);
        async move {
            self.events.record(CoreEvent::PipelineStarted {
                pipeline_id: id,
                pipeline_name: name.clone(),
                stage_count,
            });
            let started = Instant::now();

            for index in 0..stage_count {
                if let Err(err) = self.run_stage(id, index).await {
                    let error = err.to_string();
                    let failed_stage = self.update(id, |pipeline| {
                        pipeline.stages[index].mark_failed(error.clone());
                        pipeline.mark_failed();
                        pipeline.stages[index].name.clone()
                    })?;
                    self.events.record(CoreEvent::PipelineFailed {
                        pipeline_id: id,
                        pipeline_name: name.clone(),
                        failed_stage,
                        error,
                    });
                    return Err(err);
                }
            }

            let pipeline = self.update(id, |pipeline| {
                pipeline.mark_completed();
                pipeline.clone()
            })?;
            self.events.record(CoreEvent::PipelineCompleted {
                pipeline_id: id,
                pipeline_name: name,
                duration_seconds: started.elapsed().as_secs_f64(),
                stages_completed: pipeline.completed_stages().len(),
            });
            Ok(pipeline)
        }
        .instrument(span)
        .await
    }

    async fn run_stage(&self, pipeline_id: Uuid, index: usize) -> CoreResult<()> {
        let stage = self.update(pipeline_id, |pipeline| {
            let stage = &mut pipeline.stages[index];
            stage.mark_running();
            stage.clone()
        })?;

        let span = crate::stage_span!(stage = %stage.name, agent_type = %stage.agent_type);
        async move {
            self.events.record(CoreEvent::StageStarted {
                pipeline_id,
                stage_name: stage.name.clone(),
                agent_type: stage.agent_type.clone(),
            });
            let started = Instant::now();

            let pool = self.resolve_pool(&stage.agent_type)?;
            let (tasks, failures) = if stage.tasks.is_empty() {
                let mut input = Payload::new();
                input.insert("pipeline_id".to_string(), Value::String(pipeline_id.to_string()));
                input.insert("stage".to_string(), Value::String(stage.name.clone()));
                let (task, outcome) = pool.run_dispatch(Task::new(stage.name.clone(), input)).await;

                let failures = match outcome {
                    Ok(()) => Vec::new(),
                    Err(_) => vec![failure_of(&task)],
                };
                (vec![task], failures)
            } else {
                let tasks = pool.dispatch_many(stage.tasks.clone()).await;
                let failures = tasks
                    .iter()
                    .filter(|task| task.is_failed())
                    .map(failure_of)
                    .collect();
                (tasks, failures)
            };

            let task_count = tasks.len();
            self.update(pipeline_id, |pipeline| {
                pipeline.stages[index].tasks = tasks;
            })?;

            let elapsed = started.elapsed();
            if elapsed.as_secs_f64() > stage.budget.timeout_seconds {
                warn!(
                    elapsed_seconds = elapsed.as_secs_f64(),
                    timeout_seconds = stage.budget.timeout_seconds,
                    "Stage ran past its declared timeout"
                );
            }

            if !failures.is_empty() {
                return Err(CoreError::stage_execution(stage.name.clone(), failures));
            }

            self.update(pipeline_id, |pipeline| {
                pipeline.stages[index].mark_completed();
            })?;
            self.events.record(CoreEvent::StageCompleted {
                pipeline_id,
                stage_name: stage.name.clone(),
                duration_seconds: elapsed.as_secs_f64(),
                task_count,
            });
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Create a pipeline and run it immediately
    pub async fn create_and_run(
        &self,
        name: impl Into<String>,
        stage_specs: Vec<StageSpec>,
        metadata: Payload,
    ) -> CoreResult<Pipeline> {
        let pipeline = self.create_pipeline(name, stage_specs, metadata)?;
        self.run_pipeline(pipeline.id).await
    }

    /// Move a FAILED pipeline to ROLLED_BACK. Performs no compensation itself.
    pub fn mark_rolled_back(&self, id: Uuid) -> CoreResult<Pipeline> {
        self.update(id, |pipeline| {
            if pipeline.status() != PipelineStatus::Failed {
                return Err(CoreError::invalid_state(format!(
                    "pipeline {id} is {:?}, only failed pipelines can be rolled back",
                    pipeline.status()
                )));
            }
            pipeline.mark_rolled_back();
            info!(pipeline_id = %id, "Pipeline marked rolled back");
            Ok(pipeline.clone())
        })?
    }
}

fn failure_of(task: &Task) -> TaskFailure {
    TaskFailure {
        task_id: task.id,
        message: task.error().unwrap_or("task failed").to_string(),
    }
}

impl std::fmt::Debug for PipelineOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pools: Vec<String> = self
            .pools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        f.debug_struct("PipelineOrchestrator")
            .field("pools", &pools)
            .field("has_default_pool", &self.default_pool.is_some())
            .finish()
    }
}
