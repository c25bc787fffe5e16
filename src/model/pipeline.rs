//! Stage and Pipeline entities

use super::{Payload, Task};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Declared per-stage budget. Recorded on the stage, never enforced.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StageBudget {
    pub timeout_seconds: f64,
    pub max_retries: u32,
}

impl Default for StageBudget {
    fn default() -> Self {
        Self {
            timeout_seconds: 30.0,
            max_retries: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub name: String,
    pub agent_type: String,
    pub budget: StageBudget,
    pub tasks: Vec<Task>,
    status: StageStatus,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    error: Option<String>,
}

impl Stage {
    pub fn new(name: impl Into<String>, agent_type: impl Into<String>, budget: StageBudget) -> Self {
        Self {
            name: name.into(),
            agent_type: agent_type.into(),
            budget,
            tasks: Vec::new(),
            status: StageStatus::Pending,
            started_at: None,
            completed_at: None,
            error: None,
        }
    }

    pub fn with_tasks(mut self, tasks: Vec<Task>) -> Self {
        self.tasks = tasks;
        self
    }

    pub fn status(&self) -> StageStatus {
        self.status
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn duration(&self) -> Option<Duration> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => (end - start).to_std().ok(),
            _ => None,
        }
    }

    pub fn mark_running(&mut self) {
        self.status = StageStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self) {
        self.status = StageStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = StageStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Pending,
    Running,
    Completed,
    Failed,
    /// Terminal. Only reachable through an explicit external rollback call.
    RolledBack,
}

impl PipelineStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PipelineStatus::Completed | PipelineStatus::Failed | PipelineStatus::RolledBack
        )
    }
}

/// Ordered sequence of stages executed strictly one after another
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: Uuid,
    pub name: String,
    pub stages: Vec<Stage>,
    #[serde(default)]
    pub metadata: Payload,
    status: PipelineStatus,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl Pipeline {
    pub fn new(name: impl Into<String>, stages: Vec<Stage>, metadata: Payload) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            stages,
            metadata,
            status: PipelineStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn status(&self) -> PipelineStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn duration(&self) -> Option<Duration> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => (end - start).to_std().ok(),
            _ => None,
        }
    }

    /// First stage currently running, if any
    pub fn current_stage(&self) -> Option<&Stage> {
        self.stages
            .iter()
            .find(|stage| stage.status() == StageStatus::Running)
    }

    pub fn completed_stages(&self) -> Vec<&Stage> {
        self.stages_with_status(StageStatus::Completed)
    }

    pub fn stages_with_status(&self, status: StageStatus) -> Vec<&Stage> {
        self.stages
            .iter()
            .filter(|stage| stage.status() == status)
            .collect()
    }

    pub fn stage(&self, name: &str) -> Option<&Stage> {
        self.stages.iter().find(|stage| stage.name == name)
    }

    pub fn mark_running(&mut self) {
        self.status = PipelineStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self) {
        self.status = PipelineStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self) {
        self.status = PipelineStatus::Failed;
        self.completed_at = Some(Utc::now());
    }

    pub fn mark_rolled_back(&mut self) {
        self.status = PipelineStatus::RolledBack;
        self.completed_at = Some(Utc::now());
    }
}
