//! Declarative stage specifications

use crate::error::{CoreError, CoreResult};
use crate::model::{Payload, Stage, StageBudget, Task};
use serde::{Deserialize, Serialize};
use serde_json::Value;

fn default_agent_type() -> String {
    "analyzer".to_string()
}

fn default_timeout_seconds() -> f64 {
    30.0
}

fn default_max_retries() -> u32 {
    1
}

/// One pre-loaded task of a stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageTaskSpec {
    pub command: String,
    #[serde(default)]
    pub input_data: Payload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSpec {
    pub name: String,
    #[serde(default = "default_agent_type")]
    pub agent_type: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: f64,
    /// Accepted and recorded on the stage; no retries are performed
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub tasks: Vec<StageTaskSpec>,
}

impl StageSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            agent_type: default_agent_type(),
            timeout_seconds: default_timeout_seconds(),
            max_retries: default_max_retries(),
            tasks: Vec::new(),
        }
    }

    pub fn with_agent_type(mut self, agent_type: impl Into<String>) -> Self {
        self.agent_type = agent_type.into();
        self
    }

    pub fn with_timeout_seconds(mut self, timeout_seconds: f64) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }

    pub fn with_task(mut self, command: impl Into<String>, input_data: Payload) -> Self {
        self.tasks.push(StageTaskSpec {
            command: command.into(),
            input_data,
        });
        self
    }

    /// Check the spec sitting at position `index` of a stage list
    pub fn validate(&self, index: usize) -> CoreResult<()> {
        if self.name.trim().is_empty() {
            return Err(CoreError::invalid_stage_spec(index, "name must not be empty"));
        }
        if self.agent_type.trim().is_empty() {
            return Err(CoreError::invalid_stage_spec(
                index,
                "agent_type must not be empty",
            ));
        }
        if !self.timeout_seconds.is_finite() || self.timeout_seconds <= 0.0 {
            return Err(CoreError::invalid_stage_spec(
                index,
                format!(
                    "timeout_seconds must be a positive number, got {}",
                    self.timeout_seconds
                ),
            ));
        }
        if let Some(position) = self.tasks.iter().position(|t| t.command.trim().is_empty()) {
            return Err(CoreError::invalid_stage_spec(
                index,
                format!("task {position} has an empty command"),
            ));
        }
        Ok(())
    }

    /// Build the PENDING stage entity with its pre-loaded tasks
    pub fn build(&self) -> Stage {
        let budget = StageBudget {
            timeout_seconds: self.timeout_seconds,
            max_retries: self.max_retries,
        };
        let tasks = self
            .tasks
            .iter()
            .map(|spec| Task::new(spec.command.clone(), spec.input_data.clone()))
            .collect();

        Stage::new(self.name.clone(), self.agent_type.clone(), budget).with_tasks(tasks)
    }
}

/// Parse and validate a JSON array of stage specifications
pub fn stage_specs_from_json(value: Value) -> CoreResult<Vec<StageSpec>> {
    let Value::Array(items) = value else {
        return Err(CoreError::invalid_input("stage specifications must be a JSON array"));
    };

    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            let spec: StageSpec = serde_json::from_value(item)
                .map_err(|e| CoreError::invalid_stage_spec(index, e.to_string()))?;
            spec.validate(index)?;
            Ok(spec)
        })
        .collect()
}
