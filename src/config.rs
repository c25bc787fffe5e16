//! TOML configuration for the task execution core
//!
//! Every section is optional. An empty file yields one `analyzer` pool of four
//! agents, an engine capped at 50 concurrent tasks and a `sh` shell executor.

use crate::executor::ResourceLimits;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CoreConfig {
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub orchestrator: OrchestratorSection,
    #[serde(default)]
    pub executor: ExecutorSection,
    #[serde(default = "default_pools")]
    pub pools: Vec<PoolConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineSection {
    /// Tasks the execution engine runs at once (default: 50)
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrchestratorSection {
    /// Pool used for stages whose agent type has no pool of its own
    #[serde(default)]
    pub default_pool: Option<String>,
    /// Seconds each pool may take to drain on shutdown (default: 30)
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_secs: u64,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            default_pool: None,
            drain_timeout_secs: default_drain_timeout(),
        }
    }
}

/// Settings for the shell-backed isolated executor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutorSection {
    #[serde(default = "default_shell")]
    pub shell: String,
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
    #[serde(default = "default_memory_limit")]
    pub memory_limit_mb: u64,
    #[serde(default = "default_cpu_time")]
    pub cpu_time_secs: u64,
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            max_output_bytes: default_max_output_bytes(),
            memory_limit_mb: default_memory_limit(),
            cpu_time_secs: default_cpu_time(),
        }
    }
}

impl ExecutorSection {
    pub fn resource_limits(&self) -> ResourceLimits {
        ResourceLimits {
            memory_limit_mb: self.memory_limit_mb,
            cpu_time_secs: self.cpu_time_secs,
            max_output_bytes: self.max_output_bytes,
        }
    }
}

/// One `[[pools]]` entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolConfig {
    /// Agent type served by the pool (must match [a-zA-Z0-9._-]+)
    pub agent_type: String,
    pub size: usize,
}

fn default_max_concurrent() -> usize {
    50
}

fn default_drain_timeout() -> u64 {
    30
}

fn default_shell() -> String {
    "sh".to_string()
}

fn default_max_output_bytes() -> usize {
    64 * 1024
}

fn default_memory_limit() -> u64 {
    512
}

fn default_cpu_time() -> u64 {
    60
}

fn default_pools() -> Vec<PoolConfig> {
    vec![PoolConfig {
        agent_type: "analyzer".to_string(),
        size: 4,
    }]
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            engine: EngineSection::default(),
            orchestrator: OrchestratorSection::default(),
            executor: ExecutorSection::default(),
            pools: default_pools(),
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid agent type: {0}")]
    InvalidAgentType(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl CoreConfig {
    /// Load and validate configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: CoreConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.max_concurrent == 0 {
            return Err(ConfigError::InvalidConfig(
                "engine.max_concurrent must be greater than zero".to_string(),
            ));
        }
        if self.pools.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "at least one [[pools]] entry is required".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for pool in &self.pools {
            validate_agent_type(&pool.agent_type)?;
            if pool.size == 0 {
                return Err(ConfigError::InvalidConfig(format!(
                    "pool '{}' must have a size greater than zero",
                    pool.agent_type
                )));
            }
            if !seen.insert(pool.agent_type.as_str()) {
                return Err(ConfigError::InvalidConfig(format!(
                    "pool '{}' is configured more than once",
                    pool.agent_type
                )));
            }
        }

        if let Some(default_pool) = &self.orchestrator.default_pool {
            if !seen.contains(default_pool.as_str()) {
                return Err(ConfigError::InvalidConfig(format!(
                    "orchestrator.default_pool '{default_pool}' does not name a configured pool"
                )));
            }
        }

        if self.executor.shell.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "executor.shell must not be empty".to_string(),
            ));
        }
        if self.executor.max_output_bytes == 0 {
            return Err(ConfigError::InvalidConfig(
                "executor.max_output_bytes must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.orchestrator.drain_timeout_secs)
    }
}

/// Agent types share the identifier alphabet [a-zA-Z0-9._-]
fn validate_agent_type(agent_type: &str) -> Result<(), ConfigError> {
    let valid_chars = agent_type
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-');

    if agent_type.is_empty() || !valid_chars {
        return Err(ConfigError::InvalidAgentType(format!(
            "Agent type '{agent_type}' must match pattern [a-zA-Z0-9._-]+"
        )));
    }

    Ok(())
}
