//! Health checks for pools and the execution engine

use crate::engine::{EngineStatus, ExecutionEngine};
use crate::model::AgentStatus;
use crate::pool::AgentPool;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Health check result
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheckResult {
    pub component: String,
    pub healthy: bool,
    pub message: Option<String>,
    pub response_time_ms: Option<u64>,
}

/// Trait for components that can be health checked
#[async_trait]
pub trait HealthCheck: Send + Sync {
    /// Perform health check on this component
    async fn health_check(&self) -> HealthCheckResult;

    /// Get the component name for reporting
    fn component_name(&self) -> &str;
}

/// Unhealthy while draining or when no agent is online
pub struct PoolHealthCheck {
    pool: Arc<AgentPool>,
    component: String,
}

impl PoolHealthCheck {
    pub fn new(pool: Arc<AgentPool>) -> Self {
        let component = format!("agent_pool:{}", pool.agent_type());
        Self { pool, component }
    }
}

#[async_trait]
impl HealthCheck for PoolHealthCheck {
    async fn health_check(&self) -> HealthCheckResult {
        let start = std::time::Instant::now();
        let summary = self.pool.health_summary();

        let offline = summary
            .agents
            .iter()
            .filter(|agent| agent.status == AgentStatus::Offline)
            .count();
        let all_offline = offline == summary.agents.len();

        let (healthy, message) = if summary.draining {
            (false, "pool is draining".to_string())
        } else if all_offline {
            (false, "no agents online".to_string())
        } else {
            (
                true,
                format!(
                    "{}/{} slots available, {} active",
                    summary.available_count, summary.pool_size, summary.active_count
                ),
            )
        };

        let response_time_ms = start.elapsed().as_millis() as u64;
        debug!(
            component = %self.component,
            healthy = healthy,
            offline = offline,
            "Pool health check"
        );

        HealthCheckResult {
            component: self.component.clone(),
            healthy,
            message: Some(message),
            response_time_ms: Some(response_time_ms),
        }
    }

    fn component_name(&self) -> &str {
        &self.component
    }
}

/// Unhealthy once the engine has been stopped
pub struct EngineHealthCheck {
    engine: Arc<ExecutionEngine>,
}

impl EngineHealthCheck {
    pub fn new(engine: Arc<ExecutionEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl HealthCheck for EngineHealthCheck {
    async fn health_check(&self) -> HealthCheckResult {
        let start = std::time::Instant::now();
        let status = self.engine.status();
        let healthy = status != EngineStatus::Stopped;

        HealthCheckResult {
            component: self.component_name().to_string(),
            healthy,
            message: Some(format!(
                "engine {status:?}, {}/{} slots available",
                self.engine.available_slots(),
                self.engine.max_concurrent()
            )),
            response_time_ms: Some(start.elapsed().as_millis() as u64),
        }
    }

    fn component_name(&self) -> &str {
        "execution_engine"
    }
}

/// Aggregated health check manager
pub struct HealthCheckManager {
    health_checks: Vec<Box<dyn HealthCheck>>,
}

impl HealthCheckManager {
    pub fn new() -> Self {
        Self {
            health_checks: Vec::new(),
        }
    }

    pub fn add_health_check(&mut self, health_check: Box<dyn HealthCheck>) {
        self.health_checks.push(health_check);
    }

    pub async fn run_health_checks(&self) -> Vec<HealthCheckResult> {
        let mut results = Vec::with_capacity(self.health_checks.len());
        for health_check in &self.health_checks {
            results.push(health_check.health_check().await);
        }
        results
    }

    /// All components must be healthy
    pub async fn calculate_overall_health(&self) -> bool {
        let results = self.run_health_checks().await;

        if results.is_empty() {
            warn!("No health checks configured - assuming healthy");
            return true;
        }

        let healthy_count = results.iter().filter(|r| r.healthy).count();
        let overall_healthy = healthy_count == results.len();
        debug!(
            healthy = healthy_count,
            total = results.len(),
            overall = overall_healthy,
            "Overall health check"
        );

        overall_healthy
    }
}

impl Default for HealthCheckManager {
    fn default() -> Self {
        Self::new()
    }
}
