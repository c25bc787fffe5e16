//! Logical execution slot owned by an agent pool

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Slot status; `current_task_id` is set exactly when the agent is `Busy`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Busy,
    Draining,
    Offline,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub agent_type: String,
    status: AgentStatus,
    current_task_id: Option<Uuid>,
    tasks_completed: u64,
    tasks_failed: u64,
    last_heartbeat: DateTime<Utc>,
}

impl Agent {
    pub fn new(id: impl Into<String>, agent_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            agent_type: agent_type.into(),
            status: AgentStatus::Idle,
            current_task_id: None,
            tasks_completed: 0,
            tasks_failed: 0,
            last_heartbeat: Utc::now(),
        }
    }

    pub fn status(&self) -> AgentStatus {
        self.status
    }

    pub fn current_task_id(&self) -> Option<Uuid> {
        self.current_task_id
    }

    pub fn tasks_completed(&self) -> u64 {
        self.tasks_completed
    }

    pub fn tasks_failed(&self) -> u64 {
        self.tasks_failed
    }

    pub fn last_heartbeat(&self) -> DateTime<Utc> {
        self.last_heartbeat
    }

    pub fn is_idle(&self) -> bool {
        self.status == AgentStatus::Idle
    }

    pub fn heartbeat(&mut self) {
        self.last_heartbeat = Utc::now();
    }

    /// Take a task. Only idle agents accept work.
    pub fn assign(&mut self, task_id: Uuid) -> bool {
        if self.status != AgentStatus::Idle {
            return false;
        }
        self.status = AgentStatus::Busy;
        self.current_task_id = Some(task_id);
        self.heartbeat();
        true
    }

    /// Record the outcome of `task_id` and free the slot.
    ///
    /// Counters always move. The status only changes if the agent still holds
    /// `task_id`; a drain or reset in the meantime wins. Returns whether the
    /// slot was freed.
    pub fn release(&mut self, task_id: Uuid, success: bool, draining: bool) -> bool {
        if success {
            self.tasks_completed += 1;
        } else {
            self.tasks_failed += 1;
        }
        self.heartbeat();

        if self.current_task_id != Some(task_id) {
            return false;
        }
        self.current_task_id = None;
        self.status = if draining {
            AgentStatus::Draining
        } else {
            AgentStatus::Idle
        };
        true
    }

    /// Idle agents stop accepting work; busy agents are left alone
    pub fn begin_draining(&mut self) {
        if self.status == AgentStatus::Idle {
            self.status = AgentStatus::Draining;
        }
    }

    pub fn take_offline(&mut self) {
        self.status = AgentStatus::Offline;
        self.current_task_id = None;
    }

    pub fn reset(&mut self) {
        self.status = AgentStatus::Idle;
        self.current_task_id = None;
        self.heartbeat();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assign_and_release() {
        let mut agent = Agent::new("analyzer-0", "analyzer");
        let task_id = Uuid::new_v4();

        assert!(agent.assign(task_id));
        assert_eq!(agent.status(), AgentStatus::Busy);
        assert_eq!(agent.current_task_id(), Some(task_id));

        assert!(!agent.assign(Uuid::new_v4()), "busy agent must refuse work");

        assert!(agent.release(task_id, true, false));
        assert_eq!(agent.status(), AgentStatus::Idle);
        assert_eq!(agent.current_task_id(), None);
        assert_eq!(agent.tasks_completed(), 1);
        assert_eq!(agent.tasks_failed(), 0);
    }

    #[test]
    fn test_release_while_draining() {
        let mut agent = Agent::new("a-0", "a");
        let task_id = Uuid::new_v4();
        agent.assign(task_id);
        agent.release(task_id, false, true);
        assert_eq!(agent.status(), AgentStatus::Draining);
        assert_eq!(agent.tasks_failed(), 1);
    }

    #[test]
    fn test_late_release_does_not_clobber_new_assignment() {
        let mut agent = Agent::new("a-0", "a");
        let old = Uuid::new_v4();
        let new = Uuid::new_v4();
        agent.assign(old);
        agent.take_offline();
        agent.reset();
        agent.assign(new);

        assert!(!agent.release(old, true, false));
        assert_eq!(agent.status(), AgentStatus::Busy);
        assert_eq!(agent.current_task_id(), Some(new));
        assert_eq!(agent.tasks_completed(), 1);
    }

    #[test]
    fn test_begin_draining_skips_busy() {
        let mut idle = Agent::new("a-0", "a");
        let mut busy = Agent::new("a-1", "a");
        busy.assign(Uuid::new_v4());

        idle.begin_draining();
        busy.begin_draining();

        assert_eq!(idle.status(), AgentStatus::Draining);
        assert_eq!(busy.status(), AgentStatus::Busy);
    }

    #[test]
    fn test_offline_clears_task() {
        let mut agent = Agent::new("a-0", "a");
        agent.assign(Uuid::new_v4());
        agent.take_offline();
        assert_eq!(agent.status(), AgentStatus::Offline);
        assert!(agent.current_task_id().is_none());
        assert!(!agent.assign(Uuid::new_v4()));
    }
}
