//! Slot lease tying an agent assignment to a semaphore permit
//!
//! Dropping a lease always frees its slot, so a dispatch future that is
//! cancelled mid-execution still returns its agent and permit to the pool.

use super::AgentPool;
use std::sync::atomic::Ordering;
use tokio::sync::SemaphorePermit;
use uuid::Uuid;

/// The pool's active count is raised when the agent is assigned and lowered
/// when the lease drops.
pub(crate) struct SlotLease<'a> {
    pool: &'a AgentPool,
    index: usize,
    agent_id: String,
    task_id: Uuid,
    finished: bool,
    _permit: SemaphorePermit<'a>,
}

impl<'a> SlotLease<'a> {
    pub(crate) fn new(
        pool: &'a AgentPool,
        index: usize,
        agent_id: String,
        task_id: Uuid,
        permit: SemaphorePermit<'a>,
    ) -> Self {
        Self {
            pool,
            index,
            agent_id,
            task_id,
            finished: false,
            _permit: permit,
        }
    }

    pub(crate) fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Record the task outcome on the agent and give the slot back
    pub(crate) fn finish(mut self, success: bool) {
        self.release(success);
        self.finished = true;
    }

    fn release(&self, success: bool) {
        let draining = self.pool.is_draining();
        let mut agents = self.pool.lock_agents();
        if let Some(agent) = agents.get_mut(self.index) {
            agent.release(self.task_id, success, draining);
        }
    }
}

impl Drop for SlotLease<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.release(false);
        }
        self.pool.active.fetch_sub(1, Ordering::SeqCst);
        self.pool.settled.notify_waiters();
    }
}
