//! Typed agent pool: the coordinator's table of registered agent
//! instances and their lifecycle.
//!
//! Grounded on `agent_coordinator.py::AgentCoordinator`'s
//! `_create_agent_instances`/`_find_available_agent`/`_heartbeat_monitor`,
//! restructured around a `DashMap`-backed instance table the way
//! `toka_orchestration::OrchestrationEngine` keeps `spawned_agents`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use dashmap::DashMap;
use orch_types::{AgentInstance, AgentStatus, AgentType};
use tokio::task::JoinHandle;

use crate::CoordinatorError;

/// Registered agent instances, keyed by instance id.
pub struct AgentPool {
    agents: DashMap<String, AgentInstance>,
    heartbeat_interval: ChronoDuration,
    sweep_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl AgentPool {
    /// An empty pool whose heartbeat monitor flags an instance `Error` once
    /// its last activity is older than `2 * heartbeat_interval`, matching
    /// `_heartbeat_monitor`'s threshold.
    pub fn new(heartbeat_interval: Duration) -> Arc<Self> {
        let pool = Arc::new(Self {
            agents: DashMap::new(),
            heartbeat_interval: ChronoDuration::from_std(heartbeat_interval).unwrap_or(ChronoDuration::seconds(30)),
            sweep_task: std::sync::Mutex::new(None),
        });
        pool.spawn_heartbeat_monitor(heartbeat_interval);
        pool
    }

    fn spawn_heartbeat_monitor(self: &Arc<Self>, interval: Duration) {
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                this.sweep_stale();
            }
        });
        *self.sweep_task.lock().unwrap() = Some(handle);
    }

    fn sweep_stale(&self) {
        for mut entry in self.agents.iter_mut() {
            if entry.status != AgentStatus::ShutDown && entry.is_stale(self.heartbeat_interval) {
                tracing::warn!(agent_id = %entry.id, "agent missed heartbeat window, marking errored");
                entry.status = AgentStatus::Error;
            }
        }
    }

    /// Register a new agent instance, replacing any prior instance with
    /// the same id.
    pub fn register(&self, agent: AgentInstance) {
        self.agents.insert(agent.id.clone(), agent);
    }

    /// Remove an instance from the pool entirely.
    pub fn deregister(&self, agent_id: &str) {
        self.agents.remove(agent_id);
    }

    /// Look up an instance by id.
    pub fn get(&self, agent_id: &str) -> Option<AgentInstance> {
        self.agents.get(agent_id).map(|a| a.clone())
    }

    /// All instances of the named type with spare capacity, sorted by
    /// ascending CPU usage, then ascending current load, then id — so
    /// allocation among equally-loaded candidates is deterministic rather
    /// than dependent on `DashMap` iteration order.
    pub fn available_by_type(&self, agent_type: AgentType) -> Vec<AgentInstance> {
        let mut candidates: Vec<AgentInstance> = self
            .agents
            .iter()
            .filter(|a| a.agent_type == agent_type && a.has_capacity())
            .map(|a| a.clone())
            .collect();
        candidates.sort_by(|a, b| {
            a.resource_usage
                .cpu
                .partial_cmp(&b.resource_usage.cpu)
                .unwrap()
                .then(a.current_load.cmp(&b.current_load))
                .then(a.id.cmp(&b.id))
        });
        candidates
    }

    /// Record a heartbeat from `agent_id`.
    pub fn heartbeat(&self, agent_id: &str) -> Result<(), CoordinatorError> {
        let mut agent = self.agents.get_mut(agent_id).ok_or_else(|| CoordinatorError::UnknownAgent {
            agent_id: agent_id.to_string(),
        })?;
        agent.heartbeat();
        Ok(())
    }

    /// Mark one unit of load assigned to `agent_id`.
    pub fn assign(&self, agent_id: &str) -> Result<(), CoordinatorError> {
        let mut agent = self.agents.get_mut(agent_id).ok_or_else(|| CoordinatorError::UnknownAgent {
            agent_id: agent_id.to_string(),
        })?;
        agent.assign();
        Ok(())
    }

    /// Release one unit of load from `agent_id`.
    pub fn release(&self, agent_id: &str) -> Result<(), CoordinatorError> {
        let mut agent = self.agents.get_mut(agent_id).ok_or_else(|| CoordinatorError::UnknownAgent {
            agent_id: agent_id.to_string(),
        })?;
        agent.release();
        Ok(())
    }

    /// Number of registered instances.
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Whether the pool has no registered instances.
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Ids of every registered instance, for bulk teardown.
    pub fn ids(&self) -> Vec<String> {
        self.agents.iter().map(|a| a.key().clone()).collect()
    }
}

impl Drop for AgentPool {
    fn drop(&mut self) {
        if let Some(handle) = self.sweep_task.lock().unwrap().take() {
            handle.abort();
        }
    }
}
