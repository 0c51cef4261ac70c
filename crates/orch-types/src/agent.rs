//! Agent instance and capability data model.
//!
//! Grounded on `agent_coordinator.py::AgentInstance`/`AgentCapability`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Specialist roles an agent instance may be typed as.
///
/// The ordering here doubles as the hierarchical strategy's fixed group
/// order (scout -> code -> quality -> documentation -> review).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    /// Exploration / discovery tasks.
    Scout,
    /// Implementation tasks.
    Code,
    /// Verification / review-of-output tasks.
    Quality,
    /// Documentation synthesis.
    Documentation,
    /// Final review pass.
    Review,
}

impl AgentType {
    /// The fixed ordering used by the hierarchical coordination strategy.
    pub const HIERARCHY_ORDER: [AgentType; 5] = [
        AgentType::Scout,
        AgentType::Code,
        AgentType::Quality,
        AgentType::Documentation,
        AgentType::Review,
    ];
}

/// Lifecycle state of an [`AgentInstance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Registered in the pool, not yet given work.
    Idle,
    /// Assigned work with spare load capacity remaining.
    Busy,
    /// Assigned work at `current_load == max_load`; holds its assignments
    /// but cannot accept another until one is released.
    Waiting,
    /// Missed its heartbeat window; excluded from allocation until
    /// recovered.
    Error,
    /// Gracefully removed from the pool.
    ShutDown,
}

/// A capability an agent instance advertises, grounded on
/// `agent_coordinator.py`'s `AgentCapability` dataclass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCapability {
    /// Capability tag, matched against `Task::required_capabilities`.
    pub name: String,
    /// Coarse complexity rating this agent can handle for the capability,
    /// 1 (trivial) through 5 (expert-only).
    pub complexity_level: u8,
    /// Relative resource cost of invoking this capability, 0.0-1.0.
    pub resource_requirement: f64,
    /// Rough wall-clock estimate in seconds, used only for reporting.
    pub execution_time_estimate: f64,
    /// Historical success rate in [0.0, 1.0], used as an allocator
    /// tie-break alongside load.
    pub success_rate: f64,
}

impl AgentCapability {
    /// A capability with conservative, untested defaults.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            complexity_level: 1,
            resource_requirement: 0.1,
            execution_time_estimate: 1.0,
            success_rate: 1.0,
        }
    }
}

/// Point-in-time resource usage snapshot for an [`AgentInstance`], used by
/// the allocator's load tie-break (`min resource_usage['cpu']`).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ResourceUsage {
    /// Fractional CPU utilization, 0.0-1.0.
    pub cpu: f64,
    /// Fractional memory utilization, 0.0-1.0.
    pub memory: f64,
}

/// A registered agent in the pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInstance {
    /// Pool-scoped unique identifier.
    pub id: String,
    /// Specialist role.
    pub agent_type: AgentType,
    /// Capabilities this instance advertises.
    pub capabilities: Vec<AgentCapability>,
    /// Current lifecycle state.
    pub status: AgentStatus,
    /// Current load, expressed as number of tasks concurrently assigned.
    pub current_load: usize,
    /// Maximum concurrent tasks this instance accepts.
    pub max_load: usize,
    /// Latest resource usage snapshot.
    pub resource_usage: ResourceUsage,
    /// Free-form key/value metadata.
    pub metadata: HashMap<String, serde_json::Value>,
    /// Last time a heartbeat was recorded.
    pub last_activity: DateTime<Utc>,
    /// When the instance was registered.
    pub created_at: DateTime<Utc>,
}

impl AgentInstance {
    /// Register a new idle instance.
    pub fn new(id: impl Into<String>, agent_type: AgentType, max_load: usize) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            agent_type,
            capabilities: Vec::new(),
            status: AgentStatus::Idle,
            current_load: 0,
            max_load,
            resource_usage: ResourceUsage::default(),
            metadata: HashMap::new(),
            last_activity: now,
            created_at: now,
        }
    }

    /// Whether this instance can currently accept another task.
    pub fn has_capacity(&self) -> bool {
        matches!(self.status, AgentStatus::Idle | AgentStatus::Busy) && self.current_load < self.max_load
    }

    /// Whether this instance advertises the named capability.
    pub fn has_capability(&self, name: &str) -> bool {
        self.capabilities.iter().any(|c| c.name == name)
    }

    /// Record a heartbeat, clearing an `Error` status if set.
    pub fn heartbeat(&mut self) {
        self.last_activity = Utc::now();
        if self.status == AgentStatus::Error {
            self.status = AgentStatus::Idle;
        }
    }

    /// Bump load when a task is assigned, moving to `Waiting` once that
    /// fills the last free slot.
    pub fn assign(&mut self) {
        self.current_load += 1;
        self.status = if self.current_load >= self.max_load {
            AgentStatus::Waiting
        } else {
            AgentStatus::Busy
        };
    }

    /// Release one unit of load, returning to `Idle` once empty or `Busy`
    /// once a `Waiting` instance has spare capacity again.
    pub fn release(&mut self) {
        self.current_load = self.current_load.saturating_sub(1);
        if self.current_load == 0 && matches!(self.status, AgentStatus::Busy | AgentStatus::Waiting) {
            self.status = AgentStatus::Idle;
        } else if self.status == AgentStatus::Waiting && self.current_load < self.max_load {
            self.status = AgentStatus::Busy;
        }
    }

    /// Flag as errored because its heartbeat window elapsed, mirroring
    /// `agent_coordinator.py`'s `_heartbeat_monitor`
    /// (`last_activity < now - 2*heartbeat_interval`).
    pub fn is_stale(&self, heartbeat_interval: chrono::Duration) -> bool {
        Utc::now() - self.last_activity > heartbeat_interval * 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_tracks_load() {
        let mut a = AgentInstance::new("a1", AgentType::Code, 2);
        assert!(a.has_capacity());
        a.assign();
        a.assign();
        assert!(!a.has_capacity());
        a.release();
        assert!(a.has_capacity());
        assert_eq!(a.status, AgentStatus::Busy);
        a.release();
        assert_eq!(a.status, AgentStatus::Idle);
    }

    #[test]
    fn assign_to_the_last_slot_moves_to_waiting() {
        let mut a = AgentInstance::new("a1", AgentType::Code, 1);
        a.assign();
        assert_eq!(a.status, AgentStatus::Waiting);
        assert!(!a.has_capacity());
        a.release();
        assert_eq!(a.status, AgentStatus::Idle);
    }

    #[test]
    fn heartbeat_clears_error() {
        let mut a = AgentInstance::new("a1", AgentType::Scout, 1);
        a.status = AgentStatus::Error;
        a.heartbeat();
        assert_eq!(a.status, AgentStatus::Idle);
    }

    #[test]
    fn stale_detection() {
        let mut a = AgentInstance::new("a1", AgentType::Scout, 1);
        a.last_activity = Utc::now() - chrono::Duration::seconds(100);
        assert!(a.is_stale(chrono::Duration::seconds(10)));
        assert!(!a.is_stale(chrono::Duration::seconds(1000)));
    }

    #[test]
    fn hierarchy_order_matches_spec() {
        assert_eq!(
            AgentType::HIERARCHY_ORDER,
            [
                AgentType::Scout,
                AgentType::Code,
                AgentType::Quality,
                AgentType::Documentation,
                AgentType::Review,
            ]
        );
    }
}
