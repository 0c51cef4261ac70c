//! Multi-agent collaborative task data model.
//!
//! Grounded on `agent_coordinator.py::CollaborativeTask`, which layers a
//! coordination strategy and a set of assigned agents on top of the plain
//! task dataclass.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// The coordination strategy chosen to execute a [`CollaborativeTask`],
/// per `agent_coordinator.py::_determine_collaboration_strategy`'s rule:
/// one agent -> sequential; all distinct types -> pipeline; all the same
/// type -> parallel; otherwise -> hierarchical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinationStrategy {
    /// Agents run one after another, each seeing the merged context so far.
    Sequential,
    /// Agents run concurrently in isolation; results are keyed by agent id.
    Parallel,
    /// Agents run one after another, each seeing only the prior stage's
    /// output as its context.
    Pipeline,
    /// Agents run in fixed-type-ordered groups
    /// (`AgentType::HIERARCHY_ORDER`), parallel within each group.
    Hierarchical,
}

/// A task distributed across more than one agent instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaborativeTask {
    /// Underlying task id (references a [`crate::task::Task`]).
    pub task_id: String,
    /// Agent instance ids participating.
    pub agent_ids: Vec<String>,
    /// Strategy chosen for this task.
    pub strategy: CoordinationStrategy,
    /// Per-agent results, populated as each agent completes.
    pub results: HashMap<String, serde_json::Value>,
}

impl CollaborativeTask {
    /// Construct a new collaborative task with no results yet.
    pub fn new(task_id: impl Into<String>, agent_ids: Vec<String>, strategy: CoordinationStrategy) -> Self {
        Self {
            task_id: task_id.into(),
            agent_ids,
            strategy,
            results: HashMap::new(),
        }
    }

    /// Whether every participating agent has reported a result.
    pub fn is_complete(&self) -> bool {
        self.agent_ids.iter().all(|id| self.results.contains_key(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_tracks_all_agents() {
        let mut t = CollaborativeTask::new(
            "t1",
            vec!["a1".into(), "a2".into()],
            CoordinationStrategy::Parallel,
        );
        assert!(!t.is_complete());
        t.results.insert("a1".into(), serde_json::json!({"ok": true}));
        assert!(!t.is_complete());
        t.results.insert("a2".into(), serde_json::json!({"ok": true}));
        assert!(t.is_complete());
    }
}
