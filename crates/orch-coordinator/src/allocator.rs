//! Capability-based task-to-agent allocation.
//!
//! Grounded on `agent_coordinator.py::allocate_agents_to_tasks`/
//! `_determine_required_agent_types`/`_find_available_agent` (the
//! `resource_usage['cpu']`-minimizing tie-break is implemented by
//! `AgentPool::available_by_type`, which returns candidates pre-sorted).

use std::collections::{HashMap, HashSet};

use orch_types::{AgentType, Task};

use crate::pool::AgentPool;
use crate::CoordinatorError;

/// Maps capability tags to the agent type that can satisfy them. The
/// original source infers required types from free-text task descriptions;
/// that NLP-ish inference is out of scope here, so this is a direct,
/// explicit mapping instead.
#[derive(Debug, Clone)]
pub struct CapabilityMap {
    mapping: HashMap<String, AgentType>,
}

impl Default for CapabilityMap {
    fn default() -> Self {
        let mut mapping = HashMap::new();
        mapping.insert("explore".to_string(), AgentType::Scout);
        mapping.insert("implement".to_string(), AgentType::Code);
        mapping.insert("verify".to_string(), AgentType::Quality);
        mapping.insert("document".to_string(), AgentType::Documentation);
        mapping.insert("review".to_string(), AgentType::Review);
        Self { mapping }
    }
}

impl CapabilityMap {
    /// The default five-capability mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Map an additional capability tag to `agent_type`.
    pub fn insert(&mut self, capability: impl Into<String>, agent_type: AgentType) {
        self.mapping.insert(capability.into(), agent_type);
    }

    /// The distinct agent types required to cover `required_capabilities`.
    pub fn required_types(&self, required_capabilities: &HashSet<String>) -> HashSet<AgentType> {
        required_capabilities
            .iter()
            .filter_map(|c| self.mapping.get(c).copied())
            .collect()
    }
}

/// Assigns agent instances to tasks by matching required capabilities to
/// agent types, then picking the least-loaded available instance of each
/// required type.
pub struct Allocator {
    capability_map: CapabilityMap,
}

impl Allocator {
    /// An allocator using `capability_map` to resolve task capabilities to
    /// agent types.
    pub fn new(capability_map: CapabilityMap) -> Self {
        Self { capability_map }
    }

    /// Allocate one agent instance per required agent type for `task`,
    /// marking each chosen instance busy in `pool`. Fails if any required
    /// type has no instance with spare capacity; any instances already
    /// assigned earlier in the same call remain assigned (callers needing
    /// all-or-nothing semantics should release them on error).
    pub fn allocate(&self, pool: &AgentPool, task: &Task) -> Result<Vec<String>, CoordinatorError> {
        let required_types = self.capability_map.required_types(&task.required_capabilities);
        let mut types: Vec<AgentType> = if required_types.is_empty() {
            // No capability tag matched a type: default to `Code`, the
            // general-purpose "does the work" role.
            vec![AgentType::Code]
        } else {
            required_types.into_iter().collect()
        };
        types.sort();

        let mut assigned = Vec::with_capacity(types.len());
        for agent_type in types {
            let candidates = pool.available_by_type(agent_type);
            let chosen = candidates.into_iter().next().ok_or_else(|| CoordinatorError::NoAvailableAgent {
                agent_type,
                task_id: task.id.clone(),
            })?;
            pool.assign(&chosen.id)?;
            assigned.push(chosen.id);
        }
        Ok(assigned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orch_types::AgentInstance;
    use std::time::Duration;

    #[tokio::test]
    async fn allocates_matching_type() {
        let pool = AgentPool::new(Duration::from_secs(60));
        pool.register(AgentInstance::new("a1", AgentType::Code, 1));
        let mut task = Task::new("t1", "name", "desc").unwrap();
        task.required_capabilities.insert("implement".into());

        let allocator = Allocator::new(CapabilityMap::new());
        let assigned = allocator.allocate(&pool, &task).unwrap();
        assert_eq!(assigned, vec!["a1".to_string()]);
        assert!(pool.available_by_type(AgentType::Code).is_empty());
    }

    #[tokio::test]
    async fn no_capability_defaults_to_code() {
        let pool = AgentPool::new(Duration::from_secs(60));
        pool.register(AgentInstance::new("a1", AgentType::Code, 1));
        let task = Task::new("t1", "name", "desc").unwrap();

        let allocator = Allocator::new(CapabilityMap::new());
        let assigned = allocator.allocate(&pool, &task).unwrap();
        assert_eq!(assigned, vec!["a1".to_string()]);
    }

    #[tokio::test]
    async fn no_available_agent_errors() {
        let pool = AgentPool::new(Duration::from_secs(60));
        let mut task = Task::new("t1", "name", "desc").unwrap();
        task.required_capabilities.insert("implement".into());

        let allocator = Allocator::new(CapabilityMap::new());
        let err = allocator.allocate(&pool, &task).unwrap_err();
        assert!(matches!(err, CoordinatorError::NoAvailableAgent { .. }));
    }

    #[tokio::test]
    async fn multi_capability_allocates_each_type() {
        let pool = AgentPool::new(Duration::from_secs(60));
        pool.register(AgentInstance::new("scout-1", AgentType::Scout, 1));
        pool.register(AgentInstance::new("code-1", AgentType::Code, 1));
        let mut task = Task::new("t1", "name", "desc").unwrap();
        task.required_capabilities.insert("explore".into());
        task.required_capabilities.insert("implement".into());

        let allocator = Allocator::new(CapabilityMap::new());
        let mut assigned = allocator.allocate(&pool, &task).unwrap();
        assigned.sort();
        assert_eq!(assigned, vec!["code-1".to_string(), "scout-1".to_string()]);
    }
}
