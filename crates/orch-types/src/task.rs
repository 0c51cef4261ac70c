//! Task and task-graph data model.
//!
//! Mirrors `command_tower.py::CommandTask` (status machine, append-only
//! logs, archival) generalized with the priority/capability fields the
//! Allocator needs.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum length for a task name, mirroring the defensive bounds
/// `toka-types` applies to its own string fields.
pub const MAX_TASK_NAME_LEN: usize = 256;

/// Lifecycle states a [`Task`] may occupy.
///
/// Allowed transitions: `pending -> ready -> in_progress -> (completed |
/// blocked)`, `ready -> blocked` (allocation failed before execution
/// started), `completed -> archived`, and `cancelled` reachable from any
/// non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created but not yet scheduled.
    Pending,
    /// Dependencies satisfied, eligible for allocation.
    Ready,
    /// Currently assigned and executing.
    InProgress,
    /// Finished successfully.
    Completed,
    /// Execution failed or could not be allocated.
    Blocked,
    /// Explicitly cancelled.
    Cancelled,
    /// Completed and archived (terminal).
    Archived,
}

impl TaskStatus {
    /// Whether `self -> next` is an allowed transition.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        if next == Cancelled {
            return !matches!(self, Completed | Cancelled | Archived);
        }
        matches!(
            (self, next),
            (Pending, Ready)
                | (Ready, InProgress)
                | (Ready, Blocked)
                | (InProgress, Completed)
                | (InProgress, Blocked)
                | (Completed, Archived)
        )
    }

    /// Terminal states that never transition again (other than the
    /// `Completed -> Archived` path, handled separately).
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Cancelled | TaskStatus::Archived)
    }
}

/// Scheduling priority. Ordering is `Critical > High > Medium > Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Lowest scheduling weight (sorts last).
    Low,
    /// Below-default weight.
    Medium,
    /// Above-default weight.
    High,
    /// Highest scheduling weight (sorts first); non-critical-tagged
    /// failures during execution never abort the run, but tasks tagged
    /// `Critical` do (spec.md §4.1 partial-failure policy).
    Critical,
}

impl Priority {
    /// Lower value sorts first when used as a scheduling key
    /// (`Critical` = 0 ... `Low` = 3), matching the tie-break order used
    /// by the task-graph topological sort.
    pub fn rank(self) -> u8 {
        match self {
            Priority::Critical => 0,
            Priority::High => 1,
            Priority::Medium => 2,
            Priority::Low => 3,
        }
    }
}

/// A single append-only log entry recorded against a [`Task`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskLogEntry {
    /// When the entry was recorded.
    pub timestamp: DateTime<Utc>,
    /// Short action tag, e.g. `"execution_started"`.
    pub action: String,
    /// Arbitrary structured detail.
    pub details: serde_json::Value,
    /// Task status at the time the entry was recorded.
    pub status: TaskStatus,
}

/// A unit of work in a [`TaskGraph`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Run-scoped unique identifier.
    pub id: String,
    /// Short human-readable name.
    pub name: String,
    /// Longer free-form description.
    pub description: String,
    /// Current lifecycle state.
    pub status: TaskStatus,
    /// Scheduling priority.
    pub priority: Priority,
    /// Capability tags required to execute this task.
    pub required_capabilities: HashSet<String>,
    /// Task ids this task depends on.
    pub dependencies: HashSet<String>,
    /// Agent instance ids currently assigned (empty until allocation).
    pub assigned_agents: HashSet<String>,
    /// Arbitrary caller-supplied metadata.
    pub metadata: HashMap<String, serde_json::Value>,
    /// Append-only execution log.
    pub logs: Vec<TaskLogEntry>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last-modified timestamp.
    pub updated_at: DateTime<Utc>,
    /// Set the moment status becomes `Completed` or later.
    pub completed_at: Option<DateTime<Utc>>,
    /// Set the moment status becomes `Archived`.
    pub archived_at: Option<DateTime<Utc>>,
}

/// Error produced by an invalid task mutation.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// The name exceeded [`MAX_TASK_NAME_LEN`] or was empty.
    #[error("invalid task name: {0}")]
    InvalidName(String),
    /// A status transition was attempted that §3's state graph forbids.
    #[error("illegal transition for task {task_id}: {from:?} -> {to:?}")]
    IllegalTransition {
        /// Task the transition was attempted on.
        task_id: String,
        /// Status before the attempted transition.
        from: TaskStatus,
        /// Status that was rejected.
        to: TaskStatus,
    },
}

impl Task {
    /// Construct a new task in `Pending` status.
    pub fn new(id: impl Into<String>, name: impl Into<String>, description: impl Into<String>) -> Result<Self, TaskError> {
        let name = name.into();
        if name.trim().is_empty() || name.len() > MAX_TASK_NAME_LEN {
            return Err(TaskError::InvalidName(name));
        }
        let now = Utc::now();
        Ok(Self {
            id: id.into(),
            name,
            description: description.into(),
            status: TaskStatus::Pending,
            priority: Priority::Medium,
            required_capabilities: HashSet::new(),
            dependencies: HashSet::new(),
            assigned_agents: HashSet::new(),
            metadata: HashMap::new(),
            logs: Vec::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
            archived_at: None,
        })
    }

    /// Append a log entry and bump `updated_at`, matching
    /// `CommandTask.add_log`.
    pub fn add_log(&mut self, action: impl Into<String>, details: serde_json::Value) {
        let now = Utc::now();
        self.logs.push(TaskLogEntry {
            timestamp: now,
            action: action.into(),
            details,
            status: self.status,
        });
        self.updated_at = now;
    }

    /// Attempt a status transition, enforcing the invariants in spec.md §3.
    pub fn transition(&mut self, next: TaskStatus) -> Result<(), TaskError> {
        if self.status == next {
            return Ok(());
        }
        if !self.status.can_transition_to(next) {
            return Err(TaskError::IllegalTransition {
                task_id: self.id.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        if matches!(next, TaskStatus::Completed) {
            self.completed_at = Some(self.updated_at);
        }
        if matches!(next, TaskStatus::Archived) {
            self.archived_at = Some(self.updated_at);
            if self.completed_at.is_none() {
                self.completed_at = Some(self.updated_at);
            }
        }
        Ok(())
    }

    /// Archive an already-completed task; a no-op if already archived
    /// (spec.md §8 idempotence property).
    pub fn archive(&mut self) -> Result<(), TaskError> {
        if self.status == TaskStatus::Archived {
            return Ok(());
        }
        self.transition(TaskStatus::Archived)
    }
}

/// A dependency-ordered collection of [`Task`]s, owned exclusively by the
/// Orchestrator for a run's lifetime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskGraph {
    tasks: HashMap<String, Task>,
}

impl TaskGraph {
    /// An empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a task.
    pub fn insert(&mut self, task: Task) {
        self.tasks.insert(task.id.clone(), task);
    }

    /// Look up a task by id.
    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.get(id)
    }

    /// Mutable lookup by id.
    pub fn get_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.get_mut(id)
    }

    /// Iterate over all tasks.
    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    /// Number of tasks in the graph.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the graph holds no tasks.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// All task ids.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowed_transitions() {
        let mut t = Task::new("t1", "name", "desc").unwrap();
        assert!(t.transition(TaskStatus::Ready).is_ok());
        assert!(t.transition(TaskStatus::InProgress).is_ok());
        assert!(t.transition(TaskStatus::Completed).is_ok());
        assert!(t.completed_at.is_some());
        assert!(t.transition(TaskStatus::Archived).is_ok());
        assert!(t.archived_at.is_some());
    }

    #[test]
    fn rejects_illegal_transition() {
        let mut t = Task::new("t1", "name", "desc").unwrap();
        let err = t.transition(TaskStatus::Completed).unwrap_err();
        assert!(matches!(err, TaskError::IllegalTransition { .. }));
    }

    #[test]
    fn cancel_from_any_nonterminal_state() {
        let mut t = Task::new("t1", "name", "desc").unwrap();
        assert!(t.transition(TaskStatus::Cancelled).is_ok());
    }

    #[test]
    fn archive_is_idempotent() {
        let mut t = Task::new("t1", "name", "desc").unwrap();
        t.transition(TaskStatus::Ready).unwrap();
        t.transition(TaskStatus::InProgress).unwrap();
        t.transition(TaskStatus::Completed).unwrap();
        t.archive().unwrap();
        let archived_at = t.archived_at;
        t.archive().unwrap();
        assert_eq!(t.archived_at, archived_at);
    }

    #[test]
    fn rejects_empty_name() {
        assert!(Task::new("t1", "   ", "desc").is_err());
    }
}
