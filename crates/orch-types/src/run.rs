//! Run-scoped context shared across the six orchestration phases.
//!
//! Grounded on `command_tower.py::CommandContext` and
//! `toka_orchestration::SessionState`.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::task::TaskGraph;

/// Default minimum [`RunContext::quality_thresholds`], matching
/// `command_tower.py::_analyze_quality`'s default acceptance bar.
pub const DEFAULT_QUALITY_THRESHOLD: f64 = 0.8;

/// The six phases a run passes through, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Decompose intent into a task graph.
    Analyze,
    /// Resolve dependencies into an execution order.
    Plan,
    /// Assign agents to ready tasks.
    Allocate,
    /// Run the coordination strategies.
    Execute,
    /// Score the run against quality thresholds.
    Assess,
    /// Archive tasks and release agents.
    Complete,
}

impl Phase {
    /// The phase that follows `self`, or `None` after `Complete`.
    pub fn next(self) -> Option<Phase> {
        use Phase::*;
        match self {
            Analyze => Some(Plan),
            Plan => Some(Allocate),
            Allocate => Some(Execute),
            Execute => Some(Assess),
            Assess => Some(Complete),
            Complete => None,
        }
    }
}

/// A timestamped record of a phase transition, retained on [`RunContext`]
/// for `execution_time` accounting and auditing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseRecord {
    /// Phase entered.
    pub phase: Phase,
    /// When it was entered.
    pub entered_at: DateTime<Utc>,
}

/// Terminal outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Still in progress.
    Running,
    /// Completed and met the quality threshold.
    Completed,
    /// Completed but fell short of the quality threshold.
    CompletedDegraded,
    /// Aborted by a critical-task failure or unrecoverable error.
    Failed,
}

/// Mutable state threaded through a single run's six phases. Owned
/// exclusively by the Orchestrator; phases receive `&mut RunContext`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunContext {
    /// Unique id for this run.
    pub id: String,
    /// The caller's original intent string, as handed to `Orchestrator::execute`.
    pub user_intent: String,
    /// The task graph being executed.
    pub graph: TaskGraph,
    /// History of phase entries, in order; `history[0]` is `Analyze`.
    pub history: Vec<PhaseRecord>,
    /// Current status.
    pub status: RunStatus,
    /// Free-form accumulated results, keyed by task id.
    pub results: HashMap<String, serde_json::Value>,
    /// Number of tasks that failed during `Execute`.
    pub error_count: usize,
    /// Number of tasks that completed during `Execute`.
    pub completed_count: usize,
    /// Ids of agents currently holding an assignment somewhere in this run,
    /// accumulated as `Execute` dispatches tasks.
    pub active_agents: HashSet<String>,
    /// Per-agent fractional resource share granted for this run, keyed by
    /// agent id.
    pub resource_allocation: HashMap<String, f64>,
    /// Minimum quality score (see [`crate::run`]'s `_analyze_quality`
    /// formula) this run must meet to finish `Completed` rather than
    /// `CompletedDegraded`.
    pub quality_thresholds: f64,
}

impl RunContext {
    /// Start a new run in the `Analyze` phase for `user_intent`, with the
    /// default quality threshold.
    pub fn new(id: impl Into<String>, user_intent: impl Into<String>, graph: TaskGraph) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            user_intent: user_intent.into(),
            graph,
            history: vec![PhaseRecord {
                phase: Phase::Analyze,
                entered_at: now,
            }],
            status: RunStatus::Running,
            results: HashMap::new(),
            error_count: 0,
            completed_count: 0,
            active_agents: HashSet::new(),
            resource_allocation: HashMap::new(),
            quality_thresholds: DEFAULT_QUALITY_THRESHOLD,
        }
    }

    /// Override the default quality threshold.
    pub fn with_quality_threshold(mut self, threshold: f64) -> Self {
        self.quality_thresholds = threshold;
        self
    }

    /// Record entry into `phase`.
    pub fn enter_phase(&mut self, phase: Phase) {
        self.history.push(PhaseRecord {
            phase,
            entered_at: Utc::now(),
        });
    }

    /// The phase most recently entered.
    pub fn current_phase(&self) -> Phase {
        self.history
            .last()
            .map(|r| r.phase)
            .unwrap_or(Phase::Analyze)
    }

    /// Elapsed time from the start of the run (first history entry) to
    /// `at`. Pinned resolution of an open question in the source material:
    /// `execution_time = end_time - start_of_run`, not some other pairing.
    pub fn elapsed_since_start(&self, at: DateTime<Utc>) -> chrono::Duration {
        let start = self
            .history
            .first()
            .map(|r| r.entered_at)
            .unwrap_or(at);
        at - start
    }

    /// Fraction of tasks that completed successfully, for quality
    /// assessment (`completion_rate` in `command_tower.py::_analyze_quality`).
    pub fn completion_rate(&self) -> f64 {
        if self.graph.is_empty() {
            return 1.0;
        }
        self.completed_count as f64 / self.graph.len() as f64
    }

    /// Fraction of touched tasks that errored
    /// (`error_rate` in `command_tower.py::_analyze_quality`).
    pub fn error_rate(&self) -> f64 {
        let touched = self.completed_count + self.error_count;
        if touched == 0 {
            return 0.0;
        }
        self.error_count as f64 / touched as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskGraph;

    #[test]
    fn phase_sequence() {
        assert_eq!(Phase::Analyze.next(), Some(Phase::Plan));
        assert_eq!(Phase::Complete.next(), None);
    }

    #[test]
    fn elapsed_since_start_uses_first_record() {
        let mut ctx = RunContext::new("r1", "build a thing", TaskGraph::new());
        let start = ctx.history[0].entered_at;
        ctx.enter_phase(Phase::Plan);
        let later = start + chrono::Duration::seconds(42);
        assert_eq!(ctx.elapsed_since_start(later), chrono::Duration::seconds(42));
    }

    #[test]
    fn completion_and_error_rate() {
        let mut ctx = RunContext::new("r1", "build a thing", TaskGraph::new());
        ctx.completed_count = 9;
        ctx.error_count = 1;
        let mut g = TaskGraph::new();
        for i in 0..10 {
            g.insert(crate::task::Task::new(format!("t{i}"), "n", "d").unwrap());
        }
        ctx.graph = g;
        assert!((ctx.completion_rate() - 0.9).abs() < 1e-9);
        assert!((ctx.error_rate() - 0.1).abs() < 1e-9);
    }
}
