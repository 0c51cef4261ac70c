//! Collaborator hook traits: intent analysis, quality assessment, and
//! resource allocation decisions the core delegates to an external
//! implementation, plus a default quality assessor so the core remains
//! runnable standalone.
//!
//! Grounded on `toka_orchestration::llm_integration`'s trait-boundary
//! style (an external collaborator is a trait object, not a concrete
//! gateway call) and `command_tower.py::_analyze_quality` for the default
//! scorer's exact formula.

use async_trait::async_trait;
use orch_types::{RunContext, Task, TaskGraph};

/// Decomposes a caller's intent into an initial [`TaskGraph`]. Implemented
/// by an external collaborator (e.g. an LLM-backed planner); the core
/// ships no default, since synthesizing tasks from free text is
/// explicitly out of scope (no translation/NLP).
#[async_trait]
pub trait IntentAnalyzer: Send + Sync {
    /// Produce a task graph for `intent`.
    async fn analyze(&self, intent: &str) -> Result<TaskGraph, IntentError>;
}

/// Error produced by an [`IntentAnalyzer`].
#[derive(Debug, thiserror::Error)]
#[error("intent analysis failed: {0}")]
pub struct IntentError(pub String);

/// Outcome of a quality assessment pass over a run.
#[derive(Debug, Clone, PartialEq)]
pub struct QualityReport {
    /// `max(0, 1 - error_rate) * completion_rate`.
    pub quality_score: f64,
    /// Whether `quality_score` met the configured threshold.
    pub meets_threshold: bool,
    /// Human-readable remediation suggestions.
    pub recommendations: Vec<String>,
}

/// Scores a completing run. Implementations may consult external signals;
/// [`ThresholdQualityAssessor`] is the core's built-in default.
pub trait QualityAssessor: Send + Sync {
    /// Score `ctx` against this assessor's threshold.
    fn assess(&self, ctx: &RunContext) -> QualityReport;
}

/// Default quality assessor, grounded on
/// `command_tower.py::_analyze_quality`'s formula
/// (`quality_score = max(0, 1 - error_rate) * completion_rate`) and its
/// two heuristic recommendation strings. Reads its acceptance bar from
/// `ctx.quality_thresholds` rather than carrying one of its own, so a run
/// can set a stricter or looser bar without a different assessor.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThresholdQualityAssessor;

impl QualityAssessor for ThresholdQualityAssessor {
    fn assess(&self, ctx: &RunContext) -> QualityReport {
        let error_rate = ctx.error_rate();
        let completion_rate = ctx.completion_rate();
        let quality_score = (1.0 - error_rate).max(0.0) * completion_rate;

        let mut recommendations = Vec::new();
        if error_rate > 0.1 {
            recommendations.push("High error rate detected - review task execution logic".to_string());
        }
        if completion_rate < 0.9 {
            recommendations.push("Low completion rate - check task dependencies and agent availability".to_string());
        }

        QualityReport {
            quality_score,
            meets_threshold: quality_score >= ctx.quality_thresholds,
            recommendations,
        }
    }
}

/// Decides whether a task should be granted additional resources before a
/// retry. External collaborator hook; no default ships, since resource
/// policy is deployment-specific.
#[async_trait]
pub trait ResourceAllocator: Send + Sync {
    /// Whether `task` should be granted more resources before retrying.
    async fn should_grant(&self, task: &Task) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use orch_types::TaskGraph;

    fn ctx_with(completed: usize, errors: usize, total: usize) -> RunContext {
        let mut graph = TaskGraph::new();
        for i in 0..total {
            graph.insert(orch_types::Task::new(format!("t{i}"), "n", "d").unwrap());
        }
        let mut ctx = RunContext::new("r1", "test intent", graph);
        ctx.completed_count = completed;
        ctx.error_count = errors;
        ctx
    }

    #[test]
    fn perfect_run_meets_threshold() {
        let assessor = ThresholdQualityAssessor::default();
        let report = assessor.assess(&ctx_with(10, 0, 10));
        assert!((report.quality_score - 1.0).abs() < 1e-9);
        assert!(report.meets_threshold);
        assert!(report.recommendations.is_empty());
    }

    #[test]
    fn high_error_rate_recommends_review() {
        let assessor = ThresholdQualityAssessor::default();
        let report = assessor.assess(&ctx_with(7, 3, 10));
        assert!(report.recommendations.iter().any(|r| r.contains("error rate")));
    }

    #[test]
    fn low_completion_rate_recommends_dependency_check() {
        let assessor = ThresholdQualityAssessor::default();
        let report = assessor.assess(&ctx_with(5, 0, 10));
        assert!(report.recommendations.iter().any(|r| r.contains("completion rate")));
        assert!(!report.meets_threshold);
    }
}
