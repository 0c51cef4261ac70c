//! Task-graph dependency resolution: topological ordering with a
//! priority tie-break, parallel-wave grouping, and cycle handling.
//!
//! Grounded on `toka_orchestration::dependency::DependencyResolver`
//! (`resolve_spawn_order`/`resolve_waves`/`detect_circular_dependencies`/
//! `analyze_dependencies`), adapted from agent-name dependencies to
//! task-id dependencies and reimplemented with Kahn's algorithm (the
//! resolver this crate is grounded on uses DFS instead; Kahn's makes the
//! "which nodes are cycle-entangled" question a direct by-product of the
//! main loop rather than a separate DFS pass).
//!
//! Cycles are flattened into the final layer rather than rejected, per
//! spec.md's pinned REDESIGN decision (see DESIGN.md), overriding the
//! resolver's original reject-on-cycle behavior.

use std::collections::HashMap;

use orch_types::{Priority, TaskGraph};

fn priority_order(graph: &TaskGraph, id: &str) -> u8 {
    graph
        .get(id)
        .map(|t| t.priority.rank())
        .unwrap_or_else(|| Priority::Medium.rank())
}

fn build_dependency_index(graph: &TaskGraph) -> (HashMap<String, usize>, HashMap<String, Vec<String>>) {
    let mut in_degree: HashMap<String, usize> = HashMap::new();
    let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
    for id in graph.ids() {
        in_degree.entry(id.to_string()).or_insert(0);
    }
    for task in graph.iter() {
        for dep in &task.dependencies {
            if graph.get(dep).is_none() {
                continue; // dangling dependency reference, ignored
            }
            *in_degree.entry(task.id.clone()).or_insert(0) += 1;
            dependents.entry(dep.clone()).or_default().push(task.id.clone());
        }
    }
    (in_degree, dependents)
}

/// A flat execution order, dependency-respecting, priority tie-broken.
#[derive(Debug, Clone, Default)]
pub struct ResolvedOrder {
    /// Task ids in the order they should run.
    pub order: Vec<String>,
    /// Whether a circular dependency was detected and flattened into the
    /// tail of `order`.
    pub had_cycle: bool,
}

/// Resolve a full execution order for every task in `graph` via Kahn's
/// algorithm. Ties (multiple tasks simultaneously ready) are broken by
/// `Priority`, then by task id for determinism.
pub fn resolve_order(graph: &TaskGraph) -> ResolvedOrder {
    let (in_degree, dependents) = build_dependency_index(graph);
    let total = in_degree.len();
    let mut remaining = in_degree;

    let mut order = Vec::with_capacity(total);
    loop {
        let mut ready: Vec<String> = remaining
            .iter()
            .filter(|(_, &d)| d == 0)
            .map(|(id, _)| id.clone())
            .collect();
        if ready.is_empty() {
            break;
        }
        ready.sort_by_key(|id| (priority_order(graph, id), id.clone()));
        for id in &ready {
            remaining.remove(id);
        }
        for id in &ready {
            if let Some(deps_on_it) = dependents.get(id) {
                for dependent in deps_on_it {
                    if let Some(d) = remaining.get_mut(dependent) {
                        *d = d.saturating_sub(1);
                    }
                }
            }
        }
        order.extend(ready);
    }

    let had_cycle = order.len() < total;
    if had_cycle {
        let mut leftover: Vec<String> = remaining.into_keys().collect();
        tracing::warn!(
            count = leftover.len(),
            "circular dependency detected, flattening into final layer"
        );
        leftover.sort_by_key(|id| (priority_order(graph, id), id.clone()));
        order.extend(leftover);
    }

    ResolvedOrder { order, had_cycle }
}

/// Group `graph`'s tasks into waves that can each run in parallel: wave
/// `k+1` contains every task whose dependencies are all satisfied by
/// waves `0..=k`. A trailing cycle is flattened into one final wave.
pub fn resolve_waves(graph: &TaskGraph) -> Vec<Vec<String>> {
    let (in_degree, dependents) = build_dependency_index(graph);
    let mut remaining = in_degree;
    let mut waves = Vec::new();

    loop {
        let mut wave: Vec<String> = remaining
            .iter()
            .filter(|(_, &d)| d == 0)
            .map(|(id, _)| id.clone())
            .collect();
        if wave.is_empty() {
            break;
        }
        wave.sort_by_key(|id| (priority_order(graph, id), id.clone()));
        for id in &wave {
            remaining.remove(id);
        }
        for id in &wave {
            if let Some(deps_on_it) = dependents.get(id) {
                for dependent in deps_on_it {
                    if let Some(d) = remaining.get_mut(dependent) {
                        *d = d.saturating_sub(1);
                    }
                }
            }
        }
        waves.push(wave);
    }

    if !remaining.is_empty() {
        let mut leftover: Vec<String> = remaining.into_keys().collect();
        tracing::warn!(
            count = leftover.len(),
            "circular dependency detected while computing waves, flattening into final wave"
        );
        leftover.sort_by_key(|id| (priority_order(graph, id), id.clone()));
        waves.push(leftover);
    }

    waves
}

/// Summary statistics over a task graph's dependency structure.
#[derive(Debug, Clone)]
pub struct GraphAnalysis {
    /// Total number of tasks.
    pub task_count: usize,
    /// Number of parallel waves needed to run every task.
    pub max_depth: usize,
    /// Whether a circular dependency was present.
    pub had_cycle: bool,
}

/// Analyze `graph`'s dependency structure.
pub fn analyze(graph: &TaskGraph) -> GraphAnalysis {
    let resolved = resolve_order(graph);
    let waves = resolve_waves(graph);
    GraphAnalysis {
        task_count: graph.len(),
        max_depth: waves.len(),
        had_cycle: resolved.had_cycle,
    }
}
