//! Command Orchestrator: drives one run through its six phases
//! (analyze, plan, allocate, execute, assess, complete), owning the
//! Coordinator and Transport beneath it.
//!
//! Grounded on `command_tower.py::CommandTower.execute_command_sequence`'s
//! phase sequence and `toka_orchestration::OrchestrationEngine`'s
//! `tokio::sync::broadcast` event stream.

pub mod config;
pub mod graph;
pub mod intent;

use std::collections::HashSet;
use std::sync::Arc;

use orch_coordinator::{Coordinator, CoordinatorError};
use orch_transport::Transport;
use orch_types::{AgentStatus, Phase, Priority, RunContext, RunStatus, Task, TaskStatus};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

pub use config::{ConfigError, RuntimeConfig};
pub use intent::{IntentAnalyzer, IntentError, QualityAssessor, QualityReport, ResourceAllocator, ThresholdQualityAssessor};

/// Errors that abort an operation outright. A single task failing during
/// `execute` is never one of these — per spec, it is folded into the
/// returned [`RunContext`]'s `status`/`error_count` instead of propagated
/// as an `Err`.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Graceful shutdown did not release every agent before its deadline.
    #[error("shutdown exceeded its deadline")]
    ShutdownTimeout,
    /// The Intent hook failed to produce a task graph; the run never
    /// leaves `Analyze`.
    #[error("intent analysis failed: {detail}")]
    AnalysisFailed { detail: String },
}

/// Point-in-time snapshot returned by [`Orchestrator::status`]: agent pool
/// composition and transport backlog, the two pieces of component health
/// visible from outside a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemStatus {
    /// Total agents registered with the coordinator's pool.
    pub registered_agents: usize,
    /// Agents currently idle.
    pub agents_idle: usize,
    /// Agents with load but spare capacity.
    pub agents_busy: usize,
    /// Agents at full load.
    pub agents_waiting: usize,
    /// Agents flagged errored by the heartbeat monitor.
    pub agents_error: usize,
    /// Agents gracefully shut down but not yet deregistered.
    pub agents_shutdown: usize,
    /// Messages awaiting acknowledgement across the transport.
    pub pending_acknowledgements: usize,
}

/// An observable event emitted as a run progresses, mirrored onto the
/// orchestrator's own broadcast stream so a CLI or dashboard can follow
/// along without polling [`RunContext`].
#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    /// A new phase was entered.
    PhaseEntered { phase: Phase },
    /// A task finished its coordination run without a fatal error.
    TaskCompleted { task_id: String },
    /// A task's coordination run produced an error.
    TaskFailed { task_id: String, detail: String },
    /// The run reached `Complete`.
    RunCompleted { status: RunStatus },
}

/// Ties together the Agent Coordinator and the Communication Protocol
/// transport beneath it, and drives a [`RunContext`] through its six
/// phases. Transport carries control-plane traffic (status, health,
/// coordination messages); task dispatch itself goes through the
/// Coordinator's in-process `Agent` trait, since every agent in this
/// runtime lives in the same process (no cluster consensus).
pub struct Orchestrator {
    coordinator: Coordinator,
    transport: Arc<Transport>,
    quality_assessor: Box<dyn QualityAssessor>,
    quality_threshold: f64,
    events: broadcast::Sender<OrchestratorEvent>,
}

impl Orchestrator {
    /// Build an orchestrator from `config`, wiring a fresh [`Coordinator`]
    /// and [`Transport`] beneath it.
    pub fn new(config: &RuntimeConfig, quality_assessor: Box<dyn QualityAssessor>) -> Self {
        let (tx, _rx) = broadcast::channel(config.event_buffer.max(16));
        Self {
            coordinator: Coordinator::new(config.heartbeat_interval(), config.max_concurrent_tasks),
            transport: Transport::new(config.transport_config()),
            quality_assessor,
            quality_threshold: config.quality_threshold,
            events: tx,
        }
    }

    /// An orchestrator with the default [`ThresholdQualityAssessor`].
    pub fn with_defaults(config: &RuntimeConfig) -> Self {
        Self::new(config, Box::new(ThresholdQualityAssessor))
    }

    /// The underlying coordinator, for agent registration.
    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    /// The underlying transport, for control-plane messaging.
    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    /// Subscribe to this orchestrator's event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: OrchestratorEvent) {
        let _ = self.events.send(event);
    }

    /// One of the Orchestrator's three operations: a snapshot of the agent
    /// pool's composition and the transport's acknowledgement backlog,
    /// independent of any in-flight run.
    pub fn status(&self) -> SystemStatus {
        let mut status = SystemStatus {
            registered_agents: 0,
            agents_idle: 0,
            agents_busy: 0,
            agents_waiting: 0,
            agents_error: 0,
            agents_shutdown: 0,
            pending_acknowledgements: self.transport.pending_acks(),
        };
        for id in self.coordinator.pool().ids() {
            let Some(instance) = self.coordinator.pool().get(&id) else {
                continue;
            };
            status.registered_agents += 1;
            match instance.status {
                AgentStatus::Idle => status.agents_idle += 1,
                AgentStatus::Busy => status.agents_busy += 1,
                AgentStatus::Waiting => status.agents_waiting += 1,
                AgentStatus::Error => status.agents_error += 1,
                AgentStatus::ShutDown => status.agents_shutdown += 1,
            }
        }
        status
    }

    /// Decompose `user_intent` into a task graph via the Intent hook and
    /// drive the resulting run through Plan, Allocate, Execute, Assess, and
    /// Complete. Fails the run outright (without entering `Plan`) if
    /// `analyzer` errors.
    ///
    /// A task tagged [`Priority::Critical`] that fails aborts the
    /// remainder of `Execute` and marks the run [`RunStatus::Failed`].
    /// Any other task failure is recorded and the run continues.
    pub async fn execute(
        &self,
        run_id: impl Into<String>,
        user_intent: &str,
        analyzer: &dyn IntentAnalyzer,
    ) -> Result<RunContext, OrchestratorError> {
        let graph = analyzer
            .analyze(user_intent)
            .await
            .map_err(|e| OrchestratorError::AnalysisFailed { detail: e.0 })?;
        let mut ctx = RunContext::new(run_id, user_intent, graph).with_quality_threshold(self.quality_threshold);
        self.emit(OrchestratorEvent::PhaseEntered { phase: Phase::Analyze });

        ctx.enter_phase(Phase::Plan);
        self.emit(OrchestratorEvent::PhaseEntered { phase: Phase::Plan });
        let waves = graph::resolve_waves(&ctx.graph);

        ctx.enter_phase(Phase::Allocate);
        self.emit(OrchestratorEvent::PhaseEntered { phase: Phase::Allocate });
        let ready_ids: Vec<String> = ctx.graph.ids().map(str::to_string).collect();
        for id in ready_ids {
            if let Some(task) = ctx.graph.get_mut(&id) {
                let _ = task.transition(TaskStatus::Ready);
            }
        }

        ctx.enter_phase(Phase::Execute);
        self.emit(OrchestratorEvent::PhaseEntered { phase: Phase::Execute });
        let mut aborted = false;
        for wave in &waves {
            if aborted {
                break;
            }
            let tasks_in_wave: Vec<Task> = wave.iter().filter_map(|id| ctx.graph.get(id).cloned()).collect();
            let futures = tasks_in_wave.iter().map(|task| {
                let task = task.clone();
                async move {
                    let outcome = self.coordinator.execute_task(&task, serde_json::json!({})).await;
                    (task, outcome)
                }
            });
            let results = futures::future::join_all(futures).await;

            for (task, outcome) in results {
                match outcome {
                    Ok((collaborative, aggregation)) => {
                        let task_failed = !aggregation.errors.is_empty();
                        let assigned: HashSet<String> = collaborative.agent_ids.iter().cloned().collect();
                        if let Some(t) = ctx.graph.get_mut(&task.id) {
                            t.assigned_agents = assigned.clone();
                            let _ = t.transition(TaskStatus::InProgress);
                            if task_failed {
                                let _ = t.transition(TaskStatus::Blocked);
                                ctx.error_count += 1;
                            } else {
                                let _ = t.transition(TaskStatus::Completed);
                                ctx.completed_count += 1;
                            }
                        }
                        ctx.active_agents.extend(assigned);
                        ctx.results
                            .insert(task.id.clone(), serde_json::to_value(&collaborative.results).unwrap_or_default());
                        if task_failed {
                            self.emit(OrchestratorEvent::TaskFailed {
                                task_id: task.id.clone(),
                                detail: "one or more agents reported an error".to_string(),
                            });
                        } else {
                            self.emit(OrchestratorEvent::TaskCompleted { task_id: task.id.clone() });
                        }
                        if task_failed && task.priority == Priority::Critical {
                            tracing::error!(task_id = %task.id, "critical task failed, aborting run");
                            aborted = true;
                        }
                    }
                    Err(e) => {
                        if let Some(t) = ctx.graph.get_mut(&task.id) {
                            let _ = t.transition(TaskStatus::Blocked);
                        }
                        ctx.error_count += 1;
                        self.emit(OrchestratorEvent::TaskFailed {
                            task_id: task.id.clone(),
                            detail: e.to_string(),
                        });
                        if task.priority == Priority::Critical {
                            tracing::error!(task_id = %task.id, error = %e, "critical task failed, aborting run");
                            aborted = true;
                        }
                    }
                }
            }
        }

        ctx.enter_phase(Phase::Assess);
        self.emit(OrchestratorEvent::PhaseEntered { phase: Phase::Assess });
        let report = self.quality_assessor.assess(&ctx);
        ctx.status = if aborted {
            RunStatus::Failed
        } else if report.meets_threshold {
            RunStatus::Completed
        } else {
            RunStatus::CompletedDegraded
        };

        ctx.enter_phase(Phase::Complete);
        self.emit(OrchestratorEvent::PhaseEntered { phase: Phase::Complete });
        let completed_ids: Vec<String> = ctx
            .graph
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .map(|t| t.id.clone())
            .collect();
        for id in completed_ids {
            if let Some(t) = ctx.graph.get_mut(&id) {
                let _ = t.archive();
            }
        }

        self.emit(OrchestratorEvent::RunCompleted { status: ctx.status });
        Ok(ctx)
    }

    /// Release every agent currently registered with the coordinator,
    /// regardless of load, within `deadline`. Matches spec.md §6's "agents
    /// left busy at abnormal termination are released during shutdown".
    pub async fn shutdown(&self, deadline: std::time::Duration) -> Result<(), OrchestratorError> {
        let agent_ids = self.coordinator.pool().ids();
        let release_all = async {
            for id in agent_ids {
                self.coordinator.deregister_agent(&id).await;
            }
        };
        tokio::time::timeout(deadline, release_all)
            .await
            .map_err(|_| OrchestratorError::ShutdownTimeout)
    }
}
