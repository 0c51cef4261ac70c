//! Coordination-strategy engine: sequential, parallel, pipeline, and
//! hierarchical execution of a collaborative task across multiple agents.
//!
//! Grounded on `agent_coordinator.py::_execute_sequential/_parallel/
//! _pipeline/_hierarchical` and `_determine_collaboration_strategy`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use orch_types::{AgentType, CoordinationStrategy};
use tokio::sync::Semaphore;

use crate::CoordinatorError;

/// What an agent is asked to do, generalized over the teacher's
/// class-per-agent families into one typed trait boundary.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Stable instance id, matching the pool's `AgentInstance::id`.
    fn id(&self) -> &str;
    /// The specialist role this instance plays.
    fn agent_type(&self) -> AgentType;
    /// Execute against `context`, returning a JSON result or an error.
    async fn execute(&self, context: serde_json::Value) -> Result<serde_json::Value, CoordinatorError>;
    /// Release any resources held by this agent; called once on pool
    /// removal or process shutdown.
    async fn shutdown(&self) {}
}

/// Aggregated per-agent outputs from one coordination-strategy run.
/// Grounded on `_integrate_results`'s `combined_output` map and its
/// `quality_metrics.success_rate`.
#[derive(Debug, Clone, Default)]
pub struct ResultAggregation {
    /// Agent id -> its result.
    pub outputs: HashMap<String, serde_json::Value>,
    /// Agent id -> error detail, for agents that failed.
    pub errors: HashMap<String, String>,
}

impl ResultAggregation {
    /// Fraction of `participant_count` agents that produced a result.
    pub fn success_rate(&self, participant_count: usize) -> f64 {
        if participant_count == 0 {
            return 1.0;
        }
        self.outputs.len() as f64 / participant_count as f64
    }
}

/// Choose a coordination strategy for a group of agents, per
/// `_determine_collaboration_strategy`'s rule: one agent -> sequential;
/// every agent a distinct type -> pipeline; every agent the same type ->
/// parallel; otherwise -> hierarchical.
pub fn determine_strategy(agent_types: &[AgentType]) -> CoordinationStrategy {
    if agent_types.len() <= 1 {
        return CoordinationStrategy::Sequential;
    }
    let distinct: HashSet<_> = agent_types.iter().collect();
    if distinct.len() == agent_types.len() {
        CoordinationStrategy::Pipeline
    } else if distinct.len() == 1 {
        CoordinationStrategy::Parallel
    } else {
        CoordinationStrategy::Hierarchical
    }
}

/// Runs a group of agents against a shared starting context under one of
/// the four coordination strategies, gating task-level concurrency with a
/// semaphore sized to the configured `max_concurrent_tasks`. Pinned Open
/// Question: this limit is authoritative and enforced here, not advisory.
pub struct StrategyEngine {
    concurrency: Arc<Semaphore>,
}

impl StrategyEngine {
    /// An engine that runs at most `max_concurrent_tasks` agent
    /// invocations at once across all strategies.
    pub fn new(max_concurrent_tasks: usize) -> Self {
        Self {
            concurrency: Arc::new(Semaphore::new(max_concurrent_tasks.max(1))),
        }
    }

    /// Run `agents` against `initial_context` under `strategy`.
    pub async fn run_group(
        &self,
        strategy: CoordinationStrategy,
        agents: &[Arc<dyn Agent>],
        initial_context: serde_json::Value,
    ) -> ResultAggregation {
        match strategy {
            CoordinationStrategy::Sequential => self.run_sequential(agents, initial_context).await,
            CoordinationStrategy::Parallel => self.run_parallel(agents, initial_context).await,
            CoordinationStrategy::Pipeline => self.run_pipeline(agents, initial_context).await,
            CoordinationStrategy::Hierarchical => self.run_hierarchical(agents, initial_context).await,
        }
    }

    async fn acquire(&self) -> tokio::sync::OwnedSemaphorePermit {
        Arc::clone(&self.concurrency)
            .acquire_owned()
            .await
            .expect("semaphore is never closed")
    }

    /// Each agent runs in turn against a context merged from every prior
    /// agent's output.
    async fn run_sequential(&self, agents: &[Arc<dyn Agent>], initial_context: serde_json::Value) -> ResultAggregation {
        let mut aggregation = ResultAggregation::default();
        let mut context = initial_context;
        for agent in agents {
            let _permit = self.acquire().await;
            match agent.execute(context.clone()).await {
                Ok(result) => {
                    if let (Some(ctx_obj), Some(result_obj)) = (context.as_object_mut(), result.as_object()) {
                        for (k, v) in result_obj {
                            ctx_obj.insert(k.clone(), v.clone());
                        }
                    }
                    aggregation.outputs.insert(agent.id().to_string(), result);
                }
                Err(e) => {
                    aggregation.errors.insert(agent.id().to_string(), e.to_string());
                }
            }
        }
        aggregation
    }

    /// Every agent runs concurrently against the same starting context, in
    /// isolation from one another.
    async fn run_parallel(&self, agents: &[Arc<dyn Agent>], initial_context: serde_json::Value) -> ResultAggregation {
        let futures = agents.iter().map(|agent| {
            let agent = Arc::clone(agent);
            let context = initial_context.clone();
            async move {
                let _permit = self.acquire().await;
                (agent.id().to_string(), agent.execute(context).await)
            }
        });
        let results = futures::future::join_all(futures).await;
        let mut aggregation = ResultAggregation::default();
        for (agent_id, result) in results {
            match result {
                Ok(output) => {
                    aggregation.outputs.insert(agent_id, output);
                }
                Err(e) => {
                    aggregation.errors.insert(agent_id, e.to_string());
                }
            }
        }
        aggregation
    }

    /// Each agent runs in turn, seeing only the immediately prior agent's
    /// output as its entire context. A failing stage is recorded and the
    /// next stage still runs, re-fed the last successful stage's output.
    async fn run_pipeline(&self, agents: &[Arc<dyn Agent>], initial_context: serde_json::Value) -> ResultAggregation {
        let mut aggregation = ResultAggregation::default();
        let mut stage_input = initial_context;
        for agent in agents {
            let _permit = self.acquire().await;
            match agent.execute(stage_input.clone()).await {
                Ok(result) => {
                    stage_input = result.clone();
                    aggregation.outputs.insert(agent.id().to_string(), result);
                }
                Err(e) => {
                    aggregation.errors.insert(agent.id().to_string(), e.to_string());
                }
            }
        }
        aggregation
    }

    /// Agents run in `AgentType::HIERARCHY_ORDER` groups, parallel within
    /// each group, each group seeing the accumulated output of all prior
    /// groups merged into its context.
    async fn run_hierarchical(&self, agents: &[Arc<dyn Agent>], initial_context: serde_json::Value) -> ResultAggregation {
        let mut aggregation = ResultAggregation::default();
        let mut context = initial_context;
        for agent_type in AgentType::HIERARCHY_ORDER {
            let group: Vec<Arc<dyn Agent>> = agents
                .iter()
                .filter(|a| a.agent_type() == agent_type)
                .cloned()
                .collect();
            if group.is_empty() {
                continue;
            }
            let group_result = self.run_parallel(&group, context.clone()).await;
            if let Some(ctx_obj) = context.as_object_mut() {
                for v in group_result.outputs.values() {
                    if let Some(v_obj) = v.as_object() {
                        for (k, vv) in v_obj {
                            ctx_obj.insert(k.clone(), vv.clone());
                        }
                    }
                }
            }
            aggregation.outputs.extend(group_result.outputs);
            aggregation.errors.extend(group_result.errors);
        }
        aggregation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoAgent {
        id: String,
        agent_type: AgentType,
    }

    #[async_trait]
    impl Agent for EchoAgent {
        fn id(&self) -> &str {
            &self.id
        }
        fn agent_type(&self) -> AgentType {
            self.agent_type
        }
        async fn execute(&self, context: serde_json::Value) -> Result<serde_json::Value, CoordinatorError> {
            let mut map = serde_json::Map::new();
            map.insert(self.id.clone(), serde_json::Value::Bool(true));
            map.insert("seen".to_string(), context);
            Ok(serde_json::Value::Object(map))
        }
    }

    fn agent(id: &str, agent_type: AgentType) -> Arc<dyn Agent> {
        Arc::new(EchoAgent {
            id: id.to_string(),
            agent_type,
        })
    }

    #[test]
    fn strategy_rule_matches_spec() {
        assert_eq!(determine_strategy(&[AgentType::Code]), CoordinationStrategy::Sequential);
        assert_eq!(
            determine_strategy(&[AgentType::Code, AgentType::Scout]),
            CoordinationStrategy::Pipeline
        );
        assert_eq!(
            determine_strategy(&[AgentType::Code, AgentType::Code]),
            CoordinationStrategy::Parallel
        );
        assert_eq!(
            determine_strategy(&[AgentType::Code, AgentType::Code, AgentType::Scout]),
            CoordinationStrategy::Hierarchical
        );
    }

    #[tokio::test]
    async fn parallel_runs_all_agents() {
        let engine = StrategyEngine::new(4);
        let agents = vec![agent("a1", AgentType::Code), agent("a2", AgentType::Code)];
        let result = engine
            .run_group(CoordinationStrategy::Parallel, &agents, serde_json::json!({}))
            .await;
        assert_eq!(result.outputs.len(), 2);
        assert!(result.errors.is_empty());
    }

    #[tokio::test]
    async fn pipeline_threads_output_to_next_stage() {
        let engine = StrategyEngine::new(4);
        let agents = vec![agent("a1", AgentType::Scout), agent("a2", AgentType::Code)];
        let result = engine
            .run_group(CoordinationStrategy::Pipeline, &agents, serde_json::json!({"start": true}))
            .await;
        assert_eq!(result.outputs.len(), 2);
        let a2_seen = &result.outputs["a2"]["seen"];
        assert_eq!(a2_seen["a1"], serde_json::json!(true));
    }

    struct FailingAgent {
        id: String,
        agent_type: AgentType,
    }

    #[async_trait]
    impl Agent for FailingAgent {
        fn id(&self) -> &str {
            &self.id
        }
        fn agent_type(&self) -> AgentType {
            self.agent_type
        }
        async fn execute(&self, _context: serde_json::Value) -> Result<serde_json::Value, CoordinatorError> {
            Err(CoordinatorError::AgentFailed {
                agent_id: self.id.clone(),
                detail: "boom".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn pipeline_continues_past_a_failed_stage_with_last_good_context() {
        let engine = StrategyEngine::new(4);
        let agents: Vec<Arc<dyn Agent>> = vec![
            agent("a1", AgentType::Scout),
            Arc::new(FailingAgent {
                id: "b".to_string(),
                agent_type: AgentType::Code,
            }),
            agent("c", AgentType::Quality),
        ];
        let result = engine
            .run_group(CoordinationStrategy::Pipeline, &agents, serde_json::json!({"start": true}))
            .await;
        assert_eq!(result.outputs.len(), 2);
        assert!(result.outputs.contains_key("a1"));
        assert!(result.outputs.contains_key("c"));
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors.contains_key("b"));
        let c_seen = &result.outputs["c"]["seen"];
        assert_eq!(c_seen["a1"], serde_json::json!(true));
    }

    #[tokio::test]
    async fn concurrency_is_capped_by_semaphore() {
        let engine = StrategyEngine::new(1);
        assert_eq!(engine.concurrency.available_permits(), 1);
    }
}
