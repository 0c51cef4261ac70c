//! Agent Coordinator: typed agent pool, capability allocator, and
//! coordination-strategy engine.
//!
//! Grounded on `agent_coordinator.py::AgentCoordinator`.

pub mod allocator;
pub mod pool;
pub mod strategy;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use orch_transport::Transport;
use orch_types::{
    AgentInstance, AgentType, CollaborativeTask, CompressionKind, CoordinationStrategy, DeliveryMode, Message,
    MessageHeader, MessagePriority, MessageType, Task,
};

use allocator::{Allocator, CapabilityMap};
use pool::AgentPool;
use strategy::{determine_strategy, Agent, ResultAggregation, StrategyEngine};

/// Coordinator's own address on the transport, used as the `sender` of
/// every `request_response` it issues.
const COORDINATOR_AGENT_ID: &str = "coordinator";

/// Errors surfaced by the coordinator.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    /// No instance of `agent_type` had spare capacity for `task_id`.
    #[error("no available agent of type {agent_type:?} for task {task_id}")]
    NoAvailableAgent { agent_type: AgentType, task_id: String },
    /// `agent_id` has no entry in the pool or execution registry.
    #[error("agent {agent_id} is not registered")]
    UnknownAgent { agent_id: String },
    /// An agent's `execute` call returned an error.
    #[error("agent {agent_id} failed: {detail}")]
    AgentFailed { agent_id: String, detail: String },
}

/// Owns the agent pool and dispatches collaborative tasks to it through
/// the strategy engine. Reachable only through the Orchestrator that
/// constructs it (unidirectional ownership; no back-pointer to the
/// Orchestrator).
pub struct Coordinator {
    pool: Arc<AgentPool>,
    allocator: Allocator,
    strategy_engine: StrategyEngine,
    registry: DashMap<String, Arc<dyn Agent>>,
    transport: Option<Arc<Transport>>,
    request_timeout: Duration,
    responder_tasks: DashMap<String, tokio::task::JoinHandle<()>>,
}

/// Wraps a locally-registered agent so the strategy engine's calls to
/// `Agent::execute` leave the process boundary and come back through
/// `Transport::request_response`, matching the Communication Protocol's
/// target-agent contract instead of invoking the handle in-process.
struct TransportAgent {
    id: String,
    agent_type: AgentType,
    transport: Arc<Transport>,
    timeout: Duration,
    inner: Arc<dyn Agent>,
}

#[async_trait]
impl Agent for TransportAgent {
    fn id(&self) -> &str {
        &self.id
    }
    fn agent_type(&self) -> AgentType {
        self.agent_type
    }
    async fn execute(&self, context: serde_json::Value) -> Result<serde_json::Value, CoordinatorError> {
        let reply = self
            .transport
            .request_response(COORDINATOR_AGENT_ID, &self.id, MessageType::TaskExecution, context, self.timeout)
            .await
            .map_err(|e| CoordinatorError::AgentFailed {
                agent_id: self.id.clone(),
                detail: e.to_string(),
            })?;
        if reply.header.message_type == MessageType::Error {
            let detail = reply
                .payload
                .get("detail")
                .and_then(|v| v.as_str())
                .unwrap_or("agent execution failed")
                .to_string();
            return Err(CoordinatorError::AgentFailed { agent_id: self.id.clone(), detail });
        }
        Ok(reply.payload)
    }
    async fn shutdown(&self) {
        self.inner.shutdown().await;
    }
}

impl Coordinator {
    /// A coordinator whose pool flags agents stale after
    /// `2 * heartbeat_interval` of silence, and whose strategy engine caps
    /// concurrent agent invocations at `max_concurrent_tasks`. Agents
    /// registered on a coordinator built this way are invoked directly,
    /// in-process; use [`Coordinator::new_with_transport`] to dispatch
    /// through a [`Transport`] instead.
    pub fn new(heartbeat_interval: Duration, max_concurrent_tasks: usize) -> Self {
        Self {
            pool: AgentPool::new(heartbeat_interval),
            allocator: Allocator::new(CapabilityMap::new()),
            strategy_engine: StrategyEngine::new(max_concurrent_tasks),
            registry: DashMap::new(),
            transport: None,
            request_timeout: Duration::from_secs(30),
            responder_tasks: DashMap::new(),
        }
    }

    /// A coordinator that targets every registered agent via
    /// `transport`'s `request_response`, giving each a `request_timeout`
    /// budget to reply.
    pub fn new_with_transport(
        heartbeat_interval: Duration,
        max_concurrent_tasks: usize,
        transport: Arc<Transport>,
        request_timeout: Duration,
    ) -> Self {
        transport.register_queue(COORDINATOR_AGENT_ID);
        Self {
            pool: AgentPool::new(heartbeat_interval),
            allocator: Allocator::new(CapabilityMap::new()),
            strategy_engine: StrategyEngine::new(max_concurrent_tasks),
            registry: DashMap::new(),
            transport: Some(transport),
            request_timeout,
            responder_tasks: DashMap::new(),
        }
    }

    /// Register a runnable agent: its pool metadata and its execution
    /// handle, keyed by `handle.id()`. When this coordinator owns a
    /// [`Transport`], `handle` is additionally wired up to answer
    /// `TaskExecution` requests on it, and the registry entry used by the
    /// strategy engine dispatches through the transport rather than
    /// calling `handle.execute` directly.
    pub fn register_agent(&self, instance: AgentInstance, handle: Arc<dyn Agent>) {
        self.pool.register(instance);
        let agent_id = handle.id().to_string();
        let agent_type = handle.agent_type();
        match &self.transport {
            Some(transport) => {
                transport.register_queue(agent_id.clone());
                let responder = spawn_task_responder(Arc::clone(transport), agent_id.clone(), Arc::clone(&handle));
                self.responder_tasks.insert(agent_id.clone(), responder);
                self.registry.insert(
                    agent_id,
                    Arc::new(TransportAgent {
                        id: handle.id().to_string(),
                        agent_type,
                        transport: Arc::clone(transport),
                        timeout: self.request_timeout,
                        inner: handle,
                    }),
                );
            }
            None => {
                self.registry.insert(agent_id, handle);
            }
        }
    }

    /// Remove an agent from the pool and registry, invoking its shutdown
    /// hook first and stopping its transport responder task, if any.
    pub async fn deregister_agent(&self, agent_id: &str) {
        if let Some((_, handle)) = self.registry.remove(agent_id) {
            handle.shutdown().await;
        }
        if let Some((_, task)) = self.responder_tasks.remove(agent_id) {
            task.abort();
        }
        if let Some(transport) = &self.transport {
            transport.unregister_agent(agent_id);
        }
        self.pool.deregister(agent_id);
    }

    /// The underlying agent pool, for heartbeats and inspection.
    pub fn pool(&self) -> &Arc<AgentPool> {
        &self.pool
    }

    /// Allocate agents to `task`, execute it under the strategy implied by
    /// the allocated agents' types, and release all agents back to the
    /// pool once done regardless of outcome.
    pub async fn execute_task(
        &self,
        task: &Task,
        initial_context: serde_json::Value,
    ) -> Result<(CollaborativeTask, ResultAggregation), CoordinatorError> {
        let agent_ids = self.allocator.allocate(&self.pool, task)?;
        let result = self.run_allocated(&agent_ids, initial_context).await;
        for agent_id in &agent_ids {
            let _ = self.pool.release(agent_id);
        }
        let strategy = self.strategy_for(&agent_ids);
        let mut collaborative = CollaborativeTask::new(task.id.clone(), agent_ids, strategy);
        collaborative.results = result.outputs.clone();
        Ok((collaborative, result))
    }

    fn strategy_for(&self, agent_ids: &[String]) -> CoordinationStrategy {
        let types: Vec<AgentType> = agent_ids
            .iter()
            .filter_map(|id| self.registry.get(id).map(|a| a.agent_type()))
            .collect();
        determine_strategy(&types)
    }

    async fn run_allocated(&self, agent_ids: &[String], initial_context: serde_json::Value) -> ResultAggregation {
        let agents: Vec<Arc<dyn Agent>> = agent_ids
            .iter()
            .filter_map(|id| self.registry.get(id).map(|a| Arc::clone(a.value())))
            .collect();
        let types: Vec<AgentType> = agents.iter().map(|a| a.agent_type()).collect();
        let strategy = determine_strategy(&types);
        self.strategy_engine.run_group(strategy, &agents, initial_context).await
    }
}

/// Drive `handle`'s queue on `transport`: pull `TaskExecution` requests
/// addressed to `agent_id`, run `handle.execute`, and reply with a
/// correlated `TaskResponse` (or `Error`) message. One task per registered
/// agent, aborted on deregistration.
fn spawn_task_responder(transport: Arc<Transport>, agent_id: String, handle: Arc<dyn Agent>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let request = match transport.receive(&agent_id, None).await {
                Ok(Some(request)) => request,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(agent_id, error = %e, "task responder stopped receiving");
                    return;
                }
            };
            if request.header.message_type != MessageType::TaskExecution {
                continue;
            }
            let reply_payload = match handle.execute(request.payload).await {
                Ok(value) => (MessageType::TaskResponse, value),
                Err(e) => (
                    MessageType::Error,
                    serde_json::json!({ "detail": e.to_string() }),
                ),
            };
            let reply = Message {
                header: MessageHeader {
                    id: format!("{}-reply", request.header.id),
                    sender: agent_id.clone(),
                    recipient: Some(request.header.sender.clone()),
                    message_type: reply_payload.0,
                    priority: MessagePriority::High,
                    delivery_mode: DeliveryMode::FireAndForget,
                    compression: CompressionKind::None,
                    timestamp: chrono::Utc::now(),
                    ttl: None,
                    correlation_id: Some(request.header.id.clone()),
                    checksum: None,
                },
                payload: reply_payload.1,
            };
            if let Err(e) = transport.send_message(reply).await {
                tracing::warn!(agent_id, error = %e, "failed to send task response");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

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
            map.insert("agent".to_string(), serde_json::Value::String(self.id.clone()));
            map.insert("seen".to_string(), context);
            Ok(serde_json::Value::Object(map))
        }
    }

    #[tokio::test]
    async fn execute_task_allocates_runs_and_releases() {
        let coordinator = Coordinator::new(Duration::from_secs(60), 4);
        coordinator.register_agent(
            AgentInstance::new("code-1", AgentType::Code, 1),
            Arc::new(EchoAgent {
                id: "code-1".into(),
                agent_type: AgentType::Code,
            }),
        );

        let mut task = Task::new("t1", "name", "desc").unwrap();
        task.required_capabilities.insert("implement".into());

        let (collaborative, result) = coordinator
            .execute_task(&task, serde_json::json!({"goal": "build"}))
            .await
            .unwrap();

        assert_eq!(collaborative.agent_ids, vec!["code-1".to_string()]);
        assert_eq!(collaborative.strategy, CoordinationStrategy::Sequential);
        assert!(result.errors.is_empty());
        assert!(coordinator.pool().available_by_type(AgentType::Code).len() == 1);
    }

    #[tokio::test]
    async fn unallocatable_task_errors_without_partial_side_effects() {
        let coordinator = Coordinator::new(Duration::from_secs(60), 4);
        let mut task = Task::new("t1", "name", "desc").unwrap();
        task.required_capabilities.insert("implement".into());

        let err = coordinator.execute_task(&task, serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::NoAvailableAgent { .. }));
    }

    #[tokio::test]
    async fn execute_task_with_transport_round_trips_through_request_response() {
        let transport = Transport::new(orch_transport::TransportConfig::default());
        let coordinator = Coordinator::new_with_transport(Duration::from_secs(60), 4, Arc::clone(&transport), Duration::from_secs(1));
        coordinator.register_agent(
            AgentInstance::new("code-1", AgentType::Code, 1),
            Arc::new(EchoAgent {
                id: "code-1".into(),
                agent_type: AgentType::Code,
            }),
        );

        let mut task = Task::new("t1", "name", "desc").unwrap();
        task.required_capabilities.insert("implement".into());

        let (collaborative, result) = coordinator
            .execute_task(&task, serde_json::json!({"goal": "build"}))
            .await
            .unwrap();

        assert_eq!(collaborative.agent_ids, vec!["code-1".to_string()]);
        assert!(result.errors.is_empty());
        assert_eq!(
            result.outputs.get("code-1").and_then(|v| v.get("agent")).and_then(|v| v.as_str()),
            Some("code-1")
        );
    }
}
