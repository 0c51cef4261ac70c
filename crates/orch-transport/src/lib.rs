//! Communication Protocol: per-agent priority-queued, reliable,
//! checksummed inter-agent messaging.
//!
//! Grounded on `communication_protocol.py::CommunicationProtocol`,
//! restructured around `tokio::spawn` background tasks the way
//! `toka_orchestration::OrchestrationEngine` spawns its run loop, in place
//! of the original's single combined `_process_messages` loop.

pub mod codec;
pub mod queue;
pub mod reliability;
pub mod router;

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use orch_types::{DeliveryMode, Message, MessageHeader, MessagePriority, MessageType, Route};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use queue::MessageQueue;
use reliability::{ReliabilityTracker, TimeoutOutcome};
use router::Router;

/// Errors surfaced by the transport, shaped per the workspace-wide
/// `{kind, where, detail, correlation}` convention where applicable.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// A queue was at capacity and the incoming message did not outrank
    /// its current worst entry.
    #[error("queue full (max_size={max_size})")]
    QueueFull { max_size: usize },
    /// The router has no entry for the named destination.
    #[error("no route to {destination}")]
    NoRoute { destination: String },
    /// Serialization, compression, or base64 framing failed.
    #[error("codec error: {detail}")]
    Codec { detail: String },
    /// A decoded message's checksum did not match its payload.
    #[error("checksum mismatch")]
    ChecksumMismatch,
    /// A decoded message lacked the checksum field entirely.
    #[error("message missing required checksum")]
    MissingChecksum,
    /// The named agent has no registered queue.
    #[error("agent {agent_id} is not registered")]
    UnknownAgent { agent_id: String },
    /// A `request_response` call did not receive a correlated reply before
    /// its deadline.
    #[error("request timed out waiting for a response")]
    RequestTimeout,
}

/// An event surfaced on the transport's broadcast stream; forwarded onward
/// by `orch-orchestrator`'s `OrchestratorEvent` stream.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A message was handed to its recipient's handler.
    Delivered { message_id: String, recipient: String },
    /// A message was dropped before reaching a handler.
    Dropped { message_id: String, reason: String },
    /// An `AtLeastOnce` message missed its acknowledgement window and is
    /// being resent.
    AckTimeout { message_id: String, attempt: u32 },
    /// An `AtLeastOnce` message exhausted its retry budget.
    GaveUp { message_id: String },
}

/// Tunables for a [`Transport`] instance.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Maximum messages held per agent queue.
    pub queue_capacity: usize,
    /// How long to wait for an acknowledgement before retrying.
    pub ack_timeout: Duration,
    /// Maximum retries before giving up on an `AtLeastOnce` message.
    pub max_retries: u32,
    /// How often the reliability checker sweeps for timed-out messages.
    pub reliability_sweep_interval: Duration,
    /// Capacity of the transport's `TransportEvent` broadcast channel.
    pub event_buffer: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            ack_timeout: Duration::from_secs(5),
            max_retries: 3,
            reliability_sweep_interval: Duration::from_secs(1),
            event_buffer: 1024,
        }
    }
}

type Handler = Arc<dyn Fn(Message) + Send + Sync>;

/// A registered agent's queue and its handlers: a catch-all `default_handler`
/// installed at registration time, plus any per-[`MessageType`] overrides
/// layered on through [`Transport::register_handler`]. An agent with neither
/// (registered via [`Transport::register_queue`]) is pull-only: it drains its
/// own queue through [`Transport::receive`]/[`Transport::request_response`]
/// instead of having messages pushed to a callback.
struct AgentChannel {
    queue: Arc<MessageQueue>,
    default_handler: Option<Handler>,
    handlers: DashMap<MessageType, Handler>,
}

/// Per-process transport: a router, a reliability tracker, and one
/// priority queue per registered agent, wired together by background
/// `tokio::spawn` tasks.
pub struct Transport {
    channels: DashMap<String, AgentChannel>,
    router: Arc<Router>,
    reliability: Arc<ReliabilityTracker>,
    events: broadcast::Sender<TransportEvent>,
    config: TransportConfig,
    delivery_tasks: DashMap<String, JoinHandle<()>>,
    reliability_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Transport {
    /// Build a transport and start its background reliability checker.
    pub fn new(config: TransportConfig) -> Arc<Self> {
        let (tx, _rx) = broadcast::channel(config.event_buffer);
        let transport = Arc::new(Self {
            channels: DashMap::new(),
            router: Arc::new(Router::new()),
            reliability: Arc::new(ReliabilityTracker::new(config.ack_timeout, config.max_retries)),
            events: tx,
            config,
            delivery_tasks: DashMap::new(),
            reliability_task: std::sync::Mutex::new(None),
        });
        transport.spawn_reliability_checker();
        transport
    }

    fn spawn_reliability_checker(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let interval = this.config.reliability_sweep_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                for outcome in this.reliability.check_timeouts() {
                    match outcome {
                        TimeoutOutcome::Retry { message, attempt } => {
                            let message_id = message.header.id.clone();
                            tracing::warn!(%message_id, attempt, "resending unacknowledged message");
                            let _ = this.events.send(TransportEvent::AckTimeout {
                                message_id: message_id.clone(),
                                attempt,
                            });
                            if let Err(e) = this.dispatch(message).await {
                                tracing::warn!(%message_id, error = %e, "retry dispatch failed");
                            }
                        }
                        TimeoutOutcome::GiveUp { message_id } => {
                            tracing::error!(%message_id, "giving up on unacknowledged message");
                            let _ = this.events.send(TransportEvent::GaveUp { message_id });
                        }
                    }
                }
            }
        });
        *self.reliability_task.lock().unwrap() = Some(handle);
    }

    /// Register `agent_id` with a fresh queue and start its delivery task.
    /// `handler` is invoked for each message dequeued for this agent whose
    /// type has no more specific handler from [`Transport::register_handler`];
    /// it must not block the async runtime (spawn internally if it needs to
    /// do real work).
    pub fn register_agent(self: &Arc<Self>, agent_id: impl Into<String>, handler: impl Fn(Message) + Send + Sync + 'static) {
        let agent_id = agent_id.into();
        let queue = Arc::new(MessageQueue::new(self.config.queue_capacity));
        self.channels.insert(
            agent_id.clone(),
            AgentChannel {
                queue: Arc::clone(&queue),
                default_handler: Some(Arc::new(handler)),
                handlers: DashMap::new(),
            },
        );
        self.router.register_direct(agent_id.clone());
        self.spawn_delivery_task(agent_id, queue);
    }

    /// Register `agent_id` with a fresh queue but no delivery task or
    /// handler: inbound messages sit in the queue until the agent drains
    /// them itself via [`Transport::receive`] or
    /// [`Transport::request_response`]. Used by callers that issue requests
    /// and wait on the matching reply rather than reacting to pushed
    /// messages.
    pub fn register_queue(self: &Arc<Self>, agent_id: impl Into<String>) {
        let agent_id = agent_id.into();
        let queue = Arc::new(MessageQueue::new(self.config.queue_capacity));
        self.channels.insert(
            agent_id.clone(),
            AgentChannel {
                queue,
                default_handler: None,
                handlers: DashMap::new(),
            },
        );
        self.router.register_direct(agent_id);
    }

    /// Register `handler` for `message_type` on an already-registered
    /// agent, taking priority over its `default_handler` for that type.
    pub fn register_handler(
        &self,
        agent_id: &str,
        message_type: MessageType,
        handler: impl Fn(Message) + Send + Sync + 'static,
    ) -> Result<(), TransportError> {
        let entry = self.channels.get(agent_id).ok_or_else(|| TransportError::UnknownAgent {
            agent_id: agent_id.to_string(),
        })?;
        entry.handlers.insert(message_type, Arc::new(handler));
        Ok(())
    }

    /// Remove a previously registered per-type handler, falling back to the
    /// agent's `default_handler` (if any) for that type.
    pub fn unregister_handler(&self, agent_id: &str, message_type: MessageType) -> Result<(), TransportError> {
        let entry = self.channels.get(agent_id).ok_or_else(|| TransportError::UnknownAgent {
            agent_id: agent_id.to_string(),
        })?;
        entry.handlers.remove(&message_type);
        Ok(())
    }

    fn spawn_delivery_task(self: &Arc<Self>, agent_id: String, queue: Arc<MessageQueue>) {
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                let Some(message) = queue.dequeue().await else {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    continue;
                };
                this.handle_inbound(&agent_id, message).await;
            }
        });
        self.delivery_tasks.insert(agent_id.clone(), handle);
    }

    async fn handle_inbound(&self, agent_id: &str, message: Message) {
        let message_id = message.header.id.clone();
        if message.header.message_type == MessageType::Acknowledgement {
            if let Some(correlation) = &message.header.correlation_id {
                self.reliability.acknowledge(correlation);
            }
            return;
        }
        let requires_ack = message.header.delivery_mode == DeliveryMode::Reliable;
        let original_sender = message.header.sender.clone();
        let Some(entry) = self.channels.get(agent_id) else {
            let _ = self.events.send(TransportEvent::Dropped {
                message_id,
                reason: format!("unknown agent {agent_id}"),
            });
            return;
        };
        let handler = entry
            .handlers
            .get(&message.header.message_type)
            .map(|h| Arc::clone(h.value()))
            .or_else(|| entry.default_handler.clone());
        drop(entry);
        if let Some(handler) = handler {
            handler(message);
            let _ = self.events.send(TransportEvent::Delivered {
                message_id: message_id.clone(),
                recipient: agent_id.to_string(),
            });
        } else {
            let _ = self.events.send(TransportEvent::Dropped {
                message_id: message_id.clone(),
                reason: format!("no handler registered for {agent_id}"),
            });
        }
        if requires_ack {
            // The reliability tracker is shared process-wide, so delivery
            // itself is enough to clear it; an explicit ack message is
            // additionally sent back when the original sender is itself an
            // addressable agent, matching the protocol's ack-message shape.
            self.reliability.acknowledge(&message_id);
            if self.channels.contains_key(&original_sender) {
                let ack = Message {
                    header: MessageHeader {
                        id: format!("{message_id}-ack"),
                        sender: agent_id.to_string(),
                        recipient: Some(original_sender),
                        message_type: MessageType::Acknowledgement,
                        priority: MessagePriority::High,
                        delivery_mode: DeliveryMode::FireAndForget,
                        compression: orch_types::CompressionKind::None,
                        timestamp: chrono::Utc::now(),
                        ttl: None,
                        correlation_id: Some(message_id),
                        checksum: None,
                    },
                    payload: serde_json::Value::Null,
                };
                let _ = self.dispatch(ack).await;
            }
        }
    }

    /// Route and enqueue `message` to its recipient. `Reliable` messages
    /// are additionally handed to the reliability tracker.
    pub async fn send_message(&self, message: Message) -> Result<(), TransportError> {
        if message.header.delivery_mode == DeliveryMode::Reliable {
            self.reliability.track(message.clone());
        }
        self.dispatch(message).await
    }

    /// Wait up to `timeout` (or indefinitely, if `None`) for the next
    /// message addressed to `agent_id`. Intended for agents registered via
    /// [`Transport::register_queue`]; calling this against a
    /// push-registered agent races its delivery task for the same messages.
    pub async fn receive(&self, agent_id: &str, timeout: Option<Duration>) -> Result<Option<Message>, TransportError> {
        let queue = {
            let entry = self.channels.get(agent_id).ok_or_else(|| TransportError::UnknownAgent {
                agent_id: agent_id.to_string(),
            })?;
            Arc::clone(&entry.queue)
        };
        let poll = async {
            loop {
                if let Some(message) = queue.dequeue().await {
                    return message;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        match timeout {
            Some(d) => Ok(tokio::time::timeout(d, poll).await.ok()),
            None => Ok(Some(poll.await)),
        }
    }

    /// Send a `message_type`/`payload` to `receiver` and block until a
    /// correlated reply arrives on `sender`'s queue or `timeout` elapses.
    /// `sender` must be registered (typically via
    /// [`Transport::register_queue`], so the reply isn't raced by a push
    /// delivery task); the responder is expected to reply with
    /// `correlation_id` set to the request's message id.
    pub async fn request_response(
        &self,
        sender: &str,
        receiver: &str,
        message_type: MessageType,
        payload: serde_json::Value,
        timeout: Duration,
    ) -> Result<Message, TransportError> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let request = Message {
            header: MessageHeader {
                id: request_id.clone(),
                sender: sender.to_string(),
                recipient: Some(receiver.to_string()),
                message_type,
                priority: MessagePriority::High,
                delivery_mode: DeliveryMode::RequestResponse,
                compression: orch_types::CompressionKind::None,
                timestamp: chrono::Utc::now(),
                ttl: chrono::Duration::from_std(timeout).ok(),
                correlation_id: None,
                checksum: None,
            },
            payload,
        };
        self.dispatch(request).await?;

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(TransportError::RequestTimeout);
            }
            match self.receive(sender, Some(remaining)).await? {
                Some(reply) if reply.header.correlation_id.as_deref() == Some(request_id.as_str()) => return Ok(reply),
                Some(_) => continue,
                None => return Err(TransportError::RequestTimeout),
            }
        }
    }

    async fn dispatch(&self, message: Message) -> Result<(), TransportError> {
        let Some(destination) = message.header.recipient.clone() else {
            return self.broadcast_message(message).await;
        };
        let route = self.router.resolve(&destination)?;
        let entry = self
            .channels
            .get(&route.next_hop)
            .ok_or_else(|| TransportError::UnknownAgent {
                agent_id: route.next_hop.clone(),
            })?;
        entry.queue.enqueue(message).await
    }

    /// Enqueue `message` on every registered agent's queue except the
    /// sender, mirroring `communication_protocol.py::broadcast_message`.
    pub async fn broadcast_message(&self, message: Message) -> Result<(), TransportError> {
        for entry in self.channels.iter() {
            if entry.key() == &message.header.sender {
                continue;
            }
            entry.value().queue.enqueue(message.clone()).await?;
        }
        Ok(())
    }

    /// Register a multi-hop route (as opposed to a direct connection
    /// established by [`Transport::register_agent`]).
    pub fn register_route(&self, route: Route) {
        self.router.register_route(route);
    }

    /// Deregister an agent, stopping its delivery task and clearing its
    /// routes and queue.
    pub fn unregister_agent(&self, agent_id: &str) {
        if let Some((_, handle)) = self.delivery_tasks.remove(agent_id) {
            handle.abort();
        }
        self.channels.remove(agent_id);
        self.router.unregister(agent_id);
    }

    /// Subscribe to transport-level events.
    pub fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }

    /// Number of messages currently awaiting acknowledgement across all
    /// agents.
    pub fn pending_acks(&self) -> usize {
        self.reliability.pending_count()
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        for entry in self.delivery_tasks.iter() {
            entry.value().abort();
        }
        if let Some(handle) = self.reliability_task.lock().unwrap().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn direct_message(sender: &str, recipient: &str, priority: MessagePriority) -> Message {
        Message {
            header: MessageHeader {
                id: uuid_like(),
                sender: sender.into(),
                recipient: Some(recipient.into()),
                message_type: MessageType::Direct,
                priority,
                delivery_mode: DeliveryMode::FireAndForget,
                compression: orch_types::CompressionKind::None,
                timestamp: chrono::Utc::now(),
                ttl: None,
                correlation_id: None,
                checksum: None,
            },
            payload: serde_json::json!({"hello": "world"}),
        }
    }

    fn uuid_like() -> String {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        format!("m-{}", COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    #[tokio::test]
    async fn delivers_direct_message() {
        let transport = Transport::new(TransportConfig::default());
        let received = Arc::new(AtomicUsize::new(0));
        let received_clone = Arc::clone(&received);
        transport.register_agent("agent-a", move |_msg| {
            received_clone.fetch_add(1, Ordering::SeqCst);
        });

        transport
            .send_message(direct_message("agent-b", "agent-a", MessagePriority::Medium))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(received.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_recipient_errors() {
        let transport = Transport::new(TransportConfig::default());
        let err = transport
            .send_message(direct_message("agent-b", "ghost", MessagePriority::Medium))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::NoRoute { .. }));
    }

    #[tokio::test]
    async fn broadcast_skips_sender() {
        let transport = Transport::new(TransportConfig::default());
        let count_a = Arc::new(AtomicUsize::new(0));
        let count_b = Arc::new(AtomicUsize::new(0));
        let ca = Arc::clone(&count_a);
        let cb = Arc::clone(&count_b);
        transport.register_agent("agent-a", move |_| {
            ca.fetch_add(1, Ordering::SeqCst);
        });
        transport.register_agent("agent-b", move |_| {
            cb.fetch_add(1, Ordering::SeqCst);
        });

        let mut message = direct_message("agent-a", "agent-a", MessagePriority::Medium);
        message.header.recipient = None;
        transport.broadcast_message(message).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count_a.load(Ordering::SeqCst), 0);
        assert_eq!(count_b.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reliable_delivery_is_acknowledged() {
        let transport = Transport::new(TransportConfig::default());
        transport.register_agent("agent-a", |_| {});

        let mut message = direct_message("agent-b", "agent-a", MessagePriority::Medium);
        message.header.delivery_mode = DeliveryMode::Reliable;
        transport.send_message(message).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(transport.pending_acks(), 0);
    }

    #[tokio::test]
    async fn receive_pulls_the_next_queued_message() {
        let transport = Transport::new(TransportConfig::default());
        transport.register_queue("agent-a");

        transport
            .send_message(direct_message("agent-b", "agent-a", MessagePriority::Medium))
            .await
            .unwrap();

        let received = transport
            .receive("agent-a", Some(Duration::from_millis(200)))
            .await
            .unwrap();
        assert!(received.is_some());
    }

    #[tokio::test]
    async fn receive_times_out_on_an_empty_queue() {
        let transport = Transport::new(TransportConfig::default());
        transport.register_queue("agent-a");

        let received = transport
            .receive("agent-a", Some(Duration::from_millis(20)))
            .await
            .unwrap();
        assert!(received.is_none());
    }

    #[tokio::test]
    async fn request_response_round_trips_a_correlated_reply() {
        let transport = Transport::new(TransportConfig::default());
        transport.register_queue("caller");
        transport.register_queue("agent-a");

        let responder = Arc::clone(&transport);
        tokio::spawn(async move {
            let request = responder
                .receive("agent-a", Some(Duration::from_secs(1)))
                .await
                .unwrap()
                .unwrap();
            let reply = Message {
                header: MessageHeader {
                    id: format!("{}-reply", request.header.id),
                    sender: "agent-a".to_string(),
                    recipient: Some(request.header.sender.clone()),
                    message_type: MessageType::TaskResponse,
                    priority: MessagePriority::High,
                    delivery_mode: DeliveryMode::FireAndForget,
                    compression: orch_types::CompressionKind::None,
                    timestamp: chrono::Utc::now(),
                    ttl: None,
                    correlation_id: Some(request.header.id.clone()),
                    checksum: None,
                },
                payload: serde_json::json!({"ok": true}),
            };
            responder.send_message(reply).await.unwrap();
        });

        let reply = transport
            .request_response(
                "caller",
                "agent-a",
                MessageType::TaskExecution,
                serde_json::json!({"do": "it"}),
                Duration::from_secs(1),
            )
            .await
            .unwrap();
        assert_eq!(reply.payload, serde_json::json!({"ok": true}));
    }

    #[tokio::test]
    async fn request_response_times_out_without_a_reply() {
        let transport = Transport::new(TransportConfig::default());
        transport.register_queue("caller");
        transport.register_queue("agent-a");

        let err = transport
            .request_response(
                "caller",
                "agent-a",
                MessageType::TaskExecution,
                serde_json::json!({}),
                Duration::from_millis(30),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::RequestTimeout));
    }

    #[tokio::test]
    async fn register_handler_overrides_the_default_for_its_type() {
        let transport = Transport::new(TransportConfig::default());
        let default_hits = Arc::new(AtomicUsize::new(0));
        let typed_hits = Arc::new(AtomicUsize::new(0));
        let d = Arc::clone(&default_hits);
        transport.register_agent("agent-a", move |_| {
            d.fetch_add(1, Ordering::SeqCst);
        });
        let t = Arc::clone(&typed_hits);
        transport
            .register_handler("agent-a", MessageType::HealthCheck, move |_| {
                t.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        let mut message = direct_message("agent-b", "agent-a", MessagePriority::Medium);
        message.header.message_type = MessageType::HealthCheck;
        transport.send_message(message).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(typed_hits.load(Ordering::SeqCst), 1);
        assert_eq!(default_hits.load(Ordering::SeqCst), 0);
    }
}
