//! Wire-level message data model.
//!
//! Grounded on `communication_protocol.py`'s `MessageHeader`/
//! `ProtocolMessage`/`MessageType`/`Priority`/`DeliveryMode`. This crate
//! only carries the data shapes; encoding, checksums, and compression are
//! implemented by `orch-transport`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of message carried over the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// A request that a recipient perform a task.
    TaskRequest,
    /// A reply to a prior `TaskRequest`.
    TaskResponse,
    /// An unsolicited progress or state update.
    StatusUpdate,
    /// A liveness probe.
    HealthCheck,
    /// A request for additional resources/capacity.
    ResourceRequest,
    /// Coordination control-plane traffic between coordinator and agents.
    Coordination,
    /// Fan-out to all subscribers of a topic.
    Broadcast,
    /// Point-to-point delivery outside the broadcast path.
    Direct,
    /// An error report correlated to a prior message.
    Error,
    /// Acknowledgement of a message requiring one.
    Acknowledgement,
    /// Internal-only: drives an agent invocation inside the Strategy
    /// Engine; never leaves the transport's process boundary.
    TaskExecution,
}

/// Scheduling priority for queued messages, distinct from [`crate::task::Priority`]
/// so transport priority and task priority can diverge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessagePriority {
    /// Delivered ahead of all other pending messages.
    Critical,
    /// Above-default weight.
    High,
    /// Default weight.
    Medium,
    /// Below-default weight.
    Low,
    /// Lowest scheduling weight; yields to every other tier.
    Background,
}

impl MessagePriority {
    /// Lower value dequeues first (`Critical` = 0 ... `Background` = 4).
    pub fn rank(self) -> u8 {
        match self {
            MessagePriority::Critical => 0,
            MessagePriority::High => 1,
            MessagePriority::Medium => 2,
            MessagePriority::Low => 3,
            MessagePriority::Background => 4,
        }
    }
}

/// Delivery guarantee requested for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Best effort, no acknowledgement tracked.
    FireAndForget,
    /// Tracked for acknowledgement with retry up to a configured cap.
    Reliable,
    /// Sent via [`MessageType`] correlation and awaited synchronously by
    /// the sender through `Transport::request_response`.
    RequestResponse,
    /// Delivered to its recipient in strict per-sender send order.
    Ordered,
}

/// Compression applied to a message's payload before transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionKind {
    /// Payload carried uncompressed.
    #[default]
    None,
    /// DEFLATE-wrapped (zlib) compression.
    Zlib,
    /// Gzip-wrapped compression.
    Gzip,
}

/// Envelope metadata for a [`Message`], grounded on
/// `communication_protocol.py::MessageHeader`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageHeader {
    /// Globally-unique message id.
    pub id: String,
    /// Sending agent or component id.
    pub sender: String,
    /// Receiving agent or component id. `None` for broadcasts.
    pub recipient: Option<String>,
    /// Kind of message.
    pub message_type: MessageType,
    /// Scheduling priority.
    pub priority: MessagePriority,
    /// Requested delivery guarantee.
    pub delivery_mode: DeliveryMode,
    /// Compression applied to the payload.
    pub compression: CompressionKind,
    /// Creation timestamp.
    pub timestamp: DateTime<Utc>,
    /// Optional time-to-live; the message is dropped if still queued past
    /// `timestamp + ttl` at dequeue time.
    pub ttl: Option<chrono::Duration>,
    /// Correlates a response to its originating request.
    pub correlation_id: Option<String>,
    /// Hex-encoded checksum of the serialized payload, filled in by
    /// `orch-transport`'s codec at send time.
    pub checksum: Option<String>,
}

impl MessageHeader {
    /// Whether, given `now`, this header's TTL has elapsed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.ttl {
            Some(ttl) => now > self.timestamp + ttl,
            None => false,
        }
    }
}

/// A message plus its arbitrary JSON payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Envelope metadata.
    pub header: MessageHeader,
    /// Arbitrary structured payload.
    pub payload: serde_json::Value,
}
