//! Acknowledgement tracking and retry bookkeeping for `AtLeastOnce`
//! deliveries.
//!
//! Grounded on `communication_protocol.py::ReliabilityManager`.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use orch_types::Message;

#[derive(Debug, Clone)]
struct PendingEntry {
    message: Message,
    sent_at: DateTime<Utc>,
    retries: u32,
}

/// Outcome of a timeout sweep for one pending message.
#[derive(Debug, Clone)]
pub enum TimeoutOutcome {
    /// Should be resent; `attempt` is the retry count after this resend.
    Retry { message: Message, attempt: u32 },
    /// Exceeded the configured retry cap; the message is now abandoned.
    GiveUp { message_id: String },
}

/// Tracks in-flight `AtLeastOnce` messages awaiting acknowledgement.
pub struct ReliabilityTracker {
    pending: DashMap<String, PendingEntry>,
    ack_timeout: Duration,
    max_retries: u32,
}

impl ReliabilityTracker {
    /// A tracker that resends unacknowledged messages after `ack_timeout`,
    /// giving up once a message has been retried `max_retries` times.
    pub fn new(ack_timeout: Duration, max_retries: u32) -> Self {
        Self {
            pending: DashMap::new(),
            ack_timeout,
            max_retries,
        }
    }

    /// Begin tracking a sent message awaiting acknowledgement.
    pub fn track(&self, message: Message) {
        let id = message.header.id.clone();
        self.pending.insert(
            id,
            PendingEntry {
                message,
                sent_at: Utc::now(),
                retries: 0,
            },
        );
    }

    /// Record an acknowledgement, removing the message from tracking.
    /// Returns `true` if a pending entry was found and removed.
    pub fn acknowledge(&self, message_id: &str) -> bool {
        self.pending.remove(message_id).is_some()
    }

    /// Sweep all pending entries past `ack_timeout`, yielding a retry or
    /// give-up outcome for each and advancing its retry counter in place.
    pub fn check_timeouts(&self) -> Vec<TimeoutOutcome> {
        let now = Utc::now();
        let expired: Vec<String> = self
            .pending
            .iter()
            .filter(|e| {
                now.signed_duration_since(e.sent_at)
                    .to_std()
                    .map(|elapsed| elapsed >= self.ack_timeout)
                    .unwrap_or(false)
            })
            .map(|e| e.key().clone())
            .collect();

        let mut outcomes = Vec::with_capacity(expired.len());
        for id in expired {
            let outcome = match self.pending.get_mut(&id) {
                Some(mut entry) if entry.retries >= self.max_retries => {
                    drop(entry);
                    self.pending.remove(&id);
                    TimeoutOutcome::GiveUp { message_id: id }
                }
                Some(mut entry) => {
                    entry.retries += 1;
                    entry.sent_at = now;
                    TimeoutOutcome::Retry {
                        message: entry.message.clone(),
                        attempt: entry.retries,
                    }
                }
                None => continue,
            };
            outcomes.push(outcome);
        }
        outcomes
    }

    /// Number of messages currently awaiting acknowledgement.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orch_types::{CompressionKind, DeliveryMode, MessageHeader, MessagePriority, MessageType};

    fn msg(id: &str) -> Message {
        Message {
            header: MessageHeader {
                id: id.into(),
                sender: "a".into(),
                recipient: Some("b".into()),
                message_type: MessageType::Direct,
                priority: MessagePriority::Medium,
                delivery_mode: DeliveryMode::Reliable,
                compression: CompressionKind::None,
                timestamp: Utc::now(),
                ttl: None,
                correlation_id: None,
                checksum: None,
            },
            payload: serde_json::json!({}),
        }
    }

    #[test]
    fn acknowledge_removes_pending() {
        let t = ReliabilityTracker::new(Duration::from_secs(30), 3);
        t.track(msg("m1"));
        assert_eq!(t.pending_count(), 1);
        assert!(t.acknowledge("m1"));
        assert_eq!(t.pending_count(), 0);
        assert!(!t.acknowledge("m1"));
    }

    #[test]
    fn timeout_sweep_retries_then_gives_up() {
        let t = ReliabilityTracker::new(Duration::from_secs(0), 1);
        t.track(msg("m1"));
        let outcomes = t.check_timeouts();
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(outcomes[0], TimeoutOutcome::Retry { attempt: 1, .. }));

        let outcomes = t.check_timeouts();
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(outcomes[0], TimeoutOutcome::GiveUp { .. }));
        assert_eq!(t.pending_count(), 0);
    }
}
