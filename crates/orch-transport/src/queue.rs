//! Bounded, priority-ordered per-agent message queue.
//!
//! Grounded on `communication_protocol.py::MessageQueue.enqueue/dequeue`,
//! which resorts the whole backing list by priority on every enqueue and
//! evicts the tail when full. Reimplemented here with a `BinaryHeap` keyed
//! on `(priority_rank, sequence)` so enqueue/dequeue are O(log n); only the
//! at-capacity eviction path still scans, since it must find the single
//! worst-ranked entry currently held.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};

use orch_types::Message;
use tokio::sync::Mutex;

use crate::TransportError;

#[derive(Debug, Clone)]
struct QueuedItem {
    priority_rank: u8,
    sequence: u64,
    message: Message,
}

impl PartialEq for QueuedItem {
    fn eq(&self, other: &Self) -> bool {
        (self.priority_rank, self.sequence) == (other.priority_rank, other.sequence)
    }
}
impl Eq for QueuedItem {}
impl PartialOrd for QueuedItem {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for QueuedItem {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.priority_rank, self.sequence).cmp(&(other.priority_rank, other.sequence))
    }
}

/// A single agent's inbound message queue.
pub struct MessageQueue {
    heap: Mutex<BinaryHeap<Reverse<QueuedItem>>>,
    max_size: usize,
    sequence: AtomicU64,
}

impl MessageQueue {
    /// A queue that holds at most `max_size` messages at once.
    pub fn new(max_size: usize) -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            max_size,
            sequence: AtomicU64::new(0),
        }
    }

    /// Enqueue `message`. If the queue is at capacity, the incoming message
    /// evicts the current worst-ranked entry when it outranks it; otherwise
    /// the incoming message is rejected with [`TransportError::QueueFull`].
    pub async fn enqueue(&self, message: Message) -> Result<(), TransportError> {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let item = QueuedItem {
            priority_rank: message.header.priority.rank(),
            sequence,
            message,
        };
        let mut heap = self.heap.lock().await;
        if heap.len() < self.max_size {
            heap.push(Reverse(item));
            return Ok(());
        }
        let worst = heap
            .iter()
            .map(|Reverse(i)| (i.priority_rank, i.sequence))
            .max();
        match worst {
            Some((worst_rank, worst_seq)) if (item.priority_rank, item.sequence) < (worst_rank, worst_seq) => {
                let mut items: Vec<QueuedItem> = heap.drain().map(|Reverse(i)| i).collect();
                items.retain(|i| (i.priority_rank, i.sequence) != (worst_rank, worst_seq));
                items.push(item);
                *heap = items.into_iter().map(Reverse).collect();
                Ok(())
            }
            _ => Err(TransportError::QueueFull {
                max_size: self.max_size,
            }),
        }
    }

    /// Pop the highest-priority message, skipping (and logging) any whose
    /// TTL has already elapsed.
    pub async fn dequeue(&self) -> Option<Message> {
        let mut heap = self.heap.lock().await;
        loop {
            let Reverse(item) = heap.pop()?;
            if item.message.header.is_expired(chrono::Utc::now()) {
                tracing::warn!(message_id = %item.message.header.id, "dropping expired message at dequeue");
                continue;
            }
            return Some(item.message);
        }
    }

    /// Current number of queued messages.
    pub async fn len(&self) -> usize {
        self.heap.lock().await.len()
    }

    /// Whether the queue currently holds no messages.
    pub async fn is_empty(&self) -> bool {
        self.heap.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orch_types::{CompressionKind, DeliveryMode, MessageHeader, MessagePriority, MessageType};

    fn msg(id: &str, priority: MessagePriority) -> Message {
        Message {
            header: MessageHeader {
                id: id.into(),
                sender: "s".into(),
                recipient: Some("r".into()),
                message_type: MessageType::Direct,
                priority,
                delivery_mode: DeliveryMode::FireAndForget,
                compression: CompressionKind::None,
                timestamp: chrono::Utc::now(),
                ttl: None,
                correlation_id: None,
                checksum: None,
            },
            payload: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn dequeues_highest_priority_first() {
        let q = MessageQueue::new(10);
        q.enqueue(msg("low", MessagePriority::Low)).await.unwrap();
        q.enqueue(msg("critical", MessagePriority::Critical)).await.unwrap();
        q.enqueue(msg("medium", MessagePriority::Medium)).await.unwrap();
        assert_eq!(q.dequeue().await.unwrap().header.id, "critical");
        assert_eq!(q.dequeue().await.unwrap().header.id, "medium");
        assert_eq!(q.dequeue().await.unwrap().header.id, "low");
    }

    #[tokio::test]
    async fn fifo_within_same_priority() {
        let q = MessageQueue::new(10);
        q.enqueue(msg("first", MessagePriority::Medium)).await.unwrap();
        q.enqueue(msg("second", MessagePriority::Medium)).await.unwrap();
        assert_eq!(q.dequeue().await.unwrap().header.id, "first");
        assert_eq!(q.dequeue().await.unwrap().header.id, "second");
    }

    #[tokio::test]
    async fn eviction_when_full() {
        let q = MessageQueue::new(1);
        q.enqueue(msg("low", MessagePriority::Low)).await.unwrap();
        q.enqueue(msg("urgent", MessagePriority::Critical)).await.unwrap();
        assert_eq!(q.len().await, 1);
        assert_eq!(q.dequeue().await.unwrap().header.id, "urgent");
    }

    #[tokio::test]
    async fn rejects_when_full_and_not_higher_priority() {
        let q = MessageQueue::new(1);
        q.enqueue(msg("urgent", MessagePriority::Critical)).await.unwrap();
        let err = q.enqueue(msg("low", MessagePriority::Low)).await.unwrap_err();
        assert!(matches!(err, TransportError::QueueFull { .. }));
    }

    #[tokio::test]
    async fn expired_messages_are_skipped() {
        let q = MessageQueue::new(10);
        let mut expired = msg("expired", MessagePriority::Critical);
        expired.header.timestamp = chrono::Utc::now() - chrono::Duration::seconds(100);
        expired.header.ttl = Some(chrono::Duration::seconds(1));
        q.enqueue(expired).await.unwrap();
        q.enqueue(msg("fresh", MessagePriority::Low)).await.unwrap();
        assert_eq!(q.dequeue().await.unwrap().header.id, "fresh");
    }
}
