// Purpose: Topic-routed publish/subscribe abstraction.
// Architecture: External Collaborator (reference implementation)
// Dependencies: tokio, dashmap, async-trait

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc};
use tracing::warn;

use crate::message::Envelope;

/// The real broker (an external collaborator) is topic-routed: any
/// subscriber whose binding pattern matches a published topic receives
/// the message. This crate depends only on this trait; `InProcessBroker`
/// is a runnable, testable stand-in.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn publish(&self, topic: &str, envelope: Envelope);

    /// Registers a mailbox for `topic_prefix` (an agent's own mailbox,
    /// or a broadcast topic such as `agent.public`). Returns a receiver
    /// fed every envelope published to a topic starting with the prefix.
    fn subscribe(&self, topic_prefix: &str) -> mpsc::UnboundedReceiver<Envelope>;
}

struct Subscription {
    prefix: String,
    sender: mpsc::UnboundedSender<Envelope>,
}

/// An in-process reference broker built on a fan-out table of
/// `mpsc` mailboxes, one per subscription, matched by topic prefix —
/// functionally equivalent to the real exchange's wildcard routing
/// (`{domain}.agent.<id>.#`) without a network hop.
pub struct InProcessBroker {
    subscriptions: DashMap<u64, Subscription>,
    next_id: std::sync::atomic::AtomicU64,
    /// Secondary broadcast channel the admin surface listens on for
    /// every published envelope, regardless of topic.
    tap: broadcast::Sender<(String, Envelope)>,
}

impl Default for InProcessBroker {
    fn default() -> Self {
        let (tap, _) = broadcast::channel(1024);
        InProcessBroker {
            subscriptions: DashMap::new(),
            next_id: std::sync::atomic::AtomicU64::new(0),
            tap,
        }
    }
}

impl InProcessBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tap(&self) -> broadcast::Receiver<(String, Envelope)> {
        self.tap.subscribe()
    }
}

#[async_trait]
impl Broker for InProcessBroker {
    async fn publish(&self, topic: &str, envelope: Envelope) {
        let _ = self.tap.send((topic.to_string(), envelope.clone()));
        let mut dead = Vec::new();
        for entry in self.subscriptions.iter() {
            if topic.starts_with(entry.prefix.as_str()) {
                if entry.sender.send(envelope.clone()).is_err() {
                    dead.push(*entry.key());
                }
            }
        }
        for id in dead {
            self.subscriptions.remove(&id);
        }
        if self.subscriptions.is_empty() {
            warn!(topic, "published with no subscribers");
        }
    }

    fn subscribe(&self, topic_prefix: &str) -> mpsc::UnboundedReceiver<Envelope> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self
            .next_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.subscriptions.insert(
            id,
            Subscription {
                prefix: topic_prefix.to_string(),
                sender: tx,
            },
        );
        rx
    }
}
