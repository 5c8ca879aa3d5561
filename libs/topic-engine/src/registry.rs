use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::sync::mpsc;

use pubsub_api::{Message, OverflowPolicy};

use crate::error::DeliveryFailure;
use crate::MAX_SUBSCRIBER_BUFFER;

fn lock_or_recover<'a, T>(mutex: &'a Mutex<T>, what: &str) -> MutexGuard<'a, T> {
    match mutex.lock() {
        Ok(g) => g,
        Err(poisoned) => {
            tracing::warn!(lock = what, "lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Subscriber
// ═══════════════════════════════════════════════════════════════

/// Shared between the registry entry and the owning `Subscription`.
#[derive(Debug, Default)]
struct SubscriberStats {
    dropped: AtomicU64,
    evicted: AtomicBool,
}

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<Message>,
    overflow: OverflowPolicy,
    stats: Arc<SubscriberStats>,
}

impl Subscriber {
    fn try_deliver(&self, message: &Message) -> Result<(), DeliveryFailure> {
        self.tx.try_send(message.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryFailure::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryFailure::Closed,
        })
    }
}

/// Outcome of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanoutReport {
    pub delivered: usize,
    /// Queue full under `OverflowPolicy::Drop`.
    pub dropped: usize,
    /// Queue full under `OverflowPolicy::Disconnect`.
    pub evicted: usize,
    /// Queue already closed.
    pub pruned: usize,
}

// ═══════════════════════════════════════════════════════════════
//  TopicSlot
// ═══════════════════════════════════════════════════════════════

/// Per-topic state. Slots are never removed from the registry, so every
/// publisher and subscriber of a topic always meets the same locks.
pub(crate) struct TopicSlot {
    /// Held by the broker across append + dispatch.
    pub(crate) order: tokio::sync::Mutex<()>,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl TopicSlot {
    fn new() -> Self {
        Self {
            order: tokio::sync::Mutex::new(()),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Non-blocking delivery to every registered queue. A full or closed
    /// queue only affects its own subscriber.
    pub(crate) fn dispatch(&self, message: &Message) -> FanoutReport {
        let mut report = FanoutReport::default();
        let mut subs = lock_or_recover(&self.subscribers, "subscribers");
        subs.retain(|sub| match sub.try_deliver(message) {
            Ok(()) => {
                report.delivered += 1;
                true
            }
            Err(DeliveryFailure::Closed) => {
                report.pruned += 1;
                tracing::debug!(topic = %message.topic, subscriber = sub.id, "pruning closed subscriber");
                false
            }
            Err(DeliveryFailure::Full) => match sub.overflow {
                OverflowPolicy::Drop => {
                    sub.stats.dropped.fetch_add(1, Ordering::Relaxed);
                    report.dropped += 1;
                    tracing::warn!(
                        topic = %message.topic,
                        subscriber = sub.id,
                        id = message.id,
                        "subscriber queue full, dropping"
                    );
                    true
                }
                OverflowPolicy::Disconnect => {
                    sub.stats.evicted.store(true, Ordering::Release);
                    report.evicted += 1;
                    tracing::warn!(
                        topic = %message.topic,
                        subscriber = sub.id,
                        id = message.id,
                        "subscriber queue full, evicting"
                    );
                    false
                }
            },
        });
        report
    }

    fn len(&self) -> usize {
        lock_or_recover(&self.subscribers, "subscribers").len()
    }
}

// ═══════════════════════════════════════════════════════════════
//  Subscription
// ═══════════════════════════════════════════════════════════════

/// Receiving side of one subscriber queue. Unregisters itself on drop.
pub struct Subscription {
    topic: String,
    id: u64,
    rx: mpsc::Receiver<Message>,
    stats: Arc<SubscriberStats>,
    registry: Arc<TopicRegistry>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next delivered message. `None` once the subscriber was evicted and
    /// its queue is drained.
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    /// Messages dropped for this subscriber because its queue was full.
    pub fn dropped(&self) -> u64 {
        self.stats.dropped.load(Ordering::Relaxed)
    }

    pub fn evicted(&self) -> bool {
        self.stats.evicted.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("id", &self.id)
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.registry.unregister(&self.topic, self.id);
    }
}

// ═══════════════════════════════════════════════════════════════
//  TopicRegistry
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicInfo {
    pub topic: String,
    pub subscribers: usize,
}

/// Topic name → subscriber queues.
///
/// The map lock only resolves slots; registration, unregistration and
/// fan-out lock the slot's own subscriber list, so different topics never
/// contend.
pub struct TopicRegistry {
    topics: Mutex<HashMap<String, Arc<TopicSlot>>>,
    next_subscriber: AtomicU64,
}

impl Default for TopicRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            next_subscriber: AtomicU64::new(1),
        }
    }

    /// Get or create the slot for `topic`.
    pub(crate) fn slot(&self, topic: &str) -> Arc<TopicSlot> {
        let mut topics = lock_or_recover(&self.topics, "topics");
        match topics.get(topic) {
            Some(slot) => slot.clone(),
            None => {
                let slot = Arc::new(TopicSlot::new());
                topics.insert(topic.to_string(), slot.clone());
                slot
            }
        }
    }

    fn existing(&self, topic: &str) -> Option<Arc<TopicSlot>> {
        lock_or_recover(&self.topics, "topics").get(topic).cloned()
    }

    /// Add a fresh bounded queue under `topic`. `buffer` is clamped to
    /// `1..=MAX_SUBSCRIBER_BUFFER`.
    pub fn register(
        self: &Arc<Self>,
        topic: &str,
        buffer: usize,
        overflow: OverflowPolicy,
    ) -> Subscription {
        let buffer = buffer.clamp(1, MAX_SUBSCRIBER_BUFFER);
        let (tx, rx) = mpsc::channel(buffer);
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        let stats = Arc::new(SubscriberStats::default());

        let slot = self.slot(topic);
        lock_or_recover(&slot.subscribers, "subscribers").push(Subscriber {
            id,
            tx,
            overflow,
            stats: stats.clone(),
        });
        tracing::debug!(topic, subscriber = id, buffer, ?overflow, "subscriber registered");

        Subscription {
            topic: topic.to_string(),
            id,
            rx,
            stats,
            registry: Arc::clone(self),
        }
    }

    /// Remove a queue. Returns `false` if it was already gone.
    pub fn unregister(&self, topic: &str, id: u64) -> bool {
        let Some(slot) = self.existing(topic) else {
            return false;
        };
        let mut subs = lock_or_recover(&slot.subscribers, "subscribers");
        let before = subs.len();
        subs.retain(|s| s.id != id);
        let removed = subs.len() != before;
        if removed {
            tracing::debug!(topic, subscriber = id, "subscriber unregistered");
        }
        removed
    }

    /// Fan a message out to the queues registered under its topic.
    pub fn dispatch(&self, message: &Message) -> FanoutReport {
        match self.existing(&message.topic) {
            Some(slot) => slot.dispatch(message),
            None => FanoutReport::default(),
        }
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.existing(topic).map_or(0, |slot| slot.len())
    }

    /// Known topics with their current subscriber counts, sorted by name.
    pub fn topics(&self) -> Vec<TopicInfo> {
        let slots: Vec<(String, Arc<TopicSlot>)> = lock_or_recover(&self.topics, "topics")
            .iter()
            .map(|(name, slot)| (name.clone(), slot.clone()))
            .collect();
        let mut infos: Vec<TopicInfo> = slots
            .into_iter()
            .map(|(topic, slot)| TopicInfo { topic, subscribers: slot.len() })
            .collect();
        infos.sort_by(|a, b| a.topic.cmp(&b.topic));
        infos
    }
}
