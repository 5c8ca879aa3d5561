pub mod error;
mod registry;
mod session;

use std::sync::Arc;

use pubsub_api::{Message, MessageLog, NewMessage, OverflowPolicy};

pub use error::{BrokerError, DeliveryFailure};
pub use registry::{FanoutReport, Subscription, TopicInfo, TopicRegistry};
pub use session::{Session, SessionState};

// ═══════════════════════════════════════════════════════════════
//  SubscriberOptions
// ═══════════════════════════════════════════════════════════════

/// Largest per-subscriber queue a session gets. Larger requests are clamped.
pub const MAX_SUBSCRIBER_BUFFER: usize = 1 << 20;

/// Queue settings applied to each new session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriberOptions {
    /// Bounded queue capacity per subscriber.
    pub buffer: usize,
    pub overflow: OverflowPolicy,
}

impl Default for SubscriberOptions {
    fn default() -> Self {
        Self {
            buffer: 1024,
            overflow: OverflowPolicy::Drop,
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Broker
// ═══════════════════════════════════════════════════════════════

/// Owns the message log and the topic registry. Built once at startup
/// and shared as `Arc<Broker>` by the request handlers.
pub struct Broker {
    log: Arc<dyn MessageLog>,
    registry: Arc<TopicRegistry>,
    options: SubscriberOptions,
}

impl Broker {
    pub fn new(log: Arc<dyn MessageLog>, options: SubscriberOptions) -> Self {
        Self {
            log,
            registry: Arc::new(TopicRegistry::new()),
            options,
        }
    }

    /// Persist, then fan out.
    ///
    /// Returns the stored message however many subscribers got it. On a
    /// storage failure nothing is dispatched.
    pub async fn publish(&self, candidate: NewMessage) -> Result<Message, BrokerError> {
        if candidate.topic.is_empty() {
            return Err(BrokerError::BadRequest("missing topic".into()));
        }

        let slot = self.registry.slot(&candidate.topic);
        // Live delivery order per topic equals id order.
        let _order = slot.order.lock().await;

        let message = self
            .log
            .append(&candidate.topic, &candidate.content)
            .await
            .map_err(|e| {
                tracing::error!(topic = %candidate.topic, error = %e, "append failed");
                BrokerError::Storage(e)
            })?;

        let report = slot.dispatch(&message);
        tracing::debug!(
            topic = %message.topic,
            id = message.id,
            delivered = report.delivered,
            dropped = report.dropped,
            evicted = report.evicted,
            "published"
        );
        Ok(message)
    }

    /// Open a session with the broker's default queue settings.
    pub async fn subscribe(&self, topic: &str) -> Result<Session, BrokerError> {
        self.subscribe_with(topic, self.options).await
    }

    pub async fn subscribe_with(
        &self,
        topic: &str,
        options: SubscriberOptions,
    ) -> Result<Session, BrokerError> {
        if topic.is_empty() {
            return Err(BrokerError::BadRequest("missing topic".into()));
        }
        Ok(Session::open(topic, &self.registry, self.log.as_ref(), options).await)
    }

    pub fn topics(&self) -> Vec<TopicInfo> {
        self.registry.topics()
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.registry.subscriber_count(topic)
    }
}
