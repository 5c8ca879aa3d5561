use std::sync::Arc;

use pubsub_api::{Message, MessageLog};

use crate::registry::{Subscription, TopicRegistry};
use crate::SubscriberOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Initializing,
    Replaying,
    Live,
    Closed,
}

/// One subscriber connection: replay of the topic's history, then live
/// delivery from its own queue.
///
/// The queue is registered before the replay snapshot is taken, so nothing
/// published afterwards is missed. A message persisted in between shows up
/// twice (once in replay, once live); consumers dedupe by id if they care.
///
/// Dropping the session (or calling [`close`](Self::close)) unregisters
/// the queue.
pub struct Session {
    topic: String,
    state: SessionState,
    replay: std::vec::IntoIter<Message>,
    replay_len: usize,
    subscription: Option<Subscription>,
    evicted: bool,
}

impl Session {
    pub(crate) async fn open(
        topic: &str,
        registry: &Arc<TopicRegistry>,
        log: &dyn MessageLog,
        options: SubscriberOptions,
    ) -> Self {
        let mut session = Self {
            topic: topic.to_string(),
            state: SessionState::Initializing,
            replay: Vec::new().into_iter(),
            replay_len: 0,
            subscription: None,
            evicted: false,
        };

        session.subscription = Some(registry.register(topic, options.buffer, options.overflow));

        let history = match log.replay(topic).await {
            Ok(replay) => {
                if replay.skipped > 0 {
                    tracing::warn!(topic, skipped = replay.skipped, "replay left out undecodable records");
                }
                replay.messages
            }
            Err(e) => {
                tracing::warn!(topic, error = %e, "replay unavailable, continuing with live delivery only");
                Vec::new()
            }
        };

        session.replay_len = history.len();
        session.replay = history.into_iter();
        session.state = SessionState::Replaying;
        tracing::debug!(topic, replay = session.replay_len, "session opened");
        session
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Number of messages in the replay snapshot.
    pub fn replay_len(&self) -> usize {
        self.replay_len
    }

    /// Whether fan-out evicted this session's queue for lagging.
    pub fn evicted(&self) -> bool {
        match &self.subscription {
            Some(sub) => sub.evicted(),
            None => self.evicted,
        }
    }

    /// Messages fan-out dropped for this session because its queue was full.
    pub fn dropped(&self) -> u64 {
        self.subscription.as_ref().map_or(0, Subscription::dropped)
    }

    /// Next message: replay first, then live. `None` once closed.
    pub async fn next(&mut self) -> Option<Message> {
        if self.state == SessionState::Replaying {
            if let Some(message) = self.replay.next() {
                return Some(message);
            }
            self.state = SessionState::Live;
            tracing::debug!(topic = %self.topic, replayed = self.replay_len, "replay drained, going live");
        }

        let subscription = match (self.state, self.subscription.as_mut()) {
            (SessionState::Live, Some(sub)) => sub,
            _ => return None,
        };

        match subscription.recv().await {
            Some(message) => Some(message),
            None => {
                self.close();
                None
            }
        }
    }

    /// Terminal transition. Unregisters the queue; idempotent.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closed;
        if let Some(sub) = self.subscription.take() {
            self.evicted = sub.evicted();
            tracing::debug!(
                topic = %self.topic,
                subscriber = sub.id(),
                evicted = self.evicted,
                dropped = sub.dropped(),
                "session closed"
            );
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("topic", &self.topic)
            .field("state", &self.state)
            .finish()
    }
}
