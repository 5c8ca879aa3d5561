use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;

use tokio::sync::RwLock;

use pubsub_api::{LogError, Message, MessageLog, Replay};

// ═══════════════════════════════════════════════════════════════
//  MemoryLogConfig
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct MemoryLogConfig {
    /// Retention cap. `None` keeps everything.
    #[serde(default)]
    pub max_records: Option<usize>,
}

// ═══════════════════════════════════════════════════════════════
//  MemoryLog
// ═══════════════════════════════════════════════════════════════

struct MemoryState {
    records: VecDeque<Message>,
    next_id: u64,
}

/// In-memory message log. Nothing survives a restart; used by tests
/// and by deployments that only need live fan-out plus recent replay.
///
/// With `max_records` set the oldest records are evicted first. Ids keep
/// growing across evictions.
pub struct MemoryLog {
    state: RwLock<MemoryState>,
    max_records: Option<usize>,
}

impl Default for MemoryLog {
    fn default() -> Self {
        Self::new(MemoryLogConfig::default())
    }
}

impl MemoryLog {
    pub fn new(config: MemoryLogConfig) -> Self {
        let capacity = config.max_records.unwrap_or(1024).min(65536);
        Self {
            state: RwLock::new(MemoryState {
                records: VecDeque::with_capacity(capacity),
                next_id: 1,
            }),
            max_records: config.max_records,
        }
    }

    /// Number of records currently retained.
    pub async fn len(&self) -> usize {
        self.state.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.records.is_empty()
    }
}

impl MessageLog for MemoryLog {
    fn init(&self) -> Pin<Box<dyn Future<Output = Result<(), LogError>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }

    fn append(
        &self,
        topic: &str,
        content: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Message, LogError>> + Send + '_>> {
        let topic = topic.to_string();
        let content = content.to_string();
        Box::pin(async move {
            let mut state = self.state.write().await;
            let message = Message { id: state.next_id, topic, content };
            state.next_id += 1;
            if let Some(max) = self.max_records {
                while state.records.len() >= max.max(1) {
                    state.records.pop_front();
                }
            }
            state.records.push_back(message.clone());
            Ok(message)
        })
    }

    fn replay(
        &self,
        topic: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Replay, LogError>> + Send + '_>> {
        let topic = topic.to_string();
        Box::pin(async move {
            let state = self.state.read().await;
            let messages = state
                .records
                .iter()
                .filter(|m| m.topic == topic)
                .cloned()
                .collect();
            Ok(Replay::new(messages))
        })
    }

    fn flush(&self) -> Pin<Box<dyn Future<Output = Result<(), LogError>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }
}
