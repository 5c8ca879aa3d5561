use std::future::Future;
use std::pin::Pin;

use crate::{LogError, Message};

// ════════════════════════════════════════════════════════════════
//  Replay snapshot
// ════════════════════════════════════════════════════════════════

/// Snapshot of one topic's history, ascending by id.
///
/// `skipped` counts records the backend could not decode. They are
/// logged by the backend and left out of `messages`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Replay {
    pub messages: Vec<Message>,
    pub skipped: usize,
}

impl Replay {
    pub fn new(messages: Vec<Message>) -> Self {
        Self { messages, skipped: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }
}

impl IntoIterator for Replay {
    type Item = Message;
    type IntoIter = std::vec::IntoIter<Message>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.into_iter()
    }
}

// ════════════════════════════════════════════════════════════════
//  MessageLog
// ════════════════════════════════════════════════════════════════

/// Durable, append-only, id-ordered store of every published message.
///
/// Backends: in-memory (`storage-memory`), JSON lines on disk
/// (`storage-jsonl`). One instance is shared by all topics.
pub trait MessageLog: Send + Sync {
    /// Prepare the backing store (directories, recovery scan).
    fn init(&self) -> Pin<Box<dyn Future<Output = Result<(), LogError>> + Send + '_>>;

    /// Persist a new record and return it with its assigned id.
    ///
    /// Ids are unique and strictly increasing across the whole log.
    /// A failed append does not consume an id.
    fn append(&self, topic: &str, content: &str)
        -> Pin<Box<dyn Future<Output = Result<Message, LogError>> + Send + '_>>;

    /// All records of `topic`, ascending by id, as of the start of the call.
    ///
    /// Empty history is an empty `Replay`, not an error. Every call takes a
    /// fresh snapshot.
    fn replay(&self, topic: &str)
        -> Pin<Box<dyn Future<Output = Result<Replay, LogError>> + Send + '_>>;

    /// Flush buffers to stable storage.
    fn flush(&self) -> Pin<Box<dyn Future<Output = Result<(), LogError>> + Send + '_>>;
}
