pub mod error;
mod log;

use serde::{Deserialize, Serialize};

pub use error::{LogError, LogErrorKind};
pub use log::{MessageLog, Replay};

// ════════════════════════════════════════════════════════════════
//  Overflow Policy
// ════════════════════════════════════════════════════════════════

/// What fan-out does when a subscriber's bounded queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// try_send(): queue full, drop this message for that subscriber only.
    #[default]
    Drop,
    /// Queue full: evict the subscriber. Its session drains what is
    /// already queued and then closes.
    #[serde(alias = "evict")]
    Disconnect,
}

// ════════════════════════════════════════════════════════════════
//  Messages
// ════════════════════════════════════════════════════════════════

/// A stored message. `id` is assigned by the log and is globally
/// monotonic, not per topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: u64,
    pub topic: String,
    pub content: String,
}

/// A publish candidate: no id yet. Both fields are required on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    pub topic: String,
    pub content: String,
}

impl NewMessage {
    pub fn new(topic: impl Into<String>, content: impl Into<String>) -> Self {
        Self { topic: topic.into(), content: content.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_wire_format_keeps_field_order() {
        let msg = Message { id: 1, topic: "news".into(), content: "a".into() };
        assert_eq!(
            serde_json::to_string(&msg).unwrap(),
            r#"{"id":1,"topic":"news","content":"a"}"#
        );
    }

    #[test]
    fn new_message_requires_both_fields() {
        assert!(serde_json::from_str::<NewMessage>(r#"{"topic":"news"}"#).is_err());
        assert!(serde_json::from_str::<NewMessage>(r#"{"content":"a"}"#).is_err());
        let ok: NewMessage = serde_json::from_str(r#"{"topic":"news","content":""}"#).unwrap();
        assert_eq!(ok, NewMessage::new("news", ""));
    }

    #[test]
    fn overflow_policy_names() {
        let p: OverflowPolicy = serde_json::from_str(r#""disconnect""#).unwrap();
        assert_eq!(p, OverflowPolicy::Disconnect);
        let p: OverflowPolicy = serde_json::from_str(r#""evict""#).unwrap();
        assert_eq!(p, OverflowPolicy::Disconnect);
        assert_eq!(OverflowPolicy::default(), OverflowPolicy::Drop);
    }
}
