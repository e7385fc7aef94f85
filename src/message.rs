use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::id::{MessageId, Priority};

/// A message routed through the bus.
///
/// Equality is defined over `(id, sender, content, recipients, priority)` —
/// `thread_id`, `in_reply_to`, and `topic` are not part of identity.
/// Ordering is by `id` ascending, which (by construction of `MessageId`)
/// orders by priority first and delivery time second.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub sender: String,
    pub content: Value,
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default)]
    pub priority: Priority,
    pub thread_id: MessageId,
    #[serde(default)]
    pub in_reply_to: Option<MessageId>,
    #[serde(default)]
    pub topic: Option<String>,
}

impl Message {
    /// Builds a new message. `thread_id` defaults to `id` (the message
    /// starts its own thread) when not otherwise specified via `with_thread`.
    pub fn new(id: MessageId, sender: impl Into<String>, content: Value, priority: Priority) -> Self {
        Self {
            id,
            sender: sender.into(),
            content,
            recipients: Vec::new(),
            priority,
            thread_id: id,
            in_reply_to: None,
            topic: None,
        }
    }

    pub fn with_recipients(mut self, recipients: Vec<String>) -> Self {
        self.recipients = recipients;
        self
    }

    pub fn with_thread(mut self, thread_id: MessageId) -> Self {
        self.thread_id = thread_id;
        self
    }

    pub fn with_in_reply_to(mut self, in_reply_to: MessageId) -> Self {
        self.in_reply_to = Some(in_reply_to);
        self
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Serializes into the self-describing text form shared by the file and
    /// sorted-set storage backends.
    pub fn serialize(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn deserialize(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.sender == other.sender
            && self.content == other.content
            && self.recipients == other.recipients
            && self.priority == other.priority
    }
}

impl Eq for Message {}

impl PartialOrd for Message {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Message {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.id.cmp(&other.id)
    }
}

/// The closed set of message properties `HashBased` routing may hash over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageProperty {
    Id,
    Content,
    Recipients,
    Sender,
    Priority,
}

impl MessageProperty {
    /// Renders the selected property of `message` to a string, the same way
    /// the hash-based policy folds each property into its digest input.
    pub fn render(self, message: &Message) -> String {
        match self {
            MessageProperty::Id => message.id.to_string(),
            MessageProperty::Content => message.content.to_string(),
            MessageProperty::Recipients => format!("{:?}", message.recipients),
            MessageProperty::Sender => message.sender.clone(),
            MessageProperty::Priority => (message.priority as u8).to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serialize_round_trip() {
        let m = Message::new(42, "alice", json!({"data": "hi"}), Priority::High)
            .with_recipients(vec!["bob".into()])
            .with_topic("general");
        let s = m.serialize().unwrap();
        let back = Message::deserialize(&s).unwrap();
        assert_eq!(m, back);
        assert_eq!(back.topic.as_deref(), Some("general"));
    }

    #[test]
    fn thread_id_defaults_to_id() {
        let m = Message::new(7, "alice", Value::Null, Priority::Normal);
        assert_eq!(m.thread_id, 7);
    }

    #[test]
    fn equality_ignores_thread_fields() {
        let a = Message::new(1, "a", json!(1), Priority::Normal).with_topic("x");
        let b = Message::new(1, "a", json!(1), Priority::Normal).with_topic("y");
        assert_eq!(a, b);
    }

    #[test]
    fn ordering_is_by_id() {
        let a = Message::new(1, "a", Value::Null, Priority::Normal);
        let b = Message::new(2, "a", Value::Null, Priority::Normal);
        assert!(a < b);
    }
}
