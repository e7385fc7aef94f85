use sha2::{Digest, Sha256};

use crate::message::{Message, MessageProperty};

/// Chooses recipients for a message whose sender left `recipients` empty.
/// Implementations are pure: no I/O, no mutation, no observation of the bus
/// beyond their arguments.
pub trait RoutingPolicy: Send + Sync {
    /// `registered_clients` is the bus's registry keys in a stable order
    /// (the bus is responsible for handing over a deterministic snapshot).
    fn recipients_for(&self, message: &Message, registered_clients: &[String]) -> Vec<String>;
}

/// Sends to every registered client except the sender.
#[derive(Debug, Default, Clone, Copy)]
pub struct Broadcast;

impl RoutingPolicy for Broadcast {
    fn recipients_for(&self, message: &Message, registered_clients: &[String]) -> Vec<String> {
        registered_clients
            .iter()
            .filter(|id| id.as_str() != message.sender)
            .cloned()
            .collect()
    }
}

/// Uses `message.recipients` verbatim when non-empty; otherwise falls back
/// to a single fixed client id. The fallback id need not be registered when
/// this policy is constructed, but it must be registered by the time a
/// message actually routes through it, or `MessageBus::send` rejects the
/// send with `UnknownRecipient`.
#[derive(Debug, Clone)]
pub struct DirectOrFallback {
    pub fallback_id: String,
}

impl DirectOrFallback {
    pub fn new(fallback_id: impl Into<String>) -> Self {
        Self {
            fallback_id: fallback_id.into(),
        }
    }
}

impl RoutingPolicy for DirectOrFallback {
    fn recipients_for(&self, message: &Message, _registered_clients: &[String]) -> Vec<String> {
        if message.recipients.is_empty() {
            vec![self.fallback_id.clone()]
        } else {
            message.recipients.clone()
        }
    }
}

/// Deterministically shards a message to a single recipient: SHA-256 over
/// the concatenation of the selected message properties, folded into an
/// index modulo the registered client count.
///
/// This is a fixed sharding function, not a consistent-hash ring: adding or
/// removing a client reshuffles the mapping for every message.
#[derive(Debug, Clone)]
pub struct HashBased {
    properties: Vec<MessageProperty>,
}

impl HashBased {
    pub fn new(properties: Vec<MessageProperty>) -> Self {
        Self { properties }
    }
}

impl RoutingPolicy for HashBased {
    fn recipients_for(&self, message: &Message, registered_clients: &[String]) -> Vec<String> {
        if registered_clients.is_empty() {
            return Vec::new();
        }

        let mut hasher = Sha256::new();
        for prop in &self.properties {
            hasher.update(prop.render(message).as_bytes());
        }
        let digest = hasher.finalize();

        // Fold the 256-bit digest into an index mod N without materializing
        // a big integer: treat the digest as a base-256 number and reduce
        // byte by byte, which is equivalent to `int(hexdigest, 16) % n`.
        let n = registered_clients.len() as u64;
        let index = digest.iter().fold(0u64, |acc, &byte| (acc * 256 + byte as u64) % n);

        vec![registered_clients[index as usize].clone()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::Priority;
    use serde_json::json;

    fn msg(sender: &str) -> Message {
        Message::new(1, sender, json!({"data": "hi"}), Priority::Normal)
    }

    #[test]
    fn broadcast_excludes_sender() {
        let policy = Broadcast;
        let clients = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let recipients = policy.recipients_for(&msg("a"), &clients);
        assert_eq!(recipients, vec!["b", "c"]);
    }

    #[test]
    fn direct_or_fallback_prefers_explicit_recipients() {
        let policy = DirectOrFallback::new("fallback");
        let with_recipients = msg("a").with_recipients(vec!["x".into()]);
        assert_eq!(policy.recipients_for(&with_recipients, &[]), vec!["x"]);

        let without = msg("a");
        assert_eq!(policy.recipients_for(&without, &[]), vec!["fallback"]);
    }

    #[test]
    fn hash_based_is_deterministic() {
        let policy = HashBased::new(vec![MessageProperty::Content]);
        let clients = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let m1 = msg("a");
        let m2 = msg("b"); // same content, different sender
        assert_eq!(
            policy.recipients_for(&m1, &clients),
            policy.recipients_for(&m2, &clients)
        );
    }
}
