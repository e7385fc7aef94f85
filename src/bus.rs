use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::client::Client;
use crate::errors::{BusError, Result};
use crate::id::{IdGenerator, MessageId, Priority};
use crate::message::Message;
use crate::routing::{Broadcast, RoutingPolicy};
use crate::storage::memory::InMemoryStorage;
use crate::storage::StorageBackend;

/// Construction parameters for a `MessageBus`. Fields left unset fall back
/// to the same defaults the bus used historically: a random bus id, an
/// in-memory storage backend, and broadcast routing.
pub struct BusConfig {
    pub bus_id: Option<String>,
    pub machine_id: u8,
    pub storage: Arc<dyn StorageBackend>,
    pub routing_policy: Arc<dyn RoutingPolicy>,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            bus_id: None,
            machine_id: 1,
            storage: Arc::new(InMemoryStorage::new()),
            routing_policy: Arc::new(Broadcast),
        }
    }
}

/// Client registry, id generation, recipient resolution, persistence
/// fan-out, and notification fan-out for one logical bus. `bus_id` exists
/// so one physical storage backend can host many buses.
pub struct MessageBus {
    bus_id: String,
    id_generator: IdGenerator,
    storage: Arc<dyn StorageBackend>,
    routing_policy: RwLock<Arc<dyn RoutingPolicy>>,
    clients: DashMap<String, Arc<dyn Client>>,
}

impl MessageBus {
    pub fn new(config: BusConfig) -> Self {
        let bus_id = config.bus_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        Self {
            bus_id,
            id_generator: IdGenerator::new(config.machine_id),
            storage: config.storage,
            routing_policy: RwLock::new(config.routing_policy),
            clients: DashMap::new(),
        }
    }

    pub fn bus_id(&self) -> &str {
        &self.bus_id
    }

    pub fn set_routing_policy(&self, policy: Arc<dyn RoutingPolicy>) {
        *self.routing_policy.write().unwrap() = policy;
    }

    /// Registers `client`, overwriting any prior registration under the
    /// same id (the previous handle stops receiving notifications).
    pub fn register(&self, client: Arc<dyn Client>) -> Result<()> {
        let client_id = client.client_id().to_string();
        self.clients.insert(client_id.clone(), client);
        self.storage.create_inbox(&self.bus_id, &client_id)?;
        Ok(())
    }

    /// Removes `client_id` from the registry and destroys its inbox.
    /// Messages not yet consumed are discarded.
    pub fn unregister(&self, client_id: &str) -> Result<()> {
        self.clients.remove(client_id);
        self.storage.remove_inbox(&self.bus_id, client_id)?;
        Ok(())
    }

    pub fn is_registered(&self, client_id: &str) -> bool {
        self.clients.contains_key(client_id)
    }

    pub fn generate_message_id(&self, priority: Priority) -> Result<MessageId> {
        self.id_generator.next_id(priority)
    }

    /// Builds and sends a message from `sender_id`.
    ///
    /// `content` must be a JSON object. If `recipients` is non-empty it is
    /// used verbatim (and every id in it must already be registered);
    /// otherwise the active routing policy chooses recipients. Persistence
    /// fans out to every recipient before any notification fires; a
    /// recipient unregistered between persistence and notification is
    /// silently skipped.
    pub fn send(
        &self,
        sender_id: &str,
        content: Value,
        recipients: Vec<String>,
        priority: Priority,
    ) -> Result<Message> {
        if !content.is_object() {
            return Err(BusError::InvalidArgument(
                "message content must be a JSON object".to_string(),
            ));
        }

        let id = self.generate_message_id(priority)?;
        let message = Message::new(id, sender_id, content, priority).with_recipients(recipients);
        self.send_message(message.clone())?;
        Ok(message)
    }

    /// Lower-level send for a fully-constructed `Message` (its id must
    /// already have been assigned via `generate_message_id`).
    pub fn send_message(&self, message: Message) -> Result<()> {
        if !message.recipients.is_empty() {
            let unknown: Vec<String> = message
                .recipients
                .iter()
                .filter(|id| !self.clients.contains_key(id.as_str()))
                .cloned()
                .collect();
            if !unknown.is_empty() {
                return Err(BusError::UnknownRecipient(unknown));
            }
        }

        let recipients = if message.recipients.is_empty() {
            let registered: Vec<String> = self.clients.iter().map(|e| e.key().clone()).collect();
            self.routing_policy.read().unwrap().recipients_for(&message, &registered)
        } else {
            message.recipients.clone()
        };

        // A policy (e.g. DirectOrFallback) may name a recipient of its own
        // choosing that was never in `registered_clients`; that must fail
        // the same way an explicit unknown recipient does, with no writes.
        let unknown: Vec<String> = recipients
            .iter()
            .filter(|id| !self.clients.contains_key(id.as_str()))
            .cloned()
            .collect();
        if !unknown.is_empty() {
            return Err(BusError::UnknownRecipient(unknown));
        }

        for recipient_id in &recipients {
            self.storage.add_to_inbox(&self.bus_id, recipient_id, &message)?;
        }
        debug!(message_id = message.id, recipients = recipients.len(), "message persisted");

        for recipient_id in &recipients {
            if let Some(client) = self.clients.get(recipient_id) {
                client.notify_new_message();
            } else {
                warn!(%recipient_id, "recipient unregistered between persistence and notification");
            }
        }

        Ok(())
    }

    pub fn next_unread(&self, client_id: &str, last_read_id: MessageId) -> Result<Option<Message>> {
        Ok(self.storage.next_unread(&self.bus_id, client_id, last_read_id)?)
    }

    /// Deletes a previously-sent message from the given recipients'
    /// inboxes. `recipient_ids == ["*"]` expands to every currently
    /// registered client.
    pub fn remove_received_message(
        &self,
        sender_id: &str,
        recipient_ids: &[String],
        message_id: MessageId,
    ) -> Result<()> {
        if recipient_ids.is_empty() {
            return Err(BusError::InvalidArgument("recipient_ids must not be empty".to_string()));
        }

        let expanded: Vec<String>;
        let recipient_ids = if recipient_ids == ["*"] {
            expanded = self.clients.iter().map(|e| e.key().clone()).collect();
            &expanded
        } else {
            recipient_ids
        };

        Ok(self
            .storage
            .remove_received(&self.bus_id, sender_id, recipient_ids, message_id)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::SyncClient;
    use serde_json::json;

    fn bus() -> Arc<MessageBus> {
        Arc::new(MessageBus::new(BusConfig::default()))
    }

    #[test]
    fn s1_broadcast_reaches_everyone_but_sender() {
        let bus = bus();
        let a = SyncClient::new("a", bus.clone());
        let b = SyncClient::new("b", bus.clone());
        let c = SyncClient::new("c", bus.clone());

        a.send(json!({"data": "hi"}), vec![], Priority::Normal).unwrap();

        assert!(a.get_next_unread_message().unwrap().is_none());
        let b_msg = b.get_next_unread_message().unwrap().unwrap();
        let c_msg = c.get_next_unread_message().unwrap().unwrap();
        assert_eq!(b_msg.id, c_msg.id);
        assert_eq!(b_msg.sender, "a");
    }

    #[test]
    fn s2_priority_ordering() {
        let bus = bus();
        let sender = SyncClient::new("sender", bus.clone());
        let recipient = SyncClient::new("recipient", bus.clone());
        bus.set_routing_policy(Arc::new(crate::routing::DirectOrFallback::new("recipient")));

        sender.send(json!({"which": "low"}), vec![], Priority::Low).unwrap();
        sender.send(json!({"which": "high"}), vec![], Priority::High).unwrap();
        sender.send(json!({"which": "normal"}), vec![], Priority::Normal).unwrap();

        let order: Vec<String> = (0..3)
            .map(|_| {
                recipient
                    .get_next_unread_message()
                    .unwrap()
                    .unwrap()
                    .content
                    .get("which")
                    .unwrap()
                    .as_str()
                    .unwrap()
                    .to_string()
            })
            .collect();
        assert_eq!(order, vec!["high", "normal", "low"]);
    }

    #[test]
    fn s3_remove_after_receive() {
        let bus = bus();
        let a = SyncClient::new("a", bus.clone());
        let b = SyncClient::new("b", bus.clone());
        let c = SyncClient::new("c", bus.clone());

        let sent = a
            .send(json!({"data": "hi"}), vec!["b".into(), "c".into()], Priority::Normal)
            .unwrap();
        a.remove_sent_message(vec!["b".into()], sent.id).unwrap();

        assert!(b.get_next_unread_message().unwrap().is_none());
        assert!(c.get_next_unread_message().unwrap().is_some());
    }

    #[test]
    fn non_object_content_is_rejected() {
        let bus = bus();
        let a = SyncClient::new("a", bus.clone());
        assert!(matches!(
            a.send(Value::Null, vec![], Priority::Normal),
            Err(BusError::InvalidArgument(_))
        ));
        assert!(matches!(
            a.send(json!("just a string"), vec![], Priority::Normal),
            Err(BusError::InvalidArgument(_))
        ));
    }

    #[test]
    fn s4_unknown_recipient_is_rejected_without_partial_writes() {
        let bus = bus();
        let a = SyncClient::new("a", bus.clone());
        let result = a.send(json!({"data": "hi"}), vec!["ghost".into()], Priority::Normal);
        assert!(matches!(result, Err(BusError::UnknownRecipient(_))));
    }

    #[test]
    fn policy_resolved_unknown_recipient_is_also_rejected() {
        let bus = bus();
        bus.set_routing_policy(Arc::new(crate::routing::DirectOrFallback::new("ghost")));
        let a = SyncClient::new("a", bus.clone());
        let result = a.send(json!({"data": "hi"}), vec![], Priority::Normal);
        assert!(matches!(result, Err(BusError::UnknownRecipient(_))));
    }

    #[test]
    fn s5_hash_routing_is_consistent_for_identical_content() {
        let bus = bus();
        bus.set_routing_policy(Arc::new(crate::routing::HashBased::new(vec![
            crate::message::MessageProperty::Content,
        ])));
        let a = SyncClient::new("a", bus.clone());
        let _b = SyncClient::new("b", bus.clone());
        let _c = SyncClient::new("c", bus.clone());

        a.send(json!({"k": "v"}), vec![], Priority::Normal).unwrap();
        a.send(json!({"k": "v"}), vec![], Priority::Normal).unwrap();

        let recipients: Vec<&str> = ["a", "b", "c"].iter().copied().collect();
        let delivered: Vec<&str> = recipients
            .iter()
            .filter(|id| bus.next_unread(id, 0).unwrap().is_some())
            .copied()
            .collect();
        assert_eq!(delivered.len(), 1, "hash routing sends to exactly one recipient");
    }

    #[test]
    fn unregister_discards_the_inbox() {
        let bus = bus();
        let a = SyncClient::new("a", bus.clone());
        {
            let b = SyncClient::new("b", bus.clone());
            a.send(json!({"data": "hi"}), vec!["b".into()], Priority::Normal).unwrap();
            bus.unregister(b.client_id()).unwrap();
        }
        assert!(bus.next_unread("b", 0).unwrap().is_none());
        assert!(!bus.is_registered("b"));
    }
}
