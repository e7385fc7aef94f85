use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Mutex;

use dashmap::DashMap;

use super::{Result, StorageBackend};
use crate::id::MessageId;
use crate::message::Message;

/// A mapping (bus_id, client_id) -> ordered inbox, kept as a min-heap over
/// `Reverse<Message>` (Message orders ascending by id; `BinaryHeap` is a
/// max-heap, so wrapping in `Reverse` pops the smallest id first).
#[derive(Default)]
pub struct InMemoryStorage {
    inboxes: DashMap<(String, String), Mutex<BinaryHeap<Reverse<Message>>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(bus_id: &str, client_id: &str) -> (String, String) {
        (bus_id.to_string(), client_id.to_string())
    }
}

impl StorageBackend for InMemoryStorage {
    fn create_inbox(&self, bus_id: &str, client_id: &str) -> Result<()> {
        self.inboxes
            .entry(Self::key(bus_id, client_id))
            .or_insert_with(|| Mutex::new(BinaryHeap::new()));
        Ok(())
    }

    fn remove_inbox(&self, bus_id: &str, client_id: &str) -> Result<()> {
        self.inboxes.remove(&Self::key(bus_id, client_id));
        Ok(())
    }

    fn add_to_inbox(&self, bus_id: &str, recipient_id: &str, message: &Message) -> Result<()> {
        let entry = self
            .inboxes
            .entry(Self::key(bus_id, recipient_id))
            .or_insert_with(|| Mutex::new(BinaryHeap::new()));
        entry.lock().unwrap().push(Reverse(message.clone()));
        Ok(())
    }

    fn next_unread(&self, bus_id: &str, recipient_id: &str, last_read_id: MessageId) -> Result<Option<Message>> {
        let Some(entry) = self.inboxes.get(&Self::key(bus_id, recipient_id)) else {
            return Ok(None);
        };
        let mut heap = entry.lock().unwrap();
        loop {
            match heap.pop() {
                None => return Ok(None),
                Some(Reverse(message)) if message.id == last_read_id => continue,
                Some(Reverse(message)) => return Ok(Some(message)),
            }
        }
    }

    fn remove_received(
        &self,
        bus_id: &str,
        sender_id: &str,
        recipient_ids: &[String],
        message_id: MessageId,
    ) -> Result<()> {
        for recipient_id in recipient_ids {
            if let Some(entry) = self.inboxes.get(&Self::key(bus_id, recipient_id)) {
                let mut heap = entry.lock().unwrap();
                let retained: BinaryHeap<Reverse<Message>> = heap
                    .drain()
                    .filter(|Reverse(m)| !(m.sender == sender_id && m.id == message_id))
                    .collect();
                *heap = retained;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::contract;

    #[test]
    fn satisfies_shared_contract() {
        let backend = InMemoryStorage::new();
        contract::exercise(&backend, "bus-1");
    }

    #[test]
    fn two_buses_do_not_share_an_inbox() {
        let backend = InMemoryStorage::new();
        backend.create_inbox("bus-a", "alice").unwrap();
        backend.create_inbox("bus-b", "alice").unwrap();
        let m = Message::new(1, "bob", serde_json::json!("hi"), crate::id::Priority::Normal);
        backend.add_to_inbox("bus-a", "alice", &m).unwrap();
        assert!(backend.next_unread("bus-b", "alice", 0).unwrap().is_none());
        assert!(backend.next_unread("bus-a", "alice", 0).unwrap().is_some());
    }
}
