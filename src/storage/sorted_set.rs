use super::{Result, StorageBackend};
use crate::id::MessageId;
use crate::message::Message;

/// A sorted-set backend built on `sled`, an embedded ordered key-value
/// store. Each (bus, client) gets its own `sled::Tree`; keys are
/// `message_id.to_be_bytes()` followed by an 8-byte sled-generated sequence
/// number so big-endian byte order (which sled trees are naturally sorted
/// by) matches numeric id order, with ties broken by insertion order rather
/// than colliding. This reproduces the member/score shape of a Redis sorted
/// set (`ZADD`/`ZRANGE 0..0`/`ZREM`) without an external server.
pub struct SortedSetStorage {
    db: sled::Db,
}

impl SortedSetStorage {
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        Ok(Self { db: sled::open(path)? })
    }

    #[cfg(test)]
    pub fn temporary() -> Result<Self> {
        Ok(Self {
            db: sled::Config::new().temporary(true).open()?,
        })
    }

    fn tree_name(bus_id: &str, client_id: &str) -> String {
        format!("inbox:{bus_id}:{client_id}")
    }

    fn key_for(id: MessageId, seq: u64) -> [u8; 16] {
        let mut key = [0u8; 16];
        key[..8].copy_from_slice(&id.to_be_bytes());
        key[8..].copy_from_slice(&seq.to_be_bytes());
        key
    }
}

impl StorageBackend for SortedSetStorage {
    fn create_inbox(&self, bus_id: &str, client_id: &str) -> Result<()> {
        // Trees auto-materialize on first write; opening one is enough to
        // make it visible, matching the spec's "MAY no-op" allowance.
        self.db.open_tree(Self::tree_name(bus_id, client_id))?;
        Ok(())
    }

    fn remove_inbox(&self, bus_id: &str, client_id: &str) -> Result<()> {
        self.db.drop_tree(Self::tree_name(bus_id, client_id))?;
        Ok(())
    }

    fn add_to_inbox(&self, bus_id: &str, recipient_id: &str, message: &Message) -> Result<()> {
        let tree = self.db.open_tree(Self::tree_name(bus_id, recipient_id))?;
        let seq = self.db.generate_id()?;
        let key = Self::key_for(message.id, seq);
        tree.insert(key, message.serialize()?.into_bytes())?;
        Ok(())
    }

    fn next_unread(&self, bus_id: &str, recipient_id: &str, last_read_id: MessageId) -> Result<Option<Message>> {
        let tree = self.db.open_tree(Self::tree_name(bus_id, recipient_id))?;
        loop {
            match tree.pop_min()? {
                None => return Ok(None),
                Some((_, value)) => {
                    let message = Message::deserialize(std::str::from_utf8(&value).unwrap_or_default())?;
                    if message.id == last_read_id {
                        continue;
                    }
                    return Ok(Some(message));
                }
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
            let tree = self.db.open_tree(Self::tree_name(bus_id, recipient_id))?;
            let mut to_remove = Vec::new();
            for entry in tree.iter() {
                let (key, value) = entry?;
                let message = Message::deserialize(std::str::from_utf8(&value).unwrap_or_default())?;
                if message.sender == sender_id && message.id == message_id {
                    to_remove.push(key);
                }
            }
            for key in to_remove {
                tree.remove(key)?;
            }
        }
        Ok(())
    }
}
