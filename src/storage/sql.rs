use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};

use super::{Result, StorageBackend};
use crate::id::{MessageId, Priority};
use crate::message::Message;

/// A relational backend over a single `message` table, keyed by
/// `(bus_id, recipient_id, id)`. Unlike the pop-on-read backends, reads are
/// cursor-style: the stored rows are untouched and `next_unread` selects
/// `WHERE id > ?  ORDER BY id LIMIT 1`.
///
/// SQLite has no unsigned 64-bit column type, so `id` is stored order-
/// preservingly as an `i64`: the top bit is flipped (`id ^ 0x8000...`)
/// before storage and flipped back on read. Flipping the top bit is the
/// standard unsigned-to-signed remapping that keeps `<`/`>`/`ORDER BY`
/// over the signed column agreeing with unsigned order over `id` — a
/// plain `as i64` cast would instead make every id with the top bit set
/// (priority >= Normal, since priority occupies the top 3 bits) compare
/// as negative and sort before smaller, higher-priority ids.
pub struct SqlStorage {
    conn: Mutex<Connection>,
}

fn encode_id(id: MessageId) -> i64 {
    (id ^ 0x8000_0000_0000_0000) as i64
}

fn decode_id(stored: i64) -> MessageId {
    (stored as u64) ^ 0x8000_0000_0000_0000
}

impl SqlStorage {
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn init(conn: &Connection) -> Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS message (
                id INTEGER NOT NULL,
                bus_id TEXT NOT NULL,
                recipient_id TEXT NOT NULL,
                sender_id TEXT NOT NULL,
                content TEXT NOT NULL,
                priority INTEGER NOT NULL,
                PRIMARY KEY (bus_id, recipient_id, id)
            )",
            [],
        )?;
        Ok(())
    }
}

impl StorageBackend for SqlStorage {
    fn create_inbox(&self, _bus_id: &str, _client_id: &str) -> Result<()> {
        // Rows carry their own (bus_id, recipient_id); no explicit inbox
        // object to materialize.
        Ok(())
    }

    fn remove_inbox(&self, bus_id: &str, client_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM message WHERE bus_id = ?1 AND recipient_id = ?2",
            params![bus_id, client_id],
        )?;
        Ok(())
    }

    fn add_to_inbox(&self, bus_id: &str, recipient_id: &str, message: &Message) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO message (id, bus_id, recipient_id, sender_id, content, priority)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                encode_id(message.id),
                bus_id,
                recipient_id,
                message.sender,
                message.content.to_string(),
                message.priority as u8,
            ],
        )?;
        Ok(())
    }

    fn next_unread(&self, bus_id: &str, recipient_id: &str, last_read_id: MessageId) -> Result<Option<Message>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT id, sender_id, content, priority FROM message
                 WHERE bus_id = ?1 AND recipient_id = ?2 AND id > ?3
                 ORDER BY id LIMIT 1",
                params![bus_id, recipient_id, encode_id(last_read_id)],
                |row| {
                    let id: i64 = row.get(0)?;
                    let sender: String = row.get(1)?;
                    let content: String = row.get(2)?;
                    let priority: u8 = row.get(3)?;
                    Ok((decode_id(id), sender, content, priority))
                },
            )
            .optional()?;

        Ok(row.map(|(id, sender, content, priority)| {
            let content = serde_json::from_str(&content).unwrap_or(serde_json::Value::Null);
            let priority = Priority::from_value(priority).unwrap_or_default();
            Message::new(id, sender, content, priority)
        }))
    }

    fn remove_received(
        &self,
        bus_id: &str,
        sender_id: &str,
        recipient_ids: &[String],
        message_id: MessageId,
    ) -> Result<()> {
        if recipient_ids.is_empty() {
            return Ok(());
        }

        let conn = self.conn.lock().unwrap();
        let placeholders = recipient_ids.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
        let sql = format!(
            "DELETE FROM message WHERE bus_id = ? AND sender_id = ? AND id = ? AND recipient_id IN ({placeholders})"
        );
        let mut stmt = conn.prepare(&sql)?;
        let encoded_id = encode_id(message_id);
        let mut bound: Vec<&dyn rusqlite::ToSql> = vec![&bus_id, &sender_id, &encoded_id];
        for recipient_id in recipient_ids {
            bound.push(recipient_id);
        }
        stmt.execute(bound.as_slice())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::contract;

    #[test]
    fn satisfies_shared_contract() {
        let backend = SqlStorage::open_in_memory().unwrap();
        contract::exercise(&backend, "bus-1");
    }

    #[test]
    fn cursor_reads_do_not_mutate_storage() {
        let backend = SqlStorage::open_in_memory().unwrap();
        let m = Message::new(1, "bob", serde_json::json!("hi"), Priority::Normal);
        backend.add_to_inbox("bus-1", "alice", &m).unwrap();

        let first = backend.next_unread("bus-1", "alice", 0).unwrap().unwrap();
        assert_eq!(first.id, 1);
        // Reading again with the same cursor returns the same row: the
        // cursor dialect does not consume it.
        let again = backend.next_unread("bus-1", "alice", 0).unwrap().unwrap();
        assert_eq!(again.id, 1);
    }

    #[test]
    fn real_ids_with_the_top_bit_set_still_order_and_cursor_correctly() {
        use crate::id::pack;

        let backend = SqlStorage::open_in_memory().unwrap();
        // Normal (value 4, 0b100) sets the top bit of a real packed id,
        // which would turn it negative under a plain `as i64` cast.
        let normal = pack(Priority::Normal, 1_700_000_000_100, 1, 0);
        let urgent = pack(Priority::Urgent, 1_700_000_000_200, 1, 0);

        backend
            .add_to_inbox("bus-1", "alice", &Message::new(normal, "bob", serde_json::json!("n"), Priority::Normal))
            .unwrap();
        backend
            .add_to_inbox("bus-1", "alice", &Message::new(urgent, "bob", serde_json::json!("u"), Priority::Urgent))
            .unwrap();

        let first = backend.next_unread("bus-1", "alice", 0).unwrap().unwrap();
        assert_eq!(first.id, urgent, "urgent (lower id) must sort before normal despite the top bit being set");

        let second = backend.next_unread("bus-1", "alice", first.id).unwrap().unwrap();
        assert_eq!(second.id, normal);

        assert!(backend.next_unread("bus-1", "alice", second.id).unwrap().is_none());
    }

    #[test]
    fn remove_received_with_wildcard_and_no_registered_clients_is_a_no_op() {
        let backend = SqlStorage::open_in_memory().unwrap();
        backend.remove_received("bus-1", "bob", &[], 1).unwrap();
    }
}
