//! Storage backends: per-(bus, client) inboxes, keyed first by `bus_id` so a
//! single physical store can host multiple logical buses.
//!
//! `next_unread` reconciles two dialects that the backends naturally fall
//! into (see spec §4.3):
//!
//! - *pop-on-read* (`memory`, `file`, `sorted_set`): the minimum-id entry is
//!   removed from the inbox; if its id equals `last_read_id` it is discarded
//!   and the next minimum is tried, repeating until a non-matching message
//!   or an empty inbox.
//! - *cursor* (`sql`): the stored set is untouched; the smallest id strictly
//!   greater than `last_read_id` is returned.
//!
//! Both must present the same observable sequence to a caller that only
//! ever threads `last_read_id` through successive calls: strictly
//! increasing ids, no repeats, nothing skipped that was present when the
//! call began.

pub mod file;
pub mod memory;
pub mod sorted_set;
pub mod sql;

use crate::errors::StorageError;
use crate::id::MessageId;
use crate::message::Message;

pub type Result<T> = std::result::Result<T, StorageError>;

pub trait StorageBackend: Send + Sync {
    /// Idempotent. Backends that auto-materialize inboxes on first write may
    /// no-op.
    fn create_inbox(&self, bus_id: &str, client_id: &str) -> Result<()>;

    /// Deletes all messages for (bus, client). Idempotent on an absent inbox.
    fn remove_inbox(&self, bus_id: &str, client_id: &str) -> Result<()>;

    /// Inserts `message` into the recipient's ordered inbox.
    fn add_to_inbox(&self, bus_id: &str, recipient_id: &str, message: &Message) -> Result<()>;

    /// Returns the inbox's next message after `last_read_id`, per the
    /// pop-on-read/cursor reconciliation documented above.
    fn next_unread(&self, bus_id: &str, recipient_id: &str, last_read_id: MessageId) -> Result<Option<Message>>;

    /// Deletes any message with `(sender = sender_id, id = message_id)` from
    /// each of `recipient_ids`. Silent if absent.
    fn remove_received(
        &self,
        bus_id: &str,
        sender_id: &str,
        recipient_ids: &[String],
        message_id: MessageId,
    ) -> Result<()>;
}
