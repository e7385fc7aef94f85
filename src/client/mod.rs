//! Concrete client styles the bus can notify. The bus itself only ever
//! calls `client_id()` and `notify_new_message()`; how a client turns that
//! poke into consumption (condition variable, callback, or a blocking-pool
//! wrapper) is its own business, not the bus's.

mod async_client;
mod callback_client;
mod sync_client;

pub use async_client::AsyncClient;
pub use callback_client::CallbackClient;
pub use sync_client::SyncClient;

use std::sync::Arc;

use serde_json::Value;

use crate::bus::MessageBus;
use crate::errors::Result;
use crate::id::{MessageId, Priority};
use crate::message::Message;

/// The interface the bus consumes. `notify_new_message` may be invoked
/// synchronously from within the sending caller's call to `send`; it must
/// be non-blocking and must not call back into `send` on the same bus
/// (the bus makes no reentrancy guarantee).
pub trait Client: Send + Sync {
    fn client_id(&self) -> &str;

    fn bus(&self) -> &Arc<MessageBus>;

    fn notify_new_message(&self);

    /// Fetches this client's next unread message, advancing its
    /// `last_read_id` cursor on success.
    fn get_next_unread_message(&self) -> Result<Option<Message>>;

    /// Sends through the bus this client is registered with. `content`
    /// must be a JSON object.
    fn send(&self, content: Value, recipients: Vec<String>, priority: Priority) -> Result<Message> {
        self.bus().send(self.client_id(), content, recipients, priority)
    }

    /// Removes a message this client previously sent from the given
    /// recipients' inboxes (or from every registered client's inbox, if
    /// `recipient_ids == ["*"]`).
    fn remove_sent_message(&self, recipient_ids: Vec<String>, message_id: MessageId) -> Result<()> {
        self.bus().remove_received_message(self.client_id(), &recipient_ids, message_id)
    }
}
