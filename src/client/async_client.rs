use std::sync::{Arc, Mutex};

use super::Client;
use crate::bus::MessageBus;
use crate::errors::{BusError, Result};
use crate::id::MessageId;
use crate::message::Message;

/// An async-flavored client. The bus itself has no async surface (every
/// storage backend call is blocking, per the bus's concurrency model), so
/// this is a thin `tokio::task::spawn_blocking` wrapper around the same
/// synchronous call the other clients make directly — a workaround for
/// call sites that are already inside an async runtime, not a concurrency
/// contract the bus makes. `notify_new_message` intentionally does nothing:
/// consumers of this client are expected to poll
/// `next_unread_message` themselves rather than react to pokes.
pub struct AsyncClient {
    client_id: String,
    bus: Arc<MessageBus>,
    last_read_id: Mutex<MessageId>,
}

impl AsyncClient {
    pub fn new(client_id: impl Into<String>, bus: Arc<MessageBus>) -> Arc<Self> {
        let client = Arc::new(Self {
            client_id: client_id.into(),
            bus: bus.clone(),
            last_read_id: Mutex::new(0),
        });
        bus.register(client.clone() as Arc<dyn Client>).expect("register never fails for in-process clients");
        client
    }

    /// Runs the blocking `get_next_unread_message` call on the tokio
    /// blocking thread pool.
    pub async fn next_unread_message(self: &Arc<Self>) -> Result<Option<Message>> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.get_next_unread_message())
            .await
            .map_err(|e| BusError::InvalidArgument(format!("blocking task panicked: {e}")))?
    }
}

impl Client for AsyncClient {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    fn notify_new_message(&self) {
        // See module doc: async consumers poll instead of reacting to pokes.
    }

    fn get_next_unread_message(&self) -> Result<Option<Message>> {
        let mut last_read_id = self.last_read_id.lock().unwrap();
        let message = self.bus.next_unread(&self.client_id, *last_read_id)?;
        if let Some(message) = &message {
            *last_read_id = message.id;
        }
        Ok(message)
    }
}

impl Drop for AsyncClient {
    fn drop(&mut self) {
        let _ = self.bus.unregister(&self.client_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BusConfig;
    use crate::id::Priority;
    use serde_json::json;

    #[tokio::test]
    async fn next_unread_message_runs_on_blocking_pool() {
        let bus = Arc::new(MessageBus::new(BusConfig::default()));
        let a = AsyncClient::new("a", bus.clone());
        let b = AsyncClient::new("b", bus.clone());

        a.send(json!({"data": "hi"}), vec!["b".into()], Priority::Normal).unwrap();

        let message = b.next_unread_message().await.unwrap().unwrap();
        assert_eq!(message.sender, "a");
    }
}
