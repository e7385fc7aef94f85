use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use tracing::error;

use super::Client;
use crate::bus::MessageBus;
use crate::errors::Result;
use crate::id::MessageId;
use crate::message::Message;

/// A client that drives a user callback from `notify_new_message`. One
/// misbehaving callback must not poison the bus: a panic inside the
/// callback is caught and logged, never propagated to the sender.
pub struct CallbackClient {
    client_id: String,
    bus: Arc<MessageBus>,
    last_read_id: Mutex<MessageId>,
    callback: Box<dyn Fn(Message) + Send + Sync>,
}

impl CallbackClient {
    pub fn new(
        client_id: impl Into<String>,
        bus: Arc<MessageBus>,
        callback: impl Fn(Message) + Send + Sync + 'static,
    ) -> Arc<Self> {
        let client = Arc::new(Self {
            client_id: client_id.into(),
            bus: bus.clone(),
            last_read_id: Mutex::new(0),
            callback: Box::new(callback),
        });
        bus.register(client.clone() as Arc<dyn Client>).expect("register never fails for in-process clients");
        client
    }

    fn handle_message(&self, message: Message) {
        let callback = &self.callback;
        if std::panic::catch_unwind(AssertUnwindSafe(|| callback(message))).is_err() {
            error!(client_id = %self.client_id, "message callback panicked; suppressing");
        }
    }

    /// Drains every currently-unread message through the callback.
    pub fn process_all_unread_messages(&self) -> Result<()> {
        while let Some(message) = self.get_next_unread_message()? {
            self.handle_message(message);
        }
        Ok(())
    }
}

impl Client for CallbackClient {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    fn notify_new_message(&self) {
        match self.get_next_unread_message() {
            Ok(Some(message)) => self.handle_message(message),
            Ok(None) => {}
            Err(e) => error!(client_id = %self.client_id, error = %e, "error fetching new message"),
        }
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

impl Drop for CallbackClient {
    fn drop(&mut self) {
        let _ = self.bus.unregister(&self.client_id);
    }
}
