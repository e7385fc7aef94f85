use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use super::Client;
use crate::bus::MessageBus;
use crate::errors::Result;
use crate::id::MessageId;
use crate::message::Message;

/// A synchronous client that blocks on a condition variable until poked,
/// grounded on the condvar-style `Event`/`Lock` pairing of the original
/// thread-based client.
pub struct SyncClient {
    client_id: String,
    bus: Arc<MessageBus>,
    last_read_id: Mutex<MessageId>,
    new_message: (Mutex<bool>, Condvar),
}

impl SyncClient {
    pub fn new(client_id: impl Into<String>, bus: Arc<MessageBus>) -> Arc<Self> {
        let client = Arc::new(Self {
            client_id: client_id.into(),
            bus: bus.clone(),
            last_read_id: Mutex::new(0),
            new_message: (Mutex::new(false), Condvar::new()),
        });
        bus.register(client.clone() as Arc<dyn Client>).expect("register never fails for in-process clients");
        client
    }

    /// Blocks until a new message has been signalled (or `timeout`
    /// elapses), then clears the flag for the next wait.
    pub fn wait_for_new_message(&self, timeout: Option<Duration>) {
        let (lock, cvar) = &self.new_message;
        let mut flag = lock.lock().unwrap();
        if !*flag {
            match timeout {
                Some(timeout) => {
                    let _ = cvar.wait_timeout_while(flag, timeout, |f| !*f);
                    flag = self.new_message.0.lock().unwrap();
                }
                None => {
                    flag = cvar.wait_while(flag, |f| !*f).unwrap();
                }
            }
        }
        *flag = false;
    }
}

impl Client for SyncClient {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    fn notify_new_message(&self) {
        let (lock, cvar) = &self.new_message;
        *lock.lock().unwrap() = true;
        cvar.notify_all();
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

impl Drop for SyncClient {
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

    #[test]
    fn wait_for_new_message_wakes_on_notify() {
        let bus = Arc::new(MessageBus::new(BusConfig::default()));
        let a = SyncClient::new("a", bus.clone());
        let b = SyncClient::new("b", bus.clone());

        let b2 = b.clone();
        let handle = std::thread::spawn(move || {
            b2.wait_for_new_message(Some(Duration::from_secs(5)));
        });

        a.send(json!({"data": "hi"}), vec!["b".into()], Priority::Normal).unwrap();
        handle.join().unwrap();

        assert!(b.get_next_unread_message().unwrap().is_some());
    }
}
