use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::{Result, StorageBackend};
use crate::id::MessageId;
use crate::message::Message;

/// One JSON array file per (bus, client) under a configured root directory,
/// `<root>/<bus_id>/<client_id>.json`. The array holds the heap's raw
/// level-order vector, so load -> push/pop -> save round-trips the heap
/// structure, not just its sorted contents. Each mutating operation
/// rewrites the file whole; there is no cross-operation transaction, only
/// atomicity of a single rewrite.
pub struct FileStorage {
    root: PathBuf,
    // Guards against two operations on the same file racing each other
    // within this process; cross-process safety is not provided.
    write_lock: Mutex<()>,
}

impl FileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    fn inbox_path(&self, bus_id: &str, client_id: &str) -> PathBuf {
        self.root.join(bus_id).join(format!("{client_id}.json"))
    }

    fn load_heap(path: &Path) -> Result<BinaryHeap<Reverse<Message>>> {
        match fs::read_to_string(path) {
            Ok(contents) => {
                let messages: Vec<Message> = serde_json::from_str(&contents)?;
                Ok(messages.into_iter().map(Reverse).collect())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BinaryHeap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn save_heap(path: &Path, heap: &BinaryHeap<Reverse<Message>>) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let messages: Vec<&Message> = heap.iter().map(|Reverse(m)| m).collect();
        let contents = serde_json::to_string(&messages)?;
        fs::write(path, contents)?;
        Ok(())
    }
}

impl StorageBackend for FileStorage {
    fn create_inbox(&self, bus_id: &str, client_id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap();
        let path = self.inbox_path(bus_id, client_id);
        if !path.exists() {
            Self::save_heap(&path, &BinaryHeap::new())?;
        }
        Ok(())
    }

    fn remove_inbox(&self, bus_id: &str, client_id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap();
        match fs::remove_file(self.inbox_path(bus_id, client_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn add_to_inbox(&self, bus_id: &str, recipient_id: &str, message: &Message) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap();
        let path = self.inbox_path(bus_id, recipient_id);
        let mut heap = Self::load_heap(&path)?;
        heap.push(Reverse(message.clone()));
        Self::save_heap(&path, &heap)
    }

    fn next_unread(&self, bus_id: &str, recipient_id: &str, last_read_id: MessageId) -> Result<Option<Message>> {
        let _guard = self.write_lock.lock().unwrap();
        let path = self.inbox_path(bus_id, recipient_id);
        let mut heap = Self::load_heap(&path)?;

        loop {
            match heap.pop() {
                None => return Ok(None),
                Some(Reverse(message)) if message.id == last_read_id => continue,
                Some(Reverse(message)) => {
                    Self::save_heap(&path, &heap)?;
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
        let _guard = self.write_lock.lock().unwrap();
        for recipient_id in recipient_ids {
            let path = self.inbox_path(bus_id, recipient_id);
            let heap = Self::load_heap(&path)?;
            let retained: BinaryHeap<Reverse<Message>> = heap
                .into_iter()
                .filter(|Reverse(m)| !(m.sender == sender_id && m.id == message_id))
                .collect();
            Self::save_heap(&path, &retained)?;
        }
        Ok(())
    }
}
