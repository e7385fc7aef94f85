//! An in-process message bus: named clients publish structured messages to
//! explicit recipients or let a routing policy pick them, messages are
//! held in per-recipient inboxes backed by a pluggable storage engine, and
//! consumed in priority/time order via a 64-bit packed identifier.
//!
//! Network transports, process lifecycle, and CLI wiring are the caller's
//! concern; this crate only implements the bus itself.

pub mod bus;
pub mod client;
pub mod errors;
pub mod id;
pub mod message;
pub mod routing;
pub mod storage;

pub use bus::{BusConfig, MessageBus};
pub use client::{AsyncClient, CallbackClient, Client, SyncClient};
pub use errors::{BusError, Result};
pub use id::{IdGenerator, MessageId, Priority};
pub use message::{Message, MessageProperty};
pub use routing::{Broadcast, DirectOrFallback, HashBased, RoutingPolicy};
pub use storage::file::FileStorage;
pub use storage::memory::InMemoryStorage;
pub use storage::sorted_set::SortedSetStorage;
pub use storage::sql::SqlStorage;
pub use storage::StorageBackend;
