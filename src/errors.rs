use thiserror::Error;

/// Errors surfaced by the id generator, the bus, and the storage backends.
///
/// The bus never logs-and-swallows one of these; every variant propagates to
/// the caller of `send`/`next_unread`/`remove_received_message`.
#[derive(Error, Debug)]
pub enum BusError {
    #[error("clock moved backwards")]
    ClockMovedBackwards,

    #[error("unknown recipient(s): {0:?}")]
    UnknownRecipient(Vec<String>),

    #[error("storage error: {0}")]
    StorageError(#[from] StorageError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Errors raised by a `StorageBackend` implementation.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("io error")]
    Io(#[from] std::io::Error),

    #[error("serialization error")]
    Serde(#[from] serde_json::Error),

    #[error("sled error")]
    Sled(#[from] sled::Error),

    #[error("sqlite error")]
    Sqlite(#[from] rusqlite::Error),

    #[error("no such inbox: bus={bus_id} client={client_id}")]
    NoSuchInbox { bus_id: String, client_id: String },
}

pub type Result<T> = std::result::Result<T, BusError>;
