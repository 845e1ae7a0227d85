pub mod config;
pub mod connection;
pub mod error;
pub mod persistence;
pub mod receipts;
pub mod reconcile;
pub mod store;
pub mod transport;
pub mod typing;
pub mod ws;

pub use config::{load_settings, load_settings_from, SyncSettings};
pub use connection::ConnectionState;
pub use error::SyncError;
pub use persistence::{HttpPersistenceApi, MissingPersistenceApi, PersistenceApi};
pub use reconcile::{ConversationSnapshot, ConversationSync, SyncEvent};
pub use store::{MergeResult, MessageStore};
pub use transport::{MissingTransport, Transport, TransportError, TransportEvent};
pub use ws::WsTransport;
