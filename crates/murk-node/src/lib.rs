#![forbid(unsafe_code)]

//! The murk messenger node.
//!
//! Ties the envelope cryptography and the DHT together with the
//! store-and-forward overlay: deduplication by signature, randomized
//! TTL/fanout forwarding, and delayed-delivery queues for offline
//! recipients.

pub mod api;
pub mod config;
pub mod db;
pub mod messenger;
pub mod overlay;
pub mod server;

pub use config::NodeConfig;
pub use db::{Contact, ForwardRecord, MessengerDb, StoredMessage};
pub use messenger::{ContactCard, Messenger};
pub use overlay::NodeState;
pub use server::NodeServer;
