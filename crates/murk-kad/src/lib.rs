#![forbid(unsafe_code)]

//! Kademlia distributed hash table for murk.
//!
//! 160-bit XOR-metric node ids, k-buckets with replacement queues, a
//! replicated key-value store with lazy TTL eviction, and an HTTP
//! wire protocol (JSON bodies, hex-encoded ids and keys).

pub mod bucket;
pub mod client;
pub mod node;
pub mod routing;
pub mod service;
pub mod storage;
pub mod wire;

mod api;

pub use client::DhtClient;
pub use node::{Node, NodeId};
pub use service::{DhtNode, Lookup};
pub use storage::{KvStorage, MemoryStorage, SqliteStorage, StorageError};

/// Default bucket capacity and replication factor.
pub const DEFAULT_KSIZE: usize = 20;

/// Default key-value entry lifetime: 7 days.
pub const DEFAULT_TTL_SECS: u64 = 7 * 24 * 3600;

/// Build the axum router serving the DHT wire protocol.
pub use api::router;
