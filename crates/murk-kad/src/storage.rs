//! Key-value and known-node storage behind the DHT.
//!
//! Entries carry a write timestamp and expire after a TTL (7 days by
//! default). Readers lazily evict before every read; writers do not.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::node::{Node, NodeId};
use crate::DEFAULT_TTL_SECS;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Current unix time as fractional seconds.
pub fn now_unix() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Storage contract consumed by the DHT node.
#[async_trait]
pub trait KvStorage: Send + Sync {
    /// Write `(key, value)` stamped with `now`, replacing any prior
    /// value.
    async fn set(&self, key: &[u8], value: &[u8], now: f64) -> Result<(), StorageError>;

    /// Read an unexpired value. Expired entries are culled first and
    /// are never visible.
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;

    /// All unexpired entries.
    async fn entries(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError>;

    /// Entries written more than `seconds_old` ago (regardless of
    /// TTL), for republish decisions.
    async fn entries_older_than(&self, seconds_old: f64)
        -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError>;

    /// Drop expired entries, returning how many were removed.
    async fn cull(&self) -> Result<usize, StorageError>;

    /// Remember a peer for restart bootstrapping.
    async fn store_node(&self, node: &Node) -> Result<(), StorageError>;

    /// Peers seen within `max_age` seconds (all remembered peers when
    /// `None`).
    async fn known_nodes(&self, max_age: Option<f64>) -> Result<Vec<Node>, StorageError>;

    /// Remove every entry and remembered peer.
    async fn clear(&self) -> Result<(), StorageError>;

    /// The TTL applied to entries, in seconds.
    fn ttl_secs(&self) -> u64;
}

/// Storage-boundary encoding of a value. The wire tolerates values
/// that were plain text; the flag records which form was stored so
/// reads reproduce the original bytes.
#[derive(Serialize, Deserialize)]
struct StoredValue {
    value: String,
    is_bytes: bool,
}

fn encode_value(value: &[u8]) -> Result<String, StorageError> {
    let stored = match std::str::from_utf8(value) {
        Ok(text) if !value.is_empty() && text.chars().all(|c| !c.is_control()) => {
            StoredValue { value: text.to_string(), is_bytes: false }
        }
        _ => StoredValue { value: hex::encode(value), is_bytes: true },
    };
    serde_json::to_string(&stored).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn decode_value(raw: &str) -> Result<Vec<u8>, StorageError> {
    let stored: StoredValue =
        serde_json::from_str(raw).map_err(|e| StorageError::Serialization(e.to_string()))?;
    if stored.is_bytes {
        hex::decode(&stored.value).map_err(|e| StorageError::Serialization(e.to_string()))
    } else {
        Ok(stored.value.into_bytes())
    }
}

// ============================================================================
// In-memory storage
// ============================================================================

/// Map-backed storage for tests and ephemeral nodes.
pub struct MemoryStorage {
    ttl_secs: u64,
    kv: Mutex<HashMap<Vec<u8>, (f64, Vec<u8>)>>,
    nodes: Mutex<HashMap<NodeId, (Node, f64)>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL_SECS)
    }

    pub fn with_ttl(ttl_secs: u64) -> Self {
        Self { ttl_secs, kv: Mutex::new(HashMap::new()), nodes: Mutex::new(HashMap::new()) }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStorage for MemoryStorage {
    async fn set(&self, key: &[u8], value: &[u8], now: f64) -> Result<(), StorageError> {
        self.kv.lock().await.insert(key.to_vec(), (now, value.to_vec()));
        Ok(())
    }

    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        self.cull().await?;
        Ok(self.kv.lock().await.get(key).map(|(_, v)| v.clone()))
    }

    async fn entries(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        self.cull().await?;
        Ok(self.kv.lock().await.iter().map(|(k, (_, v))| (k.clone(), v.clone())).collect())
    }

    async fn entries_older_than(
        &self,
        seconds_old: f64,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        let cutoff = now_unix() - seconds_old;
        Ok(self
            .kv
            .lock()
            .await
            .iter()
            .filter(|(_, (ts, _))| *ts < cutoff)
            .map(|(k, (_, v))| (k.clone(), v.clone()))
            .collect())
    }

    async fn cull(&self) -> Result<usize, StorageError> {
        let min_time = now_unix() - self.ttl_secs as f64;
        let mut kv = self.kv.lock().await;
        let before = kv.len();
        kv.retain(|_, (ts, _)| *ts >= min_time);
        Ok(before - kv.len())
    }

    async fn store_node(&self, node: &Node) -> Result<(), StorageError> {
        self.nodes.lock().await.insert(node.id, (node.clone(), now_unix()));
        Ok(())
    }

    async fn known_nodes(&self, max_age: Option<f64>) -> Result<Vec<Node>, StorageError> {
        let min_time = max_age.map(|age| now_unix() - age);
        Ok(self
            .nodes
            .lock()
            .await
            .values()
            .filter(|(_, seen)| min_time.map_or(true, |m| *seen >= m))
            .map(|(n, _)| n.clone())
            .collect())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.kv.lock().await.clear();
        self.nodes.lock().await.clear();
        Ok(())
    }

    fn ttl_secs(&self) -> u64 {
        self.ttl_secs
    }
}

// ============================================================================
// SQLite storage
// ============================================================================

/// Durable storage: `kv_store` for replicated values, `known_nodes`
/// for restart bootstrapping.
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
    ttl_secs: u64,
}

impl SqliteStorage {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        Self::open_with_ttl(path, DEFAULT_TTL_SECS)
    }

    pub fn open_with_ttl<P: AsRef<Path>>(path: P, ttl_secs: u64) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Self::init_schema(&conn)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)), ttl_secs })
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)), ttl_secs: DEFAULT_TTL_SECS })
    }

    fn init_schema(conn: &Connection) -> Result<(), StorageError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv_store (
                key BLOB PRIMARY KEY,
                value TEXT NOT NULL,
                timestamp REAL NOT NULL
            );

            CREATE TABLE IF NOT EXISTS known_nodes (
                node_id TEXT PRIMARY KEY,
                ip TEXT NOT NULL,
                port INTEGER NOT NULL,
                last_seen REAL NOT NULL
            );
            "#,
        )?;
        Ok(())
    }
}

#[async_trait]
impl KvStorage for SqliteStorage {
    async fn set(&self, key: &[u8], value: &[u8], now: f64) -> Result<(), StorageError> {
        let encoded = encode_value(value)?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO kv_store (key, value, timestamp) VALUES (?1, ?2, ?3)",
            params![key, encoded, now],
        )?;
        Ok(())
    }

    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        self.cull().await?;
        let conn = self.conn.lock().await;
        let raw: Option<String> = conn
            .query_row("SELECT value FROM kv_store WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        raw.map(|r| decode_value(&r)).transpose()
    }

    async fn entries(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        self.cull().await?;
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT key, value FROM kv_store")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(|(k, raw)| Ok((k, decode_value(&raw)?))).collect()
    }

    async fn entries_older_than(
        &self,
        seconds_old: f64,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        let cutoff = now_unix() - seconds_old;
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT key, value FROM kv_store WHERE timestamp < ?1")?;
        let rows = stmt
            .query_map(params![cutoff], |row| {
                Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(|(k, raw)| Ok((k, decode_value(&raw)?))).collect()
    }

    async fn cull(&self) -> Result<usize, StorageError> {
        let min_time = now_unix() - self.ttl_secs as f64;
        let conn = self.conn.lock().await;
        let removed =
            conn.execute("DELETE FROM kv_store WHERE timestamp < ?1", params![min_time])?;
        Ok(removed)
    }

    async fn store_node(&self, node: &Node) -> Result<(), StorageError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO known_nodes (node_id, ip, port, last_seen)
             VALUES (?1, ?2, ?3, ?4)",
            params![node.id.to_hex(), node.host, node.port, now_unix()],
        )?;
        Ok(())
    }

    async fn known_nodes(&self, max_age: Option<f64>) -> Result<Vec<Node>, StorageError> {
        let min_time = max_age.map(|age| now_unix() - age).unwrap_or(f64::MIN);
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT node_id, ip, port FROM known_nodes WHERE last_seen >= ?1",
        )?;
        let rows = stmt
            .query_map(params![min_time], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, u16>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows
            .into_iter()
            .map(|(id_hex, ip, port)| Node::new(NodeId::parse_wire(&id_hex), ip, port))
            .collect())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM kv_store", [])?;
        conn.execute("DELETE FROM known_nodes", [])?;
        Ok(())
    }

    fn ttl_secs(&self) -> u64 {
        self.ttl_secs
    }
}
