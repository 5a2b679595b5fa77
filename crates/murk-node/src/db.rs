//! Messenger persistence: contacts, delivered messages, pending
//! forwards, and the seen-signature history.
//!
//! Time-based purges are the storage layer's job: inserts into
//! `seen_history` and `forward_messages` fire SQL triggers that delete
//! rows older than one day and seven days respectively.

use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// Seen-history entries expire after one day.
const SEEN_TTL_SECS: f64 = 24.0 * 3600.0;
/// Pending forwards expire after seven days.
const FORWARD_TTL_SECS: f64 = 7.0 * 24.0 * 3600.0;

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

fn now_unix() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
}

/// A known peer. The identifier is primary; `addr` is the last-known
/// HTTP endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub identifier: String,
    pub name: Option<String>,
    pub addr: String,
    pub kem_public_key: String,
    pub sig_public_key: String,
}

/// A message delivered to this node. Content is kept base64url at the
/// storage boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub content: String,
    pub timestamp: String,
    pub sender_id: String,
    pub recipient_id: Option<String>,
}

/// A sealed envelope held for an offline recipient. The signature is
/// unique and doubles as the dedup key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardRecord {
    pub recipient_identifier: String,
    pub shared_secret_ciphertext: String,
    pub message_ciphertext: String,
    pub nonce: String,
    pub signature: String,
    pub created_at: f64,
}

/// All messenger tables behind one connection.
pub struct MessengerDb {
    conn: Arc<Mutex<Connection>>,
}

impl MessengerDb {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Self::migrate(&conn)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        Self::migrate(&conn)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    fn migrate(conn: &Connection) -> Result<(), DbError> {
        conn.execute_batch(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS contacts (
                identifier TEXT PRIMARY KEY,
                name TEXT,
                addr TEXT NOT NULL,
                kem_public_key TEXT NOT NULL,
                sig_public_key TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                content TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                sender_id TEXT NOT NULL,
                recipient_id TEXT
            );

            CREATE TABLE IF NOT EXISTS forward_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                recipient_identifier TEXT NOT NULL,
                shared_secret_ciphertext TEXT NOT NULL,
                message_ciphertext TEXT NOT NULL,
                nonce TEXT NOT NULL,
                signature TEXT UNIQUE NOT NULL,
                created_at REAL NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_forward_recipient
                ON forward_messages(recipient_identifier);

            CREATE TABLE IF NOT EXISTS seen_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                signature TEXT UNIQUE NOT NULL,
                timestamp REAL NOT NULL
            );

            CREATE TRIGGER IF NOT EXISTS purge_old_seen
            AFTER INSERT ON seen_history
            BEGIN
                DELETE FROM seen_history
                WHERE timestamp < NEW.timestamp - {SEEN_TTL_SECS};
            END;

            CREATE TRIGGER IF NOT EXISTS purge_old_forwards
            AFTER INSERT ON forward_messages
            BEGIN
                DELETE FROM forward_messages
                WHERE created_at < NEW.created_at - {FORWARD_TTL_SECS};
            END;
            "#
        ))?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Contacts
    // -------------------------------------------------------------------------

    /// Insert a contact; an existing identifier is left untouched.
    pub async fn add_contact(&self, contact: &Contact) -> Result<(), DbError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR IGNORE INTO contacts
                (identifier, name, addr, kem_public_key, sig_public_key)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                contact.identifier,
                contact.name,
                contact.addr,
                contact.kem_public_key,
                contact.sig_public_key,
            ],
        )?;
        Ok(())
    }

    pub async fn get_contact(&self, identifier: &str) -> Result<Option<Contact>, DbError> {
        let conn = self.conn.lock().await;
        let contact = conn
            .query_row(
                "SELECT identifier, name, addr, kem_public_key, sig_public_key
                 FROM contacts WHERE identifier = ?1",
                params![identifier],
                row_to_contact,
            )
            .optional()?;
        Ok(contact)
    }

    pub async fn list_contacts(&self) -> Result<Vec<Contact>, DbError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT identifier, name, addr, kem_public_key, sig_public_key FROM contacts",
        )?;
        let contacts =
            stmt.query_map([], row_to_contact)?.collect::<Result<Vec<_>, _>>()?;
        Ok(contacts)
    }

    // -------------------------------------------------------------------------
    // Messages
    // -------------------------------------------------------------------------

    pub async fn add_message(&self, message: &StoredMessage) -> Result<(), DbError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO messages (content, timestamp, sender_id, recipient_id)
             VALUES (?1, ?2, ?3, ?4)",
            params![message.content, message.timestamp, message.sender_id, message.recipient_id],
        )?;
        Ok(())
    }

    /// All messages, optionally restricted to one sender.
    pub async fn list_messages(
        &self,
        sender_id: Option<&str>,
    ) -> Result<Vec<StoredMessage>, DbError> {
        let conn = self.conn.lock().await;
        let mut messages = Vec::new();
        match sender_id {
            Some(sender) => {
                let mut stmt = conn.prepare(
                    "SELECT content, timestamp, sender_id, recipient_id
                     FROM messages WHERE sender_id = ?1 ORDER BY id",
                )?;
                for row in stmt.query_map(params![sender], row_to_message)? {
                    messages.push(row?);
                }
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT content, timestamp, sender_id, recipient_id
                     FROM messages ORDER BY id",
                )?;
                for row in stmt.query_map([], row_to_message)? {
                    messages.push(row?);
                }
            }
        }
        Ok(messages)
    }

    // -------------------------------------------------------------------------
    // Forward queue
    // -------------------------------------------------------------------------

    /// Queue an envelope for later delivery. A record with the same
    /// signature is already queued and is left alone.
    pub async fn add_forward(&self, record: &ForwardRecord) -> Result<(), DbError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR IGNORE INTO forward_messages
                (recipient_identifier, shared_secret_ciphertext, message_ciphertext,
                 nonce, signature, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.recipient_identifier,
                record.shared_secret_ciphertext,
                record.message_ciphertext,
                record.nonce,
                record.signature,
                record.created_at,
            ],
        )?;
        Ok(())
    }

    pub async fn forwards_for(&self, recipient: &str) -> Result<Vec<ForwardRecord>, DbError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT recipient_identifier, shared_secret_ciphertext, message_ciphertext,
                    nonce, signature, created_at
             FROM forward_messages WHERE recipient_identifier = ?1 ORDER BY id",
        )?;
        let records =
            stmt.query_map(params![recipient], row_to_forward)?.collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Drop every pending forward for `recipient`, returning how many
    /// were removed.
    pub async fn delete_forwards_for(&self, recipient: &str) -> Result<usize, DbError> {
        let conn = self.conn.lock().await;
        let removed = conn.execute(
            "DELETE FROM forward_messages WHERE recipient_identifier = ?1",
            params![recipient],
        )?;
        Ok(removed)
    }

    // -------------------------------------------------------------------------
    // Seen history
    // -------------------------------------------------------------------------

    /// Record a signature sighting. Returns `true` when the signature
    /// was new, `false` when it had been seen before.
    pub async fn seen_insert(&self, signature: &str) -> Result<bool, DbError> {
        let conn = self.conn.lock().await;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO seen_history (signature, timestamp) VALUES (?1, ?2)",
            params![signature, now_unix()],
        )?;
        Ok(inserted > 0)
    }

    pub async fn seen_contains(&self, signature: &str) -> Result<bool, DbError> {
        let conn = self.conn.lock().await;
        let hit: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM seen_history WHERE signature = ?1",
                params![signature],
                |row| row.get(0),
            )
            .optional()?;
        Ok(hit.is_some())
    }

    #[cfg(test)]
    async fn raw_insert_seen(&self, signature: &str, timestamp: f64) -> Result<(), DbError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR IGNORE INTO seen_history (signature, timestamp) VALUES (?1, ?2)",
            params![signature, timestamp],
        )?;
        Ok(())
    }

    #[cfg(test)]
    async fn raw_insert_forward(&self, record: &ForwardRecord) -> Result<(), DbError> {
        self.add_forward(record).await
    }
}

fn row_to_contact(row: &rusqlite::Row) -> rusqlite::Result<Contact> {
    Ok(Contact {
        identifier: row.get(0)?,
        name: row.get(1)?,
        addr: row.get(2)?,
        kem_public_key: row.get(3)?,
        sig_public_key: row.get(4)?,
    })
}

fn row_to_message(row: &rusqlite::Row) -> rusqlite::Result<StoredMessage> {
    Ok(StoredMessage {
        content: row.get(0)?,
        timestamp: row.get(1)?,
        sender_id: row.get(2)?,
        recipient_id: row.get(3)?,
    })
}

fn row_to_forward(row: &rusqlite::Row) -> rusqlite::Result<ForwardRecord> {
    Ok(ForwardRecord {
        recipient_identifier: row.get(0)?,
        shared_secret_ciphertext: row.get(1)?,
        message_ciphertext: row.get(2)?,
        nonce: row.get(3)?,
        signature: row.get(4)?,
        created_at: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_contact(id: &str) -> Contact {
        Contact {
            identifier: id.to_string(),
            name: Some("peer".to_string()),
            addr: "http://127.0.0.1:8001".to_string(),
            kem_public_key: "a2Vt".to_string(),
            sig_public_key: "c2ln".to_string(),
        }
    }

    fn test_forward(recipient: &str, signature: &str, created_at: f64) -> ForwardRecord {
        ForwardRecord {
            recipient_identifier: recipient.to_string(),
            shared_secret_ciphertext: "Y3Q".to_string(),
            message_ciphertext: "bXNn".to_string(),
            nonce: "bm9uY2U".to_string(),
            signature: signature.to_string(),
            created_at,
        }
    }

    #[tokio::test]
    async fn contact_add_is_idempotent() {
        let db = MessengerDb::open_in_memory().unwrap();
        let contact = test_contact("alice");
        db.add_contact(&contact).await.unwrap();

        let mut renamed = contact.clone();
        renamed.name = Some("other".to_string());
        db.add_contact(&renamed).await.unwrap();

        let stored = db.get_contact("alice").await.unwrap().unwrap();
        assert_eq!(stored.name.as_deref(), Some("peer"));
        assert_eq!(db.list_contacts().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn messages_filter_by_sender() {
        let db = MessengerDb::open_in_memory().unwrap();
        for (sender, content) in [("alice", "aGk"), ("bob", "eW8"), ("alice", "YWdhaW4")] {
            db.add_message(&StoredMessage {
                content: content.to_string(),
                timestamp: "1700000000.0".to_string(),
                sender_id: sender.to_string(),
                recipient_id: None,
            })
            .await
            .unwrap();
        }
        assert_eq!(db.list_messages(None).await.unwrap().len(), 3);
        assert_eq!(db.list_messages(Some("alice")).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn seen_insert_reports_novelty() {
        let db = MessengerDb::open_in_memory().unwrap();
        assert!(db.seen_insert("sig-1").await.unwrap());
        assert!(!db.seen_insert("sig-1").await.unwrap());
        assert!(db.seen_contains("sig-1").await.unwrap());
        assert!(!db.seen_contains("sig-2").await.unwrap());
    }

    #[tokio::test]
    async fn old_seen_entries_purged_on_insert() {
        let db = MessengerDb::open_in_memory().unwrap();
        db.raw_insert_seen("ancient", now_unix() - 2.0 * 24.0 * 3600.0).await.unwrap();
        assert!(db.seen_contains("ancient").await.unwrap());

        // A fresh insert fires the trigger.
        db.seen_insert("fresh").await.unwrap();
        assert!(!db.seen_contains("ancient").await.unwrap());
        assert!(db.seen_contains("fresh").await.unwrap());
    }

    #[tokio::test]
    async fn forward_queue_round_trip() {
        let db = MessengerDb::open_in_memory().unwrap();
        db.add_forward(&test_forward("bob", "sig-a", now_unix())).await.unwrap();
        db.add_forward(&test_forward("bob", "sig-b", now_unix())).await.unwrap();
        db.add_forward(&test_forward("carol", "sig-c", now_unix())).await.unwrap();

        assert_eq!(db.forwards_for("bob").await.unwrap().len(), 2);
        assert_eq!(db.delete_forwards_for("bob").await.unwrap(), 2);
        assert!(db.forwards_for("bob").await.unwrap().is_empty());
        assert_eq!(db.forwards_for("carol").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_forward_signature_ignored() {
        let db = MessengerDb::open_in_memory().unwrap();
        db.add_forward(&test_forward("bob", "sig-dup", now_unix())).await.unwrap();
        db.add_forward(&test_forward("bob", "sig-dup", now_unix())).await.unwrap();
        assert_eq!(db.forwards_for("bob").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stale_forwards_purged_on_insert() {
        let db = MessengerDb::open_in_memory().unwrap();
        db.raw_insert_forward(&test_forward("bob", "sig-old", now_unix() - 8.0 * 24.0 * 3600.0))
            .await
            .unwrap();
        db.add_forward(&test_forward("bob", "sig-new", now_unix())).await.unwrap();

        let remaining = db.forwards_for("bob").await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].signature, "sig-new");
    }

    #[tokio::test]
    async fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("messenger.db");
        {
            let db = MessengerDb::open(&path).unwrap();
            db.add_contact(&test_contact("alice")).await.unwrap();
        }
        let db = MessengerDb::open(&path).unwrap();
        assert!(db.get_contact("alice").await.unwrap().is_some());
    }
}
