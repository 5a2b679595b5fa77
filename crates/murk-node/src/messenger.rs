//! Originator-side messaging: sealing for known or DHT-resolved
//! recipients, direct delivery, and the broadcast fallback that seeds
//! the overlay.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use murk_crypto::envelope::{self, Envelope, OpenedMessage};
use murk_crypto::kem::KemPublicKey;
use murk_crypto::{b64, EnvelopeError, Identity, UserId};
use murk_kad::node::digest;
use murk_kad::DhtClient;

use crate::db::{Contact, MessengerDb, StoredMessage};

/// Direct and overlay-injection posts share the forward timeout.
const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Initial hop budget of a fresh envelope.
pub const DEFAULT_TTL: i64 = 16;
/// Initial known-contact forwarding budget.
pub const DEFAULT_MAX_RECURSIVE_CONTACT: i64 = 16;

/// Public contact card published into the DHT under
/// `sha1(identifier)`. Everything in it is public material.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactCard {
    pub identifier: String,
    pub addr: String,
    pub kem_public_key: String,
    pub sig_public_key: String,
}

impl ContactCard {
    pub fn into_contact(self) -> Contact {
        Contact {
            identifier: self.identifier,
            name: None,
            addr: self.addr,
            kem_public_key: self.kem_public_key,
            sig_public_key: self.sig_public_key,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("recipient {0} unknown and not resolvable")]
    UnknownRecipient(String),
    #[error("recipient key material is invalid")]
    BadRecipientKey,
    #[error("sealing failed: {0}")]
    Seal(#[from] EnvelopeError),
    #[error("storage failure: {0}")]
    Storage(#[from] crate::db::DbError),
    #[error("no route to recipient")]
    NoRoute,
}

/// The local user: identity plus the externally reachable address
/// peers should reply to.
pub struct Messenger {
    identity: Identity,
    addr: String,
}

impl Messenger {
    pub fn new(identity: Identity, addr: impl Into<String>) -> Self {
        Self { identity, addr: addr.into() }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn user_id(&self) -> &UserId {
        self.identity.user_id()
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// The card other peers resolve through the DHT.
    pub fn contact_card(&self) -> ContactCard {
        ContactCard {
            identifier: self.user_id().as_str().to_string(),
            addr: self.addr.clone(),
            kem_public_key: b64::encode(self.identity.kem_public().as_bytes()),
            sig_public_key: b64::encode(self.identity.sig_public().as_bytes()),
        }
    }

    /// Seal `plaintext` for a contact with fresh hop budgets.
    pub fn seal_for(
        &self,
        contact: &Contact,
        plaintext: &[u8],
        timestamp: f64,
    ) -> Result<Envelope, SendError> {
        let kem_pub_bytes =
            b64::decode(&contact.kem_public_key).map_err(|_| SendError::BadRecipientKey)?;
        let kem_pub =
            KemPublicKey::from_bytes(&kem_pub_bytes).map_err(|_| SendError::BadRecipientKey)?;
        let recipient_id = UserId::from_string(contact.identifier.clone());
        Ok(envelope::seal(
            &self.identity,
            &self.addr,
            &recipient_id,
            &kem_pub,
            plaintext,
            timestamp,
            DEFAULT_TTL,
            DEFAULT_MAX_RECURSIVE_CONTACT,
        )?)
    }

    pub fn open(&self, envelope: &Envelope) -> Result<OpenedMessage, EnvelopeError> {
        envelope::open(&self.identity, envelope)
    }

    /// Publish our contact card into the DHT so peers can resolve the
    /// identifier to keys and an address.
    pub async fn publish_card(&self, dht: &DhtClient) -> bool {
        let card = self.contact_card();
        let key = digest(card.identifier.as_bytes());
        let value = match serde_json::to_vec(&card) {
            Ok(v) => v,
            Err(_) => return false,
        };
        let our_id = match dht.get_id().await {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "local DHT node unreachable");
                return false;
            }
        };
        match dht.set(&our_id, &key.to_hex(), &hex::encode(value)).await {
            Ok(ok) => {
                info!(id = %self.user_id().prefix(), ok, "published contact card");
                ok
            }
            Err(e) => {
                warn!(error = %e, "contact card publish failed");
                false
            }
        }
    }

    /// Resolve a recipient: local contacts first, then the DHT.
    /// Resolved cards are added to the contact store.
    pub async fn resolve_recipient(
        &self,
        db: &MessengerDb,
        dht: Option<&DhtClient>,
        recipient_id: &str,
    ) -> Result<Contact, SendError> {
        if let Some(contact) = db.get_contact(recipient_id).await? {
            return Ok(contact);
        }
        let Some(dht) = dht else {
            return Err(SendError::UnknownRecipient(recipient_id.to_string()));
        };

        let key = digest(recipient_id.as_bytes());
        let our_id = dht
            .get_id()
            .await
            .map_err(|_| SendError::UnknownRecipient(recipient_id.to_string()))?;
        let found = dht
            .find_value(&our_id, &key.to_hex())
            .await
            .ok()
            .flatten()
            .and_then(|bytes| serde_json::from_slice::<ContactCard>(&bytes).ok());
        match found {
            Some(card) if card.identifier == recipient_id => {
                let contact = card.into_contact();
                db.add_contact(&contact).await?;
                Ok(contact)
            }
            _ => Err(SendError::UnknownRecipient(recipient_id.to_string())),
        }
    }

    /// Send `plaintext` to `recipient_id`.
    ///
    /// Tries direct delivery to the recipient's known address; when
    /// that fails, injects the envelope into the overlay by posting it
    /// once to every other known contact. That broadcast is the one
    /// place sampling is not used: it seeds forwarding.
    pub async fn send_text(
        &self,
        db: &MessengerDb,
        http: &reqwest::Client,
        dht: Option<&DhtClient>,
        recipient_id: &str,
        plaintext: &[u8],
        timestamp: f64,
    ) -> Result<(), SendError> {
        let contact = self.resolve_recipient(db, dht, recipient_id).await?;
        let envelope = self.seal_for(&contact, plaintext, timestamp)?;

        if post_envelope(http, &contact.addr, &envelope).await {
            info!(recipient = %UserId::from_string(recipient_id.into()).prefix(),
                "delivered directly");
            self.record_own_copy(db, recipient_id, plaintext, timestamp).await?;
            return Ok(());
        }

        warn!(recipient = %UserId::from_string(recipient_id.into()).prefix(),
            "direct delivery failed, seeding overlay");
        let mut injected = false;
        for other in db.list_contacts().await? {
            if other.identifier == recipient_id {
                continue;
            }
            injected |= post_envelope(http, &other.addr, &envelope).await;
        }
        if !injected {
            return Err(SendError::NoRoute);
        }
        self.record_own_copy(db, recipient_id, plaintext, timestamp).await?;
        Ok(())
    }

    async fn record_own_copy(
        &self,
        db: &MessengerDb,
        recipient_id: &str,
        plaintext: &[u8],
        timestamp: f64,
    ) -> Result<(), SendError> {
        db.add_message(&StoredMessage {
            content: b64::encode(plaintext),
            timestamp: timestamp.to_string(),
            sender_id: self.user_id().as_str().to_string(),
            recipient_id: Some(recipient_id.to_string()),
        })
        .await?;
        Ok(())
    }
}

/// POST one envelope to a peer's `/send`. Returns whether the peer
/// answered OK within the timeout.
pub async fn post_envelope(http: &reqwest::Client, addr: &str, envelope: &Envelope) -> bool {
    let url = format!("{}/send", addr.trim_end_matches('/'));
    match http.post(&url).timeout(SEND_TIMEOUT).json(envelope).send().await {
        Ok(resp) if resp.status().is_success() => {
            matches!(
                resp.json::<crate::api::StatusResponse>().await,
                Ok(body) if body.status == "OK"
            )
        }
        Ok(resp) => {
            warn!(%url, status = %resp.status(), "send rejected");
            false
        }
        Err(e) => {
            warn!(%url, error = %e, "send failed");
            false
        }
    }
}
