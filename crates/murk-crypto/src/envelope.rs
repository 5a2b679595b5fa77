//! The end-to-end message envelope.
//!
//! Sealing encapsulates a fresh shared secret to the recipient's
//! ML-KEM key, derives an AES key, encrypts a canonical JSON payload,
//! and signs the *cleartext* payload with the sender's ML-DSA key. The
//! signature deliberately covers the plaintext, not the ciphertext:
//! only a party able to decrypt can verify it, so network observers
//! and forwarders learn nothing about authenticity.

use serde::{Deserialize, Serialize};

use crate::dsa::{self, DsaSignature, DsaVerifyingKey};
use crate::kem::{self, KemCiphertext, KemPublicKey};
use crate::{aead, b64, kdf, CryptoError, Identity, UserId};

/// On-wire envelope. Binary fields are URL-safe unpadded base64;
/// `ttl` and `max_recursive_contact` are mutated by forwarders and may
/// go negative after randomized decrements.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub current_node_identifier: String,
    pub recipient_identifier: String,
    pub shared_secret_ciphertext: String,
    pub message_ciphertext: String,
    pub nonce: String,
    pub signature: String,
    pub ttl: i64,
    pub max_recursive_contact: i64,
}

/// Inner payload, serialized as JSON with keys in a fixed sorted order
/// so the signed bytes are deterministic for a given input.
#[derive(Debug, Serialize, Deserialize)]
struct Payload {
    ip: String,
    kem_public_key: String,
    message: String,
    sender_id: String,
    signature_public_key: String,
    timestamp: f64,
}

/// A successfully opened and verified envelope.
#[derive(Debug)]
pub struct OpenedMessage {
    pub sender_id: UserId,
    pub message: Vec<u8>,
    pub sig_public: Vec<u8>,
    pub kem_public: Vec<u8>,
    pub sender_addr: String,
    pub timestamp: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("decryption failed")]
    Decrypt,
    #[error("signature verification failed")]
    Signature,
    #[error("sender identity mismatch")]
    Identity,
    #[error("malformed envelope")]
    Malformed,
}

impl From<CryptoError> for EnvelopeError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::Authentication => EnvelopeError::Decrypt,
            _ => EnvelopeError::Malformed,
        }
    }
}

/// Seal `plaintext` for a recipient known by identifier and KEM key.
///
/// `sender_addr` is the HTTP endpoint the recipient can reply to; it
/// rides inside the encrypted payload, never in the outer envelope.
#[allow(clippy::too_many_arguments)]
pub fn seal(
    sender: &Identity,
    sender_addr: &str,
    recipient_id: &UserId,
    recipient_kem_pub: &KemPublicKey,
    plaintext: &[u8],
    timestamp: f64,
    ttl: i64,
    max_recursive_contact: i64,
) -> Result<Envelope, EnvelopeError> {
    let payload = Payload {
        ip: sender_addr.to_string(),
        kem_public_key: b64::encode(sender.kem_public().as_bytes()),
        message: b64::encode(plaintext),
        sender_id: sender.user_id().as_str().to_string(),
        signature_public_key: b64::encode(sender.sig_public().as_bytes()),
        timestamp,
    };
    let payload_bytes = serde_json::to_vec(&payload).map_err(|_| EnvelopeError::Malformed)?;

    let (shared_secret, kem_ct) = kem::encapsulate(recipient_kem_pub)?;
    let key = kdf::hkdf_aes_key(shared_secret.as_bytes());
    let (ciphertext, nonce) = aead::encrypt(&key, &payload_bytes)?;

    // Sign the cleartext payload. Verification is possible only after
    // a successful decryption.
    let signature = sender.sign(&payload_bytes).map_err(|_| EnvelopeError::Malformed)?;

    Ok(Envelope {
        current_node_identifier: sender.user_id().as_str().to_string(),
        recipient_identifier: recipient_id.as_str().to_string(),
        shared_secret_ciphertext: b64::encode(kem_ct.as_bytes()),
        message_ciphertext: b64::encode(&ciphertext),
        nonce: b64::encode(&nonce),
        signature: b64::encode(signature.as_bytes()),
        ttl,
        max_recursive_contact,
    })
}

/// Open an envelope addressed to `recipient`.
///
/// Order matters: decapsulate and decrypt first, then verify the
/// signature over the recovered payload, then recompute the sender
/// identifier from the embedded public keys and require it to match
/// the payload's `sender_id`.
pub fn open(recipient: &Identity, envelope: &Envelope) -> Result<OpenedMessage, EnvelopeError> {
    let kem_ct_bytes =
        b64::decode(&envelope.shared_secret_ciphertext).map_err(|_| EnvelopeError::Malformed)?;
    let kem_ct = KemCiphertext::from_bytes(&kem_ct_bytes)?;
    let ciphertext =
        b64::decode(&envelope.message_ciphertext).map_err(|_| EnvelopeError::Malformed)?;
    let nonce = b64::decode(&envelope.nonce).map_err(|_| EnvelopeError::Malformed)?;
    let signature_bytes = b64::decode(&envelope.signature).map_err(|_| EnvelopeError::Malformed)?;

    let shared_secret = recipient.decapsulate(&kem_ct);
    let key = kdf::hkdf_aes_key(shared_secret.as_bytes());
    let payload_bytes =
        aead::decrypt(&key, &nonce, &ciphertext).map_err(|_| EnvelopeError::Decrypt)?;

    let payload: Payload =
        serde_json::from_slice(&payload_bytes).map_err(|_| EnvelopeError::Malformed)?;
    let sig_public_bytes =
        b64::decode(&payload.signature_public_key).map_err(|_| EnvelopeError::Malformed)?;
    let kem_public_bytes =
        b64::decode(&payload.kem_public_key).map_err(|_| EnvelopeError::Malformed)?;

    let verifying_key =
        DsaVerifyingKey::from_bytes(&sig_public_bytes).map_err(|_| EnvelopeError::Malformed)?;
    let signature =
        DsaSignature::from_bytes(&signature_bytes).map_err(|_| EnvelopeError::Malformed)?;
    if !dsa::verify(&verifying_key, &payload_bytes, &signature) {
        return Err(EnvelopeError::Signature);
    }

    let expected_id = UserId::derive(&kem_public_bytes, &sig_public_bytes);
    if expected_id.as_str() != payload.sender_id {
        return Err(EnvelopeError::Identity);
    }

    let message = b64::decode(&payload.message).map_err(|_| EnvelopeError::Malformed)?;
    Ok(OpenedMessage {
        sender_id: expected_id,
        message,
        sig_public: sig_public_bytes,
        kem_public: kem_public_bytes,
        sender_addr: payload.ip,
        timestamp: payload.timestamp,
    })
}
