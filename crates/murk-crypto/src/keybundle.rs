//! Password-protected at-rest key storage.
//!
//! The bundle is a human-readable JSON document: public keys in the
//! clear, private keys AES-256-GCM-encrypted under a scrypt-derived
//! key, and an HMAC keycheck tag so a wrong password is rejected
//! before any private-key ciphertext is processed.

use std::path::Path;

use constant_time_eq::constant_time_eq;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::{aead, b64, kdf, CryptoError, Identity};

const SALT_SIZE: usize = 16;

/// Serialized form of a protected identity. All fields are URL-safe
/// unpadded base64.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyBundle {
    pub salt: String,
    pub nonce: String,
    pub kem_public: String,
    pub sig_public: String,
    pub kem_private_encrypted: String,
    pub sig_private_encrypted: String,
    pub keycheck: String,
}

#[derive(Debug, thiserror::Error)]
pub enum KeyBundleError {
    #[error("wrong password")]
    WrongPassword,
    #[error("crypto failure: {0}")]
    Crypto(#[from] CryptoError),
    #[error("malformed bundle: {0}")]
    Malformed(String),
    #[error("io failure: {0}")]
    Io(#[from] std::io::Error),
}

impl KeyBundle {
    /// Seal `identity` under `password`.
    ///
    /// One nonce covers both private-key encryptions; the two
    /// plaintexts differ in length so the ciphertexts stay distinct,
    /// and the nonce is fresh per bundle.
    pub fn seal(identity: &Identity, password: &[u8]) -> Result<Self, KeyBundleError> {
        let mut salt = [0u8; SALT_SIZE];
        getrandom::getrandom(&mut salt).map_err(|_| CryptoError::Rng)?;

        let mut key = kdf::scrypt_key(password, &salt)?;
        let keycheck = kdf::keycheck(&key);

        let (kem_ct, nonce) = aead::encrypt(&key, identity.kem_secret().as_bytes())?;
        let sig_ct = aead::encrypt_with_nonce(&key, &nonce, identity.sig_secret().as_bytes())?;
        key.zeroize();

        Ok(Self {
            salt: b64::encode(&salt),
            nonce: b64::encode(&nonce),
            kem_public: b64::encode(identity.kem_public().as_bytes()),
            sig_public: b64::encode(identity.sig_public().as_bytes()),
            kem_private_encrypted: b64::encode(&kem_ct),
            sig_private_encrypted: b64::encode(&sig_ct),
            keycheck: b64::encode(&keycheck),
        })
    }

    /// Recover the identity. Fails with `WrongPassword` (via the
    /// keycheck tag, compared in constant time) without touching the
    /// encrypted private keys.
    pub fn open(&self, password: &[u8]) -> Result<Identity, KeyBundleError> {
        let salt = decode_field(&self.salt, "salt")?;
        let nonce = decode_field(&self.nonce, "nonce")?;
        let saved_check = decode_field(&self.keycheck, "keycheck")?;

        let mut key = kdf::scrypt_key(password, &salt)?;
        let check = kdf::keycheck(&key);
        if !constant_time_eq(&check, &saved_check) {
            key.zeroize();
            return Err(KeyBundleError::WrongPassword);
        }

        let kem_public = decode_field(&self.kem_public, "kem_public")?;
        let sig_public = decode_field(&self.sig_public, "sig_public")?;
        let kem_ct = decode_field(&self.kem_private_encrypted, "kem_private_encrypted")?;
        let sig_ct = decode_field(&self.sig_private_encrypted, "sig_private_encrypted")?;

        let mut kem_secret = aead::decrypt(&key, &nonce, &kem_ct)?;
        let mut sig_secret = aead::decrypt(&key, &nonce, &sig_ct)?;
        key.zeroize();

        let identity =
            Identity::from_key_bytes(&kem_secret, &kem_public, &sig_secret, &sig_public)?;
        kem_secret.zeroize();
        sig_secret.zeroize();
        Ok(identity)
    }

    /// Write the bundle as pretty JSON at `path`.
    pub fn save_to(&self, path: &Path) -> Result<(), KeyBundleError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| KeyBundleError::Malformed(e.to_string()))?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Read a bundle previously written with `save_to`.
    pub fn load_from(path: &Path) -> Result<Self, KeyBundleError> {
        let json = std::fs::read_to_string(path)?;
        serde_json::from_str(&json).map_err(|e| KeyBundleError::Malformed(e.to_string()))
    }
}

fn decode_field(value: &str, field: &str) -> Result<Vec<u8>, KeyBundleError> {
    b64::decode(value).map_err(|_| KeyBundleError::Malformed(format!("bad base64 in {field}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_round_trip() {
        let identity = Identity::generate().unwrap();
        let bundle = KeyBundle::seal(&identity, b"correct horse").unwrap();
        let restored = bundle.open(b"correct horse").unwrap();
        assert_eq!(identity.user_id(), restored.user_id());
    }

    #[test]
    fn wrong_password_rejected_by_keycheck() {
        let identity = Identity::generate().unwrap();
        let bundle = KeyBundle::seal(&identity, b"correct horse").unwrap();
        assert!(matches!(
            bundle.open(b"battery staple"),
            Err(KeyBundleError::WrongPassword)
        ));
    }

    #[test]
    fn corrupted_ciphertext_fails_authentication() {
        let identity = Identity::generate().unwrap();
        let mut bundle = KeyBundle::seal(&identity, b"pw").unwrap();
        let mut ct = b64::decode(&bundle.kem_private_encrypted).unwrap();
        ct[0] ^= 0xff;
        bundle.kem_private_encrypted = b64::encode(&ct);
        assert!(matches!(
            bundle.open(b"pw"),
            Err(KeyBundleError::Crypto(CryptoError::Authentication))
        ));
    }

    #[test]
    fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.json");

        let identity = Identity::generate().unwrap();
        let bundle = KeyBundle::seal(&identity, b"pw").unwrap();
        bundle.save_to(&path).unwrap();

        let loaded = KeyBundle::load_from(&path).unwrap();
        assert_eq!(loaded.open(b"pw").unwrap().user_id(), identity.user_id());
    }
}
