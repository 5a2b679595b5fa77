//! User identity: one ML-KEM-512 pair for receiving, one ML-DSA-44
//! pair for signing, and the content-derived identifier over both
//! public keys.

use serde::{Deserialize, Serialize};

use crate::dsa::{self, DsaSignature, DsaSigningKey, DsaVerifyingKey};
use crate::hash;
use crate::kem::{self, KemCiphertext, KemPublicKey, KemSecretKey, SharedSecret};
use crate::CryptoError;

/// Content-derived user identifier (URL-safe base64, no padding).
///
/// A pure function of the two public keys: the same pair always yields
/// the same identifier, and any change to either key changes it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn derive(kem_pub: &[u8], sig_pub: &[u8]) -> Self {
        Self(hash::user_id_base64url(kem_pub, sig_pub))
    }

    /// Wrap an identifier received from the wire. No validation beyond
    /// being a string; mismatches surface at envelope verification.
    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix for log lines.
    pub fn prefix(&self) -> &str {
        &self.0[..self.0.len().min(8)]
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A user's full key material. Private halves live only here and in
/// the encrypted key bundle.
pub struct Identity {
    kem_secret: KemSecretKey,
    kem_public: KemPublicKey,
    sig_secret: DsaSigningKey,
    sig_public: DsaVerifyingKey,
    user_id: UserId,
}

impl Identity {
    /// Generate a fresh identity from OS randomness.
    pub fn generate() -> Result<Self, CryptoError> {
        let (kem_secret, kem_public) = kem::keypair()?;
        let (sig_secret, sig_public) = dsa::keypair()?;
        let user_id = UserId::derive(kem_public.as_bytes(), sig_public.as_bytes());
        Ok(Self { kem_secret, kem_public, sig_secret, sig_public, user_id })
    }

    /// Rebuild an identity from raw key bytes (key-bundle load path).
    pub fn from_key_bytes(
        kem_secret: &[u8],
        kem_public: &[u8],
        sig_secret: &[u8],
        sig_public: &[u8],
    ) -> Result<Self, CryptoError> {
        let kem_secret = KemSecretKey::from_bytes(kem_secret)?;
        let kem_public = KemPublicKey::from_bytes(kem_public)?;
        let sig_secret = DsaSigningKey::from_bytes(sig_secret)?;
        let sig_public = DsaVerifyingKey::from_bytes(sig_public)?;
        let user_id = UserId::derive(kem_public.as_bytes(), sig_public.as_bytes());
        Ok(Self { kem_secret, kem_public, sig_secret, sig_public, user_id })
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn kem_public(&self) -> &KemPublicKey {
        &self.kem_public
    }

    pub fn sig_public(&self) -> &DsaVerifyingKey {
        &self.sig_public
    }

    pub(crate) fn kem_secret(&self) -> &KemSecretKey {
        &self.kem_secret
    }

    pub(crate) fn sig_secret(&self) -> &DsaSigningKey {
        &self.sig_secret
    }

    pub fn sign(&self, message: &[u8]) -> Result<DsaSignature, CryptoError> {
        dsa::sign(&self.sig_secret, message)
    }

    pub fn decapsulate(&self, ciphertext: &KemCiphertext) -> SharedSecret {
        kem::decapsulate(&self.kem_secret, ciphertext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_id_stable_across_rebuild() {
        let id = Identity::generate().unwrap();
        let rebuilt = Identity::from_key_bytes(
            id.kem_secret().as_bytes(),
            id.kem_public().as_bytes(),
            id.sig_secret().as_bytes(),
            id.sig_public().as_bytes(),
        )
        .unwrap();
        assert_eq!(id.user_id(), rebuilt.user_id());
    }

    #[test]
    fn distinct_identities_have_distinct_ids() {
        let a = Identity::generate().unwrap();
        let b = Identity::generate().unwrap();
        assert_ne!(a.user_id(), b.user_id());
    }

    #[test]
    fn prefix_is_bounded() {
        let id = Identity::generate().unwrap();
        assert_eq!(id.user_id().prefix().len(), 8);
        assert_eq!(UserId::from_string("abc".into()).prefix(), "abc");
    }
}
