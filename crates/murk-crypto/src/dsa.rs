//! ML-DSA-44 signatures.
//!
//! The algorithm hashes internally (SHAKE256); messages are passed raw
//! with an empty domain-separation context, matching the envelope
//! format which signs the cleartext payload bytes directly.

use libcrux_ml_dsa::ml_dsa_44;
use libcrux_ml_dsa::{MLDSASignature, MLDSASigningKey, MLDSAVerificationKey};
use zeroize::Zeroize;

use crate::CryptoError;

/// ML-DSA-44 verification key size in bytes.
pub const VERIFYING_KEY_SIZE: usize = 1312;
/// ML-DSA-44 signing key size in bytes.
pub const SIGNING_KEY_SIZE: usize = 2560;
/// ML-DSA-44 signature size in bytes.
pub const SIGNATURE_SIZE: usize = 2420;

const KEYGEN_RANDOMNESS: usize = 32;
const SIGNING_RANDOMNESS: usize = 32;

pub struct DsaSigningKey(MLDSASigningKey<SIGNING_KEY_SIZE>);

impl DsaSigningKey {
    pub fn as_bytes(&self) -> &[u8; SIGNING_KEY_SIZE] {
        self.0.as_ref()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; SIGNING_KEY_SIZE] = bytes.try_into().map_err(|_| CryptoError::Shape {
            expected: SIGNING_KEY_SIZE,
            got: bytes.len(),
        })?;
        Ok(Self(MLDSASigningKey::new(arr)))
    }
}

impl Drop for DsaSigningKey {
    fn drop(&mut self) {
        self.0.as_ref_mut().zeroize();
    }
}

pub struct DsaVerifyingKey(MLDSAVerificationKey<VERIFYING_KEY_SIZE>);

impl DsaVerifyingKey {
    pub fn as_bytes(&self) -> &[u8; VERIFYING_KEY_SIZE] {
        self.0.as_ref()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; VERIFYING_KEY_SIZE] = bytes.try_into().map_err(|_| CryptoError::Shape {
            expected: VERIFYING_KEY_SIZE,
            got: bytes.len(),
        })?;
        Ok(Self(MLDSAVerificationKey::new(arr)))
    }
}

pub struct DsaSignature(MLDSASignature<SIGNATURE_SIZE>);

impl DsaSignature {
    pub fn as_bytes(&self) -> &[u8; SIGNATURE_SIZE] {
        self.0.as_ref()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; SIGNATURE_SIZE] = bytes.try_into().map_err(|_| CryptoError::Shape {
            expected: SIGNATURE_SIZE,
            got: bytes.len(),
        })?;
        Ok(Self(MLDSASignature::new(arr)))
    }
}

/// Generate a fresh ML-DSA-44 key pair from OS randomness.
pub fn keypair() -> Result<(DsaSigningKey, DsaVerifyingKey), CryptoError> {
    let mut randomness = [0u8; KEYGEN_RANDOMNESS];
    getrandom::getrandom(&mut randomness).map_err(|_| CryptoError::Rng)?;
    let kp = ml_dsa_44::generate_key_pair(randomness);
    randomness.zeroize();
    Ok((DsaSigningKey(kp.signing_key), DsaVerifyingKey(kp.verification_key)))
}

/// Sign `message` with a fresh per-signature randomizer.
pub fn sign(signing_key: &DsaSigningKey, message: &[u8]) -> Result<DsaSignature, CryptoError> {
    let mut randomness = [0u8; SIGNING_RANDOMNESS];
    getrandom::getrandom(&mut randomness).map_err(|_| CryptoError::Rng)?;
    let sig = ml_dsa_44::sign(&signing_key.0, message, b"", randomness)
        .map_err(|_| CryptoError::Signing)?;
    randomness.zeroize();
    Ok(DsaSignature(sig))
}

/// Verify `signature` over `message`. Returns false for any invalid
/// signature rather than distinguishing failure causes.
pub fn verify(verifying_key: &DsaVerifyingKey, message: &[u8], signature: &DsaSignature) -> bool {
    ml_dsa_44::verify(&verifying_key.0, message, b"", &signature.0).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_verify_round_trip() {
        let (sk, vk) = keypair().unwrap();
        let sig = sign(&sk, b"the quick brown fox").unwrap();
        assert!(verify(&vk, b"the quick brown fox", &sig));
    }

    #[test]
    fn wrong_message_rejected() {
        let (sk, vk) = keypair().unwrap();
        let sig = sign(&sk, b"original").unwrap();
        assert!(!verify(&vk, b"tampered", &sig));
    }

    #[test]
    fn wrong_key_rejected() {
        let (sk, _) = keypair().unwrap();
        let (_, other_vk) = keypair().unwrap();
        let sig = sign(&sk, b"message").unwrap();
        assert!(!verify(&other_vk, b"message", &sig));
    }

    #[test]
    fn signature_bytes_round_trip() {
        let (sk, vk) = keypair().unwrap();
        let sig = sign(&sk, b"m").unwrap();
        let sig2 = DsaSignature::from_bytes(sig.as_bytes()).unwrap();
        assert!(verify(&vk, b"m", &sig2));
    }

    #[test]
    fn signing_key_shape_checked() {
        assert!(DsaSigningKey::from_bytes(&[0u8; 100]).is_err());
    }
}
