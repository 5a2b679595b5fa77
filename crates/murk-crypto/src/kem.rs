//! ML-KEM-512 key encapsulation.
//!
//! Thin typed wrappers over `libcrux-ml-kem`. Randomness for key
//! generation and encapsulation is drawn from the OS and passed in, the
//! way the upstream API expects.

use libcrux_ml_kem::mlkem512;
use libcrux_ml_kem::{MlKemCiphertext, MlKemPrivateKey, MlKemPublicKey};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::CryptoError;

/// ML-KEM-512 public key size in bytes.
pub const PUBLIC_KEY_SIZE: usize = 800;
/// ML-KEM-512 private key size in bytes.
pub const PRIVATE_KEY_SIZE: usize = 1632;
/// ML-KEM-512 ciphertext size in bytes.
pub const CIPHERTEXT_SIZE: usize = 768;
/// Shared secret size in bytes.
pub const SHARED_SECRET_SIZE: usize = 32;

const KEYGEN_RANDOMNESS: usize = 64;
const ENCAPS_RANDOMNESS: usize = 32;

pub struct KemPublicKey(MlKemPublicKey<PUBLIC_KEY_SIZE>);

impl std::fmt::Debug for KemPublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("KemPublicKey").field(&self.0.as_slice()).finish()
    }
}

impl KemPublicKey {
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        self.0.as_slice()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; PUBLIC_KEY_SIZE] = bytes.try_into().map_err(|_| CryptoError::Shape {
            expected: PUBLIC_KEY_SIZE,
            got: bytes.len(),
        })?;
        Ok(Self(MlKemPublicKey::from(arr)))
    }
}

pub struct KemSecretKey(MlKemPrivateKey<PRIVATE_KEY_SIZE>);

impl KemSecretKey {
    pub fn as_bytes(&self) -> &[u8; PRIVATE_KEY_SIZE] {
        self.0.as_slice()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; PRIVATE_KEY_SIZE] = bytes.try_into().map_err(|_| CryptoError::Shape {
            expected: PRIVATE_KEY_SIZE,
            got: bytes.len(),
        })?;
        Ok(Self(MlKemPrivateKey::from(arr)))
    }
}

pub struct KemCiphertext(MlKemCiphertext<CIPHERTEXT_SIZE>);

impl KemCiphertext {
    pub fn as_bytes(&self) -> &[u8; CIPHERTEXT_SIZE] {
        self.0.as_slice()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; CIPHERTEXT_SIZE] = bytes.try_into().map_err(|_| CryptoError::Shape {
            expected: CIPHERTEXT_SIZE,
            got: bytes.len(),
        })?;
        Ok(Self(MlKemCiphertext::from(arr)))
    }
}

/// Encapsulated shared secret, zeroed on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret([u8; SHARED_SECRET_SIZE]);

impl SharedSecret {
    pub fn as_bytes(&self) -> &[u8; SHARED_SECRET_SIZE] {
        &self.0
    }
}

/// Generate a fresh ML-KEM-512 key pair from OS randomness.
pub fn keypair() -> Result<(KemSecretKey, KemPublicKey), CryptoError> {
    let mut randomness = [0u8; KEYGEN_RANDOMNESS];
    getrandom::getrandom(&mut randomness).map_err(|_| CryptoError::Rng)?;
    let (sk, pk) = mlkem512::generate_key_pair(randomness).into_parts();
    randomness.zeroize();
    Ok((KemSecretKey(sk), KemPublicKey(pk)))
}

/// Encapsulate a fresh shared secret to `public_key`.
pub fn encapsulate(
    public_key: &KemPublicKey,
) -> Result<(SharedSecret, KemCiphertext), CryptoError> {
    let mut randomness = [0u8; ENCAPS_RANDOMNESS];
    getrandom::getrandom(&mut randomness).map_err(|_| CryptoError::Rng)?;
    let (ct, ss) = mlkem512::encapsulate(&public_key.0, randomness);
    randomness.zeroize();
    Ok((SharedSecret(ss), KemCiphertext(ct)))
}

/// Recover the shared secret from a ciphertext.
pub fn decapsulate(secret_key: &KemSecretKey, ciphertext: &KemCiphertext) -> SharedSecret {
    SharedSecret(mlkem512::decapsulate(&secret_key.0, &ciphertext.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encapsulate_decapsulate_round_trip() {
        let (sk, pk) = keypair().unwrap();
        let (ss1, ct) = encapsulate(&pk).unwrap();
        let ss2 = decapsulate(&sk, &ct);
        assert_eq!(ss1.as_bytes(), ss2.as_bytes());
    }

    #[test]
    fn wrong_key_yields_different_secret() {
        let (_, pk) = keypair().unwrap();
        let (other_sk, _) = keypair().unwrap();
        let (ss1, ct) = encapsulate(&pk).unwrap();
        let ss2 = decapsulate(&other_sk, &ct);
        // Implicit rejection: decapsulation succeeds but disagrees.
        assert_ne!(ss1.as_bytes(), ss2.as_bytes());
    }

    #[test]
    fn public_key_shape_checked() {
        let err = KemPublicKey::from_bytes(&[0u8; 7]).unwrap_err();
        assert!(matches!(
            err,
            CryptoError::Shape { expected: PUBLIC_KEY_SIZE, got: 7 }
        ));
    }

    #[test]
    fn key_bytes_round_trip() {
        let (sk, pk) = keypair().unwrap();
        let pk2 = KemPublicKey::from_bytes(pk.as_bytes()).unwrap();
        let sk2 = KemSecretKey::from_bytes(sk.as_bytes()).unwrap();
        let (ss1, ct) = encapsulate(&pk2).unwrap();
        assert_eq!(ss1.as_bytes(), decapsulate(&sk2, &ct).as_bytes());
    }
}
