//! AES-256-GCM with fresh random nonces.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};

use crate::CryptoError;

/// AEAD nonce size in bytes.
pub const NONCE_SIZE: usize = 12;
/// AEAD key size in bytes.
pub const KEY_SIZE: usize = 32;

/// Encrypt `plaintext` under `key` with a fresh random 12-byte nonce.
pub fn encrypt(key: &[u8; KEY_SIZE], plaintext: &[u8]) -> Result<(Vec<u8>, [u8; NONCE_SIZE]), CryptoError> {
    let mut nonce = [0u8; NONCE_SIZE];
    getrandom::getrandom(&mut nonce).map_err(|_| CryptoError::Rng)?;

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), Payload { msg: plaintext, aad: &[] })
        .map_err(|_| CryptoError::Authentication)?;
    Ok((ciphertext, nonce))
}

/// Encrypt under a caller-supplied nonce. The key-bundle format
/// encrypts both private keys under one stored nonce; every other path
/// uses `encrypt` with a fresh nonce.
pub fn encrypt_with_nonce(
    key: &[u8; KEY_SIZE],
    nonce: &[u8; NONCE_SIZE],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher
        .encrypt(Nonce::from_slice(nonce), Payload { msg: plaintext, aad: &[] })
        .map_err(|_| CryptoError::Authentication)
}

/// Decrypt and authenticate. A tag mismatch is indistinguishable from
/// any other tamper and surfaces as `CryptoError::Authentication`.
pub fn decrypt(
    key: &[u8; KEY_SIZE],
    nonce: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let nonce: [u8; NONCE_SIZE] = nonce.try_into().map_err(|_| CryptoError::Shape {
        expected: NONCE_SIZE,
        got: nonce.len(),
    })?;
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher
        .decrypt(Nonce::from_slice(&nonce), Payload { msg: ciphertext, aad: &[] })
        .map_err(|_| CryptoError::Authentication)
}
