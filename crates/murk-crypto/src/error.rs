use thiserror::Error;

/// Errors from the low-level primitives.
///
/// `Authentication` covers both an AEAD tag mismatch and a failed
/// key-bundle password check; `Shape` covers key or ciphertext material
/// of the wrong length.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("authentication failed")]
    Authentication,
    #[error("malformed key material: expected {expected} bytes, got {got}")]
    Shape { expected: usize, got: usize },
    #[error("random source unavailable")]
    Rng,
    #[error("signing failed")]
    Signing,
}
