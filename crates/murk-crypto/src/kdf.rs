//! Key derivation: HKDF-SHA-256 for per-message AES keys, scrypt for
//! password-derived key-bundle keys.

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use scrypt::Params;
use sha2::Sha256;

use crate::CryptoError;

/// HKDF info string binding derived keys to their purpose.
const AES_KEY_INFO: &[u8] = b"aes_key_derivation";

/// scrypt cost parameters: N=2^14, r=8, p=1.
const SCRYPT_LOG_N: u8 = 14;
const SCRYPT_R: u32 = 8;
const SCRYPT_P: u32 = 1;

const KEYCHECK_INPUT: &[u8] = b"keycheck";

/// Derive the 32-byte AES key for one message from a KEM shared secret.
/// No salt; the shared secret is fresh per encapsulation.
pub fn hkdf_aes_key(shared_secret: &[u8]) -> [u8; 32] {
    let hk = Hkdf::<Sha256>::new(None, shared_secret);
    let mut key = [0u8; 32];
    // Output length equals the digest size, expand cannot fail.
    hk.expand(AES_KEY_INFO, &mut key).unwrap();
    key
}

/// Derive a 32-byte key from a password and salt via scrypt.
pub fn scrypt_key(password: &[u8], salt: &[u8]) -> Result<[u8; 32], CryptoError> {
    // The fixed cost parameters and 32-byte output are valid inputs,
    // neither call can fail.
    let params = Params::new(SCRYPT_LOG_N, SCRYPT_R, SCRYPT_P, 32)
        .expect("fixed scrypt parameters are valid");
    let mut key = [0u8; 32];
    scrypt::scrypt(password, salt, &params, &mut key)
        .expect("output length is fixed and non-zero");
    Ok(key)
}

/// HMAC-SHA-256 password check tag stored alongside the key bundle.
/// Lets a wrong password fail before any private-key ciphertext is
/// touched.
pub fn keycheck(key: &[u8; 32]) -> [u8; 32] {
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(KEYCHECK_INPUT);
    let out = mac.finalize().into_bytes();
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&out);
    arr
}
