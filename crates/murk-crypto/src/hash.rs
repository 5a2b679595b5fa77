use sha2::{Digest, Sha256};

use crate::b64;

/// Version prefix of the user-identifier digest. Changing the key
/// scheme must change this prefix so identifiers cannot collide across
/// schemes.
const ID_VERSION: &[u8] = b"KEM-SIG-v1:";

pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut h = Sha256::new();
    h.update(data);
    let out = h.finalize();
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&out);
    arr
}

fn id_digest(kem_pub: &[u8], sig_pub: &[u8]) -> [u8; 32] {
    // Canonical serialization: version prefix, then each key
    // length-prefixed with a 4-byte big-endian integer.
    let mut h = Sha256::new();
    h.update(ID_VERSION);
    h.update((kem_pub.len() as u32).to_be_bytes());
    h.update(kem_pub);
    h.update((sig_pub.len() as u32).to_be_bytes());
    h.update(sig_pub);
    let out = h.finalize();
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&out);
    arr
}

/// Content-derived user identifier: URL-safe unpadded base64 of the
/// digest over both public keys. A given key pair always maps to the
/// same identifier.
pub fn user_id_base64url(kem_pub: &[u8], sig_pub: &[u8]) -> String {
    b64::encode(&id_digest(kem_pub, sig_pub))
}

/// Hex form of the same digest, optionally truncated. Used for logs.
pub fn user_id_hex(kem_pub: &[u8], sig_pub: &[u8], truncate: Option<usize>) -> String {
    let digest = id_digest(kem_pub, sig_pub);
    let take = truncate.unwrap_or(digest.len()).min(digest.len());
    digest[..take].iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_is_deterministic() {
        let a = user_id_base64url(b"kem", b"sig");
        let b = user_id_base64url(b"kem", b"sig");
        assert_eq!(a, b);
    }

    #[test]
    fn identifier_depends_on_both_keys() {
        let base = user_id_base64url(b"kem", b"sig");
        assert_ne!(base, user_id_base64url(b"kem2", b"sig"));
        assert_ne!(base, user_id_base64url(b"kem", b"sig2"));
    }

    #[test]
    fn length_prefix_prevents_boundary_shifts() {
        // "ab" + "c" must not collide with "a" + "bc".
        assert_ne!(user_id_base64url(b"ab", b"c"), user_id_base64url(b"a", b"bc"));
    }

    #[test]
    fn hex_truncation() {
        let full = user_id_hex(b"k", b"s", None);
        let short = user_id_hex(b"k", b"s", Some(8));
        assert_eq!(full.len(), 64);
        assert_eq!(short.len(), 16);
        assert!(full.starts_with(&short));
    }
}
