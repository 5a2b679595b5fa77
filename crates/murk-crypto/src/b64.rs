//! URL-safe unpadded base64, the encoding of every binary envelope and
//! key-bundle field on the wire and at rest.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

pub fn encode(data: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

pub fn decode(s: &str) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_NO_PAD.decode(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let data = b"\x00\x01\xfe\xff murk";
        assert_eq!(decode(&encode(data)).unwrap(), data);
    }

    #[test]
    fn no_padding() {
        assert!(!encode(b"a").contains('='));
        assert!(!encode(b"ab").contains('='));
    }
}
