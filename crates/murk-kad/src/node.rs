//! Node identifiers and the XOR metric.

use sha1::{Digest, Sha1};

/// Size of a node identifier in bytes (160 bits).
pub const ID_SIZE: usize = 20;

/// A 160-bit node identifier. Compared by equality; ordered only
/// through [`Distance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub [u8; ID_SIZE]);

/// XOR distance between two ids, interpreted as a 160-bit big-endian
/// unsigned integer. The derived lexicographic order on the byte array
/// is exactly the numeric order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Distance(pub [u8; ID_SIZE]);

impl NodeId {
    /// Generate a fresh id: the SHA-1 of 20 cryptographically random
    /// bytes.
    pub fn random() -> Self {
        let mut seed = [0u8; ID_SIZE];
        fill_secure_random(&mut seed);
        Self(sha1_digest(&seed))
    }

    /// Parse a wire id: hex first, raw 20-byte UTF-8 as-is, anything
    /// else hashed down to 20 bytes. The wire tolerates peers that
    /// send literal strings where hex is expected; the permissive
    /// parse normalizes them to a fixed width.
    pub fn parse_wire(s: &str) -> Self {
        if let Ok(bytes) = hex::decode(s) {
            if bytes.len() == ID_SIZE {
                let mut arr = [0u8; ID_SIZE];
                arr.copy_from_slice(&bytes);
                return Self(arr);
            }
        }
        let raw = s.as_bytes();
        if raw.len() == ID_SIZE {
            let mut arr = [0u8; ID_SIZE];
            arr.copy_from_slice(raw);
            return Self(arr);
        }
        Self(sha1_digest(raw))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short hex prefix for log lines.
    pub fn prefix(&self) -> String {
        hex::encode(&self.0[..4])
    }

    pub fn distance_to(&self, other: &NodeId) -> Distance {
        let mut out = [0u8; ID_SIZE];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = self.0[i] ^ other.0[i];
        }
        Distance(out)
    }

    pub fn as_bytes(&self) -> &[u8; ID_SIZE] {
        &self.0
    }
}

/// SHA-1 digest of arbitrary bytes, the key-space mapping for DHT
/// keys.
pub fn digest(data: &[u8]) -> NodeId {
    NodeId(sha1_digest(data))
}

fn sha1_digest(data: &[u8]) -> [u8; ID_SIZE] {
    let mut h = Sha1::new();
    h.update(data);
    let out = h.finalize();
    let mut arr = [0u8; ID_SIZE];
    arr.copy_from_slice(&out);
    arr
}

fn fill_secure_random(buf: &mut [u8]) {
    use rand::RngCore;
    rand::rngs::OsRng.fill_bytes(buf);
}

/// A peer in the DHT: identifier plus its HTTP endpoint. Values are
/// immutable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub id: NodeId,
    pub host: String,
    pub port: u16,
}

impl Node {
    pub fn new(id: NodeId, host: impl Into<String>, port: u16) -> Self {
        Self { id, host: host.into(), port }
    }

    /// A placeholder node carrying only an id, used as a lookup
    /// target.
    pub fn from_id(id: NodeId) -> Self {
        Self { id, host: String::new(), port: 0 }
    }

    pub fn distance_to(&self, other: &Node) -> Distance {
        self.id.distance_to(&other.id)
    }

    /// Two nodes share a home iff host and port are equal.
    pub fn same_home_as(&self, other: &Node) -> bool {
        self.host == other.host && self.port == other.port
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

impl std::fmt::Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}:{}", self.id.prefix(), self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_is_symmetric_and_zero_to_self() {
        let a = NodeId::random();
        let b = NodeId::random();
        assert_eq!(a.distance_to(&b), b.distance_to(&a));
        assert_eq!(a.distance_to(&a), Distance([0u8; ID_SIZE]));
    }

    #[test]
    fn distance_orders_numerically() {
        let zero = NodeId([0u8; ID_SIZE]);
        let mut one = [0u8; ID_SIZE];
        one[ID_SIZE - 1] = 1;
        let mut big = [0u8; ID_SIZE];
        big[0] = 1;
        assert!(zero.distance_to(&NodeId(one)) < zero.distance_to(&NodeId(big)));
    }

    #[test]
    fn random_ids_are_distinct() {
        assert_ne!(NodeId::random(), NodeId::random());
    }

    #[test]
    fn wire_parse_hex() {
        let id = NodeId::random();
        assert_eq!(NodeId::parse_wire(&id.to_hex()), id);
    }

    #[test]
    fn wire_parse_falls_back_to_utf8() {
        // 20 raw bytes are taken verbatim.
        let literal = "exactly-twenty-chars";
        assert_eq!(literal.len(), 20);
        let id = NodeId::parse_wire(literal);
        assert_eq!(id.as_bytes(), literal.as_bytes());

        // Other lengths are hashed to keep ids fixed-width.
        let short = NodeId::parse_wire("peer-1");
        assert_eq!(short, digest(b"peer-1"));
    }

    #[test]
    fn same_home() {
        let a = Node::new(NodeId::random(), "127.0.0.1", 8000);
        let b = Node::new(NodeId::random(), "127.0.0.1", 8000);
        let c = Node::new(NodeId::random(), "127.0.0.1", 8001);
        assert!(a.same_home_as(&b));
        assert!(!a.same_home_as(&c));
    }
}
