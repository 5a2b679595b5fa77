//! Wire types for the DHT protocol: JSON bodies, hex-encoded ids and
//! keys, with a permissive hex-or-UTF-8 fallback for peers that send
//! literal strings.

use serde::{Deserialize, Serialize};

use crate::node::{digest, Node, NodeId, ID_SIZE};

fn default_ip() -> String {
    "127.0.0.1".to_string()
}

/// Caller identification carried by every POST. `ip`/`port` default
/// when a peer omits them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingRequest {
    pub node_id: String,
    #[serde(default = "default_ip")]
    pub ip: String,
    #[serde(default)]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreRequest {
    pub node_id: String,
    #[serde(default = "default_ip")]
    pub ip: String,
    #[serde(default)]
    pub port: u16,
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyRequest {
    pub node_id: String,
    #[serde(default = "default_ip")]
    pub ip: String,
    #[serde(default)]
    pub port: u16,
    pub key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdResponse {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OkResponse {
    pub ok: bool,
}

/// Wire triple for a node: `[hex_id, ip, port]`.
pub type WireNode = (String, String, u16);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodesResponse {
    pub nodes: Vec<WireNode>,
}

/// `find_value` answers with exactly one of the two forms.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FindValueResponse {
    Value { value: String },
    Nodes { nodes: Vec<WireNode> },
}

/// Decode a wire key or value: hex when it parses, otherwise the raw
/// UTF-8 bytes of the literal string.
pub fn decode_bytes(s: &str) -> Vec<u8> {
    hex::decode(s).unwrap_or_else(|_| s.as_bytes().to_vec())
}

/// Map arbitrary key bytes into the id space: 20-byte keys are already
/// ids, anything else is digested.
pub fn key_to_id(key: &[u8]) -> NodeId {
    if key.len() == ID_SIZE {
        let mut arr = [0u8; ID_SIZE];
        arr.copy_from_slice(key);
        NodeId(arr)
    } else {
        digest(key)
    }
}

pub fn node_to_wire(node: &Node) -> WireNode {
    (node.id.to_hex(), node.host.clone(), node.port)
}

pub fn node_from_wire(wire: &WireNode) -> Node {
    Node::new(NodeId::parse_wire(&wire.0), wire.1.clone(), wire.2)
}
