//! The DHT node: shared routing table, replicated storage, and the
//! operations behind the wire endpoints.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::node::{Node, NodeId};
use crate::routing::RoutingTable;
use crate::storage::{now_unix, KvStorage, StorageError};
use crate::wire::{self, StoreRequest};

/// Per-request timeout for remote store calls.
const STORE_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of a local value lookup: either the value itself or the
/// nearest known nodes to keep searching through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Value(Vec<u8>),
    Neighbors(Vec<Node>),
}

/// One DHT participant. Handlers share it behind an `Arc`; the
/// routing table sits behind a read-write lock because neighbor reads
/// dominate, and storage serializes itself internally.
pub struct DhtNode {
    local: Node,
    ksize: usize,
    routing: RwLock<RoutingTable>,
    storage: Arc<dyn KvStorage>,
    http: reqwest::Client,
}

impl DhtNode {
    pub fn new(local: Node, ksize: usize, storage: Arc<dyn KvStorage>) -> Self {
        let routing = RwLock::new(RoutingTable::new(local.clone(), ksize));
        Self { local, ksize, routing, storage, http: reqwest::Client::new() }
    }

    /// Node with a freshly generated random id.
    pub fn with_random_id(
        host: impl Into<String>,
        port: u16,
        ksize: usize,
        storage: Arc<dyn KvStorage>,
    ) -> Self {
        Self::new(Node::new(NodeId::random(), host, port), ksize, storage)
    }

    pub fn local(&self) -> &Node {
        &self.local
    }

    pub fn ksize(&self) -> usize {
        self.ksize
    }

    pub fn storage(&self) -> &Arc<dyn KvStorage> {
        &self.storage
    }

    /// Restore peers remembered from a previous run, skipping our own
    /// id. Restored nodes go straight into the routing table without a
    /// ping.
    pub async fn restore_known_nodes(&self) -> Result<usize, StorageError> {
        let max_age = self.storage.ttl_secs() as f64;
        let nodes = self.storage.known_nodes(Some(max_age)).await?;
        let mut restored = 0;
        let mut routing = self.routing.write().await;
        for node in nodes {
            if node.id != self.local.id {
                routing.add_contact(node);
                restored += 1;
            }
        }
        if restored > 0 {
            info!(count = restored, "restored known nodes");
        }
        Ok(restored)
    }

    /// Add a caller to the routing table the first time it is seen,
    /// and remember it durably.
    pub async fn welcome_if_new(&self, node: Node) {
        if node.id == self.local.id {
            return;
        }
        {
            let routing = self.routing.read().await;
            if !routing.is_new(&node) {
                return;
            }
        }
        debug!(node = %node, "welcoming new contact");
        self.routing.write().await.add_contact(node.clone());
        if let Err(e) = self.storage.store_node(&node).await {
            warn!(node = %node, error = %e, "failed to persist known node");
        }
    }

    pub async fn find_neighbors(&self, target: &NodeId, k: usize) -> Vec<Node> {
        self.routing.read().await.find_neighbors(target, k)
    }

    pub async fn store_local(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        self.storage.set(key, value, now_unix()).await
    }

    /// Local lookup: the unexpired value when held, the nearest known
    /// nodes otherwise.
    pub async fn lookup_local(&self, key: &[u8]) -> Result<Lookup, StorageError> {
        if let Some(value) = self.storage.get(key).await? {
            return Ok(Lookup::Value(value));
        }
        let target = wire::key_to_id(key);
        Ok(Lookup::Neighbors(self.find_neighbors(&target, self.ksize).await))
    }

    /// Replicate `(key, value)` to the `ksize` nodes nearest the key.
    ///
    /// The value is also stored locally when no neighbors are known,
    /// or when the local node is closer to the key than the farthest
    /// chosen neighbor. Success means at least one remote store was
    /// acknowledged.
    pub async fn set_digest(&self, key: &[u8], value: &[u8]) -> Result<bool, StorageError> {
        let target = wire::key_to_id(key);
        let nearest = self.find_neighbors(&target, self.ksize).await;

        if nearest.is_empty() {
            self.store_local(key, value).await?;
            debug!(key = %hex::encode(key), "no neighbors, stored locally only");
            return Ok(false);
        }

        let farthest = nearest
            .iter()
            .map(|n| n.id.distance_to(&target))
            .max()
            .expect("nearest is non-empty");
        if self.local.id.distance_to(&target) < farthest {
            self.store_local(key, value).await?;
        }

        let mut any_ok = false;
        for node in &nearest {
            let ok = self.call_store(node, key, value).await;
            debug!(target = %node, ok, "replicated store");
            any_ok |= ok;
        }
        Ok(any_ok)
    }

    /// POST a store to one peer. Failures are reported as `false`;
    /// replication treats each peer independently.
    pub async fn call_store(&self, node: &Node, key: &[u8], value: &[u8]) -> bool {
        let body = StoreRequest {
            node_id: self.local.id.to_hex(),
            ip: self.local.host.clone(),
            port: self.local.port,
            key: hex::encode(key),
            value: hex::encode(value),
        };
        let url = format!("{}/store", node.base_url());
        match self.http.post(&url).timeout(STORE_TIMEOUT).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                warn!(target = %node, status = %resp.status(), "store rejected");
                false
            }
            Err(e) => {
                warn!(target = %node, error = %e, "store failed");
                false
            }
        }
    }

    /// Welcome `target` locally and ask it to welcome us back.
    /// Symmetric bootstrap is what lets two- and three-node networks
    /// converge without extra traffic.
    pub async fn bootstrap_to(&self, host: &str, port: u16) -> Result<(), BootstrapError> {
        let url = format!("http://{host}:{port}/id");
        let resp = self
            .http
            .get(&url)
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(BootstrapError::Unreachable)?;
        let id: wire::IdResponse = resp.json().await.map_err(BootstrapError::Unreachable)?;

        let target = Node::new(NodeId::parse_wire(&id.id), host, port);
        self.welcome_if_new(target.clone()).await;

        let body = crate::wire::PingRequest {
            node_id: self.local.id.to_hex(),
            ip: self.local.host.clone(),
            port: self.local.port,
        };
        let url = format!("{}/bootstrap", target.base_url());
        self.http
            .post(&url)
            .timeout(Duration::from_secs(30))
            .json(&body)
            .send()
            .await
            .map_err(BootstrapError::Unreachable)?;
        info!(target = %target, "bootstrapped");
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("bootstrap target unreachable: {0}")]
    Unreachable(#[source] reqwest::Error),
}
