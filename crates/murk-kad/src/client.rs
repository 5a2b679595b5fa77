//! Client side of the DHT protocol.

use std::collections::HashSet;
use std::time::Duration;

use tracing::{debug, warn};

use crate::wire::{
    FindValueResponse, IdResponse, KeyRequest, OkResponse, PingRequest, StoreRequest,
};

/// Per-request timeout for ordinary DHT calls.
const DHT_TIMEOUT: Duration = Duration::from_secs(10);
/// Bootstrap gets longer because the target may be cold-starting.
const BOOTSTRAP_TIMEOUT: Duration = Duration::from_secs(30);
/// Neighbor-hop timeout during iterative lookups.
const LOOKUP_HOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Depth bound for the iterative value lookup.
const MAX_LOOKUP_DEPTH: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("bootstrap failed")]
    Bootstrap,
}

/// Talks to one local DHT node and, through it, to the network. The
/// client is scoped to a task; dropping it releases its connections.
pub struct DhtClient {
    host: String,
    port: u16,
    http: reqwest::Client,
}

impl DhtClient {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port, http: reqwest::Client::new() }
    }

    fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub async fn get_id(&self) -> Result<String, ClientError> {
        let resp: IdResponse = self
            .http
            .get(format!("{}/id", self.base_url()))
            .timeout(DHT_TIMEOUT)
            .send()
            .await?
            .json()
            .await?;
        Ok(resp.id)
    }

    pub async fn ping(&self, our_id: &str, our_ip: &str, our_port: u16) -> Result<String, ClientError> {
        let body = PingRequest { node_id: our_id.into(), ip: our_ip.into(), port: our_port };
        let resp: IdResponse = self
            .http
            .post(format!("{}/ping", self.base_url()))
            .timeout(DHT_TIMEOUT)
            .json(&body)
            .send()
            .await?
            .json()
            .await?;
        Ok(resp.id)
    }

    /// Replicated store through the local node.
    pub async fn set(&self, our_id: &str, key: &str, value: &str) -> Result<bool, ClientError> {
        let body = StoreRequest {
            node_id: our_id.into(),
            ip: self.host.clone(),
            port: self.port,
            key: key.into(),
            value: value.into(),
        };
        let resp: OkResponse = self
            .http
            .post(format!("{}/set", self.base_url()))
            .timeout(DHT_TIMEOUT)
            .json(&body)
            .send()
            .await?
            .json()
            .await?;
        Ok(resp.ok)
    }

    /// Symmetric bootstrap against `target`: tell our node about the
    /// target, then tell the target about us, so both routing tables
    /// learn the pairing from one exchange.
    pub async fn bootstrap(&self, target_host: &str, target_port: u16) -> Result<(), ClientError> {
        let our_id = self.get_id().await?;

        let target_id: IdResponse = self
            .http
            .get(format!("http://{target_host}:{target_port}/id"))
            .timeout(BOOTSTRAP_TIMEOUT)
            .send()
            .await?
            .json()
            .await?;

        let add_target = PingRequest {
            node_id: target_id.id,
            ip: target_host.into(),
            port: target_port,
        };
        let resp: OkResponse = self
            .http
            .post(format!("{}/bootstrap", self.base_url()))
            .timeout(BOOTSTRAP_TIMEOUT)
            .json(&add_target)
            .send()
            .await?
            .json()
            .await?;
        if !resp.ok {
            return Err(ClientError::Bootstrap);
        }

        let add_us = PingRequest { node_id: our_id, ip: self.host.clone(), port: self.port };
        if let Err(e) = self
            .http
            .post(format!("http://{target_host}:{target_port}/bootstrap"))
            .timeout(BOOTSTRAP_TIMEOUT)
            .json(&add_us)
            .send()
            .await
        {
            // We still learned the target; the reverse direction can
            // catch up on the next exchange.
            warn!(target = %format!("{target_host}:{target_port}"), error = %e,
                "symmetric bootstrap reply failed");
        }
        Ok(())
    }

    /// Iterative value lookup, bounded by `MAX_LOOKUP_DEPTH` hops.
    ///
    /// Queries the local node first; on a miss, follows returned
    /// neighbors depth-first, skipping endpoints already visited, and
    /// returns the first value found.
    pub async fn find_value(&self, our_id: &str, key: &str) -> Result<Option<Vec<u8>>, ClientError> {
        let mut visited: HashSet<String> = HashSet::new();
        // (url, depth), newest on top.
        let mut stack: Vec<(String, usize)> = vec![(self.base_url(), 0)];

        while let Some((url, depth)) = stack.pop() {
            if !visited.insert(url.clone()) {
                continue;
            }
            let body = KeyRequest {
                node_id: our_id.into(),
                ip: self.host.clone(),
                port: self.port,
                key: key.into(),
            };
            let timeout = if depth == 0 { DHT_TIMEOUT } else { LOOKUP_HOP_TIMEOUT };
            let resp = match self
                .http
                .post(format!("{url}/find_value"))
                .timeout(timeout)
                .json(&body)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    debug!(%url, error = %e, "lookup hop unreachable");
                    continue;
                }
            };
            let parsed: FindValueResponse = match resp.json().await {
                Ok(p) => p,
                Err(e) => {
                    debug!(%url, error = %e, "lookup hop returned garbage");
                    continue;
                }
            };
            match parsed {
                FindValueResponse::Value { value } => {
                    let bytes =
                        hex::decode(&value).unwrap_or_else(|_| value.as_bytes().to_vec());
                    return Ok(Some(bytes));
                }
                FindValueResponse::Nodes { nodes } => {
                    if depth >= MAX_LOOKUP_DEPTH {
                        continue;
                    }
                    for (_, ip, port) in nodes {
                        let next = format!("http://{ip}:{port}");
                        if !visited.contains(&next) {
                            stack.push((next, depth + 1));
                        }
                    }
                }
            }
        }
        Ok(None)
    }
}
