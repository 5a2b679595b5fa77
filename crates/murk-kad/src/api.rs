//! HTTP surface of the DHT node.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use tracing::debug;

use crate::node::{Node, NodeId};
use crate::service::{DhtNode, Lookup};
use crate::wire::{
    self, FindValueResponse, IdResponse, KeyRequest, NodesResponse, OkResponse, PingRequest,
    StoreRequest,
};

/// Build the DHT router over a shared node.
pub fn router(node: Arc<DhtNode>) -> Router {
    Router::new()
        .route("/id", get(get_id))
        .route("/ping", post(ping))
        .route("/store", post(store))
        .route("/set", post(set_value))
        .route("/bootstrap", post(bootstrap))
        .route("/find_node", post(find_node))
        .route("/find_value", post(find_value))
        .with_state(node)
}

fn caller(node_id: &str, ip: &str, port: u16) -> Node {
    Node::new(NodeId::parse_wire(node_id), ip, port)
}

async fn get_id(State(node): State<Arc<DhtNode>>) -> Json<IdResponse> {
    Json(IdResponse { id: node.local().id.to_hex() })
}

async fn ping(State(node): State<Arc<DhtNode>>, Json(req): Json<PingRequest>) -> Json<IdResponse> {
    node.welcome_if_new(caller(&req.node_id, &req.ip, req.port)).await;
    Json(IdResponse { id: node.local().id.to_hex() })
}

async fn store(State(node): State<Arc<DhtNode>>, Json(req): Json<StoreRequest>) -> Json<OkResponse> {
    node.welcome_if_new(caller(&req.node_id, &req.ip, req.port)).await;
    let key = wire::decode_bytes(&req.key);
    let value = wire::decode_bytes(&req.value);
    let ok = node.store_local(&key, &value).await.is_ok();
    debug!(key = %req.key, ok, "store");
    Json(OkResponse { ok })
}

/// Store by digest and replicate to the k nearest nodes.
async fn set_value(
    State(node): State<Arc<DhtNode>>,
    Json(req): Json<StoreRequest>,
) -> Json<OkResponse> {
    node.welcome_if_new(caller(&req.node_id, &req.ip, req.port)).await;
    let key = wire::decode_bytes(&req.key);
    let value = wire::decode_bytes(&req.value);
    let ok = node.set_digest(&key, &value).await.unwrap_or(false);
    debug!(key = %req.key, ok, "set");
    Json(OkResponse { ok })
}

/// The receiver's half of a symmetric bootstrap: welcome the caller.
/// The caller's client welcomes us from our `/id` response.
async fn bootstrap(
    State(node): State<Arc<DhtNode>>,
    Json(req): Json<PingRequest>,
) -> Json<OkResponse> {
    node.welcome_if_new(caller(&req.node_id, &req.ip, req.port)).await;
    Json(OkResponse { ok: true })
}

async fn find_node(
    State(node): State<Arc<DhtNode>>,
    Json(req): Json<KeyRequest>,
) -> Json<NodesResponse> {
    node.welcome_if_new(caller(&req.node_id, &req.ip, req.port)).await;
    let key = wire::decode_bytes(&req.key);
    let target = wire::key_to_id(&key);
    let neighbors = node.find_neighbors(&target, node.ksize()).await;
    debug!(key = %req.key, found = neighbors.len(), "find_node");
    Json(NodesResponse { nodes: neighbors.iter().map(wire::node_to_wire).collect() })
}

async fn find_value(
    State(node): State<Arc<DhtNode>>,
    Json(req): Json<KeyRequest>,
) -> Json<FindValueResponse> {
    node.welcome_if_new(caller(&req.node_id, &req.ip, req.port)).await;
    let key = wire::decode_bytes(&req.key);
    match node.lookup_local(&key).await {
        Ok(Lookup::Value(value)) => {
            debug!(key = %req.key, found = true, "find_value");
            Json(FindValueResponse::Value { value: hex::encode(value) })
        }
        Ok(Lookup::Neighbors(nodes)) => {
            debug!(key = %req.key, found = false, neighbors = nodes.len(), "find_value");
            Json(FindValueResponse::Nodes {
                nodes: nodes.iter().map(wire::node_to_wire).collect(),
            })
        }
        Err(_) => Json(FindValueResponse::Nodes { nodes: Vec::new() }),
    }
}
