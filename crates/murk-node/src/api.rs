//! HTTP surface of the messenger node.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use murk_crypto::envelope::Envelope;

use crate::db::ForwardRecord;
use crate::overlay::{self, NodeState, SendOutcome};

/// Coarse wire status: `OK` or `ERROR`, nothing finer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesResponse {
    pub messages: Vec<ForwardRecord>,
}

/// Build the messenger router over shared node state.
pub fn router(state: Arc<NodeState>) -> Router {
    Router::new()
        .route("/send", post(send))
        .route("/get_messages/:identifier", post(get_messages))
        .route("/health", get(health))
        .with_state(state)
}

async fn send(
    State(state): State<Arc<NodeState>>,
    Json(envelope): Json<Envelope>,
) -> Json<StatusResponse> {
    let outcome = overlay::handle_envelope(state, envelope).await;
    let status = match outcome {
        SendOutcome::Ok => "OK",
        SendOutcome::Error => "ERROR",
    };
    Json(StatusResponse { status: status.to_string() })
}

/// Pending pickup for an offline recipient that has come back.
async fn get_messages(
    State(state): State<Arc<NodeState>>,
    Path(identifier): Path<String>,
) -> Json<MessagesResponse> {
    let messages = state.db.forwards_for(&identifier).await.unwrap_or_default();
    Json(MessagesResponse { messages })
}

async fn health(State(state): State<Arc<NodeState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "identifier": state.messenger.user_id().as_str(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
