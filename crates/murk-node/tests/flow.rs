//! End-to-end messenger flows over real HTTP on loopback.

use std::sync::Arc;

use murk_crypto::{b64, Identity};
use murk_node::api::StatusResponse;
use murk_node::{api, Messenger, MessengerDb, NodeState};

/// Spawn a messenger node on an ephemeral port. Returns its state and
/// the externally reachable address.
async fn spawn_node() -> (Arc<NodeState>, String) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let addr = format!("http://127.0.0.1:{port}");

    let messenger = Messenger::new(Identity::generate().unwrap(), addr.clone());
    let state = Arc::new(NodeState::new(messenger, Arc::new(MessengerDb::open_in_memory().unwrap())));

    let app = api::router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (state, addr)
}

async fn post_send(addr: &str, envelope: &murk_crypto::Envelope) -> StatusResponse {
    reqwest::Client::new()
        .post(format!("{addr}/send"))
        .json(envelope)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

#[tokio::test]
async fn round_trip_between_two_nodes() {
    let (bob_state, bob_addr) = spawn_node().await;

    let alice = Messenger::new(Identity::generate().unwrap(), "http://127.0.0.1:1");
    let bob_contact = bob_state.messenger.contact_card().into_contact();
    let envelope = alice.seal_for(&bob_contact, b"hello", 1_700_000_000.0).unwrap();

    let resp = post_send(&bob_addr, &envelope).await;
    assert_eq!(resp.status, "OK");

    let inbox = bob_state.db.list_messages(None).await.unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(b64::decode(&inbox[0].content).unwrap(), b"hello");
    assert_eq!(inbox[0].sender_id, alice.user_id().as_str());
    assert_eq!(inbox[0].timestamp, "1700000000");
}

#[tokio::test]
async fn duplicate_suppression() {
    let (bob_state, bob_addr) = spawn_node().await;

    let alice = Messenger::new(Identity::generate().unwrap(), "http://127.0.0.1:1");
    let bob_contact = bob_state.messenger.contact_card().into_contact();
    let envelope = alice.seal_for(&bob_contact, b"once", 1_700_000_000.0).unwrap();

    assert_eq!(post_send(&bob_addr, &envelope).await.status, "OK");
    assert_eq!(post_send(&bob_addr, &envelope).await.status, "OK");

    assert_eq!(bob_state.db.list_messages(None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn tampered_envelope_rejected() {
    let (bob_state, bob_addr) = spawn_node().await;

    let alice = Messenger::new(Identity::generate().unwrap(), "http://127.0.0.1:1");
    let bob_contact = bob_state.messenger.contact_card().into_contact();
    let mut envelope = alice.seal_for(&bob_contact, b"payload", 1_700_000_000.0).unwrap();

    let mut ct = b64::decode(&envelope.message_ciphertext).unwrap();
    ct[0] ^= 0x01;
    envelope.message_ciphertext = b64::encode(&ct);

    assert_eq!(post_send(&bob_addr, &envelope).await.status, "ERROR");
    assert!(bob_state.db.list_messages(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn offline_recipient_queued_at_intermediary_and_picked_up() {
    // Sender knows the (unreachable) recipient and one reachable
    // intermediary; the intermediary knows the recipient too.
    let (intermediary_state, intermediary_addr) = spawn_node().await;

    let sender = Messenger::new(Identity::generate().unwrap(), "http://127.0.0.1:1");
    let recipient = Messenger::new(Identity::generate().unwrap(), "http://127.0.0.1:1");

    let sender_db = MessengerDb::open_in_memory().unwrap();
    sender_db.add_contact(&recipient.contact_card().into_contact()).await.unwrap();
    sender_db
        .add_contact(&murk_node::Contact {
            identifier: intermediary_state.messenger.user_id().as_str().to_string(),
            name: None,
            addr: intermediary_addr.clone(),
            kem_public_key: b64::encode(
                intermediary_state.messenger.identity().kem_public().as_bytes(),
            ),
            sig_public_key: b64::encode(
                intermediary_state.messenger.identity().sig_public().as_bytes(),
            ),
        })
        .await
        .unwrap();

    // The intermediary knows the recipient as a contact.
    intermediary_state
        .db
        .add_contact(&recipient.contact_card().into_contact())
        .await
        .unwrap();

    // Direct delivery fails, the overlay injection reaches the
    // intermediary, which queues a forward record.
    let http = reqwest::Client::new();
    sender
        .send_text(
            &sender_db,
            &http,
            None,
            recipient.user_id().as_str(),
            b"catch me later",
            1_700_000_000.0,
        )
        .await
        .unwrap();

    let queued = intermediary_state
        .db
        .forwards_for(recipient.user_id().as_str())
        .await
        .unwrap();
    assert_eq!(queued.len(), 1);

    // The recipient comes back and polls the intermediary.
    let resp: murk_node::api::MessagesResponse = http
        .post(format!("{intermediary_addr}/get_messages/{}", recipient.user_id()))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(resp.messages.len(), 1);
    assert_eq!(resp.messages[0].recipient_identifier, recipient.user_id().as_str());

    // The queued ciphertext still opens at the real recipient.
    let envelope = murk_crypto::Envelope {
        current_node_identifier: String::new(),
        recipient_identifier: resp.messages[0].recipient_identifier.clone(),
        shared_secret_ciphertext: resp.messages[0].shared_secret_ciphertext.clone(),
        message_ciphertext: resp.messages[0].message_ciphertext.clone(),
        nonce: resp.messages[0].nonce.clone(),
        signature: resp.messages[0].signature.clone(),
        ttl: 0,
        max_recursive_contact: 0,
    };
    let opened = recipient.open(&envelope).unwrap();
    assert_eq!(opened.message, b"catch me later");
}
