//! The store-and-forward overlay.
//!
//! Every inbound envelope is deduplicated by signature, opened when
//! addressed to this node, and otherwise re-injected toward a random
//! subset of contacts with randomized TTL and fanout decrements. The
//! randomness blurs hop distance and traffic shape for observers; the
//! seen history makes delivery idempotent.

use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, info, warn};

use murk_crypto::envelope::Envelope;
use murk_crypto::b64;

use crate::db::{Contact, ForwardRecord, MessengerDb, StoredMessage};
use crate::messenger::{post_envelope, Messenger};

/// Outcome reported on the wire: deliberately coarse so peers learn
/// nothing about which validation step failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Ok,
    Error,
}

/// Shared state of a running node.
pub struct NodeState {
    pub messenger: Messenger,
    pub db: Arc<MessengerDb>,
    pub http: reqwest::Client,
}

impl NodeState {
    pub fn new(messenger: Messenger, db: Arc<MessengerDb>) -> Self {
        Self { messenger, db, http: reqwest::Client::new() }
    }
}

/// Inbound policy for one envelope.
///
/// The seen-signature insert commits before any background work is
/// scheduled, so a cancelled request can never leave a forward task
/// running for an unrecorded envelope.
pub async fn handle_envelope(state: Arc<NodeState>, envelope: Envelope) -> SendOutcome {
    let signature = envelope.signature.clone();

    // Idempotent delivery: a replayed signature is acknowledged and
    // dropped without touching anything else.
    match state.db.seen_insert(&signature).await {
        Ok(true) => {}
        Ok(false) => {
            debug!(signature = %sig_prefix(&signature), "duplicate envelope dropped");
            return SendOutcome::Ok;
        }
        Err(e) => {
            warn!(error = %e, "seen history unavailable");
            return SendOutcome::Error;
        }
    }

    if envelope.recipient_identifier == state.messenger.user_id().as_str() {
        return deliver_local(&state, &envelope).await;
    }

    forward_path(state, envelope).await;
    SendOutcome::Ok
}

/// The envelope is ours: open, learn the sender, persist.
async fn deliver_local(state: &NodeState, envelope: &Envelope) -> SendOutcome {
    let opened = match state.messenger.open(envelope) {
        Ok(opened) => opened,
        Err(e) => {
            // Coarse ERROR on the wire; the detailed cause stays in
            // our logs.
            info!(error = %e, "envelope rejected");
            return SendOutcome::Error;
        }
    };

    let sender_known =
        matches!(state.db.get_contact(opened.sender_id.as_str()).await, Ok(Some(_)));
    if !sender_known {
        let contact = Contact {
            identifier: opened.sender_id.as_str().to_string(),
            name: None,
            addr: opened.sender_addr.clone(),
            kem_public_key: b64::encode(&opened.kem_public),
            sig_public_key: b64::encode(&opened.sig_public),
        };
        if let Err(e) = state.db.add_contact(&contact).await {
            warn!(error = %e, "failed to add sender contact");
        } else {
            info!(sender = %opened.sender_id.prefix(), "added sender as contact");
        }
    }

    let stored = StoredMessage {
        content: b64::encode(&opened.message),
        timestamp: opened.timestamp.to_string(),
        sender_id: opened.sender_id.as_str().to_string(),
        recipient_id: Some(state.messenger.user_id().as_str().to_string()),
    };
    if let Err(e) = state.db.add_message(&stored).await {
        warn!(error = %e, "failed to persist message");
        return SendOutcome::Error;
    }
    info!(sender = %opened.sender_id.prefix(), "message delivered");
    SendOutcome::Ok
}

/// Not for us: queue for a known recipient, decrement budgets with
/// per-hop randomness, and hand off to a detached forward task.
async fn forward_path(state: Arc<NodeState>, envelope: Envelope) {
    let mut outgoing = envelope.clone();
    let origin_sender = envelope.current_node_identifier.clone();

    let recipient_known = matches!(
        state.db.get_contact(&envelope.recipient_identifier).await,
        Ok(Some(_))
    );
    if recipient_known {
        let record = ForwardRecord {
            recipient_identifier: envelope.recipient_identifier.clone(),
            shared_secret_ciphertext: envelope.shared_secret_ciphertext.clone(),
            message_ciphertext: envelope.message_ciphertext.clone(),
            nonce: envelope.nonce.clone(),
            signature: envelope.signature.clone(),
            created_at: unix_now(),
        };
        if let Err(e) = state.db.add_forward(&record).await {
            warn!(error = %e, "failed to queue forward record");
        }
        // Only known-recipient hops consume the recursive-contact
        // budget; the decrement is randomized against hop counting.
        outgoing.max_recursive_contact -= rand::thread_rng().gen_range(0..=2);
    }

    outgoing.current_node_identifier = state.messenger.user_id().as_str().to_string();
    // Randomized TTL decrement: observers cannot recover the exact
    // distance to the origin.
    outgoing.ttl -= rand::thread_rng().gen_range(0..=2);

    debug!(
        recipient = %id_prefix(&outgoing.recipient_identifier),
        ttl = outgoing.ttl,
        max_recursive = outgoing.max_recursive_contact,
        "scheduling forward task"
    );
    // Detached: the inbound request answers immediately and its
    // cancellation cannot reach this task.
    tokio::spawn(forward_task(state, outgoing, origin_sender));
}

/// Background dissemination of one envelope toward a random subset of
/// contacts.
pub async fn forward_task(state: Arc<NodeState>, envelope: Envelope, origin_sender: String) {
    if envelope.ttl <= 0 || envelope.max_recursive_contact <= 0 {
        debug!(
            ttl = envelope.ttl,
            max_recursive = envelope.max_recursive_contact,
            "envelope budget exhausted, dropped"
        );
        return;
    }

    let contacts = match state.db.list_contacts().await {
        Ok(contacts) => contacts,
        Err(e) => {
            warn!(error = %e, "cannot list contacts for forwarding");
            return;
        }
    };
    let eligible: Vec<Contact> =
        contacts.into_iter().filter(|c| c.identifier != origin_sender).collect();
    if eligible.is_empty() {
        debug!("no eligible contacts, envelope dropped");
        return;
    }

    let selected = select_fanout(&eligible);
    debug!(selected = selected.len(), total = eligible.len(), "forwarding to random subset");

    for contact in selected {
        let ok = post_envelope(&state.http, &contact.addr, &envelope).await;
        if ok {
            debug!(target = %id_prefix(&contact.identifier), "forwarded");
            if contact.identifier == envelope.recipient_identifier {
                // The final recipient is reachable again; the queued
                // copy is no longer needed.
                match state.db.delete_forwards_for(&envelope.recipient_identifier).await {
                    Ok(n) if n > 0 => {
                        info!(recipient = %id_prefix(&contact.identifier), removed = n,
                            "delivered to final recipient, queue cleared")
                    }
                    _ => {}
                }
                return;
            }
        } else {
            debug!(target = %id_prefix(&contact.identifier), "forward attempt failed");
        }
    }
}

/// Pick a random subset of contacts: a fanout drawn uniformly from
/// [30%, 70%] of the pool, at least one, never more than the pool.
/// Sampling keeps per-node traffic sublinear and the spread pattern
/// unpredictable.
fn select_fanout(eligible: &[Contact]) -> Vec<Contact> {
    let total = eligible.len();
    let lo = ((total as f64 * 0.3) as usize).max(1);
    let hi = ((total as f64 * 0.7) as usize).clamp(lo, total);

    let mut rng = rand::thread_rng();
    let n = rng.gen_range(lo..=hi);
    eligible.choose_multiple(&mut rng, n).cloned().collect()
}

fn unix_now() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

fn sig_prefix(signature: &str) -> &str {
    &signature[..signature.len().min(8)]
}

fn id_prefix(identifier: &str) -> &str {
    &identifier[..identifier.len().min(8)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use murk_crypto::Identity;

    fn state() -> Arc<NodeState> {
        let messenger =
            Messenger::new(Identity::generate().unwrap(), "http://127.0.0.1:8000");
        Arc::new(NodeState::new(messenger, Arc::new(MessengerDb::open_in_memory().unwrap())))
    }

    fn contact(id: &str) -> Contact {
        Contact {
            identifier: id.to_string(),
            name: None,
            // An unroutable port: forward posts fail fast.
            addr: "http://127.0.0.1:1".to_string(),
            kem_public_key: "a2Vt".to_string(),
            sig_public_key: "c2ln".to_string(),
        }
    }

    fn envelope_between(sender: &Messenger, recipient: &Messenger, text: &[u8]) -> Envelope {
        sender
            .seal_for(&recipient.contact_card().into_contact(), text, 1_700_000_000.0)
            .unwrap()
    }

    #[test]
    fn fanout_bounds() {
        for total in 1..=40usize {
            let pool: Vec<Contact> =
                (0..total).map(|i| contact(&format!("c{i}"))).collect();
            for _ in 0..8 {
                let picked = select_fanout(&pool);
                assert!(!picked.is_empty());
                assert!(picked.len() <= total);
                if total >= 4 {
                    assert!(picked.len() <= (total as f64 * 0.7) as usize);
                }
                // No contact chosen twice.
                let mut ids: Vec<_> =
                    picked.iter().map(|c| c.identifier.clone()).collect();
                ids.sort();
                ids.dedup();
                assert_eq!(ids.len(), picked.len());
            }
        }
    }

    #[tokio::test]
    async fn round_trip_delivery() {
        let state = state();
        let alice = Messenger::new(Identity::generate().unwrap(), "http://127.0.0.1:8009");
        let envelope = envelope_between(&alice, &state.messenger, b"hello");

        let outcome = handle_envelope(state.clone(), envelope).await;
        assert_eq!(outcome, SendOutcome::Ok);

        let inbox = state.db.list_messages(None).await.unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(b64::decode(&inbox[0].content).unwrap(), b"hello");
        assert_eq!(inbox[0].sender_id, alice.user_id().as_str());

        // The sender was learned as a contact, reply address included.
        let learned = state.db.get_contact(alice.user_id().as_str()).await.unwrap().unwrap();
        assert_eq!(learned.addr, "http://127.0.0.1:8009");
    }

    #[tokio::test]
    async fn duplicate_delivery_is_idempotent() {
        let state = state();
        let alice = Messenger::new(Identity::generate().unwrap(), "http://127.0.0.1:8009");
        let envelope = envelope_between(&alice, &state.messenger, b"once");

        assert_eq!(handle_envelope(state.clone(), envelope.clone()).await, SendOutcome::Ok);
        assert_eq!(handle_envelope(state.clone(), envelope).await, SendOutcome::Ok);

        assert_eq!(state.db.list_messages(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn tampered_envelope_rejected_without_state_change() {
        let state = state();
        let alice = Messenger::new(Identity::generate().unwrap(), "http://127.0.0.1:8009");
        let mut envelope = envelope_between(&alice, &state.messenger, b"hello");

        let mut ct = b64::decode(&envelope.message_ciphertext).unwrap();
        ct[0] ^= 0x01;
        envelope.message_ciphertext = b64::encode(&ct);

        assert_eq!(handle_envelope(state.clone(), envelope).await, SendOutcome::Error);
        assert!(state.db.list_messages(None).await.unwrap().is_empty());
        assert!(state.db.list_contacts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn foreign_envelope_for_known_recipient_is_queued() {
        let state = state();
        let alice = Messenger::new(Identity::generate().unwrap(), "http://127.0.0.1:8009");
        let carol = Messenger::new(Identity::generate().unwrap(), "http://127.0.0.1:8010");

        // Carol is a known contact of ours; the envelope is for her.
        state
            .db
            .add_contact(&carol.contact_card().into_contact())
            .await
            .unwrap();
        let envelope = envelope_between(&alice, &carol, b"for carol");
        let signature = envelope.signature.clone();

        assert_eq!(handle_envelope(state.clone(), envelope).await, SendOutcome::Ok);

        let queued = state.db.forwards_for(carol.user_id().as_str()).await.unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].signature, signature);
        // Nothing landed in our own inbox.
        assert!(state.db.list_messages(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn second_copy_produces_no_second_forward_record() {
        let state = state();
        let alice = Messenger::new(Identity::generate().unwrap(), "http://127.0.0.1:8009");
        let carol = Messenger::new(Identity::generate().unwrap(), "http://127.0.0.1:8010");

        state.db.add_contact(&carol.contact_card().into_contact()).await.unwrap();
        let envelope = envelope_between(&alice, &carol, b"dup");

        handle_envelope(state.clone(), envelope.clone()).await;
        handle_envelope(state.clone(), envelope).await;

        assert_eq!(state.db.forwards_for(carol.user_id().as_str()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn exhausted_ttl_task_posts_nothing() {
        let state = state();
        state.db.add_contact(&contact("peer-a")).await.unwrap();

        let alice = Messenger::new(Identity::generate().unwrap(), "http://127.0.0.1:8009");
        let carol = Messenger::new(Identity::generate().unwrap(), "http://127.0.0.1:8010");
        let mut envelope = envelope_between(&alice, &carol, b"dead");
        envelope.ttl = 0;

        // Returns immediately without attempting any post; a hang here
        // would trip the test timeout.
        forward_task(state.clone(), envelope, "origin".to_string()).await;
    }

    #[tokio::test]
    async fn forward_task_skips_origin_sender() {
        let state = state();
        // The only contact is the node the envelope came from.
        state.db.add_contact(&contact("origin-node")).await.unwrap();

        let alice = Messenger::new(Identity::generate().unwrap(), "http://127.0.0.1:8009");
        let carol = Messenger::new(Identity::generate().unwrap(), "http://127.0.0.1:8010");
        let envelope = envelope_between(&alice, &carol, b"loop");

        // No eligible contacts: the task drops the envelope without
        // posting anywhere.
        forward_task(state.clone(), envelope, "origin-node".to_string()).await;
    }
}
