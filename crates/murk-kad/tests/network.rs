//! Multi-node DHT tests over real HTTP on loopback.

use std::sync::Arc;

use murk_kad::{router, DhtClient, DhtNode, MemoryStorage};

/// Spawn a DHT node on an ephemeral loopback port and return it with
/// its bound port.
async fn spawn_node(ksize: usize) -> (Arc<DhtNode>, u16) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let node = Arc::new(DhtNode::with_random_id(
        "127.0.0.1",
        port,
        ksize,
        Arc::new(MemoryStorage::new()),
    ));
    let app = router(node.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (node, port)
}

#[tokio::test]
async fn triangle_replication_respects_ksize() {
    // Three nodes, ksize=1: replication reaches only the nearest
    // neighbor. A-B and B-C are bootstrapped, A-C is not.
    let (node_a, port_a) = spawn_node(1).await;
    let (_node_b, port_b) = spawn_node(1).await;
    let (_node_c, port_c) = spawn_node(1).await;

    let client_a = DhtClient::new("127.0.0.1", port_a);
    let client_b = DhtClient::new("127.0.0.1", port_b);
    let client_c = DhtClient::new("127.0.0.1", port_c);

    client_a.bootstrap("127.0.0.1", port_b).await.unwrap();
    client_b.bootstrap("127.0.0.1", port_c).await.unwrap();

    let id_a = node_a.local().id.to_hex();
    // hex for b"test" / b"val1"
    let ok = client_a.set(&id_a, "74657374", "76616c31").await.unwrap();
    assert!(ok, "replication to at least one neighbor must succeed");

    // B received the replica.
    let at_b = client_b.find_value(&id_a, "74657374").await.unwrap();
    assert_eq!(at_b, Some(b"val1".to_vec()));

    // C never heard of the value directly, but the iterative lookup
    // reaches it through B.
    let at_c = client_c.find_value(&id_a, "74657374").await.unwrap();
    assert_eq!(at_c, Some(b"val1".to_vec()));
}

#[tokio::test]
async fn bootstrap_is_symmetric() {
    let (node_a, port_a) = spawn_node(20).await;
    let (node_b, port_b) = spawn_node(20).await;

    let client_a = DhtClient::new("127.0.0.1", port_a);
    client_a.bootstrap("127.0.0.1", port_b).await.unwrap();

    // Both sides learned each other from the single exchange.
    let a_knows = node_a.find_neighbors(&node_b.local().id, 20).await;
    assert!(a_knows.iter().any(|n| n.id == node_b.local().id));
    let b_knows = node_b.find_neighbors(&node_a.local().id, 20).await;
    assert!(b_knows.iter().any(|n| n.id == node_a.local().id));
}

#[tokio::test]
async fn ping_welcomes_the_caller() {
    let (node_a, port_a) = spawn_node(20).await;
    let (node_b, _port_b) = spawn_node(20).await;

    // Ping A as B; the response carries A's id.
    let b = node_b.local();
    let remote_id = DhtClient::new("127.0.0.1", port_a)
        .ping(&b.id.to_hex(), &b.host, b.port)
        .await
        .unwrap();
    assert_eq!(remote_id, node_a.local().id.to_hex());

    let known = node_a.find_neighbors(&node_b.local().id, 20).await;
    assert!(known.iter().any(|n| n.id == node_b.local().id));
}

#[tokio::test]
async fn replication_in_full_mesh_reaches_someone() {
    let mut nodes = Vec::new();
    for _ in 0..5 {
        nodes.push(spawn_node(3).await);
    }
    // Bootstrap every pair.
    for (_, port) in &nodes {
        let client = DhtClient::new("127.0.0.1", *port);
        for (_, other) in &nodes {
            if other != port {
                client.bootstrap("127.0.0.1", *other).await.unwrap();
            }
        }
    }

    let (first, first_port) = &nodes[0];
    let client = DhtClient::new("127.0.0.1", *first_port);
    let ok = client.set(&first.local().id.to_hex(), "696e746567", "76616c7565").await.unwrap();
    assert!(ok);

    let mut holders = 0;
    for (node, _) in &nodes {
        if node.storage().get(b"integ").await.unwrap().is_some() {
            holders += 1;
        }
    }
    assert!(holders >= 1, "at least one node must hold the replicated value");
}
