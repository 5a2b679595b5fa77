//! Node assembly: identity, databases, DHT, HTTP server, shutdown.

use std::sync::Arc;

use axum::Router;
use tokio::sync::watch;
use tracing::{info, warn};

use murk_crypto::{Identity, KeyBundle};
use murk_kad::node::digest;
use murk_kad::{DhtNode, Node, NodeId, SqliteStorage};

use crate::config::{parse_peer, NodeConfig};
use crate::db::MessengerDb;
use crate::messenger::Messenger;
use crate::overlay::NodeState;

pub struct NodeServer {
    config: NodeConfig,
    state: Arc<NodeState>,
    dht: Arc<DhtNode>,
    shutdown_tx: watch::Sender<bool>,
}

impl NodeServer {
    /// Open (or create) the node's identity and databases and wire up
    /// the shared state. The key bundle is unlocked with `password`;
    /// a missing bundle means a fresh identity, sealed and saved.
    pub async fn new(config: NodeConfig, password: &[u8]) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        let bundle_path = config.key_bundle_path();
        let identity = if bundle_path.exists() {
            let bundle = KeyBundle::load_from(&bundle_path)?;
            let identity = bundle.open(password)?;
            info!(id = %identity.user_id().prefix(), "identity restored from key bundle");
            identity
        } else {
            let identity = Identity::generate()?;
            KeyBundle::seal(&identity, password)?.save_to(&bundle_path)?;
            info!(id = %identity.user_id().prefix(), "generated fresh identity");
            identity
        };

        let messenger = Messenger::new(identity, config.external_addr());
        let db = Arc::new(MessengerDb::open(config.messenger_db_path())?);
        let state = Arc::new(NodeState::new(messenger, db));

        let storage = Arc::new(SqliteStorage::open(config.kad_db_path())?);
        let local = Node::new(NodeId::random(), config.external_host.clone(), config.bind_addr.port());
        let dht = Arc::new(DhtNode::new(local, config.ksize, storage));
        dht.restore_known_nodes().await?;

        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self { config, state, dht, shutdown_tx })
    }

    pub fn state(&self) -> &Arc<NodeState> {
        &self.state
    }

    pub fn dht(&self) -> &Arc<DhtNode> {
        &self.dht
    }

    /// Messenger and DHT endpoints on one router.
    pub fn router(&self) -> Router {
        crate::api::router(self.state.clone()).merge(murk_kad::router(self.dht.clone()))
    }

    /// Bootstrap against configured peers, publish our contact card,
    /// and serve until SIGINT/SIGTERM.
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;
        info!(
            addr = %self.config.bind_addr,
            id = %self.state.messenger.user_id().prefix(),
            "murk node listening"
        );

        for peer in &self.config.bootstrap_peers {
            // Validated by the config; ignore anything that slipped by.
            let Some((host, port)) = parse_peer(peer) else { continue };
            if let Err(e) = self.dht.bootstrap_to(&host, port).await {
                warn!(peer = %peer, error = %e, "bootstrap failed");
            }
        }

        // Make this identity discoverable: card under sha1(identifier).
        let card_key = digest(self.state.messenger.user_id().as_str().as_bytes());
        match serde_json::to_vec(&self.state.messenger.contact_card()) {
            Ok(card) => {
                let replicated = self.dht.set_digest(card_key.as_bytes(), &card).await?;
                info!(replicated, "contact card published");
            }
            Err(e) => warn!(error = %e, "contact card serialization failed"),
        }

        let app = self.router();
        let shutdown_rx = self.shutdown_tx.subscribe();
        axum::serve(listener, app)
            .with_graceful_shutdown(Self::shutdown_signal(shutdown_rx))
            .await?;
        Ok(())
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    async fn shutdown_signal(mut shutdown: watch::Receiver<bool>) {
        #[cfg(unix)]
        let mut sigterm = {
            use tokio::signal::unix::{signal, SignalKind};
            signal(SignalKind::terminate()).ok()
        };

        tokio::select! {
            _ = async {
                #[cfg(unix)]
                {
                    if let Some(ref mut sigterm) = sigterm {
                        sigterm.recv().await;
                    }
                }
                #[cfg(not(unix))]
                {
                    std::future::pending::<()>().await;
                }
            } => {
                info!("received SIGTERM, shutting down");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("received SIGINT, shutting down");
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("shutdown requested");
                }
            }
        }
    }
}
