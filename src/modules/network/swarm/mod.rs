//! libp2p node backing the peer subsystem.
//!
//! A command-channel event loop owns the Swarm; the [`P2pNode`] handle
//! implements the [`ContentRouter`] and [`TransportHost`] capabilities on
//! top of it. Kademlia provider records carry announcements, and the block
//! read protocol runs over a request-response behaviour with the
//! [`BlockReadCodec`](super::protocol::BlockReadCodec).

mod event_loop;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use libp2p::kad::store::MemoryStore as KadStore;
use libp2p::swarm::NetworkBehaviour;
use libp2p::{Multiaddr, PeerId, StreamProtocol, Swarm, identity, kad, noise, request_response, tcp, yamux};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::modules::storage::block::{ContentId, ObjectStore};

use super::error::PeerError;
use super::peer::{ContentRouter, TransportHost};
use super::protocol::{BlockReadCodec, stream_protocol};

use event_loop::{Command, SwarmDriver};

/// Kademlia protocol identifier for the block routing network.
const KAD_PROTOCOL: &str = "/blockgrid/kad/1.0.0";

/// Configuration for the libp2p node.
#[derive(Debug, Clone)]
pub struct P2pConfig {
    /// Addresses to listen on.
    pub listen_addrs: Vec<Multiaddr>,
    /// Bootstrap peers (multiaddrs carrying a `/p2p/` component).
    pub bootstrap_peers: Vec<Multiaddr>,
    /// Idle connection timeout.
    pub idle_connection_timeout: Duration,
    /// Timeout for a single block request.
    pub request_timeout: Duration,
}

impl Default for P2pConfig {
    fn default() -> Self {
        Self {
            listen_addrs: vec!["/ip4/0.0.0.0/tcp/7650"
                .parse()
                .expect("static multiaddr parses")],
            bootstrap_peers: Vec::new(),
            idle_connection_timeout: Duration::from_secs(60),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl P2pConfig {
    /// Configuration binding an ephemeral local port; used by tests.
    pub fn ephemeral() -> Self {
        Self {
            listen_addrs: vec!["/ip4/127.0.0.1/tcp/0"
                .parse()
                .expect("static multiaddr parses")],
            ..Default::default()
        }
    }

    /// Load configuration from environment variables.
    ///
    /// - `P2P_LISTEN_PORT`: TCP listen port (default: 7650)
    /// - `P2P_BOOTSTRAP_PEERS`: comma-separated multiaddrs
    /// - `P2P_REQUEST_TIMEOUT_SECS`: block request timeout (default: 30)
    pub fn from_env() -> Self {
        use std::env;

        let port: u16 = env::var("P2P_LISTEN_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(7650);

        let bootstrap_peers = env::var("P2P_BOOTSTRAP_PEERS")
            .map(|raw| {
                raw.split(',')
                    .filter(|s| !s.trim().is_empty())
                    .filter_map(|s| match s.trim().parse() {
                        Ok(addr) => Some(addr),
                        Err(e) => {
                            warn!(addr = s, error = %e, "Skipping unparsable bootstrap address");
                            None
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();

        let request_timeout = Duration::from_secs(
            env::var("P2P_REQUEST_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30),
        );

        Self {
            listen_addrs: vec![format!("/ip4/0.0.0.0/tcp/{}", port)
                .parse()
                .expect("listen multiaddr parses")],
            bootstrap_peers,
            idle_connection_timeout: Duration::from_secs(60),
            request_timeout,
        }
    }
}

/// Combined network behaviour: DHT routing plus the block read protocol.
#[derive(NetworkBehaviour)]
#[behaviour(to_swarm = "NodeBehaviourEvent")]
pub struct NodeBehaviour {
    /// Kademlia DHT carrying provider records.
    pub kademlia: kad::Behaviour<KadStore>,
    /// Request-response behaviour speaking the block read protocol.
    pub block_read: request_response::Behaviour<BlockReadCodec>,
}

/// Events emitted by the node behaviour.
#[derive(Debug)]
pub enum NodeBehaviourEvent {
    Kademlia(kad::Event),
    BlockRead(request_response::Event<ContentId, Vec<u8>>),
}

impl From<kad::Event> for NodeBehaviourEvent {
    fn from(event: kad::Event) -> Self {
        NodeBehaviourEvent::Kademlia(event)
    }
}

impl From<request_response::Event<ContentId, Vec<u8>>> for NodeBehaviourEvent {
    fn from(event: request_response::Event<ContentId, Vec<u8>>) -> Self {
        NodeBehaviourEvent::BlockRead(event)
    }
}

impl NodeBehaviour {
    fn new(local_peer_id: PeerId, config: &P2pConfig) -> Self {
        let kad_config = kad::Config::new(StreamProtocol::new(KAD_PROTOCOL));
        let mut kademlia =
            kad::Behaviour::with_config(local_peer_id, KadStore::new(local_peer_id), kad_config);

        // Provider records must be storable without waiting for external
        // address confirmation; there is no identify protocol on board.
        kademlia.set_mode(Some(kad::Mode::Server));

        let block_read = request_response::Behaviour::with_codec(
            BlockReadCodec,
            std::iter::once((stream_protocol(), request_response::ProtocolSupport::Full)),
            request_response::Config::default().with_request_timeout(config.request_timeout),
        );

        Self {
            kademlia,
            block_read,
        }
    }
}

/// Handle to a running libp2p node.
///
/// Cloneable through `Arc`; all methods funnel commands into the event
/// loop that owns the Swarm.
pub struct P2pNode {
    local_peer_id: PeerId,
    listen_addrs: Vec<Multiaddr>,
    command_tx: mpsc::UnboundedSender<Command>,
    handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl P2pNode {
    /// Build the swarm, start listening, and spawn the event loop.
    pub async fn spawn(config: P2pConfig) -> Result<Arc<Self>, PeerError> {
        let keypair = identity::Keypair::generate_ed25519();
        let local_peer_id = keypair.public().to_peer_id();

        info!(peer_id = %local_peer_id, "Building libp2p swarm");

        let mut behaviour = NodeBehaviour::new(local_peer_id, &config);

        // Seed the routing table with the configured bootstrap peers.
        let mut bootstrap_count = 0;
        for addr in &config.bootstrap_peers {
            if let Some(peer_id) = addr.iter().find_map(|p| match p {
                libp2p::multiaddr::Protocol::P2p(peer_id) => Some(peer_id),
                _ => None,
            }) {
                info!(peer = %peer_id, address = %addr, "Adding bootstrap peer");
                behaviour.kademlia.add_address(&peer_id, addr.clone());
                bootstrap_count += 1;
            } else {
                warn!(address = %addr, "Bootstrap address missing /p2p/ component, skipping");
            }
        }
        if bootstrap_count > 0 {
            if let Err(e) = behaviour.kademlia.bootstrap() {
                warn!(error = ?e, "Initial DHT bootstrap failed");
            }
        }

        let mut swarm = libp2p::SwarmBuilder::with_existing_identity(keypair)
            .with_tokio()
            .with_tcp(
                tcp::Config::default(),
                noise::Config::new,
                yamux::Config::default,
            )
            .map_err(|e| PeerError::TransportFailed(format!("building TCP transport: {}", e)))?
            .with_quic()
            .with_behaviour(|_| behaviour)
            .map_err(|e| PeerError::TransportFailed(format!("building behaviour: {}", e)))?
            .with_swarm_config(|cfg| {
                cfg.with_idle_connection_timeout(config.idle_connection_timeout)
            })
            .build();

        for addr in &config.listen_addrs {
            swarm
                .listen_on(addr.clone())
                .map_err(|e| PeerError::TransportFailed(format!("listen on {}: {}", addr, e)))?;
        }

        let listen_addrs = Self::await_listen_addrs(&mut swarm, config.listen_addrs.len()).await?;
        info!(peer_id = %local_peer_id, addrs = ?listen_addrs, "Node listening");

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let driver = SwarmDriver::new(swarm, command_rx);
        let handle = tokio::spawn(driver.run());

        Ok(Arc::new(Self {
            local_peer_id,
            listen_addrs,
            command_tx,
            handle: std::sync::Mutex::new(Some(handle)),
        }))
    }

    /// Drive the swarm until every listener reports its address.
    async fn await_listen_addrs(
        swarm: &mut Swarm<NodeBehaviour>,
        expected: usize,
    ) -> Result<Vec<Multiaddr>, PeerError> {
        use libp2p::swarm::SwarmEvent;

        let mut addrs = Vec::with_capacity(expected);
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);

        while addrs.len() < expected {
            let event = tokio::time::timeout_at(deadline, swarm.select_next_some())
                .await
                .map_err(|_| {
                    PeerError::TransportFailed("timed out waiting for listen address".to_string())
                })?;

            match event {
                SwarmEvent::NewListenAddr { address, .. } => {
                    debug!(address = %address, "Listener ready");
                    addrs.push(address);
                }
                other => {
                    debug!(event = ?other, "Swarm event before listeners ready");
                }
            }
        }

        Ok(addrs)
    }

    /// This node's peer id.
    pub fn local_peer_id(&self) -> PeerId {
        self.local_peer_id
    }

    /// Resolved listen addresses (with real ports for ephemeral binds).
    pub fn listen_addrs(&self) -> &[Multiaddr] {
        &self.listen_addrs
    }

    /// First listen address with the `/p2p/<peer id>` suffix appended.
    pub fn external_addr(&self) -> Option<Multiaddr> {
        self.listen_addrs.first().map(|addr| {
            addr.clone()
                .with(libp2p::multiaddr::Protocol::P2p(self.local_peer_id))
        })
    }

    /// Dial a peer and wait for the connection to establish.
    pub async fn dial(&self, addr: Multiaddr) -> Result<(), PeerError> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(Command::Dial { addr, reply })
            .map_err(|_| PeerError::NotRunning)?;
        rx.await
            .map_err(|_| PeerError::NotRunning)?
            .map_err(PeerError::TransportFailed)
    }

    /// Feed an address into the DHT routing table.
    pub async fn add_address(&self, peer: PeerId, addr: Multiaddr) -> Result<(), PeerError> {
        let (ack, rx) = oneshot::channel();
        self.command_tx
            .send(Command::AddAddress { peer, addr, ack })
            .map_err(|_| PeerError::NotRunning)?;
        rx.await.map_err(|_| PeerError::NotRunning)
    }

    /// Stop the event loop and wait for it to exit. Idempotent.
    pub async fn shutdown(&self) {
        let _ = self.command_tx.send(Command::Shutdown);
        let handle = self.handle.lock().expect("handle lock poisoned").take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Event loop task failed");
            }
        }
    }
}

#[async_trait]
impl ContentRouter for P2pNode {
    async fn provide(&self, id: &ContentId, _broadcast: bool) -> Result<(), PeerError> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(Command::StartProviding {
                id: id.clone(),
                reply,
            })
            .map_err(|_| PeerError::NotRunning)?;

        rx.await
            .map_err(|_| PeerError::NotRunning)?
            .map_err(PeerError::TransportFailed)
    }

    async fn find_providers(
        &self,
        id: &ContentId,
        limit: usize,
    ) -> Result<mpsc::Receiver<PeerId>, PeerError> {
        let (found, rx) = mpsc::channel(limit.max(1));
        self.command_tx
            .send(Command::FindProviders {
                id: id.clone(),
                limit,
                found,
            })
            .map_err(|_| PeerError::NotRunning)?;

        Ok(rx)
    }
}

#[async_trait]
impl TransportHost for P2pNode {
    fn local_peer_id(&self) -> PeerId {
        self.local_peer_id
    }

    async fn fetch_block(&self, peer: PeerId, id: &ContentId) -> Result<Vec<u8>, PeerError> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(Command::FetchBlock {
                peer,
                id: id.clone(),
                reply,
            })
            .map_err(|_| PeerError::NotRunning)?;

        rx.await.map_err(|_| PeerError::NotRunning)?
    }

    async fn register_read_protocol(&self, store: Arc<dyn ObjectStore>) -> Result<(), PeerError> {
        let (ack, rx) = oneshot::channel();
        self.command_tx
            .send(Command::RegisterBlockSource { store, ack })
            .map_err(|_| PeerError::NotRunning)?;

        rx.await.map_err(|_| PeerError::NotRunning)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = P2pConfig::default();
        assert_eq!(config.listen_addrs.len(), 1);
        assert!(config.bootstrap_peers.is_empty());
        assert_eq!(config.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_config_from_env_does_not_panic() {
        let _config = P2pConfig::from_env();
    }

    #[tokio::test]
    async fn test_spawn_resolves_ephemeral_listen_addr() {
        let node = P2pNode::spawn(P2pConfig::ephemeral()).await.unwrap();

        let addrs = node.listen_addrs();
        assert_eq!(addrs.len(), 1);
        // The resolved address must carry a concrete (non-zero) port.
        let has_port = addrs[0].iter().any(|p| {
            matches!(p, libp2p::multiaddr::Protocol::Tcp(port) if port != 0)
        });
        assert!(has_port, "expected concrete TCP port in {}", addrs[0]);

        node.shutdown().await;
    }

    #[tokio::test]
    async fn test_external_addr_carries_peer_id() {
        let node = P2pNode::spawn(P2pConfig::ephemeral()).await.unwrap();

        let external = node.external_addr().unwrap();
        let has_p2p = external
            .iter()
            .any(|p| matches!(p, libp2p::multiaddr::Protocol::P2p(id) if id == node.local_peer_id()));
        assert!(has_p2p);

        node.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let node = P2pNode::spawn(P2pConfig::ephemeral()).await.unwrap();
        node.shutdown().await;
        node.shutdown().await;
    }
}
