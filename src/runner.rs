//! Node runner: configuration, wiring, and the serve loop.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::info;

use crate::api::rest;
use crate::modules::network::{P2pConfig, P2pNode, PeerError};
use crate::modules::storage::block::{
    BlockStorage, ChunkerConfig, MemoryStore, RocksStore, RocksStoreConfig, StoreError,
};

/// Top-level node configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP API bind address.
    pub api_addr: SocketAddr,
    /// Permanent object store configuration.
    pub object_store: RocksStoreConfig,
    /// P2P configuration.
    pub p2p: P2pConfig,
    /// Leaf chunk size.
    pub chunker: ChunkerConfig,
    /// Verbose storage-pipeline logging.
    pub debug: bool,
}

impl Config {
    /// Load the whole configuration from environment variables.
    ///
    /// - `API_LISTEN_ADDR`: HTTP bind address (default: 0.0.0.0:8650)
    /// - `BLOCKGRID_DEBUG`: verbose storage logging (true/false)
    /// - plus the variables of [`RocksStoreConfig::from_env`],
    ///   [`P2pConfig::from_env`] and [`ChunkerConfig::from_env`]
    pub fn from_env() -> Self {
        let api_addr = std::env::var("API_LISTEN_ADDR")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 8650)));

        let debug = std::env::var("BLOCKGRID_DEBUG")
            .map(|s| s == "true" || s == "1")
            .unwrap_or(false);

        Self {
            api_addr,
            object_store: RocksStoreConfig::from_env(),
            p2p: P2pConfig::from_env(),
            chunker: ChunkerConfig::from_env(),
            debug,
        }
    }
}

/// Errors that can stop the runner.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("object store: {0}")]
    Store(#[from] StoreError),

    #[error("peer node: {0}")]
    Peer(#[from] PeerError),

    #[error("configuration: {0}")]
    Config(#[from] crate::modules::storage::block::ConfigError),

    #[error("http server: {0}")]
    Serve(#[from] std::io::Error),
}

/// Start the node and serve until ctrl-c.
pub async fn run() -> Result<(), RunError> {
    init_tracing();

    let config = Config::from_env();
    info!(api_addr = %config.api_addr, "Configuration loaded, initializing node");

    let local_store = Arc::new(RocksStore::open(config.object_store.clone())?);
    let temporary_store = Arc::new(MemoryStore::new());

    let node = P2pNode::spawn(config.p2p.clone()).await?;
    info!(peer_id = %node.local_peer_id(), "P2P node started");

    let mut builder = BlockStorage::builder()
        .with_local_store(local_store)
        .with_temporary_store(temporary_store)
        .with_peer(node.clone(), node.clone())
        .with_chunk_size(config.chunker.chunk_size);
    if config.debug {
        builder = builder.enable_debug_mode();
    }
    let storage = Arc::new(builder.build().await?);

    let app = rest::router(storage.clone());
    let listener = tokio::net::TcpListener::bind(config.api_addr).await?;
    info!(addr = %config.api_addr, "API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    storage.stop();
    node.shutdown().await;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_target(true)
        .init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutdown signal received");
}
