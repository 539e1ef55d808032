//! Service facade binding the DAG builder, the resolver, and the peer.
//!
//! Construction wires the permanent store into the peer's read protocol so
//! other nodes can fetch locally authored blocks. The fake construction
//! mode skips that registration and exists for unit tests only.

use std::sync::Arc;

use tokio::io::AsyncRead;
use tracing::{info, instrument};

use crate::modules::network::{BlockPeer, ContentRouter, NetworkPeer, TransportHost};
use crate::utils::ctx::OpContext;

use super::chunker::{ChunkerConfig, DEFAULT_CHUNK_SIZE};
use super::cid::ContentId;
use super::dag::DagBuilder;
use super::error::{ConfigError, StorageError};
use super::record::Block;
use super::resolver::BlockResolver;
use super::store::ObjectStore;

/// Peer wiring accepted by the builder: either a ready-made peer instance
/// or the host/router pair to build one from.
enum PeerWiring {
    Missing,
    Parts {
        host: Arc<dyn TransportHost>,
        router: Arc<dyn ContentRouter>,
    },
    Instance(Arc<dyn BlockPeer>),
}

impl Default for PeerWiring {
    fn default() -> Self {
        PeerWiring::Missing
    }
}

/// Builder for [`BlockStorage`].
#[derive(Default)]
pub struct BlockStorageBuilder {
    local_store: Option<Arc<dyn ObjectStore>>,
    temporary_store: Option<Arc<dyn ObjectStore>>,
    peer: PeerWiring,
    chunk_size: Option<usize>,
    max_providers: Option<usize>,
    debug: bool,
}

impl BlockStorageBuilder {
    /// Required permanent store for locally authored blocks.
    pub fn with_local_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.local_store = Some(store);
        self
    }

    /// Required temporary store caching remote fetches.
    pub fn with_temporary_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.temporary_store = Some(store);
        self
    }

    /// Wire the peer from a transport host and a content router.
    pub fn with_peer(
        mut self,
        host: Arc<dyn TransportHost>,
        router: Arc<dyn ContentRouter>,
    ) -> Self {
        self.peer = PeerWiring::Parts { host, router };
        self
    }

    /// Use a ready-made peer instance.
    pub fn with_peer_instance(mut self, peer: Arc<dyn BlockPeer>) -> Self {
        self.peer = PeerWiring::Instance(peer);
        self
    }

    /// Leaf chunk size; default 512 KiB.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = Some(chunk_size);
        self
    }

    /// Cap on providers consulted per lookup; default 3, must be ≥ 1.
    pub fn with_max_providers(mut self, max: usize) -> Self {
        self.max_providers = Some(max);
        self
    }

    /// Verbose logging of the storage pipeline.
    pub fn enable_debug_mode(mut self) -> Self {
        self.debug = true;
        self
    }

    fn assemble(self) -> Result<BlockStorage, ConfigError> {
        let local_store = self.local_store.ok_or(ConfigError::LocalStoreMissing)?;
        let temporary_store = self
            .temporary_store
            .ok_or(ConfigError::TemporaryStoreMissing)?;

        if self.max_providers == Some(0) {
            return Err(ConfigError::MaxProvidersInvalid);
        }

        let peer: Arc<dyn BlockPeer> = match self.peer {
            PeerWiring::Instance(peer) => peer,
            PeerWiring::Parts { host, router } => {
                let mut builder = NetworkPeer::builder()
                    .with_host(host)
                    .with_content_router(router)
                    .with_temporary_store(temporary_store.clone());
                if let Some(max) = self.max_providers {
                    builder = builder.with_max_providers(max);
                }
                if self.debug {
                    builder = builder.enable_debug_mode();
                }
                Arc::new(builder.build()?)
            }
            PeerWiring::Missing => return Err(ConfigError::PeerMissing),
        };

        let chunker = ChunkerConfig::with_size(self.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE));

        Ok(BlockStorage {
            dag: DagBuilder::new(
                local_store.clone(),
                peer.clone(),
                chunker,
                self.debug,
            ),
            resolver: BlockResolver::new(
                local_store.clone(),
                temporary_store,
                peer.clone(),
            ),
            local_store,
            peer,
        })
    }

    /// Build the service and install the peer read protocol on the
    /// permanent store.
    pub async fn build(self) -> Result<BlockStorage, ConfigError> {
        let service = self.assemble()?;
        service
            .peer
            .register_read_protocol(service.local_store.clone())
            .await;
        Ok(service)
    }

    /// Build without registering the read protocol.
    ///
    /// For unit tests only; a node built this way never serves peers.
    pub fn build_fake(self) -> Result<BlockStorage, ConfigError> {
        self.assemble()
    }
}

/// The block storage service.
pub struct BlockStorage {
    local_store: Arc<dyn ObjectStore>,
    peer: Arc<dyn BlockPeer>,
    dag: DagBuilder,
    resolver: BlockResolver,
}

impl BlockStorage {
    pub fn builder() -> BlockStorageBuilder {
        BlockStorageBuilder::default()
    }

    /// Chunk the payload under `name` into the permanent store and return
    /// the root id.
    pub async fn create_block<R>(
        &self,
        ctx: &OpContext,
        name: &str,
        reader: R,
    ) -> Result<ContentId, StorageError>
    where
        R: AsyncRead + Send + Unpin,
    {
        self.dag.create_block(ctx, name, reader).await
    }

    /// Resolve a block id through the permanent store, the temporary
    /// store, and finally the network.
    pub async fn get_block(&self, ctx: &OpContext, id: &ContentId) -> Result<Block, StorageError> {
        self.resolver.get_block(ctx, id).await
    }

    /// Idempotent shutdown signal.
    ///
    /// The core owns no background tasks beyond the peer stream handler,
    /// which the transport host tears down.
    #[instrument(skip(self))]
    pub fn stop(&self) {
        info!("Block storage service stopped");
    }
}
