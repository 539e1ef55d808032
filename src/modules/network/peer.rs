//! The block peer: announce, remote fetch with recursive child prefetch,
//! and read-protocol registration.
//!
//! The peer depends on two small capabilities supplied by the environment —
//! a content router (`provide` / `find_providers`) and a transport host
//! (open a read-protocol stream to a peer, install the inbound handler) —
//! so the whole subsystem is test-substitutable.

use std::sync::Arc;

use async_trait::async_trait;
use libp2p::PeerId;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::modules::storage::block::{Block, ConfigError, ContentId, ObjectStore};
use crate::utils::ctx::OpContext;

use super::error::PeerError;

/// Default cap on providers consulted per lookup.
pub const DEFAULT_MAX_PROVIDERS: usize = 3;

/// Content-routing capability: publish and discover provider records.
#[async_trait]
pub trait ContentRouter: Send + Sync {
    /// Publish ownership of `id` to the routing network.
    async fn provide(&self, id: &ContentId, broadcast: bool) -> Result<(), PeerError>;

    /// Discover providers of `id`, at most `limit`. Providers arrive on the
    /// returned channel as the network yields them; the channel closes when
    /// the query finishes.
    async fn find_providers(
        &self,
        id: &ContentId,
        limit: usize,
    ) -> Result<mpsc::Receiver<PeerId>, PeerError>;
}

/// Transport capability: streams to remote peers and the inbound handler.
#[async_trait]
pub trait TransportHost: Send + Sync {
    /// This node's peer id.
    fn local_peer_id(&self) -> PeerId;

    /// Open a fresh read-protocol stream to `peer`, write the binary id,
    /// and read the whole response to EOF. The stream is closed on every
    /// exit path.
    async fn fetch_block(&self, peer: PeerId, id: &ContentId) -> Result<Vec<u8>, PeerError>;

    /// Install the read-protocol handler serving blocks from `store`.
    async fn register_read_protocol(&self, store: Arc<dyn ObjectStore>) -> Result<(), PeerError>;
}

/// The peer capability consumed by the storage core.
#[async_trait]
pub trait BlockPeer: Send + Sync {
    /// Announce ownership of `id`. Returns `true` on success; a router
    /// error is logged and reported as `false`, never as a failure.
    async fn announce(&self, ctx: &OpContext, id: &ContentId) -> bool;

    /// Fetch a block from the network, caching it (and prefetching its
    /// children) into the temporary store.
    async fn get_remote(&self, ctx: &OpContext, id: &ContentId) -> Result<Vec<u8>, PeerError>;

    /// Install the read-protocol handler on the transport host. A host
    /// failure is logged; the handler is best-effort by contract.
    async fn register_read_protocol(&self, store: Arc<dyn ObjectStore>);
}

/// Builder for [`NetworkPeer`].
#[derive(Default)]
pub struct NetworkPeerBuilder {
    host: Option<Arc<dyn TransportHost>>,
    router: Option<Arc<dyn ContentRouter>>,
    temporary_store: Option<Arc<dyn ObjectStore>>,
    max_providers: Option<usize>,
    debug: bool,
}

impl NetworkPeerBuilder {
    pub fn with_host(mut self, host: Arc<dyn TransportHost>) -> Self {
        self.host = Some(host);
        self
    }

    pub fn with_content_router(mut self, router: Arc<dyn ContentRouter>) -> Self {
        self.router = Some(router);
        self
    }

    pub fn with_temporary_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.temporary_store = Some(store);
        self
    }

    /// Cap on providers consulted per lookup (default 3, must be ≥ 1).
    pub fn with_max_providers(mut self, max: usize) -> Self {
        self.max_providers = Some(max);
        self
    }

    pub fn enable_debug_mode(mut self) -> Self {
        self.debug = true;
        self
    }

    pub fn build(self) -> Result<NetworkPeer, ConfigError> {
        let host = self.host.ok_or(ConfigError::HostMissing)?;
        let router = self.router.ok_or(ConfigError::RouterMissing)?;

        let max_providers = self.max_providers.unwrap_or(DEFAULT_MAX_PROVIDERS);
        if max_providers < 1 {
            return Err(ConfigError::MaxProvidersInvalid);
        }

        let temporary_store = self
            .temporary_store
            .ok_or(ConfigError::TemporaryStoreMissing)?;

        Ok(NetworkPeer {
            host,
            router,
            temporary_store,
            max_providers,
            debug: self.debug,
        })
    }
}

/// Peer implementation over a transport host and a content router.
pub struct NetworkPeer {
    host: Arc<dyn TransportHost>,
    router: Arc<dyn ContentRouter>,
    temporary_store: Arc<dyn ObjectStore>,
    max_providers: usize,
    debug: bool,
}

impl NetworkPeer {
    pub fn builder() -> NetworkPeerBuilder {
        NetworkPeerBuilder::default()
    }

    /// This node's peer id.
    pub fn local_peer_id(&self) -> PeerId {
        self.host.local_peer_id()
    }

    /// Collect providers for `id`, honouring the context between receives.
    ///
    /// Fails with `ProviderNotFound` when the channel drains without
    /// yielding a single provider.
    async fn find_block_providers(
        &self,
        ctx: &OpContext,
        id: &ContentId,
    ) -> Result<Vec<PeerId>, PeerError> {
        ctx.check()?;

        let mut rx = self.router.find_providers(id, self.max_providers).await?;
        let mut providers = Vec::with_capacity(self.max_providers);

        loop {
            tokio::select! {
                err = ctx.done() => return Err(err.into()),
                provider = rx.recv() => match provider {
                    Some(peer) => {
                        debug!(cid = %id, %peer, "Provider discovered");
                        providers.push(peer);
                        if providers.len() >= self.max_providers {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }

        ctx.check()?;

        if providers.is_empty() {
            return Err(PeerError::ProviderNotFound(id.clone()));
        }

        Ok(providers)
    }

    /// Fetch one block from `provider` and persist it to the temporary
    /// store. A persistence failure is logged, never fatal.
    async fn fetch_and_cache(
        &self,
        ctx: &OpContext,
        provider: PeerId,
        id: &ContentId,
    ) -> Result<Vec<u8>, PeerError> {
        ctx.check()?;

        info!(cid = %id, peer = %provider, "Fetching block from provider");
        let data = self.host.fetch_block(provider, id).await?;

        match self.temporary_store.create(&mut data.as_slice()).await {
            Ok(received) => {
                info!(requested = %id, received = %received, "Cached remote block");
            }
            Err(e) => {
                warn!(cid = %id, error = %e, "Storing remote block to temporary store failed");
            }
        }

        Ok(data)
    }

    /// Prefetch every child of `block` from the same provider, one
    /// concurrent fetch per link. Failures are logged per child and never
    /// surface to the caller.
    async fn prefetch_children(&self, ctx: &OpContext, provider: PeerId, block: &Block) {
        debug!(
            link_count = block.links.len(),
            peer = %provider,
            "Prefetching child blocks"
        );

        let fetches = block.links.iter().map(|link| async move {
            let child_id = match link.child_id() {
                Ok(id) => id,
                Err(e) => {
                    warn!(hash = %link.hash, error = %e, "Decoding child id failed");
                    return;
                }
            };

            if ctx.check().is_err() {
                debug!(cid = %child_id, "Skipping child fetch: context done");
                return;
            }

            if self.temporary_store.has(&child_id).await {
                debug!(cid = %child_id, "Child already in temporary store");
                return;
            }

            if let Err(e) = self.fetch_and_cache(ctx, provider, &child_id).await {
                warn!(cid = %child_id, error = %e, "Fetching child block failed");
            }
        });

        futures::future::join_all(fetches).await;
    }
}

#[async_trait]
impl BlockPeer for NetworkPeer {
    #[instrument(skip(self, ctx), fields(cid = %id))]
    async fn announce(&self, ctx: &OpContext, id: &ContentId) -> bool {
        if let Err(e) = ctx.check() {
            warn!(error = %e, "Announcing block skipped: context done");
            return false;
        }

        match self.router.provide(id, true).await {
            Ok(()) => {
                info!("Announcing block succeeded");
                true
            }
            Err(e) => {
                warn!(error = %e, "Announcing block failed");
                false
            }
        }
    }

    #[instrument(skip(self, ctx), fields(cid = %id))]
    async fn get_remote(&self, ctx: &OpContext, id: &ContentId) -> Result<Vec<u8>, PeerError> {
        ctx.check()?;

        if self.temporary_store.has(id).await {
            if self.debug {
                debug!("Block already in temporary store");
            }
            return self
                .temporary_store
                .read(id)
                .await
                .map_err(|e| PeerError::StoreReadFailed(e.to_string()));
        }

        let providers = self.find_block_providers(ctx, id).await?;
        let provider = providers[0];

        let data = self.fetch_and_cache(ctx, provider, id).await?;

        // A parsable index block triggers child prefetch; undecodable
        // bytes are still returned to the caller, which surfaces the
        // decode failure where it matters.
        match Block::decode_bytes(&data) {
            Ok(block) if !block.links.is_empty() => {
                self.prefetch_children(ctx, provider, &block).await;
            }
            Ok(_) => {}
            Err(e) => {
                debug!(error = %e, "Fetched bytes did not decode as a block");
            }
        }

        Ok(data)
    }

    async fn register_read_protocol(&self, store: Arc<dyn ObjectStore>) {
        info!(
            protocol = super::protocol::BLOCK_READ_PROTOCOL,
            "Registering read protocol"
        );
        if let Err(e) = self.host.register_read_protocol(store).await {
            warn!(error = %e, "Registering read protocol failed");
        }
    }
}
