//! Block resolver: the hierarchical lookup path behind `get_block`.
//!
//! Lookup order is fixed — permanent store, then temporary store, then the
//! peer subsystem — and the first hit wins. The resolver decodes the
//! winning bytes and returns the requested block only; children are never
//! expanded here (the peer prefetches them into the temporary store as a
//! latency optimization, invisible to this contract).

use std::sync::Arc;

use tracing::{debug, instrument};

use crate::modules::network::BlockPeer;
use crate::utils::ctx::OpContext;

use super::cid::ContentId;
use super::error::StorageError;
use super::record::Block;
use super::store::ObjectStore;

/// Resolves block ids to decoded blocks.
pub struct BlockResolver {
    local_store: Arc<dyn ObjectStore>,
    temporary_store: Arc<dyn ObjectStore>,
    peer: Arc<dyn BlockPeer>,
}

impl BlockResolver {
    pub fn new(
        local_store: Arc<dyn ObjectStore>,
        temporary_store: Arc<dyn ObjectStore>,
        peer: Arc<dyn BlockPeer>,
    ) -> Self {
        Self {
            local_store,
            temporary_store,
            peer,
        }
    }

    /// Resolve `id` to its decoded block.
    #[instrument(skip(self, ctx), fields(cid = %id))]
    pub async fn get_block(&self, ctx: &OpContext, id: &ContentId) -> Result<Block, StorageError> {
        ctx.check()?;

        let data = if self.local_store.has(id).await {
            debug!("Block found in permanent store");
            self.local_store.read(id).await?
        } else if self.temporary_store.has(id).await {
            debug!("Block found in temporary store");
            self.temporary_store.read(id).await?
        } else {
            debug!("Block not held locally, asking the network");
            self.peer.get_remote(ctx, id).await?
        };

        Block::decode_bytes(&data)
    }
}
