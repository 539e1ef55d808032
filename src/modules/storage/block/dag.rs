//! DAG builder: the chunking + persistence + announcement pipeline behind
//! `create_block`.
//!
//! The payload stream is cut into fixed-size chunks; each chunk becomes a
//! leaf block persisted to the permanent store and announced on the routing
//! network, in strict read order. The root block names the payload and
//! carries the leaf links; its id is the result. The DAG is always depth 2.

use std::sync::Arc;

use tokio::io::AsyncRead;
use tracing::{debug, info, instrument};

use crate::modules::network::BlockPeer;
use crate::utils::ctx::OpContext;

use super::chunker::{ChunkerConfig, fill_chunk};
use super::cid::ContentId;
use super::error::StorageError;
use super::record::{Block, Link};
use super::store::ObjectStore;

/// Builder for payload DAGs.
pub struct DagBuilder {
    store: Arc<dyn ObjectStore>,
    peer: Arc<dyn BlockPeer>,
    chunk_size: usize,
    debug: bool,
}

impl DagBuilder {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        peer: Arc<dyn BlockPeer>,
        config: ChunkerConfig,
        debug: bool,
    ) -> Self {
        debug!(chunk_size = config.chunk_size, "Created DAG builder");
        Self {
            store,
            peer,
            chunk_size: config.chunk_size,
            debug,
        }
    }

    /// Chunk `reader` under `name` and return the root id.
    ///
    /// Leaves are persisted in read order; a failed announcement never
    /// fails the build; already-persisted leaves are not rolled back on a
    /// mid-stream failure — content addressing leaves them safely
    /// reusable.
    #[instrument(skip(self, ctx, reader), fields(name = name))]
    pub async fn create_block<R>(
        &self,
        ctx: &OpContext,
        name: &str,
        mut reader: R,
    ) -> Result<ContentId, StorageError>
    where
        R: AsyncRead + Send + Unpin,
    {
        let name = name.trim();
        if name.is_empty() {
            return Err(StorageError::NameEmpty);
        }

        let mut links: Vec<Link> = Vec::new();
        let mut total_size: u64 = 0;
        let mut buf = vec![0u8; self.chunk_size];

        loop {
            ctx.check()?;

            let n = fill_chunk(&mut reader, &mut buf)
                .await
                .map_err(StorageError::ReaderFailed)?;
            if n == 0 {
                break;
            }

            let leaf = Block::leaf(buf[..n].to_vec());
            let id = self.persist_block(ctx, &leaf).await?;

            links.push(Link::to_leaf(&id, n as u64));
            total_size += n as u64;
        }

        if links.is_empty() {
            return Err(StorageError::DataEmpty);
        }

        let chunk_count = links.len();
        let root = Block::index(name, links);
        let root_id = self.persist_block(ctx, &root).await?;

        info!(
            root = %root_id,
            chunks = chunk_count,
            total_size,
            "Payload DAG built"
        );

        Ok(root_id)
    }

    /// Persist one block and announce its id.
    ///
    /// Announcement is best-effort; only persistence failures propagate.
    async fn persist_block(&self, ctx: &OpContext, block: &Block) -> Result<ContentId, StorageError> {
        let bytes = block.encode()?;
        let id = self.store.create(&mut bytes.as_slice()).await?;

        if self.debug {
            debug!(digest = %id, data_len = block.data.len(), "Wrote block");
        }

        self.peer.announce(ctx, &id).await;

        Ok(id)
    }
}
