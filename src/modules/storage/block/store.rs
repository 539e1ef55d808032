//! Object store contract and the in-memory implementation.
//!
//! The core consumes exactly three operations from a store: a fast
//! existence probe, an exact-bytes read, and an idempotent
//! drain-hash-store create. The permanent and temporary stores are two
//! independent instances of this contract and may be backed by different
//! media.

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, trace};

use super::cid::ContentId;
use super::error::StoreError;

/// Content-addressed blob store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fast existence check; no side effects.
    async fn has(&self, id: &ContentId) -> bool;

    /// The exact bytes originally stored under `id`.
    async fn read(&self, id: &ContentId) -> Result<Vec<u8>, StoreError>;

    /// Drain the reader, hash the bytes, store them under the digest and
    /// return it. Re-putting identical bytes yields the same id and must
    /// not corrupt the store.
    async fn create(
        &self,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<ContentId, StoreError>;
}

/// Drain a reader into memory for hashing.
pub(crate) async fn drain(
    reader: &mut (dyn AsyncRead + Send + Unpin),
) -> Result<Vec<u8>, StoreError> {
    let mut data = Vec::new();
    reader
        .read_to_end(&mut data)
        .await
        .map_err(|e| StoreError::WriteFailed(e.to_string()))?;
    Ok(data)
}

/// In-memory object store keyed by binary content id.
///
/// The default backing of the temporary store; also the store used by unit
/// tests. Nothing is ever evicted.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: DashMap<Vec<u8>, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn has(&self, id: &ContentId) -> bool {
        let exists = self.objects.contains_key(&id.to_bytes());
        trace!(cid = %id, exists, "Memory store existence check");
        exists
    }

    async fn read(&self, id: &ContentId) -> Result<Vec<u8>, StoreError> {
        match self.objects.get(&id.to_bytes()) {
            Some(entry) => Ok(entry.value().clone()),
            None => Err(StoreError::NotFound(id.clone())),
        }
    }

    async fn create(
        &self,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<ContentId, StoreError> {
        let data = drain(reader).await?;
        let id = ContentId::digest(&data);

        // Identical bytes land under the identical key; last write wins
        // with the same value either way.
        self.objects.insert(id.to_bytes(), data);
        debug!(cid = %id, "Object stored in memory store");

        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_and_read() {
        let store = MemoryStore::new();

        let id = store.create(&mut &b"hello world"[..]).await.unwrap();

        assert!(store.has(&id).await);
        assert_eq!(store.read(&id).await.unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn test_create_returns_digest_of_bytes() {
        let store = MemoryStore::new();

        let id = store.create(&mut &b"addressed"[..]).await.unwrap();

        assert_eq!(id, ContentId::digest(b"addressed"));
    }

    #[tokio::test]
    async fn test_create_idempotent() {
        let store = MemoryStore::new();

        let id1 = store.create(&mut &b"same bytes"[..]).await.unwrap();
        let id2 = store.create(&mut &b"same bytes"[..]).await.unwrap();

        assert_eq!(id1, id2);
        assert_eq!(store.len(), 1);
        assert_eq!(store.read(&id1).await.unwrap(), b"same bytes");
    }

    #[tokio::test]
    async fn test_read_missing_is_not_found() {
        let store = MemoryStore::new();
        let id = ContentId::digest(b"never stored");

        assert!(!store.has(&id).await);
        assert!(matches!(
            store.read(&id).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_binary_data_roundtrip() {
        let store = MemoryStore::new();
        let data: Vec<u8> = (0..=255).collect();

        let id = store.create(&mut data.as_slice()).await.unwrap();

        assert_eq!(store.read(&id).await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_distinct_objects_distinct_ids() {
        let store = MemoryStore::new();

        let id1 = store.create(&mut &b"one"[..]).await.unwrap();
        let id2 = store.create(&mut &b"two"[..]).await.unwrap();

        assert_ne!(id1, id2);
        assert_eq!(store.len(), 2);
    }
}
