use thiserror::Error;

use crate::modules::network::PeerError;
use crate::utils::ctx::CtxError;

use super::cid::ContentId;

/// Errors surfaced by the object store contract.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No object stored under the given id.
    #[error("object not found: {0}")]
    NotFound(ContentId),

    /// Reading stored bytes failed.
    #[error("store read failed: {0}")]
    ReadFailed(String),

    /// Draining the input or writing the object failed.
    #[error("store write failed: {0}")]
    WriteFailed(String),
}

/// Errors produced by the block storage core.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Block name is empty after trimming.
    #[error("block name should not be empty")]
    NameEmpty,

    /// The payload produced no chunks.
    #[error("block data should not be empty")]
    DataEmpty,

    /// A content identifier failed to parse.
    #[error("block identifier not valid: {0}")]
    IdentifierInvalid(String),

    /// Operation cancelled through its context.
    #[error("operation context cancelled")]
    Cancelled,

    /// Operation deadline exceeded.
    #[error("operation timed out")]
    TimedOut,

    /// No store holds the requested object.
    #[error("block not found: {0}")]
    NotFound(ContentId),

    /// No peer on the routing network provides the block.
    #[error("not found any provider for block {0}")]
    ProviderNotFound(ContentId),

    /// Reading the payload stream failed before EOF.
    #[error("reading block payload failed: {0}")]
    ReaderFailed(#[source] std::io::Error),

    /// A backing store failed while reading.
    #[error("store read failed: {0}")]
    StoreReadFailed(String),

    /// A backing store failed while writing.
    #[error("store write failed: {0}")]
    StoreWriteFailed(String),

    /// The peer stream failed.
    #[error("peer transport failed: {0}")]
    TransportFailed(String),

    /// Bytes did not decode into a well-formed block record.
    #[error("block decoding failed: {0}")]
    DecodeFailed(String),

    /// The record could not be rendered to canonical bytes.
    #[error("block encoding failed: {0}")]
    EncodeFailed(String),
}

impl From<CtxError> for StorageError {
    fn from(err: CtxError) -> Self {
        match err {
            CtxError::Cancelled => StorageError::Cancelled,
            CtxError::TimedOut => StorageError::TimedOut,
        }
    }
}

impl From<StoreError> for StorageError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => StorageError::NotFound(id),
            StoreError::ReadFailed(msg) => StorageError::StoreReadFailed(msg),
            StoreError::WriteFailed(msg) => StorageError::StoreWriteFailed(msg),
        }
    }
}

impl From<PeerError> for StorageError {
    fn from(err: PeerError) -> Self {
        match err {
            PeerError::ProviderNotFound(id) => StorageError::ProviderNotFound(id),
            PeerError::Cancelled => StorageError::Cancelled,
            PeerError::TimedOut => StorageError::TimedOut,
            PeerError::StoreReadFailed(msg) => StorageError::StoreReadFailed(msg),
            other => StorageError::TransportFailed(other.to_string()),
        }
    }
}

/// Configuration errors raised while wiring the service together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Permanent object store not supplied.
    #[error("local object store instance not specified")]
    LocalStoreMissing,

    /// Temporary object store not supplied.
    #[error("temporary object store instance not specified")]
    TemporaryStoreMissing,

    /// Neither a peer instance nor host/router wiring supplied.
    #[error("peer instance not specified")]
    PeerMissing,

    /// Transport host not supplied to the peer.
    #[error("peer host not specified")]
    HostMissing,

    /// Content router not supplied to the peer.
    #[error("peer content router not specified")]
    RouterMissing,

    /// Provider cap must be at least one.
    #[error("max provider count should be at least 1")]
    MaxProvidersInvalid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ctx_error_mapping() {
        assert!(matches!(
            StorageError::from(CtxError::Cancelled),
            StorageError::Cancelled
        ));
        assert!(matches!(
            StorageError::from(CtxError::TimedOut),
            StorageError::TimedOut
        ));
    }

    #[test]
    fn test_store_error_mapping() {
        let id = ContentId::digest(b"missing");
        assert!(matches!(
            StorageError::from(StoreError::NotFound(id)),
            StorageError::NotFound(_)
        ));
        assert!(matches!(
            StorageError::from(StoreError::ReadFailed("disk".into())),
            StorageError::StoreReadFailed(_)
        ));
        assert!(matches!(
            StorageError::from(StoreError::WriteFailed("disk".into())),
            StorageError::StoreWriteFailed(_)
        ));
    }

    #[test]
    fn test_peer_error_mapping() {
        let id = ContentId::digest(b"block");
        assert!(matches!(
            StorageError::from(PeerError::ProviderNotFound(id)),
            StorageError::ProviderNotFound(_)
        ));
        assert!(matches!(
            StorageError::from(PeerError::Cancelled),
            StorageError::Cancelled
        ));
        assert!(matches!(
            StorageError::from(PeerError::TransportFailed("reset".into())),
            StorageError::TransportFailed(_)
        ));
    }

    #[test]
    fn test_config_error_display() {
        assert!(
            ConfigError::MaxProvidersInvalid
                .to_string()
                .contains("at least 1")
        );
        assert!(ConfigError::LocalStoreMissing.to_string().contains("local"));
    }
}
