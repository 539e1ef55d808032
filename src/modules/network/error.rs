use thiserror::Error;

use crate::modules::storage::block::ContentId;
use crate::utils::ctx::CtxError;

/// Errors that can occur in the peer subsystem.
#[derive(Debug, Error)]
pub enum PeerError {
    /// No peer on the routing network provides the block.
    #[error("not found any provider for block {0}")]
    ProviderNotFound(ContentId),

    /// Opening or driving a peer stream failed.
    #[error("peer transport failed: {0}")]
    TransportFailed(String),

    /// The remote peer failed to serve the request.
    #[error("remote peer error: {0}")]
    RemoteFailed(String),

    /// Reading the temporary store failed.
    #[error("temporary store read failed: {0}")]
    StoreReadFailed(String),

    /// Operation cancelled through its context.
    #[error("operation context cancelled")]
    Cancelled,

    /// Operation deadline exceeded.
    #[error("operation timed out")]
    TimedOut,

    /// The node's event loop is gone.
    #[error("peer node not running")]
    NotRunning,
}

impl From<CtxError> for PeerError {
    fn from(err: CtxError) -> Self {
        match err {
            CtxError::Cancelled => PeerError::Cancelled,
            CtxError::TimedOut => PeerError::TimedOut,
        }
    }
}
