//! Operation context: cooperative cancellation plus an optional deadline.
//!
//! Every long-running storage or peer operation takes an `&OpContext` and
//! checks it before issuing I/O and after each asynchronous receive.
//! Cancellation and deadline expiry are reported as distinct errors so the
//! caller can tell an explicit cancel from a timeout.

use std::time::{Duration, Instant};

use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Context error returned by [`OpContext::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CtxError {
    /// The operation was cancelled through its token.
    #[error("operation context cancelled")]
    Cancelled,

    /// The operation deadline expired.
    #[error("operation timed out")]
    TimedOut,
}

/// Cancellation token with an optional deadline.
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl OpContext {
    /// Context that is never cancelled and never expires.
    pub fn background() -> Self {
        Self::default()
    }

    /// Context driven by an external cancellation token.
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Derive a context that additionally expires at `deadline`.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        Self {
            token: self.token.clone(),
            deadline: Some(match self.deadline {
                Some(existing) => existing.min(deadline),
                None => deadline,
            }),
        }
    }

    /// Derive a context that expires after `timeout` from now.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// The underlying cancellation token.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Check the context without suspending.
    ///
    /// Cancellation wins over deadline expiry when both hold.
    pub fn check(&self) -> Result<(), CtxError> {
        if self.token.is_cancelled() {
            return Err(CtxError::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(CtxError::TimedOut);
            }
        }
        Ok(())
    }

    /// Resolve once the context is cancelled or its deadline expires.
    ///
    /// Pending forever on a background context; intended for `select!` arms.
    pub async fn done(&self) -> CtxError {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => CtxError::Cancelled,
                    _ = tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)) => {
                        CtxError::TimedOut
                    }
                }
            }
            None => {
                self.token.cancelled().await;
                CtxError::Cancelled
            }
        }
    }
}
