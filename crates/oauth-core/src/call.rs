//! Per-call context threaded through provider, storage, and interceptor
//! operations: a deadline and a cancellation handle.
//!
//! Every I/O-performing operation in the design accepts one of these so
//! cancellation propagates from the caller into blocking network calls
//! without corrupting in-flight state (spec §5).

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{OAuthError, OAuthResult};

/// Context passed into provider/store/interceptor operations.
#[derive(Debug, Clone)]
pub struct CallContext {
    /// Correlates this call with a request across logs and audit events.
    pub request_id: String,
    /// Cancellation handle; checked before any sleep or blocking I/O.
    pub cancellation: CancellationToken,
}

impl CallContext {
    /// A fresh context with a random request id and a cancellation token
    /// that is never triggered.
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            cancellation: CancellationToken::new(),
        }
    }

    /// Return `Err(Cancelled)` if cancellation has already been requested.
    pub fn check_cancelled(&self) -> OAuthResult<()> {
        if self.cancellation.is_cancelled() {
            Err(OAuthError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep for `dur`, returning early with `Cancelled` if the token fires
    /// first. Retrying code must call this instead of a bare `sleep` so
    /// cancellation is checked before every backoff wait (spec §5).
    pub async fn cancellable_sleep(&self, dur: Duration) -> OAuthResult<()> {
        self.check_cancelled()?;
        tokio::select! {
            _ = tokio::time::sleep(dur) => Ok(()),
            _ = self.cancellation.cancelled() => Err(OAuthError::Cancelled),
        }
    }

    /// Run `fut` with a deadline, mapping elapsed time to `Timeout`.
    pub async fn with_deadline<T>(
        &self,
        deadline: Duration,
        fut: impl std::future::Future<Output = OAuthResult<T>>,
    ) -> OAuthResult<T> {
        tokio::select! {
            res = fut => res,
            _ = tokio::time::sleep(deadline) => Err(OAuthError::Timeout),
            _ = self.cancellation.cancelled() => Err(OAuthError::Cancelled),
        }
    }
}
