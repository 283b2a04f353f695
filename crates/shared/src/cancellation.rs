//! The abort-signal cancellation primitive shared by Task and Worker.
//!
//! A `CancellationToken` is a clonable handle over a monotonic `aborted`
//! flag. Once cancelled, every clone observes it immediately and every
//! current or future waiter on [`CancellationToken::cancelled`] resolves.
//! Cancellation never un-happens: there is no reset.

use crate::{ErrorEnvelope, Result};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// A clonable cancellation token that can be awaited.
///
/// This is the kernel's abort-signal equivalent: Task and Worker each own
/// one, `cancel()` is idempotent, and waiters are woken exactly once.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    inner: Arc<CancellationState>,
}

#[derive(Debug)]
struct CancellationState {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancellationToken {
    /// Create a new token in the non-cancelled state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CancellationState {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Cancel the token and wake all current/future waiters. Idempotent.
    pub fn cancel(&self) {
        let was_cancelled = self.inner.cancelled.swap(true, Ordering::SeqCst);
        if !was_cancelled {
            self.inner.notify.notify_waiters();
        }
    }

    /// Returns true if the token has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Wait until the token is cancelled.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }

        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
            if self.is_cancelled() {
                return;
            }
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CancellationToken {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "CancellationToken(cancelled={})",
            self.is_cancelled()
        )
    }
}

/// Return a cancellation error tagged with `operation` when the token has
/// already fired; otherwise do nothing.
pub fn ensure_not_cancelled(token: &CancellationToken, operation: &'static str) -> Result<()> {
    if token.is_cancelled() {
        return Err(ErrorEnvelope::cancelled("operation cancelled").with_metadata("operation", operation));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn new_token_is_not_cancelled() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn cancel_is_idempotent() {
        let token = CancellationToken::new();
        token.cancel();
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_resolves_immediately_when_already_cancelled() {
        let token = CancellationToken::new();
        token.cancel();

        let result = tokio::time::timeout(Duration::from_millis(50), token.cancelled()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn cancelled_wakes_existing_waiters() {
        let token = CancellationToken::new();
        let waiter_token = token.clone();

        let waiter = tokio::spawn(async move {
            waiter_token.cancelled().await;
        });

        tokio::task::yield_now().await;
        token.cancel();

        let result = tokio::time::timeout(Duration::from_millis(100), waiter).await;
        assert!(result.is_ok(), "waiter should be woken after cancel");
    }

    #[tokio::test]
    async fn clones_share_cancellation_state() {
        let token = CancellationToken::new();
        let clone = token.clone();

        clone.cancel();

        assert!(token.is_cancelled());
    }
}
