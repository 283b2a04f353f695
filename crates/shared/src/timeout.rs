//! Timeout helpers with cancellation awareness.

use crate::cancellation::ensure_not_cancelled;
use crate::{CancellationToken, ErrorClass, ErrorCode, ErrorEnvelope, Result};
use std::future::Future;
use std::time::Duration;

/// Apply a timeout to a future, honoring a [`CancellationToken`].
///
/// Callers build timeouts over the kernel by racing this against
/// `task.abort()` — the kernel itself does not impose timeouts (see
/// `Non-goals`).
pub async fn timeout_with_context<T, F>(
    signal: &CancellationToken,
    timeout: Duration,
    operation: &'static str,
    fut: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    ensure_not_cancelled(signal, operation)?;

    tokio::select! {
        () = signal.cancelled() => Err(cancelled_error(operation)),
        res = tokio::time::timeout(timeout, fut) => {
            res.unwrap_or_else(|_| Err(timeout_error(operation)))
        }
    }
}

fn timeout_error(operation: &'static str) -> ErrorEnvelope {
    ErrorEnvelope::unexpected(
        ErrorCode::timeout(),
        format!("operation timed out: {operation}"),
        ErrorClass::Retriable,
    )
    .with_metadata("operation", operation)
}

fn cancelled_error(operation: &'static str) -> ErrorEnvelope {
    ErrorEnvelope::cancelled("operation cancelled").with_metadata("operation", operation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Duration;

    #[tokio::test]
    async fn timeout_triggers() {
        let signal = CancellationToken::new();
        let fut = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok::<_, ErrorEnvelope>(())
        };

        let task = tokio::spawn(async move {
            timeout_with_context(&signal, Duration::from_millis(10), "test", fut).await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        let joined = task.await;
        assert!(joined.is_ok());
        let Ok(result) = joined else { return };
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn cancellation_triggers() {
        let signal = CancellationToken::new();
        let waiter = signal.clone();
        let fut = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok::<_, ErrorEnvelope>(())
        };

        let task = tokio::spawn(async move {
            timeout_with_context(&waiter, Duration::from_millis(200), "test_cancel", fut).await
        });

        tokio::task::yield_now().await;
        signal.cancel();
        let joined = task.await;
        assert!(joined.is_ok());
        let Ok(result) = joined else { return };
        assert!(result.is_err());
    }
}
