//! Single-shot cancelable async unit, bound to a Task.

use scopekit_core::{HandlerId, Ref};
use scopekit_shared::{CancellationToken, ErrorEnvelope, Result};
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Lifecycle of a [`Handler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerStatus {
    /// Constructed, function bound (or not yet), not started.
    Pending,
    /// `execute()` is in flight.
    Running,
    /// Finished normally.
    Completed,
    /// Finished with a non-cancellation error.
    Failed,
    /// Preempted or flagged cancelled during its run.
    Cancelled,
}

type HandlerFn = Box<dyn FnOnce(CancellationToken) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> + Send>;

struct HandlerInner {
    status: HandlerStatus,
    function: Option<HandlerFn>,
    error: Option<ErrorEnvelope>,
}

/// A single-shot cancelable unit of work owned by a Task.
///
/// `set_function` must be called exactly once before `execute`. Cancellation
/// may preempt a still-`Pending` handler outright, or merely flag a running
/// one so its eventual outcome is reported as `Cancelled` rather than
/// `Completed`/`Failed`.
pub struct Handler {
    id: HandlerId,
    reference: Ref,
    signal: CancellationToken,
    cancel_requested: AtomicBool,
    inner: Mutex<HandlerInner>,
}

impl Handler {
    /// Construct a new, `Pending` handler with no bound function yet.
    #[must_use]
    pub fn new(reference: Ref) -> Self {
        Self {
            id: HandlerId::new(),
            reference,
            signal: CancellationToken::new(),
            cancel_requested: AtomicBool::new(false),
            inner: Mutex::new(HandlerInner {
                status: HandlerStatus::Pending,
                function: None,
                error: None,
            }),
        }
    }

    /// Identity of this handler.
    #[must_use]
    pub const fn id(&self) -> &HandlerId {
        &self.id
    }

    /// The Task `Ref` this handler belongs to.
    #[must_use]
    pub const fn reference(&self) -> &Ref {
        &self.reference
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> HandlerStatus {
        lock(&self.inner).status
    }

    /// Bind the handler's function. Must be called exactly once before
    /// `execute()`; a second call is a developer error and the handler's
    /// status is left unchanged (see SPEC_FULL §8 open question).
    pub fn set_function<F, Fut>(&self, f: F) -> Result<()>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let mut guard = lock(&self.inner);
        if guard.function.is_some() {
            return Err(ErrorEnvelope::developer_error(
                "Handler::set_function called more than once",
            ));
        }
        guard.function = Some(Box::new(move |signal| Box::pin(f(signal))));
        Ok(())
    }

    /// Request cancellation. If `Pending`, the status jumps to `Cancelled`
    /// immediately; a `Running` handler is flagged so its eventual outcome
    /// becomes `Cancelled` rather than `Completed`/`Failed`. Ignored once
    /// terminal.
    pub fn cancel(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
        self.signal.cancel();

        let mut guard = lock(&self.inner);
        if guard.status == HandlerStatus::Pending {
            guard.status = HandlerStatus::Cancelled;
        }
    }

    /// Execute the bound function. Requires `Pending` and a function bound
    /// via `set_function`. On completion: if cancellation was requested
    /// during the run, the final status is `Cancelled` with no error
    /// surfaced; otherwise `Completed`. On failure: `Cancelled` if
    /// cancellation was requested, else `Failed` with the captured error
    /// re-raised.
    pub async fn execute(&self) -> Result<()> {
        let function = {
            let mut guard = lock(&self.inner);
            if guard.status != HandlerStatus::Pending {
                return Err(ErrorEnvelope::developer_error(
                    "Handler::execute called outside Pending status",
                ));
            }
            let Some(function) = guard.function.take() else {
                return Err(ErrorEnvelope::developer_error(
                    "Handler::execute called before set_function",
                ));
            };
            guard.status = HandlerStatus::Running;
            function
        };

        let outcome = function(self.signal.clone()).await;
        let cancelled = self.cancel_requested.load(Ordering::SeqCst);

        let mut guard = lock(&self.inner);
        match outcome {
            Ok(()) if cancelled => {
                guard.status = HandlerStatus::Cancelled;
                Ok(())
            },
            Ok(()) => {
                guard.status = HandlerStatus::Completed;
                Ok(())
            },
            Err(_) if cancelled => {
                guard.status = HandlerStatus::Cancelled;
                Ok(())
            },
            Err(error) => {
                guard.status = HandlerStatus::Failed;
                guard.error = Some(error.clone());
                Err(error)
            },
        }
    }

    /// The captured error, if the handler finalized as `Failed`.
    #[must_use]
    pub fn error(&self) -> Option<ErrorEnvelope> {
        lock(&self.inner).error.clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn execute_completes_normally() {
        let handler = Handler::new(Ref::new());
        let bound = handler.set_function(|_signal| async move { Ok(()) });
        assert!(bound.is_ok());

        let result = handler.execute().await;
        assert!(result.is_ok());
        assert_eq!(handler.status(), HandlerStatus::Completed);
    }

    #[tokio::test]
    async fn execute_fails_with_captured_error() {
        let handler = Handler::new(Ref::new());
        let bound = handler.set_function(|_signal| async move {
            Err(ErrorEnvelope::execution_rejected("boom"))
        });
        assert!(bound.is_ok());

        let result = handler.execute().await;
        assert!(result.is_err());
        assert_eq!(handler.status(), HandlerStatus::Failed);
        assert!(handler.error().is_some());
    }

    #[test]
    fn cancel_preempts_pending_handler() {
        let handler = Handler::new(Ref::new());
        handler.cancel();
        assert_eq!(handler.status(), HandlerStatus::Cancelled);
    }

    #[tokio::test]
    async fn cancel_during_run_overrides_completion_outcome() {
        let handler = Handler::new(Ref::new());
        let bound = handler.set_function(|signal| async move {
            signal.cancelled().await;
            Ok(())
        });
        assert!(bound.is_ok());

        let execution = async { handler.execute().await };
        let cancel_after_start = async {
            tokio::task::yield_now().await;
            handler.cancel();
        };

        let (result, ()) = tokio::join!(execution, cancel_after_start);
        assert!(result.is_ok());
        assert_eq!(handler.status(), HandlerStatus::Cancelled);
    }

    #[test]
    fn set_function_twice_is_a_developer_error_and_leaves_status_unchanged() {
        let handler = Handler::new(Ref::new());
        let first = handler.set_function(|_signal| async move { Ok(()) });
        assert!(first.is_ok());
        let second = handler.set_function(|_signal| async move { Ok(()) });

        assert!(second.is_err());
        assert_eq!(handler.status(), HandlerStatus::Pending);
    }

    #[tokio::test]
    async fn execute_requires_pending_status() {
        let handler = Handler::new(Ref::new());
        let bound = handler.set_function(|_signal| async move { Ok(()) });
        assert!(bound.is_ok());
        let first = handler.execute().await;
        assert!(first.is_ok());

        let second = handler.execute().await;
        assert!(second.is_err());
    }
}
