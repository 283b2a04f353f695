//! Task-bound cancelable async unit of work, with its own abort signal.

use scopekit_core::{Ref, WorkerId};
use scopekit_shared::{CancellationToken, ErrorEnvelope, Result};
use std::future::Future;
use std::sync::Mutex;

/// Lifecycle of a [`Worker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    /// Constructed, not yet started.
    Idle,
    /// `start()` is in flight.
    Running,
    /// Finished, whether normally or via a swallowed abort.
    Terminated,
    /// Finished with a non-abort error.
    Failed,
}

struct WorkerInner {
    status: WorkerStatus,
    error: Option<ErrorEnvelope>,
}

/// A Task-bound unit of cooperative asynchronous work.
///
/// Every `Worker` owns its own [`CancellationToken`], independent of (but
/// cascaded from) its owning Task's signal.
pub struct Worker {
    id: WorkerId,
    reference: Ref,
    signal: CancellationToken,
    inner: Mutex<WorkerInner>,
}

impl Worker {
    /// Construct a new, `Idle` worker bound to `reference`.
    #[must_use]
    pub fn new(reference: Ref) -> Self {
        Self {
            id: WorkerId::new(),
            reference,
            signal: CancellationToken::new(),
            inner: Mutex::new(WorkerInner {
                status: WorkerStatus::Idle,
                error: None,
            }),
        }
    }

    /// Identity of this worker.
    #[must_use]
    pub const fn id(&self) -> &WorkerId {
        &self.id
    }

    /// The Task `Ref` this worker belongs to.
    #[must_use]
    pub const fn reference(&self) -> &Ref {
        &self.reference
    }

    /// This worker's own cancellation signal, handed to its function.
    #[must_use]
    pub fn signal(&self) -> CancellationToken {
        self.signal.clone()
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> WorkerStatus {
        lock(&self.inner).status
    }

    /// `true` while the worker may still be terminated (`Idle` or `Running`).
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self.status(), WorkerStatus::Idle | WorkerStatus::Running)
    }

    /// The captured error, if the worker finalized as `Failed`.
    #[must_use]
    pub fn error(&self) -> Option<ErrorEnvelope> {
        lock(&self.inner).error.clone()
    }

    /// Run `fn(signal)` to completion. Requires `Idle`.
    ///
    /// On normal return: if still `Running` (not concurrently terminated),
    /// moves to `Terminated`. On failure: if the worker's own signal was
    /// aborted, the failure is swallowed and the worker moves to
    /// `Terminated`; otherwise it moves to `Failed`, captures the error, and
    /// re-raises it.
    pub async fn start<F, Fut>(&self, f: F) -> Result<()>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        {
            let mut guard = lock(&self.inner);
            if guard.status != WorkerStatus::Idle {
                return Err(ErrorEnvelope::developer_error(
                    "Worker::start called outside Idle status",
                ));
            }
            guard.status = WorkerStatus::Running;
        }

        let outcome = f(self.signal.clone()).await;

        let mut guard = lock(&self.inner);
        match outcome {
            Ok(()) => {
                if guard.status == WorkerStatus::Running {
                    guard.status = WorkerStatus::Terminated;
                }
                Ok(())
            },
            Err(error) if self.signal.is_cancelled() => {
                guard.status = WorkerStatus::Terminated;
                let _ = error;
                Ok(())
            },
            Err(error) => {
                guard.status = WorkerStatus::Failed;
                guard.error = Some(error.clone());
                Err(error)
            },
        }
    }

    /// Raise this worker's abort signal and move it to `Terminated` if it
    /// was still active. Idempotent; never overwrites a `Failed` worker with
    /// `Terminated`.
    pub fn terminate(&self) {
        if !self.is_active() {
            return;
        }
        self.signal.cancel();

        let mut guard = lock(&self.inner);
        if matches!(guard.status, WorkerStatus::Idle | WorkerStatus::Running) {
            guard.status = WorkerStatus::Terminated;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn start_terminates_on_normal_completion() {
        let worker = Worker::new(Ref::new());
        let result = worker.start(|_signal| async move { Ok(()) }).await;
        assert!(result.is_ok());
        assert_eq!(worker.status(), WorkerStatus::Terminated);
    }

    #[tokio::test]
    async fn start_fails_on_non_abort_error() {
        let worker = Worker::new(Ref::new());
        let result = worker
            .start(|_signal| async move { Err(ErrorEnvelope::execution_rejected("boom")) })
            .await;

        assert!(result.is_err());
        assert_eq!(worker.status(), WorkerStatus::Failed);
        assert!(worker.error().is_some());
    }

    #[tokio::test]
    async fn terminate_aborts_signal_and_swallows_the_resulting_error() {
        let worker = Worker::new(Ref::new());

        let run = async {
            worker
                .start(|signal| async move {
                    signal.cancelled().await;
                    Err(ErrorEnvelope::cancelled("stopped"))
                })
                .await
        };
        let stop = async {
            tokio::task::yield_now().await;
            worker.terminate();
        };

        let (result, ()) = tokio::join!(run, stop);
        assert!(result.is_ok());
        assert_eq!(worker.status(), WorkerStatus::Terminated);
    }

    #[test]
    fn terminate_is_idempotent() {
        let worker = Worker::new(Ref::new());
        worker.terminate();
        worker.terminate();
        assert_eq!(worker.status(), WorkerStatus::Terminated);
        assert!(worker.signal().is_cancelled());
    }

    #[tokio::test]
    async fn terminate_never_downgrades_failed_to_terminated() {
        let worker = Worker::new(Ref::new());
        let result = worker
            .start(|_signal| async move { Err(ErrorEnvelope::execution_rejected("boom")) })
            .await;
        assert!(result.is_err());
        assert_eq!(worker.status(), WorkerStatus::Failed);

        worker.terminate();
        assert_eq!(worker.status(), WorkerStatus::Failed);
    }
}
