//! Execution instance: owns Workers, Handlers, Streams; exposes `effect`/`run`.
//!
//! A `Task<T>` is strictly bound to one `scope_id` and carries an immutable
//! [`Ref`]. `T` is the type the caller's `run` function resolves to; the
//! kernel otherwise holds no opinion on payload shape (see SPEC_FULL §1
//! Non-goals), which is also why streamed chunks are carried as untyped
//! `serde_json::Value` rather than a third generic parameter.

use crate::handler::Handler;
use crate::stream::{Stream, StreamControl, StreamStatus, Unsubscribe};
use crate::worker::Worker;
use crate::worker_pool::WorkerPool;
use scopekit_core::{HandlerId, Ref, ScopeId, StreamId, WorkerId};
use scopekit_shared::{CancellationToken, ErrorEnvelope, Result, is_abort};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::Instrument;

/// Lifecycle of a [`Task`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// Constructed, `run()` not yet called.
    Pending,
    /// `run()` is in flight.
    Running,
    /// Settled successfully.
    Success,
    /// Settled with a non-abort error.
    Error,
    /// Settled because the signal was aborted.
    Aborted,
}

impl TaskStatus {
    /// `true` for `Pending`/`Running`.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }

    /// `true` for any of the three terminal outcomes.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !self.is_active()
    }
}

/// Options accepted by [`Task::run`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskRunOptions {
    /// Yield to the executor once before invoking the function.
    pub deferred: bool,
    /// Whether `ctx.emit` is armed for this run.
    pub streaming: bool,
}

/// Non-generic control surface used by `TaskTable`/`Scope` to hold
/// heterogeneous `Task<T>`s without needing to name `T`.
pub trait TaskControl: Send + Sync {
    /// Immutable execution identity.
    fn reference(&self) -> &Ref;
    /// Owning Scope.
    fn scope_id(&self) -> &ScopeId;
    /// Current status.
    fn status(&self) -> TaskStatus;
    /// `true` while `status ∈ {Pending, Running}`.
    fn is_active(&self) -> bool;
    /// `true` once settled.
    fn is_complete(&self) -> bool;
    /// Count of currently owned Workers.
    fn worker_count(&self) -> usize;
    /// Count of currently owned Handlers.
    fn handler_count(&self) -> usize;
    /// Count of currently owned Streams.
    fn stream_count(&self) -> usize;
    /// Cascade-abort: raise the signal, terminate every owned unit, finalize
    /// `Aborted`. No-op if already terminal.
    fn abort(&self);
}

type EmitFn = Arc<dyn Fn(serde_json::Value) -> bool + Send + Sync>;

/// A handle to a spawned Worker, exposing only `terminate` - the Worker
/// itself runs to completion on its own, started by `spawn_worker`.
pub struct WorkerHandle {
    worker: Arc<Worker>,
}

impl WorkerHandle {
    /// Identity of the underlying worker.
    #[must_use]
    pub const fn id(&self) -> &WorkerId {
        self.worker.id()
    }

    /// Raise the worker's own signal and move it to `Terminated`.
    pub fn terminate(&self) {
        self.worker.terminate();
    }
}

/// A handle to a registered Handler. The caller decides when to `execute`
/// it, or may `cancel` it before it ever runs.
pub struct HandlerHandle {
    handler: Arc<Handler>,
}

impl HandlerHandle {
    /// Identity of the underlying handler.
    #[must_use]
    pub const fn id(&self) -> &HandlerId {
        self.handler.id()
    }

    /// Run the bound function. Requires `Pending`.
    pub async fn execute(&self) -> Result<()> {
        self.handler.execute().await
    }

    /// Preempt or flag the handler for cancellation.
    pub fn cancel(&self) {
        self.handler.cancel();
    }
}

/// A handle to a created Stream of payload type `C`.
pub struct StreamHandle<C>
where
    C: Clone + Send + 'static,
{
    stream: Arc<Stream<C>>,
}

impl<C> StreamHandle<C>
where
    C: Clone + Send + 'static,
{
    /// Identity of the underlying stream.
    #[must_use]
    pub fn id(&self) -> &StreamId {
        self.stream.id()
    }

    /// Emit a value; see [`Stream::emit`].
    pub fn emit(&self, value: C) -> bool {
        self.stream.emit(value)
    }

    /// Subscribe `f`; see [`Stream::subscribe`].
    pub fn subscribe<F>(&self, f: F) -> Unsubscribe
    where
        F: Fn(C) + Send + Sync + 'static,
    {
        self.stream.subscribe(f)
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> StreamStatus {
        self.stream.status()
    }

    /// Close the stream.
    pub fn close(&self) {
        self.stream.close();
    }

    /// Abort the stream.
    pub fn abort(&self) {
        self.stream.abort();
    }
}

/// The per-run execution context handed to a caller's `run` function.
pub struct TaskContext<T>
where
    T: Clone + Send + 'static,
{
    reference: Ref,
    signal: CancellationToken,
    emit: Option<EmitFn>,
    task: Arc<Task<T>>,
}

impl<T> TaskContext<T>
where
    T: Clone + Send + 'static,
{
    /// This Task's immutable identity.
    #[must_use]
    pub const fn reference(&self) -> &Ref {
        &self.reference
    }

    /// This Task's cancellation signal.
    #[must_use]
    pub fn signal(&self) -> &CancellationToken {
        &self.signal
    }

    /// Push `value` into the run's streaming buffer. `None` if this run was
    /// not started with `streaming: true`; otherwise `Some(accepted)`.
    pub fn emit(&self, value: serde_json::Value) -> Option<bool> {
        self.emit.as_ref().map(|emit| emit(value))
    }

    /// Spawn a Worker bound to this Task. The worker starts running
    /// immediately on the executor; the returned handle only exposes
    /// `terminate`.
    pub fn spawn_worker<F, Fut>(&self, f: F) -> Result<WorkerHandle>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.task.spawn_worker(f)
    }

    /// Register a Handler bound to this Task. Does not execute it.
    pub fn add_handler<F, Fut>(&self, f: F) -> Result<HandlerHandle>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.task.add_handler(f)
    }

    /// Create a Stream of payload type `C` bound to this Task.
    pub fn create_stream<C>(&self) -> Result<StreamHandle<C>>
    where
        C: Clone + Send + 'static,
    {
        self.task.create_stream()
    }
}

struct TaskInner<T> {
    status: TaskStatus,
    result: Option<T>,
    error: Option<ErrorEnvelope>,
}

/// An execution instance with an immutable [`Ref`], owning every Worker,
/// Handler, and Stream created during its `run`.
pub struct Task<T>
where
    T: Clone + Send + 'static,
{
    reference: Ref,
    scope_id: ScopeId,
    signal: CancellationToken,
    pool: Option<WorkerPool>,
    ran: AtomicBool,
    inner: Mutex<TaskInner<T>>,
    workers: Mutex<HashMap<WorkerId, Arc<Worker>>>,
    handlers: Mutex<HashMap<HandlerId, Arc<Handler>>>,
    streams: Mutex<HashMap<StreamId, Arc<dyn StreamControl>>>,
}

impl<T> Task<T>
where
    T: Clone + Send + 'static,
{
    /// Construct a new, `Pending` Task for `scope_id`, optionally bound to
    /// `pool` and an explicit `reference` (otherwise one is minted).
    #[must_use]
    pub fn new(scope_id: ScopeId, pool: Option<WorkerPool>, reference: Option<Ref>) -> Arc<Self> {
        Arc::new(Self {
            reference: reference.unwrap_or_else(Ref::new),
            scope_id,
            signal: CancellationToken::new(),
            pool,
            ran: AtomicBool::new(false),
            inner: Mutex::new(TaskInner {
                status: TaskStatus::Pending,
                result: None,
                error: None,
            }),
            workers: Mutex::new(HashMap::new()),
            handlers: Mutex::new(HashMap::new()),
            streams: Mutex::new(HashMap::new()),
        })
    }

    /// Immutable execution identity.
    #[must_use]
    pub const fn reference(&self) -> &Ref {
        &self.reference
    }

    /// Owning Scope.
    #[must_use]
    pub const fn scope_id(&self) -> &ScopeId {
        &self.scope_id
    }

    /// This Task's cancellation signal.
    #[must_use]
    pub fn signal(&self) -> CancellationToken {
        self.signal.clone()
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> TaskStatus {
        lock(&self.inner).status
    }

    /// `true` while `status ∈ {Pending, Running}`.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status().is_active()
    }

    /// `true` once settled.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.status().is_terminal()
    }

    /// The captured result, once settled `Success`.
    #[must_use]
    pub fn result(&self) -> Option<T> {
        lock(&self.inner).result.clone()
    }

    /// The captured error, once settled `Error`.
    #[must_use]
    pub fn error(&self) -> Option<ErrorEnvelope> {
        lock(&self.inner).error.clone()
    }

    /// Currently owned Worker count.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        lock(&self.workers).len()
    }

    /// Currently owned Handler count.
    #[must_use]
    pub fn handler_count(&self) -> usize {
        lock(&self.handlers).len()
    }

    /// Currently owned Stream count.
    #[must_use]
    pub fn stream_count(&self) -> usize {
        lock(&self.streams).len()
    }

    /// Fast-path execution with zero scheduling overhead: requires
    /// `is_active`, then invokes `f` directly and returns its result as-is
    /// (synchronous or a future - the caller decides whether to await it).
    /// No Worker pool, no queueing, no owned-unit registration.
    pub fn effect<R>(&self, f: impl FnOnce() -> R) -> Result<R> {
        if !self.is_active() {
            return Err(ErrorEnvelope::execution_rejected("task is not active"));
        }
        Ok(f())
    }

    /// Spawn a Worker bound to this Task and start it running immediately.
    /// Requires `is_active`.
    pub fn spawn_worker<F, Fut>(self: &Arc<Self>, f: F) -> Result<WorkerHandle>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        if !self.is_active() {
            return Err(ErrorEnvelope::execution_rejected("task is not active"));
        }

        let worker = Arc::new(Worker::new(self.reference.clone()));
        lock(&self.workers).insert(worker.id().clone(), Arc::clone(&worker));

        let spawned = Arc::clone(&worker);
        tokio::spawn(async move {
            let _ignored = spawned.start(f).await;
        });

        Ok(WorkerHandle { worker })
    }

    /// Register a Handler bound to this Task; does not execute it.
    /// Requires `is_active`.
    pub fn add_handler<F, Fut>(self: &Arc<Self>, f: F) -> Result<HandlerHandle>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        if !self.is_active() {
            return Err(ErrorEnvelope::execution_rejected("task is not active"));
        }

        let handler = Arc::new(Handler::new(self.reference.clone()));
        handler.set_function(f)?;
        lock(&self.handlers).insert(handler.id().clone(), Arc::clone(&handler));

        Ok(HandlerHandle { handler })
    }

    /// Create a Stream of payload type `C` bound to this Task. Requires
    /// `is_active`.
    pub fn create_stream<C>(self: &Arc<Self>) -> Result<StreamHandle<C>>
    where
        C: Clone + Send + 'static,
    {
        if !self.is_active() {
            return Err(ErrorEnvelope::execution_rejected("task is not active"));
        }

        let stream = Stream::<C>::new(self.reference.clone());
        lock(&self.streams).insert(stream.id().clone(), Arc::clone(&stream) as Arc<dyn StreamControl>);

        Ok(StreamHandle { stream })
    }

    /// Run `f(ctx)` to completion. Requires `status = Pending`; a second
    /// call on the same Task fails fast. Moves to `Running`, then:
    /// - if `opts.deferred`, yields to the executor once before invoking `f`;
    /// - else if this Task owns a pool, submits `f` to it;
    /// - else invokes `f` directly.
    ///
    /// Checks `signal` both before scheduling and after settlement; either
    /// observation finalizes the Task `Aborted`. A normal return finalizes
    /// `Success` and stores the result; any other error finalizes `Error`.
    pub async fn run<F, Fut>(self: &Arc<Self>, f: F, opts: TaskRunOptions) -> Result<T>
    where
        F: FnOnce(TaskContext<T>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        if self.ran.swap(true, Ordering::SeqCst) {
            return Err(ErrorEnvelope::developer_error("Task::run called more than once"));
        }

        {
            let mut guard = lock(&self.inner);
            if guard.status != TaskStatus::Pending {
                return Err(ErrorEnvelope::developer_error(
                    "Task::run called outside Pending status",
                ));
            }
            guard.status = TaskStatus::Running;
        }

        if self.signal.is_cancelled() {
            self.finalize_terminal(TaskStatus::Aborted, None, None);
            return Err(ErrorEnvelope::cancelled("task aborted before running"));
        }

        let emit: Option<EmitFn> = opts.streaming.then(|| {
            let buffer = Arc::new(Mutex::new(crate::stream_buffer::StreamBuffer::<
                serde_json::Value,
            >::new()));
            Arc::new(move |value: serde_json::Value| lock(&buffer).push(value)) as EmitFn
        });

        let ctx = TaskContext {
            reference: self.reference.clone(),
            signal: self.signal.clone(),
            emit,
            task: Arc::clone(self),
        };

        let span = tracing::info_span!("task.run", task_ref = %self.reference, scope_id = %self.scope_id);

        let outcome = if opts.deferred {
            tokio::task::yield_now().await;
            f(ctx).instrument(span).await
        } else if let Some(pool) = self.pool.clone() {
            pool.execute(move || f(ctx)).instrument(span).await
        } else {
            f(ctx).instrument(span).await
        };

        if self.signal.is_cancelled() {
            self.finalize_terminal(TaskStatus::Aborted, None, None);
            return Err(ErrorEnvelope::cancelled("task aborted during run"));
        }

        match outcome {
            Ok(value) => {
                self.finalize_terminal(TaskStatus::Success, Some(value.clone()), None);
                Ok(value)
            },
            Err(error) if is_abort(&error) => {
                self.finalize_terminal(TaskStatus::Aborted, None, None);
                Err(error)
            },
            Err(error) => {
                self.finalize_terminal(TaskStatus::Error, None, Some(error.clone()));
                Err(error)
            },
        }
    }

    fn finalize_terminal(&self, status: TaskStatus, result: Option<T>, error: Option<ErrorEnvelope>) {
        let mut guard = lock(&self.inner);
        if guard.status.is_terminal() {
            return;
        }
        guard.status = status;
        guard.result = result;
        guard.error = error;
    }
}

impl<T> TaskControl for Task<T>
where
    T: Clone + Send + 'static,
{
    fn reference(&self) -> &Ref {
        &self.reference
    }

    fn scope_id(&self) -> &ScopeId {
        &self.scope_id
    }

    fn status(&self) -> TaskStatus {
        Self::status(self)
    }

    fn is_active(&self) -> bool {
        Self::is_active(self)
    }

    fn is_complete(&self) -> bool {
        Self::is_complete(self)
    }

    fn worker_count(&self) -> usize {
        Self::worker_count(self)
    }

    fn handler_count(&self) -> usize {
        Self::handler_count(self)
    }

    fn stream_count(&self) -> usize {
        Self::stream_count(self)
    }

    /// Cascade-abort: raise the signal, `terminate` every owned Worker,
    /// `cancel` every owned Handler, `abort` every owned Stream, then
    /// finalize `Aborted`. No-op if already terminal.
    fn abort(&self) {
        if !self.is_active() {
            return;
        }

        self.signal.cancel();
        for worker in lock(&self.workers).values() {
            worker.terminate();
        }
        for handler in lock(&self.handlers).values() {
            handler.cancel();
        }
        for stream in lock(&self.streams).values() {
            stream.abort();
        }

        self.finalize_terminal(TaskStatus::Aborted, None, None);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope_id() -> ScopeId {
        ScopeId::new("test-scope")
    }

    #[tokio::test]
    async fn run_completes_successfully_without_a_pool() {
        let task = Task::<i32>::new(scope_id(), None, None);
        let result = task.run(|_ctx| async move { Ok(42) }, TaskRunOptions::default()).await;

        assert!(result.is_ok());
        let Ok(value) = result else { return };
        assert_eq!(value, 42);
        assert_eq!(task.status(), TaskStatus::Success);
        assert_eq!(task.result(), Some(42));
    }

    #[tokio::test]
    async fn run_fails_with_captured_error() {
        let task = Task::<i32>::new(scope_id(), None, None);
        let result = task
            .run(
                |_ctx| async move { Err(ErrorEnvelope::execution_rejected("boom")) },
                TaskRunOptions::default(),
            )
            .await;

        assert!(result.is_err());
        assert_eq!(task.status(), TaskStatus::Error);
        assert!(task.error().is_some());
    }

    #[tokio::test]
    async fn run_twice_rejects_the_second_call() {
        let task = Task::<i32>::new(scope_id(), None, None);
        let first = task.run(|_ctx| async move { Ok(1) }, TaskRunOptions::default()).await;
        assert!(first.is_ok());

        let second = task.run(|_ctx| async move { Ok(2) }, TaskRunOptions::default()).await;
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn run_with_pool_dispatches_through_it() {
        let pool = WorkerPool::new(1, 2);
        let task = Task::<i32>::new(scope_id(), Some(pool), None);
        let result = task.run(|_ctx| async move { Ok(7) }, TaskRunOptions::default()).await;
        assert!(result.is_ok());
        let Ok(value) = result else { return };
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn deferred_run_yields_before_executing() {
        let task = Task::<i32>::new(scope_id(), None, None);
        let opts = TaskRunOptions { deferred: true, streaming: false };
        let result = task.run(|_ctx| async move { Ok(9) }, opts).await;
        assert!(result.is_ok());
        let Ok(value) = result else { return };
        assert_eq!(value, 9);
    }

    #[tokio::test]
    async fn abort_during_run_cascades_to_owned_worker_and_finalizes_aborted() {
        let task = Task::<()>::new(scope_id(), None, None);
        let task_for_run = Arc::clone(&task);

        let run = async move {
            task_for_run
                .run(
                    |ctx| async move {
                        let worker = ctx.spawn_worker(|signal| async move {
                            signal.cancelled().await;
                            Ok(())
                        })?;
                        ctx.signal().cancelled().await;
                        let _ = worker.id();
                        Err(ErrorEnvelope::cancelled("observed abort"))
                    },
                    TaskRunOptions::default(),
                )
                .await
        };

        let task_for_abort = Arc::clone(&task);
        let abort = async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            task_for_abort.abort();
        };

        let (result, ()) = tokio::join!(run, abort);
        assert!(result.is_err());
        assert_eq!(task.status(), TaskStatus::Aborted);
    }

    #[tokio::test]
    async fn effect_requires_active_task() {
        let task = Task::<i32>::new(scope_id(), None, None);
        let result = task.effect(|| 5);
        assert!(result.is_ok());
        let Ok(value) = result else { return };
        assert_eq!(value, 5);

        let run = task.run(|_ctx| async move { Ok(1) }, TaskRunOptions::default()).await;
        assert!(run.is_ok());

        let after_settle = task.effect(|| 9);
        assert!(after_settle.is_err());
    }

    #[tokio::test]
    async fn streaming_emit_reports_backpressure() {
        let task = Task::<()>::new(scope_id(), None, None);
        let opts = TaskRunOptions { deferred: false, streaming: true };

        let result = task
            .run(
                |ctx| async move {
                    assert_eq!(ctx.emit(serde_json::json!(1)), Some(true));
                    Ok(())
                },
                opts,
            )
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn non_streaming_emit_returns_none() {
        let task = Task::<()>::new(scope_id(), None, None);

        let result = task
            .run(
                |ctx| async move {
                    assert_eq!(ctx.emit(serde_json::json!(1)), None);
                    Ok(())
                },
                TaskRunOptions::default(),
            )
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn create_stream_and_add_handler_from_ctx() {
        let task = Task::<()>::new(scope_id(), None, None);

        let result = task
            .run(
                |ctx| async move {
                    let stream = ctx.create_stream::<i32>()?;
                    assert!(stream.emit(1));

                    let handler = ctx.add_handler(|_signal| async move { Ok(()) })?;
                    handler.execute().await?;
                    Ok(())
                },
                TaskRunOptions::default(),
            )
            .await;
        assert!(result.is_ok());
    }

    #[test]
    fn abort_on_pending_task_is_idempotent() {
        let task = Task::<()>::new(scope_id(), None, None);
        task.abort();
        task.abort();
        assert_eq!(task.status(), TaskStatus::Aborted);
        assert!(task.signal().is_cancelled());
    }

    #[test]
    fn spawn_worker_requires_active_task() {
        let task = Task::<()>::new(scope_id(), None, None);
        task.abort();
        let result = task.spawn_worker(|_signal| async move { Ok(()) });
        assert!(result.is_err());
    }
}
