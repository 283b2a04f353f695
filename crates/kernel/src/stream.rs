//! Live multicast channel with replay to late subscribers.
//!
//! A `Stream<T>` is strictly bound to the Task that created it: it closes or
//! aborts with its Task, and its replay buffer is deliberately unbounded
//! (callers who need bounded replay pair `ctx.emit` with a
//! [`crate::stream_buffer::StreamBuffer`] instead - see SPEC_FULL §9).
//!
//! `Stream` is always handed out wrapped in `Arc`, since `subscribe` needs a
//! stable handle to hand back to the caller's `Unsubscribe`.

use scopekit_core::{Ref, StreamId};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// Lifecycle of a [`Stream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    /// Accepting emissions and subscribers.
    Open,
    /// Closed gracefully. Terminal.
    Closed,
    /// Aborted (via Task cancellation cascade). Terminal.
    Aborted,
}

/// Non-generic control surface used by `Task` to cascade cancellation over
/// streams of differing payload types without needing to name `T`.
pub trait StreamControl: Send + Sync {
    /// Identity of the stream.
    fn id(&self) -> &StreamId;
    /// Current status.
    fn status(&self) -> StreamStatus;
    /// Abort the stream: `Open -> Aborted`, clearing subscribers. Idempotent.
    fn abort(&self);
    /// Close the stream: `Open -> Closed`, clearing subscribers. Idempotent.
    fn close(&self);
}

type Subscriber<T> = Box<dyn Fn(T) + Send + Sync>;

struct StreamInner<T> {
    status: StreamStatus,
    buffer: Vec<T>,
    subscribers: Vec<(u64, Subscriber<T>)>,
}

/// A live multicast channel with replay-on-subscribe semantics.
pub struct Stream<T> {
    id: StreamId,
    reference: Ref,
    inner: Mutex<StreamInner<T>>,
    next_subscription_id: AtomicU64,
}

/// A handle returned by [`Stream::subscribe`] that removes the subscriber
/// exactly once, on demand.
pub struct Unsubscribe {
    inner: Box<dyn FnOnce() + Send>,
}

impl Unsubscribe {
    /// Build an unsubscribe handle from an arbitrary removal closure. Shared
    /// with `Authority`'s broadcast listener table, which has the same
    /// "remove exactly this registration" shape.
    pub(crate) fn new<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self { inner: Box::new(f) }
    }

    /// A handle that does nothing when invoked (returned when subscribing to
    /// a non-`Open` stream, matching §4.4's "no-op unsubscribe" rule).
    pub(crate) fn noop() -> Self {
        Self::new(|| {})
    }

    /// Remove the associated subscriber. Idempotent in effect: calling this
    /// consumes the handle, so it can only ever run once.
    pub fn unsubscribe(self) {
        (self.inner)();
    }
}

impl<T> Stream<T>
where
    T: Clone + Send + 'static,
{
    /// Construct a new, `Open` stream bound to `reference`, wrapped in the
    /// `Arc` every call site is expected to hold it behind.
    #[must_use]
    pub fn new(reference: Ref) -> Arc<Self> {
        Arc::new(Self {
            id: StreamId::new(),
            reference,
            inner: Mutex::new(StreamInner {
                status: StreamStatus::Open,
                buffer: Vec::new(),
                subscribers: Vec::new(),
            }),
            next_subscription_id: AtomicU64::new(1),
        })
    }

    /// The Task `Ref` this stream is bound to.
    #[must_use]
    pub const fn reference(&self) -> &Ref {
        &self.reference
    }

    /// Emit `value` when `Open`: append to the replay buffer then deliver to
    /// every current subscriber in insertion order. A panicking subscriber
    /// is caught and discarded; delivery continues to the rest. Returns
    /// `true` if the value was accepted (stream was `Open`), `false` if
    /// silently dropped.
    pub fn emit(&self, value: T) -> bool {
        let mut guard = lock(&self.inner);
        if guard.status != StreamStatus::Open {
            return false;
        }

        guard.buffer.push(value.clone());
        for (_, subscriber) in &guard.subscribers {
            let value = value.clone();
            let _ignored = panic::catch_unwind(AssertUnwindSafe(|| subscriber(value)));
        }

        true
    }

    /// Subscribe `f`. When `Open`, registers the subscriber and synchronously
    /// replays the full current buffer (in emission order) before returning;
    /// replay panics are caught and discarded the same way `emit` delivery
    /// is. When not `Open`, returns a no-op unsubscribe and does not
    /// register.
    pub fn subscribe<F>(self: &Arc<Self>, f: F) -> Unsubscribe
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let mut guard = lock(&self.inner);
        if guard.status != StreamStatus::Open {
            return Unsubscribe::noop();
        }

        let subscription_id = self.next_subscription_id.fetch_add(1, Ordering::SeqCst);
        for chunk in guard.buffer.clone() {
            let _ignored = panic::catch_unwind(AssertUnwindSafe(|| f(chunk)));
        }
        guard.subscribers.push((subscription_id, Box::new(f)));
        drop(guard);

        let weak: Weak<Self> = Arc::downgrade(self);
        Unsubscribe::new(move || {
            if let Some(stream) = weak.upgrade() {
                let mut guard = lock(&stream.inner);
                guard.subscribers.retain(|(id, _)| *id != subscription_id);
            }
        })
    }

    /// Current buffered chunks, in emission order.
    #[must_use]
    pub fn buffered(&self) -> Vec<T> {
        lock(&self.inner).buffer.clone()
    }

    /// Number of currently registered subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner).subscribers.len()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl<T> StreamControl for Stream<T>
where
    T: Clone + Send + 'static,
{
    fn id(&self) -> &StreamId {
        &self.id
    }

    fn status(&self) -> StreamStatus {
        lock(&self.inner).status
    }

    fn abort(&self) {
        let mut guard = lock(&self.inner);
        if guard.status == StreamStatus::Open {
            guard.status = StreamStatus::Aborted;
            guard.subscribers.clear();
        }
    }

    fn close(&self) {
        let mut guard = lock(&self.inner);
        if guard.status == StreamStatus::Open {
            guard.status = StreamStatus::Closed;
            guard.subscribers.clear();
        }
    }
}
