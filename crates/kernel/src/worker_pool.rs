//! Fixed-capacity cooperative executor with a FIFO pending-work queue.
//!
//! The "pool" multiplexes bounded concurrency over the async executor rather
//! than dedicating OS threads to it (see SPEC_FULL §4.5, §9): each logical
//! worker is a slot that is either idle or running one in-flight future at a
//! time. Submitting work when every slot is busy enqueues it FIFO; the next
//! slot to go idle drains the queue.

use scopekit_shared::{ErrorEnvelope, Result};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type QueuedWork = Box<dyn FnOnce() -> BoxFuture + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Idle,
    Busy,
}

struct Slot {
    state: SlotState,
    remove_on_idle: bool,
}

struct PoolState {
    slots: HashMap<u64, Slot>,
    queue: VecDeque<QueuedWork>,
    target: usize,
    disposed: bool,
}

/// A fixed-capacity cooperative executor.
///
/// Cloning a `WorkerPool` yields another handle to the same underlying
/// pool - Authority owns one and Scopes share it by clone, matching the
/// "shared process-wide" resource described in SPEC_FULL §5.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    max_workers: usize,
    next_slot_id: AtomicU64,
    state: Mutex<PoolState>,
}

impl WorkerPool {
    /// Construct a pool with `default_workers` idle slots (clamped to
    /// `max_workers`) and a hard ceiling of `max_workers` logical workers.
    #[must_use]
    pub fn new(default_workers: usize, max_workers: usize) -> Self {
        let inner = Arc::new(PoolInner {
            max_workers,
            next_slot_id: AtomicU64::new(1),
            state: Mutex::new(PoolState {
                slots: HashMap::new(),
                queue: VecDeque::new(),
                target: 0,
                disposed: false,
            }),
        });
        let pool = Self { inner };
        pool.scale(default_workers.min(max_workers));
        pool
    }

    /// Hard ceiling on logical worker count.
    #[must_use]
    pub const fn max_workers(&self) -> usize {
        self.inner.max_workers
    }

    /// Current logical worker count (idle + busy).
    #[must_use]
    pub fn size(&self) -> usize {
        lock(&self.inner.state).slots.len()
    }

    /// Count of logical workers currently idle.
    #[must_use]
    pub fn idle_count(&self) -> usize {
        lock(&self.inner.state)
            .slots
            .values()
            .filter(|slot| slot.state == SlotState::Idle)
            .count()
    }

    /// Count of logical workers currently busy.
    #[must_use]
    pub fn busy_count(&self) -> usize {
        lock(&self.inner.state)
            .slots
            .values()
            .filter(|slot| slot.state == SlotState::Busy)
            .count()
    }

    /// `true` once `dispose()` has run.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        lock(&self.inner.state).disposed
    }

    /// Number of pending (queued) work items.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        lock(&self.inner.state).queue.len()
    }

    /// Scale the logical worker count toward `target`, clamped to
    /// `[0, max_workers]`.
    ///
    /// Raising the count creates new idle slots immediately. Lowering it
    /// removes idle slots immediately; any shortfall is satisfied by
    /// scheduling currently-busy slots for removal once they next go idle -
    /// busy workers are never forcibly terminated mid-flight, so the pool
    /// may temporarily sit above the new target (SPEC_FULL §4.5, §8 open
    /// question).
    pub fn scale(&self, target: usize) {
        let target = target.min(self.inner.max_workers);
        let mut state = lock(&self.inner.state);
        if state.disposed {
            return;
        }
        state.target = target;

        let current = state.slots.len();
        if target > current {
            for _ in 0..(target - current) {
                let id = self.inner.next_slot_id.fetch_add(1, Ordering::SeqCst);
                state.slots.insert(
                    id,
                    Slot {
                        state: SlotState::Idle,
                        remove_on_idle: false,
                    },
                );
            }
            return;
        }

        let mut to_remove = current - target;
        if to_remove == 0 {
            return;
        }

        let idle_ids: Vec<u64> = state
            .slots
            .iter()
            .filter(|(_, slot)| slot.state == SlotState::Idle)
            .map(|(id, _)| *id)
            .collect();
        for id in idle_ids {
            if to_remove == 0 {
                break;
            }
            state.slots.remove(&id);
            to_remove -= 1;
        }

        if to_remove == 0 {
            return;
        }

        let busy_ids: Vec<u64> = state
            .slots
            .iter()
            .filter(|(_, slot)| slot.state == SlotState::Busy && !slot.remove_on_idle)
            .map(|(id, _)| *id)
            .collect();
        for id in busy_ids.into_iter().take(to_remove) {
            if let Some(slot) = state.slots.get_mut(&id) {
                slot.remove_on_idle = true;
            }
        }
    }

    /// Submit `f` for execution. If an idle slot exists, it runs
    /// immediately; otherwise the work is enqueued FIFO behind any other
    /// pending work and runs once a slot frees up.
    ///
    /// Rejects immediately if the pool has been disposed.
    pub async fn execute<T, F, Fut>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel::<Result<T>>();
        let wrapped: QueuedWork = Box::new(move || {
            Box::pin(async move {
                let result = f().await;
                let _ignored = tx.send(result);
            })
        });

        let to_dispatch = {
            let mut state = lock(&self.inner.state);
            if state.disposed {
                return Err(ErrorEnvelope::execution_rejected("pool disposed"));
            }

            let idle_id = state
                .slots
                .iter()
                .find(|(_, slot)| slot.state == SlotState::Idle)
                .map(|(id, _)| *id);

            match idle_id {
                Some(id) => {
                    if let Some(slot) = state.slots.get_mut(&id) {
                        slot.state = SlotState::Busy;
                    }
                    Some((id, wrapped))
                },
                None => {
                    state.queue.push_back(wrapped);
                    None
                },
            }
        };

        if let Some((id, wrapped)) = to_dispatch {
            self.dispatch(id, wrapped);
        }

        rx.await
            .unwrap_or_else(|_| Err(ErrorEnvelope::execution_rejected("pool disposed")))
    }

    fn dispatch(&self, slot_id: u64, work: QueuedWork) {
        let pool = self.clone();
        tokio::spawn(async move {
            work().await;
            pool.on_slot_idle(slot_id);
        });
    }

    fn on_slot_idle(&self, slot_id: u64) {
        let next = {
            let mut state = lock(&self.inner.state);
            if state.disposed {
                return;
            }

            let remove = state.slots.get(&slot_id).is_some_and(|slot| slot.remove_on_idle);
            if remove {
                state.slots.remove(&slot_id);
                return;
            }

            match state.queue.pop_front() {
                Some(work) => Some(work),
                None => {
                    if let Some(slot) = state.slots.get_mut(&slot_id) {
                        slot.state = SlotState::Idle;
                    }
                    None
                },
            }
        };

        if let Some(work) = next {
            self.dispatch(slot_id, work);
        }
    }

    /// Reject every queued item with a disposal error, mark every slot
    /// gone, and clear internal state. Idempotent.
    pub fn dispose(&self) {
        let mut state = lock(&self.inner.state);
        if state.disposed {
            return;
        }
        state.disposed = true;
        state.slots.clear();
        let queue = std::mem::take(&mut state.queue);
        drop(state);

        for work in queue {
            // Run the rejection path: the boxed work's own closure is
            // responsible for sending on its oneshot, so we cannot directly
            // send a disposal error through it. Instead we simply drop the
            // sender half by dropping `work` without invoking it, which
            // causes the corresponding `rx.await` in `execute` to observe a
            // closed channel and map it to the disposal error above.
            drop(work);
        }
    }
}

fn lock(mutex: &Mutex<PoolState>) -> std::sync::MutexGuard<'_, PoolState> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
