//! FSM-gated lane: creates and supervises Tasks.

use crate::config::ScopeConfig;
use crate::fsm::{Fsm, ScopeEvent, ScopeState};
use crate::task::{Task, TaskControl, TaskContext, TaskRunOptions};
use crate::task_table::TaskTable;
use crate::worker_pool::WorkerPool;
use scopekit_core::{Ref, ScopeId};
use scopekit_shared::{ErrorEnvelope, Result};
use std::future::Future;
use std::sync::{Arc, Mutex};

/// A named execution lane with an FSM; groups related Tasks and bounds
/// their lifetime. Disposal terminates every Task it owns.
pub struct Scope {
    id: ScopeId,
    name: String,
    fsm: Mutex<Fsm>,
    tasks: TaskTable,
    pool: WorkerPool,
}

impl Scope {
    pub(crate) fn new(config: ScopeConfig, pool: WorkerPool) -> Arc<Self> {
        Arc::new(Self {
            id: ScopeId::new(config.id),
            name: config.name,
            fsm: Mutex::new(Fsm::new()),
            tasks: TaskTable::new(),
            pool,
        })
    }

    /// Caller-chosen identity.
    #[must_use]
    pub const fn id(&self) -> &ScopeId {
        &self.id
    }

    /// Human-readable label.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current FSM state.
    #[must_use]
    pub fn state(&self) -> ScopeState {
        lock(&self.fsm).state()
    }

    /// `true` unless tearing down or torn down.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        lock(&self.fsm).is_alive()
    }

    /// `true` while the Scope may execute Tasks.
    #[must_use]
    pub fn can_execute(&self) -> bool {
        lock(&self.fsm).can_execute()
    }

    /// Current shared-pool worker count.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.pool.size()
    }

    /// Live Task count in this Scope's table.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Request the FSM `Mounted` transition.
    ///
    /// Callable from any state, but the FSM only actually transitions from
    /// `Init`; calling it again later is a silent, idempotent no-op (see
    /// SPEC_FULL §9 open question - preserved deliberately).
    pub fn mount(&self) -> bool {
        lock(&self.fsm).transition(ScopeEvent::Mounted)
    }

    /// Request the FSM `Suspend` transition.
    pub fn suspend(&self) -> bool {
        lock(&self.fsm).transition(ScopeEvent::Suspend)
    }

    /// Request the FSM `Resume` transition.
    pub fn resume(&self) -> bool {
        lock(&self.fsm).transition(ScopeEvent::Resume)
    }

    /// Construct a Task bound to this Scope and the Authority's shared
    /// pool, register it, and - if this is the Scope's first Task - drive
    /// the FSM to `Running`.
    ///
    /// Fails with `scope_inactive` (reason `"disposed"`) if `!is_alive`, or
    /// (reason `"not ready"`) if `!can_execute`.
    pub fn create_task<T>(self: &Arc<Self>, reference: Option<Ref>) -> Result<Arc<Task<T>>>
    where
        T: Clone + Send + 'static,
    {
        if !self.is_alive() {
            return Err(ErrorEnvelope::scope_inactive(self.id.as_str(), "disposed"));
        }
        if !self.can_execute() {
            return Err(ErrorEnvelope::scope_inactive(self.id.as_str(), "not ready"));
        }

        let task = Task::<T>::new(self.id.clone(), Some(self.pool.clone()), reference);
        self.tasks.register(Arc::clone(&task) as Arc<dyn TaskControl>);

        {
            let mut fsm = lock(&self.fsm);
            if fsm.state() == ScopeState::Attached {
                fsm.transition(ScopeEvent::TaskStarted);
            }
        }

        Ok(task)
    }

    /// Convenience: `create_task`, await `task.run(f, opts)`, and unregister
    /// the Task on settlement regardless of outcome.
    pub async fn run<T, F, Fut>(self: &Arc<Self>, f: F, opts: TaskRunOptions) -> Result<T>
    where
        T: Clone + Send + 'static,
        F: FnOnce(TaskContext<T>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let task = self.create_task::<T>(None)?;
        let reference = task.reference().clone();
        let outcome = task.run(f, opts).await;
        self.tasks.unregister(&reference);
        outcome
    }

    /// Invoke `f` directly, requiring only `is_alive`. No Task is created
    /// or registered for an effect.
    ///
    /// This deliberately does not require a prior Task to have run, which
    /// reads as contradicting "Tasks are the sole execution origin" - the
    /// upstream behavior is preserved as-is (SPEC_FULL §9 open question).
    pub fn effect<R>(&self, f: impl FnOnce() -> R) -> Result<R> {
        if !self.is_alive() {
            return Err(ErrorEnvelope::scope_inactive(self.id.as_str(), "disposed"));
        }
        Ok(f())
    }

    /// Look up a previously registered Task by `Ref`.
    #[must_use]
    pub fn get_task(&self, reference: &Ref) -> Option<Arc<dyn TaskControl>> {
        self.tasks.get(reference)
    }

    /// Abort and unregister the Task with `reference`. Returns whether a
    /// Task was found.
    pub fn abort_task(&self, reference: &Ref) -> bool {
        match self.tasks.unregister(reference) {
            Some(task) => {
                task.abort();
                true
            },
            None => false,
        }
    }

    /// Abort every Task currently registered, without disposing the Scope
    /// itself.
    pub fn abort_all(&self) {
        self.tasks.abort_all(&self.id);
    }

    /// Tear down: no-op if not alive. Otherwise abort every owned Task,
    /// then drive the FSM `Dispose` twice (once to `Disposing`, once more
    /// for its automatic advance to `Disposed`). Idempotent.
    pub fn dispose(&self) {
        if !self.is_alive() {
            return;
        }

        self.tasks.abort_all(&self.id);

        let mut fsm = lock(&self.fsm);
        fsm.transition(ScopeEvent::Dispose);
        fsm.transition(ScopeEvent::Dispose);
    }
}

fn lock(mutex: &Mutex<Fsm>) -> std::sync::MutexGuard<'_, Fsm> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
