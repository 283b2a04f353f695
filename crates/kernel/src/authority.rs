//! Process-wide registry of Scopes, owner of the `WorkerPool`, broadcast
//! mediator.

use crate::config::AuthorityConfig;
use crate::scope::Scope;
use crate::stream::Unsubscribe;
use crate::worker_pool::WorkerPool;
use scopekit_core::ScopeId;
use scopekit_shared::{ErrorEnvelope, Result};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

type Listener = Arc<dyn Fn(&serde_json::Value) + Send + Sync>;

#[derive(Default)]
struct ListenerTable {
    channels: HashMap<String, Vec<(u64, Listener)>>,
}

/// Process-wide root registry. Owner of the shared `WorkerPool` and the
/// broadcast mediator. At most one live Scope per `ScopeId`.
pub struct Authority {
    pool: WorkerPool,
    scopes: Mutex<HashMap<ScopeId, Arc<Scope>>>,
    listeners: Mutex<ListenerTable>,
    disposed: AtomicBool,
    next_listener_id: AtomicU64,
}

impl Authority {
    /// Construct an Authority from a config (use `AuthorityConfig::default()`
    /// for the kernel's documented defaults).
    #[must_use]
    pub fn new(config: AuthorityConfig) -> Arc<Self> {
        let pool = WorkerPool::new(config.engine.default_workers, config.engine.max_workers);
        Arc::new(Self {
            pool,
            scopes: Mutex::new(HashMap::new()),
            listeners: Mutex::new(ListenerTable::default()),
            disposed: AtomicBool::new(false),
            next_listener_id: AtomicU64::new(1),
        })
    }

    /// `true` once `dispose()` has run.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Count of currently registered Scopes.
    #[must_use]
    pub fn scope_count(&self) -> usize {
        lock(&self.scopes).len()
    }

    /// Current logical worker count of the shared pool.
    #[must_use]
    pub fn worker_pool_size(&self) -> usize {
        self.pool.size()
    }

    /// Idle logical worker count of the shared pool.
    #[must_use]
    pub fn idle_worker_count(&self) -> usize {
        self.pool.idle_count()
    }

    /// Busy logical worker count of the shared pool.
    #[must_use]
    pub fn busy_worker_count(&self) -> usize {
        self.pool.busy_count()
    }

    /// Create and register a Scope from `config`.
    ///
    /// Fails if the Authority is disposed, or if a Scope with `config.id`
    /// is already registered. If `config.engine.workers` exceeds the pool's
    /// current size, scales the shared pool up first.
    pub fn create_scope(self: &Arc<Self>, config: crate::config::ScopeConfig) -> Result<Arc<Scope>> {
        if self.is_disposed() {
            return Err(ErrorEnvelope::authority_not_initialized());
        }

        let id = ScopeId::new(config.id.clone());
        let mut scopes = lock(&self.scopes);
        if scopes.contains_key(&id) {
            return Err(ErrorEnvelope::authority_already_exists(id.as_str()));
        }

        if let Some(workers) = config.engine.workers {
            if workers > self.pool.size() {
                self.pool.scale(workers);
            }
        }

        let scope = Scope::new(config, self.pool.clone());
        scopes.insert(id, Arc::clone(&scope));
        Ok(scope)
    }

    /// Look up a registered Scope by id.
    #[must_use]
    pub fn get_scope(&self, id: &ScopeId) -> Option<Arc<Scope>> {
        lock(&self.scopes).get(id).cloned()
    }

    /// `true` if a Scope with `id` is registered.
    #[must_use]
    pub fn has_scope(&self, id: &ScopeId) -> bool {
        lock(&self.scopes).contains_key(id)
    }

    /// Remove the mapping for `id` without disposing the Scope. Returns
    /// `true` if a mapping was removed.
    ///
    /// Intended for callers (e.g. a UI-framework adapter) that want to tear
    /// down their own reference to a Scope without forcing disposal here.
    pub fn unregister_scope(&self, id: &ScopeId) -> bool {
        lock(&self.scopes).remove(id).is_some()
    }

    /// All currently registered Scope ids.
    #[must_use]
    pub fn scope_ids(&self) -> Vec<ScopeId> {
        lock(&self.scopes).keys().cloned().collect()
    }

    /// Subscribe `listener` to `channel`. Delivery order within a channel
    /// is subscription order.
    pub fn subscribe<F>(self: &Arc<Self>, channel: impl Into<String>, listener: F) -> Unsubscribe
    where
        F: Fn(&serde_json::Value) + Send + Sync + 'static,
    {
        let channel = channel.into();
        let id = self.next_listener_id.fetch_add(1, Ordering::SeqCst);

        {
            let mut table = lock(&self.listeners);
            table
                .channels
                .entry(channel.clone())
                .or_default()
                .push((id, Arc::new(listener)));
        }

        let authority: Weak<Self> = Arc::downgrade(self);
        Unsubscribe::new(move || {
            if let Some(authority) = authority.upgrade() {
                let mut table = lock(&authority.listeners);
                if let Some(subscribers) = table.channels.get_mut(&channel) {
                    subscribers.retain(|(existing_id, _)| *existing_id != id);
                }
            }
        })
    }

    /// Synchronous fan-out of `data` to every listener currently subscribed
    /// to `channel`, in subscription order. The listener set is snapshot at
    /// broadcast time - listeners added during delivery are not invoked
    /// until the next broadcast. A panicking listener is caught and
    /// discarded; it does not stop delivery to later listeners.
    pub fn broadcast(&self, channel: &str, data: &serde_json::Value) {
        let snapshot: Vec<Listener> = lock(&self.listeners)
            .channels
            .get(channel)
            .map(|subscribers| subscribers.iter().map(|(_, listener)| Arc::clone(listener)).collect())
            .unwrap_or_default();

        for listener in snapshot {
            let _ignored = panic::catch_unwind(AssertUnwindSafe(|| listener(data)));
        }
    }

    /// Tear down: idempotent. Disposes every Scope, clears the Scope and
    /// listener tables, disposes the shared pool.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        for scope in lock(&self.scopes).values() {
            scope.dispose();
        }
        lock(&self.scopes).clear();
        lock(&self.listeners).channels.clear();
        self.pool.dispose();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScopeConfig;

    fn authority() -> Arc<Authority> {
        Authority::new(AuthorityConfig {
            engine: crate::config::EngineConfig::new(1, 4),
        })
    }

    #[test]
    fn create_scope_succeeds_then_rejects_duplicate_id() {
        let authority = authority();
        let first = authority.create_scope(ScopeConfig::new("x", "X"));
        assert!(first.is_ok());

        let duplicate = authority.create_scope(ScopeConfig::new("x", "X again"));
        assert!(duplicate.is_err());
    }

    #[test]
    fn unregister_then_recreate_scope_succeeds() {
        let authority = authority();
        let first = authority.create_scope(ScopeConfig::new("x", "X"));
        assert!(first.is_ok());

        assert!(authority.unregister_scope(&ScopeId::new("x")));
        let recreated = authority.create_scope(ScopeConfig::new("x", "X again"));
        assert!(recreated.is_ok());
    }

    #[test]
    fn create_scope_with_workers_scales_the_pool() {
        let authority = authority();
        let created = authority.create_scope(ScopeConfig::new("x", "X").with_workers(3));
        assert!(created.is_ok());
        assert_eq!(authority.worker_pool_size(), 3);
    }

    #[test]
    fn broadcast_delivers_in_subscription_order_and_respects_unsubscribe() {
        let authority = authority();
        let order = Arc::new(Mutex::new(Vec::new()));

        let order_a = Arc::clone(&order);
        let unsub_a = authority.subscribe("events", move |_data| {
            order_a.lock().unwrap_or_else(std::sync::PoisonError::into_inner).push("a");
        });
        let order_b = Arc::clone(&order);
        let _unsub_b = authority.subscribe("events", move |_data| {
            order_b.lock().unwrap_or_else(std::sync::PoisonError::into_inner).push("b");
        });

        authority.broadcast("events", &serde_json::json!(1));
        assert_eq!(
            order.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone(),
            vec!["a", "b"]
        );

        unsub_a.unsubscribe();
        order.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clear();
        authority.broadcast("events", &serde_json::json!(2));
        assert_eq!(
            order.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone(),
            vec!["b"]
        );
    }

    #[test]
    #[allow(
        clippy::panic,
        reason = "exercises catch_unwind recovery, which requires an actual panicking listener"
    )]
    fn broadcast_survives_a_panicking_listener() {
        let authority = authority();
        let delivered = Arc::new(Mutex::new(false));
        let delivered_clone = Arc::clone(&delivered);

        let _unsub_panicking = authority.subscribe("events", |_data| panic!("boom"));
        let _unsub_ok = authority.subscribe("events", move |_data| {
            *delivered_clone.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = true;
        });

        authority.broadcast("events", &serde_json::json!(1));
        assert!(*delivered.lock().unwrap_or_else(std::sync::PoisonError::into_inner));
    }

    #[test]
    fn dispose_is_idempotent_and_cascades_to_scopes() {
        let authority = authority();
        let created = authority.create_scope(ScopeConfig::new("x", "X"));
        assert!(created.is_ok());
        let Ok(scope) = created else { return };
        scope.mount();

        authority.dispose();
        authority.dispose();

        assert!(authority.is_disposed());
        assert!(!scope.is_alive());
        assert_eq!(authority.scope_count(), 0);
    }
}
