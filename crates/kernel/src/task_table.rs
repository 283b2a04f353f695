//! Scope-indexed registry of live Tasks.
//!
//! `TaskTable` is private per-Scope (SPEC_FULL §5): only the owning Scope
//! mutates it. It stores Tasks behind the non-generic [`TaskControl`] trait
//! object so a single table can hold `Task<T>`s of differing result types.

use crate::task::TaskControl;
use scopekit_core::{Ref, ScopeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// A `Ref -> Task` map with secondary filtering by `scope_id`.
#[derive(Default)]
pub struct TaskTable {
    tasks: Mutex<HashMap<Ref, Arc<dyn TaskControl>>>,
}

impl TaskTable {
    /// Construct an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `task` under its own `Ref`.
    pub fn register(&self, task: Arc<dyn TaskControl>) {
        lock(&self.tasks).insert(task.reference().clone(), task);
    }

    /// Remove the Task with `reference`, if any, returning it.
    pub fn unregister(&self, reference: &Ref) -> Option<Arc<dyn TaskControl>> {
        lock(&self.tasks).remove(reference)
    }

    /// Look up the Task with `reference`.
    #[must_use]
    pub fn get(&self, reference: &Ref) -> Option<Arc<dyn TaskControl>> {
        lock(&self.tasks).get(reference).cloned()
    }

    /// `true` if a Task with `reference` is registered.
    #[must_use]
    pub fn has(&self, reference: &Ref) -> bool {
        lock(&self.tasks).contains_key(reference)
    }

    /// All Tasks currently registered for `scope_id`.
    #[must_use]
    pub fn by_scope(&self, scope_id: &ScopeId) -> Vec<Arc<dyn TaskControl>> {
        lock(&self.tasks)
            .values()
            .filter(|task| task.scope_id() == scope_id)
            .cloned()
            .collect()
    }

    /// Count of Tasks for `scope_id` that are still `is_active`.
    #[must_use]
    pub fn active_count(&self, scope_id: &ScopeId) -> usize {
        lock(&self.tasks)
            .values()
            .filter(|task| task.scope_id() == scope_id && task.is_active())
            .count()
    }

    /// Total count of registered Tasks across all scopes.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.tasks).len()
    }

    /// `true` when no Tasks are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        lock(&self.tasks).is_empty()
    }

    /// Abort every Task registered for `scope_id`.
    pub fn abort_all(&self, scope_id: &ScopeId) {
        for task in self.by_scope(scope_id) {
            task.abort();
        }
    }

    /// Empty the table without aborting anything. Used only by Authority
    /// teardown, after every Scope has already disposed (and thus already
    /// aborted) its own Tasks.
    pub fn clear(&self) {
        lock(&self.tasks).clear();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Task;

    fn task(scope: &str) -> Arc<dyn TaskControl> {
        Task::<()>::new(ScopeId::new(scope), None, None)
    }

    #[test]
    fn register_get_and_has() {
        let table = TaskTable::new();
        let task = task("a");
        let reference = task.reference().clone();

        table.register(Arc::clone(&task));
        assert!(table.has(&reference));
        assert!(table.get(&reference).is_some());
    }

    #[test]
    fn unregister_removes_the_entry() {
        let table = TaskTable::new();
        let task = task("a");
        let reference = task.reference().clone();
        table.register(task);

        let removed = table.unregister(&reference);
        assert!(removed.is_some());
        assert!(!table.has(&reference));
    }

    #[test]
    fn by_scope_filters_correctly() {
        let table = TaskTable::new();
        table.register(task("a"));
        table.register(task("a"));
        table.register(task("b"));

        assert_eq!(table.by_scope(&ScopeId::new("a")).len(), 2);
        assert_eq!(table.by_scope(&ScopeId::new("b")).len(), 1);
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn active_count_excludes_terminal_tasks() {
        let table = TaskTable::new();
        let active = task("a");
        let aborted = task("a");
        aborted.abort();

        table.register(active);
        table.register(aborted);

        assert_eq!(table.active_count(&ScopeId::new("a")), 1);
    }

    #[test]
    fn abort_all_aborts_only_the_matching_scope() {
        let table = TaskTable::new();
        let a1 = task("a");
        let b1 = task("b");
        table.register(Arc::clone(&a1));
        table.register(Arc::clone(&b1));

        table.abort_all(&ScopeId::new("a"));

        assert!(a1.is_complete());
        assert!(b1.is_active());
    }

    #[test]
    fn clear_empties_without_aborting() {
        let table = TaskTable::new();
        let t = task("a");
        table.register(Arc::clone(&t));

        table.clear();

        assert!(table.is_empty());
        assert!(t.is_active());
    }
}
