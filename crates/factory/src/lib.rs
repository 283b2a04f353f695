//! # scopekit-factory
//!
//! Three small facades that assemble kernel objects without leaking
//! internal state (SPEC_FULL §4.10):
//! - [`create_authority`] constructs an [`Authority`] from an optional config.
//! - [`ScopeFactory`] binds many Scope constructions to one Authority so a
//!   caller never repeats the Authority reference.
//! - [`TaskFactory`] binds `effect`/`run` to one Scope.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use scopekit_kernel::{Authority, AuthorityConfig, Scope, ScopeConfig, TaskContext, TaskRunOptions};
use scopekit_shared::Result;
use std::future::Future;
use std::sync::Arc;

/// Construct an [`Authority`] from `config`, or the kernel's documented
/// defaults if `None`.
#[must_use]
pub fn create_authority(config: Option<AuthorityConfig>) -> Arc<Authority> {
    Authority::new(config.unwrap_or_default())
}

/// A Scope constructor bound to one Authority.
///
/// Exists so a caller that creates many Scopes under the same Authority
/// does not have to carry the Authority reference to every call site.
pub struct ScopeFactory {
    authority: Arc<Authority>,
}

impl ScopeFactory {
    /// Bind a new factory to `authority`.
    #[must_use]
    pub const fn new(authority: Arc<Authority>) -> Self {
        Self { authority }
    }

    /// The bound Authority.
    #[must_use]
    pub const fn authority(&self) -> &Arc<Authority> {
        &self.authority
    }

    /// Create a Scope under the bound Authority. See
    /// [`Authority::create_scope`].
    pub fn create(&self, config: ScopeConfig) -> Result<Arc<Scope>> {
        self.authority.create_scope(config)
    }
}

/// A `Task` constructor bound to one Scope, exposing only `effect`/`run`.
pub struct TaskFactory {
    scope: Arc<Scope>,
}

impl TaskFactory {
    /// Bind a new factory to `scope`.
    #[must_use]
    pub const fn new(scope: Arc<Scope>) -> Self {
        Self { scope }
    }

    /// The bound Scope.
    #[must_use]
    pub const fn scope(&self) -> &Arc<Scope> {
        &self.scope
    }

    /// Delegates to [`Scope::effect`].
    pub fn effect<R>(&self, f: impl FnOnce() -> R) -> Result<R> {
        self.scope.effect(f)
    }

    /// Delegates to [`Scope::run`].
    pub async fn run<T, F, Fut>(&self, f: F, opts: TaskRunOptions) -> Result<T>
    where
        T: Clone + Send + 'static,
        F: FnOnce(TaskContext<T>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        self.scope.run(f, opts).await
    }
}

/// Returns the factory crate version.
#[must_use]
pub const fn factory_crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
