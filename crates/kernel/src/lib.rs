//! # scopekit-kernel
//!
//! The deterministic execution-control kernel: the Scope finite-state
//! machine, the Task object and its owned Workers/Handlers/Streams, the
//! TaskTable registry, the cooperative WorkerPool, the StreamBuffer, and the
//! Authority acting as registry and broadcast mediator.
//!
//! No user-supplied work ever runs outside a live, permitting Scope. When a
//! Scope is disposed, every in-flight Task, sub-worker, registered handler,
//! and open output stream associated with it is torn down synchronously and
//! observably.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod authority;
pub mod config;
pub mod fsm;
pub mod handler;
pub mod scope;
pub mod stream;
pub mod stream_buffer;
pub mod task;
pub mod task_table;
pub mod worker;
pub mod worker_pool;

pub use authority::Authority;
pub use config::{AuthorityConfig, EngineConfig, ScopeConfig, ScopeEngineConfig};
pub use fsm::{Fsm, ScopeEvent, ScopeState};
pub use handler::{Handler, HandlerStatus};
pub use scope::Scope;
pub use stream::{Stream, StreamControl, StreamStatus, Unsubscribe};
pub use stream_buffer::StreamBuffer;
pub use task::{HandlerHandle, Task, TaskContext, TaskControl, TaskRunOptions, TaskStatus, WorkerHandle, StreamHandle};
pub use task_table::TaskTable;
pub use worker::{Worker, WorkerStatus};
pub use worker_pool::WorkerPool;

/// Returns the kernel crate version.
#[must_use]
pub const fn kernel_crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
