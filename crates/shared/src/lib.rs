//! # scopekit-shared
//!
//! Shared error taxonomy, result type, and cancellation primitive for the
//! scopekit execution kernel workspace.
//!
//! This crate provides foundational types used by `scopekit-kernel` and
//! `scopekit-factory`:
//!
//! - [`ErrorEnvelope`] and the stable [`ErrorCode`] taxonomy
//! - The shared [`Result`] alias and small combinator extensions
//! - [`CancellationToken`], the abort-signal primitive Task and Worker share
//! - [`RetryPolicy`] / `retry_async`, ambient plumbing for callers who build
//!   their own retry-by-new-Task loop on top of the kernel
//! - `timeout_with_context`, a cancellation-aware timeout helper callers use
//!   to race a timer against `task.abort()`
//!
//! ## Design Principles
//!
//! 1. **No workspace dependencies** - This crate only depends on external crates
//! 2. **Zero-cost abstractions** - Types should compile away to efficient code
//! 3. **Serde-compatible** - All public types support serialization

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod cancellation;
pub mod errors;
pub mod invariants;
pub mod result;
pub mod retry;
pub mod timeout;

pub use cancellation::{CancellationToken, ensure_not_cancelled};
pub use errors::{
    ErrorClass, ErrorCode, ErrorEnvelope, ErrorKind, ErrorMetadata, REDACTED_VALUE,
    UnexpectedError, abort, check_cancelled, is_abort, normalize_unexpected_error, redact_metadata,
};
pub use invariants::{
    BoundedU32, BoundedU64, BoundedUsize, BoundsError, Unvalidated, Validated, ValidatedState,
};
pub use result::{Result, ResultExt};
pub use retry::{RetryPolicy, retry_async, retry_async_with_observer};
pub use timeout::timeout_with_context;

/// Returns the shared crate version.
#[must_use]
pub const fn shared_crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

// =============================================================================
// TESTS
// =============================================================================
