//! # scopekit-core
//!
//! Opaque identity types shared across the scopekit workspace.
//!
//! This crate provides foundational functionality that has no dependencies on
//! other workspace crates, making it safe to import anywhere.
//!
//! - [`ScopeId`] is caller-chosen and identifies a Scope within an Authority.
//! - [`Ref`] is kernel-generated and identifies a Task for its entire lifetime.
//! - [`WorkerId`], [`HandlerId`], [`StreamId`] are kernel-generated and unique
//!   within the Task that owns them.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Caller-chosen identity for a Scope, unique within an Authority.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScopeId(Box<str>);

impl ScopeId {
    /// Create a `ScopeId` from any string-like value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into().into_boxed_str())
    }

    /// Borrow the identifier as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

impl From<&str> for ScopeId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ScopeId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Generates a process-unique, monotonically increasing identity with a
/// stable prefix. Every kernel-generated id in this crate is built this way:
/// cheap, allocation-light, and trivially unique without coordination.
fn next_scoped_id(counter: &AtomicU64, prefix: &'static str) -> Box<str> {
    let n = counter.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}{n}").into_boxed_str()
}

static REF_COUNTER: AtomicU64 = AtomicU64::new(1);
static WORKER_ID_COUNTER: AtomicU64 = AtomicU64::new(1);
static HANDLER_ID_COUNTER: AtomicU64 = AtomicU64::new(1);
static STREAM_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Immutable execution identity for a Task.
///
/// A `Ref` is minted once, at Task construction, and never reused. Retrying
/// failed work means constructing a new Task with a fresh `Ref`; a `Ref`
/// never migrates to a different Task and never gets "revived".
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ref(Box<str>);

impl Ref {
    /// Mint a new, process-unique `Ref`.
    #[must_use]
    pub fn new() -> Self {
        Self(next_scoped_id(&REF_COUNTER, "ref_"))
    }

    /// Borrow the identifier as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Ref {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Ref {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

macro_rules! scoped_id {
    ($name:ident, $counter:ident, $prefix:literal) => {
        #[doc = concat!("Kernel-generated identity for a ", $prefix, ", unique within its owning Task.")]
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(Box<str>);

        impl $name {
            #[doc = concat!("Mint a new ", $prefix, " identity.")]
            #[must_use]
            pub fn new() -> Self {
                Self(next_scoped_id(&$counter, concat!($prefix, "_")))
            }

            /// Borrow the identifier as a string.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str(&self.0)
            }
        }
    };
}

scoped_id!(WorkerId, WORKER_ID_COUNTER, "worker");
scoped_id!(HandlerId, HANDLER_ID_COUNTER, "handler");
scoped_id!(StreamId, STREAM_ID_COUNTER, "stream");

/// Returns the core crate version.
#[must_use]
pub const fn core_crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
