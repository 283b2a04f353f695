//! Plain `serde`-deriving configuration surface for Authority/Scope
//! construction (SPEC_FULL §10). The kernel has no persisted configuration
//! of its own - no file or environment loading layer - so these are just
//! validated value types, not a schema-loading module.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default logical worker count for a freshly constructed pool.
pub const DEFAULT_WORKERS: usize = 4;
/// Default hard ceiling on logical worker count.
pub const DEFAULT_MAX_WORKERS: usize = 16;

/// Engine-level tuning for the Authority's shared `WorkerPool`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Logical worker count created at startup.
    pub default_workers: usize,
    /// Hard ceiling on logical worker count.
    pub max_workers: usize,
    /// Reserved for a future idle-worker reaper; not enforced by the kernel
    /// itself today (see SPEC_FULL §1 Non-goals: no background reaping).
    #[serde(default, with = "humantime_millis_opt")]
    pub idle_timeout: Option<Duration>,
}

impl EngineConfig {
    /// Construct a config, clamping `default_workers` to `max_workers`.
    #[must_use]
    pub fn new(default_workers: usize, max_workers: usize) -> Self {
        Self {
            default_workers: default_workers.min(max_workers),
            max_workers,
            idle_timeout: None,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new(DEFAULT_WORKERS, DEFAULT_MAX_WORKERS)
    }
}

/// Top-level configuration for constructing an Authority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorityConfig {
    /// Shared `WorkerPool` tuning.
    pub engine: EngineConfig,
}

/// Per-Scope request to scale the shared pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeEngineConfig {
    /// If set and greater than the pool's current size, the pool is scaled
    /// up to this count when the Scope is created.
    pub workers: Option<usize>,
}

/// Configuration for constructing one Scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeConfig {
    /// Caller-chosen identity, unique within the owning Authority.
    pub id: String,
    /// Human-readable label.
    pub name: String,
    /// Per-Scope pool scaling request.
    #[serde(default)]
    pub engine: ScopeEngineConfig,
}

impl ScopeConfig {
    /// Construct a config with no scaling request.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            engine: ScopeEngineConfig::default(),
        }
    }

    /// Attach a worker-scaling request.
    #[must_use]
    pub const fn with_workers(mut self, workers: usize) -> Self {
        self.engine.workers = Some(workers);
        self
    }
}

mod humantime_millis_opt {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        #[allow(clippy::cast_possible_truncation, reason = "timeout is never near u64::MAX ms")]
        value.map(|duration| duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis: Option<u64> = Option::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_config_clamps_default_to_max() {
        let config = EngineConfig::new(10, 4);
        assert_eq!(config.default_workers, 4);
        assert_eq!(config.max_workers, 4);
    }

    #[test]
    fn scope_config_builder() {
        let config = ScopeConfig::new("dashboard", "Dashboard").with_workers(3);
        assert_eq!(config.id, "dashboard");
        assert_eq!(config.engine.workers, Some(3));
    }

    #[test]
    fn authority_config_round_trips_through_json() {
        let config = AuthorityConfig {
            engine: EngineConfig::new(2, 8),
        };
        let json = serde_json::to_string(&config);
        assert!(json.is_ok());
        let Ok(json) = json else { return };

        let parsed: std::result::Result<AuthorityConfig, _> = serde_json::from_str(&json);
        assert!(parsed.is_ok());
        let Ok(parsed) = parsed else { return };
        assert_eq!(parsed, config);
    }
}
