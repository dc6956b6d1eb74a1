//! Runtime-configurable tuning parameters for metric-sync.
//!
//! All values have sensible defaults. Override via environment variables
//! (prefixed `METRIC_SYNC_`) or by constructing a custom `SyncConfig`.

use std::time::Duration;

/// How per-rank state is moved across the group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SyncStrategy {
    /// Flatten the state tree, reconcile metadata, then move raw payloads.
    #[default]
    Flattened,
    /// Serialize each rank's whole tree and gather it as one opaque object.
    ObjectGather,
}

impl SyncStrategy {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "flattened" | "flat" => Some(Self::Flattened),
            "object" | "object_gather" => Some(Self::ObjectGather),
            _ => None,
        }
    }
}

impl std::fmt::Display for SyncStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncStrategy::Flattened => f.write_str("flattened"),
            SyncStrategy::ObjectGather => f.write_str("object"),
        }
    }
}

/// Tuning parameters for state synchronization and the in-process group.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Timeout for individual send/recv operations within collectives.
    pub collective_timeout: Duration,

    /// Bounded capacity of each peer channel in a [`LocalGroup`](crate::group::LocalGroup).
    pub channel_capacity: usize,

    /// Largest serialized object accepted by `all_gather_object`.
    pub max_object_bytes: usize,

    /// Strategy used by `StateSynchronizer::sync_states`.
    pub strategy: SyncStrategy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            collective_timeout: Duration::from_secs(30),
            channel_capacity: 64,
            max_object_bytes: 64 * 1024 * 1024, // 64 MiB
            strategy: SyncStrategy::Flattened,
        }
    }
}

impl SyncConfig {
    /// Load config from environment variables, falling back to defaults.
    ///
    /// Recognized variables:
    /// - `METRIC_SYNC_COLLECTIVE_TIMEOUT_SECS`
    /// - `METRIC_SYNC_CHANNEL_CAPACITY`
    /// - `METRIC_SYNC_MAX_OBJECT_BYTES`
    /// - `METRIC_SYNC_STRATEGY` (`flattened` or `object`)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();

        if let Some(v) = lookup("METRIC_SYNC_COLLECTIVE_TIMEOUT_SECS")
            && let Ok(s) = v.parse::<u64>()
        {
            cfg.collective_timeout = Duration::from_secs(s);
        }
        if let Some(v) = lookup("METRIC_SYNC_CHANNEL_CAPACITY")
            && let Ok(n) = v.parse::<usize>()
            && n > 0
        {
            cfg.channel_capacity = n;
        }
        if let Some(v) = lookup("METRIC_SYNC_MAX_OBJECT_BYTES")
            && let Ok(n) = v.parse::<usize>()
        {
            cfg.max_object_bytes = n;
        }
        if let Some(v) = lookup("METRIC_SYNC_STRATEGY")
            && let Some(strategy) = SyncStrategy::parse(&v)
        {
            cfg.strategy = strategy;
        }

        cfg
    }
}
