use std::time::Duration;

use crate::config::SyncStrategy;
use crate::types::Rank;

/// Summary of one completed synchronization call.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncStats {
    pub rank: Rank,
    pub world_size: u32,
    pub strategy: SyncStrategy,
    /// Nodes moved for this rank: traversal plan entries under
    /// `Flattened`, snapshot records under `ObjectGather`.
    pub entries: usize,
    pub elapsed: Duration,
}

/// Hooks the synchronizer calls at notable points. All methods default to
/// doing nothing.
pub trait SyncObserver: Send + Sync {
    /// World size is 1; local state is returned as-is with no collectives.
    fn single_rank_passthrough(&self, rank: Rank) {
        let _ = rank;
    }

    fn sync_completed(&self, stats: &SyncStats) {
        let _ = stats;
    }
}

/// Forwards observer events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl SyncObserver for TracingObserver {
    fn single_rank_passthrough(&self, rank: Rank) {
        tracing::warn!(
            rank,
            "world size is 1; synchronization is an identity pass. Skipped collectives."
        );
    }

    fn sync_completed(&self, stats: &SyncStats) {
        tracing::debug!(
            rank = stats.rank,
            world = stats.world_size,
            strategy = %stats.strategy,
            entries = stats.entries,
            elapsed_us = stats.elapsed.as_micros() as u64,
            "states synchronized"
        );
    }
}

/// Ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl SyncObserver for NoopObserver {}
