//! Synchronization of per-rank state trees across a process group.
//!
//! A call runs in fixed phases, identical on every rank:
//!
//! 1. **Plan**: the caller supplies a [`TraversalPlan`] (from
//!    [`traversal_order`]) fixing the order every later collective is
//!    issued in.
//! 2. **Validate**: world size, then local checks (plan fits the tree,
//!    devices are known), then one agreement collective so a fault on any
//!    rank fails every rank instead of leaving peers blocked.
//! 3. **Exchange**: per entry, reconcile metadata (list lengths, buffer
//!    dtype/shape) and move payloads with fixed-size gathers.
//! 4. **Reassemble**: rebuild one tree per rank. No communication.

mod blocking;
mod exchange;
mod metadata;
mod object;
mod observer;
mod plan;
mod reassemble;
mod validate;

pub use blocking::BlockingSynchronizer;
pub use exchange::{SyncedEntry, SyncedValue};
pub use metadata::{ReconciledBuffer, sync_dtype_and_shape, sync_list_length};
pub use observer::{NoopObserver, SyncObserver, SyncStats, TracingObserver};
pub use plan::{EntryKind, TraversalEntry, TraversalPlan, traversal_order};
pub use reassemble::reassemble;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::config::{SyncConfig, SyncStrategy};
use crate::device::DeviceAdapter;
use crate::error::Result;
use crate::group::ProcessGroup;
use crate::state::{StatePath, StateTree};
use crate::tensor::Tensor;
use crate::types::{Device, Rank};

/// Synchronizes state trees over one process group.
///
/// Cheap to share: holds only `Arc`s and config. Every rank of the group
/// must call the same methods in the same order.
#[derive(Clone)]
pub struct StateSynchronizer {
    group: Arc<dyn ProcessGroup>,
    adapter: Arc<dyn DeviceAdapter>,
    observer: Arc<dyn SyncObserver>,
    config: SyncConfig,
}

impl StateSynchronizer {
    pub fn new(group: Arc<dyn ProcessGroup>, adapter: Arc<dyn DeviceAdapter>) -> Self {
        Self {
            group,
            adapter,
            observer: Arc::new(TracingObserver),
            config: SyncConfig::default(),
        }
    }

    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn SyncObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn group(&self) -> &dyn ProcessGroup {
        &*self.group
    }

    pub fn adapter(&self) -> &dyn DeviceAdapter {
        &*self.adapter
    }

    pub fn rank(&self) -> Result<Rank> {
        self.group.rank()
    }

    pub fn world_size(&self) -> Result<u32> {
        self.group.world_size()
    }

    /// See [`sync_list_length`].
    pub async fn sync_list_length(&self, list: &[Tensor]) -> Result<Vec<usize>> {
        sync_list_length(&*self.group, list).await
    }

    /// See [`sync_dtype_and_shape`].
    pub async fn sync_dtype_and_shape(
        &self,
        local: Option<&Tensor>,
        path: &StatePath,
    ) -> Result<Option<ReconciledBuffer>> {
        sync_dtype_and_shape(&*self.group, local, path).await
    }

    /// Gather every rank's `state` using the configured strategy.
    ///
    /// Returns one tree per rank, ordered by rank; element `i` equals rank
    /// `i`'s input. `devices` maps each top-level state name holding
    /// buffers to the device received buffers are placed on. `plan` must
    /// be `traversal_order(state)` (or an equal plan computed earlier).
    pub async fn sync_states(
        &self,
        state: &StateTree,
        devices: &HashMap<String, Device>,
        plan: &TraversalPlan,
    ) -> Result<Vec<StateTree>> {
        self.sync_states_with(self.config.strategy, state, devices, plan)
            .await
    }

    /// Like [`sync_states`](Self::sync_states) with an explicit strategy.
    pub async fn sync_states_with(
        &self,
        strategy: SyncStrategy,
        state: &StateTree,
        devices: &HashMap<String, Device>,
        plan: &TraversalPlan,
    ) -> Result<Vec<StateTree>> {
        let started = Instant::now();
        let group = &*self.group;
        let adapter = &*self.adapter;
        let (rank, world_size) = validate::validate_world(group)?;

        if world_size == 1 {
            self.observer.single_rank_passthrough(rank);
            return Ok(vec![state.clone()]);
        }

        let devices_ok = validate::check_devices(state, devices, adapter);
        let (bundle, entries) = match strategy {
            SyncStrategy::Flattened => {
                let local = validate::check_plan(state, plan).and(devices_ok);
                validate::agree_on_structure(group, plan, local).await?;
                let entries = exchange::Exchanger::new(group, adapter, devices, rank, world_size)
                    .exchange_all(plan, state)
                    .await?;
                (reassemble(plan, entries, world_size as usize)?, plan.len())
            }
            SyncStrategy::ObjectGather => {
                let gathered = object::sync_objects(
                    group,
                    adapter,
                    devices,
                    state,
                    devices_ok,
                    self.config.max_object_bytes,
                )
                .await?;
                (gathered.trees, gathered.records)
            }
        };

        self.observer.sync_completed(&SyncStats {
            rank,
            world_size,
            strategy,
            entries,
            elapsed: started.elapsed(),
        });
        Ok(bundle)
    }
}
