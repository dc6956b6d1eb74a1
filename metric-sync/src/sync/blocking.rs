use std::collections::HashMap;

use crate::config::SyncStrategy;
use crate::error::{Result, SyncError};
use crate::state::{StatePath, StateTree};
use crate::sync::{ReconciledBuffer, StateSynchronizer, TraversalPlan};
use crate::tensor::Tensor;
use crate::types::{Device, Rank};

/// Blocking wrapper around [`StateSynchronizer`].
///
/// Owns a `tokio::runtime::Runtime` and calls `block_on()` for each
/// operation. Each rank needs its own wrapper; they must run on separate
/// threads since every call blocks until all ranks join.
pub struct BlockingSynchronizer {
    inner: StateSynchronizer,
    rt: tokio::runtime::Runtime,
}

impl BlockingSynchronizer {
    pub fn new(inner: StateSynchronizer) -> Result<Self> {
        let rt = tokio::runtime::Runtime::new()
            .map_err(|e| SyncError::transport_with_source("tokio runtime", e))?;
        Ok(Self { inner, rt })
    }

    pub fn inner(&self) -> &StateSynchronizer {
        &self.inner
    }

    pub fn rank(&self) -> Result<Rank> {
        self.inner.rank()
    }

    pub fn world_size(&self) -> Result<u32> {
        self.inner.world_size()
    }

    pub fn sync_list_length(&self, list: &[Tensor]) -> Result<Vec<usize>> {
        self.rt.block_on(self.inner.sync_list_length(list))
    }

    pub fn sync_dtype_and_shape(
        &self,
        local: Option<&Tensor>,
        path: &StatePath,
    ) -> Result<Option<ReconciledBuffer>> {
        self.rt.block_on(self.inner.sync_dtype_and_shape(local, path))
    }

    pub fn sync_states(
        &self,
        state: &StateTree,
        devices: &HashMap<String, Device>,
        plan: &TraversalPlan,
    ) -> Result<Vec<StateTree>> {
        self.rt.block_on(self.inner.sync_states(state, devices, plan))
    }

    pub fn sync_states_with(
        &self,
        strategy: SyncStrategy,
        state: &StateTree,
        devices: &HashMap<String, Device>,
        plan: &TraversalPlan,
    ) -> Result<Vec<StateTree>> {
        self.rt
            .block_on(self.inner.sync_states_with(strategy, state, devices, plan))
    }
}
