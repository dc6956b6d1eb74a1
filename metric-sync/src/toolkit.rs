//! Metric-level helpers on top of [`StateSynchronizer`].
//!
//! A metric exposes its accumulated state as a [`StateTree`] mapping; these
//! helpers gather every rank's state, rebuild one metric per rank and merge
//! them, so every rank ends up with the same synced metric.

use std::collections::HashMap;

use indexmap::IndexMap;

use crate::error::{Result, SyncError};
use crate::state::{StateMap, StateTree};
use crate::sync::{StateSynchronizer, traversal_order};
use crate::tensor::Tensor;
use crate::types::Device;

/// A stateful metric whose per-rank state can be synchronized.
///
/// Merge semantics (summing counts, taking the max, concatenating samples)
/// belong to the implementor; synchronization only moves state.
pub trait Metric: Clone + Send + Sync {
    type Output;

    /// Current state as a mapping of state name to value.
    fn state(&self) -> StateTree;

    /// Replace the current state with `state`, as produced by
    /// [`state`](Self::state) on some rank.
    fn load_state(&mut self, state: StateTree) -> Result<()>;

    /// Fold the states of `others` into `self`.
    fn merge_state(&mut self, others: &[Self]) -> Result<()>;

    fn compute(&self) -> Self::Output;

    /// Return to the freshly constructed state.
    fn reset(&mut self);

    /// Device this metric's buffers live on.
    fn device(&self) -> Device {
        Device::Cpu
    }

    /// Move every buffer to `device`; later [`device`](Self::device)
    /// calls report it.
    fn to_device(&mut self, device: Device);

    /// Hook run on a copy of the metric before its state is exported for
    /// merging, e.g. to concatenate cached samples into one buffer.
    fn prepare_for_merge(&mut self) {}
}

/// Returns a metric whose state is merged from every rank's copy.
///
/// With world size 1, returns a clone of `metric` unchanged.
pub async fn get_synced_metric<M: Metric>(sync: &StateSynchronizer, metric: &M) -> Result<M> {
    let mut local = metric.clone();
    local.prepare_for_merge();

    let state = local.state();
    let devices = devices_for(&state, metric.device());
    let plan = traversal_order(&state);
    let bundle = sync.sync_states(&state, &devices, &plan).await?;
    if bundle.len() == 1 {
        return Ok(metric.clone());
    }
    merge_bundle(&local, bundle)
}

/// Sync `metric` and return the synced metric's `compute()` on every rank.
pub async fn sync_and_compute<M: Metric>(
    sync: &StateSynchronizer,
    metric: &M,
) -> Result<M::Output> {
    Ok(get_synced_metric(sync, metric).await?.compute())
}

/// State of the synced metric.
pub async fn get_synced_state_dict<M: Metric>(
    sync: &StateSynchronizer,
    metric: &M,
) -> Result<StateTree> {
    Ok(get_synced_metric(sync, metric).await?.state())
}

/// Sync a named collection of metrics in one batched call.
///
/// Every rank must hold the same names in the same order.
pub async fn get_synced_metric_collection<M: Metric>(
    sync: &StateSynchronizer,
    metrics: &IndexMap<String, M>,
) -> Result<IndexMap<String, M>> {
    let mut prepared = metrics.clone();
    prepared.values_mut().for_each(M::prepare_for_merge);

    let state: StateMap = prepared
        .iter()
        .map(|(name, m)| (name.clone(), m.state()))
        .collect();
    let devices: HashMap<String, Device> = prepared
        .iter()
        .map(|(name, m)| (name.clone(), m.device()))
        .collect();
    let state = StateTree::Mapping(state);
    let plan = traversal_order(&state);

    let bundle = sync.sync_states(&state, &devices, &plan).await?;
    if bundle.len() == 1 {
        return Ok(metrics.clone());
    }

    let mut synced = IndexMap::with_capacity(prepared.len());
    for (name, local) in &prepared {
        let per_rank = bundle
            .iter()
            .map(|tree| {
                tree.get(name).cloned().ok_or_else(|| {
                    SyncError::structural(name, "metric missing from a synced collection")
                })
            })
            .collect::<Result<Vec<_>>>()?;
        synced.insert(name.clone(), merge_bundle(local, per_rank)?);
    }
    Ok(synced)
}

pub async fn sync_and_compute_collection<M: Metric>(
    sync: &StateSynchronizer,
    metrics: &IndexMap<String, M>,
) -> Result<IndexMap<String, M::Output>> {
    Ok(get_synced_metric_collection(sync, metrics)
        .await?
        .into_iter()
        .map(|(name, m)| (name, m.compute()))
        .collect())
}

pub async fn get_synced_state_dict_collection<M: Metric>(
    sync: &StateSynchronizer,
    metrics: &IndexMap<String, M>,
) -> Result<IndexMap<String, StateTree>> {
    Ok(get_synced_metric_collection(sync, metrics)
        .await?
        .into_iter()
        .map(|(name, m)| (name, m.state()))
        .collect())
}

/// Rebuild one metric per rank from `bundle` and merge ranks 1.. into
/// rank 0's copy.
fn merge_bundle<M: Metric>(template: &M, bundle: Vec<StateTree>) -> Result<M> {
    let mut per_rank = Vec::with_capacity(bundle.len());
    for state in bundle {
        let mut m = template.clone();
        m.load_state(state)?;
        per_rank.push(m);
    }
    let Some((first, rest)) = per_rank.split_first() else {
        return Err(SyncError::WorldSize { world_size: 0 });
    };
    let mut merged = first.clone();
    merged.merge_state(rest)?;
    Ok(merged)
}

/// Reset every metric in `metrics`, e.g. `&mut vec` or `map.values_mut()`.
pub fn reset_metrics<'a, M: Metric + 'a>(metrics: impl IntoIterator<Item = &'a mut M>) {
    for metric in metrics {
        metric.reset();
    }
}

/// Move every metric in `metrics` to `device`.
pub fn to_device<'a, M: Metric + 'a>(
    metrics: impl IntoIterator<Item = &'a mut M>,
    device: Device,
) {
    for metric in metrics {
        metric.to_device(device);
    }
}

/// Every top-level state name maps to the metric's device.
fn devices_for(state: &StateTree, device: Device) -> HashMap<String, Device> {
    state
        .as_mapping()
        .map(|map| map.keys().map(|k| (k.clone(), device)).collect())
        .unwrap_or_default()
}

/// Split an unaveraged per-class result along dimension 0 into
/// `"{name}_{label}"` entries. Labels default to the class index.
pub fn classwise_converter(
    input: &Tensor,
    name: &str,
    labels: Option<&[String]>,
) -> Result<IndexMap<String, Tensor>> {
    let rows = input.unbind().ok_or_else(|| SyncError::InvalidShape {
        shape: input.shape().to_vec(),
        reason: "cannot split a zero-dim tensor into classes".into(),
    })?;

    let Some(labels) = labels else {
        return Ok(rows
            .into_iter()
            .enumerate()
            .map(|(i, row)| (format!("{name}_{i}"), row))
            .collect());
    };
    if labels.len() != rows.len() {
        return Err(SyncError::LabelCountMismatch {
            labels: labels.len(),
            classes: rows.len(),
        });
    }
    Ok(labels
        .iter()
        .zip(rows)
        .map(|(label, row)| (format!("{name}_{label}"), row))
        .collect())
}
