use std::collections::HashMap;

use crate::device::DeviceAdapter;
use crate::error::{Result, SyncError};
use crate::group::ProcessGroup;
use crate::protocol::{SyncMessage, decode_message, encode_message};
use crate::state::{StatePath, StateTree};
use crate::sync::plan::{EntryKind, TraversalPlan, traversal_order};
use crate::types::{Device, Rank};

/// Query rank and world size, rejecting groups that cannot be synced over.
pub(crate) fn validate_world(group: &dyn ProcessGroup) -> Result<(Rank, u32)> {
    let rank = group.rank()?;
    let world_size = group.world_size()?;
    if world_size < 1 {
        return Err(SyncError::WorldSize { world_size });
    }
    if rank >= world_size {
        return Err(SyncError::InvalidGroup {
            reason: format!("rank {rank} is outside a world of size {world_size}"),
        });
    }
    Ok((rank, world_size))
}

/// Check that `plan` describes the local tree.
pub(crate) fn check_plan(state: &StateTree, plan: &TraversalPlan) -> Result<()> {
    let local = traversal_order(state);
    let Some(i) = plan.first_divergence(&local) else {
        return Ok(());
    };
    match (plan.entries().get(i), local.entries().get(i)) {
        (Some(expected), Some(found)) if expected.path == found.path => Err(SyncError::structural(
            &expected.path,
            format!("plan expects a {} but local state holds a {}", expected.kind, found.kind),
        )),
        (Some(expected), Some(found)) => Err(SyncError::structural(
            &expected.path,
            format!("plan expects this entry but local state has {} here", found.path),
        )),
        (Some(expected), None) => Err(SyncError::structural(
            &expected.path,
            "missing from local state",
        )),
        (None, Some(found)) => Err(SyncError::structural(&found.path, "not covered by the plan")),
        (None, None) => Ok(()),
    }
}

/// Check that every buffer-bearing top-level name has a device the
/// adapter can place buffers on, and that every local buffer can be staged.
pub(crate) fn check_devices(
    state: &StateTree,
    devices: &HashMap<String, Device>,
    adapter: &dyn DeviceAdapter,
) -> Result<()> {
    for entry in traversal_order(state).iter() {
        if !matches!(entry.kind, EntryKind::Buffer | EntryKind::List) {
            continue;
        }
        let device = match entry.path.top_key() {
            Some(name) => *devices.get(name).ok_or_else(|| SyncError::MissingDevice {
                name: name.to_string(),
            })?,
            None => Device::default(),
        };
        if !adapter.supports(device) {
            return Err(SyncError::UnsupportedDevice { device });
        }
    }
    if let Some(t) = state.tensors().into_iter().find(|t| !adapter.supports(t.device())) {
        return Err(SyncError::UnsupportedDevice {
            device: t.device(),
        });
    }
    Ok(())
}

/// Cross-rank agreement that every rank is fit to sync and holds the same
/// structure.
///
/// Every rank reports its plan fingerprint and any local fault in one
/// object gather, so a fault on one rank fails every rank at the same
/// collective. A rank that faulted gets its own error back. When
/// fingerprints disagree, one more gather exchanges the plans to name the
/// first offending path.
pub(crate) async fn agree_on_structure(
    group: &dyn ProcessGroup,
    plan: &TraversalPlan,
    local: Result<()>,
) -> Result<()> {
    let report = SyncMessage::Structure {
        fingerprint: plan.fingerprint(),
        entries: plan.len() as u64,
        fault: local.as_ref().err().map(ToString::to_string),
    };
    let gathered = group.all_gather_object(&encode_message(&report)?).await?;
    local?;

    let mut fingerprints = Vec::with_capacity(gathered.len());
    for (r, bytes) in gathered.iter().enumerate() {
        match decode_message(bytes)? {
            SyncMessage::Structure {
                fault: Some(reason),
                ..
            } => {
                return Err(SyncError::PeerValidation {
                    rank: r as Rank,
                    reason,
                });
            }
            SyncMessage::Structure {
                fingerprint,
                entries,
                fault: None,
            } => fingerprints.push((fingerprint, entries)),
            other => {
                return Err(SyncError::DecodeFailed(format!(
                    "expected structure report, got {other:?}"
                )));
            }
        }
    }

    if fingerprints.windows(2).all(|w| w[0] == w[1]) {
        return Ok(());
    }
    tracing::debug!(?fingerprints, "plan fingerprints disagree, exchanging plans");
    Err(locate_mismatch(group, plan).await?)
}

/// Exchange full plans and describe the first difference from rank 0.
async fn locate_mismatch(group: &dyn ProcessGroup, plan: &TraversalPlan) -> Result<SyncError> {
    let msg = SyncMessage::Plan {
        entries: plan.to_wire(),
    };
    let gathered = group.all_gather_object(&encode_message(&msg)?).await?;

    let mut plans = Vec::with_capacity(gathered.len());
    for bytes in &gathered {
        match decode_message(bytes)? {
            SyncMessage::Plan { entries } => plans.push(TraversalPlan::from_wire(entries)?),
            other => {
                return Err(SyncError::DecodeFailed(format!(
                    "expected traversal plan, got {other:?}"
                )));
            }
        }
    }

    let Some(reference) = plans.first() else {
        return Ok(SyncError::structural(StatePath::root(), "no plans gathered"));
    };
    for (r, other) in plans.iter().enumerate().skip(1) {
        let Some(i) = reference.first_divergence(other) else {
            continue;
        };
        let error = match (reference.entries().get(i), other.entries().get(i)) {
            (Some(a), Some(b)) if a.path == b.path => SyncError::structural(
                &a.path,
                format!("rank 0 has a {} but rank {r} has a {}", a.kind, b.kind),
            ),
            (Some(a), Some(b)) => SyncError::structural(
                &a.path,
                format!("rank 0 has this entry where rank {r} has {}", b.path),
            ),
            (Some(a), None) => SyncError::structural(&a.path, format!("missing on rank {r}")),
            (None, Some(b)) => SyncError::structural(&b.path, format!("only present on rank {r}")),
            (None, None) => continue,
        };
        return Ok(error);
    }
    Ok(SyncError::structural(
        StatePath::root(),
        "plan fingerprints differ across ranks",
    ))
}
