use crate::error::{Result, SyncError};
use crate::state::{StateMap, StatePath, StateTree};
use crate::sync::exchange::{SyncedEntry, SyncedValue};
use crate::sync::plan::{EntryKind, TraversalPlan};

/// Rebuild one state tree per rank from synchronized entries.
///
/// Pure: walks `plan` and `entries` side by side and places each rank's
/// slot at the planned path. Element `i` of the result is rank `i`'s tree.
pub fn reassemble(
    plan: &TraversalPlan,
    entries: Vec<SyncedEntry>,
    world_size: usize,
) -> Result<Vec<StateTree>> {
    if entries.len() != plan.len() {
        return Err(SyncError::structural(
            StatePath::root(),
            format!("plan has {} entries, got {}", plan.len(), entries.len()),
        ));
    }

    let mut roots: Vec<Option<StateTree>> = vec![None; world_size];
    for (planned, synced) in plan.iter().zip(entries) {
        if planned.path != synced.path {
            return Err(SyncError::structural(
                &synced.path,
                format!("expected entry for {}", planned.path),
            ));
        }
        let slots = split_by_rank(planned.kind, &synced.path, synced.value, world_size)?;
        for (root, value) in roots.iter_mut().zip(slots) {
            StateTree::insert_at(root, &synced.path, value)?;
        }
    }

    roots
        .into_iter()
        .map(|root| root.ok_or_else(|| SyncError::structural(StatePath::root(), "empty plan")))
        .collect()
}

/// Turn one entry's gathered values into one subtree per rank.
fn split_by_rank(
    kind: EntryKind,
    path: &StatePath,
    value: SyncedValue,
    world_size: usize,
) -> Result<Vec<StateTree>> {
    let slots: Vec<StateTree> = match (kind, value) {
        (EntryKind::Scalar, SyncedValue::Scalar(values)) => {
            values.into_iter().map(StateTree::Scalar).collect()
        }
        (EntryKind::Buffer, SyncedValue::Buffer(Some(values))) => {
            values.into_iter().map(StateTree::Buffer).collect()
        }
        (EntryKind::Buffer, SyncedValue::Buffer(None)) => vec![StateTree::Absent; world_size],
        (EntryKind::List, SyncedValue::List(values)) => {
            values.into_iter().map(StateTree::List).collect()
        }
        (EntryKind::Mapping, SyncedValue::Mapping) => {
            vec![StateTree::Mapping(StateMap::new()); world_size]
        }
        (kind, value) => {
            return Err(SyncError::structural(
                path,
                format!("planned as {kind} but synchronized as {value:?}"),
            ));
        }
    };
    if slots.len() != world_size {
        return Err(SyncError::structural(
            path,
            format!("expected {world_size} rank slots, got {}", slots.len()),
        ));
    }
    Ok(slots)
}
