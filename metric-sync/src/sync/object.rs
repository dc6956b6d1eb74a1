//! Object-level strategy: each rank serializes its whole tree and the
//! group gathers the blobs in a single collective.
//!
//! Slower than the flattened path for large buffers, but needs no plan
//! alignment: ranks may hold trees of any shape.

use std::collections::HashMap;

use crate::device::DeviceAdapter;
use crate::error::{Result, SyncError};
use crate::group::ProcessGroup;
use crate::protocol::{
    SnapshotRecord, SyncMessage, WireTensor, WireValue, decode_message, encode_message,
};
use crate::state::{Scalar, StatePath, StateTree};
use crate::tensor::Tensor;
use crate::types::{DataType, Device, Rank};

/// Every rank's rebuilt tree plus the size of this rank's snapshot.
pub(crate) struct ObjectBundle {
    pub(crate) trees: Vec<StateTree>,
    /// Records in the local snapshot: one per node, mappings included.
    pub(crate) records: usize,
}

/// Gather every rank's whole tree.
///
/// `local` carries any fault found before the call; a faulted rank still
/// takes part in the gather (sending an abort) so no peer is left
/// blocked, then every rank fails.
pub(crate) async fn sync_objects(
    group: &dyn ProcessGroup,
    adapter: &dyn DeviceAdapter,
    devices: &HashMap<String, Device>,
    state: &StateTree,
    local: Result<()>,
    max_object_bytes: usize,
) -> Result<ObjectBundle> {
    let (payload, records, local) = match local.and_then(|()| encode_snapshot(state, adapter)) {
        Ok((bytes, _)) if bytes.len() > max_object_bytes => {
            let err = SyncError::ObjectTooLarge {
                size: bytes.len(),
                limit: max_object_bytes,
            };
            (abort(&err)?, 0, Err(err))
        }
        Ok((bytes, records)) => (bytes, records, Ok(())),
        Err(err) => (abort(&err)?, 0, Err(err)),
    };

    let gathered = group.all_gather_object(&payload).await?;
    local?;

    let mut trees = Vec::with_capacity(gathered.len());
    for (r, bytes) in gathered.iter().enumerate() {
        match decode_message(bytes)? {
            SyncMessage::Snapshot { records } => {
                trees.push(rebuild(records, adapter, devices)?);
            }
            SyncMessage::Abort { reason } => {
                return Err(SyncError::PeerValidation {
                    rank: r as Rank,
                    reason,
                });
            }
            other => {
                return Err(SyncError::DecodeFailed(format!(
                    "expected state snapshot, got {other:?}"
                )));
            }
        }
    }
    Ok(ObjectBundle { trees, records })
}

fn abort(err: &SyncError) -> Result<Vec<u8>> {
    encode_message(&SyncMessage::Abort {
        reason: err.to_string(),
    })
}

fn encode_snapshot(state: &StateTree, adapter: &dyn DeviceAdapter) -> Result<(Vec<u8>, usize)> {
    let mut records = Vec::new();
    snapshot(state, &mut Vec::new(), adapter, &mut records)?;
    let count = records.len();
    Ok((encode_message(&SyncMessage::Snapshot { records })?, count))
}

/// Pre-order walk emitting one record per node.
fn snapshot(
    tree: &StateTree,
    path: &mut Vec<String>,
    adapter: &dyn DeviceAdapter,
    out: &mut Vec<SnapshotRecord>,
) -> Result<()> {
    let value = match tree {
        StateTree::Scalar(Scalar::Int(v)) => WireValue::Int(*v),
        StateTree::Scalar(Scalar::Float(v)) => WireValue::Float(*v),
        StateTree::Buffer(t) => WireValue::Buffer(to_wire(t, adapter)?),
        StateTree::List(items) => WireValue::List(
            items
                .iter()
                .map(|t| to_wire(t, adapter))
                .collect::<Result<_>>()?,
        ),
        StateTree::Mapping(_) => WireValue::Mapping,
        StateTree::Absent => WireValue::Absent,
    };
    out.push(SnapshotRecord {
        path: path.clone(),
        value,
    });

    if let StateTree::Mapping(map) = tree {
        for (key, child) in map {
            path.push(key.clone());
            snapshot(child, path, adapter, out)?;
            path.pop();
        }
    }
    Ok(())
}

fn to_wire(tensor: &Tensor, adapter: &dyn DeviceAdapter) -> Result<WireTensor> {
    Ok(WireTensor {
        dtype: tensor.dtype() as u8,
        shape: tensor.shape().iter().map(|&d| d as u64).collect(),
        data: adapter.stage_for_send(tensor)?,
    })
}

fn rebuild(
    records: Vec<SnapshotRecord>,
    adapter: &dyn DeviceAdapter,
    devices: &HashMap<String, Device>,
) -> Result<StateTree> {
    let mut root = None;
    for record in records {
        let path = StatePath::from_keys(record.path);
        // Peers may hold names this rank has no device for; those land on
        // the default device.
        let device = path
            .top_key()
            .and_then(|name| devices.get(name).copied())
            .unwrap_or_default();
        let value = match record.value {
            WireValue::Int(v) => StateTree::Scalar(Scalar::Int(v)),
            WireValue::Float(v) => StateTree::Scalar(Scalar::Float(v)),
            WireValue::Buffer(t) => StateTree::Buffer(from_wire(t, adapter, device)?),
            WireValue::List(items) => StateTree::List(
                items
                    .into_iter()
                    .map(|t| from_wire(t, adapter, device))
                    .collect::<Result<_>>()?,
            ),
            WireValue::Mapping => StateTree::Mapping(Default::default()),
            WireValue::Absent => StateTree::Absent,
        };
        StateTree::insert_at(&mut root, &path, value)?;
    }
    root.ok_or_else(|| SyncError::DecodeFailed("empty state snapshot".into()))
}

fn from_wire(wire: WireTensor, adapter: &dyn DeviceAdapter, device: Device) -> Result<Tensor> {
    let dtype = DataType::from_code(wire.dtype)
        .ok_or_else(|| SyncError::DecodeFailed(format!("unknown dtype code {}", wire.dtype)))?;
    let shape = wire
        .shape
        .iter()
        .map(|&d| {
            usize::try_from(d).map_err(|_| SyncError::DecodeFailed("dimension overflows usize".into()))
        })
        .collect::<Result<Vec<_>>>()?;
    adapter.receive_to_device(wire.data, dtype, &shape, device)
}
