use std::collections::HashMap;

use crate::device::DeviceAdapter;
use crate::error::{Result, SyncError};
use crate::group::ProcessGroup;
use crate::state::{Scalar, StatePath, StateTree};
use crate::sync::metadata::{sync_dtype_and_shape, sync_list_length};
use crate::sync::plan::{EntryKind, TraversalEntry, TraversalPlan};
use crate::tensor::Tensor;
use crate::types::{Device, Rank};

/// Wire size of one scalar: `[kind tag][8 bytes LE]`.
const SCALAR_WIRE_BYTES: usize = 9;
const TAG_INT: u8 = 0;
const TAG_FLOAT: u8 = 1;

/// Every rank's value for one planned entry, indexed by rank.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncedValue {
    Scalar(Vec<Scalar>),
    /// `None` when no rank held data at this path.
    Buffer(Option<Vec<Tensor>>),
    List(Vec<Vec<Tensor>>),
    /// Members follow as their own entries.
    Mapping,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncedEntry {
    pub path: StatePath,
    pub value: SyncedValue,
}

/// Moves payloads for a planned state tree, one entry at a time, in plan
/// order. Every rank must drive it over the same plan.
pub(crate) struct Exchanger<'a> {
    group: &'a dyn ProcessGroup,
    adapter: &'a dyn DeviceAdapter,
    devices: &'a HashMap<String, Device>,
    rank: Rank,
    world: usize,
}

impl<'a> Exchanger<'a> {
    pub(crate) fn new(
        group: &'a dyn ProcessGroup,
        adapter: &'a dyn DeviceAdapter,
        devices: &'a HashMap<String, Device>,
        rank: Rank,
        world: u32,
    ) -> Self {
        Self {
            group,
            adapter,
            devices,
            rank,
            world: world as usize,
        }
    }

    pub(crate) async fn exchange_all(
        &self,
        plan: &TraversalPlan,
        state: &StateTree,
    ) -> Result<Vec<SyncedEntry>> {
        let mut out = Vec::with_capacity(plan.len());
        for entry in plan {
            let node = state
                .get_path(&entry.path)
                .ok_or_else(|| SyncError::structural(&entry.path, "path missing from local state"))?;
            let value = self.exchange_entry(entry, node).await?;
            out.push(SyncedEntry {
                path: entry.path.clone(),
                value,
            });
        }
        Ok(out)
    }

    async fn exchange_entry(&self, entry: &TraversalEntry, node: &StateTree) -> Result<SyncedValue> {
        let path = &entry.path;
        match (entry.kind, node) {
            (EntryKind::Scalar, StateTree::Scalar(s)) => {
                Ok(SyncedValue::Scalar(self.exchange_scalar(*s).await?))
            }
            (EntryKind::Buffer, StateTree::Buffer(t)) => {
                let device = self.device_for(path)?;
                Ok(SyncedValue::Buffer(self.exchange_buffer(Some(t), path, device).await?))
            }
            (EntryKind::Buffer, StateTree::Absent) => {
                let device = self.device_for(path)?;
                Ok(SyncedValue::Buffer(self.exchange_buffer(None, path, device).await?))
            }
            (EntryKind::List, StateTree::List(items)) => {
                let device = self.device_for(path)?;
                Ok(SyncedValue::List(self.exchange_list(items, path, device).await?))
            }
            (EntryKind::Mapping, StateTree::Mapping(_)) => Ok(SyncedValue::Mapping),
            (kind, node) => Err(SyncError::structural(
                path,
                format!("planned as {kind} but local state holds {}", node.kind_name()),
            )),
        }
    }

    /// Device received buffers are placed on: the one mapped to the
    /// entry's top-level name, or the default device for a bare root.
    fn device_for(&self, path: &StatePath) -> Result<Device> {
        match path.top_key() {
            Some(name) => self
                .devices
                .get(name)
                .copied()
                .ok_or_else(|| SyncError::MissingDevice {
                    name: name.to_string(),
                }),
            None => Ok(Device::default()),
        }
    }

    async fn exchange_scalar(&self, value: Scalar) -> Result<Vec<Scalar>> {
        let gathered = self.group.all_gather_fixed(&encode_scalar(value)).await?;
        gathered.iter().map(|b| decode_scalar(b)).collect()
    }

    /// Exchange one buffer slot. Ranks without data contribute a zero
    /// buffer of the authority shape and receive it back as their slot.
    async fn exchange_buffer(
        &self,
        local: Option<&Tensor>,
        path: &StatePath,
        device: Device,
    ) -> Result<Option<Vec<Tensor>>> {
        let Some(meta) = sync_dtype_and_shape(self.group, local, path).await? else {
            tracing::trace!(%path, "absent on every rank, skipping data movement");
            return Ok(None);
        };

        let mut payload = match local {
            Some(t) => self.adapter.stage_for_send(t)?,
            None => {
                let zeros = self.adapter.zeros(meta.dtype, &meta.shape, device)?;
                self.adapter.stage_for_send(&zeros)?
            }
        };
        let expected = meta.byte_len_of(self.rank);
        if payload.len() != expected {
            return Err(SyncError::BufferSizeMismatch {
                expected,
                actual: payload.len(),
            });
        }
        payload.resize(meta.max_bytes(), 0);

        let gathered = self.group.all_gather_fixed(&payload).await?;
        if gathered.len() != self.world {
            return Err(SyncError::CollectiveFailed {
                operation: "all_gather_fixed",
                rank: self.rank,
                reason: format!("gathered {} buffers for world {}", gathered.len(), self.world),
            });
        }

        let mut out = Vec::with_capacity(self.world);
        for (r, mut bytes) in gathered.into_iter().enumerate() {
            let r = r as Rank;
            bytes.truncate(meta.byte_len_of(r));
            out.push(
                self.adapter
                    .receive_to_device(bytes, meta.dtype, meta.shape_of(r), device)?,
            );
        }
        tracing::trace!(%path, dtype = %meta.dtype, authority = meta.authority, "buffer exchanged");
        Ok(Some(out))
    }

    /// Exchange a list of buffers whose length may differ per rank. Each
    /// element index is reconciled and exchanged on its own; a rank keeps
    /// slot `j` only if its list had more than `j` elements.
    async fn exchange_list(
        &self,
        items: &[Tensor],
        path: &StatePath,
        device: Device,
    ) -> Result<Vec<Vec<Tensor>>> {
        let lengths = sync_list_length(self.group, items).await?;
        let max_len = lengths.iter().copied().max().unwrap_or(0);
        let mut out: Vec<Vec<Tensor>> = lengths.iter().map(|&n| Vec::with_capacity(n)).collect();

        for j in 0..max_len {
            let elem_path = path.child_index(j);
            let gathered = self
                .exchange_buffer(items.get(j), &elem_path, device)
                .await?
                .ok_or_else(|| SyncError::ShapeReconciliation {
                    path: elem_path.to_string(),
                    reason: "no rank reported data for a listed element".into(),
                })?;
            for ((slot, &len), tensor) in out.iter_mut().zip(&lengths).zip(gathered) {
                if len > j {
                    slot.push(tensor);
                }
            }
        }
        tracing::trace!(%path, ?lengths, "list exchanged");
        Ok(out)
    }
}

fn encode_scalar(value: Scalar) -> [u8; SCALAR_WIRE_BYTES] {
    let mut buf = [0u8; SCALAR_WIRE_BYTES];
    match value {
        Scalar::Int(v) => {
            buf[0] = TAG_INT;
            buf[1..].copy_from_slice(&v.to_le_bytes());
        }
        Scalar::Float(v) => {
            buf[0] = TAG_FLOAT;
            buf[1..].copy_from_slice(&v.to_le_bytes());
        }
    }
    buf
}

fn decode_scalar(bytes: &[u8]) -> Result<Scalar> {
    let (&tag, rest) = bytes
        .split_first()
        .ok_or_else(|| SyncError::DecodeFailed("empty scalar payload".into()))?;
    let raw: [u8; 8] = rest
        .try_into()
        .map_err(|_| SyncError::DecodeFailed("scalar payload bytes".into()))?;
    match tag {
        TAG_INT => Ok(Scalar::Int(i64::from_le_bytes(raw))),
        TAG_FLOAT => Ok(Scalar::Float(f64::from_le_bytes(raw))),
        other => Err(SyncError::DecodeFailed(format!("unknown scalar tag {other}"))),
    }
}
