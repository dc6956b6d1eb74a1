use crate::error::{Result, SyncError};
use crate::group::ProcessGroup;
use crate::protocol::{SyncMessage, decode_message, encode_message};
use crate::state::StatePath;
use crate::tensor::{Tensor, numel};
use crate::types::{DataType, Rank};

/// Agreed metadata for one buffer slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciledBuffer {
    pub dtype: DataType,
    /// Shape reported by the authority rank.
    pub shape: Vec<usize>,
    /// Lowest rank holding a concrete buffer.
    pub authority: Rank,
    /// Shape of every rank's contribution, indexed by rank. Ranks with no
    /// local data adopt the authority shape.
    pub rank_shapes: Vec<Vec<usize>>,
}

impl ReconciledBuffer {
    pub fn shape_of(&self, rank: Rank) -> &[usize] {
        self.rank_shapes
            .get(rank as usize)
            .map_or(self.shape.as_slice(), Vec::as_slice)
    }

    pub fn byte_len_of(&self, rank: Rank) -> usize {
        numel(self.shape_of(rank)) * self.dtype.size_in_bytes()
    }

    /// Size every rank pads its contribution to for the fixed-size gather.
    pub fn max_bytes(&self) -> usize {
        (0..self.rank_shapes.len() as Rank)
            .map(|r| self.byte_len_of(r))
            .max()
            .unwrap_or(0)
    }
}

/// Gather every rank's local list length, ordered by rank.
///
/// One fixed-size all-gather of 8 bytes per rank. Empty lists report 0.
pub async fn sync_list_length(group: &dyn ProcessGroup, list: &[Tensor]) -> Result<Vec<usize>> {
    let local = (list.len() as u64).to_le_bytes();
    let gathered = group.all_gather_fixed(&local).await?;

    gathered
        .iter()
        .map(|bytes| {
            let raw: [u8; 8] = bytes
                .as_slice()
                .try_into()
                .map_err(|_| SyncError::DecodeFailed("list length bytes".into()))?;
            usize::try_from(u64::from_le_bytes(raw))
                .map_err(|_| SyncError::DecodeFailed("list length overflows usize".into()))
        })
        .collect()
}

/// Agree on the dtype and shape of one buffer slot across all ranks.
///
/// Every rank reports a small descriptor (never the payload). The first
/// rank by ascending id that holds a concrete buffer is authoritative.
/// Returns `None` on every rank when no rank holds data. Concrete buffers
/// with different dtypes fail with `ShapeReconciliation` on every rank.
pub async fn sync_dtype_and_shape(
    group: &dyn ProcessGroup,
    local: Option<&Tensor>,
    path: &StatePath,
) -> Result<Option<ReconciledBuffer>> {
    let descriptor = match local {
        Some(t) => SyncMessage::Descriptor {
            dtype: Some(t.dtype() as u8),
            shape: t.shape().iter().map(|&d| d as u64).collect(),
        },
        None => SyncMessage::Descriptor {
            dtype: None,
            shape: Vec::new(),
        },
    };
    let gathered = group.all_gather_object(&encode_message(&descriptor)?).await?;

    let mut reports: Vec<Option<(DataType, Vec<usize>)>> = Vec::with_capacity(gathered.len());
    for bytes in &gathered {
        reports.push(parse_descriptor(&decode_message(bytes)?)?);
    }
    reconcile(&reports, path)
}

fn parse_descriptor(msg: &SyncMessage) -> Result<Option<(DataType, Vec<usize>)>> {
    let SyncMessage::Descriptor { dtype, shape } = msg else {
        return Err(SyncError::DecodeFailed(format!(
            "expected buffer descriptor, got {msg:?}"
        )));
    };
    let Some(code) = dtype else {
        return Ok(None);
    };
    let dtype = DataType::from_code(*code)
        .ok_or_else(|| SyncError::DecodeFailed(format!("unknown dtype code {code}")))?;
    let shape = shape
        .iter()
        .map(|&d| {
            usize::try_from(d).map_err(|_| SyncError::DecodeFailed("dimension overflows usize".into()))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Some((dtype, shape)))
}

/// Pick the authority and check every concrete report against it.
fn reconcile(
    reports: &[Option<(DataType, Vec<usize>)>],
    path: &StatePath,
) -> Result<Option<ReconciledBuffer>> {
    let Some((authority, (dtype, shape))) = reports
        .iter()
        .enumerate()
        .find_map(|(r, report)| report.as_ref().map(|meta| (r, meta)))
    else {
        return Ok(None);
    };

    let mut rank_shapes = Vec::with_capacity(reports.len());
    for (r, report) in reports.iter().enumerate() {
        match report {
            Some((other, _)) if other != dtype => {
                return Err(SyncError::ShapeReconciliation {
                    path: path.to_string(),
                    reason: format!(
                        "rank {authority} holds {dtype} but rank {r} holds {other}"
                    ),
                });
            }
            Some((_, own)) => rank_shapes.push(own.clone()),
            None => rank_shapes.push(shape.clone()),
        }
    }

    Ok(Some(ReconciledBuffer {
        dtype: *dtype,
        shape: shape.clone(),
        authority: authority as Rank,
        rank_shapes,
    }))
}
