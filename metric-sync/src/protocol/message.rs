/// Control messages exchanged during a synchronization call.
///
/// Bulk payloads (scalars, buffer contents, list lengths) do NOT flow
/// through this enum. They travel as raw little-endian bytes over the
/// fixed-size gather; only small metadata and the object-level snapshot
/// are rkyv-encoded.
#[derive(rkyv::Archive, rkyv::Serialize, rkyv::Deserialize, Debug, Clone, PartialEq)]
pub enum SyncMessage {
    /// One rank's view of a buffer slot. `dtype` is `None` when the rank
    /// holds no data at that path.
    Descriptor { dtype: Option<u8>, shape: Vec<u64> },

    /// Plan fingerprint plus any fault found while validating locally.
    Structure {
        fingerprint: u64,
        entries: u64,
        fault: Option<String>,
    },

    /// Full traversal plan, sent only after fingerprints disagreed.
    Plan { entries: Vec<PlanEntryWire> },

    /// Whole-tree snapshot for the object-level strategy.
    Snapshot { records: Vec<SnapshotRecord> },

    /// A rank failed before it could contribute its snapshot.
    Abort { reason: String },
}

#[derive(rkyv::Archive, rkyv::Serialize, rkyv::Deserialize, Debug, Clone, PartialEq)]
pub struct PlanEntryWire {
    pub kind: u8,
    /// Mapping keys from the root. Plans never contain list indices.
    pub path: Vec<String>,
}

/// One node of a pre-order snapshot walk.
#[derive(rkyv::Archive, rkyv::Serialize, rkyv::Deserialize, Debug, Clone, PartialEq)]
pub struct SnapshotRecord {
    pub path: Vec<String>,
    pub value: WireValue,
}

#[derive(rkyv::Archive, rkyv::Serialize, rkyv::Deserialize, Debug, Clone, PartialEq)]
pub enum WireValue {
    Int(i64),
    Float(f64),
    Buffer(WireTensor),
    List(Vec<WireTensor>),
    /// Members follow as their own records.
    Mapping,
    Absent,
}

#[derive(rkyv::Archive, rkyv::Serialize, rkyv::Deserialize, Debug, Clone, PartialEq)]
pub struct WireTensor {
    pub dtype: u8,
    pub shape: Vec<u64>,
    pub data: Vec<u8>,
}
