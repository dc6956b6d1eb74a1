use crate::error::{Result, SyncError};
use crate::hash::fnv1a;
use crate::protocol::PlanEntryWire;
use crate::state::{PathSegment, StatePath, StateTree};

/// What kind of node sits at a planned path.
///
/// `Absent` leaves plan as `Buffer`: they still occupy a slot so every
/// rank's plan stays path-aligned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EntryKind {
    Scalar = 0,
    Buffer = 1,
    List = 2,
    Mapping = 3,
}

impl EntryKind {
    pub fn of(tree: &StateTree) -> Self {
        match tree {
            StateTree::Scalar(_) => EntryKind::Scalar,
            StateTree::Buffer(_) | StateTree::Absent => EntryKind::Buffer,
            StateTree::List(_) => EntryKind::List,
            StateTree::Mapping(_) => EntryKind::Mapping,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(EntryKind::Scalar),
            1 => Some(EntryKind::Buffer),
            2 => Some(EntryKind::List),
            3 => Some(EntryKind::Mapping),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            EntryKind::Scalar => "scalar",
            EntryKind::Buffer => "buffer",
            EntryKind::List => "list",
            EntryKind::Mapping => "mapping",
        }
    }
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TraversalEntry {
    pub path: StatePath,
    pub kind: EntryKind,
}

/// The deterministic flattening of a state tree.
///
/// Entries are in pre-order: a mapping's own entry precedes its members,
/// which follow in the mapping's iteration order. The root is always
/// entry 0. Computing a plan once and reusing it across syncs of
/// structurally identical trees is allowed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TraversalPlan {
    entries: Vec<TraversalEntry>,
}

impl TraversalPlan {
    pub fn entries(&self) -> &[TraversalEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TraversalEntry> {
        self.entries.iter()
    }

    /// Hash of every entry's kind and path. Equal plans have equal
    /// fingerprints on every rank.
    pub fn fingerprint(&self) -> u64 {
        let mut parts: Vec<Vec<u8>> = Vec::with_capacity(self.entries.len() * 2);
        for entry in &self.entries {
            parts.push(vec![entry.kind as u8]);
            parts.push((entry.path.depth() as u64).to_le_bytes().to_vec());
            for segment in entry.path.segments() {
                match segment {
                    PathSegment::Key(k) => {
                        parts.push((k.len() as u64).to_le_bytes().to_vec());
                        parts.push(k.as_bytes().to_vec());
                    }
                    PathSegment::Index(i) => {
                        parts.push(vec![0xFF]);
                        parts.push((*i as u64).to_le_bytes().to_vec());
                    }
                }
            }
        }
        fnv1a(parts)
    }

    /// Index of the first entry at which `self` and `other` differ, or
    /// `None` if they are identical.
    pub fn first_divergence(&self, other: &TraversalPlan) -> Option<usize> {
        let common = self.entries.len().min(other.entries.len());
        (0..common)
            .find(|&i| self.entries[i] != other.entries[i])
            .or_else(|| (self.entries.len() != other.entries.len()).then_some(common))
    }

    pub(crate) fn to_wire(&self) -> Vec<PlanEntryWire> {
        self.entries
            .iter()
            .map(|e| PlanEntryWire {
                kind: e.kind as u8,
                path: e.path.keys().map(str::to_owned).collect(),
            })
            .collect()
    }

    pub(crate) fn from_wire(entries: Vec<PlanEntryWire>) -> Result<Self> {
        let entries = entries
            .into_iter()
            .map(|w| {
                let kind = EntryKind::from_code(w.kind).ok_or_else(|| {
                    SyncError::DecodeFailed(format!("unknown plan entry kind {}", w.kind))
                })?;
                Ok(TraversalEntry {
                    path: StatePath::from_keys(w.path),
                    kind,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { entries })
    }
}

impl<'a> IntoIterator for &'a TraversalPlan {
    type Item = &'a TraversalEntry;
    type IntoIter = std::slice::Iter<'a, TraversalEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Plan the traversal of `tree`. Pure and deterministic.
pub fn traversal_order(tree: &StateTree) -> TraversalPlan {
    let mut entries = Vec::new();
    walk(tree, StatePath::root(), &mut entries);
    TraversalPlan { entries }
}

fn walk(tree: &StateTree, path: StatePath, entries: &mut Vec<TraversalEntry>) {
    let kind = EntryKind::of(tree);
    if let StateTree::Mapping(map) = tree {
        entries.push(TraversalEntry {
            path: path.clone(),
            kind,
        });
        for (key, child) in map {
            walk(child, path.child_key(key), entries);
        }
    } else {
        entries.push(TraversalEntry { path, kind });
    }
}
