use indexmap::IndexMap;

use super::path::{PathSegment, StatePath};
use crate::error::{Result, SyncError};
use crate::tensor::Tensor;

/// Insertion-ordered mapping of state names to subtrees.
///
/// Iteration order is the traversal order: every rank must build its
/// mappings with the same key insertion order.
pub type StateMap = IndexMap<String, StateTree>;

/// A plain number. Integer and floating values keep their kind through
/// synchronization; no coercion is ever applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    Int(i64),
    Float(f64),
}

impl Scalar {
    pub fn as_f64(self) -> f64 {
        match self {
            Scalar::Int(v) => v as f64,
            Scalar::Float(v) => v,
        }
    }

    pub fn is_int(self) -> bool {
        matches!(self, Scalar::Int(_))
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Scalar::Int(v)
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Scalar::Float(v)
    }
}

impl std::fmt::Display for Scalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scalar::Int(v) => write!(f, "{v}"),
            Scalar::Float(v) => write!(f, "{v:?}"),
        }
    }
}

/// A rank's named numeric state.
#[derive(Debug, Clone, PartialEq)]
pub enum StateTree {
    Scalar(Scalar),
    Buffer(Tensor),
    /// Ordered buffers; length may differ per rank.
    List(Vec<Tensor>),
    Mapping(StateMap),
    /// A buffer slot with no data yet.
    Absent,
}

static ABSENT: StateTree = StateTree::Absent;

impl StateTree {
    /// Build a mapping node from `(key, value)` pairs, preserving order.
    pub fn mapping<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<StateTree>,
    {
        StateTree::Mapping(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Name of the variant, for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            StateTree::Scalar(_) => "scalar",
            StateTree::Buffer(_) => "buffer",
            StateTree::List(_) => "list",
            StateTree::Mapping(_) => "mapping",
            StateTree::Absent => "absent",
        }
    }

    /// Member `key` of a mapping node.
    pub fn get(&self, key: &str) -> Option<&StateTree> {
        match self {
            StateTree::Mapping(map) => map.get(key),
            _ => None,
        }
    }

    /// Node at `path`, following mapping keys and list indices.
    ///
    /// A list index resolves to a `Buffer` view only through
    /// [`as_list`](Self::as_list); here it yields `None`.
    pub fn get_path(&self, path: &StatePath) -> Option<&StateTree> {
        let mut node = self;
        for segment in path.segments() {
            node = match segment {
                PathSegment::Key(k) => node.get(k)?,
                PathSegment::Index(_) => return None,
            };
        }
        Some(node)
    }

    pub fn as_scalar(&self) -> Option<Scalar> {
        match self {
            StateTree::Scalar(s) => Some(*s),
            _ => None,
        }
    }

    pub fn as_tensor(&self) -> Option<&Tensor> {
        match self {
            StateTree::Buffer(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Tensor]> {
        match self {
            StateTree::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_mapping(&self) -> Option<&StateMap> {
        match self {
            StateTree::Mapping(map) => Some(map),
            _ => None,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, StateTree::Absent)
    }

    /// Every buffer held anywhere in the tree, in traversal order.
    pub fn tensors(&self) -> Vec<&Tensor> {
        let mut out = Vec::new();
        collect_tensors(self, &mut out);
        out
    }

    /// Place `value` at `path`, creating nothing along the way: every
    /// ancestor must already be a mapping. An empty path replaces the root.
    pub(crate) fn insert_at(
        root: &mut Option<StateTree>,
        path: &StatePath,
        value: StateTree,
    ) -> Result<()> {
        let Some((last, parents)) = path.segments().split_last() else {
            *root = Some(value);
            return Ok(());
        };
        let mut node = root
            .as_mut()
            .ok_or_else(|| SyncError::structural(path, "parent of entry was never placed"))?;
        for segment in parents {
            node = match (node, segment) {
                (StateTree::Mapping(map), PathSegment::Key(k)) => map
                    .get_mut(k)
                    .ok_or_else(|| SyncError::structural(path, format!("missing parent {k:?}")))?,
                _ => return Err(SyncError::structural(path, "parent is not a mapping")),
            };
        }
        match (node, last) {
            (StateTree::Mapping(map), PathSegment::Key(k)) => {
                map.insert(k.clone(), value);
                Ok(())
            }
            _ => Err(SyncError::structural(path, "parent is not a mapping")),
        }
    }
}

fn collect_tensors<'a>(tree: &'a StateTree, out: &mut Vec<&'a Tensor>) {
    match tree {
        StateTree::Buffer(t) => out.push(t),
        StateTree::List(items) => out.extend(items.iter()),
        StateTree::Mapping(map) => map.values().for_each(|v| collect_tensors(v, out)),
        StateTree::Scalar(_) | StateTree::Absent => {}
    }
}

impl std::ops::Index<&str> for StateTree {
    type Output = StateTree;

    /// Member lookup that yields `Absent` for non-mappings and missing keys.
    fn index(&self, key: &str) -> &StateTree {
        self.get(key).unwrap_or(&ABSENT)
    }
}

impl From<Scalar> for StateTree {
    fn from(v: Scalar) -> Self {
        StateTree::Scalar(v)
    }
}

impl From<i64> for StateTree {
    fn from(v: i64) -> Self {
        StateTree::Scalar(Scalar::Int(v))
    }
}

impl From<f64> for StateTree {
    fn from(v: f64) -> Self {
        StateTree::Scalar(Scalar::Float(v))
    }
}

impl From<Tensor> for StateTree {
    fn from(t: Tensor) -> Self {
        StateTree::Buffer(t)
    }
}

impl From<Option<Tensor>> for StateTree {
    fn from(t: Option<Tensor>) -> Self {
        t.map_or(StateTree::Absent, StateTree::Buffer)
    }
}

impl From<Vec<Tensor>> for StateTree {
    fn from(items: Vec<Tensor>) -> Self {
        StateTree::List(items)
    }
}

impl From<StateMap> for StateTree {
    fn from(map: StateMap) -> Self {
        StateTree::Mapping(map)
    }
}
