//! The process-group boundary: the three collectives synchronization is
//! built on, plus rank and world-size queries.

mod instrumented;
mod local;

pub use instrumented::InstrumentedGroup;
pub use local::LocalGroup;

use crate::error::Result;
use crate::types::Rank;
use futures::future::BoxFuture;

/// A set of cooperating ranks that can issue collectives together.
///
/// Every collective is a barrier: it completes only once every rank has
/// issued the matching call. Ranks must issue collectives in the same
/// order.
pub trait ProcessGroup: Send + Sync {
    /// This process's rank. Fails with `InvalidGroup` for non-members.
    fn rank(&self) -> Result<Rank>;

    /// Number of ranks in the group.
    fn world_size(&self) -> Result<u32>;

    /// Overwrite `data` on every rank with the contents held by `root`.
    /// Every rank must pass a buffer of the same length.
    fn broadcast<'a>(&'a self, data: &'a mut [u8], root: Rank) -> BoxFuture<'a, Result<()>>;

    /// Gather one equally-sized buffer from every rank, ordered by rank.
    fn all_gather_fixed<'a>(&'a self, data: &'a [u8]) -> BoxFuture<'a, Result<Vec<Vec<u8>>>>;

    /// Gather one serialized object of any size from every rank, ordered
    /// by rank.
    fn all_gather_object<'a>(&'a self, data: &'a [u8]) -> BoxFuture<'a, Result<Vec<Vec<u8>>>>;
}
