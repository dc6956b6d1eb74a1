use crate::error::Result;
use crate::group::ProcessGroup;
use crate::types::Rank;
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicU64, Ordering};

/// Wraps a [`ProcessGroup`] and counts the collectives issued through it.
pub struct InstrumentedGroup<G> {
    inner: G,
    calls: AtomicU64,
    bytes: AtomicU64,
}

impl<G: ProcessGroup> InstrumentedGroup<G> {
    pub fn new(inner: G) -> Self {
        Self {
            inner,
            calls: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
        }
    }

    /// Collectives issued so far.
    pub fn collective_calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Bytes this rank contributed to collectives so far.
    pub fn bytes_contributed(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    pub fn inner(&self) -> &G {
        &self.inner
    }

    fn record(&self, op: &'static str, len: usize) {
        let call = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        self.bytes.fetch_add(len as u64, Ordering::Relaxed);
        tracing::trace!(op, call, bytes = len, "collective issued");
    }
}

impl<G: ProcessGroup> ProcessGroup for InstrumentedGroup<G> {
    fn rank(&self) -> Result<Rank> {
        self.inner.rank()
    }

    fn world_size(&self) -> Result<u32> {
        self.inner.world_size()
    }

    fn broadcast<'a>(&'a self, data: &'a mut [u8], root: Rank) -> BoxFuture<'a, Result<()>> {
        self.record("broadcast", data.len());
        self.inner.broadcast(data, root)
    }

    fn all_gather_fixed<'a>(&'a self, data: &'a [u8]) -> BoxFuture<'a, Result<Vec<Vec<u8>>>> {
        self.record("all_gather_fixed", data.len());
        self.inner.all_gather_fixed(data)
    }

    fn all_gather_object<'a>(&'a self, data: &'a [u8]) -> BoxFuture<'a, Result<Vec<Vec<u8>>>> {
        self.record("all_gather_object", data.len());
        self.inner.all_gather_object(data)
    }
}
