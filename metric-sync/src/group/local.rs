use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::group::ProcessGroup;
use crate::types::Rank;
use futures::future::{BoxFuture, try_join_all};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, mpsc};

/// A payload tagged with the collective that produced it.
///
/// Every rank numbers its collectives; a frame whose `(op, seq)` differs
/// from the receiver's means the ranks are no longer in lock-step.
#[derive(Debug, Clone)]
struct Frame {
    op: &'static str,
    seq: u64,
    payload: Vec<u8>,
    /// Set instead of a payload when the sender refused to contribute:
    /// `(object size, sender's limit)`.
    rejected: Option<(usize, usize)>,
}

/// In-process process group: one `LocalGroup` per rank, connected by a
/// full mesh of bounded channels.
///
/// Each rank is expected to run on its own task. Dropping a rank's group
/// disconnects it; peers blocked on it fail with `CollectiveFailed`.
pub struct LocalGroup {
    rank: Rank,
    world_size: u32,
    outboxes: HashMap<Rank, mpsc::Sender<Frame>>,
    inboxes: HashMap<Rank, Mutex<mpsc::Receiver<Frame>>>,
    seq: AtomicU64,
    config: SyncConfig,
}

impl LocalGroup {
    /// Create a connected group of `world_size` ranks with default config.
    pub fn bootstrap(world_size: u32) -> Result<Vec<LocalGroup>> {
        Self::bootstrap_with_config(world_size, SyncConfig::default())
    }

    /// Create a connected group of `world_size` ranks. Element `i` of the
    /// result is rank `i`.
    pub fn bootstrap_with_config(world_size: u32, config: SyncConfig) -> Result<Vec<LocalGroup>> {
        if world_size == 0 {
            return Err(SyncError::WorldSize { world_size });
        }
        let capacity = config.channel_capacity.max(1);

        let mut outboxes: Vec<HashMap<Rank, mpsc::Sender<Frame>>> =
            (0..world_size).map(|_| HashMap::new()).collect();
        let mut inboxes: Vec<HashMap<Rank, Mutex<mpsc::Receiver<Frame>>>> =
            (0..world_size).map(|_| HashMap::new()).collect();

        for src in 0..world_size {
            for dst in 0..world_size {
                if src == dst {
                    continue;
                }
                let (tx, rx) = mpsc::channel(capacity);
                outboxes[src as usize].insert(dst, tx);
                inboxes[dst as usize].insert(src, Mutex::new(rx));
            }
        }

        let groups = outboxes
            .into_iter()
            .zip(inboxes)
            .enumerate()
            .map(|(rank, (outboxes, inboxes))| LocalGroup {
                rank: rank as Rank,
                world_size,
                outboxes,
                inboxes,
                seq: AtomicU64::new(0),
                config: config.clone(),
            })
            .collect();

        tracing::debug!(world_size, capacity, "local process group bootstrapped");
        Ok(groups)
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    fn peers(&self) -> impl Iterator<Item = Rank> + '_ {
        (0..self.world_size).filter(move |&r| r != self.rank)
    }

    /// Send a frame to a peer with timeout, wrapping errors as `CollectiveFailed`.
    async fn collective_send(&self, dest: Rank, frame: Frame) -> Result<()> {
        let tx = self
            .outboxes
            .get(&dest)
            .ok_or(SyncError::InvalidRank {
                rank: dest,
                world_size: self.world_size,
            })?;
        let timeout = self.config.collective_timeout;
        let op = frame.op;
        match tokio::time::timeout(timeout, tx.send(frame)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(SyncError::CollectiveFailed {
                operation: op,
                rank: dest,
                reason: "peer disconnected".into(),
            }),
            Err(_) => Err(SyncError::CollectiveFailed {
                operation: op,
                rank: dest,
                reason: format!("send timed out after {}s", timeout.as_secs()),
            }),
        }
    }

    /// Receive the frame for `(op, seq)` from a peer with timeout.
    async fn collective_recv(&self, src: Rank, op: &'static str, seq: u64) -> Result<Frame> {
        let rx = self.inboxes.get(&src).ok_or(SyncError::InvalidRank {
            rank: src,
            world_size: self.world_size,
        })?;
        let timeout = self.config.collective_timeout;
        let received = tokio::time::timeout(timeout, async { rx.lock().await.recv().await }).await;
        let frame = match received {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                return Err(SyncError::CollectiveFailed {
                    operation: op,
                    rank: src,
                    reason: "peer disconnected".into(),
                });
            }
            Err(_) => {
                return Err(SyncError::CollectiveFailed {
                    operation: op,
                    rank: src,
                    reason: format!("recv timed out after {}s", timeout.as_secs()),
                });
            }
        };
        if frame.op != op || frame.seq != seq {
            return Err(SyncError::CollectiveFailed {
                operation: op,
                rank: src,
                reason: format!(
                    "out of lock-step: expected {op}#{seq}, peer sent {}#{}",
                    frame.op, frame.seq
                ),
            });
        }
        Ok(frame)
    }

    /// Send `data` to every peer and collect every rank's frame, ordered
    /// by rank.
    async fn exchange(
        &self,
        op: &'static str,
        data: &[u8],
        rejected: Option<(usize, usize)>,
    ) -> Result<Vec<Frame>> {
        let seq = self.next_seq();
        let own = Frame {
            op,
            seq,
            payload: data.to_vec(),
            rejected,
        };
        let sends = try_join_all(
            self.peers()
                .map(|dest| self.collective_send(dest, own.clone())),
        );
        let recvs = try_join_all(self.peers().map(|src| self.collective_recv(src, op, seq)));
        let (_, received) = tokio::try_join!(sends, recvs)?;

        let mut out = Vec::with_capacity(self.world_size as usize);
        let mut received = received.into_iter();
        let mut own = Some(own);
        for r in 0..self.world_size {
            let frame = if r == self.rank {
                own.take()
            } else {
                received.next()
            };
            out.extend(frame);
        }
        tracing::trace!(rank = self.rank, op, seq, bytes = data.len(), "collective done");
        Ok(out)
    }
}

impl ProcessGroup for LocalGroup {
    fn rank(&self) -> Result<Rank> {
        Ok(self.rank)
    }

    fn world_size(&self) -> Result<u32> {
        Ok(self.world_size)
    }

    fn broadcast<'a>(&'a self, data: &'a mut [u8], root: Rank) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if root >= self.world_size {
                return Err(SyncError::InvalidRank {
                    rank: root,
                    world_size: self.world_size,
                });
            }
            let op = "broadcast";
            let seq = self.next_seq();
            if self.rank == root {
                let frame = Frame {
                    op,
                    seq,
                    payload: data.to_vec(),
                    rejected: None,
                };
                try_join_all(
                    self.peers()
                        .map(|dest| self.collective_send(dest, frame.clone())),
                )
                .await?;
                return Ok(());
            }
            let received = self.collective_recv(root, op, seq).await?.payload;
            if received.len() != data.len() {
                return Err(SyncError::BufferSizeMismatch {
                    expected: data.len(),
                    actual: received.len(),
                });
            }
            data.copy_from_slice(&received);
            Ok(())
        })
    }

    fn all_gather_fixed<'a>(&'a self, data: &'a [u8]) -> BoxFuture<'a, Result<Vec<Vec<u8>>>> {
        Box::pin(async move {
            let gathered: Vec<Vec<u8>> = self
                .exchange("all_gather_fixed", data, None)
                .await?
                .into_iter()
                .map(|frame| frame.payload)
                .collect();
            if let Some(bad) = gathered.iter().find(|b| b.len() != data.len()) {
                return Err(SyncError::BufferSizeMismatch {
                    expected: data.len(),
                    actual: bad.len(),
                });
            }
            Ok(gathered)
        })
    }

    fn all_gather_object<'a>(&'a self, data: &'a [u8]) -> BoxFuture<'a, Result<Vec<Vec<u8>>>> {
        Box::pin(async move {
            // Oversized objects still take part, as a rejection marker.
            let limit = self.config.max_object_bytes;
            let (payload, rejected) = if data.len() > limit {
                (&[][..], Some((data.len(), limit)))
            } else {
                (data, None)
            };
            let frames = self.exchange("all_gather_object", payload, rejected).await?;

            if let Some((size, limit)) = rejected {
                return Err(SyncError::ObjectTooLarge { size, limit });
            }
            let refused = frames
                .iter()
                .enumerate()
                .find_map(|(r, frame)| frame.rejected.map(|rej| (r as Rank, rej)));
            if let Some((rank, (size, limit))) = refused {
                return Err(SyncError::PeerValidation {
                    rank,
                    reason: SyncError::ObjectTooLarge { size, limit }.to_string(),
                });
            }
            Ok(frames.into_iter().map(|frame| frame.payload).collect())
        })
    }
}
