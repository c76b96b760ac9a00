//! The acceptor-side query channel: a shared set of ranks with a pending
//! incoming frame, plus the background task per endpoint that watches for
//! the next announcement.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, Notify};

use crate::connection::Endpoint;
use crate::rank::RankSelector;

/// Tracks which remote ranks currently have an announced frame waiting to
/// be read, and wakes waiters on every announcement.
///
/// `notify_waiters` is used rather than `notify_one`: a single stored permit
/// can be claimed by the wrong waiter (e.g. one polling for `AnySender` while
/// another is pinned to a specific rank), starving the waiter that actually
/// matched. Broadcasting and re-checking the set under the lock avoids that.
#[derive(Debug, Default)]
pub(crate) struct QueryChannel {
    pending: Mutex<HashSet<usize>>,
    notify: Notify,
}

impl QueryChannel {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn announce(&self, rank: usize) {
        self.pending.lock().insert(rank);
        self.notify.notify_waiters();
    }

    /// Resolves to the rank matching `desired` once one has announced a
    /// frame, removing it from the pending set.
    pub(crate) async fn take(&self, desired: RankSelector) -> usize {
        loop {
            // Register interest before checking, so an announcement that
            // lands between the check and the await isn't missed: `Notify`
            // guarantees a `notified()` created before a `notify_waiters()`
            // call observes it even if awaited afterwards.
            let notified = self.notify.notified();
            {
                let mut pending = self.pending.lock();
                match desired {
                    RankSelector::AnySender => {
                        if let Some(&rank) = pending.iter().next() {
                            pending.remove(&rank);
                            return rank;
                        }
                    }
                    RankSelector::Rank(rank) => {
                        if pending.remove(&rank) {
                            return rank;
                        }
                    }
                }
            }
            notified.await;
        }
    }
}

/// Watches one endpoint for the next query announcement (a bare rank
/// prefix with no payload yet behind it) and records it in `channel`.
///
/// Only ever touches the endpoint's read half, never its write half: the
/// pending `read_exact` below can sit idle for the whole gap between two
/// announcements, and a shared read/write lock would block every send to
/// this rank for just as long.
///
/// Re-arms only after the facade has finished reading that rank's payload
/// and signaled on `rearm_rx`, so this task never races ahead and misreads
/// payload bytes as the next announcement.
pub(crate) async fn run_query_task(
    rank: usize,
    endpoint: Endpoint,
    channel: Arc<QueryChannel>,
    mut rearm_rx: mpsc::UnboundedReceiver<()>,
) {
    loop {
        let mut prefix = [0u8; 4];
        let read_result = {
            let mut guard = endpoint.reader.lock().await;
            guard.read_exact(&mut prefix).await
        };
        match read_result {
            Ok(_) => {
                let announced = i32::from_le_bytes(prefix);
                if announced < 0 || announced as usize != rank {
                    tracing::warn!(rank, announced, "query channel desynchronized, endpoint quiescent");
                    return;
                }
                channel.announce(rank);
            }
            Err(err) => {
                tracing::debug!(rank, %err, "query channel closed, endpoint quiescent");
                return;
            }
        }
        if rearm_rx.recv().await.is_none() {
            tracing::debug!(rank, "rearm channel dropped, endpoint quiescent");
            return;
        }
    }
}
