//! Bookkeeping for live connection workers.
//!
//! Each entry pairs a worker's join handle with its completion flag and a
//! one-shot "kick" used to force the worker out of a blocked receive or send
//! during shutdown. Entries are keyed by a monotonically increasing id, so
//! iteration follows registration order.

use std::{
    collections::BTreeMap,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use tokio::{
    sync::{Mutex, oneshot},
    task::JoinHandle,
};
use tracing::{debug, warn};

pub type WorkerId = u64;

#[derive(Default)]
pub struct WorkerRegistry {
    entries: Mutex<BTreeMap<WorkerId, WorkerEntry>>,
    next_id: AtomicU64,
}

struct WorkerEntry {
    peer: SocketAddr,
    handle: JoinHandle<()>,
    completed: Arc<AtomicBool>,
    kick: oneshot::Sender<()>,
}

/// What a worker receives when its slot is reserved.
pub struct WorkerTicket {
    pub id: WorkerId,
    pub completion: CompletionGuard,
    pub kick: oneshot::Receiver<()>,
}

/// Slot half kept by the acceptor until the worker is spawned.
pub struct Reservation {
    id: WorkerId,
    peer: SocketAddr,
    completed: Arc<AtomicBool>,
    kick: oneshot::Sender<()>,
}

/// Sets the worker's completion flag when dropped, on every exit path.
pub struct CompletionGuard {
    completed: Arc<AtomicBool>,
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        self.completed.store(true, Ordering::Release);
    }
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reserve(&self, peer: SocketAddr) -> (Reservation, WorkerTicket) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let completed = Arc::new(AtomicBool::new(false));
        let (kick_tx, kick_rx) = oneshot::channel();

        let reservation = Reservation {
            id,
            peer,
            completed: Arc::clone(&completed),
            kick: kick_tx,
        };
        let ticket = WorkerTicket {
            id,
            completion: CompletionGuard { completed },
            kick: kick_rx,
        };
        (reservation, ticket)
    }

    pub async fn register(&self, reservation: Reservation, handle: JoinHandle<()>) {
        let Reservation {
            id,
            peer,
            completed,
            kick,
        } = reservation;
        let mut entries = self.entries.lock().await;
        entries.insert(
            id,
            WorkerEntry {
                peer,
                handle,
                completed,
                kick,
            },
        );
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Joins and removes every finished worker. Never waits on a running one.
    pub async fn reap_completed(&self) -> usize {
        let finished: Vec<(WorkerId, WorkerEntry)> = {
            let mut entries = self.entries.lock().await;
            let ids: Vec<WorkerId> = entries
                .iter()
                .filter(|(_, entry)| entry.completed.load(Ordering::Acquire))
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| entries.remove(&id).map(|entry| (id, entry)))
                .collect()
        };

        let reaped = finished.len();
        for (id, entry) in finished {
            join_worker(id, entry.peer, entry.handle).await;
        }
        reaped
    }

    /// Forces every registered worker to stop, then joins all of them.
    ///
    /// Only called once the acceptor has stopped, but loops until the map is
    /// empty so a late registration is still drained.
    pub async fn drain_all(&self) -> usize {
        let mut drained = 0;
        loop {
            let batch = std::mem::take(&mut *self.entries.lock().await);
            if batch.is_empty() {
                return drained;
            }

            let mut joins = Vec::with_capacity(batch.len());
            for (id, entry) in batch {
                // Finished workers dropped their receiver; nothing to kick.
                let _ = entry.kick.send(());
                joins.push((id, entry.peer, entry.handle));
            }

            for (id, peer, handle) in joins {
                join_worker(id, peer, handle).await;
                drained += 1;
            }
        }
    }
}

async fn join_worker(id: WorkerId, peer: SocketAddr, handle: JoinHandle<()>) {
    match handle.await {
        Ok(()) => debug!(worker = id, %peer, "joined connection worker"),
        Err(err) => warn!(worker = id, %peer, error = ?err, "connection worker panicked"),
    }
}
