//! Blocking FIFO lease queue over child handles.
//!
//! A handle (identified by its pool-local id) is either idle on the queue or
//! leased to exactly one caller, never both — except after `remove`, when it
//! leaves the queue permanently. `lease_any` waiters are served strictly in
//! arrival order; `lease_specific` waiters are keyed to one handle and take
//! priority for it when it idles, so they cannot starve behind the any-queue.
//!
//! Cancellation is dropping the lease future. Handoffs travel through a
//! drop-safe envelope that re-releases the id if the waiter vanished between
//! send and receive, so a cancelled lease never consumes a handle.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::PoolError;

struct Inner {
    idle: VecDeque<usize>,
    any_waiters: VecDeque<oneshot::Sender<Handoff>>,
    specific_waiters: HashMap<usize, VecDeque<oneshot::Sender<Handoff>>>,
    /// Ids still owned by the queue (idle or leased).
    members: HashSet<usize>,
    leased: HashSet<usize>,
    closed: bool,
}

/// Envelope for a granted id. If dropped before the waiter claims it (the
/// waiter's future was cancelled mid-handoff), the id flows back to the
/// queue.
struct Handoff {
    id: usize,
    queue: Option<Arc<LeaseQueue>>,
}

impl Handoff {
    fn claim(mut self) -> usize {
        self.queue = None;
        self.id
    }

    fn defuse(&mut self) {
        self.queue = None;
    }
}

impl Drop for Handoff {
    fn drop(&mut self) {
        if let Some(queue) = self.queue.take() {
            debug!(id = self.id, "lease handoff abandoned; returning handle");
            queue.release(self.id);
        }
    }
}

/// Internally synchronized FIFO queue of child handles.
pub struct LeaseQueue {
    inner: Mutex<Inner>,
}

impl LeaseQueue {
    /// Build a queue owning `ids`, all idle, in the given order.
    pub fn new(ids: impl IntoIterator<Item = usize>) -> Arc<Self> {
        let idle: VecDeque<usize> = ids.into_iter().collect();
        let members = idle.iter().copied().collect();
        Arc::new(Self {
            inner: Mutex::new(Inner {
                idle,
                any_waiters: VecDeque::new(),
                specific_waiters: HashMap::new(),
                members,
                leased: HashSet::new(),
                closed: false,
            }),
        })
    }

    /// Lease the handle at the head of the queue, blocking until one idles.
    /// Callers are served in arrival order.
    pub async fn lease_any(self: &Arc<Self>) -> Result<usize, PoolError> {
        let rx = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return Err(PoolError::ShuttingDown);
            }
            if let Some(id) = inner.idle.pop_front() {
                inner.leased.insert(id);
                return Ok(id);
            }
            let (tx, rx) = oneshot::channel();
            inner.any_waiters.push_back(tx);
            rx
        };

        match rx.await {
            Ok(handoff) => Ok(handoff.claim()),
            Err(_) => Err(PoolError::ShuttingDown),
        }
    }

    /// Lease one specific handle, blocking until it idles. Fails immediately
    /// with `NotFound` when the id was never a member or has been removed.
    pub async fn lease_specific(self: &Arc<Self>, id: usize) -> Result<usize, PoolError> {
        let rx = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return Err(PoolError::ShuttingDown);
            }
            if !inner.members.contains(&id) {
                return Err(PoolError::NotFound(format!("instance {id}")));
            }
            if let Some(pos) = inner.idle.iter().position(|&i| i == id) {
                inner.idle.remove(pos);
                inner.leased.insert(id);
                return Ok(id);
            }
            let (tx, rx) = oneshot::channel();
            inner.specific_waiters.entry(id).or_default().push_back(tx);
            rx
        };

        match rx.await {
            Ok(handoff) => Ok(handoff.claim()),
            Err(_) => {
                // Distinguish shutdown from removal of the handle.
                if self.inner.lock().closed {
                    Err(PoolError::ShuttingDown)
                } else {
                    Err(PoolError::NotFound(format!("instance {id}")))
                }
            }
        }
    }

    /// Return a leased handle. The first matching waiter (specific first,
    /// then the oldest any-waiter) receives it; otherwise it goes to the
    /// tail. A no-op when the handle was removed while leased.
    pub fn release(self: &Arc<Self>, id: usize) {
        let mut inner = self.inner.lock();
        if !inner.members.contains(&id) {
            debug!(id, "released handle no longer a member; dropping");
            return;
        }
        inner.leased.remove(&id);
        self.offer_locked(&mut inner, id);
    }

    fn offer_locked(self: &Arc<Self>, inner: &mut Inner, id: usize) {
        if inner.closed {
            return;
        }
        if let Some(mut waiters) = inner.specific_waiters.remove(&id) {
            let mut granted = false;
            while let Some(tx) = waiters.pop_front() {
                let handoff = Handoff {
                    id,
                    queue: Some(Arc::clone(self)),
                };
                match tx.send(handoff) {
                    Ok(()) => {
                        granted = true;
                        break;
                    }
                    Err(mut abandoned) => {
                        // Never run the re-release path while holding the lock.
                        abandoned.defuse();
                    }
                }
            }
            if !waiters.is_empty() {
                inner.specific_waiters.insert(id, waiters);
            }
            if granted {
                inner.leased.insert(id);
                return;
            }
        }
        while let Some(tx) = inner.any_waiters.pop_front() {
            let handoff = Handoff {
                id,
                queue: Some(Arc::clone(self)),
            };
            match tx.send(handoff) {
                Ok(()) => {
                    inner.leased.insert(id);
                    return;
                }
                Err(mut abandoned) => {
                    abandoned.defuse();
                }
            }
        }
        inner.idle.push_back(id);
    }

    /// Remove a handle permanently (failed child). Extracts it if idle;
    /// when currently leased, the release path will drop it instead of
    /// re-queueing. Pending specific waiters for it observe `NotFound`.
    pub fn remove(self: &Arc<Self>, id: usize) {
        let mut inner = self.inner.lock();
        inner.members.remove(&id);
        inner.leased.remove(&id);
        if let Some(pos) = inner.idle.iter().position(|&i| i == id) {
            inner.idle.remove(pos);
        }
        // Dropping the senders wakes the waiters with an error.
        inner.specific_waiters.remove(&id);
    }

    /// Close the queue: every present and future lease attempt observes
    /// `ShuttingDown`.
    pub fn close(self: &Arc<Self>) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        inner.idle.clear();
        inner.any_waiters.clear();
        inner.specific_waiters.clear();
    }

    /// Number of idle handles.
    pub fn idle_len(&self) -> usize {
        self.inner.lock().idle.len()
    }

    /// Whether the id is still owned by the queue (idle or leased).
    pub fn is_member(&self, id: usize) -> bool {
        self.inner.lock().members.contains(&id)
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
