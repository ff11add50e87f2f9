//! Single-flight refresh coordination.
//!
//! The first request that sees an expired access token becomes the leader and
//! performs the refresh; every request that sees expiry while the refresh is in
//! flight is parked as a [`Pending`] continuation and released once the leader
//! reports the outcome. The state lives behind a `std::sync::Mutex` that is
//! never held across an `.await`, so the check-then-set on [`RefreshState`] is a
//! single critical section.

use super::{credential::Credential, error::SessionError};
use std::{
    fmt,
    sync::{Mutex, MutexGuard, PoisonError},
};
use tokio::sync::oneshot;
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshState {
    Idle,
    Refreshing,
}

/// A parked continuation, settled exactly once.
pub struct Pending<T, E> {
    tx: oneshot::Sender<Result<T, E>>,
}

impl<T, E> Pending<T, E> {
    #[must_use]
    pub fn channel() -> (Self, oneshot::Receiver<Result<T, E>>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    pub fn resolve(self, value: T) {
        self.settle(Ok(value));
    }

    pub fn reject(self, error: E) {
        self.settle(Err(error));
    }

    /// A receiver that went away (its request was cancelled) is ignored.
    pub fn settle(self, outcome: Result<T, E>) {
        let _ = self.tx.send(outcome);
    }
}

impl<T, E> fmt::Debug for Pending<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pending")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

/// FIFO of parked continuations. Draining empties it.
pub struct PendingQueue<T, E> {
    entries: Vec<Pending<T, E>>,
}

impl<T, E> Default for PendingQueue<T, E> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T: Clone, E: Clone> PendingQueue<T, E> {
    pub fn push(&mut self, pending: Pending<T, E>) {
        self.entries.push(pending);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Settles every entry with `outcome`, in arrival order. Returns how many
    /// entries were released.
    pub fn drain(&mut self, outcome: &Result<T, E>) -> usize {
        let released = self.entries.len();
        for pending in self.entries.drain(..) {
            pending.settle(outcome.clone());
        }
        released
    }
}

impl<T, E> fmt::Debug for PendingQueue<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingQueue")
            .field("len", &self.entries.len())
            .finish()
    }
}

pub type RefreshOutcome = Result<Credential, SessionError>;
pub type RefreshWaiter = oneshot::Receiver<RefreshOutcome>;

#[derive(Debug)]
struct Inner {
    state: RefreshState,
    queue: PendingQueue<Credential, SessionError>,
}

#[derive(Debug)]
pub struct RefreshCoordinator {
    inner: Mutex<Inner>,
}

/// What a request that saw credential expiry should do next.
#[derive(Debug)]
pub enum Ticket<'a> {
    /// Perform the refresh and report through the lease.
    Lead(RefreshLease<'a>),
    /// Wait for the leader's outcome.
    Wait(RefreshWaiter),
}

impl Default for RefreshCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl RefreshCoordinator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: RefreshState::Idle,
                queue: PendingQueue::default(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn state(&self) -> RefreshState {
        self.lock().state
    }

    /// Number of requests parked behind the in-flight refresh.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.lock().queue.len()
    }

    /// Either takes the leader role (Idle -> Refreshing) or parks the caller.
    pub fn enter(&self) -> Ticket<'_> {
        let mut inner = self.lock();
        match inner.state {
            RefreshState::Idle => {
                inner.state = RefreshState::Refreshing;
                debug!("refresh started");
                Ticket::Lead(RefreshLease {
                    coordinator: self,
                    settled: false,
                })
            }
            RefreshState::Refreshing => {
                let (pending, waiter) = Pending::channel();
                inner.queue.push(pending);
                debug!(queued = inner.queue.len(), "request parked behind refresh");
                Ticket::Wait(waiter)
            }
        }
    }

    fn finish(&self, outcome: &RefreshOutcome) -> usize {
        let mut inner = self.lock();
        inner.state = RefreshState::Idle;
        inner.queue.drain(outcome)
    }

    /// Rejects every parked request with `SessionError::Closed`. An in-flight
    /// refresh still completes and returns the coordinator to Idle.
    pub fn teardown(&self) -> usize {
        let rejected = self.lock().queue.drain(&Err(SessionError::Closed));
        if rejected > 0 {
            debug!(rejected, "parked requests rejected on teardown");
        }
        rejected
    }
}

/// Held by the leader while it refreshes. Dropping it without calling
/// [`RefreshLease::complete`] (the leader's future was cancelled) releases the
/// waiters with `SessionError::Closed` and returns to Idle.
pub struct RefreshLease<'a> {
    coordinator: &'a RefreshCoordinator,
    settled: bool,
}

impl RefreshLease<'_> {
    /// Returns to Idle and releases every parked request with `outcome`.
    pub fn complete(mut self, outcome: &RefreshOutcome) -> usize {
        self.settled = true;
        self.coordinator.finish(outcome)
    }
}

impl Drop for RefreshLease<'_> {
    fn drop(&mut self) {
        if !self.settled {
            let released = self.coordinator.finish(&Err(SessionError::Closed));
            debug!(released, "refresh abandoned");
        }
    }
}

impl fmt::Debug for RefreshLease<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshLease")
            .field("settled", &self.settled)
            .finish()
    }
}
