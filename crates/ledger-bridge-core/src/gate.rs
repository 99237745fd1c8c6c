// crates/ledger-bridge-core/src/gate.rs
// ============================================================================
// Module: Concurrency Gate
// Description: Process-wide FIFO admission gate for engine calls.
// Purpose: Serialize access to the single-instance engine across sessions.
// Dependencies: tokio
// ============================================================================

//! ## Overview
//! The external engine keeps process-wide state, so calls from different
//! sessions must not overlap beyond a configured limit (normally one). The
//! [`ConcurrencyGate`] wraps a fair [`tokio::sync::Semaphore`] and hands each
//! caller a [`GatePermit`] that releases its slot when dropped.
//!
//! ## Invariants
//! - In-flight permits never exceed the limit once permits held from before a
//!   limit reduction have been returned.
//! - Waiters are admitted in FIFO order.
//! - A slot is released on every exit path, including cancellation of a
//!   waiting caller and panics inside the guarded work.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use serde::Serialize;
use tokio::sync::OwnedSemaphorePermit;
use tokio::sync::Semaphore;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Point-in-time view of gate occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GateSnapshot {
    /// Maximum concurrent permits.
    pub limit: usize,
    /// Permits currently held.
    pub in_flight: usize,
    /// Callers waiting for a permit.
    pub waiters: usize,
}

/// Shared gate internals.
struct GateInner {
    /// Fair semaphore holding one permit per free slot.
    semaphore: Arc<Semaphore>,
    /// Configured permit limit.
    limit: AtomicUsize,
    /// Held permits to retire on release after the limit was lowered.
    retiring: AtomicUsize,
    /// Callers currently waiting in [`ConcurrencyGate::acquire`].
    waiters: AtomicUsize,
}

impl GateInner {
    /// Claims one pending retirement, if any.
    fn take_retirement(&self) -> bool {
        self.retiring
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |owed| owed.checked_sub(1))
            .is_ok()
    }
}

/// FIFO counting gate shared by every connection in a pool.
#[derive(Clone)]
pub struct ConcurrencyGate {
    /// Shared internals.
    inner: Arc<GateInner>,
}

/// Held gate slot; releases on drop.
#[must_use = "dropping the permit releases the gate slot immediately"]
pub struct GatePermit {
    /// Gate the slot belongs to.
    inner: Arc<GateInner>,
    /// Underlying semaphore permit.
    permit: Option<OwnedSemaphorePermit>,
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        if let Some(permit) = self.permit.take()
            && self.inner.take_retirement()
        {
            permit.forget();
        }
    }
}

/// Counts a caller as waiting until dropped.
struct WaitingGuard<'a> {
    /// Waiter counter.
    waiters: &'a AtomicUsize,
}

impl<'a> WaitingGuard<'a> {
    /// Registers a waiter.
    fn enter(waiters: &'a AtomicUsize) -> Self {
        waiters.fetch_add(1, Ordering::AcqRel);
        Self {
            waiters,
        }
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.waiters.fetch_sub(1, Ordering::AcqRel);
    }
}

// ============================================================================
// SECTION: Gate
// ============================================================================

impl ConcurrencyGate {
    /// Creates a gate admitting `limit` concurrent permits (minimum one).
    #[must_use]
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            inner: Arc::new(GateInner {
                semaphore: Arc::new(Semaphore::new(limit)),
                limit: AtomicUsize::new(limit),
                retiring: AtomicUsize::new(0),
                waiters: AtomicUsize::new(0),
            }),
        }
    }

    /// Waits for a permit in FIFO order.
    pub async fn acquire(&self) -> GatePermit {
        if let Some(permit) = self.try_acquire() {
            return permit;
        }
        let _waiting = WaitingGuard::enter(&self.inner.waiters);
        // The semaphore is private to the gate and never closed.
        let permit = Arc::clone(&self.inner.semaphore).acquire_owned().await.ok();
        self.permit(permit)
    }

    /// Returns a permit when one is free and no caller is waiting.
    #[must_use]
    pub fn try_acquire(&self) -> Option<GatePermit> {
        let permit = Arc::clone(&self.inner.semaphore).try_acquire_owned().ok()?;
        Some(self.permit(Some(permit)))
    }

    /// Runs `work` while holding a permit.
    pub async fn run<F, T>(&self, work: F) -> T
    where
        F: Future<Output = T>,
    {
        let _permit = self.acquire().await;
        work.await
    }

    /// Changes the permit limit (minimum one) and admits waiters that fit.
    ///
    /// Lowering the limit below the permits in flight retires the excess as
    /// those permits are released.
    pub fn set_limit(&self, limit: usize) {
        let limit = limit.max(1);
        let previous = self.inner.limit.swap(limit, Ordering::AcqRel);
        if limit > previous {
            let mut grow = limit - previous;
            while grow > 0 && self.inner.take_retirement() {
                grow -= 1;
            }
            self.inner.semaphore.add_permits(grow);
        } else if previous > limit {
            let shrink = previous - limit;
            let forgotten = self.inner.semaphore.forget_permits(shrink);
            self.inner.retiring.fetch_add(shrink - forgotten, Ordering::AcqRel);
        }
    }

    /// Returns current gate occupancy.
    #[must_use]
    pub fn snapshot(&self) -> GateSnapshot {
        let limit = self.inner.limit.load(Ordering::Acquire);
        let retiring = self.inner.retiring.load(Ordering::Acquire);
        let available = self.inner.semaphore.available_permits();
        GateSnapshot {
            limit,
            in_flight: (limit + retiring).saturating_sub(available),
            waiters: self.inner.waiters.load(Ordering::Acquire),
        }
    }

    /// Wraps a semaphore permit in a gate permit.
    fn permit(&self, permit: Option<OwnedSemaphorePermit>) -> GatePermit {
        GatePermit {
            inner: Arc::clone(&self.inner),
            permit,
        }
    }
}

impl Default for ConcurrencyGate {
    fn default() -> Self {
        Self::new(1)
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
