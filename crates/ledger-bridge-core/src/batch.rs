// crates/ledger-bridge-core/src/batch.rs
// ============================================================================
// Module: Batch Coordinator
// Description: Nesting-aware grouping of mutations under one trailing sync.
// Purpose: Suppress per-mutation synchronization inside batches.
// Dependencies: std
// ============================================================================

//! ## Overview
//! Each mutation normally triggers a synchronization with the remote server.
//! Inside a batch those per-mutation syncs are suppressed and exactly one sync
//! runs when the outermost batch finishes, whether its body succeeded or not.
//! Nested batches only run their bodies; the enclosing batch owns the flush.
//!
//! ## Invariants
//! - The trailing sync runs once per outermost batch.
//! - Batch depth is restored on every exit path, including cancellation.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::future::Future;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

// ============================================================================
// SECTION: Coordinator
// ============================================================================

/// Tracks batch nesting for one connection.
#[derive(Debug, Default)]
pub struct BatchCoordinator {
    /// Current batch nesting depth.
    depth: AtomicUsize,
}

/// Restores batch depth when a batch scope ends.
struct DepthGuard<'a> {
    /// Depth counter being guarded.
    depth: &'a AtomicUsize,
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.depth.fetch_sub(1, Ordering::SeqCst);
    }
}

impl BatchCoordinator {
    /// Creates a coordinator with no active batch.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            depth: AtomicUsize::new(0),
        }
    }

    /// Returns true while any batch is running.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.depth.load(Ordering::SeqCst) > 0
    }

    /// Returns the current nesting depth.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    /// Runs `body` as a batch, then flushes once if this is the outermost batch.
    ///
    /// A body error wins over a sync error; the sync closure is responsible
    /// for reporting its own failure in that case.
    ///
    /// # Errors
    ///
    /// Returns the body's error, or the sync error when the body succeeded.
    pub async fn run_batch<T, E, B, S, SFut>(&self, body: B, synchronize: S) -> Result<T, E>
    where
        B: Future<Output = Result<T, E>>,
        S: FnOnce() -> SFut,
        SFut: Future<Output = Result<(), E>>,
    {
        let outermost = self.depth.fetch_add(1, Ordering::SeqCst) == 0;
        let outcome = {
            let _guard = DepthGuard {
                depth: &self.depth,
            };
            body.await
        };
        if !outermost {
            return outcome;
        }
        let flushed = synchronize().await;
        match (outcome, flushed) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(error)) | (Err(error), _) => Err(error),
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions.")]

    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use super::BatchCoordinator;

    #[tokio::test]
    async fn outermost_batch_flushes_once() {
        let batches = BatchCoordinator::new();
        let syncs = AtomicUsize::new(0);
        let result: Result<u32, String> = batches
            .run_batch(
                async {
                    assert!(batches.is_active());
                    let inner: Result<u32, String> = batches
                        .run_batch(async { Ok(2) }, || async {
                            syncs.fetch_add(1, Ordering::SeqCst);
                            Ok(())
                        })
                        .await;
                    assert_eq!(batches.depth(), 1);
                    Ok(inner.unwrap() + 1)
                },
                || async {
                    syncs.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                },
            )
            .await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(syncs.load(Ordering::SeqCst), 1);
        assert!(!batches.is_active());
    }

    #[tokio::test]
    async fn failed_body_still_flushes_and_reports_body_error() {
        let batches = BatchCoordinator::new();
        let syncs = AtomicUsize::new(0);
        let result: Result<(), String> = batches
            .run_batch(async { Err("step 2 failed".to_string()) }, || async {
                syncs.fetch_add(1, Ordering::SeqCst);
                Err("sync failed".to_string())
            })
            .await;
        assert_eq!(result, Err("step 2 failed".to_string()));
        assert_eq!(syncs.load(Ordering::SeqCst), 1);
        assert_eq!(batches.depth(), 0);
    }

    #[tokio::test]
    async fn sync_error_surfaces_when_body_succeeds() {
        let batches = BatchCoordinator::new();
        let result: Result<(), String> = batches
            .run_batch(async { Ok(()) }, || async { Err("offline".to_string()) })
            .await;
        assert_eq!(result, Err("offline".to_string()));
    }
}
