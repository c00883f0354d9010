//! Cell frame clock and TTI ordering primitive
//!
//! Tracks the HFN/SFN/subframe tuple that every other PHY component reasons
//! about, and provides the semaphore that keeps transmit ordering strict
//! across the TX thread and the subframe worker.

use common::types::HfnSfn;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tracing::trace;

/// Shared, advancing cell clock. A single subframe worker owns the writer
/// side (`advance`); readers (scheduler, frame builder, stats reporting)
/// take a snapshot via `now`.
#[derive(Debug, Clone)]
pub struct CellClock {
    inner: Arc<Mutex<HfnSfn>>,
}

impl CellClock {
    /// Create a clock starting at HFN=0/SFN=0/subframe=0.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HfnSfn::default())),
        }
    }

    /// Create a clock starting at an arbitrary HFN/SFN/subframe, used by the
    /// TX/RX thread startup sequence (spec.md §4.I: `tti = 10240 - 5`,
    /// `HFN = 1023`, so the first *emitted* TX subframe lands exactly on
    /// `tti_tx_dl == 0`, `HFN == 0`).
    pub fn starting_at(initial: HfnSfn) -> Self {
        Self {
            inner: Arc::new(Mutex::new(initial)),
        }
    }

    /// Snapshot the current HFN/SFN/subframe tuple.
    pub async fn now(&self) -> HfnSfn {
        *self.inner.lock().await
    }

    /// Advance the clock by one subframe (1ms TTI) and return the new value.
    pub async fn advance(&self) -> HfnSfn {
        let mut guard = self.inner.lock().await;
        guard.advance();
        trace!("cell clock advanced to {:?}", *guard);
        *guard
    }
}

impl Default for CellClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Strict TTI ordering primitive.
///
/// The subframe worker must finish building subframe `n`'s resource map
/// before the TX thread is allowed to modulate and transmit it, and the TX
/// thread must finish transmitting subframe `n` before the worker starts
/// building `n + pipeline_depth`. A counting semaphore sized to the
/// pipeline depth enforces this without a full barrier on every subframe.
pub struct TtiSemaphore {
    build_permits: Semaphore,
    tx_permits: Semaphore,
}

impl TtiSemaphore {
    /// Create a new semaphore pair allowing `pipeline_depth` subframes of
    /// build-ahead before the TX thread must catch up.
    pub fn new(pipeline_depth: usize) -> Self {
        Self {
            build_permits: Semaphore::new(pipeline_depth),
            tx_permits: Semaphore::new(0),
        }
    }

    /// Called by the subframe worker before building a new subframe;
    /// blocks if the TX thread has fallen `pipeline_depth` subframes behind.
    pub async fn acquire_build(&self) -> tokio::sync::SemaphorePermit<'_> {
        self.build_permits.acquire().await.expect("semaphore not closed")
    }

    /// Called by the subframe worker after a subframe's resource map is
    /// complete, to release it to the TX thread.
    pub fn release_for_tx(&self) {
        self.tx_permits.add_permits(1);
    }

    /// Called by the TX thread to wait for the next ready subframe.
    pub async fn acquire_tx(&self) -> tokio::sync::SemaphorePermit<'_> {
        self.tx_permits.acquire().await.expect("semaphore not closed")
    }

    /// Called by the TX thread after transmitting, to free a build slot.
    pub fn release_build_slot(&self) {
        self.build_permits.add_permits(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_clock_advances() {
        let clock = CellClock::new();
        for _ in 0..10 {
            clock.advance().await;
        }
        let now = clock.now().await;
        assert_eq!(now.sfn, 1);
        assert_eq!(now.sf_idx, 0);
    }

    #[tokio::test]
    async fn test_tti_semaphore_pipeline() {
        let sem = Arc::new(TtiSemaphore::new(2));
        {
            let _p1 = sem.acquire_build().await;
            let _p2 = sem.acquire_build().await;
            // A third build permit should not be immediately available;
            // we don't block-test that here, just that release works.
            sem.release_for_tx();
        }
        let _tx = sem.acquire_tx().await;
        sem.release_build_slot();
    }
}
