//! Single-flight rescans: at most one scan runs at a time, guarded by a
//! reservation that releases itself when dropped.
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::{
    chain::{BlockRef, ChainSource},
    error::ScanError,
    scanner::{NonceScanner, ScanOutcome, ScanStatus},
    store::NonceStore,
};

/// Shared cancellation flag, checked by scanners between blocks.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    /// A fresh, un-aborted handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask every scanner holding this handle to stop before its next block.
    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether [`AbortHandle::abort`] has been called since the last reset.
    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Proof of exclusive ownership of the "rescan running" flag.
/// Dropping it releases the flag, whichever way the scan ended.
#[derive(Debug)]
pub struct RescanReservation {
    running: Arc<AtomicBool>,
}

impl Drop for RescanReservation {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Owns a scanner and allows one rescan through it at a time.
pub struct RescanManager<C, S> {
    scanner: NonceScanner<C, S>,
    running: Arc<AtomicBool>,
    abort: AbortHandle,
}

impl<C, S> RescanManager<C, S>
where
    C: ChainSource + 'static,
    S: NonceStore + 'static,
{
    /// Wrap `scanner`.
    pub fn new(scanner: NonceScanner<C, S>) -> Self {
        Self {
            scanner,
            running: Arc::new(AtomicBool::new(false)),
            abort: AbortHandle::new(),
        }
    }

    /// The wrapped scanner.
    pub fn scanner(&self) -> &NonceScanner<C, S> {
        &self.scanner
    }

    /// Take the rescan slot. `None` if another rescan holds it.
    pub fn try_reserve(&self) -> Option<RescanReservation> {
        if self.running.swap(true, Ordering::SeqCst) {
            return None;
        }
        self.abort.reset();
        Some(RescanReservation {
            running: self.running.clone(),
        })
    }

    /// Whether a reservation is outstanding.
    pub fn is_scanning(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Whether the running rescan was asked to stop.
    pub fn is_aborting(&self) -> bool {
        self.abort.is_aborted()
    }

    /// Ask the running rescan to stop before its next block.
    pub fn abort_rescan(&self) {
        self.abort.abort();
    }

    /// Scan from `start` to the tip under `reservation`.
    ///
    /// The stored progress marker only moves forward, and only when the scan
    /// began at or before the height [`RescanManager::resume`] would pick, so
    /// a rescan of old history never rewinds it and a rescan past it never
    /// leaves an unscanned gap behind it.
    ///
    /// # Errors
    /// [`ScanError::ForeignReservation`] if `reservation` was taken from
    /// another manager; otherwise as [`NonceScanner::scan`].
    pub async fn rescan(
        &self,
        reservation: &RescanReservation,
        start: BlockRef,
    ) -> Result<ScanOutcome, ScanError> {
        if !Arc::ptr_eq(&reservation.running, &self.running) {
            return Err(ScanError::ForeignReservation);
        }

        let outcome = self.scanner.scan(start, None, &self.abort).await?;
        let Some(height) = outcome.last_scanned else {
            return Ok(outcome);
        };

        let store = self.scanner.store();
        let stored = store.last_scanned().await?;
        let contiguous = start.height <= self.scanner.config().resume_height(stored);
        if contiguous && stored.map_or(true, |last| height > last) {
            store.set_last_scanned(height).await?;
        } else {
            tracing::debug!(start = start.height, height, ?stored, "Nonce rescan progress not persisted");
        }
        Ok(outcome)
    }

    /// Reserve, then rescan from where the last rescan left off.
    /// `Ok(None)` if another rescan is already running.
    ///
    /// # Errors
    /// [`ScanError::EmptyChain`] if the ledger has no blocks; otherwise as
    /// [`NonceScanner::scan`].
    pub async fn resume(&self) -> Result<Option<ScanOutcome>, ScanError> {
        let Some(reservation) = self.try_reserve() else {
            tracing::info!("Nonce rescan already running");
            return Ok(None);
        };

        let chain = self.scanner.chain();
        let tip = chain
            .active_height()
            .await
            .map_err(ScanError::Ledger)?
            .ok_or(ScanError::EmptyChain)?;

        let last = self.scanner.store().last_scanned().await?;
        let height = self.scanner.config().resume_height(last);
        if height > tip {
            tracing::info!(height, tip, "Nonce rescan already at tip");
            return Ok(Some(ScanOutcome {
                status: ScanStatus::Completed,
                last_scanned: last,
                blocks_scanned: 0,
                inputs_recorded: 0,
                reuse_found: 0,
            }));
        }

        let hash = chain.block_hash(height).await.map_err(ScanError::Ledger)?;
        self.rescan(&reservation, BlockRef::new(hash, height))
            .await
            .map(Some)
    }
}
