//! Batched scanning: a fixed height range is cut into batches handed out to
//! concurrent scanners that share one nonce store.
use std::{collections::BTreeMap, sync::Arc};

use parking_lot::Mutex;
use tokio::task::JoinSet;

use crate::{
    chain::{BlockRef, ChainSource, TxIndex},
    config::ScanConfig,
    error::ScanError,
    rescan::AbortHandle,
    scanner::{ledger_abort, NonceScanner, ScanOutcome, ScanStatus},
    store::NonceStore,
};

/// Identifies one worker to the distributor.
pub type ScannerId = usize;

/// Heights `start..end` assigned to one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeightBatch {
    /// First height of the batch.
    pub start: u32,
    /// One past the last height of the batch.
    pub end: u32,
}

impl HeightBatch {
    /// Last height in the batch. An empty batch reports its start.
    pub fn last(&self) -> u32 {
        self.end.saturating_sub(1).max(self.start)
    }
}

struct Cursor {
    next: u32,
    max_height: u32,
    batch_size: u32,
    /// Last batch start claimed by each worker still asking for work.
    active: BTreeMap<ScannerId, u32>,
}

/// Hands out disjoint batches of `[start_height, max_height)` and owns the
/// shared store handle.
pub struct BatchDistributor<S> {
    store: Arc<S>,
    cursor: Mutex<Cursor>,
}

impl<S> BatchDistributor<S> {
    /// Batches of `batch_size` heights from `start_height` up to, not including, `max_height`.
    pub fn new(store: Arc<S>, start_height: u32, max_height: u32, batch_size: u32) -> Self {
        Self {
            store,
            cursor: Mutex::new(Cursor {
                next: start_height,
                max_height,
                batch_size: batch_size.max(1),
                active: BTreeMap::new(),
            }),
        }
    }

    /// The shared store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Claim the next batch for `scanner`. `None` once the range is exhausted,
    /// at which point `scanner` is dropped from the roster.
    pub fn reserve_next(&self, scanner: ScannerId) -> Option<HeightBatch> {
        let mut cursor = self.cursor.lock();
        if cursor.next >= cursor.max_height {
            cursor.active.remove(&scanner);
            return None;
        }
        let start = cursor.next;
        let end = start.saturating_add(cursor.batch_size).min(cursor.max_height);
        cursor.next = end;
        cursor.active.insert(scanner, start);
        Some(HeightBatch { start, end })
    }

    /// Workers still holding a batch, with the start of their last claim.
    pub fn active_claims(&self) -> Vec<(ScannerId, u32)> {
        self.cursor
            .lock()
            .active
            .iter()
            .map(|(id, h)| (*id, *h))
            .collect()
    }
}

impl<S> Drop for BatchDistributor<S> {
    fn drop(&mut self) {
        for (scanner, height) in self.cursor.get_mut().active.iter() {
            tracing::info!(scanner, height, "Scanner stopped with an unfinished batch");
        }
    }
}

/// Result of [`run_parallel`].
#[derive(Debug, Default)]
pub struct ParallelSummary {
    /// Batches that ran to their last height.
    pub completed: Vec<HeightBatch>,
    /// Batches that stopped early, with the scan outcome.
    pub stopped: Vec<(HeightBatch, ScanOutcome)>,
    /// Writes that revealed reuse, across all workers.
    pub reuse_found: u64,
}

/// Scan every batch of `distributor` with `config.workers` concurrent tasks.
///
/// A batch that aborts on a chain or ledger problem is reported in
/// [`ParallelSummary::stopped`] and its worker moves on; an interrupted batch
/// stops its worker.
///
/// # Errors
/// The first fatal error from any worker. It trips `abort`, so the remaining
/// workers stop before their next block.
pub async fn run_parallel<C, S>(
    chain: Arc<C>,
    tx_index: Arc<dyn TxIndex>,
    distributor: Arc<BatchDistributor<S>>,
    config: ScanConfig,
    abort: AbortHandle,
) -> Result<ParallelSummary, ScanError>
where
    C: ChainSource + 'static,
    S: NonceStore + 'static,
{
    let scanner = NonceScanner::new(chain, distributor.store().clone())
        .with_tx_index(tx_index)
        .with_config(config.clone());

    let mut workers = JoinSet::new();
    for id in 0..config.workers.max(1) {
        let scanner = scanner.clone();
        let distributor = distributor.clone();
        let abort = abort.clone();
        workers.spawn(async move { run_worker(id, scanner, distributor, abort).await });
    }

    let mut summary = ParallelSummary::default();
    let mut first_err = None;
    while let Some(joined) = workers.join_next().await {
        match joined.map_err(ScanError::from).and_then(|result| result) {
            Ok(part) => {
                summary.completed.extend(part.completed);
                summary.stopped.extend(part.stopped);
                summary.reuse_found += part.reuse_found;
            }
            Err(err) => {
                // drain the rest to a clean stop, report the first failure
                abort.abort();
                first_err.get_or_insert(err);
            }
        }
    }
    match first_err {
        Some(err) => Err(err),
        None => Ok(summary),
    }
}

async fn run_worker<C, S>(
    id: ScannerId,
    scanner: NonceScanner<C, S>,
    distributor: Arc<BatchDistributor<S>>,
    abort: AbortHandle,
) -> Result<ParallelSummary, ScanError>
where
    C: ChainSource + 'static,
    S: NonceStore + 'static,
{
    let result = scan_batches(id, &scanner, &distributor, &abort).await;
    if let Err(err) = &result {
        tracing::warn!(scanner = id, "Batch scanner failed: {err}");
        abort.abort();
    }
    result
}

async fn scan_batches<C, S>(
    id: ScannerId,
    scanner: &NonceScanner<C, S>,
    distributor: &BatchDistributor<S>,
    abort: &AbortHandle,
) -> Result<ParallelSummary, ScanError>
where
    C: ChainSource + 'static,
    S: NonceStore + 'static,
{
    let mut summary = ParallelSummary::default();

    while let Some(batch) = distributor.reserve_next(id) {
        let outcome = match scanner.chain().block_hash(batch.start).await {
            Ok(hash) => {
                scanner
                    .scan(BlockRef::new(hash, batch.start), Some(batch.last()), abort)
                    .await?
            }
            Err(err) => ScanOutcome {
                status: ledger_abort(err),
                last_scanned: batch.start.checked_sub(1),
                blocks_scanned: 0,
                inputs_recorded: 0,
                reuse_found: 0,
            },
        };
        summary.reuse_found += outcome.reuse_found;

        match outcome.status {
            ScanStatus::Completed if outcome.last_scanned == Some(batch.last()) => {
                summary.completed.push(batch);
            }
            ScanStatus::Interrupted(_) => {
                summary.stopped.push((batch, outcome));
                break;
            }
            _ => {
                tracing::warn!(scanner = id, start = batch.start, end = batch.end, status = ?outcome.status, "Batch stopped early");
                summary.stopped.push((batch, outcome));
            }
        }
    }
    Ok(summary)
}
