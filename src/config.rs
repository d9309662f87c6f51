//! Scan tuning knobs.

/// Blocks between progress log lines.
pub const DEFAULT_PROGRESS_INTERVAL: u32 = 1_000;

/// Heights per batch handed to a parallel worker.
pub const DEFAULT_BATCH_SIZE: u32 = 1_000;

/// Parallel workers.
pub const DEFAULT_WORKERS: usize = 4;

/// Settings shared by single-flight and batched scans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanConfig {
    /// Log a progress line whenever the scanned height is a multiple of this.
    pub progress_interval: u32,
    /// Heights per [`crate::distributor::HeightBatch`].
    pub batch_size: u32,
    /// Concurrent workers for [`crate::distributor::run_parallel`].
    pub workers: usize,
    /// Lowest height worth scanning; resumption never starts below it.
    pub min_height: u32,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            batch_size: DEFAULT_BATCH_SIZE,
            workers: DEFAULT_WORKERS,
            min_height: 0,
        }
    }
}

impl ScanConfig {
    /// Set the progress log cadence (0 is treated as 1).
    pub fn with_progress_interval(mut self, blocks: u32) -> Self {
        self.progress_interval = blocks.max(1);
        self
    }

    /// Set the batch size (0 is treated as 1).
    pub fn with_batch_size(mut self, heights: u32) -> Self {
        self.batch_size = heights.max(1);
        self
    }

    /// Set the number of parallel workers (0 is treated as 1).
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Set the lowest height to scan.
    pub fn with_min_height(mut self, height: u32) -> Self {
        self.min_height = height;
        self
    }

    /// Where a resumed scan should begin, given the last fully scanned height.
    pub fn resume_height(&self, last_scanned: Option<u32>) -> u32 {
        last_scanned
            .map(|h| h.saturating_add(1))
            .unwrap_or(0)
            .max(self.min_height)
    }
}
