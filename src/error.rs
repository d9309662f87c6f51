//! Error types for extraction and scanning.
use bitcoin::OutPoint;

use crate::store::StoreError;

/// Failure to resolve the output an input spends.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    /// The transaction index has no such transaction, or it has no such output.
    #[error("previous transaction not found for {outpoint}")]
    PreviousTxNotFound {
        /// The outpoint that could not be resolved.
        outpoint: OutPoint,
    },

    /// The transaction index itself failed.
    #[error("transaction index lookup failed for {outpoint}: {source}")]
    Index {
        /// The outpoint being resolved.
        outpoint: OutPoint,
        /// Underlying ledger error.
        source: anyhow::Error,
    },
}

/// Errors that end a scan without a resumable outcome.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    /// The ledger reported no active tip.
    #[error("active chain has no blocks")]
    EmptyChain,

    /// Signature extraction needs a transaction index and none was configured.
    #[error("transaction index is required for nonce scanning")]
    MissingTxIndex,

    /// Persistence failed; findings from the current block may be incomplete.
    #[error("nonce store: {0}")]
    Store(#[from] StoreError),

    /// A rescan was started with a reservation from another manager.
    #[error("rescan reservation belongs to another manager")]
    ForeignReservation,

    /// Ledger query failed before a scan could start.
    #[error("ledger: {0:#}")]
    Ledger(anyhow::Error),

    /// A scan worker task panicked or was cancelled.
    #[error("scan worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}
