//! Persistence for nonce records and scan progress.
use async_trait::async_trait;

use crate::record::{NonceRecord, SignatureWitness};

/// Persistence failures. All of them end the current scan.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// SQLite error.
    #[cfg(feature = "store-sqlite")]
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A stored record could not be parsed.
    #[error("malformed record for nonce {nonce}: {reason}")]
    Malformed {
        /// Key of the offending record.
        nonce: String,
        /// What failed to parse.
        reason: String,
    },

    /// A stored record carries a version tag this build does not understand.
    #[error("record for nonce {nonce} has unsupported version {version:?}")]
    UnsupportedVersion {
        /// Key of the offending record.
        nonce: String,
        /// The tag found.
        version: String,
    },

    /// The database was written by an incompatible schema.
    #[error("store schema version {found} is not supported (expected {expected})")]
    Schema {
        /// Version found on disk.
        found: String,
        /// Version this build writes.
        expected: u32,
    },

    /// The blocking worker running the query failed.
    #[error("store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// Any other backend failure.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A public key that signed twice with one nonce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReuseFinding {
    /// Hex `r` value.
    pub nonce: String,
    /// Hex public key.
    pub public_key: String,
    /// All occurrences of the pair, at least two.
    pub witnesses: Vec<SignatureWitness>,
}

/// Nonce → witnesses mapping plus a progress marker.
///
/// Implementations must make each [`NonceStore::record`] call atomic: the
/// lookup, the merge decision and the write of one nonce may not interleave
/// with another writer touching the same nonce.
#[async_trait]
pub trait NonceStore: Send + Sync {
    /// Merge `witness` into the record for `nonce`.
    /// Returns `true` if this write revealed nonce reuse under one public key.
    async fn record(&self, nonce: &str, witness: SignatureWitness) -> Result<bool, StoreError>;

    /// Current record for `nonce`.
    async fn load(&self, nonce: &str) -> Result<Option<NonceRecord>, StoreError>;

    /// Every (nonce, public key) pair seen in more than one input.
    async fn reused_nonces(&self) -> Result<Vec<ReuseFinding>, StoreError>;

    /// Last height a single-flight rescan fully processed.
    async fn last_scanned(&self) -> Result<Option<u32>, StoreError>;

    /// Update the last scanned height.
    async fn set_last_scanned(&self, height: u32) -> Result<(), StoreError>;
}

// submodules / concrete stores live here
#[cfg(feature = "store-sqlite")]
pub mod sqlite_store;
#[cfg(feature = "store-sqlite")]
pub use sqlite_store::SqliteStore;
