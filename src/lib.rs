#![forbid(unsafe_code)]
#![deny(missing_docs)]
//! nonce-reuse-scanner: a resumable chain scanner that flags ECDSA nonce reuse.
//!
//! Two signatures made with the same key and the same nonce leak the private
//! key. This crate walks confirmed blocks, pulls the `r` value and public key
//! out of every P2PKH and P2WPKH spend, and records each (nonce, input, key)
//! occurrence in a persistent store that reports when a key repeats a nonce.
//!
//! ## What you implement
//! - [`ChainSource`]: block hashes by height, block data, and active-chain placement.
//! - [`TxIndex`]: previous-transaction lookup so spent outputs can be classified.
//!
//! ## What the crate does
//! - [`NonceScanner`] walks from a start block to the tip, aborting on reorgs.
//! - [`RescanManager`] allows one rescan at a time and resumes where it stopped.
//! - [`distributor::run_parallel`] splits a height range across concurrent workers.
//! - [`SqliteStore`] keeps nonce records and scan progress on disk.
//!
//! ## Minimal usage
//! ```rust,ignore
//! use nonce_reuse_scanner::prelude::*;
//! use std::sync::Arc;
//!
//! async fn run(chain: Arc<impl ChainSource + 'static>, index: Arc<dyn TxIndex>) -> anyhow::Result<()> {
//!     let store = Arc::new(SqliteStore::new("nonces.sqlite")?);
//!     let scanner = NonceScanner::new(chain, store.clone()).with_tx_index(index);
//!     let manager = RescanManager::new(scanner);
//!     if let Some(outcome) = manager.resume().await? {
//!         println!("scanned to {:?}, {} new reuses", outcome.last_scanned, outcome.reuse_found);
//!     }
//!     for finding in store.reused_nonces().await? {
//!         println!("{} reused by {}", finding.nonce, finding.public_key);
//!     }
//!     Ok(())
//! }
//! ```
/// Ledger traits: block walking and previous-transaction lookup.
pub mod chain;

/// Scan settings.
pub mod config;

/// Positional DER signature parser.
pub mod der;

/// Batch distribution across concurrent scanners.
pub mod distributor;

/// Error types.
pub mod error;

/// Script classification and signature stream extraction.
pub mod extract;

/// Nonce records and their encoding.
pub mod record;

/// Single-flight rescan reservation.
pub mod rescan;

/// Scan controller.
pub mod scanner;

/// Persistence layer (trait and SQLite implementation).
pub mod store;

// Public re-exports
pub use chain::{BlockLocation, BlockRef, ChainSource, Successor, TxIndex};
pub use config::ScanConfig;
pub use error::{ExtractError, ScanError};
pub use record::{NonceRecord, SignatureWitness};
pub use rescan::{AbortHandle, RescanManager, RescanReservation};
pub use scanner::{AbortReason, Interruption, NonceScanner, ScanOutcome, ScanStatus};
#[cfg(feature = "store-sqlite")]
pub use store::sqlite_store::SqliteStore;
pub use store::{NonceStore, ReuseFinding, StoreError};

/// Convenience prelude for end users.
pub mod prelude {
    #[cfg(feature = "store-sqlite")]
    pub use crate::SqliteStore;
    pub use crate::{
        AbortHandle, BlockRef, ChainSource, NonceScanner, NonceStore, RescanManager, ScanConfig,
        ScanStatus, TxIndex,
    };
}
