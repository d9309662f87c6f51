//! Walks the active chain from a starting block and feeds every P2PKH / P2WPKH
//! spend into the nonce store:
//! 1) read block data, then separately ask whether it is still active,
//! 2) resolve each input's previous output and extract `r` + public key,
//! 3) merge the witness into the store, counting newly revealed reuse.
use std::sync::Arc;

use bitcoin::{Block, BlockHash, OutPoint};

use crate::{
    chain::{BlockRef, ChainSource, TxIndex},
    config::ScanConfig,
    der::{self, ParseOutcome},
    error::{ExtractError, ScanError},
    extract::{extract, resolve_prevout_script},
    record::SignatureWitness,
    rescan::AbortHandle,
    store::NonceStore,
};

/// Why a scan stopped before reaching the tip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    /// The block left the active chain while it was being read.
    Reorganized {
        /// The block that is no longer active.
        hash: BlockHash,
    },
    /// Block data could not be read.
    BlockUnreadable {
        /// The unreadable block.
        hash: BlockHash,
    },
    /// An input's previous output could not be resolved.
    PreviousTxNotFound {
        /// The unresolved outpoint.
        outpoint: OutPoint,
    },
    /// A ledger query failed.
    Ledger {
        /// Rendered error chain.
        message: String,
    },
}

/// Why a scan was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interruption {
    /// [`AbortHandle::abort`] was called.
    AbortRequested,
    /// The ledger reported a shutdown.
    Shutdown,
}

/// Terminal state of a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanStatus {
    /// Reached the tip, or the requested stop height.
    Completed,
    /// Stopped on a chain or ledger problem; resumable.
    Aborted(AbortReason),
    /// Cancelled between blocks; resumable.
    Interrupted(Interruption),
}

/// Summary of a finished scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOutcome {
    /// How the scan ended.
    pub status: ScanStatus,
    /// Last height fully processed. Resume from `last_scanned + 1`.
    pub last_scanned: Option<u32>,
    /// Blocks fully processed.
    pub blocks_scanned: u64,
    /// Witnesses handed to the store.
    pub inputs_recorded: u64,
    /// Writes that revealed reuse.
    pub reuse_found: u64,
}

impl ScanOutcome {
    /// Whether the scan ran to its end.
    pub fn is_complete(&self) -> bool {
        self.status == ScanStatus::Completed
    }
}

#[derive(Default)]
struct Tally {
    blocks_scanned: u64,
    inputs_recorded: u64,
    reuse_found: u64,
}

/// Scan controller. `C` = ledger, `S` = nonce store.
pub struct NonceScanner<C, S> {
    chain: Arc<C>,
    store: Arc<S>,
    tx_index: Option<Arc<dyn TxIndex>>,
    config: ScanConfig,
}

impl<C, S> Clone for NonceScanner<C, S> {
    fn clone(&self) -> Self {
        Self {
            chain: self.chain.clone(),
            store: self.store.clone(),
            tx_index: self.tx_index.clone(),
            config: self.config.clone(),
        }
    }
}

impl<C, S> NonceScanner<C, S>
where
    C: ChainSource + 'static,
    S: NonceStore + 'static,
{
    /// Create a scanner over `chain` writing into `store`.
    pub fn new(chain: Arc<C>, store: Arc<S>) -> Self {
        Self {
            chain,
            store,
            tx_index: None,
            config: ScanConfig::default(),
        }
    }

    /// Provide the transaction index used to resolve previous outputs. Required.
    pub fn with_tx_index(mut self, index: Arc<dyn TxIndex>) -> Self {
        self.tx_index = Some(index);
        self
    }

    /// Override the default [`ScanConfig`].
    pub fn with_config(mut self, config: ScanConfig) -> Self {
        self.config = config;
        self
    }

    /// The ledger.
    pub fn chain(&self) -> &Arc<C> {
        &self.chain
    }

    /// The nonce store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Active settings.
    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Scan from `start` towards the tip, stopping after `stop_at` if given.
    ///
    /// Cancellation is checked before each block, so a block is either fully
    /// recorded or not counted in `last_scanned`.
    ///
    /// # Errors
    /// Store failures, malformed stored records, and a missing transaction
    /// index are returned as errors. Chain and ledger problems end the scan
    /// with [`ScanStatus::Aborted`] instead.
    pub async fn scan(
        &self,
        start: BlockRef,
        stop_at: Option<u32>,
        abort: &AbortHandle,
    ) -> Result<ScanOutcome, ScanError> {
        let index = self.tx_index.as_deref().ok_or(ScanError::MissingTxIndex)?;

        let mut hash = start.hash;
        let mut height = start.height;
        let mut tally = Tally::default();

        tracing::info!(height, ?stop_at, "Starting nonce scan");

        let status = loop {
            if abort.is_aborted() {
                break ScanStatus::Interrupted(Interruption::AbortRequested);
            }
            if self.chain.shutdown_requested() {
                break ScanStatus::Interrupted(Interruption::Shutdown);
            }

            // Reading is slow; check placement separately in case of a reorg meanwhile.
            let block = match self.chain.read_block(hash).await {
                Ok(block) => block,
                Err(err) => break ledger_abort(err),
            };
            let location = match self.chain.locate_block(hash).await {
                Ok(location) => location,
                Err(err) => break ledger_abort(err),
            };

            let Some(block) = block else {
                tracing::warn!(%hash, height, "Nonce scan aborted: block unreadable");
                break ScanStatus::Aborted(AbortReason::BlockUnreadable { hash });
            };
            if !location.in_active_chain {
                tracing::warn!(%hash, height, "Nonce scan aborted: block no longer active");
                break ScanStatus::Aborted(AbortReason::Reorganized { hash });
            }

            if let Some(reason) = self.scan_block(index, &block, height, &mut tally).await? {
                break ScanStatus::Aborted(reason);
            }
            tally.blocks_scanned += 1;

            if height % self.config.progress_interval.max(1) == 0 {
                tracing::info!(height, reuse_found = tally.reuse_found, "Nonce scan progress");
            }

            if stop_at.is_some_and(|stop| height >= stop) {
                break ScanStatus::Completed;
            }
            let Some(next) = location.active_successor() else {
                break ScanStatus::Completed;
            };
            hash = next;
            height += 1;
        };

        let last_scanned = match status {
            ScanStatus::Completed => Some(height),
            _ => height.checked_sub(1),
        };

        match &status {
            ScanStatus::Completed => tracing::info!(
                ?last_scanned,
                blocks = tally.blocks_scanned,
                reuse_found = tally.reuse_found,
                "Nonce scan completed"
            ),
            other => tracing::info!(
                %hash,
                height,
                ?last_scanned,
                status = ?other,
                "Nonce scan stopped early"
            ),
        }

        Ok(ScanOutcome {
            status,
            last_scanned,
            blocks_scanned: tally.blocks_scanned,
            inputs_recorded: tally.inputs_recorded,
            reuse_found: tally.reuse_found,
        })
    }

    /// Record every candidate input of `block`. `Some(reason)` aborts the scan.
    async fn scan_block(
        &self,
        index: &dyn TxIndex,
        block: &Block,
        height: u32,
        tally: &mut Tally,
    ) -> Result<Option<AbortReason>, ScanError> {
        for tx in block.txdata.iter().filter(|tx| !tx.is_coinbase()) {
            let txid = tx.compute_txid();

            for (input_index, input) in tx.input.iter().enumerate() {
                let prev_script = match resolve_prevout_script(index, input.previous_output).await {
                    Ok(script) => script,
                    Err(ExtractError::PreviousTxNotFound { outpoint }) => {
                        tracing::warn!(%outpoint, %txid, height, "Nonce scan aborted: previous transaction not found");
                        return Ok(Some(AbortReason::PreviousTxNotFound { outpoint }));
                    }
                    Err(err @ ExtractError::Index { .. }) => {
                        tracing::warn!(%txid, height, "Nonce scan aborted: {err}");
                        return Ok(Some(AbortReason::Ledger {
                            message: err.to_string(),
                        }));
                    }
                };

                let Some(raw) = extract(&prev_script, input) else {
                    continue;
                };
                let parsed = match der::parse(&raw.bytes, raw.is_segwit) {
                    ParseOutcome::Parsed(parsed) => parsed,
                    other => {
                        tracing::debug!(%txid, input_index, ?other, "Skipping input without a usable signature");
                        continue;
                    }
                };
                let Some(public_key) = parsed.public_key_hex else {
                    tracing::debug!(%txid, input_index, "Skipping input without a public key");
                    continue;
                };

                let witness = SignatureWitness {
                    txid,
                    input_index: input_index as u32,
                    public_key,
                    block_height: height,
                    is_segwit: parsed.is_segwit,
                };
                tally.inputs_recorded += 1;
                if self.store.record(&parsed.nonce_hex, witness).await? {
                    tally.reuse_found += 1;
                    tracing::info!(
                        nonce = %parsed.nonce_hex,
                        %txid,
                        input_index,
                        height,
                        "Nonce reuse detected"
                    );
                }
            }
        }
        Ok(None)
    }
}

pub(crate) fn ledger_abort(err: anyhow::Error) -> ScanStatus {
    tracing::warn!("Nonce scan aborted: ledger error: {err:#}");
    ScanStatus::Aborted(AbortReason::Ledger {
        message: format!("{err:#}"),
    })
}
