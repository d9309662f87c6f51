//! In-memory ledger and block builders shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use bitcoin::{
    absolute::LockTime,
    block::{Header as BlockHeader, Version as BlockVersion},
    hash_types::TxMerkleNode,
    hashes::Hash,
    pow::CompactTarget,
    transaction::Version,
    Amount, Block, BlockHash, OutPoint, PubkeyHash, ScriptBuf, ScriptHash, Sequence, Transaction,
    TxIn, TxOut, Txid, WPubkeyHash, Witness,
};
use nonce_reuse_scanner::store::sqlite_store::SqliteStore;
use nonce_reuse_scanner::{BlockLocation, ChainSource, Successor, TxIndex};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::NamedTempFile;

const P2PKH_OUTPUTS: u32 = 64;
const P2WPKH_OUTPUTS: u32 = 64;
const P2SH_OUTPUTS: u32 = 8;

/// 33-byte key with the given prefix byte.
pub fn raw_pubkey(prefix: u8, k: u8) -> Vec<u8> {
    let mut pk = vec![prefix];
    pk.extend([k; 32]);
    pk
}

/// Compressed key number `k`.
pub fn pubkey(k: u8) -> Vec<u8> {
    raw_pubkey(0x02, k)
}

/// 32-byte `r` value number `k`.
pub fn nonce(k: u8) -> Vec<u8> {
    vec![k; 32]
}

/// DER signature with sighash byte, no push prefix.
pub fn der_sig(r: &[u8], s: &[u8]) -> Vec<u8> {
    let mut der = vec![0x30, (4 + r.len() + s.len()) as u8, 0x02, r.len() as u8];
    der.extend_from_slice(r);
    der.push(0x02);
    der.push(s.len() as u8);
    der.extend_from_slice(s);
    der.push(0x01);
    der
}

/// `<sig> <pubkey>` as an unlocking script.
pub fn script_sig(r: &[u8], pk: &[u8]) -> ScriptBuf {
    let sig = der_sig(r, &[0x3c; 32]);
    let mut bytes = vec![sig.len() as u8];
    bytes.extend(sig);
    bytes.push(pk.len() as u8);
    bytes.extend_from_slice(pk);
    ScriptBuf::from_bytes(bytes)
}

/// File-backed store whose row for `nonce_hex` cannot be decoded.
/// Keep the temp file alive for as long as the store is used.
pub fn store_with_malformed_row(
    nonce_hex: &str,
) -> anyhow::Result<(NamedTempFile, Arc<SqliteStore>)> {
    let tmp = NamedTempFile::new()?;
    let store = SqliteStore::new(tmp.path())?;
    let conn = rusqlite::Connection::open(tmp.path())?;
    conn.execute(
        "INSERT INTO nonces(nonce, witnesses) VALUES(?1, 'garbage')",
        [nonce_hex],
    )?;
    Ok((tmp, Arc::new(store)))
}

/// How one input of a test transaction spends.
#[derive(Clone)]
pub enum Spend {
    /// P2PKH output with the given `r` and public key.
    Pkh { r: Vec<u8>, pk: Vec<u8> },
    /// P2WPKH output with the given `r` and public key.
    Wpkh { r: Vec<u8>, pk: Vec<u8> },
    /// P2SH output; never extractable.
    Sh,
    /// An outpoint the index does not know.
    Unknown,
}

impl Spend {
    pub fn pkh(r: u8, k: u8) -> Self {
        Spend::Pkh {
            r: nonce(r),
            pk: pubkey(k),
        }
    }

    pub fn wpkh(r: u8, k: u8) -> Self {
        Spend::Wpkh {
            r: nonce(r),
            pk: pubkey(k),
        }
    }
}

/// Builds a linear chain whose genesis coinbase funds every later spend.
pub struct ChainBuilder {
    blocks: Vec<Block>,
    funding: Txid,
    next_pkh: u32,
    next_wpkh: u32,
    next_sh: u32,
}

impl ChainBuilder {
    pub fn new() -> Self {
        let mut outputs = Vec::new();
        for i in 0..P2PKH_OUTPUTS {
            outputs.push(TxOut {
                value: Amount::from_sat(10_000),
                script_pubkey: ScriptBuf::new_p2pkh(&PubkeyHash::from_byte_array([i as u8; 20])),
            });
        }
        for i in 0..P2WPKH_OUTPUTS {
            outputs.push(TxOut {
                value: Amount::from_sat(10_000),
                script_pubkey: ScriptBuf::new_p2wpkh(&WPubkeyHash::from_byte_array([i as u8; 20])),
            });
        }
        for i in 0..P2SH_OUTPUTS {
            outputs.push(TxOut {
                value: Amount::from_sat(10_000),
                script_pubkey: ScriptBuf::new_p2sh(&ScriptHash::from_byte_array([i as u8; 20])),
            });
        }
        let funding_tx = coinbase(0, outputs);
        let funding = funding_tx.compute_txid();
        let genesis = make_block(BlockHash::all_zeros(), 0, vec![funding_tx]);

        Self {
            blocks: vec![genesis],
            funding,
            next_pkh: 0,
            next_wpkh: P2PKH_OUTPUTS,
            next_sh: P2PKH_OUTPUTS + P2WPKH_OUTPUTS,
        }
    }

    /// Append a block; each inner vec is one transaction's inputs.
    pub fn block(mut self, txs: Vec<Vec<Spend>>) -> Self {
        let height = self.blocks.len() as u32;
        let mut txdata = vec![coinbase(height, vec![])];
        for spends in txs {
            let input = spends.into_iter().map(|s| self.input(s)).collect();
            txdata.push(Transaction {
                version: Version::TWO,
                lock_time: LockTime::ZERO,
                input,
                output: vec![TxOut {
                    value: Amount::from_sat(1_000),
                    script_pubkey: ScriptBuf::new(),
                }],
            });
        }
        let prev = self.blocks.last().map(|b| b.block_hash()).unwrap();
        self.blocks.push(make_block(prev, height, txdata));
        self
    }

    /// Append `n` blocks without spends.
    pub fn empty_blocks(mut self, n: usize) -> Self {
        for _ in 0..n {
            self = self.block(vec![]);
        }
        self
    }

    fn input(&mut self, spend: Spend) -> TxIn {
        let (previous_output, script_sig, witness) = match spend {
            Spend::Pkh { r, pk } => {
                let vout = bump(&mut self.next_pkh);
                (
                    OutPoint::new(self.funding, vout),
                    script_sig(&r, &pk),
                    Witness::new(),
                )
            }
            Spend::Wpkh { r, pk } => {
                let vout = bump(&mut self.next_wpkh);
                (
                    OutPoint::new(self.funding, vout),
                    ScriptBuf::new(),
                    Witness::from_slice(&[der_sig(&r, &[0x4d; 32]), pk]),
                )
            }
            Spend::Sh => {
                let vout = bump(&mut self.next_sh);
                (
                    OutPoint::new(self.funding, vout),
                    ScriptBuf::from_bytes(vec![0x00, 0x01, 0x51]),
                    Witness::new(),
                )
            }
            Spend::Unknown => (
                OutPoint::new(Txid::from_byte_array([0xee; 32]), 0),
                script_sig(&nonce(0xee), &pubkey(0xee)),
                Witness::new(),
            ),
        };
        TxIn {
            previous_output,
            script_sig,
            sequence: Sequence::MAX,
            witness,
        }
    }

    pub fn build(self) -> MemChain {
        MemChain::new(self.blocks)
    }
}

fn bump(counter: &mut u32) -> u32 {
    let v = *counter;
    *counter += 1;
    v
}

fn coinbase(height: u32, output: Vec<TxOut>) -> Transaction {
    Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint::null(),
            script_sig: ScriptBuf::from_bytes(height.to_le_bytes().to_vec()),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        }],
        output,
    }
}

fn make_block(prev_blockhash: BlockHash, height: u32, txdata: Vec<Transaction>) -> Block {
    let header = BlockHeader {
        version: BlockVersion::from_consensus(2),
        prev_blockhash,
        merkle_root: TxMerkleNode::all_zeros(),
        time: height,
        bits: CompactTarget::from_consensus(0x207fffff), // easy target (regtest-like)
        nonce: height,
    };
    Block { header, txdata }
}

/// Ledger over a fixed list of blocks, with switches for failure paths.
pub struct MemChain {
    blocks: Vec<Block>,
    txs: HashMap<Txid, (BlockHash, Transaction)>,
    inactive: Mutex<HashSet<BlockHash>>,
    unreadable: Mutex<HashSet<BlockHash>>,
    reorg_on_read: Mutex<Option<BlockHash>>,
    shutdown_after_read: Mutex<Option<BlockHash>>,
    shutdown: AtomicBool,
}

impl MemChain {
    fn new(blocks: Vec<Block>) -> Self {
        let mut txs = HashMap::new();
        for block in &blocks {
            for tx in &block.txdata {
                txs.insert(tx.compute_txid(), (block.block_hash(), tx.clone()));
            }
        }
        Self {
            blocks,
            txs,
            inactive: Mutex::new(HashSet::new()),
            unreadable: Mutex::new(HashSet::new()),
            reorg_on_read: Mutex::new(None),
            shutdown_after_read: Mutex::new(None),
            shutdown: AtomicBool::new(false),
        }
    }

    pub fn hash(&self, height: u32) -> BlockHash {
        self.blocks[height as usize].block_hash()
    }

    pub fn tip(&self) -> u32 {
        self.blocks.len() as u32 - 1
    }

    /// The block at `height` leaves the active chain right after its data is read.
    pub fn reorg_when_read(&self, height: u32) {
        *self.reorg_on_read.lock().unwrap() = Some(self.hash(height));
    }

    pub fn make_unreadable(&self, height: u32) {
        self.unreadable.lock().unwrap().insert(self.hash(height));
    }

    /// Request shutdown right after the block at `height` is read.
    pub fn shutdown_after(&self, height: u32) {
        *self.shutdown_after_read.lock().unwrap() = Some(self.hash(height));
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    fn position(&self, hash: BlockHash) -> Option<usize> {
        self.blocks.iter().position(|b| b.block_hash() == hash)
    }
}

#[async_trait]
impl ChainSource for MemChain {
    async fn active_height(&self) -> anyhow::Result<Option<u32>> {
        Ok(self.blocks.len().checked_sub(1).map(|h| h as u32))
    }

    async fn block_hash(&self, height: u32) -> anyhow::Result<BlockHash> {
        match self.blocks.get(height as usize) {
            Some(b) => Ok(b.block_hash()),
            None => anyhow::bail!("no block at height {height}"),
        }
    }

    async fn read_block(&self, hash: BlockHash) -> anyhow::Result<Option<Block>> {
        if *self.reorg_on_read.lock().unwrap() == Some(hash) {
            self.inactive.lock().unwrap().insert(hash);
        }
        if *self.shutdown_after_read.lock().unwrap() == Some(hash) {
            self.request_shutdown();
        }
        if self.unreadable.lock().unwrap().contains(&hash) {
            return Ok(None);
        }
        Ok(self.position(hash).map(|i| self.blocks[i].clone()))
    }

    async fn locate_block(&self, hash: BlockHash) -> anyhow::Result<BlockLocation> {
        let Some(i) = self.position(hash) else {
            return Ok(BlockLocation::default());
        };
        let inactive = self.inactive.lock().unwrap();
        Ok(BlockLocation {
            in_active_chain: !inactive.contains(&hash),
            next: self.blocks.get(i + 1).map(|b| Successor {
                hash: b.block_hash(),
                in_active_chain: !inactive.contains(&b.block_hash()),
            }),
        })
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TxIndex for MemChain {
    async fn find_tx(&self, txid: Txid) -> anyhow::Result<Option<(BlockHash, Transaction)>> {
        Ok(self.txs.get(&txid).cloned())
    }
}
