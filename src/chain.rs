//! Ledger access: block walking by hash/height and previous-transaction lookup.
use async_trait::async_trait;
use bitcoin::{Block, BlockHash, Transaction, Txid};

/// A block identified by hash and the height it occupies on the active chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRef {
    /// Block hash.
    pub hash: BlockHash,
    /// Block height.
    pub height: u32,
}

impl BlockRef {
    /// Pair a hash with its height.
    pub fn new(hash: BlockHash, height: u32) -> Self {
        Self { hash, height }
    }
}

/// The block that follows another one in the block index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Successor {
    /// Hash of the following block.
    pub hash: BlockHash,
    /// Whether the following block is on the active chain.
    pub in_active_chain: bool,
}

/// Chain placement of a block, queried separately from its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockLocation {
    /// Whether the block is (still) on the active chain.
    pub in_active_chain: bool,
    /// The next block, if the index knows one.
    pub next: Option<Successor>,
}

impl BlockLocation {
    /// Hash of the next block to scan, if it is on the active chain.
    pub fn active_successor(&self) -> Option<BlockHash> {
        self.next
            .filter(|next| next.in_active_chain)
            .map(|next| next.hash)
    }
}

/// Read access to the node's block index and block storage.
#[async_trait]
pub trait ChainSource: Send + Sync {
    /// Height of the active tip, `None` if the chain has no blocks.
    async fn active_height(&self) -> anyhow::Result<Option<u32>>;

    /// Block hash at an exact height on the active chain.
    async fn block_hash(&self, height: u32) -> anyhow::Result<BlockHash>;

    /// Read full block data. `None` if the block cannot be read from storage.
    async fn read_block(&self, hash: BlockHash) -> anyhow::Result<Option<Block>>;

    /// Whether `hash` is on the active chain and which block follows it.
    async fn locate_block(&self, hash: BlockHash) -> anyhow::Result<BlockLocation>;

    /// Whether the process is shutting down.
    fn shutdown_requested(&self) -> bool;
}

/// Transaction index used to resolve the outputs spent by an input.
#[async_trait]
pub trait TxIndex: Send + Sync {
    /// Look up a confirmed transaction, returning the containing block's hash.
    async fn find_tx(&self, txid: Txid) -> anyhow::Result<Option<(BlockHash, Transaction)>>;
}
