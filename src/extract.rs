//! Locate the signature and public key an input reveals, based on the shape of
//! the output it spends.
use bitcoin::{OutPoint, Script, ScriptBuf, TxIn};

use crate::chain::TxIndex;
use crate::error::ExtractError;

/// Output shapes the scanner distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpendKind {
    /// P2PKH: `<sig> <pubkey>` in the unlocking script.
    PubkeyHash,
    /// P2WPKH: `<sig> <pubkey>` on the witness stack.
    WitnessPubkeyHash,
    /// Multisig, script hash, taproot, bare keys, anything else.
    Other,
}

/// Classify the script of a spent output.
pub fn classify(script_pubkey: &Script) -> SpendKind {
    if script_pubkey.is_p2pkh() {
        SpendKind::PubkeyHash
    } else if script_pubkey.is_p2wpkh() {
        SpendKind::WitnessPubkeyHash
    } else {
        SpendKind::Other
    }
}

/// Push-framed `<sig> <pubkey>` bytes, ready for [`crate::der::parse`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSignature {
    /// Stream bytes.
    pub bytes: Vec<u8>,
    /// Whether the stream was assembled from witness data.
    pub is_segwit: bool,
}

/// Pull the signature stream out of `input`, given the script it spends.
/// `None` for shapes that carry no single-key signature.
pub fn extract(prev_script: &Script, input: &TxIn) -> Option<RawSignature> {
    match classify(prev_script) {
        SpendKind::PubkeyHash => Some(RawSignature {
            bytes: input.script_sig.as_bytes().to_vec(),
            is_segwit: false,
        }),
        SpendKind::WitnessPubkeyHash => {
            if input.witness.len() != 2 {
                return None;
            }
            let mut bytes = Vec::new();
            for item in input.witness.iter() {
                // a push length must fit one byte for the positional layout
                let len = u8::try_from(item.len()).ok()?;
                bytes.push(len);
                bytes.extend_from_slice(item);
            }
            Some(RawSignature {
                bytes,
                is_segwit: true,
            })
        }
        SpendKind::Other => None,
    }
}

/// Resolve the script of the output `outpoint` refers to.
pub async fn resolve_prevout_script(
    index: &dyn TxIndex,
    outpoint: OutPoint,
) -> Result<ScriptBuf, ExtractError> {
    let found = index
        .find_tx(outpoint.txid)
        .await
        .map_err(|source| ExtractError::Index { outpoint, source })?;

    found
        .and_then(|(_, tx)| {
            usize::try_from(outpoint.vout)
                .ok()
                .and_then(|vout| tx.output.get(vout))
                .map(|out| out.script_pubkey.clone())
        })
        .ok_or(ExtractError::PreviousTxNotFound { outpoint })
}
