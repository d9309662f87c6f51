//! Nonce records: the witnesses that used one nonce, their on-disk encoding,
//! and the merge rule that decides when a write is a reuse.
use std::str::FromStr;

use bitcoin::Txid;

use crate::store::StoreError;

/// Version tag written in front of every encoded record.
pub const RECORD_VERSION: u32 = 1;

const VERSION_SEP: char = '|';
const WITNESS_SEP: char = '_';
const FIELD_SEP: char = ':';

/// One observed use of a nonce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureWitness {
    /// Spending transaction.
    pub txid: Txid,
    /// Input position within the spending transaction.
    pub input_index: u32,
    /// Lowercase hex public key that produced the signature.
    pub public_key: String,
    /// Height of the block containing the spending transaction.
    pub block_height: u32,
    /// Whether the signature came from a witness stack.
    pub is_segwit: bool,
}

impl SignatureWitness {
    /// Two witnesses are the same occurrence iff they point at the same input.
    pub fn same_occurrence(&self, other: &SignatureWitness) -> bool {
        self.txid == other.txid && self.input_index == other.input_index
    }

    fn encode_into(&self, out: &mut String) {
        out.push_str(&self.txid.to_string());
        out.push(FIELD_SEP);
        out.push_str(&self.input_index.to_string());
        out.push(FIELD_SEP);
        out.push_str(&self.public_key);
        out.push(FIELD_SEP);
        out.push_str(&self.block_height.to_string());
        out.push(FIELD_SEP);
        out.push(if self.is_segwit { '1' } else { '0' });
    }

    fn decode(nonce: &str, raw: &str) -> Result<Self, StoreError> {
        let malformed = |reason: String| StoreError::Malformed {
            nonce: nonce.to_owned(),
            reason,
        };

        let mut fields: Vec<&str> = raw.split(FIELD_SEP).collect();
        // older writers left a separator after the last field
        if fields.len() == 6 && fields[5].is_empty() {
            fields.pop();
        }
        let &[txid, input_index, public_key, block_height, segwit] = fields.as_slice() else {
            return Err(malformed(format!("expected 5 fields in {raw:?}")));
        };

        let txid = Txid::from_str(txid).map_err(|e| malformed(format!("txid {txid:?}: {e}")))?;
        let input_index = input_index
            .parse()
            .map_err(|e| malformed(format!("input index {input_index:?}: {e}")))?;
        let block_height = block_height
            .parse()
            .map_err(|e| malformed(format!("block height {block_height:?}: {e}")))?;
        if public_key.is_empty() || !public_key.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(malformed(format!("public key {public_key:?}")));
        }
        let is_segwit = match segwit {
            "1" => true,
            "0" | "" => false,
            other => return Err(malformed(format!("segwit flag {other:?}"))),
        };

        Ok(Self {
            txid,
            input_index,
            public_key: public_key.to_owned(),
            block_height,
            is_segwit,
        })
    }
}

/// What [`NonceRecord::merge`] did with a witness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The same input was already recorded; nothing changed.
    Duplicate,
    /// Appended; no other occurrence shares its public key.
    Appended,
    /// Appended next to another occurrence with the same public key.
    Reuse,
}

/// Every recorded use of one nonce, in write order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NonceRecord {
    /// Recorded witnesses.
    pub witnesses: Vec<SignatureWitness>,
}

impl NonceRecord {
    /// A record holding a single witness.
    pub fn new(witness: SignatureWitness) -> Self {
        Self {
            witnesses: vec![witness],
        }
    }

    /// Add `witness` unless its input is already recorded.
    ///
    /// Every new occurrence that joins an earlier occurrence under the same
    /// public key is reported as [`MergeOutcome::Reuse`], not only the second.
    pub fn merge(&mut self, witness: SignatureWitness) -> MergeOutcome {
        if self.witnesses.iter().any(|w| w.same_occurrence(&witness)) {
            return MergeOutcome::Duplicate;
        }
        let reused = self
            .witnesses
            .iter()
            .any(|w| w.public_key == witness.public_key);
        self.witnesses.push(witness);
        if reused {
            MergeOutcome::Reuse
        } else {
            MergeOutcome::Appended
        }
    }

    /// Public keys that signed with this nonce more than once, with their witnesses.
    pub fn reused_keys(&self) -> Vec<(String, Vec<SignatureWitness>)> {
        let mut groups: Vec<(String, Vec<SignatureWitness>)> = Vec::new();
        for w in &self.witnesses {
            match groups.iter_mut().find(|(pk, _)| *pk == w.public_key) {
                Some((_, ws)) => ws.push(w.clone()),
                None => groups.push((w.public_key.clone(), vec![w.clone()])),
            }
        }
        groups.retain(|(_, ws)| ws.len() > 1);
        groups
    }

    /// Serialize as `"<version>|w1_w2_..."`.
    pub fn encode(&self) -> String {
        let mut out = format!("{RECORD_VERSION}{VERSION_SEP}");
        for (i, w) in self.witnesses.iter().enumerate() {
            if i > 0 {
                out.push(WITNESS_SEP);
            }
            w.encode_into(&mut out);
        }
        out
    }

    /// Parse a stored value for `nonce`.
    pub fn decode(nonce: &str, raw: &str) -> Result<Self, StoreError> {
        let Some((version, body)) = raw.split_once(VERSION_SEP) else {
            return Err(StoreError::Malformed {
                nonce: nonce.to_owned(),
                reason: "missing version tag".into(),
            });
        };
        match version.parse::<u32>() {
            Ok(RECORD_VERSION) => {}
            _ => {
                return Err(StoreError::UnsupportedVersion {
                    nonce: nonce.to_owned(),
                    version: version.to_owned(),
                })
            }
        }

        let witnesses = body
            .split(WITNESS_SEP)
            .filter(|chunk| !chunk.is_empty())
            .map(|chunk| SignatureWitness::decode(nonce, chunk))
            .collect::<Result<Vec<_>, _>>()?;

        if witnesses.is_empty() {
            return Err(StoreError::Malformed {
                nonce: nonce.to_owned(),
                reason: "record has no witnesses".into(),
            });
        }
        Ok(Self { witnesses })
    }
}
