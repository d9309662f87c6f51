//! Positional parser that pulls the `r` value (the nonce) and the public key out of
//! a push-framed `<sig> <pubkey>` byte stream.
//!
//! Layout read, all lengths single bytes:
//!
//! ```text
//! [push len] 0x30 [seq len] 0x02 [r len] r.. 0x02 [s len] s.. [sighash] [pk len] pk..
//! ```
//!
//! The `s` value is skipped; only `r` and the public key are needed to detect reuse.

const SEQUENCE_TAG: u8 = 0x30;
const INTEGER_TAG: u8 = 0x02;

/// Public key prefixes: compressed even, compressed odd, uncompressed.
const PUBKEY_PREFIXES: [u8; 3] = [0x02, 0x03, 0x04];

/// Bounds-checked reader over an immutable byte buffer.
#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    /// Start reading at the beginning of `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Current read offset.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Read one byte, `None` on underrun.
    pub fn read_u8(&mut self) -> Option<u8> {
        let b = *self.buf.get(self.pos)?;
        self.pos += 1;
        Some(b)
    }

    /// Read exactly `n` bytes, `None` on underrun (the cursor does not move).
    pub fn read_bytes(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.remaining() < n {
            return None;
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Some(out)
    }

    /// Advance past `n` bytes, `None` on underrun.
    pub fn skip(&mut self, n: usize) -> Option<()> {
        self.read_bytes(n).map(|_| ())
    }
}

/// Signature components recovered from a byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSignature {
    /// Lowercase hex of the `r` component.
    pub nonce_hex: String,
    /// Lowercase hex of the public key, `None` if the trailing bytes are not a key.
    pub public_key_hex: Option<String>,
    /// Whether the stream came from a witness stack.
    pub is_segwit: bool,
}

/// Result of [`parse`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    /// All fields were read.
    Parsed(ParsedSignature),
    /// The stream ended before a required field was complete.
    Incomplete,
    /// The stream is long enough but does not have the expected markers.
    Malformed,
}

impl ParseOutcome {
    /// The parsed signature, if any.
    pub fn parsed(self) -> Option<ParsedSignature> {
        match self {
            ParseOutcome::Parsed(sig) => Some(sig),
            _ => None,
        }
    }
}

enum Step {
    Underrun,
    BadMarker,
}

/// Parse a push-framed signature stream.
pub fn parse(stream: &[u8], is_segwit: bool) -> ParseOutcome {
    match parse_inner(&mut ByteCursor::new(stream), is_segwit) {
        Ok(sig) => ParseOutcome::Parsed(sig),
        Err(Step::Underrun) => ParseOutcome::Incomplete,
        Err(Step::BadMarker) => ParseOutcome::Malformed,
    }
}

fn parse_inner(cur: &mut ByteCursor<'_>, is_segwit: bool) -> Result<ParsedSignature, Step> {
    let prefix = cur.read_bytes(4).ok_or(Step::Underrun)?;
    if prefix[1] != SEQUENCE_TAG || prefix[3] != INTEGER_TAG {
        return Err(Step::BadMarker);
    }

    let r_len = usize::from(cur.read_u8().ok_or(Step::Underrun)?);
    if r_len == 0 {
        return Err(Step::BadMarker);
    }
    let r = cur.read_bytes(r_len).ok_or(Step::Underrun)?;

    if cur.read_u8().ok_or(Step::Underrun)? != INTEGER_TAG {
        return Err(Step::BadMarker);
    }
    let s_len = usize::from(cur.read_u8().ok_or(Step::Underrun)?);
    cur.skip(s_len).ok_or(Step::Underrun)?;

    // sighash flag, then the public key's push length
    cur.skip(1).ok_or(Step::Underrun)?;
    let pk_len = usize::from(cur.read_u8().ok_or(Step::Underrun)?);
    let pk = cur.read_bytes(pk_len).ok_or(Step::Underrun)?;

    let public_key_hex = match pk.first() {
        Some(prefix) if PUBKEY_PREFIXES.contains(prefix) => Some(hex::encode(pk)),
        _ => None,
    };

    Ok(ParsedSignature {
        nonce_hex: hex::encode(r),
        public_key_hex,
        is_segwit,
    })
}
