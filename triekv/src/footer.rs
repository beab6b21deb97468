//! On-disk block tags, the transaction header, and the tail footer.

use crate::error::{Error, Result};

/// `"tkvdb003"` — kept from the file format this engine's on-disk layout is bit-compatible
/// with; changing it would silently break every tool that already speaks this footer shape.
pub(crate) const SIGNATURE: [u8; 8] = *b"tkvdb003";

pub(crate) const BLOCK_TYPE_TRANSACTION: u8 = 0;
pub(crate) const BLOCK_TYPE_FOOTER: u8 = 1;
pub(crate) const BLOCK_TYPE_REMOVED_FOOTER: u8 = 2;

/// `type(1) | signature(8) | root_off(8) | transaction_size(8) | transaction_id(8)
/// | gap_begin(8) | gap_end(8)`.
pub(crate) const FOOTER_SIZE: usize = 1 + 8 + 8 + 8 + 8 + 8 + 8;

/// `type(1) | footer_off(8)`.
pub(crate) const TX_HEADER_SIZE: usize = 1 + 8;

/// The file's tail footer: names the live root and the current reclaimable gap.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Footer {
    pub(crate) root_off: u64,
    pub(crate) transaction_size: u64,
    pub(crate) transaction_id: u64,
    pub(crate) gap_begin: u64,
    pub(crate) gap_end: u64,
}

impl Footer {
    pub(crate) fn empty() -> Self {
        Footer {
            root_off: 0,
            transaction_size: 0,
            transaction_id: 0,
            gap_begin: 0,
            gap_end: 0,
        }
    }

    pub(crate) fn encode(&self) -> [u8; FOOTER_SIZE] {
        let mut buf = [0u8; FOOTER_SIZE];
        let mut w = 0;
        buf[w] = BLOCK_TYPE_FOOTER;
        w += 1;
        buf[w..w + 8].copy_from_slice(&SIGNATURE);
        w += 8;
        buf[w..w + 8].copy_from_slice(&self.root_off.to_le_bytes());
        w += 8;
        buf[w..w + 8].copy_from_slice(&self.transaction_size.to_le_bytes());
        w += 8;
        buf[w..w + 8].copy_from_slice(&self.transaction_id.to_le_bytes());
        w += 8;
        buf[w..w + 8].copy_from_slice(&self.gap_begin.to_le_bytes());
        w += 8;
        buf[w..w + 8].copy_from_slice(&self.gap_end.to_le_bytes());
        w += 8;
        debug_assert_eq!(w, FOOTER_SIZE);
        buf
    }

    pub(crate) fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() != FOOTER_SIZE {
            return Err(Error::corrupted("short footer"));
        }
        let block_type = buf[0];
        if block_type != BLOCK_TYPE_FOOTER {
            return Err(Error::corrupted(format!(
                "tail block has type {block_type}, expected footer"
            )));
        }
        let sig = &buf[1..9];
        if sig != SIGNATURE {
            return Err(Error::corrupted("bad footer signature"));
        }
        let mut r = 9;
        let read_u64 = |buf: &[u8], at: usize| -> u64 {
            u64::from_le_bytes(buf[at..at + 8].try_into().unwrap())
        };
        let root_off = read_u64(buf, r);
        r += 8;
        let transaction_size = read_u64(buf, r);
        r += 8;
        let transaction_id = read_u64(buf, r);
        r += 8;
        let gap_begin = read_u64(buf, r);
        r += 8;
        let gap_end = read_u64(buf, r);
        r += 8;
        debug_assert_eq!(r, FOOTER_SIZE);
        if gap_begin > gap_end {
            return Err(Error::corrupted("gap_begin past gap_end in footer"));
        }
        Ok(Footer {
            root_off,
            transaction_size,
            transaction_id,
            gap_begin,
            gap_end,
        })
    }
}

/// The header written immediately before each transaction block: just enough to find the
/// footer that follows it.
#[derive(Clone, Copy, Debug)]
pub(crate) struct TxHeader {
    pub(crate) footer_off: u64,
}

impl TxHeader {
    pub(crate) fn encode(&self) -> [u8; TX_HEADER_SIZE] {
        let mut buf = [0u8; TX_HEADER_SIZE];
        buf[0] = BLOCK_TYPE_TRANSACTION;
        buf[1..9].copy_from_slice(&self.footer_off.to_le_bytes());
        buf
    }

    pub(crate) fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() != TX_HEADER_SIZE {
            return Err(Error::corrupted("short transaction header"));
        }
        if buf[0] != BLOCK_TYPE_TRANSACTION {
            return Err(Error::corrupted(format!(
                "transaction block has type {}, expected transaction",
                buf[0]
            )));
        }
        let footer_off = u64::from_le_bytes(buf[1..9].try_into().unwrap());
        Ok(TxHeader { footer_off })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn footer_round_trips() {
        let footer = Footer {
            root_off: 9,
            transaction_size: 128,
            transaction_id: 7,
            gap_begin: 0,
            gap_end: 0,
        };
        let encoded = footer.encode();
        let decoded = Footer::decode(&encoded).unwrap();
        assert_eq!(footer, decoded);
    }

    #[test]
    fn bad_signature_is_corrupted() {
        let footer = Footer::empty();
        let mut encoded = footer.encode();
        encoded[1] = b'x';
        assert!(matches!(Footer::decode(&encoded), Err(Error::Corrupted(_))));
    }

    #[test]
    fn inverted_gap_is_corrupted() {
        let footer = Footer {
            gap_begin: 10,
            gap_end: 5,
            ..Footer::empty()
        };
        let encoded = footer.encode();
        assert!(matches!(Footer::decode(&encoded), Err(Error::Corrupted(_))));
    }
}
