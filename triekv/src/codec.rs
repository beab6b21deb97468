//! Serialization of a single trie node to and from its on-disk form.
//!
//! Layout: `size(4) | type(1) | nsubnodes(2) | prefix_size(4) | data[...]`, where `data` is,
//! in order: `val_size(4)` if `HAS_VALUE`, `meta_size(4)` if `HAS_META`, the child table, then
//! prefix bytes, value bytes, metadata bytes. The child table is a flat array of 256 8-byte
//! offsets ("dense") when there are more than [`DENSE_THRESHOLD`] children, otherwise a
//! symbol array followed by an offset array ("compact"). This split must match bit-for-bit
//! between writer and reader or the file becomes unreadable by either.

use crate::error::{Error, Result};
use crate::node::NodeFlags;

/// `256 - 256/8`: the point past which a compact `(symbol, offset)` table is larger than a
/// flat 256-entry table would have been.
pub(crate) const DENSE_THRESHOLD: usize = 224;
const DENSE_WIDTH: usize = 256;

const SIZE_FIELD_LEN: usize = 4;
const TYPE_FIELD_LEN: usize = 1;
const NSUBNODES_FIELD_LEN: usize = 2;
const PREFIX_SIZE_FIELD_LEN: usize = 4;
const HEADER_LEN: usize = SIZE_FIELD_LEN + TYPE_FIELD_LEN + NSUBNODES_FIELD_LEN + PREFIX_SIZE_FIELD_LEN;

/// A child entry as laid out on disk: a first byte and the absolute file offset of the child
/// node.
pub(crate) type DiskChild = (u8, u64);

/// The fields of a node as read back from disk, before they are turned into an in-memory
/// [`crate::node::Node`].
pub(crate) struct DecodedNode {
    pub(crate) flags: NodeFlags,
    pub(crate) prefix: Vec<u8>,
    pub(crate) value: Option<Vec<u8>>,
    pub(crate) meta: Option<Vec<u8>>,
    pub(crate) children: Vec<DiskChild>,
}

/// Compute the exact encoded size of a node with these field sizes and this child count,
/// without building the buffer. Used to plan `disk_off` for every node in a commit before any
/// bytes are written.
pub(crate) fn encoded_size(
    flags: NodeFlags,
    prefix_len: usize,
    val_len: usize,
    meta_len: usize,
    nchildren: usize,
) -> u32 {
    let mut len = HEADER_LEN;
    if flags.contains(NodeFlags::HAS_VALUE) {
        len += 4;
    }
    if flags.contains(NodeFlags::HAS_META) {
        len += 4;
    }
    len += children_table_len(nchildren);
    len += prefix_len + val_len + meta_len;
    len as u32
}

fn children_table_len(nchildren: usize) -> usize {
    if nchildren <= DENSE_THRESHOLD {
        nchildren * (1 + 8)
    } else {
        DENSE_WIDTH * 8
    }
}

/// Encode one node. `children` must be sorted by symbol and already resolved to absolute
/// on-disk offsets (the depth-first commit walk lays out children before their parent, so this
/// always holds by the time a parent is encoded).
pub(crate) fn encode_node(
    flags: NodeFlags,
    prefix: &[u8],
    value: Option<&[u8]>,
    meta: Option<&[u8]>,
    children: &[DiskChild],
) -> Vec<u8> {
    let val_len = value.map_or(0, <[u8]>::len);
    let meta_len = meta.map_or(0, <[u8]>::len);
    let size = encoded_size(flags, prefix.len(), val_len, meta_len, children.len());
    let mut buf = Vec::with_capacity(size as usize);

    buf.extend_from_slice(&size.to_le_bytes());
    buf.push(flags.bits());
    buf.extend_from_slice(&(children.len() as u16).to_le_bytes());
    buf.extend_from_slice(&(prefix.len() as u32).to_le_bytes());

    if let Some(v) = value {
        buf.extend_from_slice(&(v.len() as u32).to_le_bytes());
    }
    if let Some(m) = meta {
        buf.extend_from_slice(&(m.len() as u32).to_le_bytes());
    }

    if children.len() <= DENSE_THRESHOLD {
        for (symbol, _) in children {
            buf.push(*symbol);
        }
        for (_, off) in children {
            buf.extend_from_slice(&off.to_le_bytes());
        }
    } else {
        let mut dense = [0u64; DENSE_WIDTH];
        for (symbol, off) in children {
            dense[*symbol as usize] = *off;
        }
        for off in dense {
            buf.extend_from_slice(&off.to_le_bytes());
        }
    }

    buf.extend_from_slice(prefix);
    if let Some(v) = value {
        buf.extend_from_slice(v);
    }
    if let Some(m) = meta {
        buf.extend_from_slice(m);
    }

    debug_assert_eq!(buf.len(), size as usize);
    buf
}

/// Decode one node from `buf`, which must start exactly at the node's `size` field. Returns
/// the decoded node and the number of bytes consumed (equal to the node's `size` field).
pub(crate) fn decode_node(buf: &[u8]) -> Result<(DecodedNode, u32)> {
    if buf.len() < HEADER_LEN {
        return Err(Error::corrupted("disk node shorter than its header"));
    }
    let size = u32::from_le_bytes(buf[0..4].try_into().unwrap());
    if (size as usize) > buf.len() {
        return Err(Error::corrupted("disk node size exceeds available bytes"));
    }
    let buf = &buf[..size as usize];

    let flags = NodeFlags::from_bits(buf[4]).ok_or_else(|| Error::corrupted("bad node type bits"))?;
    let nsubnodes = u16::from_le_bytes(buf[5..7].try_into().unwrap()) as usize;
    let prefix_size = u32::from_le_bytes(buf[7..11].try_into().unwrap()) as usize;

    let mut r = HEADER_LEN;
    let read_u32 = |buf: &[u8], at: usize| -> Result<u32> {
        buf.get(at..at + 4)
            .map(|s| u32::from_le_bytes(s.try_into().unwrap()))
            .ok_or_else(|| Error::corrupted("disk node truncated reading a length field"))
    };

    let val_size = if flags.contains(NodeFlags::HAS_VALUE) {
        let v = read_u32(buf, r)? as usize;
        r += 4;
        Some(v)
    } else {
        None
    };
    let meta_size = if flags.contains(NodeFlags::HAS_META) {
        let v = read_u32(buf, r)? as usize;
        r += 4;
        Some(v)
    } else {
        None
    };

    let mut children = Vec::with_capacity(nsubnodes);
    if nsubnodes <= DENSE_THRESHOLD {
        let symbols_end = r + nsubnodes;
        let symbols = buf
            .get(r..symbols_end)
            .ok_or_else(|| Error::corrupted("disk node truncated reading child symbols"))?
            .to_vec();
        r = symbols_end;
        for symbol in symbols {
            let off = buf
                .get(r..r + 8)
                .map(|s| u64::from_le_bytes(s.try_into().unwrap()))
                .ok_or_else(|| Error::corrupted("disk node truncated reading child offsets"))?;
            r += 8;
            children.push((symbol, off));
        }
    } else {
        for symbol in 0..DENSE_WIDTH {
            let off = buf
                .get(r..r + 8)
                .map(|s| u64::from_le_bytes(s.try_into().unwrap()))
                .ok_or_else(|| Error::corrupted("disk node truncated reading dense child table"))?;
            r += 8;
            if off != 0 {
                children.push((symbol as u8, off));
            }
        }
        if children.len() != nsubnodes {
            return Err(Error::corrupted(
                "dense child table population disagrees with declared nsubnodes",
            ));
        }
    }

    let prefix = buf
        .get(r..r + prefix_size)
        .ok_or_else(|| Error::corrupted("disk node truncated reading prefix"))?
        .to_vec();
    r += prefix_size;

    let value = match val_size {
        Some(len) => Some(
            buf.get(r..r + len)
                .ok_or_else(|| Error::corrupted("disk node truncated reading value"))?
                .to_vec(),
        ),
        None => None,
    };
    if let Some(len) = val_size {
        r += len;
    }

    let meta = match meta_size {
        Some(len) => Some(
            buf.get(r..r + len)
                .ok_or_else(|| Error::corrupted("disk node truncated reading metadata"))?
                .to_vec(),
        ),
        None => None,
    };
    if let Some(len) = meta_size {
        r += len;
    }

    Ok((
        DecodedNode {
            flags,
            prefix,
            value,
            meta,
            children,
        },
        size,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_leaf_with_no_children() {
        let encoded = encode_node(NodeFlags::HAS_VALUE, b"abc", Some(b"value"), None, &[]);
        let (decoded, consumed) = decode_node(&encoded).unwrap();
        assert_eq!(consumed as usize, encoded.len());
        assert_eq!(decoded.prefix, b"abc");
        assert_eq!(decoded.value.as_deref(), Some(&b"value"[..]));
        assert!(decoded.children.is_empty());
    }

    #[test]
    fn round_trips_compact_children() {
        let children = vec![(b'a', 10u64), (b'z', 20u64)];
        let encoded = encode_node(NodeFlags::empty(), b"", None, None, &children);
        let (decoded, _) = decode_node(&encoded).unwrap();
        assert_eq!(decoded.children, children);
    }

    #[test]
    fn round_trips_dense_children() {
        let children: Vec<DiskChild> = (0..=DENSE_THRESHOLD as u16 + 1)
            .map(|i| (i as u8, 1000 + i as u64))
            .collect();
        let encoded = encode_node(NodeFlags::empty(), b"", None, None, &children);
        let (decoded, _) = decode_node(&encoded).unwrap();
        assert_eq!(decoded.children.len(), children.len());
        assert_eq!(decoded.children, children);
    }

    #[test]
    fn rejects_truncated_buffer() {
        let encoded = encode_node(NodeFlags::HAS_VALUE, b"abc", Some(b"value"), None, &[]);
        let truncated = &encoded[..encoded.len() - 1];
        assert!(decode_node(truncated).is_err());
    }

    #[test]
    fn extra_trailing_bytes_are_ignored() {
        let mut encoded = encode_node(NodeFlags::HAS_VALUE, b"k", Some(b"v"), None, &[]);
        let exact_len = encoded.len();
        encoded.extend_from_slice(b"garbage-after-this-node");
        let (decoded, consumed) = decode_node(&encoded).unwrap();
        assert_eq!(consumed as usize, exact_len);
        assert_eq!(decoded.value.as_deref(), Some(&b"v"[..]));
    }
}
