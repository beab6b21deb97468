//! Depth-first layout of a transaction's reachable nodes into a contiguous write buffer.

use crate::codec::{self, DiskChild};
use crate::error::Result;
use crate::footer::TX_HEADER_SIZE;
use crate::node::{ChildSlot, Node};

/// Lay out every still-unserialized node reachable from `root` into `buf`, starting at byte
/// offset zero of `buf` (the caller is responsible for placing `buf` after a transaction header
/// at `transaction_off`). Returns the root's final disk offset.
///
/// A node whose `disk_off` is already set is reused as-is: its subtree is assumed unchanged
/// since it was last committed, so no bytes are emitted for it here, and its existing offset is
/// used directly in the parent's child table.
pub(crate) fn layout_transaction(root: &mut Node, transaction_off: u64, buf: &mut Vec<u8>) -> Result<u64> {
    layout_node(root, transaction_off, buf)
}

fn layout_node(node: &mut Node, transaction_off: u64, buf: &mut Vec<u8>) -> Result<u64> {
    if let Some(off) = node.disk_off {
        return Ok(off);
    }

    let mut disk_children: Vec<DiskChild> = Vec::with_capacity(node.children.len());
    for child in node.children.iter_mut() {
        let off = match &mut child.slot {
            ChildSlot::OnDisk(off) => *off,
            ChildSlot::Resident(b) => layout_node(b.as_mut(), transaction_off, buf)?,
        };
        disk_children.push((child.symbol, off));
    }

    let encoded = codec::encode_node(
        node.flags,
        &node.prefix,
        node.value.as_deref(),
        node.meta.as_deref(),
        &disk_children,
    );
    let my_off = transaction_off + TX_HEADER_SIZE as u64 + buf.len() as u64;
    buf.extend_from_slice(&encoded);
    node.disk_off = Some(my_off);
    Ok(my_off)
}
