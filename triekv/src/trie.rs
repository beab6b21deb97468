//! The walk-by-byte mutation algorithms: insert, get, and delete (with singleton-parent merge).
//!
//! Every function here takes the node it is currently positioned on as `&mut Node`: the COW
//! "replace with a new node and forward the old one" dance the engine's design describes
//! becomes, in an owned tree, simply overwriting `*node` with a freshly built value. The old
//! node is dropped in place; nothing else in this transaction can still be holding a reference
//! to it, since the engine is single-threaded and non-reentrant (see the crate's concurrency
//! notes).

use crate::arena::{estimate_node_bytes, Arena};
use crate::error::{Error, Result};
use crate::node::{Child, ChildSlot, Node};
use crate::store::Database;

fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

/// Ensure the child at `symbol` is resident, faulting it in from disk if necessary. Returns
/// `None` if there is no child at that symbol at all.
pub(crate) fn fault_in<'n>(
    db: Option<&Database>,
    node: &'n mut Node,
    symbol: u8,
) -> Result<Option<&'n mut Node>> {
    let idx = match node.child_index(symbol) {
        Ok(i) => i,
        Err(_) => return Ok(None),
    };
    if let ChildSlot::OnDisk(off) = node.children[idx].slot {
        let db = db.ok_or_else(|| {
            Error::corrupted("in-memory trie references an on-disk child with no database")
        })?;
        let loaded = db.read_node_at(off)?;
        node.children[idx].slot = ChildSlot::Resident(Box::new(loaded));
    }
    match &mut node.children[idx].slot {
        ChildSlot::Resident(b) => Ok(Some(b.as_mut())),
        ChildSlot::OnDisk(_) => unreachable!("just faulted"),
    }
}

/// Insert or overwrite `value` at `key`, starting the walk at `node`. See the module docs and
/// the engine's insert case breakdown (exact match / split on key-exhausted / recurse-or-attach
/// on prefix-exhausted / three-way split on divergence).
pub(crate) fn insert(
    db: Option<&Database>,
    arena: &mut Arena,
    node: &mut Node,
    key: &[u8],
    value: &[u8],
) -> Result<()> {
    let cp = common_prefix_len(key, &node.prefix);

    if cp == node.prefix.len() {
        if cp == key.len() {
            // Exact match at this node.
            let same_len_nonzero = node.has_value()
                && node.value.as_ref().map_or(false, |old| old.len() == value.len())
                && !value.is_empty();
            if same_len_nonzero {
                // Case 1: overwrite in place. The only allowed in-place mutation in the engine.
                node.value = Some(value.to_vec());
            } else {
                // Case 2: value absent or changed length.
                arena.reserve(value.len())?;
                node.set_value(Some(value.to_vec()));
            }
            node.disk_off = None;
            return Ok(());
        }

        // Case 4: node's prefix fully consumed, key has a leftover symbol + tail.
        let rest = &key[cp..];
        let sym = rest[0];
        let tail = &rest[1..];
        match fault_in(db, node, sym)? {
            Some(child) => insert(db, arena, child, tail, value)?,
            None => {
                arena.reserve(estimate_node_bytes(tail.len(), value.len(), 0))?;
                let leaf = Node::leaf(tail.to_vec(), value.to_vec());
                node.set_child(sym, ChildSlot::Resident(Box::new(leaf)));
            }
        }
        node.disk_off = None;
        return Ok(());
    }

    // cp < node.prefix.len(): the edge must be split.
    arena.reserve(estimate_node_bytes(cp, 0, 0))?;
    let old = std::mem::replace(node, Node::empty());

    if cp == key.len() {
        // Case 3: key exhausted mid-prefix.
        let old_sym = old.prefix[cp];
        let rest_node = Node {
            flags: old.flags,
            prefix: old.prefix[cp + 1..].to_vec(),
            value: old.value,
            meta: old.meta,
            children: old.children,
            disk_off: None,
        };
        let mut new_root = Node::leaf(old.prefix[..cp].to_vec(), value.to_vec());
        new_root.children.push(Child {
            symbol: old_sym,
            slot: ChildSlot::Resident(Box::new(rest_node)),
        });
        *node = new_root;
        return Ok(());
    }

    // Case 5: prefix diverges at position `cp`.
    let common = old.prefix[..cp].to_vec();
    let old_sym = old.prefix[cp];
    let rest_old = Node {
        flags: old.flags,
        prefix: old.prefix[cp + 1..].to_vec(),
        value: old.value,
        meta: old.meta,
        children: old.children,
        disk_off: None,
    };
    let new_sym = key[cp];
    arena.reserve(estimate_node_bytes(key.len() - cp - 1, value.len(), 0))?;
    let rest_key_leaf = Node::leaf(key[cp + 1..].to_vec(), value.to_vec());

    let mut new_root = Node::empty();
    new_root.prefix = common;
    new_root.set_child(old_sym, ChildSlot::Resident(Box::new(rest_old)));
    new_root.set_child(new_sym, ChildSlot::Resident(Box::new(rest_key_leaf)));
    *node = new_root;
    Ok(())
}

/// Look up `key` starting at `node`, faulting in on-disk children as needed.
pub(crate) fn get_value<'n>(
    db: Option<&Database>,
    node: &'n mut Node,
    key: &[u8],
) -> Result<Option<&'n [u8]>> {
    let cp = common_prefix_len(key, &node.prefix);
    if cp < node.prefix.len() {
        return Ok(None);
    }
    let rest = &key[cp..];
    if rest.is_empty() {
        return Ok(if node.has_value() {
            node.value.as_deref()
        } else {
            None
        });
    }
    let sym = rest[0];
    match fault_in(db, node, sym)? {
        Some(child) => get_value(db, child, &rest[1..]),
        None => Ok(None),
    }
}

/// Collapse `node` into its sole remaining child when it carries no value of its own and has
/// exactly one child left, concatenating the two edge labels. A no-op otherwise.
pub(crate) fn maybe_merge_singleton(db: Option<&Database>, node: &mut Node) -> Result<()> {
    if node.has_value() || node.children.len() != 1 {
        return Ok(());
    }
    let sym = node.children[0].symbol;
    if let ChildSlot::OnDisk(off) = node.children[0].slot {
        let db = db.ok_or_else(|| {
            Error::corrupted("in-memory trie references an on-disk child with no database")
        })?;
        let loaded = db.read_node_at(off)?;
        node.children[0].slot = ChildSlot::Resident(Box::new(loaded));
    }
    let child = match node.children.pop().unwrap().slot {
        ChildSlot::Resident(b) => *b,
        ChildSlot::OnDisk(_) => unreachable!("just faulted"),
    };

    let mut merged_prefix = std::mem::take(&mut node.prefix);
    merged_prefix.push(sym);
    merged_prefix.extend_from_slice(&child.prefix);

    node.prefix = merged_prefix;
    node.flags = child.flags;
    node.value = child.value;
    node.meta = child.meta;
    node.children = child.children;
    node.disk_off = None;
    Ok(())
}

/// Delete the key reached by descending from `node` via `rest`, where `node`'s own prefix has
/// already matched the byte(s) leading up to `rest`. `node` is never itself the matched node
/// here: that case (the root with no parent) is handled by [`delete_at_root`].
fn delete_rec(db: Option<&Database>, node: &mut Node, rest: &[u8], del_pfx: bool) -> Result<()> {
    let sym = rest[0];
    let child_rest = &rest[1..];

    let (child_cp, child_prefix_len) = {
        let child = match fault_in(db, node, sym)? {
            Some(c) => c,
            None => return Err(Error::NotFound),
        };
        (common_prefix_len(child_rest, &child.prefix), child.prefix.len())
    };
    if child_cp < child_prefix_len {
        return Err(Error::NotFound);
    }
    let child_key_rest = &child_rest[child_cp..];

    if child_key_rest.is_empty() {
        // `sym`'s child is the exact match; `node` is its parent and owns the slot to remove.
        let (child_has_value, child_is_leaf) = match node.get_child(sym) {
            Some(c) => match &c.slot {
                ChildSlot::Resident(b) => (b.has_value(), b.is_leaf()),
                ChildSlot::OnDisk(_) => unreachable!("faulted above"),
            },
            None => unreachable!("faulted above"),
        };

        if del_pfx {
            node.remove_child(sym);
        } else if child_has_value {
            if child_is_leaf {
                node.remove_child(sym);
            } else if let Some(c) = node.get_child_mut(sym) {
                if let ChildSlot::Resident(b) = &mut c.slot {
                    b.set_value(None);
                    maybe_merge_singleton(db, b.as_mut())?;
                }
            }
        } else {
            return Err(Error::NotFound);
        }
        node.disk_off = None;
        maybe_merge_singleton(db, node)?;
        Ok(())
    } else {
        let child = match node.get_child_mut(sym) {
            Some(c) => match &mut c.slot {
                ChildSlot::Resident(b) => b.as_mut(),
                ChildSlot::OnDisk(_) => unreachable!("faulted above"),
            },
            None => unreachable!("faulted above"),
        };
        delete_rec(db, child, child_key_rest, del_pfx)?;
        node.disk_off = None;
        Ok(())
    }
}

/// Delete `key` from the trie rooted at `root`, which has no parent: a match at `root` itself
/// is replaced with a fresh empty node rather than detached, since there is no parent slot to
/// clear.
pub(crate) fn delete_at_root(
    db: Option<&Database>,
    root: &mut Node,
    key: &[u8],
    del_pfx: bool,
) -> Result<()> {
    let cp = common_prefix_len(key, &root.prefix);
    if cp < root.prefix.len() {
        return Err(Error::NotFound);
    }
    let rest = &key[cp..];
    if rest.is_empty() {
        if del_pfx {
            *root = Node::empty();
        } else if root.has_value() {
            root.set_value(None);
            maybe_merge_singleton(db, root)?;
        } else {
            return Err(Error::NotFound);
        }
        root.disk_off = None;
        return Ok(());
    }
    delete_rec(db, root, rest, del_pfx)?;
    root.disk_off = None;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;
    use crate::options::ArenaMode;

    fn new_arena() -> Arena {
        Arena::new(ArenaMode::Dynamic { limit: None }, None, true)
    }

    #[test]
    fn insert_then_get_exact_match() {
        let mut arena = new_arena();
        let mut root = Node::empty();
        insert(None, &mut arena, &mut root, b"a", b"1").unwrap();
        insert(None, &mut arena, &mut root, b"ab", b"2").unwrap();
        insert(None, &mut arena, &mut root, b"abc", b"3").unwrap();

        assert_eq!(get_value(None, &mut root, b"a").unwrap(), Some(&b"1"[..]));
        assert_eq!(get_value(None, &mut root, b"ab").unwrap(), Some(&b"2"[..]));
        assert_eq!(get_value(None, &mut root, b"abc").unwrap(), Some(&b"3"[..]));
        assert_eq!(get_value(None, &mut root, b"abcd").unwrap(), None);
    }

    #[test]
    fn insert_splits_on_divergence() {
        let mut arena = new_arena();
        let mut root = Node::empty();
        insert(None, &mut arena, &mut root, b"abcd", b"X").unwrap();
        insert(None, &mut arena, &mut root, b"abce", b"Y").unwrap();

        assert_eq!(get_value(None, &mut root, b"abcd").unwrap(), Some(&b"X"[..]));
        assert_eq!(get_value(None, &mut root, b"abce").unwrap(), Some(&b"Y"[..]));
        assert_eq!(get_value(None, &mut root, b"abc").unwrap(), None);
    }

    #[test]
    fn overwrite_different_length_replaces_value() {
        let mut arena = new_arena();
        let mut root = Node::empty();
        insert(None, &mut arena, &mut root, b"k", b"v1").unwrap();
        insert(None, &mut arena, &mut root, b"k", b"v22").unwrap();
        assert_eq!(get_value(None, &mut root, b"k").unwrap(), Some(&b"v22"[..]));
    }

    #[test]
    fn delete_exact_removes_only_that_key() {
        let mut arena = new_arena();
        let mut root = Node::empty();
        insert(None, &mut arena, &mut root, b"foo1", b"a").unwrap();
        insert(None, &mut arena, &mut root, b"foo2", b"b").unwrap();
        insert(None, &mut arena, &mut root, b"bar", b"c").unwrap();

        delete_at_root(None, &mut root, b"foo1", false).unwrap();
        assert_eq!(get_value(None, &mut root, b"foo1").unwrap(), None);
        assert_eq!(get_value(None, &mut root, b"foo2").unwrap(), Some(&b"b"[..]));
        assert_eq!(get_value(None, &mut root, b"bar").unwrap(), Some(&b"c"[..]));
    }

    #[test]
    fn delete_prefix_removes_whole_subtree() {
        let mut arena = new_arena();
        let mut root = Node::empty();
        insert(None, &mut arena, &mut root, b"foo1", b"a").unwrap();
        insert(None, &mut arena, &mut root, b"foo2", b"b").unwrap();
        insert(None, &mut arena, &mut root, b"bar", b"c").unwrap();

        delete_at_root(None, &mut root, b"foo", true).unwrap();
        assert_eq!(get_value(None, &mut root, b"foo1").unwrap(), None);
        assert_eq!(get_value(None, &mut root, b"foo2").unwrap(), None);
        assert_eq!(get_value(None, &mut root, b"bar").unwrap(), Some(&b"c"[..]));
    }

    #[test]
    fn delete_missing_key_is_not_found() {
        let mut arena = new_arena();
        let mut root = Node::empty();
        insert(None, &mut arena, &mut root, b"a", b"1").unwrap();
        assert!(matches!(
            delete_at_root(None, &mut root, b"zzz", false),
            Err(Error::NotFound)
        ));
    }

    #[test]
    fn delete_merges_singleton_parent_with_child() {
        let mut arena = new_arena();
        let mut root = Node::empty();
        insert(None, &mut arena, &mut root, b"abc", b"1").unwrap();
        insert(None, &mut arena, &mut root, b"abcd", b"2").unwrap();

        // deleting "abc" leaves a value-less node with a single child ("d") which must merge
        // away; this is externally observable only via get/traversal still working correctly.
        delete_at_root(None, &mut root, b"abc", false).unwrap();
        assert_eq!(get_value(None, &mut root, b"abc").unwrap(), None);
        assert_eq!(get_value(None, &mut root, b"abcd").unwrap(), Some(&b"2"[..]));

        // After the merge, deleting the remaining key should collapse the trie to one empty
        // root node rather than leaving a dangling internal branch.
        delete_at_root(None, &mut root, b"abcd", false).unwrap();
        assert_eq!(get_value(None, &mut root, b"abcd").unwrap(), None);
        assert!(root.children.is_empty());
        assert!(!root.has_value());
    }

    #[test]
    fn put_idempotent_same_value() {
        let mut arena = new_arena();
        let mut root = Node::empty();
        insert(None, &mut arena, &mut root, b"k", b"v").unwrap();
        insert(None, &mut arena, &mut root, b"k", b"v").unwrap();
        assert_eq!(get_value(None, &mut root, b"k").unwrap(), Some(&b"v"[..]));
    }
}
