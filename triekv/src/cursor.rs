//! An ordered iterator over a transaction's trie: `first`/`last`/`next`/`prev`/`seek`.
//!
//! Rather than holding raw pointers into the tree (which the engine's design expresses as an
//! explicit `(node, child_index)` stack), the cursor remembers the sequence of child symbols
//! taken from the root to reach its current position and re-resolves nodes along that path on
//! demand. This keeps the cursor within ordinary borrow-checked references at the cost of
//! re-walking from the root on every move — acceptable for the key lengths this engine targets
//! (see the bounded descent stack note on depth 128).

use crate::datum::Datum;
use crate::error::{Error, Result};
use crate::node::Node;
use crate::store::Database;
use crate::transaction::{RootState, Transaction};
use crate::trie::fault_in;

/// Depth a cursor's path reserves up front. Growing past it is not an error.
const DESCENT_RESERVE: usize = 128;

/// The match semantics for [`Cursor::seek`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeekMode {
    /// The key must be present exactly.
    Eq,
    /// The smallest visible key greater than or equal to the target.
    Ge,
    /// The largest visible key less than or equal to the target.
    Le,
}

/// An ordered cursor over a [`Transaction`]'s trie.
pub struct Cursor<'t> {
    txn: &'t mut Transaction,
    path_symbols: Vec<u8>,
    valid: bool,
}

fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

fn ensure_resident_root<'a>(root: &'a mut RootState, db: Option<&Database>) -> Result<&'a mut Node> {
    match root {
        RootState::Empty => return Err(Error::Empty),
        RootState::OnDisk(off) => {
            let db = db.ok_or_else(|| Error::corrupted("on-disk root with no database"))?;
            let loaded = db.read_node_at(*off)?;
            *root = RootState::Resident(Box::new(loaded));
        }
        RootState::Resident(_) => {}
    }
    match root {
        RootState::Resident(b) => Ok(b.as_mut()),
        _ => unreachable!(),
    }
}

fn resolve_path<'n>(db: Option<&Database>, root: &'n mut Node, symbols: &[u8]) -> Result<&'n mut Node> {
    let mut node = root;
    for &s in symbols {
        node = fault_in(db, node, s)?
            .ok_or_else(|| Error::corrupted("cursor path symbol does not resolve"))?;
    }
    Ok(node)
}

/// From the node at `symbols`, keep taking the smallest child until a value-bearing node is
/// reached.
fn descend_smallest(db: Option<&Database>, root: &mut Node, symbols: &mut Vec<u8>) -> Result<()> {
    loop {
        let node = resolve_path(db, root, symbols)?;
        if node.has_value() {
            return Ok(());
        }
        let sym = node
            .children
            .first()
            .map(|c| c.symbol)
            .ok_or_else(|| Error::corrupted("valueless leaf with no children"))?;
        symbols.push(sym);
    }
}

/// From the node at `symbols`, keep taking the largest child until a childless node is reached
/// (children always sort after their parent's own value, so the largest key is always found by
/// descending as deep as possible, not by stopping at the first value seen along the way). A
/// childless node with no value of its own is corruption, not a valid terminus.
fn descend_largest(db: Option<&Database>, root: &mut Node, symbols: &mut Vec<u8>) -> Result<()> {
    loop {
        let node = resolve_path(db, root, symbols)?;
        match node.children.last() {
            Some(c) => symbols.push(c.symbol),
            None if node.has_value() => return Ok(()),
            None => return Err(Error::corrupted("valueless leaf with no children")),
        }
    }
}

/// Move `symbols` to the in-order successor of the subtree it currently names, treating that
/// entire subtree (including any children) as already visited.
fn next_after_subtree(db: Option<&Database>, root: &mut Node, symbols: &mut Vec<u8>) -> Result<bool> {
    while let Some(last_sym) = symbols.pop() {
        let parent = resolve_path(db, root, symbols)?;
        let idx = parent
            .child_index(last_sym)
            .unwrap_or_else(|_| panic!("path symbol must exist in its parent"));
        if idx + 1 < parent.children.len() {
            let next_sym = parent.children[idx + 1].symbol;
            symbols.push(next_sym);
            descend_smallest(db, root, symbols)?;
            return Ok(true);
        }
    }
    Ok(false)
}

/// Move `symbols` to the in-order predecessor of the subtree it currently names, treating that
/// entire subtree as already visited (so a previous sibling's value is never skipped over).
fn prev_after_subtree(db: Option<&Database>, root: &mut Node, symbols: &mut Vec<u8>) -> Result<bool> {
    while let Some(last_sym) = symbols.pop() {
        let parent = resolve_path(db, root, symbols)?;
        let idx = parent
            .child_index(last_sym)
            .unwrap_or_else(|_| panic!("path symbol must exist in its parent"));
        if idx > 0 {
            let prev_sym = parent.children[idx - 1].symbol;
            symbols.push(prev_sym);
            descend_largest(db, root, symbols)?;
            return Ok(true);
        }
        if parent.has_value() {
            return Ok(true);
        }
    }
    Ok(false)
}

impl<'t> Cursor<'t> {
    /// Create a cursor over `txn`'s current trie. The cursor starts invalid; call `first`,
    /// `last`, or `seek` before reading its key/value.
    pub fn new(txn: &'t mut Transaction) -> Self {
        Cursor {
            txn,
            path_symbols: Vec::with_capacity(DESCENT_RESERVE),
            valid: false,
        }
    }

    /// Move to the lexicographically smallest key.
    pub fn first(&mut self) -> Result<()> {
        let db = self.txn.db().cloned();
        let root = ensure_resident_root(self.txn.root_mut(), db.as_ref())?;
        self.path_symbols.clear();
        self.valid = false;
        if root.children.is_empty() && !root.has_value() {
            return Err(Error::Empty);
        }
        descend_smallest(db.as_ref(), root, &mut self.path_symbols)?;
        self.valid = true;
        Ok(())
    }

    /// Move to the lexicographically largest key.
    pub fn last(&mut self) -> Result<()> {
        let db = self.txn.db().cloned();
        let root = ensure_resident_root(self.txn.root_mut(), db.as_ref())?;
        self.path_symbols.clear();
        self.valid = false;
        if root.children.is_empty() && !root.has_value() {
            return Err(Error::Empty);
        }
        descend_largest(db.as_ref(), root, &mut self.path_symbols)?;
        self.valid = true;
        Ok(())
    }

    /// Move to the next key in order.
    pub fn next(&mut self) -> Result<()> {
        if !self.valid {
            return Err(Error::NotFound);
        }
        let db = self.txn.db().cloned();
        let root = ensure_resident_root(self.txn.root_mut(), db.as_ref())?;

        let has_children = !resolve_path(db.as_ref(), root, &self.path_symbols)?
            .children
            .is_empty();
        if has_children {
            let sym = resolve_path(db.as_ref(), root, &self.path_symbols)?.children[0].symbol;
            self.path_symbols.push(sym);
            descend_smallest(db.as_ref(), root, &mut self.path_symbols)?;
            return Ok(());
        }

        if next_after_subtree(db.as_ref(), root, &mut self.path_symbols)? {
            Ok(())
        } else {
            self.valid = false;
            Err(Error::NotFound)
        }
    }

    /// Move to the previous key in order.
    pub fn prev(&mut self) -> Result<()> {
        if !self.valid {
            return Err(Error::NotFound);
        }
        let db = self.txn.db().cloned();
        let root = ensure_resident_root(self.txn.root_mut(), db.as_ref())?;

        if prev_after_subtree(db.as_ref(), root, &mut self.path_symbols)? {
            Ok(())
        } else {
            self.valid = false;
            Err(Error::NotFound)
        }
    }

    /// Seek to `key` under the given [`SeekMode`].
    pub fn seek(&mut self, key: &[u8], mode: SeekMode) -> Result<()> {
        let db = self.txn.db().cloned();
        let root = ensure_resident_root(self.txn.root_mut(), db.as_ref())?;

        let mut symbols: Vec<u8> = Vec::with_capacity(DESCENT_RESERVE);
        let mut rest = key;
        self.valid = false;

        loop {
            let (cp, prefix_len, has_value) = {
                let node = resolve_path(db.as_ref(), root, &symbols)?;
                (
                    common_prefix_len(rest, &node.prefix),
                    node.prefix.len(),
                    node.has_value(),
                )
            };

            if cp == prefix_len && cp == rest.len() {
                if has_value {
                    self.path_symbols = symbols;
                    self.valid = true;
                    return Ok(());
                }
                return match mode {
                    SeekMode::Eq => Err(Error::NotFound),
                    SeekMode::Ge => {
                        self.path_symbols = symbols;
                        descend_smallest(db.as_ref(), root, &mut self.path_symbols)?;
                        self.valid = true;
                        Ok(())
                    }
                    SeekMode::Le => {
                        self.path_symbols = symbols;
                        if prev_after_subtree(db.as_ref(), root, &mut self.path_symbols)? {
                            self.valid = true;
                            Ok(())
                        } else {
                            Err(Error::NotFound)
                        }
                    }
                };
            }

            if cp == prefix_len {
                let sym = rest[cp];
                let child_present = {
                    let node = resolve_path(db.as_ref(), root, &symbols)?;
                    fault_in(db.as_ref(), node, sym)?.is_some()
                };
                if child_present {
                    symbols.push(sym);
                    rest = &rest[cp + 1..];
                    continue;
                }

                let ins = {
                    let node = resolve_path(db.as_ref(), root, &symbols)?;
                    node.child_index(sym).unwrap_err()
                };
                self.path_symbols = symbols;
                return match mode {
                    SeekMode::Eq => Err(Error::NotFound),
                    SeekMode::Ge => {
                        let at_end = {
                            let node = resolve_path(db.as_ref(), root, &self.path_symbols)?;
                            ins >= node.children.len()
                        };
                        if at_end {
                            if next_after_subtree(db.as_ref(), root, &mut self.path_symbols)? {
                                self.valid = true;
                                Ok(())
                            } else {
                                Err(Error::NotFound)
                            }
                        } else {
                            let child_sym = {
                                let node = resolve_path(db.as_ref(), root, &self.path_symbols)?;
                                node.children[ins].symbol
                            };
                            self.path_symbols.push(child_sym);
                            descend_smallest(db.as_ref(), root, &mut self.path_symbols)?;
                            self.valid = true;
                            Ok(())
                        }
                    }
                    SeekMode::Le => {
                        if ins > 0 {
                            let child_sym = {
                                let node = resolve_path(db.as_ref(), root, &self.path_symbols)?;
                                node.children[ins - 1].symbol
                            };
                            self.path_symbols.push(child_sym);
                            descend_largest(db.as_ref(), root, &mut self.path_symbols)?;
                            self.valid = true;
                            Ok(())
                        } else if prev_after_subtree(db.as_ref(), root, &mut self.path_symbols)? {
                            self.valid = true;
                            Ok(())
                        } else {
                            Err(Error::NotFound)
                        }
                    }
                };
            }

            // cp < prefix_len: divergence inside this node's own prefix.
            let node_byte = {
                let node = resolve_path(db.as_ref(), root, &symbols)?;
                node.prefix[cp]
            };
            let key_byte = rest.get(cp).copied();
            let key_is_smaller = key_byte.map_or(true, |kb| kb < node_byte);
            self.path_symbols = symbols;

            return match mode {
                SeekMode::Eq => Err(Error::NotFound),
                SeekMode::Ge => {
                    if key_is_smaller {
                        descend_smallest(db.as_ref(), root, &mut self.path_symbols)?;
                        self.valid = true;
                        Ok(())
                    } else if next_after_subtree(db.as_ref(), root, &mut self.path_symbols)? {
                        self.valid = true;
                        Ok(())
                    } else {
                        Err(Error::NotFound)
                    }
                }
                SeekMode::Le => {
                    if key_is_smaller {
                        if prev_after_subtree(db.as_ref(), root, &mut self.path_symbols)? {
                            self.valid = true;
                            Ok(())
                        } else {
                            Err(Error::NotFound)
                        }
                    } else {
                        descend_largest(db.as_ref(), root, &mut self.path_symbols)?;
                        self.valid = true;
                        Ok(())
                    }
                }
            };
        }
    }

    /// The full key at the cursor's current position.
    pub fn key(&mut self) -> Result<Vec<u8>> {
        if !self.valid {
            return Err(Error::NotFound);
        }
        let db = self.txn.db().cloned();
        let root = ensure_resident_root(self.txn.root_mut(), db.as_ref())?;
        let mut key = root.prefix.clone();
        let mut node: &mut Node = root;
        for &s in &self.path_symbols {
            node = fault_in(db.as_ref(), node, s)?
                .ok_or_else(|| Error::corrupted("cursor path symbol does not resolve"))?;
            key.push(s);
            key.extend_from_slice(&node.prefix);
        }
        Ok(key)
    }

    /// The length of the key at the cursor's current position.
    pub fn keysize(&mut self) -> Result<usize> {
        Ok(self.key()?.len())
    }

    /// The value at the cursor's current position.
    pub fn val(&mut self) -> Result<Datum<'_>> {
        if !self.valid {
            return Err(Error::NotFound);
        }
        let db = self.txn.db().cloned();
        let root = ensure_resident_root(self.txn.root_mut(), db.as_ref())?;
        let node = resolve_path(db.as_ref(), root, &self.path_symbols)?;
        node.value
            .as_deref()
            .map(Datum::new)
            .ok_or(Error::NotFound)
    }

    /// The length of the value at the cursor's current position.
    pub fn valsize(&mut self) -> Result<usize> {
        Ok(self.val()?.len())
    }
}
