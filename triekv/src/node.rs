bitflags::bitflags! {
    /// Bits set in a node's `type` byte, both in memory and on disk.
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub(crate) struct NodeFlags: u8 {
        const HAS_VALUE = 0b0000_0001;
        const HAS_META  = 0b0000_0010;
    }
}

/// A child slot: either resident in memory or known only by its on-disk offset. Absent
/// children simply have no entry in a node's `children` vector.
#[derive(Debug)]
pub(crate) enum ChildSlot {
    Resident(Box<Node>),
    OnDisk(u64),
}

/// A single child edge, keyed by the first byte of its label. Nodes keep these sorted by
/// `symbol` and binary-search them, which gives the same O(log 256) descent as a flat
/// 256-slot dispatch table without paying for 256 empty slots on every sparse node.
#[derive(Debug)]
pub(crate) struct Child {
    pub(crate) symbol: u8,
    pub(crate) slot: ChildSlot,
}

/// The in-memory radix trie node.
///
/// `prefix`, `value`, and `meta` are kept as separate owned buffers rather than one
/// concatenated inline buffer; Rust's ownership model makes the split free, and nothing
/// observable depends on them sharing storage.
#[derive(Debug)]
pub(crate) struct Node {
    pub(crate) flags: NodeFlags,
    pub(crate) prefix: Vec<u8>,
    pub(crate) value: Option<Vec<u8>>,
    pub(crate) meta: Option<Vec<u8>>,
    pub(crate) children: Vec<Child>,
    /// Set once this exact node has been laid out by a commit and not modified since;
    /// lets a later commit reuse the node's already-known disk location instead of
    /// re-serializing it. Cleared by any mutation that touches the node.
    pub(crate) disk_off: Option<u64>,
}

impl Node {
    pub(crate) fn empty() -> Self {
        Node {
            flags: NodeFlags::empty(),
            prefix: Vec::new(),
            value: None,
            meta: None,
            children: Vec::new(),
            disk_off: None,
        }
    }

    pub(crate) fn leaf(prefix: Vec<u8>, value: Vec<u8>) -> Self {
        Node {
            flags: NodeFlags::HAS_VALUE,
            prefix,
            value: Some(value),
            meta: None,
            children: Vec::new(),
            disk_off: None,
        }
    }

    pub(crate) fn has_value(&self) -> bool {
        self.flags.contains(NodeFlags::HAS_VALUE)
    }

    pub(crate) fn has_meta(&self) -> bool {
        self.flags.contains(NodeFlags::HAS_META)
    }

    pub(crate) fn set_value(&mut self, value: Option<Vec<u8>>) {
        match value {
            Some(v) => {
                self.flags.insert(NodeFlags::HAS_VALUE);
                self.value = Some(v);
            }
            None => {
                self.flags.remove(NodeFlags::HAS_VALUE);
                self.value = None;
            }
        }
        self.disk_off = None;
    }

    pub(crate) fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub(crate) fn child_index(&self, symbol: u8) -> std::result::Result<usize, usize> {
        self.children.binary_search_by_key(&symbol, |c| c.symbol)
    }

    pub(crate) fn get_child(&self, symbol: u8) -> Option<&Child> {
        self.child_index(symbol).ok().map(|i| &self.children[i])
    }

    pub(crate) fn get_child_mut(&mut self, symbol: u8) -> Option<&mut Child> {
        match self.child_index(symbol) {
            Ok(i) => Some(&mut self.children[i]),
            Err(_) => None,
        }
    }

    /// Insert or replace the child at `symbol`. No two children may share a first byte, so an
    /// existing entry is overwritten rather than duplicated.
    pub(crate) fn set_child(&mut self, symbol: u8, slot: ChildSlot) {
        match self.child_index(symbol) {
            Ok(i) => self.children[i].slot = slot,
            Err(i) => self.children.insert(i, Child { symbol, slot }),
        }
        self.disk_off = None;
    }

    pub(crate) fn remove_child(&mut self, symbol: u8) -> Option<Child> {
        match self.child_index(symbol) {
            Ok(i) => {
                self.disk_off = None;
                Some(self.children.remove(i))
            }
            Err(_) => None,
        }
    }

    pub(crate) fn estimate_bytes(&self) -> usize {
        crate::arena::estimate_node_bytes(
            self.prefix.len(),
            self.value.as_ref().map_or(0, Vec::len),
            self.meta.as_ref().map_or(0, Vec::len),
        )
    }
}
