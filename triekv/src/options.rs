/// The node arena mode a freshly created [`crate::Transaction`] uses.
///
/// Mirrors the engine's two allocator strategies: `Dynamic` allocates each node individually
/// and tracks usage against an optional ceiling, while `FixedSlab` enforces a hard ceiling
/// meant to model a single pre-reserved, bump-allocated buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArenaMode {
    /// Each node is allocated individually. `limit` is an optional ceiling on total bytes
    /// estimated to be in use; `None` means unbounded.
    Dynamic {
        /// Optional ceiling on cumulative allocation, in bytes.
        limit: Option<usize>,
    },
    /// A single fixed ceiling, modeling a pre-reserved slab. Exceeding it fails with
    /// [`crate::Error::OutOfMemory`] the same way a bump allocator running off the end of its
    /// buffer would.
    FixedSlab {
        /// The hard ceiling, in bytes.
        limit: usize,
    },
}

impl Default for ArenaMode {
    fn default() -> Self {
        ArenaMode::Dynamic { limit: None }
    }
}

/// File-open behavior used by [`crate::Database::open`].
#[derive(Clone, Copy, Debug)]
pub struct OpenFlags {
    /// Create the file if it does not already exist.
    pub create: bool,
    /// Unix file mode used when creating the file.
    pub mode: u32,
}

impl Default for OpenFlags {
    fn default() -> Self {
        OpenFlags {
            create: true,
            mode: 0o644,
        }
    }
}

/// Tunables for a [`crate::Database`] and the transactions it spawns.
///
/// Constructed with [`Options::new`] and configured with the builder methods, then consumed by
/// [`crate::Database::open`].
#[derive(Clone, Debug)]
pub struct Options {
    pub(crate) write_buf_limit: Option<usize>,
    pub(crate) write_buf_dynalloc: bool,
    pub(crate) tr_buf_limit: Option<usize>,
    pub(crate) tr_buf_dynalloc: bool,
    pub(crate) open_flags: OpenFlags,
    pub(crate) arena_mode: ArenaMode,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            write_buf_limit: None,
            write_buf_dynalloc: true,
            tr_buf_limit: None,
            tr_buf_dynalloc: true,
            open_flags: OpenFlags::default(),
            arena_mode: ArenaMode::default(),
        }
    }
}

impl Options {
    /// Start from the default configuration.
    pub fn new() -> Self {
        Options::default()
    }

    /// Cap the commit write buffer at `limit` bytes. A commit whose serialized transaction
    /// would exceed this fails with [`crate::Error::OutOfMemory`].
    pub fn write_buf_limit(mut self, limit: usize) -> Self {
        self.write_buf_limit = Some(limit);
        self
    }

    /// Whether the write buffer may grow past its initial capacity estimate.
    pub fn write_buf_dynalloc(mut self, allow: bool) -> Self {
        self.write_buf_dynalloc = allow;
        self
    }

    /// Cap a transaction's node arena at `limit` bytes (dynamic mode only; ignored when
    /// `arena_mode` is `FixedSlab`, whose limit takes precedence).
    pub fn tr_buf_limit(mut self, limit: usize) -> Self {
        self.tr_buf_limit = Some(limit);
        self
    }

    /// Whether a transaction's dynamic-mode arena may keep allocating past its initial
    /// estimate.
    pub fn tr_buf_dynalloc(mut self, allow: bool) -> Self {
        self.tr_buf_dynalloc = allow;
        self
    }

    /// Override the file-open behavior.
    pub fn open_flags(mut self, flags: OpenFlags) -> Self {
        self.open_flags = flags;
        self
    }

    /// Override the arena mode new transactions are created with.
    pub fn arena_mode(mut self, mode: ArenaMode) -> Self {
        self.arena_mode = mode;
        self
    }
}
