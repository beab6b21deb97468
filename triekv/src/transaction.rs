//! The transaction lifecycle: `begin` snapshots the live root, mutating calls build on top of
//! it in memory, and `commit`/`rollback` return the transaction to idle.

use crate::arena::Arena;
use crate::datum::Datum;
use crate::error::{Error, Result};
use crate::node::Node;
use crate::options::Options;
use crate::store::Database;
use crate::trie;

/// Where a transaction's root currently lives.
pub(crate) enum RootState {
    /// Nothing has ever been committed (or inserted, for a RAM-only transaction); there is no
    /// node at all yet.
    Empty,
    /// Known only by its on-disk offset; not yet faulted into memory.
    OnDisk(u64),
    /// Resident in memory, possibly with further on-disk children beneath it.
    Resident(Box<Node>),
}

/// A mutation unit over the trie.
///
/// Created idle via [`Database::transaction`] (or [`Transaction::new_ram_only`] for a database-
/// less, purely in-memory instance); [`begin`](Transaction::begin) marks it started, after which
/// [`put`](Transaction::put)/[`get`](Transaction::get)/[`del`](Transaction::del) are permitted.
/// `commit` or `rollback` returns it to idle; a transaction may be reused many times by calling
/// `begin` again.
pub struct Transaction {
    db: Option<Database>,
    options: Options,
    root: RootState,
    started: bool,
    arena: Arena,
    expected_tr_id: u64,
    observed_file_len: u64,
}

impl Transaction {
    pub(crate) fn new(db: Option<Database>, options: Options) -> Self {
        let arena = Arena::new(options.arena_mode, options.tr_buf_limit, options.tr_buf_dynalloc);
        Transaction {
            db,
            options,
            root: RootState::Empty,
            started: false,
            arena,
            expected_tr_id: 0,
            observed_file_len: 0,
        }
    }

    /// Create a standalone transaction with no backing database: a purely in-memory trie that
    /// can never be committed to disk.
    pub fn new_ram_only(options: Options) -> Self {
        Transaction::new(None, options)
    }

    /// Mark this transaction started, snapshotting the database's current root (if any) and the
    /// file state used by the `MODIFIED` check at commit time.
    pub fn begin(&mut self) -> Result<()> {
        self.arena = Arena::new(
            self.options.arena_mode,
            self.options.tr_buf_limit,
            self.options.tr_buf_dynalloc,
        );
        match &self.db {
            None => {
                self.root = RootState::Empty;
            }
            Some(db) => {
                let (root, expected_tr_id, observed_file_len) = db.snapshot_root();
                self.root = root;
                self.expected_tr_id = expected_tr_id;
                self.observed_file_len = observed_file_len;
            }
        }
        self.started = true;
        Ok(())
    }

    fn require_started(&self) -> Result<()> {
        if self.started {
            Ok(())
        } else {
            Err(Error::NotStarted)
        }
    }

    /// Insert or overwrite `value` at `key`.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.require_started()?;
        let db = self.db.clone();
        let root = ensure_root(&mut self.root, db.as_ref(), &mut self.arena)?;
        trie::insert(db.as_ref(), &mut self.arena, root, key, value)
    }

    /// Look up `key`. Returns `Ok(None)` if absent.
    pub fn get(&mut self, key: &[u8]) -> Result<Option<Datum<'_>>> {
        self.require_started()?;
        let db = self.db.clone();
        let node = match &mut self.root {
            RootState::Empty => return Ok(None),
            RootState::OnDisk(off) => {
                let loaded = db
                    .as_ref()
                    .expect("on-disk root implies a database")
                    .read_node_at(*off)?;
                self.root = RootState::Resident(Box::new(loaded));
                match &mut self.root {
                    RootState::Resident(b) => b.as_mut(),
                    _ => unreachable!(),
                }
            }
            RootState::Resident(b) => b.as_mut(),
        };
        let found = trie::get_value(db.as_ref(), node, key)?;
        Ok(found.map(Datum::new))
    }

    /// Delete `key`. If `del_pfx` is set, every key with `key` as a byte prefix is removed
    /// instead of requiring an exact match.
    pub fn del(&mut self, key: &[u8], del_pfx: bool) -> Result<()> {
        self.require_started()?;
        let db = self.db.clone();
        let root = match &mut self.root {
            RootState::Empty => return Err(Error::NotFound),
            RootState::OnDisk(off) => {
                let loaded = db
                    .as_ref()
                    .expect("on-disk root implies a database")
                    .read_node_at(*off)?;
                self.root = RootState::Resident(Box::new(loaded));
                match &mut self.root {
                    RootState::Resident(b) => b.as_mut(),
                    _ => unreachable!(),
                }
            }
            RootState::Resident(b) => b.as_mut(),
        };
        trie::delete_at_root(db.as_ref(), root, key, del_pfx)
    }

    /// Commit this transaction's mutations. A RAM-only transaction (no database) simply resets.
    /// On any failure the in-memory trie is still reset: a failed commit consumes the
    /// transaction the same way a successful one does, so callers must rebuild their mutations
    /// before retrying.
    pub fn commit(&mut self) -> Result<()> {
        self.require_started()?;
        let result = match &self.db {
            None => Ok(()),
            Some(db) => {
                let root = materialize_root(&mut self.root, Some(db))?;
                db.commit_transaction(
                    root,
                    self.arena.used(),
                    self.expected_tr_id,
                    self.observed_file_len,
                )
                .map(|_| ())
            }
        };
        self.arena.reset();
        self.root = RootState::Empty;
        self.started = false;
        result
    }

    /// Discard this transaction's mutations without writing anything.
    pub fn rollback(&mut self) -> Result<()> {
        self.require_started()?;
        self.arena.reset();
        self.root = RootState::Empty;
        self.started = false;
        Ok(())
    }

    pub(crate) fn db(&self) -> Option<&Database> {
        self.db.as_ref()
    }

    pub(crate) fn root_mut(&mut self) -> &mut RootState {
        &mut self.root
    }

    pub(crate) fn options(&self) -> &Options {
        &self.options
    }
}

fn ensure_root<'a>(
    root: &'a mut RootState,
    db: Option<&Database>,
    arena: &mut Arena,
) -> Result<&'a mut Node> {
    match root {
        RootState::Empty => {
            arena.reserve(Node::empty().estimate_bytes())?;
            *root = RootState::Resident(Box::new(Node::empty()));
        }
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

/// Ensure the root is resident, materializing a fresh empty node if nothing has ever been
/// inserted (so commit always has a concrete node to point `root_off` at).
fn materialize_root<'a>(root: &'a mut RootState, db: Option<&Database>) -> Result<&'a mut Node> {
    match root {
        RootState::Empty => {
            *root = RootState::Resident(Box::new(Node::empty()));
        }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Options;

    #[test]
    fn ram_only_get_never_touches_database() {
        let mut txn = Transaction::new_ram_only(Options::new());
        txn.begin().unwrap();
        // No prior put: this must return NotFound-as-None without dereferencing `db`, which is
        // `None` here — the point of the test is that this does not panic.
        assert_eq!(txn.get(b"anything").unwrap(), None);
    }

    #[test]
    fn operations_before_begin_are_rejected() {
        let mut txn = Transaction::new_ram_only(Options::new());
        assert!(matches!(txn.get(b"k"), Err(Error::NotStarted)));
        assert!(matches!(txn.put(b"k", b"v"), Err(Error::NotStarted)));
        assert!(matches!(txn.del(b"k", false), Err(Error::NotStarted)));
    }

    #[test]
    fn ram_only_transaction_round_trips_values() {
        let mut txn = Transaction::new_ram_only(Options::new());
        txn.begin().unwrap();
        txn.put(b"a", b"1").unwrap();
        txn.put(b"ab", b"2").unwrap();
        assert_eq!(txn.get(b"a").unwrap().as_deref(), Some(&b"1"[..]));
        assert_eq!(txn.get(b"ab").unwrap().as_deref(), Some(&b"2"[..]));
        txn.commit().unwrap();
        // After commit, the transaction is idle again and must be re-begun.
        assert!(matches!(txn.get(b"a"), Err(Error::NotStarted)));
    }

    #[test]
    fn rollback_discards_mutations() {
        let mut txn = Transaction::new_ram_only(Options::new());
        txn.begin().unwrap();
        txn.put(b"a", b"1").unwrap();
        txn.rollback().unwrap();
        txn.begin().unwrap();
        assert_eq!(txn.get(b"a").unwrap(), None);
    }
}
