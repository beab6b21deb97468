//! The database file handle: open/close/sync, root discovery from the file tail, reading disk
//! nodes, and the commit protocol.

use std::cell::RefCell;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::rc::Rc;

use crate::codec;
use crate::error::{Error, Result};
use crate::footer::{Footer, TxHeader, FOOTER_SIZE, TX_HEADER_SIZE};
use crate::node::{Child, ChildSlot, Node};
use crate::options::Options;
use crate::transaction::{RootState, Transaction};

struct Inner {
    file: File,
    options: Options,
    footer: Option<Footer>,
    file_len: u64,
}

/// A handle to an open database file. Cheaply cloneable (an `Rc` internally): every
/// [`Transaction`] spawned from a `Database` holds its own clone so the file outlives any single
/// transaction.
#[derive(Clone)]
pub struct Database(Rc<RefCell<Inner>>);

/// The fields reported by [`Database::dbinfo`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DbInfo {
    /// Offset of the live root node, or 0 if the database has never been committed to.
    pub root_off: u64,
    /// Start of the current reclaimable gap.
    pub gap_begin: u64,
    /// End of the current reclaimable gap.
    pub gap_end: u64,
}

impl Database {
    /// Open (or create, per `options`) the database file at `path`.
    #[tracing::instrument(skip(options), fields(path = %path.as_ref().display()))]
    pub fn open<P: AsRef<Path>>(path: P, options: Options) -> Result<Database> {
        let mut open_opts = OpenOptions::new();
        open_opts.read(true).write(true);
        if options.open_flags.create {
            open_opts.create(true);
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            open_opts.mode(options.open_flags.mode);
        }
        let mut file = open_opts.open(path.as_ref())?;
        let file_len = file.metadata()?.len();

        let footer = if file_len == 0 {
            None
        } else if file_len < FOOTER_SIZE as u64 {
            return Err(Error::corrupted(
                "file is non-empty but smaller than one footer",
            ));
        } else {
            file.seek(SeekFrom::End(-(FOOTER_SIZE as i64)))?;
            let mut buf = [0u8; FOOTER_SIZE];
            file.read_exact(&mut buf)?;
            Some(Footer::decode(&buf)?)
        };

        tracing::debug!(file_len, has_footer = footer.is_some(), "database opened");
        Ok(Database(Rc::new(RefCell::new(Inner {
            file,
            options,
            footer,
            file_len,
        }))))
    }

    /// Flush any OS-buffered writes to durable storage.
    pub fn sync(&self) -> Result<()> {
        self.0.borrow().file.sync_all()?;
        Ok(())
    }

    /// Explicit close. The file descriptor is also released when the last clone of this handle
    /// is dropped; this method exists so embedders can observe and handle a final I/O error.
    pub fn close(&self) -> Result<()> {
        self.sync()
    }

    /// The live root offset and current reclaimable gap, as of the last commit observed by this
    /// handle.
    pub fn dbinfo(&self) -> DbInfo {
        let inner = self.0.borrow();
        match &inner.footer {
            Some(f) => DbInfo {
                root_off: f.root_off,
                gap_begin: f.gap_begin,
                gap_end: f.gap_end,
            },
            None => DbInfo {
                root_off: 0,
                gap_begin: 0,
                gap_end: 0,
            },
        }
    }

    /// Create a transaction bound to this database. Call [`Transaction::begin`] before using it.
    pub fn transaction(&self) -> Transaction {
        Transaction::new(Some(self.clone()), self.0.borrow().options.clone())
    }

    pub(crate) fn snapshot_root(&self) -> (RootState, u64, u64) {
        let inner = self.0.borrow();
        let root = match &inner.footer {
            None => RootState::Empty,
            Some(f) => RootState::OnDisk(f.root_off),
        };
        let expected_tr_id = inner.footer.as_ref().map_or(1, |f| f.transaction_id + 1);
        (root, expected_tr_id, inner.file_len)
    }

    pub(crate) fn options(&self) -> Options {
        self.0.borrow().options.clone()
    }

    /// Read and decode the node at `off`. Its children are left as on-disk references; they are
    /// faulted in individually on demand.
    pub(crate) fn read_node_at(&self, off: u64) -> Result<Node> {
        let mut inner = self.0.borrow_mut();
        inner.file.seek(SeekFrom::Start(off))?;
        let mut size_buf = [0u8; 4];
        inner.file.read_exact(&mut size_buf)?;
        let size = u32::from_le_bytes(size_buf) as usize;
        let mut buf = vec![0u8; size];
        buf[..4].copy_from_slice(&size_buf);
        inner.file.read_exact(&mut buf[4..])?;

        let (decoded, _) = codec::decode_node(&buf)?;
        Ok(Node {
            flags: decoded.flags,
            prefix: decoded.prefix,
            value: decoded.value,
            meta: decoded.meta,
            children: decoded
                .children
                .into_iter()
                .map(|(symbol, child_off)| Child {
                    symbol,
                    slot: ChildSlot::OnDisk(child_off),
                })
                .collect(),
            disk_off: Some(off),
        })
    }

    /// Run the commit protocol for `root` against this database, per the engine's commit design:
    /// re-read the footer and check for concurrent modification, choose gap-fill vs append
    /// placement, serialize, and write the new transaction block and footer.
    ///
    /// Returns the new root offset and transaction id on success.
    #[tracing::instrument(skip(self, root))]
    pub(crate) fn commit_transaction(
        &self,
        root: &mut Node,
        arena_used: usize,
        expected_tr_id: u64,
        observed_file_len: u64,
    ) -> Result<(u64, u64)> {
        let mut inner = self.0.borrow_mut();

        let fresh_len = inner.file.metadata()?.len();
        if fresh_len != observed_file_len {
            tracing::warn!(fresh_len, observed_file_len, "commit rejected: file size changed");
            return Err(Error::Modified);
        }

        let fresh_footer = if fresh_len == 0 {
            None
        } else {
            inner.file.seek(SeekFrom::End(-(FOOTER_SIZE as i64)))?;
            let mut buf = [0u8; FOOTER_SIZE];
            inner.file.read_exact(&mut buf)?;
            Some(Footer::decode(&buf)?)
        };

        let current_tr_id = fresh_footer.as_ref().map_or(0, |f| f.transaction_id);
        if current_tr_id + 1 != expected_tr_id {
            tracing::warn!(current_tr_id, expected_tr_id, "commit rejected: concurrent commit detected");
            return Err(Error::Modified);
        }

        let (gap_begin, gap_end) = fresh_footer
            .as_ref()
            .map_or((0, 0), |f| (f.gap_begin, f.gap_end));
        let gap_len = gap_end.saturating_sub(gap_begin);
        let use_gap = gap_len >= arena_used as u64 && fresh_footer.is_some();
        let transaction_off = if use_gap { gap_begin } else { fresh_len };

        let mut body = Vec::with_capacity(arena_used);
        let root_off = crate::commit::layout_transaction(root, transaction_off, &mut body)?;

        // `write_buf_limit` is an explicit hard ceiling when given. Otherwise, a caller that
        // disabled `write_buf_dynalloc` has asked the buffer not to grow past the capacity it
        // was given above (the transaction's own arena usage), rather than silently reallocating.
        let effective_write_limit = inner.options.write_buf_limit.or({
            if inner.options.write_buf_dynalloc {
                None
            } else {
                Some(arena_used)
            }
        });
        if let Some(limit) = effective_write_limit {
            if body.len() > limit {
                return Err(Error::OutOfMemory);
            }
        }

        let transaction_size = TX_HEADER_SIZE as u64 + body.len() as u64;
        let footer_off = if use_gap {
            fresh_len - FOOTER_SIZE as u64
        } else {
            transaction_off + transaction_size
        };

        let new_footer = Footer {
            root_off,
            transaction_size,
            transaction_id: expected_tr_id,
            gap_begin: if use_gap { gap_begin + transaction_size } else { gap_begin },
            gap_end,
        };

        let tx_header = TxHeader { footer_off };
        let mut tx_block = Vec::with_capacity(TX_HEADER_SIZE + body.len());
        tx_block.extend_from_slice(&tx_header.encode());
        tx_block.extend_from_slice(&body);

        if use_gap {
            tracing::debug!(transaction_off, transaction_size, "commit reusing reclaimed gap");
        } else {
            tracing::debug!(transaction_off, transaction_size, "commit appending at end of file");
        }

        inner.file.seek(SeekFrom::Start(transaction_off))?;
        write_all_checked(&mut inner.file, &tx_block)?;

        inner.file.seek(SeekFrom::Start(footer_off))?;
        write_all_checked(&mut inner.file, &new_footer.encode())?;
        inner.file.flush()?;

        let new_file_len = (footer_off + FOOTER_SIZE as u64).max(inner.file_len);
        inner.file_len = new_file_len;
        inner.footer = Some(new_footer);

        Ok((root_off, expected_tr_id))
    }

    /// Read the transaction header at `off`, used by vacuum to find the footer that closes out
    /// an older transaction block.
    pub(crate) fn read_tx_header_at(&self, off: u64) -> Result<TxHeader> {
        let mut inner = self.0.borrow_mut();
        inner.file.seek(SeekFrom::Start(off))?;
        let mut buf = [0u8; TX_HEADER_SIZE];
        inner.file.read_exact(&mut buf)?;
        TxHeader::decode(&buf)
    }

    /// Read and decode the footer at `off`.
    pub(crate) fn read_footer_at(&self, off: u64) -> Result<Footer> {
        let mut inner = self.0.borrow_mut();
        inner.file.seek(SeekFrom::Start(off))?;
        let mut buf = [0u8; FOOTER_SIZE];
        inner.file.read_exact(&mut buf)?;
        Footer::decode(&buf)
    }

    /// The absolute offset of this database's current live footer (the last `FOOTER_SIZE` bytes
    /// of the file), if one exists yet.
    pub(crate) fn live_footer_offset(&self) -> Option<u64> {
        let inner = self.0.borrow();
        if inner.footer.is_some() {
            Some(inner.file_len - FOOTER_SIZE as u64)
        } else {
            None
        }
    }

    /// Rewrite the live footer in place with widened gap bounds, leaving every other field
    /// untouched. Used by vacuum once it has committed a replacement for an older transaction
    /// and wants to mark that transaction's old region reclaimable.
    pub(crate) fn extend_gap(&self, new_gap_begin: u64, new_gap_end: u64) -> Result<()> {
        let mut inner = self.0.borrow_mut();
        let mut footer = inner
            .footer
            .ok_or_else(|| Error::corrupted("extend_gap called with no committed footer"))?;
        footer.gap_begin = new_gap_begin;
        footer.gap_end = new_gap_end;
        let footer_off = inner.file_len - FOOTER_SIZE as u64;
        inner.file.seek(SeekFrom::Start(footer_off))?;
        write_all_checked(&mut inner.file, &footer.encode())?;
        inner.file.flush()?;
        inner.footer = Some(footer);
        Ok(())
    }
}

fn write_all_checked(file: &mut File, buf: &[u8]) -> Result<()> {
    file.write_all(buf)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Options;

    #[test]
    fn open_on_empty_file_has_no_footer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");
        let db = Database::open(&path, Options::new()).unwrap();
        assert_eq!(db.dbinfo(), DbInfo { root_off: 0, gap_begin: 0, gap_end: 0 });
    }

    #[test]
    fn open_rejects_short_nonempty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");
        std::fs::write(&path, b"short").unwrap();
        let err = Database::open(&path, Options::new()).unwrap_err();
        assert!(matches!(err, Error::Corrupted(_)));
    }

    #[test]
    fn write_buf_dynalloc_disabled_still_commits_within_the_arena_estimate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");
        let db = Database::open(&path, Options::new().write_buf_dynalloc(false)).unwrap();
        let mut tr = db.transaction();
        tr.begin().unwrap();
        tr.put(b"a", b"1").unwrap();
        tr.put(b"ab", b"2").unwrap();
        tr.commit().unwrap();

        let mut tr = db.transaction();
        tr.begin().unwrap();
        assert_eq!(tr.get(b"ab").unwrap().unwrap().as_bytes(), b"2");
    }

    #[test]
    fn write_buf_limit_overrides_dynalloc_flag() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");
        let db = Database::open(
            &path,
            Options::new().write_buf_dynalloc(true).write_buf_limit(1),
        )
        .unwrap();
        let mut tr = db.transaction();
        tr.begin().unwrap();
        tr.put(b"a", b"1").unwrap();
        assert!(matches!(tr.commit(), Err(Error::OutOfMemory)));
    }
}
