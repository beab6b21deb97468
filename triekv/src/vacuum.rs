//! Compaction: rewrite the still-live subset of an older transaction and reclaim its region.
//!
//! Walks the transaction block immediately after the current gap (`vac`), probes each key it
//! contains against the live root (`tr`) to see whether it is still reachable through that old
//! region, reinserts the survivors into a fresh transaction (`tres`), and on success widens the
//! database's gap to cover the space that transaction occupied.

use crate::error::{Error, Result};
use crate::node::Node;
use crate::store::Database;
use crate::trie::fault_in;

/// Bytes reclaimed and keys carried forward by a single [`vacuum`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VacuumStats {
    /// Keys from the old transaction that were still live and got reinserted.
    pub keys_rescued: usize,
    /// Bytes the gap grew by. Zero if there was nothing eligible to vacuum.
    pub bytes_reclaimed: u64,
}

fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

/// Walk `vac`'s trie in key order, collecting `(key, value)` pairs for every value-bearing node
/// whose own disk offset falls inside `[gap_end, old_end)` — the region the transaction being
/// vacuumed occupies. A node outside that range is reused verbatim from an earlier, still-valid
/// transaction, so neither it nor anything beneath it needs inspecting.
fn collect_candidates(
    db: Option<&Database>,
    node: &mut Node,
    prefix: &mut Vec<u8>,
    gap_end: u64,
    old_end: u64,
    out: &mut Vec<(Vec<u8>, Vec<u8>)>,
) -> Result<()> {
    let base_len = prefix.len();
    prefix.extend_from_slice(&node.prefix);

    let in_range = node
        .disk_off
        .map_or(true, |off| off >= gap_end && off < old_end);
    if in_range {
        if node.has_value() {
            let value = node.value.clone().expect("has_value implies a value");
            out.push((prefix.clone(), value));
        }
        let symbols: Vec<u8> = node.children.iter().map(|c| c.symbol).collect();
        for sym in symbols {
            let child = fault_in(db, node, sym)?.expect("symbol read from this node's own table");
            prefix.push(sym);
            collect_candidates(db, child, prefix, gap_end, old_end, out)?;
            prefix.pop();
        }
    }

    prefix.truncate(base_len);
    Ok(())
}

/// Walk from `node` (the live root) to `key`, checking at each hop whether the node's disk
/// offset falls inside `[gap_end, old_end)`. Returns `true` as soon as one does: that is enough
/// to prove the old region is still referenced from live state, regardless of how the rest of
/// the path resolves. Returns `false` if the walk cannot be completed (the key is gone or moved
/// entirely onto fresher nodes).
fn probe_reachable(
    db: Option<&Database>,
    node: &mut Node,
    key: &[u8],
    gap_end: u64,
    old_end: u64,
) -> Result<bool> {
    if let Some(off) = node.disk_off {
        if off >= gap_end && off < old_end {
            return Ok(true);
        }
    }
    let cp = common_prefix_len(key, &node.prefix);
    if cp < node.prefix.len() {
        return Ok(false);
    }
    let rest = &key[cp..];
    if rest.is_empty() {
        return Ok(false);
    }
    let sym = rest[0];
    match fault_in(db, node, sym)? {
        Some(child) => probe_reachable(db, child, &rest[1..], gap_end, old_end),
        None => Ok(false),
    }
}

/// Run one round of vacuum against `db`: rewrite the transaction immediately following the
/// current gap and extend the gap to cover it.
///
/// A no-op (returning zero stats) when there is nothing eligible: an empty database, or a gap
/// that already runs up to the live transaction (nothing older left to reclaim).
pub fn vacuum(db: &Database) -> Result<VacuumStats> {
    let info = db.dbinfo();
    let live_footer_off = match db.live_footer_offset() {
        Some(off) => off,
        None => return Ok(VacuumStats { keys_rescued: 0, bytes_reclaimed: 0 }),
    };

    let old_tr_off = info.gap_end;
    let old_header = match db.read_tx_header_at(old_tr_off) {
        Ok(h) => h,
        Err(_) => return Ok(VacuumStats { keys_rescued: 0, bytes_reclaimed: 0 }),
    };
    if old_header.footer_off >= live_footer_off {
        // The block right after the gap is the current live transaction; nothing older to
        // reclaim.
        return Ok(VacuumStats { keys_rescued: 0, bytes_reclaimed: 0 });
    }
    let old_footer = db.read_footer_at(old_header.footer_off)?;
    let old_tr_size = old_footer.transaction_size;
    let old_end = old_tr_off + old_tr_size;

    let mut vac_root = db.read_node_at(old_footer.root_off)?;
    let mut candidates = Vec::new();
    collect_candidates(Some(db), &mut vac_root, &mut Vec::new(), info.gap_end, old_end, &mut candidates)?;

    let mut tr = db.transaction();
    tr.begin()?;
    let mut rescued = Vec::new();
    for (key, value) in candidates {
        if probe_live(&mut tr, Some(db), &key, info.gap_end, old_end)? {
            rescued.push((key, value));
        }
    }
    tr.rollback()?;

    if rescued.is_empty() {
        db.extend_gap(info.gap_begin, old_end)?;
        tracing::debug!(old_tr_size, "vacuum reclaimed an entirely dead transaction");
        return Ok(VacuumStats { keys_rescued: 0, bytes_reclaimed: old_tr_size });
    }

    let mut tres = db.transaction();
    tres.begin()?;
    for (key, value) in &rescued {
        tres.put(key, value)?;
    }
    tres.commit()?;

    // `tres`'s own commit may have consumed part of the prior gap (if it reused it) or
    // appended past it (if not); either way, its resulting gap_begin is where the merged,
    // widened gap should start from, and the old transaction's end is where it should reach to.
    let after = db.dbinfo();
    db.extend_gap(after.gap_begin, old_end)?;

    tracing::debug!(keys_rescued = rescued.len(), old_tr_size, "vacuum rewrote live survivors and reclaimed old region");
    Ok(VacuumStats {
        keys_rescued: rescued.len(),
        bytes_reclaimed: old_tr_size,
    })
}

/// Probe reachability of `key` against `tr`'s own (possibly already-mutated, in this same
/// vacuum pass) root.
fn probe_live(
    tr: &mut crate::transaction::Transaction,
    db: Option<&Database>,
    key: &[u8],
    gap_end: u64,
    old_end: u64,
) -> Result<bool> {
    let root = match tr.root_mut() {
        crate::transaction::RootState::Empty => return Ok(false),
        crate::transaction::RootState::OnDisk(off) => {
            let off = *off;
            let db = db.ok_or_else(|| Error::corrupted("on-disk root with no database"))?;
            let loaded = db.read_node_at(off)?;
            *tr.root_mut() = crate::transaction::RootState::Resident(Box::new(loaded));
            match tr.root_mut() {
                crate::transaction::RootState::Resident(b) => b.as_mut(),
                _ => unreachable!(),
            }
        }
        crate::transaction::RootState::Resident(b) => b.as_mut(),
    };
    probe_reachable(db, root, key, gap_end, old_end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Options;

    #[test]
    fn vacuum_on_fresh_database_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");
        let db = Database::open(&path, Options::new()).unwrap();
        let stats = vacuum(&db).unwrap();
        assert_eq!(stats, VacuumStats { keys_rescued: 0, bytes_reclaimed: 0 });
    }

    #[test]
    fn vacuum_with_single_transaction_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");
        let db = Database::open(&path, Options::new()).unwrap();
        let mut tr = db.transaction();
        tr.begin().unwrap();
        tr.put(b"a", b"1").unwrap();
        tr.commit().unwrap();

        let stats = vacuum(&db).unwrap();
        assert_eq!(stats, VacuumStats { keys_rescued: 0, bytes_reclaimed: 0 });
    }

    #[test]
    fn vacuum_rescues_keys_still_live_after_an_overwriting_commit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");
        let db = Database::open(&path, Options::new()).unwrap();

        let mut tr = db.transaction();
        tr.begin().unwrap();
        tr.put(b"kept", b"1").unwrap();
        tr.put(b"overwritten", b"old").unwrap();
        tr.commit().unwrap();

        let mut tr2 = db.transaction();
        tr2.begin().unwrap();
        tr2.put(b"overwritten", b"new").unwrap();
        tr2.commit().unwrap();

        let stats = vacuum(&db).unwrap();
        assert!(stats.keys_rescued >= 1);

        let mut check = db.transaction();
        check.begin().unwrap();
        assert_eq!(check.get(b"kept").unwrap().unwrap().as_bytes(), b"1");
        assert_eq!(check.get(b"overwritten").unwrap().unwrap().as_bytes(), b"new");
    }
}
