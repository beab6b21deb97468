use crate::error::{Error, Result};
use crate::options::ArenaMode;

/// Per-transaction byte-budget accounting.
///
/// The dynamic and fixed-slab modes described in the engine's design both boil down, from the
/// outside, to "reject an allocation that would push cumulative usage past a ceiling". This
/// type is that ceiling check. Individual nodes are still ordinary heap allocations (`Box`,
/// `Vec`) — `Arena` does not place node bytes itself, it only decides whether an allocation of
/// a given estimated size is allowed to proceed, the same accounting role the engine's bump
/// pointer and dynamic byte counter both play relative to their respective allocation paths.
pub(crate) struct Arena {
    limit: Option<usize>,
    used: usize,
    fixed: bool,
}

/// Capacity assumed for a dynamic-mode arena that has opted out of growing past its initial
/// estimate (`Options::tr_buf_dynalloc(false)`) without giving an explicit `tr_buf_limit`.
const DEFAULT_DYNAMIC_ESTIMATE: usize = 4096;

impl Arena {
    pub(crate) fn new(mode: ArenaMode, tr_buf_limit: Option<usize>, tr_buf_dynalloc: bool) -> Self {
        match mode {
            ArenaMode::Dynamic { limit } => {
                let effective_limit = limit.or(tr_buf_limit).or({
                    if tr_buf_dynalloc {
                        None
                    } else {
                        Some(DEFAULT_DYNAMIC_ESTIMATE)
                    }
                });
                Arena {
                    limit: effective_limit,
                    used: 0,
                    fixed: false,
                }
            }
            ArenaMode::FixedSlab { limit } => Arena {
                limit: Some(limit),
                used: 0,
                fixed: true,
            },
        }
    }

    pub(crate) fn is_fixed(&self) -> bool {
        self.fixed
    }

    pub(crate) fn used(&self) -> usize {
        self.used
    }

    /// Reserve `bytes` against the ceiling. Fails with [`Error::OutOfMemory`] without mutating
    /// the counter if the reservation would exceed the limit.
    pub(crate) fn reserve(&mut self, bytes: usize) -> Result<()> {
        if let Some(limit) = self.limit {
            let new_used = self.used.checked_add(bytes).ok_or(Error::OutOfMemory)?;
            if new_used > limit {
                return Err(Error::OutOfMemory);
            }
            self.used = new_used;
        } else {
            self.used = self.used.saturating_add(bytes);
        }
        Ok(())
    }

    /// Release a prior reservation, e.g. when a node is replaced and its old allocation is
    /// dropped. Dynamic mode gives the bytes back; a fixed slab never reclaims mid-transaction
    /// space (matching a bump allocator, which cannot free an interior allocation), so a
    /// release there is a no-op.
    pub(crate) fn release(&mut self, bytes: usize) {
        if !self.fixed {
            self.used = self.used.saturating_sub(bytes);
        }
    }

    /// Reset the arena to empty. Called by `rollback` and after a successful `commit`.
    pub(crate) fn reset(&mut self) {
        self.used = 0;
    }
}

/// A rough, deliberately conservative estimate of the bytes a trie node with these field sizes
/// would occupy, for arena accounting purposes. Does not need to be exact: it only needs to be
/// consistent enough that the same sequence of operations reliably trips `OutOfMemory` at the
/// same point, which is what the arena-accounting tests in `tests/` rely on.
pub(crate) fn estimate_node_bytes(prefix_len: usize, val_len: usize, meta_len: usize) -> usize {
    const NODE_OVERHEAD: usize = 64;
    NODE_OVERHEAD + prefix_len + val_len + meta_len
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_slab_rejects_past_ceiling() {
        let mut arena = Arena::new(ArenaMode::FixedSlab { limit: 100 }, None, true);
        arena.reserve(60).unwrap();
        assert!(arena.reserve(60).is_err());
        assert_eq!(arena.used(), 60);
    }

    #[test]
    fn dynamic_release_gives_bytes_back() {
        let mut arena = Arena::new(ArenaMode::Dynamic { limit: Some(100) }, None, true);
        arena.reserve(80).unwrap();
        arena.release(80);
        arena.reserve(80).unwrap();
    }

    #[test]
    fn fixed_slab_never_reclaims() {
        let mut arena = Arena::new(ArenaMode::FixedSlab { limit: 100 }, None, true);
        arena.reserve(80).unwrap();
        arena.release(80);
        assert!(arena.reserve(80).is_err());
    }

    #[test]
    fn reset_clears_usage() {
        let mut arena = Arena::new(ArenaMode::FixedSlab { limit: 100 }, None, true);
        arena.reserve(100).unwrap();
        arena.reset();
        arena.reserve(100).unwrap();
    }

    #[test]
    fn dynamic_with_dynalloc_disabled_and_no_limit_caps_at_the_default_estimate() {
        let mut unbounded = Arena::new(ArenaMode::Dynamic { limit: None }, None, true);
        assert!(unbounded.reserve(DEFAULT_DYNAMIC_ESTIMATE + 1).is_ok());

        let mut capped = Arena::new(ArenaMode::Dynamic { limit: None }, None, false);
        assert!(capped.reserve(DEFAULT_DYNAMIC_ESTIMATE + 1).is_err());
        assert!(capped.reserve(DEFAULT_DYNAMIC_ESTIMATE).is_ok());
    }

    #[test]
    fn dynamic_dynalloc_flag_is_ignored_once_an_explicit_limit_exists() {
        let mut via_mode_limit = Arena::new(ArenaMode::Dynamic { limit: Some(10) }, None, false);
        assert!(via_mode_limit.reserve(11).is_err());

        let mut via_tr_buf_limit = Arena::new(ArenaMode::Dynamic { limit: None }, Some(10), false);
        assert!(via_tr_buf_limit.reserve(11).is_err());
    }
}
