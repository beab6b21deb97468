#![warn(missing_docs)]

//! An embedded, ordered key-value store built around an in-memory radix trie backed by an
//! append-only, copy-on-write on-disk log.
//!
//! Keys are arbitrary byte strings ordered by unsigned byte comparison; values are arbitrary
//! byte strings. All mutation happens inside a [`Transaction`]: `begin`, any mix of `put`/`get`/
//! `del`, then `commit` or `rollback`. A transaction created via [`Transaction::new_ram_only`]
//! never touches a file at all.

pub use cursor::{Cursor, SeekMode};
pub use datum::Datum;
pub use error::{Error, Result};
pub use options::{ArenaMode, OpenFlags, Options};
pub use store::{DbInfo, Database};
pub use transaction::Transaction;
pub use vacuum::{vacuum, VacuumStats};

mod arena;
mod codec;
mod commit;
mod cursor;
mod datum;
mod error;
mod footer;
mod node;
mod options;
mod store;
mod transaction;
mod trie;
mod vacuum;
