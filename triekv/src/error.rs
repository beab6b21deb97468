use std::fmt;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Every way an operation on the store can fail.
///
/// Variant names track the error codes of the engine this crate's API is modeled on:
/// `IO_ERROR`, `CORRUPTED`, `MODIFIED`, `NOT_STARTED`, `EMPTY`, `NOT_FOUND`, `ENOMEM`, `LOCKED`.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A read or write did not return the expected byte count, or a seek landed outside the
    /// file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The file's tail footer (or a disk node inside it) is not well-formed: bad signature,
    /// a transaction larger than the file, or a child table inconsistent with its declared size.
    #[error("corrupted database: {0}")]
    Corrupted(String),

    /// Between `begin` and `commit`, the file changed in a way inconsistent with this
    /// transaction being the sole writer since its snapshot was taken.
    #[error("database was modified by another transaction since begin()")]
    Modified,

    /// A mutating or query operation was attempted on a transaction that was never `begin`-ed
    /// (or was already committed/rolled back).
    #[error("transaction has not been started")]
    NotStarted,

    /// A cursor operation was attempted on a transaction with no root (nothing has ever been
    /// inserted).
    #[error("database is empty")]
    Empty,

    /// The requested key is absent, or a cursor advanced past the last element.
    #[error("key not found")]
    NotFound,

    /// The node arena's ceiling was hit, the fixed slab was exhausted, or the system allocator
    /// failed.
    #[error("out of memory")]
    OutOfMemory,

    /// Reserved for a future multi-process file lock; no current operation raises it.
    #[error("database is locked")]
    Locked,
}

impl Error {
    pub(crate) fn corrupted(context: impl fmt::Display) -> Error {
        Error::Corrupted(context.to_string())
    }
}
