//! Unified error handling for corvus.
//!
//! This module defines [`Error`], the single error type propagated through
//! every layer of the engine -- from the platform abstraction and the page
//! store, through the transaction engine, up to the public API surface.
//!
//! A convenience [`Result<T>`] type alias is re-exported so that callers can
//! write `Result<T>` instead of `std::result::Result<T, Error>`.

use std::fmt;
use std::io;

/// The canonical error type for all corvus operations.
///
/// Every fallible function in the crate returns this type (via the
/// [`Result`] alias). Variants follow the engine's error taxonomy so that
/// callers can match on the category without inspecting free-form strings.
#[derive(Debug)]
pub enum Error {
    /// An I/O error originating from the filesystem layer (read, write,
    /// fsync, map, lock, close).
    Io(io::Error),

    /// A bad option or API misuse detected before any work was done
    /// (e.g. `minimum_size` below the floor, a write operation on a read
    /// transaction, popping an empty traversal stack).
    InvalidArgument(String),

    /// An operation that is not legal in the current state of the object
    /// (e.g. modifying a free page, freeing a page twice, committing a
    /// transaction twice).
    InvalidState(String),

    /// A page request that falls outside the transaction's snapshot of the
    /// file.
    OutOfRange {
        /// First page of the rejected request.
        page_num: u64,
        /// Size of the snapshot the request was checked against, in bytes.
        map_size: u64,
    },

    /// The allocator could not find a qualifying run of free pages, or the
    /// file cannot grow past `maximum_size`.
    NoSpace(String),

    /// The on-disk structure violates an invariant: wrong magic or version,
    /// an unknown page kind, a truncated file.
    Corruption(String),

    /// A second concurrent write transaction was requested.
    Busy,

    /// The page is already present in a pages map.
    Duplicate(u64),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "I/O error: {err}"),
            Error::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Error::InvalidState(msg) => write!(f, "invalid state: {msg}"),
            Error::OutOfRange { page_num, map_size } => write!(
                f,
                "page {page_num} is outside of the bounds of the file (map size {map_size})"
            ),
            Error::NoSpace(msg) => write!(f, "no space: {msg}"),
            Error::Corruption(msg) => write!(f, "corrupt database: {msg}"),
            Error::Busy => write!(f, "a write transaction is already active"),
            Error::Duplicate(page_num) => {
                write!(f, "page {page_num} already exists in the table")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

/// A specialised [`Result`] type for corvus operations.
pub type Result<T> = std::result::Result<T, Error>;
