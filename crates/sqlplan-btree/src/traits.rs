//! B-tree cursor operations trait (sealed).
//!
//! `BtreeCursorOps` is the contract generated loops rely on when they walk a
//! table or an index. Keys are records of [`SqliteValue`]s: a table tree is
//! keyed by the single-field record `[rowid]`, an index tree by its column
//! values followed by the rowid.
//!
//! # Positioning
//!
//! `rewind` and `last` report whether the tree is empty; `next` and `prev`
//! report whether the cursor ran off the end. A cursor that is not positioned
//! on an entry is at EOF and refuses `column`/`rowid`.

use sqlplan_error::Result;
use sqlplan_types::SqliteValue;

// ---------------------------------------------------------------------------
// Sealed trait discipline
// ---------------------------------------------------------------------------

pub(crate) mod sealed {
    /// Marker trait restricting implementation to this crate.
    pub trait Sealed {}
}

// ---------------------------------------------------------------------------
// Seek vocabulary
// ---------------------------------------------------------------------------

/// Result of an exact-match seek.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekResult {
    /// The key was found; the cursor points to it.
    Found,
    /// The key was not found; the cursor points to the entry that would
    /// follow it in sort order (or is at EOF if no such entry exists).
    NotFound,
}

impl SeekResult {
    /// Whether the seek found an exact match.
    #[must_use]
    pub fn is_found(self) -> bool {
        self == Self::Found
    }
}

/// Direction of an inequality seek.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SeekOp {
    /// First entry whose key prefix is `>=` the probe.
    Ge,
    /// First entry whose key prefix is `>` the probe.
    Gt,
    /// Last entry whose key prefix is `<=` the probe.
    Le,
    /// Last entry whose key prefix is `<` the probe.
    Lt,
}

impl SeekOp {
    /// Whether a successful seek leaves the cursor moving forward.
    #[must_use]
    pub const fn is_forward(self) -> bool {
        matches!(self, Self::Ge | Self::Gt)
    }
}

/// Whether a cursor may modify its tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CursorMode {
    Read,
    Write,
}

// ---------------------------------------------------------------------------
// BtreeCursorOps
// ---------------------------------------------------------------------------

/// Low-level B-tree cursor operations.
///
/// Seek keys may be a prefix of the stored key; comparisons only look at the
/// fields the probe supplies. This is what lets an index loop seek on its
/// leading equality columns and then scan the rest.
///
/// # Sealed
///
/// This trait is sealed: only this crate can implement it.
pub trait BtreeCursorOps: sealed::Sealed {
    // -- Seek operations --

    /// Position the cursor on an entry whose key prefix equals `key`.
    ///
    /// On a miss the cursor points to the successor entry, or EOF.
    fn seek_exact(&mut self, key: &[SqliteValue]) -> Result<SeekResult>;

    /// Position the cursor per `op`. Returns `true` when an entry satisfied
    /// the seek; otherwise the cursor is at EOF.
    fn seek(&mut self, op: SeekOp, key: &[SqliteValue]) -> Result<bool>;

    // -- Navigation --

    /// Move to the first entry. Returns `true` if the tree is empty.
    fn rewind(&mut self) -> Result<bool>;

    /// Move to the last entry. Returns `true` if the tree is empty.
    fn last(&mut self) -> Result<bool>;

    /// Advance. Returns `true` once the cursor is exhausted.
    fn next(&mut self) -> Result<bool>;

    /// Step backward. Returns `true` once the cursor is exhausted.
    fn prev(&mut self) -> Result<bool>;

    // -- Mutation --

    /// Insert (or replace) the entry with the given key. The cursor is left
    /// on the new entry.
    fn insert(&mut self, key: Vec<SqliteValue>, data: Vec<SqliteValue>) -> Result<()>;

    /// Delete the entry under the cursor. The cursor moves to the successor.
    fn delete(&mut self) -> Result<()>;

    // -- Access --

    /// Column `i` of the current row. For a table tree this indexes the row
    /// data; for an index tree it indexes the key record.
    fn column(&self, i: usize) -> Result<SqliteValue>;

    /// The rowid of the current entry.
    fn rowid(&self) -> Result<i64>;

    /// Whether the cursor is past the last (or before the first) entry.
    fn eof(&self) -> bool;
}
