//! B-tree cursor contract and an in-memory store.
//!
//! The planner never touches storage while it plans; it emits cursor
//! opcodes against the [`BtreeCursorOps`] contract. Statistics gathering
//! and the foreign-key runtime checker drive storage directly through
//! [`BtreeStore`], which [`MemBtreeStore`] implements over sorted vectors.

pub mod cursor;
pub mod store;
pub mod traits;

pub use cursor::{MemCursor, MemTree, RecordOrder, TreeKind, compare_prefix, compare_records};
pub use store::{BtreeStore, MemBtreeStore, TableLock};
pub use traits::{BtreeCursorOps, CursorMode, SeekOp, SeekResult};
