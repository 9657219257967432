//! In-memory B-tree and its cursor.
//!
//! A [`MemTree`] keeps its entries sorted by key under a [`RecordOrder`].
//! Trees are shared behind `Arc<RwLock<_>>` so several cursors can walk the
//! same tree, the way two loops of a self-join open the same table.

use std::cmp::Ordering;
use std::sync::Arc;

use parking_lot::RwLock;
use sqlplan_error::{PlanError, Result};
use sqlplan_types::{BINARY, SqliteValue};

use crate::traits::{BtreeCursorOps, CursorMode, SeekOp, SeekResult, sealed};

// ---------------------------------------------------------------------------
// Record ordering
// ---------------------------------------------------------------------------

/// Per-field comparison rules of an index key.
///
/// Fields past the end of `collations` compare with BINARY in ascending
/// order, which covers the trailing rowid of index keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordOrder {
    pub collations: Vec<String>,
    pub descending: Vec<bool>,
}

impl RecordOrder {
    #[must_use]
    pub fn new(collations: Vec<String>, descending: Vec<bool>) -> Self {
        Self {
            collations,
            descending,
        }
    }

    fn collation(&self, field: usize) -> &str {
        self.collations.get(field).map_or(BINARY, String::as_str)
    }

    fn is_descending(&self, field: usize) -> bool {
        self.descending.get(field).copied().unwrap_or(false)
    }

    /// Compare field `i` of two records.
    #[must_use]
    pub fn compare_field(&self, i: usize, a: &SqliteValue, b: &SqliteValue) -> Ordering {
        let ord = a.collate_cmp(b, self.collation(i));
        if self.is_descending(i) {
            ord.reverse()
        } else {
            ord
        }
    }
}

/// Compare a stored key against a probe, looking only at the fields the
/// probe supplies.
#[must_use]
pub fn compare_prefix(
    stored: &[SqliteValue],
    probe: &[SqliteValue],
    order: &RecordOrder,
) -> Ordering {
    for (i, (a, b)) in stored.iter().zip(probe).enumerate() {
        let ord = order.compare_field(i, a, b);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    if stored.len() < probe.len() {
        Ordering::Less
    } else {
        Ordering::Equal
    }
}

/// Total order over full keys: field-wise, then shorter first.
#[must_use]
pub fn compare_records(
    left: &[SqliteValue],
    right: &[SqliteValue],
    order: &RecordOrder,
) -> Ordering {
    compare_prefix(left, right, order).then(left.len().cmp(&right.len()))
}

// ---------------------------------------------------------------------------
// MemTree
// ---------------------------------------------------------------------------

/// Which kind of tree a root page holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TreeKind {
    /// Keyed by `[rowid]`, rows live in the entry data.
    Table,
    /// Key-only: indexed column values followed by the rowid.
    Index,
}

#[derive(Debug, Clone)]
struct Entry {
    key: Vec<SqliteValue>,
    data: Vec<SqliteValue>,
}

/// A sorted, in-memory tree.
#[derive(Debug, Clone)]
pub struct MemTree {
    kind: TreeKind,
    order: RecordOrder,
    entries: Vec<Entry>,
}

impl MemTree {
    #[must_use]
    pub fn table() -> Self {
        Self {
            kind: TreeKind::Table,
            order: RecordOrder::default(),
            entries: Vec::new(),
        }
    }

    #[must_use]
    pub fn index(order: RecordOrder) -> Self {
        Self {
            kind: TreeKind::Index,
            order,
            entries: Vec::new(),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> TreeKind {
        self.kind
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert or replace. Returns the position of the entry.
    pub fn insert(&mut self, key: Vec<SqliteValue>, data: Vec<SqliteValue>) -> usize {
        match self
            .entries
            .binary_search_by(|e| compare_records(&e.key, &key, &self.order))
        {
            Ok(pos) => {
                self.entries[pos].data = data;
                pos
            }
            Err(pos) => {
                self.entries.insert(pos, Entry { key, data });
                pos
            }
        }
    }

    /// Insert a table row.
    pub fn insert_row(&mut self, rowid: i64, row: Vec<SqliteValue>) -> usize {
        self.insert(vec![SqliteValue::Integer(rowid)], row)
    }

    /// Number of leading entries whose prefix compares `Less` (or, with
    /// `inclusive`, `Less` or `Equal`) against the probe.
    fn partition(&self, probe: &[SqliteValue], inclusive: bool) -> usize {
        self.entries
            .partition_point(|e| match compare_prefix(&e.key, probe, &self.order) {
                Ordering::Less => true,
                Ordering::Equal => inclusive,
                Ordering::Greater => false,
            })
    }

    fn seek_position(&self, op: SeekOp, probe: &[SqliteValue]) -> Option<usize> {
        match op {
            SeekOp::Ge => Some(self.partition(probe, false)).filter(|&p| p < self.len()),
            SeekOp::Gt => Some(self.partition(probe, true)).filter(|&p| p < self.len()),
            SeekOp::Le => self.partition(probe, true).checked_sub(1),
            SeekOp::Lt => self.partition(probe, false).checked_sub(1),
        }
    }
}

// ---------------------------------------------------------------------------
// MemCursor
// ---------------------------------------------------------------------------

/// Cursor over a shared [`MemTree`].
#[derive(Debug)]
pub struct MemCursor {
    tree: Arc<RwLock<MemTree>>,
    mode: CursorMode,
    pos: Option<usize>,
}

impl sealed::Sealed for MemCursor {}

impl MemCursor {
    #[must_use]
    pub fn new(tree: Arc<RwLock<MemTree>>, mode: CursorMode) -> Self {
        Self {
            tree,
            mode,
            pos: None,
        }
    }

    fn current<T>(&self, f: impl FnOnce(TreeKind, &Entry) -> Result<T>) -> Result<T> {
        let tree = self.tree.read();
        let entry = self
            .pos
            .and_then(|p| tree.entries.get(p))
            .ok_or_else(|| PlanError::internal("cursor at EOF"))?;
        f(tree.kind, entry)
    }
}

impl BtreeCursorOps for MemCursor {
    fn seek_exact(&mut self, key: &[SqliteValue]) -> Result<SeekResult> {
        let tree = self.tree.read();
        let pos = tree.partition(key, false);
        if pos >= tree.len() {
            self.pos = None;
            return Ok(SeekResult::NotFound);
        }
        self.pos = Some(pos);
        if compare_prefix(&tree.entries[pos].key, key, &tree.order) == Ordering::Equal {
            Ok(SeekResult::Found)
        } else {
            Ok(SeekResult::NotFound)
        }
    }

    fn seek(&mut self, op: SeekOp, key: &[SqliteValue]) -> Result<bool> {
        self.pos = self.tree.read().seek_position(op, key);
        Ok(self.pos.is_some())
    }

    fn rewind(&mut self) -> Result<bool> {
        let empty = self.tree.read().is_empty();
        self.pos = if empty { None } else { Some(0) };
        Ok(empty)
    }

    fn last(&mut self) -> Result<bool> {
        let len = self.tree.read().len();
        self.pos = len.checked_sub(1);
        Ok(len == 0)
    }

    fn next(&mut self) -> Result<bool> {
        let len = self.tree.read().len();
        self.pos = self.pos.map(|p| p + 1).filter(|&p| p < len);
        Ok(self.pos.is_none())
    }

    fn prev(&mut self) -> Result<bool> {
        self.pos = self.pos.and_then(|p| p.checked_sub(1));
        Ok(self.pos.is_none())
    }

    fn insert(&mut self, key: Vec<SqliteValue>, data: Vec<SqliteValue>) -> Result<()> {
        if self.mode != CursorMode::Write {
            return Err(PlanError::internal("insert through a read-only cursor"));
        }
        self.pos = Some(self.tree.write().insert(key, data));
        Ok(())
    }

    fn delete(&mut self) -> Result<()> {
        if self.mode != CursorMode::Write {
            return Err(PlanError::internal("delete through a read-only cursor"));
        }
        let mut tree = self.tree.write();
        let Some(pos) = self.pos.filter(|&p| p < tree.len()) else {
            return Err(PlanError::internal("cursor at EOF"));
        };
        tree.entries.remove(pos);
        self.pos = Some(pos).filter(|&p| p < tree.len());
        Ok(())
    }

    fn column(&self, i: usize) -> Result<SqliteValue> {
        self.current(|kind, entry| {
            let fields = match kind {
                TreeKind::Table => &entry.data,
                TreeKind::Index => &entry.key,
            };
            Ok(fields.get(i).cloned().unwrap_or(SqliteValue::Null))
        })
    }

    fn rowid(&self) -> Result<i64> {
        self.current(|kind, entry| {
            let field = match kind {
                TreeKind::Table => entry.key.first(),
                TreeKind::Index => entry.key.last(),
            };
            match field {
                Some(SqliteValue::Integer(rowid)) => Ok(*rowid),
                _ => Err(PlanError::internal("entry has no integer rowid")),
            }
        })
    }

    fn eof(&self) -> bool {
        self.pos.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlplan_types::NOCASE;

    fn text(s: &str) -> SqliteValue {
        SqliteValue::Text(s.to_owned())
    }

    fn shared(tree: MemTree) -> Arc<RwLock<MemTree>> {
        Arc::new(RwLock::new(tree))
    }

    fn people() -> Arc<RwLock<MemTree>> {
        let mut t = MemTree::table();
        t.insert_row(30, vec![text("charlie")]);
        t.insert_row(10, vec![text("alice")]);
        t.insert_row(20, vec![text("bob")]);
        shared(t)
    }

    #[test]
    fn test_table_cursor_forward_and_backward() {
        let mut c = MemCursor::new(people(), CursorMode::Read);
        assert!(!c.rewind().unwrap());
        assert_eq!(c.rowid().unwrap(), 10);
        assert_eq!(c.column(0).unwrap(), text("alice"));
        assert!(!c.next().unwrap());
        assert!(!c.next().unwrap());
        assert_eq!(c.rowid().unwrap(), 30);
        assert!(c.next().unwrap());
        assert!(c.eof());

        assert!(!c.last().unwrap());
        assert!(!c.prev().unwrap());
        assert_eq!(c.rowid().unwrap(), 20);
        assert!(!c.prev().unwrap());
        assert!(c.prev().unwrap());
        assert!(c.rowid().is_err());
    }

    #[test]
    fn test_empty_tree_reports_empty() {
        let mut c = MemCursor::new(shared(MemTree::table()), CursorMode::Read);
        assert!(c.rewind().unwrap());
        assert!(c.last().unwrap());
        assert!(c.eof());
    }

    #[test]
    fn test_seek_exact_rowid() {
        let mut c = MemCursor::new(people(), CursorMode::Read);
        assert!(c.seek_exact(&[SqliteValue::Integer(20)]).unwrap().is_found());
        assert_eq!(c.column(0).unwrap(), text("bob"));
        assert_eq!(
            c.seek_exact(&[SqliteValue::Integer(25)]).unwrap(),
            SeekResult::NotFound
        );
        assert_eq!(c.rowid().unwrap(), 30);
        assert!(!c.seek_exact(&[SqliteValue::Integer(99)]).unwrap().is_found());
        assert!(c.eof());
    }

    #[test]
    fn test_inequality_seeks_on_index_prefix() {
        let mut idx = MemTree::index(RecordOrder::default());
        for (v, rowid) in [(1, 1), (2, 2), (2, 3), (3, 4)] {
            idx.insert(vec![SqliteValue::Integer(v), SqliteValue::Integer(rowid)], vec![]);
        }
        let mut c = MemCursor::new(shared(idx), CursorMode::Read);
        let two = [SqliteValue::Integer(2)];

        assert!(c.seek(SeekOp::Ge, &two).unwrap());
        assert_eq!(c.rowid().unwrap(), 2);
        assert!(c.seek(SeekOp::Gt, &two).unwrap());
        assert_eq!(c.rowid().unwrap(), 4);
        assert!(c.seek(SeekOp::Le, &two).unwrap());
        assert_eq!(c.rowid().unwrap(), 3);
        assert!(c.seek(SeekOp::Lt, &two).unwrap());
        assert_eq!(c.rowid().unwrap(), 1);

        assert!(!c.seek(SeekOp::Gt, &[SqliteValue::Integer(3)]).unwrap());
        assert!(!c.seek(SeekOp::Lt, &[SqliteValue::Integer(1)]).unwrap());
    }

    #[test]
    fn test_index_order_honours_collation_and_desc() {
        let order = RecordOrder::new(vec![NOCASE.to_owned()], vec![true]);
        let mut idx = MemTree::index(order);
        idx.insert(vec![text("b"), SqliteValue::Integer(1)], vec![]);
        idx.insert(vec![text("A"), SqliteValue::Integer(2)], vec![]);
        idx.insert(vec![text("c"), SqliteValue::Integer(3)], vec![]);
        let mut c = MemCursor::new(shared(idx), CursorMode::Read);
        assert!(!c.rewind().unwrap());
        assert_eq!(c.column(0).unwrap(), text("c"));
        assert!(c.seek_exact(&[text("a")]).unwrap().is_found());
        assert_eq!(c.rowid().unwrap(), 2);
    }

    #[test]
    fn test_insert_delete_requires_write_mode() {
        let tree = people();
        let mut reader = MemCursor::new(Arc::clone(&tree), CursorMode::Read);
        assert!(reader.insert(vec![SqliteValue::Integer(5)], vec![]).is_err());

        let mut writer = MemCursor::new(tree, CursorMode::Write);
        writer
            .insert(vec![SqliteValue::Integer(5)], vec![text("eve")])
            .unwrap();
        assert_eq!(writer.rowid().unwrap(), 5);
        writer.delete().unwrap();
        assert_eq!(writer.rowid().unwrap(), 10);
        assert!(!reader.rewind().unwrap());
        assert_eq!(reader.rowid().unwrap(), 10);
    }

    #[test]
    fn test_short_row_reads_null() {
        let mut c = MemCursor::new(people(), CursorMode::Read);
        c.rewind().unwrap();
        assert_eq!(c.column(7).unwrap(), SqliteValue::Null);
    }
}
