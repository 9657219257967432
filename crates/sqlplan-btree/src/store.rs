//! Cursor-numbered access to a set of B-trees.
//!
//! Generated programs name cursors by small integers. [`BtreeStore`] is the
//! storage collaborator seen through that lens: open a cursor number on a
//! root page, then drive it. Statistics gathering and the foreign-key
//! runtime checker both talk to storage this way.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use sqlplan_error::{PlanError, Result};
use sqlplan_types::{Index, SqliteValue, Table};
use tracing::{debug, trace};

use crate::cursor::{MemCursor, MemTree, RecordOrder};
use crate::traits::{BtreeCursorOps, CursorMode, SeekOp};

/// A table lock taken by a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TableLock {
    pub db: i32,
    pub root_page: u32,
    pub write: bool,
}

/// Storage operations keyed by cursor number.
pub trait BtreeStore {
    /// Bind `cursor` to the tree rooted at `root_page`.
    fn open(&mut self, cursor: i32, root_page: u32, db: i32, mode: CursorMode) -> Result<()>;

    fn close(&mut self, cursor: i32) -> Result<()>;

    /// Exact-match seek. Returns whether the key was found.
    fn seek_exact(&mut self, cursor: i32, key: &[SqliteValue]) -> Result<bool>;

    /// Inequality seek. Returns whether the cursor landed on an entry.
    fn seek(&mut self, cursor: i32, op: SeekOp, key: &[SqliteValue]) -> Result<bool>;

    /// Returns `true` if the tree is empty.
    fn rewind(&mut self, cursor: i32) -> Result<bool>;

    /// Returns `true` if the tree is empty.
    fn last(&mut self, cursor: i32) -> Result<bool>;

    /// Returns `true` once the cursor is exhausted.
    fn next(&mut self, cursor: i32) -> Result<bool>;

    /// Returns `true` once the cursor is exhausted.
    fn prev(&mut self, cursor: i32) -> Result<bool>;

    fn column(&self, cursor: i32, i: usize) -> Result<SqliteValue>;

    fn rowid(&self, cursor: i32) -> Result<i64>;

    /// Approximate number of entries in the tree at `root_page`.
    fn row_count_estimate(&self, root_page: u32) -> Result<u64>;

    /// Record an advisory table lock.
    fn lock_table(&self, lock: TableLock);
}

// ---------------------------------------------------------------------------
// MemBtreeStore
// ---------------------------------------------------------------------------

/// An in-memory [`BtreeStore`].
///
/// Trees are created explicitly with [`MemBtreeStore::create_table`] and
/// [`MemBtreeStore::create_index`]; index trees are kept in step with their
/// table by [`MemBtreeStore::insert_row`].
#[derive(Debug, Default)]
pub struct MemBtreeStore {
    trees: HashMap<u32, Arc<RwLock<MemTree>>>,
    cursors: HashMap<i32, MemCursor>,
    indexes_of: HashMap<u32, Vec<Arc<Index>>>,
    locks: Mutex<Vec<TableLock>>,
}

impl MemBtreeStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the table tree for `table` and one index tree per index.
    pub fn create_table(&mut self, table: &Table) -> Result<()> {
        if self.trees.contains_key(&table.root_page) {
            return Err(PlanError::internal(format!(
                "root page {} already in use",
                table.root_page
            )));
        }
        self.trees
            .insert(table.root_page, Arc::new(RwLock::new(MemTree::table())));
        for index in &table.indexes {
            self.create_index(table.root_page, index)?;
        }
        debug!(
            target: "sqlplan.btree",
            table = %table.name,
            root = table.root_page,
            indexes = table.indexes.len(),
            "created table tree"
        );
        Ok(())
    }

    /// Create an index tree attached to the table at `table_root`.
    pub fn create_index(&mut self, table_root: u32, index: &Arc<Index>) -> Result<()> {
        if self.trees.contains_key(&index.root_page) {
            return Err(PlanError::internal(format!(
                "root page {} already in use",
                index.root_page
            )));
        }
        let order = RecordOrder::new(
            index.collations(),
            index
                .columns
                .iter()
                .map(|c| c.sort_order.as_bit() != 0)
                .collect(),
        );
        self.trees
            .insert(index.root_page, Arc::new(RwLock::new(MemTree::index(order))));
        self.indexes_of
            .entry(table_root)
            .or_default()
            .push(Arc::clone(index));
        Ok(())
    }

    /// Insert a row into a table tree and all of its index trees.
    pub fn insert_row(
        &mut self,
        table_root: u32,
        rowid: i64,
        row: Vec<SqliteValue>,
    ) -> Result<()> {
        for index in self.indexes_of.get(&table_root).into_iter().flatten() {
            let mut key: Vec<SqliteValue> = index
                .columns
                .iter()
                .map(|c| {
                    if c.column < 0 {
                        SqliteValue::Integer(rowid)
                    } else {
                        row.get(c.column as usize)
                            .cloned()
                            .unwrap_or(SqliteValue::Null)
                    }
                })
                .collect();
            key.push(SqliteValue::Integer(rowid));
            self.tree(index.root_page)?.write().insert(key, Vec::new());
        }
        self.tree(table_root)?.write().insert_row(rowid, row);
        trace!(target: "sqlplan.btree", root = table_root, rowid, "row inserted");
        Ok(())
    }

    /// Locks recorded so far, in the order they were taken.
    #[must_use]
    pub fn locks(&self) -> Vec<TableLock> {
        self.locks.lock().clone()
    }

    /// Number of open cursors.
    #[must_use]
    pub fn open_cursor_count(&self) -> usize {
        self.cursors.len()
    }

    fn tree(&self, root_page: u32) -> Result<&Arc<RwLock<MemTree>>> {
        self.trees
            .get(&root_page)
            .ok_or_else(|| PlanError::internal(format!("no tree at root page {root_page}")))
    }

    fn cursor(&self, cursor: i32) -> Result<&MemCursor> {
        self.cursors
            .get(&cursor)
            .ok_or_else(|| PlanError::internal(format!("cursor {cursor} is not open")))
    }

    fn cursor_mut(&mut self, cursor: i32) -> Result<&mut MemCursor> {
        self.cursors
            .get_mut(&cursor)
            .ok_or_else(|| PlanError::internal(format!("cursor {cursor} is not open")))
    }
}

impl BtreeStore for MemBtreeStore {
    fn open(&mut self, cursor: i32, root_page: u32, db: i32, mode: CursorMode) -> Result<()> {
        let tree = Arc::clone(self.tree(root_page)?);
        trace!(target: "sqlplan.btree", cursor, root = root_page, db, ?mode, "open cursor");
        self.cursors.insert(cursor, MemCursor::new(tree, mode));
        Ok(())
    }

    fn close(&mut self, cursor: i32) -> Result<()> {
        self.cursors
            .remove(&cursor)
            .map(drop)
            .ok_or_else(|| PlanError::internal(format!("cursor {cursor} is not open")))
    }

    fn seek_exact(&mut self, cursor: i32, key: &[SqliteValue]) -> Result<bool> {
        Ok(self.cursor_mut(cursor)?.seek_exact(key)?.is_found())
    }

    fn seek(&mut self, cursor: i32, op: SeekOp, key: &[SqliteValue]) -> Result<bool> {
        self.cursor_mut(cursor)?.seek(op, key)
    }

    fn rewind(&mut self, cursor: i32) -> Result<bool> {
        self.cursor_mut(cursor)?.rewind()
    }

    fn last(&mut self, cursor: i32) -> Result<bool> {
        self.cursor_mut(cursor)?.last()
    }

    fn next(&mut self, cursor: i32) -> Result<bool> {
        self.cursor_mut(cursor)?.next()
    }

    fn prev(&mut self, cursor: i32) -> Result<bool> {
        self.cursor_mut(cursor)?.prev()
    }

    fn column(&self, cursor: i32, i: usize) -> Result<SqliteValue> {
        self.cursor(cursor)?.column(i)
    }

    fn rowid(&self, cursor: i32) -> Result<i64> {
        self.cursor(cursor)?.rowid()
    }

    fn row_count_estimate(&self, root_page: u32) -> Result<u64> {
        Ok(self.tree(root_page)?.read().len() as u64)
    }

    fn lock_table(&self, lock: TableLock) {
        let mut locks = self.locks.lock();
        if let Some(existing) = locks
            .iter_mut()
            .find(|l| l.db == lock.db && l.root_page == lock.root_page)
        {
            existing.write |= lock.write;
        } else {
            locks.push(lock);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlplan_types::Schema;

    fn store_with_people() -> (MemBtreeStore, Arc<Table>) {
        let mut schema = Schema::new();
        let mut table = Table::new("people")
            .column("name", "TEXT")
            .column("age", "INTEGER")
            .with_root(2);
        let idx = Index::on("people_age", &table, &["age"]).with_root(3);
        table.add_index(idx);
        let table = schema.add_table(table);

        let mut store = MemBtreeStore::new();
        store.create_table(&table).unwrap();
        for (rowid, name, age) in [(1, "ann", 40), (2, "bo", 25), (3, "cy", 40)] {
            store
                .insert_row(
                    2,
                    rowid,
                    vec![SqliteValue::Text(name.into()), SqliteValue::Integer(age)],
                )
                .unwrap();
        }
        (store, table)
    }

    #[test]
    fn test_index_tree_tracks_table_rows() {
        let (mut store, _) = store_with_people();
        store.open(0, 3, 0, CursorMode::Read).unwrap();
        assert!(store.seek_exact(0, &[SqliteValue::Integer(40)]).unwrap());
        assert_eq!(store.rowid(0).unwrap(), 1);
        assert!(!store.next(0).unwrap());
        assert_eq!(store.rowid(0).unwrap(), 3);
        assert!(store.next(0).unwrap());
        assert_eq!(store.row_count_estimate(3).unwrap(), 3);
    }

    #[test]
    fn test_cursor_lifecycle() {
        let (mut store, _) = store_with_people();
        store.open(5, 2, 0, CursorMode::Read).unwrap();
        assert_eq!(store.open_cursor_count(), 1);
        assert!(!store.rewind(5).unwrap());
        assert_eq!(store.column(5, 0).unwrap(), SqliteValue::Text("ann".into()));
        store.close(5).unwrap();
        assert!(store.close(5).is_err());
        assert!(store.rowid(5).is_err());
        assert!(store.open(6, 99, 0, CursorMode::Read).is_err());
    }

    #[test]
    fn test_duplicate_root_rejected() {
        let (mut store, table) = store_with_people();
        assert!(store.create_table(&table).is_err());
    }

    #[test]
    fn test_table_locks_merge_write_intent() {
        let store = MemBtreeStore::new();
        store.lock_table(TableLock {
            db: 0,
            root_page: 2,
            write: false,
        });
        store.lock_table(TableLock {
            db: 0,
            root_page: 2,
            write: true,
        });
        store.lock_table(TableLock {
            db: 1,
            root_page: 2,
            write: false,
        });
        let locks = store.locks();
        assert_eq!(locks.len(), 2);
        assert!(locks[0].write);
        assert!(!locks[1].write);
    }
}
