//! Constraint counters and a direct parent probe against storage.
//!
//! [`FkCounters`] is what the `FkCounter` and `FkIfZero` instructions act
//! on. [`FkRuntimeChecker`] performs the same checks as the generated code
//! straight against a [`BtreeStore`], for callers that modify rows without
//! running a program.

use std::cmp::Ordering;

use sqlplan_btree::{BtreeStore, CursorMode};
use sqlplan_error::{PlanError, Result};
use sqlplan_types::{BINARY, ForeignKey, Opcode, Schema, SqliteValue, Table, TypeAffinity, VdbeOp};
use tracing::{debug, trace};

use crate::parent_key::{ParentKey, locate_parent_key_index};

/// Outstanding foreign-key violations.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FkCounters {
    /// Immediate violations of the running statement.
    pub statement: i64,
    /// Deferred violations of the open transaction.
    pub deferred: i64,
}

impl FkCounters {
    pub fn add(&mut self, deferred: bool, incr: i64) {
        if deferred {
            self.deferred += incr;
        } else {
            self.statement += incr;
        }
    }

    pub const fn is_zero(&self, deferred: bool) -> bool {
        if deferred { self.deferred == 0 } else { self.statement == 0 }
    }

    /// Execute an `FkCounter` or `FkIfZero` instruction. Returns the jump
    /// target when an `FkIfZero` jumps; any other instruction is ignored.
    pub fn step(&mut self, op: &VdbeOp) -> Option<i32> {
        match op.opcode {
            Opcode::FkCounter => {
                self.add(op.p1 != 0, i64::from(op.p2));
                None
            }
            Opcode::FkIfZero if self.is_zero(op.p1 != 0) => Some(op.p2),
            _ => None,
        }
    }

    /// Close the running statement, failing it if it left immediate
    /// violations behind.
    pub fn end_statement(&mut self) -> Result<()> {
        let outstanding = std::mem::take(&mut self.statement);
        if outstanding > 0 {
            debug!(target: "sqlplan.fkey", outstanding, "statement fails foreign key check");
            return Err(PlanError::ForeignKeyViolation);
        }
        Ok(())
    }

    /// Whether the transaction may commit.
    pub fn check_commit(&self) -> Result<()> {
        if self.deferred > 0 {
            return Err(PlanError::ForeignKeyViolation);
        }
        Ok(())
    }
}

fn key_values(row: &[SqliteValue], rowid: i64, columns: impl IntoIterator<Item = i32>) -> Vec<SqliteValue> {
    columns
        .into_iter()
        .map(|c| match usize::try_from(c) {
            Ok(c) => row.get(c).cloned().unwrap_or(SqliteValue::Null),
            Err(_) => SqliteValue::Integer(rowid),
        })
        .collect()
}

fn is_self_reference(table: &Table, fk: &ForeignKey) -> bool {
    table.name.eq_ignore_ascii_case(&fk.child_table)
}

/// Checks row changes against the foreign keys of `schema`, probing parent
/// and child tables through `store`.
pub struct FkRuntimeChecker<'a> {
    store: &'a mut dyn BtreeStore,
    schema: &'a Schema,
    /// Cursor number used for probes. Opened and closed around each probe.
    cursor: i32,
    counters: FkCounters,
}

impl std::fmt::Debug for FkRuntimeChecker<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FkRuntimeChecker")
            .field("cursor", &self.cursor)
            .field("counters", &self.counters)
            .finish_non_exhaustive()
    }
}

impl<'a> FkRuntimeChecker<'a> {
    pub fn new(store: &'a mut dyn BtreeStore, schema: &'a Schema, cursor: i32) -> Self {
        Self {
            store,
            schema,
            cursor,
            counters: FkCounters::default(),
        }
    }

    pub const fn counters(&self) -> &FkCounters {
        &self.counters
    }

    pub const fn counters_mut(&mut self) -> &mut FkCounters {
        &mut self.counters
    }

    fn parent_of(&self, fk: &ForeignKey) -> Result<(&'a Table, ParentKey)> {
        let parent: &'a Table = self
            .schema
            .table(&fk.parent_table)
            .ok_or_else(|| PlanError::NoSuchTable {
                name: fk.parent_table.clone(),
            })?;
        let key = locate_parent_key_index(parent, fk).ok_or_else(|| PlanError::ForeignKeyMismatch {
            child: fk.child_table.clone(),
            parent: parent.name.clone(),
        })?;
        Ok((parent, key))
    }

    /// Whether the parent row of the child row (`child_rowid`, `child_row`)
    /// exists. A child key with a NULL in it always has a parent.
    pub fn parent_exists(
        &mut self,
        parent: &Table,
        child: &Table,
        fk: &ForeignKey,
        key: &ParentKey,
        child_rowid: i64,
        child_row: &[SqliteValue],
    ) -> Result<bool> {
        let mut child_key = key.clone();
        child_key.map_child_ipk(child);
        let values = key_values(child_row, child_rowid, child_key.child_columns.iter().copied());
        if values.iter().any(SqliteValue::is_null) {
            return Ok(true);
        }
        if is_self_reference(parent, fk) {
            let own = key_values(
                child_row,
                child_rowid,
                (0..values.len()).map(|i| key.parent_column(parent, i)),
            );
            if own == values {
                return Ok(true);
            }
        }

        let (root, probe) = match &key.index {
            None => match values[0].clone().apply_affinity(TypeAffinity::Integer) {
                SqliteValue::Integer(rowid) => (parent.root_page, vec![SqliteValue::Integer(rowid)]),
                _ => return Ok(false),
            },
            Some(idx) => {
                let probe = values
                    .into_iter()
                    .zip(&idx.columns)
                    .map(|(v, ic)| v.apply_affinity(parent.column_affinity(ic.column)))
                    .collect();
                (idx.root_page, probe)
            }
        };
        self.store.open(self.cursor, root, parent.db, CursorMode::Read)?;
        let found = self.store.seek_exact(self.cursor, &probe);
        self.store.close(self.cursor)?;
        let found = found?;
        trace!(target: "sqlplan.fkey", parent = %parent.name, found, "parent probe");
        Ok(found)
    }

    /// Number of rows of `child` that refer to the parent row
    /// (`parent_rowid`, `parent_row`), leaving out `skip_rowid` when the key
    /// is self-referencing.
    pub fn count_children(
        &mut self,
        parent: &Table,
        child: &Table,
        key: &ParentKey,
        parent_rowid: i64,
        parent_row: &[SqliteValue],
        skip_rowid: Option<i64>,
    ) -> Result<i64> {
        let values = key_values(
            parent_row,
            parent_rowid,
            (0..key.child_columns.len()).map(|i| key.parent_column(parent, i)),
        );
        if values.iter().any(SqliteValue::is_null) {
            return Ok(0);
        }
        let mut child_key = key.clone();
        child_key.map_child_ipk(child);

        self.store.open(self.cursor, child.root_page, child.db, CursorMode::Read)?;
        let counted = self.count_open_children(parent, &child_key, &values, skip_rowid);
        self.store.close(self.cursor)?;
        counted
    }

    fn count_open_children(
        &mut self,
        parent: &Table,
        child_key: &ParentKey,
        values: &[SqliteValue],
        skip_rowid: Option<i64>,
    ) -> Result<i64> {
        let mut n = 0;
        if self.store.rewind(self.cursor)? {
            return Ok(0);
        }
        loop {
            let rowid = self.store.rowid(self.cursor)?;
            if skip_rowid != Some(rowid) {
                let mut matched = true;
                for (i, (&col, want)) in child_key.child_columns.iter().zip(values).enumerate() {
                    let have = match usize::try_from(col) {
                        Ok(c) => self.store.column(self.cursor, c)?,
                        Err(_) => SqliteValue::Integer(rowid),
                    };
                    let (aff, coll) = if child_key.is_rowid() {
                        (TypeAffinity::Integer, BINARY)
                    } else {
                        let declared = child_key.declared_column(i);
                        (parent.column_affinity(declared), parent.column_collation(declared))
                    };
                    let have = have.apply_affinity(aff);
                    if have.is_null() || want.collate_cmp(&have, coll) != Ordering::Equal {
                        matched = false;
                        break;
                    }
                }
                if matched {
                    n += 1;
                }
            }
            if self.store.next(self.cursor)? {
                return Ok(n);
            }
        }
    }

    /// A row was written to `child`. A missing parent fails a single-row
    /// statement on an immediate key at once; otherwise it is counted.
    pub fn child_inserted(
        &mut self,
        child: &Table,
        rowid: i64,
        row: &[SqliteValue],
        single_row: bool,
    ) -> Result<()> {
        for fk in &child.foreign_keys {
            let (parent, key) = self.parent_of(fk)?;
            if self.parent_exists(parent, child, fk, &key, rowid, row)? {
                continue;
            }
            if !fk.deferred && single_row {
                return Err(PlanError::ForeignKeyViolation);
            }
            self.counters.add(fk.deferred, 1);
        }
        Ok(())
    }

    /// A row left `child`. If it was an orphan, one violation is taken back.
    pub fn child_deleted(&mut self, child: &Table, rowid: i64, row: &[SqliteValue]) -> Result<()> {
        for fk in &child.foreign_keys {
            if self.counters.is_zero(fk.deferred) {
                continue;
            }
            let (parent, key) = self.parent_of(fk)?;
            if !self.parent_exists(parent, child, fk, &key, rowid, row)? {
                self.counters.add(fk.deferred, -1);
            }
        }
        Ok(())
    }

    /// A row left `parent`: every child still referring to it is a
    /// violation.
    pub fn parent_deleted(&mut self, parent: &Table, rowid: i64, row: &[SqliteValue]) -> Result<()> {
        for (child, i) in self.schema.referencing(&parent.name) {
            let fk = &child.foreign_keys[i];
            let (_, key) = self.parent_of(fk)?;
            let skip = is_self_reference(parent, fk).then_some(rowid);
            let n = self.count_children(parent, &child, &key, rowid, row, skip)?;
            self.counters.add(fk.deferred, n);
        }
        Ok(())
    }

    /// A row was written to `parent`: children that were waiting for it are
    /// no longer violations.
    pub fn parent_inserted(&mut self, parent: &Table, rowid: i64, row: &[SqliteValue]) -> Result<()> {
        for (child, i) in self.schema.referencing(&parent.name) {
            let fk = &child.foreign_keys[i];
            if self.counters.is_zero(fk.deferred) {
                continue;
            }
            let (_, key) = self.parent_of(fk)?;
            let n = self.count_children(parent, &child, &key, rowid, row, None)?;
            self.counters.add(fk.deferred, -n);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use sqlplan_btree::MemBtreeStore;
    use sqlplan_types::{FkAction, FkColumn, Index, NOCASE, P4};

    use super::*;

    fn int(i: i64) -> SqliteValue {
        SqliteValue::Integer(i)
    }

    fn text(s: &str) -> SqliteValue {
        SqliteValue::from(s)
    }

    fn link(child: &str, parent: &str, child_column: usize, parent_column: &str, deferred: bool) -> ForeignKey {
        ForeignKey {
            child_table: child.to_owned(),
            parent_table: parent.to_owned(),
            columns: vec![FkColumn {
                child_column,
                parent_column: Some(parent_column.to_owned()),
            }],
            deferred,
            on_delete: FkAction::None,
            on_update: FkAction::None,
        }
    }

    /// `parent(id INTEGER PRIMARY KEY)` holding ids 1, 2, 3 and an empty
    /// `child(pid REFERENCES parent(id))`.
    fn rowid_fixture(deferred: bool) -> (MemBtreeStore, Schema) {
        let parent = Table::new("parent").column("id", "INTEGER").with_ipk(0).with_root(2);
        let child = Table::new("child")
            .column("pid", "INTEGER")
            .with_root(3)
            .with_foreign_key(link("child", "parent", 0, "id", deferred));
        let mut store = MemBtreeStore::new();
        store.create_table(&parent).unwrap();
        store.create_table(&child).unwrap();
        for id in 1..=3 {
            store.insert_row(2, id, vec![int(id)]).unwrap();
        }
        let mut schema = Schema::new();
        schema.add_table(parent);
        schema.add_table(child);
        (store, schema)
    }

    #[test]
    fn test_counter_instructions() {
        let mut c = FkCounters::default();
        let op = |opcode, p1, p2| VdbeOp {
            opcode,
            p1,
            p2,
            p3: 0,
            p4: P4::None,
            p5: 0,
        };
        assert_eq!(c.step(&op(Opcode::FkIfZero, 0, 9)), Some(9));
        assert_eq!(c.step(&op(Opcode::FkCounter, 1, 1)), None);
        assert_eq!(c.step(&op(Opcode::FkIfZero, 1, 9)), None);
        assert_eq!(c.step(&op(Opcode::FkIfZero, 0, 9)), Some(9));
        c.step(&op(Opcode::FkCounter, 0, 2));
        assert_eq!(c, FkCounters { statement: 2, deferred: 1 });

        assert_eq!(c.end_statement(), Err(PlanError::ForeignKeyViolation));
        assert_eq!(c.statement, 0);
        assert!(c.end_statement().is_ok());
        assert!(c.check_commit().is_err());
        c.add(true, -1);
        assert!(c.check_commit().is_ok());
    }

    #[test]
    fn test_single_row_insert_fails_at_once() {
        let (mut store, schema) = rowid_fixture(false);
        let child = schema.table("child").unwrap().clone();
        let mut checker = FkRuntimeChecker::new(&mut store, &schema, 7);

        checker.child_inserted(&child, 1, &[int(2)], true).unwrap();
        checker.child_inserted(&child, 2, &[SqliteValue::Null], true).unwrap();
        checker.child_inserted(&child, 3, &[text("3")], true).unwrap();
        assert_eq!(
            checker.child_inserted(&child, 4, &[int(9)], true),
            Err(PlanError::ForeignKeyViolation)
        );
        assert_eq!(checker.counters(), &FkCounters::default());

        checker.child_inserted(&child, 4, &[int(9)], false).unwrap();
        checker.child_inserted(&child, 5, &[text("x")], false).unwrap();
        assert_eq!(checker.counters().statement, 2);
    }

    #[test]
    fn test_parent_delete_counts_children() {
        let (mut store, schema) = rowid_fixture(true);
        for (rowid, pid) in [(1, 1), (2, 1), (3, 2)] {
            store.insert_row(3, rowid, vec![int(pid)]).unwrap();
        }
        let parent = schema.table("parent").unwrap().clone();
        let mut checker = FkRuntimeChecker::new(&mut store, &schema, 7);

        checker.parent_deleted(&parent, 1, &[int(1)]).unwrap();
        assert_eq!(checker.counters().deferred, 2);
        checker.parent_inserted(&parent, 1, &[int(1)]).unwrap();
        assert_eq!(checker.counters().deferred, 0);
        checker.parent_deleted(&parent, 3, &[int(3)]).unwrap();
        assert_eq!(checker.counters().deferred, 0);
    }

    #[test]
    fn test_index_probe_uses_index_collation() {
        let parent = Table::new("color")
            .with_column(sqlplan_types::Column::new("name", TypeAffinity::Text).with_collation(NOCASE))
            .with_root(2);
        let idx = Index::on("color_name", &parent, &["name"]).unique().with_root(3);
        let parent = parent.with_index(idx);
        let child = Table::new("shirt")
            .column("color", "TEXT")
            .with_root(4)
            .with_foreign_key(link("shirt", "color", 0, "name", false));
        let mut store = MemBtreeStore::new();
        store.create_table(&parent).unwrap();
        store.create_table(&child).unwrap();
        store.insert_row(2, 1, vec![text("Red")]).unwrap();
        store.insert_row(4, 1, vec![text("RED")]).unwrap();
        let mut schema = Schema::new();
        schema.add_table(parent);
        let child = schema.add_table(child);
        let parent = schema.table("color").unwrap().clone();

        let mut checker = FkRuntimeChecker::new(&mut store, &schema, 0);
        checker.child_inserted(&child, 2, &[text("red")], true).unwrap();
        assert!(checker.child_inserted(&child, 2, &[text("blue")], true).is_err());
        checker.parent_deleted(&parent, 1, &[text("Red")]).unwrap();
        assert_eq!(checker.counters().statement, 1);
    }

    #[test]
    fn test_self_reference_row_is_its_own_parent() {
        let node = Table::new("node")
            .column("id", "INTEGER")
            .column("up", "INTEGER")
            .with_ipk(0)
            .with_root(2)
            .with_foreign_key(link("node", "node", 1, "id", false));
        let mut store = MemBtreeStore::new();
        store.create_table(&node).unwrap();
        store.insert_row(2, 1, vec![int(1), int(1)]).unwrap();
        let mut schema = Schema::new();
        let node = schema.add_table(node);

        let mut checker = FkRuntimeChecker::new(&mut store, &schema, 0);
        checker.child_inserted(&node, 5, &[int(5), int(5)], true).unwrap();
        checker.child_inserted(&node, 6, &[int(6), int(1)], true).unwrap();
        // Deleting a row that only refers to itself orphans nothing.
        checker.parent_deleted(&node, 1, &[int(1), int(1)]).unwrap();
        assert_eq!(checker.counters().statement, 0);
    }

    #[test]
    fn test_mismatched_parent_key_is_an_error() {
        let parent = Table::new("p").column("k", "TEXT").with_root(2);
        let child = Table::new("c").column("k", "TEXT").with_root(3).with_foreign_key(link("c", "p", 0, "k", false));
        let mut store = MemBtreeStore::new();
        let mut schema = Schema::new();
        schema.add_table(parent);
        let child = schema.add_table(child);
        let mut checker = FkRuntimeChecker::new(&mut store, &schema, 0);
        let err = checker.child_inserted(&child, 1, &[text("a")], false).unwrap_err();
        assert_eq!(err.to_string(), "foreign key mismatch");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn test_deferred_counter_tracks_live_orphans(
            ops in prop::collection::vec((any::<bool>(), prop::option::of(0i64..6)), 1..40),
        ) {
            let (mut store, schema) = rowid_fixture(true);
            let child = schema.table("child").unwrap().clone();
            let mut live: Vec<(i64, Option<i64>)> = Vec::new();
            let mut next_rowid = 1;
            {
                let mut checker = FkRuntimeChecker::new(&mut store, &schema, 9);
                for (delete, pid) in ops {
                    let row = |p: Option<i64>| vec![p.map_or(SqliteValue::Null, SqliteValue::Integer)];
                    if delete && !live.is_empty() {
                        let (rowid, p) = live.remove(0);
                        checker.child_deleted(&child, rowid, &row(p)).unwrap();
                    } else {
                        checker.child_inserted(&child, next_rowid, &row(pid), false).unwrap();
                        live.push((next_rowid, pid));
                        next_rowid += 1;
                    }
                }
                let orphans = live
                    .iter()
                    .filter(|(_, p)| p.is_some_and(|p| !(1..=3).contains(&p)))
                    .count() as i64;
                prop_assert_eq!(checker.counters().deferred, orphans);
                prop_assert_eq!(checker.counters().statement, 0);
            }
        }
    }
}
