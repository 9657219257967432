//! Schema objects as seen by the planner.
//!
//! These are read-only descriptions of tables, indexes and foreign keys. The
//! planner never mutates the schema; statistics are attached by rebuilding
//! the affected [`Index`].

use std::sync::Arc;

use crate::{BINARY, SqliteValue, TypeAffinity, collation_eq};

/// Default row-count estimate for a table with no statistics.
pub const DEFAULT_TABLE_ROWS: u64 = 1_000_000;

/// Number of histogram samples kept per index.
pub const INDEX_SAMPLES: usize = 10;

/// Sort direction of an index column or ORDER BY term.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    /// 0 for ascending, 1 for descending.
    #[inline]
    pub const fn as_bit(self) -> u8 {
        match self {
            Self::Asc => 0,
            Self::Desc => 1,
        }
    }
}

/// Uniqueness conflict resolution of an index. `None` means not unique.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
pub enum OnError {
    #[default]
    None,
    Rollback,
    Abort,
    Fail,
    Ignore,
    Replace,
}

/// How an index came into existence.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
pub enum IndexOrigin {
    /// `CREATE INDEX`.
    #[default]
    CreateIndex,
    /// A UNIQUE constraint.
    Unique,
    /// A PRIMARY KEY constraint that is not an INTEGER PRIMARY KEY.
    PrimaryKey,
    /// Built by the planner for a single statement.
    Automatic,
}

/// A table column.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Column {
    pub name: String,
    pub affinity: TypeAffinity,
    /// Declared collating sequence; `None` means BINARY.
    pub collation: Option<String>,
    pub default: Option<SqliteValue>,
    pub not_null: bool,
}

impl Column {
    #[must_use]
    pub fn new(name: impl Into<String>, affinity: TypeAffinity) -> Self {
        Self {
            name: name.into(),
            affinity,
            collation: None,
            default: None,
            not_null: false,
        }
    }

    #[must_use]
    pub fn with_collation(mut self, collation: impl Into<String>) -> Self {
        self.collation = Some(collation.into());
        self
    }

    #[must_use]
    pub fn with_default(mut self, value: SqliteValue) -> Self {
        self.default = Some(value);
        self
    }

    /// Declared collation, or BINARY.
    pub fn collation_name(&self) -> &str {
        self.collation.as_deref().unwrap_or(BINARY)
    }
}

/// One key column of an index.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct IndexColumn {
    /// Table column number, or -1 for the rowid.
    pub column: i32,
    pub collation: String,
    pub sort_order: SortOrder,
}

/// An index on a table.
///
/// `row_estimates[0]` is the number of rows in the index and
/// `row_estimates[i]` the average number of rows matching a fixed value of
/// the first `i` key columns.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Index {
    pub name: String,
    pub table: String,
    pub root_page: u32,
    pub columns: Vec<IndexColumn>,
    pub on_error: OnError,
    pub origin: IndexOrigin,
    pub row_estimates: Vec<u64>,
    /// Evenly spaced samples of the first key column, in index order.
    pub samples: Option<Vec<SqliteValue>>,
    /// Entries are not stored in key order (a hash-style index).
    pub unordered: bool,
}

impl Index {
    /// An index over the named table columns using each column's declared
    /// collation, ascending. Row estimates are filled in when the index is
    /// attached with [`Table::add_index`].
    ///
    /// # Panics
    ///
    /// Panics if a column name does not exist on `table`.
    #[must_use]
    pub fn on(name: impl Into<String>, table: &Table, columns: &[&str]) -> Self {
        let columns = columns
            .iter()
            .map(|c| {
                let idx = table
                    .column_index(c)
                    .unwrap_or_else(|| panic!("no such column: {c}"));
                IndexColumn {
                    column: idx as i32,
                    collation: table.columns[idx].collation_name().to_owned(),
                    sort_order: SortOrder::Asc,
                }
            })
            .collect();
        Self {
            name: name.into(),
            table: table.name.clone(),
            root_page: 0,
            columns,
            on_error: OnError::None,
            origin: IndexOrigin::CreateIndex,
            row_estimates: Vec::new(),
            samples: None,
            unordered: false,
        }
    }

    #[must_use]
    pub fn unique(mut self) -> Self {
        self.on_error = OnError::Abort;
        if matches!(self.origin, IndexOrigin::CreateIndex) {
            self.origin = IndexOrigin::Unique;
        }
        self
    }

    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.on_error = OnError::Abort;
        self.origin = IndexOrigin::PrimaryKey;
        self
    }

    #[must_use]
    pub fn with_collation(mut self, column: usize, collation: impl Into<String>) -> Self {
        self.columns[column].collation = collation.into();
        self
    }

    #[must_use]
    pub fn descending(mut self, column: usize) -> Self {
        self.columns[column].sort_order = SortOrder::Desc;
        self
    }

    #[must_use]
    pub fn with_root(mut self, root_page: u32) -> Self {
        self.root_page = root_page;
        self
    }

    #[must_use]
    pub fn with_row_estimates(mut self, estimates: Vec<u64>) -> Self {
        self.row_estimates = estimates;
        self
    }

    #[must_use]
    pub fn with_samples(mut self, samples: Vec<SqliteValue>) -> Self {
        self.samples = Some(samples);
        self
    }

    #[inline]
    pub const fn is_unique(&self) -> bool {
        !matches!(self.on_error, OnError::None)
    }

    #[inline]
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Position of table column `column` within the key, if present.
    pub fn position_of(&self, column: i32) -> Option<usize> {
        self.columns.iter().position(|c| c.column == column)
    }

    /// Row estimate for an equality prefix of `n_eq` columns.
    #[allow(clippy::cast_precision_loss)]
    pub fn row_estimate(&self, n_eq: usize) -> f64 {
        self.row_estimates
            .get(n_eq)
            .map_or(1.0, |&n| n as f64)
    }

    /// Fill `row_estimates` with the default guesses: the table size, then
    /// 10, 9, 8, ... down to 5 rows per distinct prefix, and 1 for the full
    /// key of a unique index.
    pub fn set_default_row_estimates(&mut self, table_rows: u64) {
        let mut estimates = Vec::with_capacity(self.columns.len() + 1);
        estimates.push(table_rows.max(10));
        let mut y = 10;
        for _ in 0..self.columns.len() {
            estimates.push(y);
            if y > 5 {
                y -= 1;
            }
        }
        if self.is_unique() {
            if let Some(last) = estimates.last_mut() {
                *last = 1;
            }
        }
        self.row_estimates = estimates;
    }

    /// Affinity string for a key built from this index: one character per
    /// column followed by INTEGER for the trailing rowid.
    pub fn affinity_string(&self, table: &Table) -> String {
        self.columns
            .iter()
            .map(|c| table.column_affinity(c.column).as_char())
            .chain(std::iter::once(TypeAffinity::Integer.as_char()))
            .collect()
    }

    /// Collation names of the key columns.
    pub fn collations(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.collation.clone()).collect()
    }
}

/// Referential action of a foreign key.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
pub enum FkAction {
    #[default]
    None,
    Restrict,
    SetNull,
    SetDefault,
    Cascade,
}

/// One column mapping of a foreign key.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FkColumn {
    /// Column number in the child table.
    pub child_column: usize,
    /// Named parent column; `None` when the parent's primary key is implied.
    pub parent_column: Option<String>,
}

/// A foreign-key constraint declared on a child table.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ForeignKey {
    pub child_table: String,
    pub parent_table: String,
    pub columns: Vec<FkColumn>,
    pub deferred: bool,
    pub on_delete: FkAction,
    pub on_update: FkAction,
}

impl ForeignKey {
    #[inline]
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Action for a DELETE (`is_update == false`) or UPDATE of the parent.
    pub const fn action(&self, is_update: bool) -> FkAction {
        if is_update {
            self.on_update
        } else {
            self.on_delete
        }
    }
}

/// A table (or virtual table) definition.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Table {
    pub name: String,
    pub root_page: u32,
    /// Database number (0 main, 1 temp, ...).
    pub db: i32,
    pub columns: Vec<Column>,
    /// Column that aliases the rowid (INTEGER PRIMARY KEY).
    pub ipk: Option<usize>,
    pub indexes: Vec<Arc<Index>>,
    pub row_estimate: u64,
    pub foreign_keys: Vec<ForeignKey>,
    /// Module name for a virtual table.
    pub virtual_module: Option<String>,
}

impl Table {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            root_page: 0,
            db: 0,
            columns: Vec::new(),
            ipk: None,
            indexes: Vec::new(),
            row_estimate: DEFAULT_TABLE_ROWS,
            foreign_keys: Vec::new(),
            virtual_module: None,
        }
    }

    #[must_use]
    pub fn with_column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    /// Add a column from a name and declared type.
    #[must_use]
    pub fn column(self, name: &str, type_name: &str) -> Self {
        self.with_column(Column::new(name, TypeAffinity::from_type_name(type_name)))
    }

    /// Mark column `column` as the INTEGER PRIMARY KEY.
    #[must_use]
    pub fn with_ipk(mut self, column: usize) -> Self {
        self.ipk = Some(column);
        self
    }

    #[must_use]
    pub fn with_root(mut self, root_page: u32) -> Self {
        self.root_page = root_page;
        self
    }

    #[must_use]
    pub fn with_row_estimate(mut self, rows: u64) -> Self {
        self.row_estimate = rows;
        self
    }

    #[must_use]
    pub fn with_virtual_module(mut self, module: impl Into<String>) -> Self {
        self.virtual_module = Some(module.into());
        self
    }

    #[must_use]
    pub fn with_foreign_key(mut self, fk: ForeignKey) -> Self {
        self.foreign_keys.push(fk);
        self
    }

    /// Attach an index, filling in default row estimates when none are set.
    #[must_use]
    pub fn with_index(mut self, index: Index) -> Self {
        self.add_index(index);
        self
    }

    pub fn add_index(&mut self, mut index: Index) {
        if index.row_estimates.len() != index.columns.len() + 1 {
            index.set_default_row_estimates(self.row_estimate);
        }
        self.indexes.push(Arc::new(index));
    }

    /// Case-insensitive column lookup.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Affinity of column `column`; the rowid (-1) is INTEGER.
    pub fn column_affinity(&self, column: i32) -> TypeAffinity {
        usize::try_from(column)
            .ok()
            .and_then(|c| self.columns.get(c))
            .map_or(TypeAffinity::Integer, |c| c.affinity)
    }

    /// Declared collation of column `column`; the rowid uses BINARY.
    pub fn column_collation(&self, column: i32) -> &str {
        usize::try_from(column)
            .ok()
            .and_then(|c| self.columns.get(c))
            .map_or(BINARY, Column::collation_name)
    }

    /// Name of column `column`, or "rowid".
    pub fn column_name(&self, column: i32) -> &str {
        usize::try_from(column)
            .ok()
            .and_then(|c| self.columns.get(c))
            .map_or("rowid", |c| c.name.as_str())
    }

    pub fn index(&self, name: &str) -> Option<&Arc<Index>> {
        self.indexes.iter().find(|i| i.name.eq_ignore_ascii_case(name))
    }

    /// The index implementing a non-INTEGER PRIMARY KEY.
    pub fn primary_key_index(&self) -> Option<&Arc<Index>> {
        self.indexes
            .iter()
            .find(|i| matches!(i.origin, IndexOrigin::PrimaryKey))
    }

    #[inline]
    pub const fn is_virtual(&self) -> bool {
        self.virtual_module.is_some()
    }

    /// Whether `name` refers to the INTEGER PRIMARY KEY column.
    pub fn is_ipk_name(&self, name: &str) -> bool {
        self.ipk
            .and_then(|i| self.columns.get(i))
            .is_some_and(|c| c.name.eq_ignore_ascii_case(name))
    }
}

/// The set of tables visible to one statement compilation.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    tables: Vec<Arc<Table>>,
}

impl Schema {
    #[must_use]
    pub const fn new() -> Self {
        Self { tables: Vec::new() }
    }

    pub fn add_table(&mut self, table: Table) -> Arc<Table> {
        let table = Arc::new(table);
        self.tables.push(Arc::clone(&table));
        table
    }

    pub fn table(&self, name: &str) -> Option<&Arc<Table>> {
        self.tables.iter().find(|t| t.name.eq_ignore_ascii_case(name))
    }

    pub fn tables(&self) -> &[Arc<Table>] {
        &self.tables
    }

    /// Foreign keys, on any table, whose parent is `parent`: pairs of child
    /// table and position within its `foreign_keys`.
    pub fn referencing(&self, parent: &str) -> Vec<(Arc<Table>, usize)> {
        self.tables
            .iter()
            .flat_map(|t| {
                t.foreign_keys
                    .iter()
                    .enumerate()
                    .filter(|(_, fk)| collation_eq(&fk.parent_table, parent))
                    .map(|(i, _)| (Arc::clone(t), i))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NOCASE;

    fn t1() -> Table {
        Table::new("t1")
            .column("a", "INTEGER")
            .column("b", "TEXT")
            .column("c", "")
    }

    #[test]
    fn test_default_row_estimates() {
        let table = t1();
        let mut idx = Index::on("i1", &table, &["a", "b", "c"]);
        idx.set_default_row_estimates(table.row_estimate);
        assert_eq!(idx.row_estimates, vec![1_000_000, 10, 9, 8]);

        let mut uniq = Index::on("i2", &table, &["a"]).unique();
        uniq.set_default_row_estimates(3);
        assert_eq!(uniq.row_estimates, vec![10, 1]);
    }

    #[test]
    fn test_default_row_estimates_floor_at_five() {
        let mut table = Table::new("wide");
        for i in 0..8 {
            table = table.column(&format!("c{i}"), "INT");
        }
        let names: Vec<String> = (0..8).map(|i| format!("c{i}")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let mut idx = Index::on("w", &table, &refs);
        idx.set_default_row_estimates(100);
        assert_eq!(idx.row_estimates, vec![100, 10, 9, 8, 7, 6, 5, 5, 5]);
    }

    #[test]
    fn test_add_index_fills_estimates() {
        let base = t1();
        let idx = Index::on("i1", &base, &["a"]);
        let table = base.with_index(idx);
        assert_eq!(table.indexes[0].row_estimates.len(), 2);
    }

    #[test]
    fn test_affinity_string() {
        let table = t1();
        let idx = Index::on("i1", &table, &["b", "a"]);
        assert_eq!(idx.affinity_string(&table), "BDD");
    }

    #[test]
    fn test_column_lookup_and_collation() {
        let table = Table::new("p")
            .with_column(Column::new("k", TypeAffinity::Text).with_collation(NOCASE))
            .column("v", "INT");
        assert_eq!(table.column_index("K"), Some(0));
        assert_eq!(table.column_collation(0), NOCASE);
        assert_eq!(table.column_collation(1), BINARY);
        assert_eq!(table.column_collation(-1), BINARY);
        assert_eq!(table.column_affinity(-1), TypeAffinity::Integer);
        assert_eq!(table.column_name(-1), "rowid");
        let idx = Index::on("pk", &table, &["k"]);
        assert_eq!(idx.columns[0].collation, NOCASE);
    }

    #[test]
    fn test_schema_referencing() {
        let mut schema = Schema::new();
        schema.add_table(Table::new("parent").column("k", "INT"));
        schema.add_table(Table::new("child").column("p", "INT").with_foreign_key(
            ForeignKey {
                child_table: "child".to_owned(),
                parent_table: "PARENT".to_owned(),
                columns: vec![FkColumn {
                    child_column: 0,
                    parent_column: Some("k".to_owned()),
                }],
                deferred: false,
                on_delete: FkAction::Cascade,
                on_update: FkAction::None,
            },
        ));
        let refs = schema.referencing("parent");
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].0.name, "child");
        assert_eq!(refs[0].0.foreign_keys[refs[0].1].action(false), FkAction::Cascade);
    }
}
