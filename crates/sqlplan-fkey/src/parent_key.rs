//! Locating the parent key of a foreign key.

use std::sync::Arc;

use sqlplan_error::{PlanError, Result};
use sqlplan_planner::PlanContext;
use sqlplan_types::{ForeignKey, Index, IndexOrigin, Table};
use tracing::trace;

/// How a foreign key's parent rows are found.
#[derive(Debug, Clone, PartialEq)]
pub struct ParentKey {
    /// Unique index on the parent key, or `None` when the key is the
    /// parent's INTEGER PRIMARY KEY.
    pub index: Option<Arc<Index>>,
    /// Child column for each parent key column, in index column order.
    /// -1 stands for the child's rowid.
    pub child_columns: Vec<i32>,
}

impl ParentKey {
    pub fn is_rowid(&self) -> bool {
        self.index.is_none()
    }

    /// Parent table column of key column `i`; -1 for the rowid.
    pub fn parent_column(&self, parent: &Table, i: usize) -> i32 {
        match &self.index {
            Some(idx) => {
                let col = idx.columns[i].column;
                if parent.ipk.is_some_and(|p| p as i32 == col) {
                    -1
                } else {
                    col
                }
            }
            None => -1,
        }
    }

    /// Parent table column of key column `i` as the index declares it, even
    /// when that column is the INTEGER PRIMARY KEY; -1 for a rowid key.
    pub fn declared_column(&self, i: usize) -> i32 {
        self.index.as_ref().map_or(-1, |idx| idx.columns[i].column)
    }

    /// Replace references to the child's INTEGER PRIMARY KEY with the rowid.
    pub(crate) fn map_child_ipk(&mut self, child: &Table) {
        if let Some(ipk) = child.ipk {
            for col in &mut self.child_columns {
                if *col == ipk as i32 {
                    *col = -1;
                }
            }
        }
    }
}

/// Whether every column of `idx` uses its table column's declared collation
/// and names one of the parent columns of `fk`. On success returns the child
/// column for each index column.
fn match_named_columns(parent: &Table, idx: &Index, fk: &ForeignKey) -> Option<Vec<i32>> {
    let mut child_columns = Vec::with_capacity(idx.columns.len());
    for ic in &idx.columns {
        if !ic
            .collation
            .eq_ignore_ascii_case(parent.column_collation(ic.column))
        {
            return None;
        }
        let name = parent.column_name(ic.column);
        let fc = fk.columns.iter().find(|c| {
            c.parent_column
                .as_deref()
                .is_some_and(|p| p.eq_ignore_ascii_case(name))
        })?;
        child_columns.push(fc.child_column as i32);
    }
    Some(child_columns)
}

/// Find a unique index, or the rowid, on `parent` that the parent key of
/// `fk` can be looked up through.
///
/// With no explicit parent columns the parent's PRIMARY KEY is used. Index
/// columns must use the collation declared on their table column. Returns
/// `None` when no such index exists.
pub fn locate_parent_key_index(parent: &Table, fk: &ForeignKey) -> Option<ParentKey> {
    let n_col = fk.column_count();
    let first = fk.columns.first()?.parent_column.as_deref();

    if n_col == 1 && parent.ipk.is_some() {
        let rowid = first.is_none_or(|name| parent.is_ipk_name(name));
        if rowid {
            return Some(ParentKey {
                index: None,
                child_columns: vec![fk.columns[0].child_column as i32],
            });
        }
    }

    for idx in &parent.indexes {
        if idx.column_count() != n_col || !idx.is_unique() {
            continue;
        }
        let child_columns = if first.is_none() {
            if !matches!(idx.origin, IndexOrigin::PrimaryKey) {
                continue;
            }
            fk.columns.iter().map(|c| c.child_column as i32).collect()
        } else {
            match match_named_columns(parent, idx, fk) {
                Some(cols) => cols,
                None => {
                    trace!(
                        target: "sqlplan.fkey",
                        index = %idx.name,
                        parent = %parent.name,
                        "index unusable as parent key"
                    );
                    continue;
                }
            }
        };
        return Some(ParentKey {
            index: Some(Arc::clone(idx)),
            child_columns,
        });
    }
    None
}

/// [`locate_parent_key_index`] reporting a missing parent key as
/// "foreign key mismatch". While `ctx.disable_triggers` is set the error is
/// suppressed and `None` returned instead.
pub fn locate_parent_key(
    ctx: &PlanContext,
    parent: &Table,
    fk: &ForeignKey,
) -> Result<Option<ParentKey>> {
    match locate_parent_key_index(parent, fk) {
        Some(key) => Ok(Some(key)),
        None if ctx.disable_triggers => Ok(None),
        None => Err(PlanError::ForeignKeyMismatch {
            child: fk.child_table.clone(),
            parent: parent.name.clone(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use sqlplan_types::{FkAction, FkColumn, NOCASE};

    use super::*;

    fn fk(child: &str, parent: &str, cols: &[(usize, Option<&str>)]) -> ForeignKey {
        ForeignKey {
            child_table: child.to_owned(),
            parent_table: parent.to_owned(),
            columns: cols
                .iter()
                .map(|&(child_column, p)| FkColumn {
                    child_column,
                    parent_column: p.map(str::to_owned),
                })
                .collect(),
            deferred: false,
            on_delete: FkAction::None,
            on_update: FkAction::None,
        }
    }

    #[test]
    fn test_rowid_parent_key() {
        let parent = Table::new("parent").column("id", "INTEGER").column("k", "TEXT").with_ipk(0);
        let key = locate_parent_key_index(&parent, &fk("child", "parent", &[(1, Some("id"))])).unwrap();
        assert!(key.is_rowid());
        assert_eq!(key.child_columns, vec![1]);

        let key = locate_parent_key_index(&parent, &fk("child", "parent", &[(2, None)])).unwrap();
        assert!(key.is_rowid());
        assert_eq!(key.child_columns, vec![2]);
    }

    #[test]
    fn test_unique_index_maps_columns_in_index_order() {
        let parent = Table::new("parent").column("a", "TEXT").column("b", "TEXT");
        let idx = Index::on("parent_ba", &parent, &["b", "a"]).unique().with_root(3);
        let parent = parent.with_index(idx);
        let key = locate_parent_key_index(
            &parent,
            &fk("child", "parent", &[(0, Some("a")), (1, Some("b"))]),
        )
        .unwrap();
        assert_eq!(key.index.as_ref().unwrap().name, "parent_ba");
        assert_eq!(key.child_columns, vec![1, 0]);
        assert_eq!(key.parent_column(&parent, 0), 1);
    }

    #[test]
    fn test_non_unique_or_wrong_width_index_rejected() {
        let parent = Table::new("parent").column("a", "TEXT").column("b", "TEXT");
        let plain = Index::on("parent_a", &parent, &["a"]);
        let wide = Index::on("parent_ab", &parent, &["a", "b"]).unique();
        let parent = parent.with_index(plain).with_index(wide);
        assert!(locate_parent_key_index(&parent, &fk("child", "parent", &[(0, Some("a"))])).is_none());
    }

    #[test]
    fn test_implied_primary_key_index() {
        let parent = Table::new("parent").column("a", "TEXT").column("b", "TEXT");
        let uniq = Index::on("parent_u", &parent, &["a", "b"]).unique();
        let pk = Index::on("parent_pk", &parent, &["b", "a"]).primary_key();
        let parent = parent.with_index(uniq).with_index(pk);
        let key = locate_parent_key_index(&parent, &fk("child", "parent", &[(3, None), (4, None)])).unwrap();
        assert_eq!(key.index.unwrap().name, "parent_pk");
        assert_eq!(key.child_columns, vec![3, 4]);
    }

    #[test]
    fn test_collation_mismatch_reports_foreign_key_mismatch() {
        let parent = Table::new("parent").column("k", "TEXT");
        let idx = Index::on("parent_k", &parent, &["k"]).unique().with_collation(0, NOCASE);
        let parent = parent.with_index(idx);
        let fk = fk("child", "parent", &[(0, Some("k"))]);

        assert!(locate_parent_key_index(&parent, &fk).is_none());
        let mut ctx = PlanContext::default();
        let err = locate_parent_key(&ctx, &parent, &fk).unwrap_err();
        assert_eq!(err.to_string(), "foreign key mismatch");
        assert!(err.is_schema_error());

        ctx.disable_triggers = true;
        assert_eq!(locate_parent_key(&ctx, &parent, &fk).unwrap(), None);
    }

    #[test]
    fn test_collation_matching_declared_column_collation_is_accepted() {
        let parent = Table::new("parent")
            .with_column(sqlplan_types::Column::new("k", sqlplan_types::TypeAffinity::Text).with_collation(NOCASE));
        let idx = Index::on("parent_k", &parent, &["k"]).unique();
        let parent = parent.with_index(idx);
        assert!(locate_parent_key_index(&parent, &fk("child", "parent", &[(0, Some("k"))])).is_some());
    }
}
