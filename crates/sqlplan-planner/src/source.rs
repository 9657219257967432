//! FROM-list entries as seen by the planner.

use std::sync::Arc;

use bitflags::bitflags;
use sqlplan_ast::{Expr, ExprKind, NameContext, NameSource};
use sqlplan_types::Table;

use crate::mask::Bitmask;

bitflags! {
    /// How a FROM item is joined to the items before it.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct JoinType: u8 {
        /// `LEFT [OUTER] JOIN`.
        const LEFT  = 0x01;
        /// Explicit `CROSS JOIN`; the order is fixed by the user.
        const CROSS = 0x02;
    }
}

/// `INDEXED BY` / `NOT INDEXED` on a FROM item.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum IndexHint {
    #[default]
    None,
    NotIndexed,
    IndexedBy(String),
}

/// One table in the FROM clause.
#[derive(Debug, Clone)]
pub struct SrcItem {
    pub table: Arc<Table>,
    pub alias: Option<String>,
    pub cursor: i32,
    /// Join operator between this item and the previous one.
    pub join_type: JoinType,
    pub index_hint: IndexHint,
    /// Columns the statement reads from this table. Bit 63 stands for every
    /// column numbered 63 or above.
    pub col_used: Bitmask,
    /// Set by the caller when this item is the subject of a correlated
    /// sub-query that runs more than once.
    pub is_correlated: bool,
}

impl SrcItem {
    #[must_use]
    pub fn new(table: Arc<Table>, cursor: i32) -> Self {
        Self {
            table,
            alias: None,
            cursor,
            join_type: JoinType::empty(),
            index_hint: IndexHint::None,
            col_used: 0,
            is_correlated: false,
        }
    }

    #[must_use]
    pub fn alias(mut self, alias: &str) -> Self {
        self.alias = Some(alias.to_owned());
        self
    }

    #[must_use]
    pub const fn left_join(mut self) -> Self {
        self.join_type = self.join_type.union(JoinType::LEFT);
        self
    }

    #[must_use]
    pub const fn cross_join(mut self) -> Self {
        self.join_type = self.join_type.union(JoinType::CROSS);
        self
    }

    #[must_use]
    pub fn indexed_by(mut self, index: &str) -> Self {
        self.index_hint = IndexHint::IndexedBy(index.to_owned());
        self
    }

    #[must_use]
    pub fn not_indexed(mut self) -> Self {
        self.index_hint = IndexHint::NotIndexed;
        self
    }

    #[must_use]
    pub const fn with_columns_used(mut self, mask: Bitmask) -> Self {
        self.col_used = mask;
        self
    }

    /// The name used in plan descriptions: the alias if any.
    pub fn display_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.table.name)
    }

    pub const fn is_left_join(&self) -> bool {
        self.join_type.contains(JoinType::LEFT)
    }

    /// Record that `column` is read.
    pub fn mark_column_used(&mut self, column: i32) {
        if column >= 0 {
            self.col_used |= 1 << column.min(63);
        }
    }
}

/// The FROM clause.
#[derive(Debug, Clone, Default)]
pub struct SrcList {
    pub items: Vec<SrcItem>,
}

impl SrcList {
    #[must_use]
    pub const fn new() -> Self {
        Self { items: Vec::new() }
    }

    #[must_use]
    pub fn with(mut self, item: SrcItem) -> Self {
        self.items.push(item);
        self
    }

    pub fn push(&mut self, item: SrcItem) {
        self.items.push(item);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn by_cursor(&self, cursor: i32) -> Option<&SrcItem> {
        self.items.iter().find(|i| i.cursor == cursor)
    }

    /// Names visible to expressions over this FROM list.
    pub fn name_context(&self) -> NameContext<'_> {
        NameContext::new(
            self.items
                .iter()
                .map(|i| NameSource {
                    cursor: i.cursor,
                    table: &i.table,
                    alias: i.alias.as_deref(),
                })
                .collect(),
        )
    }

    /// Add every column `expr` reads to its table's `col_used`.
    pub fn mark_columns_used(&mut self, expr: &Expr) {
        if let ExprKind::Column { cursor, column } = expr.kind {
            if let Some(item) = self.items.iter_mut().find(|i| i.cursor == cursor) {
                item.mark_column_used(column);
            }
            return;
        }
        let mut children = Vec::new();
        expr.for_each_child(&mut |c| children.push(c));
        for c in children {
            self.mark_columns_used(c);
        }
    }
}
