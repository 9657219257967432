//! Sparse cursor numbers to dense bitmask positions.
//!
//! Cursor numbers are handed out per statement and may have gaps. The
//! planner only ever reasons about sets of FROM-list tables, so each cursor
//! is given one bit of a [`Bitmask`] in the order the cursors are registered.

use sqlplan_ast::{Expr, ExprKind, Select};
use sqlplan_error::{MAX_JOIN_TABLES, PlanError, Result};

/// A set of tables, one bit per registered cursor.
pub type Bitmask = u64;

/// Every bit set.
pub const ALL_TABLES: Bitmask = !0;

/// Maps cursor numbers onto bit positions.
///
/// A fixed array with a linear scan: there are never more than
/// [`MAX_JOIN_TABLES`] entries.
#[derive(Debug, Clone)]
pub struct CursorMaskSet {
    ix: [i32; MAX_JOIN_TABLES],
    n: usize,
}

impl Default for CursorMaskSet {
    fn default() -> Self {
        Self::new()
    }
}

impl CursorMaskSet {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ix: [0; MAX_JOIN_TABLES],
            n: 0,
        }
    }

    /// Number of registered cursors.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.n
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// The bit assigned to `cursor`, or 0 if it was never registered.
    #[must_use]
    pub fn get_mask(&self, cursor: i32) -> Bitmask {
        self.ix[..self.n]
            .iter()
            .position(|&c| c == cursor)
            .map_or(0, |i| 1 << i)
    }

    /// Assign the next free bit to `cursor`.
    pub fn create_mask(&mut self, cursor: i32) -> Result<Bitmask> {
        if self.n >= MAX_JOIN_TABLES {
            return Err(PlanError::TooManyTables {
                max: MAX_JOIN_TABLES,
            });
        }
        debug_assert_eq!(self.get_mask(cursor), 0, "cursor {cursor} registered twice");
        self.ix[self.n] = cursor;
        self.n += 1;
        Ok(1 << (self.n - 1))
    }

    /// Tables referenced anywhere in `expr`, sub-selects included.
    #[must_use]
    pub fn expr_usage(&self, expr: &Expr) -> Bitmask {
        if let ExprKind::Column { cursor, .. } = expr.kind {
            return self.get_mask(cursor);
        }
        let mut mask = 0;
        expr.for_each_child(&mut |child| mask |= self.expr_usage(child));
        if let Some(sel) = expr.subselect() {
            mask |= self.select_usage(sel);
        }
        mask
    }

    /// Union of [`expr_usage`](Self::expr_usage) over a list.
    #[must_use]
    pub fn list_usage<'e>(&self, list: impl IntoIterator<Item = &'e Expr>) -> Bitmask {
        list.into_iter().fold(0, |m, e| m | self.expr_usage(e))
    }

    /// Outer tables referenced by a correlated sub-select.
    #[must_use]
    pub fn select_usage(&self, select: &Select) -> Bitmask {
        let mut mask = 0;
        let mut nested = Vec::new();
        select.for_each_expr(
            &mut |e| mask |= self.expr_usage(e),
            &mut |s| nested.push(s),
        );
        for s in nested {
            mask |= self.select_usage(s);
        }
        mask
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sparse_cursors_map_to_dense_bits() {
        let mut set = CursorMaskSet::new();
        for c in [4, 5, 8, 29] {
            set.create_mask(c).unwrap();
        }
        assert_eq!(set.get_mask(4), 0b0001);
        assert_eq!(set.get_mask(8), 0b0100);
        assert_eq!(set.get_mask(29), 0b1000);
        assert_eq!(set.get_mask(7), 0);
        assert_eq!(set.len(), 4);
    }

    #[test]
    fn test_capacity_is_bounded() {
        let mut set = CursorMaskSet::new();
        for c in 0..64 {
            set.create_mask(c * 3).unwrap();
        }
        assert_eq!(set.get_mask(63 * 3), 1 << 63);
        assert!(matches!(
            set.create_mask(1000),
            Err(PlanError::TooManyTables { max: 64 })
        ));
    }

    #[test]
    fn test_expr_usage_descends_into_subselects() {
        let mut set = CursorMaskSet::new();
        set.create_mask(0).unwrap();
        set.create_mask(1).unwrap();
        set.create_mask(2).unwrap();
        let sub = Select {
            result: vec![Expr::column(2, 0)],
            ..Select::default()
        };
        let e = Expr::column(0, 1)
            .eq(Expr::int(3))
            .and(Expr::column(1, 0).in_select(sub));
        assert_eq!(set.expr_usage(&e), 0b111);
        assert_eq!(set.list_usage([&Expr::int(1), &Expr::column(1, 4)]), 0b010);
    }
}
