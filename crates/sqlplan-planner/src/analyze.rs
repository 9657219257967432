//! Term analysis.
//!
//! Fills in the dependency masks and operator of each term and appends the
//! derived terms the cost model can use: the commuted copy of a column to
//! column comparison, the two halves of a BETWEEN, the range implied by a
//! LIKE prefix, the MATCH constraint for virtual tables, the `col > NULL`
//! helper for IS NOT NULL, and the IN rewrite of an OR (see `or_clause`).

use sqlplan_ast::{BinaryOp, Expr, ExprFlags, ExprKind, InSet, LikeOp};
use sqlplan_observability::{NoOpObserver, PlannerEvent, PlannerObserver};
use sqlplan_types::{BINARY, NOCASE, SqliteValue};
use tracing::trace;

use crate::clause::WhereClause;
use crate::config::PlannerConfig;
use crate::like::{is_like_or_glob, prefix_successor};
use crate::mask::{Bitmask, CursorMaskSet};
use crate::term::{OperatorMask, TermFlags, TermId, allowed_op, left_operand};

static NO_OBSERVER: NoOpObserver = NoOpObserver;

/// Bit recorded in the variable mask when the value bound to `?n` shaped
/// the plan. Parameters past 32 share the top bit.
#[must_use]
pub const fn variable_bit(n: i32) -> u32 {
    if n > 32 || n < 1 {
        0x8000_0000
    } else {
        1 << (n - 1)
    }
}

/// Mark `new` as coming from the same ON clause as `base`.
pub(crate) fn transfer_join_markings(new: &mut Expr, base: &Expr) {
    if base.has_flag(ExprFlags::FROM_JOIN) {
        new.flags |= ExprFlags::FROM_JOIN;
        new.right_join_table = base.right_join_table;
    }
}

/// Swap the operands of a comparison and mirror the operator. Collations
/// stay with their position, so the comparison keeps its collating
/// sequence.
pub(crate) fn commute(expr: &mut Expr) {
    let ExprKind::Binary { op, left, right } = &mut expr.kind else {
        return;
    };
    let left_coll = left.collation_seq().map(str::to_owned);
    let right_coll = right.collation_seq().map(str::to_owned);
    let left_explicit = left.has_flag(ExprFlags::EXPLICIT_COLLATE);
    let right_explicit = right.has_flag(ExprFlags::EXPLICIT_COLLATE);
    std::mem::swap(left, right);
    left.collation = left_coll;
    left.flags.set(ExprFlags::EXPLICIT_COLLATE, left_explicit);
    right.collation = right_coll;
    right.flags.set(ExprFlags::EXPLICIT_COLLATE, right_explicit);
    *op = op.commuted();
}

/// State shared by the analysis of one statement's clauses.
pub struct Analyzer<'a> {
    pub masks: &'a CursorMaskSet,
    pub config: &'a PlannerConfig,
    /// Values currently bound to the statement's parameters.
    pub bound_values: &'a [SqliteValue],
    pub observer: &'a dyn PlannerObserver,
    /// Cursors of virtual tables. LIKE on their columns is left to the
    /// module.
    pub vtab_mask: Bitmask,
    /// Parameters whose values were used; the statement must be
    /// re-planned when any of them is rebound.
    pub var_mask: u32,
}

impl<'a> Analyzer<'a> {
    pub fn new(masks: &'a CursorMaskSet, config: &'a PlannerConfig) -> Self {
        Self {
            masks,
            config,
            bound_values: &[],
            observer: &NO_OBSERVER,
            vtab_mask: 0,
            var_mask: 0,
        }
    }

    #[must_use]
    pub const fn with_bound_values(mut self, values: &'a [SqliteValue]) -> Self {
        self.bound_values = values;
        self
    }

    #[must_use]
    pub fn with_observer(mut self, observer: &'a dyn PlannerObserver) -> Self {
        self.observer = observer;
        self
    }

    /// Analyze every term currently in the clause.
    ///
    /// Walks from the last term to the first. Terms appended along the way
    /// are analyzed where they are created and never revisited here.
    pub fn analyze_all(&mut self, wc: &mut WhereClause) {
        for i in (0..wc.len()).rev() {
            self.analyze(wc, TermId(i));
        }
    }

    /// Analyze one term, appending any derived terms to `wc`.
    pub fn analyze(&mut self, wc: &mut WhereClause, id: TermId) {
        let masks = self.masks;
        let expr = wc.term(id).expr.clone();

        let prereq_left = left_operand(&expr).map_or(0, |e| masks.expr_usage(e));
        let prereq_right = match &expr.kind {
            ExprKind::In {
                set: InSet::List(list),
                ..
            } => masks.list_usage(list),
            ExprKind::In {
                set: InSet::Subquery(sel),
                ..
            } => masks.select_usage(sel),
            ExprKind::Binary { right, .. } => masks.expr_usage(right),
            _ => 0,
        };
        let mut prereq_all = masks.expr_usage(&expr);
        let mut extra_right = 0;
        if expr.has_flag(ExprFlags::FROM_JOIN) {
            // ON-clause terms may not drive an index on a table to the
            // left of their join.
            let x = masks.get_mask(expr.right_join_table);
            prereq_all |= x;
            extra_right = x.saturating_sub(1);
        }

        let t = wc.term_mut(id);
        t.prereq_left = prereq_left;
        t.prereq_right = prereq_right;
        t.prereq_all = prereq_all;
        t.left_cursor = -1;
        t.left_column = -1;
        t.parent = None;
        t.operator = OperatorMask::empty();

        if allowed_op(&expr) && prereq_right & prereq_left == 0 {
            if let Some((cursor, column)) = left_operand(&expr).and_then(Expr::as_column) {
                t.left_cursor = cursor;
                t.left_column = column;
                t.operator = OperatorMask::from_expr(&expr);
            }
            let right_is_column = matches!(
                &expr.kind,
                ExprKind::Binary { right, .. } if right.as_column().is_some()
            );
            if right_is_column {
                let target = if t.left_cursor >= 0 {
                    t.child_count = 1;
                    t.flags |= TermFlags::COPIED;
                    let mut dup = expr.clone();
                    commute(&mut dup);
                    let new_id = wc.insert(dup, TermFlags::VIRTUAL | TermFlags::DYNAMIC);
                    wc.term_mut(new_id).parent = Some(id);
                    new_id
                } else {
                    commute(&mut wc.term_mut(id).expr);
                    id
                };
                let n = wc.term_mut(target);
                if let Some((cursor, column)) = n.left_operand().and_then(Expr::as_column) {
                    n.left_cursor = cursor;
                    n.left_column = column;
                }
                n.prereq_left = prereq_right;
                n.prereq_right = prereq_left | extra_right;
                n.prereq_all = prereq_all;
                n.operator = OperatorMask::from_expr(&n.expr);
            }
        } else if let ExprKind::Between {
            expr: lhs,
            low,
            high,
            not: false,
        } = &expr.kind
        {
            if wc.split_op == BinaryOp::And {
                for (op, bound) in [(BinaryOp::Ge, low), (BinaryOp::Le, high)] {
                    let mut e = Expr::binary(op, (**lhs).clone(), (**bound).clone());
                    transfer_join_markings(&mut e, &expr);
                    let new_id = wc.insert(e, TermFlags::VIRTUAL | TermFlags::DYNAMIC);
                    self.analyze(wc, new_id);
                    wc.term_mut(new_id).parent = Some(id);
                }
                wc.term_mut(id).child_count = 2;
            }
        } else if matches!(expr.as_binary(), Some((BinaryOp::Or, _, _))) {
            debug_assert_eq!(wc.split_op, BinaryOp::And);
            self.analyze_or_term(wc, id);
        }

        if wc.split_op == BinaryOp::And {
            self.add_like_range(wc, id, &expr);
        }
        self.add_match_constraint(wc, id, &expr);
        if self.config.use_stat2 {
            self.add_not_null_helper(wc, id, &expr);
        }

        let t = wc.term_mut(id);
        t.prereq_right |= extra_right;

        trace!(
            target: "sqlplan.planner",
            term = id.0,
            expr = %expr,
            prereq_all = t.prereq_all,
            operator = t.operator.bits(),
            "analyzed term"
        );
        if self.config.trace {
            self.observer.on_event(&PlannerEvent::TermAnalyzed {
                term: id.0,
                expr: expr.to_string(),
                prereq_all: t.prereq_all,
                indexable: !t.operator.is_empty(),
            });
        }
    }

    /// `x LIKE 'abc%'` gains `x >= 'abc' AND x < 'abd'`.
    fn add_like_range(&mut self, wc: &mut WhereClause, id: TermId, expr: &Expr) {
        let Some(like) = is_like_or_glob(expr, self.config.case_sensitive_like, self.bound_values)
        else {
            return;
        };
        let ExprKind::Like { expr: column, .. } = &expr.kind else {
            return;
        };
        if let Some((cursor, _)) = column.as_column() {
            if self.vtab_mask & self.masks.get_mask(cursor) != 0 {
                return;
            }
        }
        if let Some(n) = like.variable {
            self.var_mask |= variable_bit(n);
        }
        let Some((upper, exact)) = prefix_successor(&like.prefix, like.no_case) else {
            return;
        };
        let is_complete = like.is_complete && exact;
        let coll = if like.no_case { NOCASE } else { BINARY };

        let mut ids = [id; 2];
        for (slot, (op, bound)) in ids
            .iter_mut()
            .zip([(BinaryOp::Ge, like.prefix.as_str()), (BinaryOp::Lt, upper.as_str())])
        {
            let mut e = Expr::binary(op, (**column).clone().collate(coll), Expr::text(bound));
            transfer_join_markings(&mut e, expr);
            let new_id = wc.insert(e, TermFlags::VIRTUAL | TermFlags::DYNAMIC);
            self.analyze(wc, new_id);
            *slot = new_id;
        }
        if is_complete {
            for child in ids {
                wc.term_mut(child).parent = Some(id);
            }
            wc.term_mut(id).child_count = 2;
        }
    }

    /// `col MATCH expr` gains a MATCH-operator term for virtual tables.
    fn add_match_constraint(&self, wc: &mut WhereClause, id: TermId, expr: &Expr) {
        let ExprKind::Like {
            op: LikeOp::Match,
            expr: column,
            pattern,
            ..
        } = &expr.kind
        else {
            return;
        };
        let Some((cursor, col)) = column.as_column() else {
            return;
        };
        let prereq_expr = self.masks.expr_usage(pattern);
        let prereq_column = self.masks.expr_usage(column);
        if prereq_expr & prereq_column != 0 {
            return;
        }
        let prereq_all = wc.term(id).prereq_all;
        let new_id = wc.insert(expr.clone(), TermFlags::VIRTUAL | TermFlags::DYNAMIC);
        let n = wc.term_mut(new_id);
        n.prereq_right = prereq_expr;
        n.prereq_all = prereq_all;
        n.left_cursor = cursor;
        n.left_column = col;
        n.operator = OperatorMask::MATCH;
        n.parent = Some(id);
        let t = wc.term_mut(id);
        t.child_count = 1;
        t.flags |= TermFlags::COPIED;
    }

    /// `col IS NOT NULL` gains `col > NULL`, which lets the histogram
    /// estimate the non-NULL fraction. It is never tested as a filter.
    fn add_not_null_helper(&self, wc: &mut WhereClause, id: TermId, expr: &Expr) {
        let ExprKind::NotNull(inner) = &expr.kind else {
            return;
        };
        let Some((cursor, column)) = inner.as_column() else {
            return;
        };
        if column < 0 {
            return;
        }
        let mut e = Expr::binary(BinaryOp::Gt, (**inner).clone(), Expr::null());
        transfer_join_markings(&mut e, expr);
        let prereq_all = wc.term(id).prereq_all;
        let new_id = wc.insert(
            e,
            TermFlags::VIRTUAL | TermFlags::DYNAMIC | TermFlags::VNULL,
        );
        let n = wc.term_mut(new_id);
        n.prereq_right = 0;
        n.prereq_all = prereq_all;
        n.left_cursor = cursor;
        n.left_column = column;
        n.operator = OperatorMask::GT;
        n.parent = Some(id);
        let t = wc.term_mut(id);
        t.child_count = 1;
        t.flags |= TermFlags::COPIED;
    }
}
