//! OR-term analysis.
//!
//! An OR term is useful in two ways:
//!
//! 1. When every disjunct is an equality on the same column of the same
//!    table, `x=a OR x=b OR x=c` is rewritten as `x IN (a,b,c)`.
//! 2. When every disjunct can drive some index on table T, the whole term
//!    can be answered by a multi-index scan of T that unions the rowids of
//!    one indexed lookup per disjunct.
//!
//! The rewrite wins over the multi-index scan when both apply.

use sqlplan_ast::{BinaryOp, Expr};
use sqlplan_observability::PlannerEvent;
use tracing::debug;

use crate::analyze::{Analyzer, transfer_join_markings};
use crate::clause::WhereClause;
use crate::mask::ALL_TABLES;
use crate::term::{AndInfo, Compound, OperatorMask, OrInfo, TermFlags, TermId, allowed_op};

impl Analyzer<'_> {
    /// Analyze the OR term `id` of `wc`.
    pub(crate) fn analyze_or_term(&mut self, wc: &mut WhereClause, id: TermId) {
        let masks = self.masks;
        let expr = wc.term(id).expr.clone();
        debug_assert!(wc.term(id).compound.is_none());

        let mut or_wc = WhereClause::new(BinaryOp::Or);
        or_wc.split(&expr);
        self.analyze_all(&mut or_wc);
        debug_assert!(or_wc.len() >= 2);

        // Tables every disjunct can use an index on, and tables for which
        // every disjunct is a plain equality.
        let mut indexable = ALL_TABLES;
        let mut chng_to_in = !wc.vtab_mask;
        for i in (0..or_wc.len()).rev() {
            if indexable == 0 {
                break;
            }
            let ot = or_wc.term(TermId(i));
            if !ot.operator.intersects(OperatorMask::SINGLE) {
                chng_to_in = 0;
                let mut and_wc = WhereClause::new(BinaryOp::And);
                and_wc.split(&ot.expr);
                self.analyze_all(&mut and_wc);
                let b = and_wc
                    .terms()
                    .iter()
                    .filter(|t| allowed_op(&t.expr))
                    .fold(0, |b, t| b | masks.get_mask(t.left_cursor));
                indexable &= b;
                let ot = or_wc.term_mut(TermId(i));
                ot.operator = OperatorMask::AND;
                ot.compound = Some(Compound::And(Box::new(AndInfo { clause: and_wc })));
            } else if ot.has(TermFlags::COPIED) {
                // Its commuted child carries both tables.
            } else {
                let mut b = masks.get_mask(ot.left_cursor);
                if ot.has(TermFlags::VIRTUAL) {
                    if let Some(p) = ot.parent {
                        b |= masks.get_mask(or_wc.term(p).left_cursor);
                    }
                }
                indexable &= b;
                if ot.operator == OperatorMask::EQ {
                    chng_to_in &= b;
                } else {
                    chng_to_in = 0;
                }
            }
        }
        wc.term_mut(id).operator = if indexable == 0 {
            OperatorMask::empty()
        } else {
            OperatorMask::OR
        };

        if chng_to_in != 0 {
            if let Some((cursor, column)) = self.find_in_column(&mut or_wc, chng_to_in) {
                self.rewrite_as_in(wc, id, &expr, &or_wc, cursor, column);
            }
        }

        wc.term_mut(id).compound = Some(Compound::Or(Box::new(OrInfo {
            clause: or_wc,
            indexable,
        })));
    }

    /// Find one `(cursor, column)` that every disjunct compares for
    /// equality, marking the disjuncts that supply IN values with `OR_OK`.
    ///
    /// For `A.x = B.y` either side may be the common one, so a second
    /// candidate is tried when the first fails.
    fn find_in_column(&self, or_wc: &mut WhereClause, chng_to_in: u64) -> Option<(i32, i32)> {
        let n = or_wc.len();
        let mut cursor = -1;
        let mut column = -1;
        for _ in 0..2 {
            let mut start = None;
            for k in 0..n {
                let ot = or_wc.term_mut(TermId(k));
                ot.flags.remove(TermFlags::OR_OK);
                if ot.left_cursor == cursor {
                    continue;
                }
                if chng_to_in & self.masks.get_mask(ot.left_cursor) == 0 {
                    continue;
                }
                cursor = ot.left_cursor;
                column = ot.left_column;
                start = Some(k);
                break;
            }
            let start = start?;

            let mut ok = true;
            for k in start..n {
                let ot = or_wc.term_mut(TermId(k));
                if ot.left_cursor != cursor {
                    ot.flags.remove(TermFlags::OR_OK);
                } else if ot.left_column != column {
                    ok = false;
                    break;
                } else {
                    let aff_right = ot.right_operand().and_then(Expr::affinity);
                    let aff_left = ot.left_operand().and_then(Expr::affinity);
                    if aff_right.is_some() && aff_right != aff_left {
                        ok = false;
                        break;
                    }
                    ot.flags |= TermFlags::OR_OK;
                }
            }
            if ok {
                return Some((cursor, column));
            }
        }
        None
    }

    fn rewrite_as_in(
        &mut self,
        wc: &mut WhereClause,
        id: TermId,
        expr: &Expr,
        or_wc: &WhereClause,
        cursor: i32,
        column: i32,
    ) {
        let mut values = Vec::new();
        let mut left = None;
        for ot in or_wc.terms().iter().filter(|t| t.has(TermFlags::OR_OK)) {
            debug_assert_eq!((ot.left_cursor, ot.left_column), (cursor, column));
            if let (Some(l), Some(r)) = (ot.left_operand(), ot.right_operand()) {
                values.push(r.clone());
                left = Some(l);
            }
        }
        let Some(left) = left else {
            return;
        };
        let n_values = values.len();
        let column_name = left.to_string();
        let mut in_expr = left.clone().in_list(values);
        transfer_join_markings(&mut in_expr, expr);
        let new_id = wc.insert(in_expr, TermFlags::VIRTUAL | TermFlags::DYNAMIC);
        self.analyze(wc, new_id);
        wc.term_mut(new_id).parent = Some(id);
        let t = wc.term_mut(id);
        t.child_count = 1;
        t.operator = OperatorMask::NOOP;

        debug!(
            target: "sqlplan.planner",
            term = id.0,
            column = %column_name,
            values = n_values,
            "OR rewritten as IN"
        );
        if self.config.trace {
            self.observer.on_event(&PlannerEvent::OrRewrittenToIn {
                term: id.0,
                column: column_name,
                values: n_values,
            });
        }
    }
}
