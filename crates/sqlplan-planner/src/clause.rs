//! The term arena for one WHERE clause (or one OR/AND sub-clause).

use sqlplan_ast::{BinaryOp, Expr, ExprFlags, ExprKind, binary_compare_collation, index_affinity_ok};
use sqlplan_types::{BINARY, Index, Table, collation_eq};

use crate::mask::Bitmask;
use crate::term::{OperatorMask, Term, TermFlags, TermId};

/// An ordered collection of terms that are all connected by `split_op`.
#[derive(Debug, Clone)]
pub struct WhereClause {
    terms: Vec<Term>,
    /// AND for a WHERE clause, OR for the disjuncts of an OR term.
    pub split_op: BinaryOp,
    /// Cursors of virtual tables; the OR-to-IN rewrite is suppressed for
    /// them.
    pub vtab_mask: Bitmask,
}

impl WhereClause {
    #[must_use]
    pub const fn new(split_op: BinaryOp) -> Self {
        Self {
            terms: Vec::new(),
            split_op,
            vtab_mask: 0,
        }
    }

    /// An AND clause holding a copy of one already-analyzed term.
    #[must_use]
    pub fn single(term: &Term) -> Self {
        let mut wc = Self::new(BinaryOp::And);
        let mut term = term.clone();
        term.parent = None;
        wc.terms.push(term);
        wc
    }

    /// Append every operand of a `split_op` tree rooted at `expr` as its own
    /// term.
    pub fn split(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::Binary { op, left, right } if *op == self.split_op => {
                self.split(left);
                self.split(right);
            }
            _ => {
                self.insert(expr.clone(), TermFlags::empty());
            }
        }
    }

    /// Append a term. Ids of existing terms stay valid.
    pub fn insert(&mut self, expr: Expr, flags: TermFlags) -> TermId {
        self.terms.push(Term::new(expr, flags));
        TermId(self.terms.len() - 1)
    }

    #[inline]
    pub fn term(&self, id: TermId) -> &Term {
        &self.terms[id.0]
    }

    #[inline]
    pub fn term_mut(&mut self, id: TermId) -> &mut Term {
        &mut self.terms[id.0]
    }

    #[inline]
    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.terms.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = TermId> + use<> {
        (0..self.terms.len()).map(TermId)
    }

    /// Remove every term for which `keep` is false. Only valid before
    /// analysis, when no term refers to another by id.
    pub(crate) fn retain(&mut self, keep: impl FnMut(&Term) -> bool) {
        debug_assert!(self.terms.iter().all(|t| t.parent.is_none()));
        self.terms.retain(keep);
    }

    /// Find a term usable as `cursor.column <op> expr` where the right side
    /// only depends on tables outside `not_ready`.
    ///
    /// With `index`, the term's comparison affinity and collation must also
    /// agree with that index's column, so that the index can evaluate it.
    pub fn find_term(
        &self,
        cursor: i32,
        column: i32,
        not_ready: Bitmask,
        op: OperatorMask,
        index: Option<(&Index, &Table)>,
    ) -> Option<TermId> {
        self.terms.iter().position(|t| {
            if t.left_cursor != cursor
                || t.prereq_right & not_ready != 0
                || t.left_column != column
                || !t.operator.intersects(op)
            {
                return false;
            }
            match index {
                Some((idx, table)) if t.operator != OperatorMask::ISNULL => {
                    term_fits_index(t, column, idx, table)
                }
                _ => true,
            }
        })
        .map(TermId)
    }

    /// Mark a term as coded, and its parent too once all of the parent's
    /// synthesized children are coded.
    ///
    /// On the inner table of a LEFT JOIN only ON-clause terms are disabled:
    /// WHERE terms must still be tested against the NULL row.
    pub fn disable_term(&mut self, id: TermId, left_join: bool) {
        let mut next = Some(id);
        while let Some(id) = next.take() {
            let t = &mut self.terms[id.0];
            if t.has(TermFlags::CODED) || (left_join && !t.expr.has_flag(ExprFlags::FROM_JOIN)) {
                return;
            }
            t.flags |= TermFlags::CODED;
            if let Some(parent) = t.parent {
                let p = &mut self.terms[parent.0];
                p.child_count = p.child_count.saturating_sub(1);
                if p.child_count == 0 {
                    next = Some(parent);
                }
            }
        }
    }
}

fn term_fits_index(t: &Term, column: i32, idx: &Index, table: &Table) -> bool {
    if !index_affinity_ok(&t.expr, table.column_affinity(column)) {
        return false;
    }
    let coll = match &t.expr.kind {
        ExprKind::Binary { left, right, .. } => binary_compare_collation(left, right),
        ExprKind::In { expr, .. } => expr.collation_seq(),
        _ => t.expr.collation_seq(),
    }
    .unwrap_or(BINARY);
    idx.position_of(column)
        .is_some_and(|j| collation_eq(&idx.columns[j].collation, coll))
}
