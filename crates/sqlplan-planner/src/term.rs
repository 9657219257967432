//! Decomposed WHERE-clause terms.
//!
//! A [`Term`] is one conjunct of a WHERE (or ON) clause after it has been
//! split on AND, or one disjunct of an OR after it has been split on OR.
//! Terms live in a [`WhereClause`] arena and refer to each other through
//! [`TermId`] indexes; never hold a reference to a term across an insert.

use bitflags::bitflags;
use sqlplan_ast::{BinaryOp, Expr, ExprKind, LikeOp};

use crate::clause::WhereClause;
use crate::mask::Bitmask;

bitflags! {
    /// Operators a term can be used with, as seen from its left column.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct OperatorMask: u16 {
        const IN     = 0x001;
        const EQ     = 0x002;
        const LT     = 0x004;
        const LE     = 0x008;
        const GT     = 0x010;
        const GE     = 0x020;
        const MATCH  = 0x040;
        const ISNULL = 0x080;
        /// Two or more OR-connected terms.
        const OR     = 0x100;
        /// Two or more AND-connected terms (inside an OR).
        const AND    = 0x200;
        /// Subsumed by a rewritten IN term; never drives an index.
        const NOOP   = 0x800;

        const RANGE  = Self::LT.bits() | Self::LE.bits() | Self::GT.bits() | Self::GE.bits();
        const SINGLE = 0x0ff;
        const ALL    = 0xfff;
    }
}

impl OperatorMask {
    /// The mask for an indexable binary comparison.
    #[must_use]
    pub const fn from_binary(op: BinaryOp) -> Self {
        match op {
            BinaryOp::Eq => Self::EQ,
            BinaryOp::Lt => Self::LT,
            BinaryOp::Le => Self::LE,
            BinaryOp::Gt => Self::GT,
            BinaryOp::Ge => Self::GE,
            _ => Self::empty(),
        }
    }

    /// The mask for the top operator of `expr`, empty when it cannot be
    /// used against an index.
    #[must_use]
    pub fn from_expr(expr: &Expr) -> Self {
        match &expr.kind {
            ExprKind::Binary { op, .. } => Self::from_binary(*op),
            ExprKind::In { not: false, .. } => Self::IN,
            ExprKind::IsNull(_) => Self::ISNULL,
            _ => Self::empty(),
        }
    }
}

bitflags! {
    /// Bookkeeping bits on a term.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct TermFlags: u8 {
        /// The expression was synthesized and belongs to the clause.
        const DYNAMIC = 0x01;
        /// Added by the analyzer; never tested as a row filter.
        const VIRTUAL = 0x02;
        /// Already handled by generated code.
        const CODED   = 0x04;
        /// Has exactly one synthesized child.
        const COPIED  = 0x08;
        /// Part of an OR that was rewritten to IN.
        const OR_OK   = 0x40;
        /// `col > NULL` stand-in for `col IS NOT NULL`; estimation only.
        const VNULL   = 0x80;
    }
}

/// Index of a term within its clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TermId(pub usize);

/// Payload of an OR term: the disjuncts and the tables every one of them
/// can drive an index on.
#[derive(Debug, Clone)]
pub struct OrInfo {
    pub clause: WhereClause,
    pub indexable: Bitmask,
}

/// Payload of an AND term nested inside an OR.
#[derive(Debug, Clone)]
pub struct AndInfo {
    pub clause: WhereClause,
}

/// Nested sub-clause of a compound term.
#[derive(Debug, Clone)]
pub enum Compound {
    Or(Box<OrInfo>),
    And(Box<AndInfo>),
}

/// One decomposed constraint.
#[derive(Debug, Clone)]
pub struct Term {
    pub expr: Expr,
    /// Term this one was synthesized from.
    pub parent: Option<TermId>,
    /// Cursor of the left column, or -1 when the term has no column on the
    /// left.
    pub left_cursor: i32,
    /// Column number on the left; -1 is the rowid.
    pub left_column: i32,
    pub operator: OperatorMask,
    pub flags: TermFlags,
    /// Tables referenced by the left operand.
    pub prereq_left: Bitmask,
    /// Synthesized children not yet coded.
    pub child_count: u8,
    /// Tables referenced by the right operand.
    pub prereq_right: Bitmask,
    /// Tables referenced anywhere in the term.
    pub prereq_all: Bitmask,
    pub compound: Option<Compound>,
}

impl Term {
    #[must_use]
    pub fn new(expr: Expr, flags: TermFlags) -> Self {
        Self {
            expr,
            parent: None,
            left_cursor: -1,
            left_column: -1,
            operator: OperatorMask::empty(),
            flags,
            prereq_left: 0,
            child_count: 0,
            prereq_right: 0,
            prereq_all: 0,
            compound: None,
        }
    }

    #[inline]
    pub fn has(&self, flag: TermFlags) -> bool {
        self.flags.contains(flag)
    }

    /// The value side of the term: the right operand of a comparison or the
    /// pattern of a MATCH/LIKE.
    pub fn right_operand(&self) -> Option<&Expr> {
        match &self.expr.kind {
            ExprKind::Binary { right, .. } => Some(right),
            ExprKind::Like { pattern, .. } => Some(pattern),
            _ => None,
        }
    }

    /// The column side of the term.
    pub fn left_operand(&self) -> Option<&Expr> {
        left_operand(&self.expr)
    }

    pub fn or_info(&self) -> Option<&OrInfo> {
        match &self.compound {
            Some(Compound::Or(info)) => Some(info),
            _ => None,
        }
    }

    pub fn and_info(&self) -> Option<&AndInfo> {
        match &self.compound {
            Some(Compound::And(info)) => Some(info),
            _ => None,
        }
    }

    /// Whether this is a `col MATCH expr` term.
    pub fn is_match(&self) -> bool {
        matches!(
            self.expr.kind,
            ExprKind::Like {
                op: LikeOp::Match,
                ..
            }
        )
    }
}

/// Left operand of the operators the analyzer understands.
pub fn left_operand(expr: &Expr) -> Option<&Expr> {
    match &expr.kind {
        ExprKind::Binary { left, .. } => Some(left),
        ExprKind::In { expr, .. }
        | ExprKind::IsNull(expr)
        | ExprKind::NotNull(expr)
        | ExprKind::Between { expr, .. } => Some(expr),
        _ => None,
    }
}

/// Whether the top operator of `expr` may drive an index.
pub fn allowed_op(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Binary { op, .. } => op.is_indexable_comparison(),
        ExprKind::In { not, .. } => !not,
        ExprKind::IsNull(_) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_groups() {
        assert_eq!(OperatorMask::RANGE.bits(), 0x3c);
        assert!(OperatorMask::SINGLE.contains(OperatorMask::ISNULL));
        assert!(!OperatorMask::SINGLE.intersects(OperatorMask::OR | OperatorMask::AND));
        assert_eq!(OperatorMask::from_binary(BinaryOp::Ne), OperatorMask::empty());
    }

    #[test]
    fn test_operator_from_expr() {
        let c = Expr::column(0, 1);
        assert_eq!(
            OperatorMask::from_expr(&c.clone().le(Expr::int(1))),
            OperatorMask::LE
        );
        assert_eq!(
            OperatorMask::from_expr(&c.clone().in_list(vec![Expr::int(1)])),
            OperatorMask::IN
        );
        assert_eq!(OperatorMask::from_expr(&c.is_null()), OperatorMask::ISNULL);
    }

    #[test]
    fn test_operands() {
        let t = Term::new(Expr::column(0, 0).eq(Expr::int(5)), TermFlags::empty());
        assert_eq!(t.left_operand().and_then(Expr::as_column), Some((0, 0)));
        assert_eq!(t.right_operand(), Some(&Expr::int(5)));

        let m = Term::new(
            Expr::column(1, 2).like(LikeOp::Match, Expr::text("x")),
            TermFlags::VIRTUAL,
        );
        assert!(m.is_match());
        assert_eq!(m.right_operand(), Some(&Expr::text("x")));
        assert!(m.left_operand().is_none());
    }

    #[test]
    fn test_allowed_ops() {
        let c = Expr::column(0, 0);
        assert!(allowed_op(&c.clone().ge(Expr::int(1))));
        assert!(!allowed_op(&c.clone().ne(Expr::int(1))));
        assert!(!allowed_op(&c.not_null()));
    }
}
