//! Bound expression trees consumed by the optimizer.
//!
//! The parser produces these with `Id`/`QualifiedId` name references;
//! [`resolve_names`] binds them to concrete `(cursor, column)` pairs before
//! any planning runs.

pub mod display;
pub mod resolve;

use bitflags::bitflags;
use sqlplan_types::{SortOrder, SqliteValue, TypeAffinity};

pub use resolve::{NameContext, NameSource, resolve_names};

bitflags! {
    /// Property bits attached to an expression node.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct ExprFlags: u32 {
        /// Originated in the ON/USING clause of a join.
        const FROM_JOIN = 0x0001;
        /// The collation was given with an explicit COLLATE operator.
        const EXPLICIT_COLLATE = 0x0002;
    }
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Is,
    IsNot,
    And,
    Or,
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Concat,
    BitAnd,
    BitOr,
    ShiftLeft,
    ShiftRight,
}

impl BinaryOp {
    /// Whether this is one of `=`, `<`, `<=`, `>`, `>=`.
    pub const fn is_indexable_comparison(self) -> bool {
        matches!(self, Self::Eq | Self::Lt | Self::Le | Self::Gt | Self::Ge)
    }

    /// Whether this is any comparison operator.
    pub const fn is_comparison(self) -> bool {
        matches!(
            self,
            Self::Eq | Self::Ne | Self::Lt | Self::Le | Self::Gt | Self::Ge | Self::Is | Self::IsNot
        )
    }

    /// The operator obtained by swapping the operands: `a < b` ⇔ `b > a`.
    pub const fn commuted(self) -> Self {
        match self {
            Self::Lt => Self::Gt,
            Self::Gt => Self::Lt,
            Self::Le => Self::Ge,
            Self::Ge => Self::Le,
            other => other,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Is => "IS",
            Self::IsNot => "IS NOT",
            Self::And => "AND",
            Self::Or => "OR",
            Self::Add => "+",
            Self::Subtract => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::Modulo => "%",
            Self::Concat => "||",
            Self::BitAnd => "&",
            Self::BitOr => "|",
            Self::ShiftLeft => "<<",
            Self::ShiftRight => ">>",
        }
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Not,
    Negate,
    Plus,
    BitNot,
}

/// Pattern-matching operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LikeOp {
    Like,
    Glob,
    Match,
    Regexp,
}

impl LikeOp {
    /// Name of the SQL function implementing the operator.
    pub const fn function_name(self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Glob => "glob",
            Self::Match => "match",
            Self::Regexp => "regexp",
        }
    }
}

/// Right-hand side of an IN operator.
#[derive(Debug, Clone, PartialEq)]
pub enum InSet {
    List(Vec<Expr>),
    Subquery(Box<Select>),
}

/// One ORDER BY term.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderingTerm {
    pub expr: Expr,
    pub sort_order: SortOrder,
}

impl OrderingTerm {
    #[must_use]
    pub const fn asc(expr: Expr) -> Self {
        Self {
            expr,
            sort_order: SortOrder::Asc,
        }
    }

    #[must_use]
    pub const fn desc(expr: Expr) -> Self {
        Self {
            expr,
            sort_order: SortOrder::Desc,
        }
    }
}

/// A sub-select as seen from an enclosing expression.
///
/// Only the parts that can reference outer cursors are kept.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Select {
    pub result: Vec<Expr>,
    pub where_clause: Option<Box<Expr>>,
    pub group_by: Vec<Expr>,
    pub having: Option<Box<Expr>>,
    pub order_by: Vec<OrderingTerm>,
    /// Subqueries appearing in the FROM clause.
    pub from_subqueries: Vec<Select>,
    /// The left operand of a compound SELECT.
    pub prior: Option<Box<Select>>,
}

impl Select {
    /// Affinity of the first result column.
    pub fn first_column_affinity(&self) -> Option<TypeAffinity> {
        self.result.first().and_then(Expr::affinity)
    }

    /// Visit every expression directly owned by this select (and its prior
    /// selects). Nested FROM subqueries are visited through `f_select`.
    pub fn for_each_expr<'a>(
        &'a self,
        f_expr: &mut impl FnMut(&'a Expr),
        f_select: &mut impl FnMut(&'a Select),
    ) {
        let mut cur = Some(self);
        while let Some(sel) = cur {
            sel.result.iter().for_each(&mut *f_expr);
            sel.group_by.iter().for_each(&mut *f_expr);
            sel.order_by.iter().for_each(|t| f_expr(&t.expr));
            if let Some(w) = &sel.where_clause {
                f_expr(w);
            }
            if let Some(h) = &sel.having {
                f_expr(h);
            }
            sel.from_subqueries.iter().for_each(&mut *f_select);
            cur = sel.prior.as_deref();
        }
    }
}

/// Expression node shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Literal(SqliteValue),
    /// Bound parameter `?N` (1-based).
    Variable(i32),
    /// Unresolved bare name.
    Id(String),
    /// Unresolved `table.column`.
    QualifiedId { table: String, column: String },
    /// Resolved column of the table open on `cursor`; `column == -1` is the
    /// rowid.
    Column { cursor: i32, column: i32 },
    /// Value already held in a register.
    Register(i32),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary { op: UnaryOp, operand: Box<Expr> },
    IsNull(Box<Expr>),
    NotNull(Box<Expr>),
    Between {
        expr: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
        not: bool,
    },
    In {
        expr: Box<Expr>,
        set: InSet,
        not: bool,
    },
    Exists(Box<Select>),
    Subquery(Box<Select>),
    Function { name: String, args: Vec<Expr> },
    Like {
        op: LikeOp,
        expr: Box<Expr>,
        pattern: Box<Expr>,
        escape: Option<Box<Expr>>,
        not: bool,
    },
    Cast { expr: Box<Expr>, affinity: TypeAffinity },
    Case {
        operand: Option<Box<Expr>>,
        whens: Vec<(Expr, Expr)>,
        else_expr: Option<Box<Expr>>,
    },
}

/// An expression tree node.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub flags: ExprFlags,
    /// Collating sequence attached to this node, either by an explicit
    /// COLLATE or inherited from a column during name resolution.
    pub collation: Option<String>,
    /// Affinity of a column or register reference.
    pub column_affinity: Option<TypeAffinity>,
    /// Cursor of the right-hand table of the join this ON-clause term came
    /// from. Meaningful only with [`ExprFlags::FROM_JOIN`].
    pub right_join_table: i32,
}

impl Expr {
    #[must_use]
    pub const fn new(kind: ExprKind) -> Self {
        Self {
            kind,
            flags: ExprFlags::empty(),
            collation: None,
            column_affinity: None,
            right_join_table: -1,
        }
    }

    // ── Constructors ────────────────────────────────────────────────────

    #[must_use]
    pub fn int(v: i64) -> Self {
        Self::new(ExprKind::Literal(SqliteValue::Integer(v)))
    }

    #[must_use]
    pub fn text(s: &str) -> Self {
        Self::new(ExprKind::Literal(SqliteValue::from(s)))
    }

    #[must_use]
    pub const fn null() -> Self {
        Self::new(ExprKind::Literal(SqliteValue::Null))
    }

    #[must_use]
    pub const fn literal(v: SqliteValue) -> Self {
        Self::new(ExprKind::Literal(v))
    }

    #[must_use]
    pub const fn variable(index: i32) -> Self {
        Self::new(ExprKind::Variable(index))
    }

    #[must_use]
    pub fn id(name: &str) -> Self {
        Self::new(ExprKind::Id(name.to_owned()))
    }

    #[must_use]
    pub fn qualified(table: &str, column: &str) -> Self {
        Self::new(ExprKind::QualifiedId {
            table: table.to_owned(),
            column: column.to_owned(),
        })
    }

    /// A resolved column reference with no affinity information.
    #[must_use]
    pub const fn column(cursor: i32, column: i32) -> Self {
        Self::new(ExprKind::Column { cursor, column })
    }

    /// A resolved column reference carrying affinity and collation.
    #[must_use]
    pub fn typed_column(
        cursor: i32,
        column: i32,
        affinity: TypeAffinity,
        collation: Option<&str>,
    ) -> Self {
        let mut e = Self::column(cursor, column);
        e.column_affinity = Some(affinity);
        e.collation = collation.map(str::to_owned);
        e
    }

    #[must_use]
    pub fn register(reg: i32, affinity: TypeAffinity, collation: Option<&str>) -> Self {
        let mut e = Self::new(ExprKind::Register(reg));
        e.column_affinity = Some(affinity);
        e.collation = collation.map(str::to_owned);
        e
    }

    #[must_use]
    pub fn binary(op: BinaryOp, left: Self, right: Self) -> Self {
        Self::new(ExprKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    #[must_use]
    pub fn unary(op: UnaryOp, operand: Self) -> Self {
        Self::new(ExprKind::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    #[must_use]
    pub fn eq(self, right: Self) -> Self {
        Self::binary(BinaryOp::Eq, self, right)
    }

    #[must_use]
    pub fn ne(self, right: Self) -> Self {
        Self::binary(BinaryOp::Ne, self, right)
    }

    #[must_use]
    pub fn lt(self, right: Self) -> Self {
        Self::binary(BinaryOp::Lt, self, right)
    }

    #[must_use]
    pub fn le(self, right: Self) -> Self {
        Self::binary(BinaryOp::Le, self, right)
    }

    #[must_use]
    pub fn gt(self, right: Self) -> Self {
        Self::binary(BinaryOp::Gt, self, right)
    }

    #[must_use]
    pub fn ge(self, right: Self) -> Self {
        Self::binary(BinaryOp::Ge, self, right)
    }

    #[must_use]
    pub fn and(self, right: Self) -> Self {
        Self::binary(BinaryOp::And, self, right)
    }

    #[must_use]
    pub fn or(self, right: Self) -> Self {
        Self::binary(BinaryOp::Or, self, right)
    }

    #[must_use]
    pub fn is_null(self) -> Self {
        Self::new(ExprKind::IsNull(Box::new(self)))
    }

    #[must_use]
    pub fn not_null(self) -> Self {
        Self::new(ExprKind::NotNull(Box::new(self)))
    }

    #[must_use]
    pub fn between(self, low: Self, high: Self) -> Self {
        Self::new(ExprKind::Between {
            expr: Box::new(self),
            low: Box::new(low),
            high: Box::new(high),
            not: false,
        })
    }

    #[must_use]
    pub fn in_list(self, list: Vec<Self>) -> Self {
        Self::new(ExprKind::In {
            expr: Box::new(self),
            set: InSet::List(list),
            not: false,
        })
    }

    #[must_use]
    pub fn in_select(self, select: Select) -> Self {
        Self::new(ExprKind::In {
            expr: Box::new(self),
            set: InSet::Subquery(Box::new(select)),
            not: false,
        })
    }

    #[must_use]
    pub fn like(self, op: LikeOp, pattern: Self) -> Self {
        Self::new(ExprKind::Like {
            op,
            expr: Box::new(self),
            pattern: Box::new(pattern),
            escape: None,
            not: false,
        })
    }

    #[must_use]
    pub fn function(name: &str, args: Vec<Self>) -> Self {
        Self::new(ExprKind::Function {
            name: name.to_owned(),
            args,
        })
    }

    /// Attach an explicit `COLLATE name`.
    #[must_use]
    pub fn collate(mut self, name: &str) -> Self {
        self.collation = Some(name.to_owned());
        self.flags |= ExprFlags::EXPLICIT_COLLATE;
        self
    }

    /// Mark this node and every node below it as originating in the ON
    /// clause of a join whose right-hand table is open on `cursor`.
    #[must_use]
    pub fn from_join(mut self, cursor: i32) -> Self {
        self.set_join_origin(cursor);
        self
    }

    /// In-place form of [`from_join`](Self::from_join).
    pub fn set_join_origin(&mut self, cursor: i32) {
        self.flags |= ExprFlags::FROM_JOIN;
        self.right_join_table = cursor;
        self.for_each_child_mut(&mut |c| c.set_join_origin(cursor));
    }

    // ── Structure ───────────────────────────────────────────────────────

    /// Deep copy of this expression.
    #[must_use]
    pub fn duplicate(&self) -> Self {
        self.clone()
    }

    #[inline]
    pub fn has_flag(&self, flag: ExprFlags) -> bool {
        self.flags.contains(flag)
    }

    /// Column reference shape: `(cursor, column)`.
    pub const fn as_column(&self) -> Option<(i32, i32)> {
        match self.kind {
            ExprKind::Column { cursor, column } => Some((cursor, column)),
            _ => None,
        }
    }

    /// Binary-operator shape: `(op, left, right)`.
    pub fn as_binary(&self) -> Option<(BinaryOp, &Self, &Self)> {
        match &self.kind {
            ExprKind::Binary { op, left, right } => Some((*op, left, right)),
            _ => None,
        }
    }

    /// The sub-select owned by this node, if any.
    pub fn subselect(&self) -> Option<&Select> {
        match &self.kind {
            ExprKind::Exists(s)
            | ExprKind::Subquery(s)
            | ExprKind::In {
                set: InSet::Subquery(s),
                ..
            } => Some(s),
            _ => None,
        }
    }

    /// Call `f` on every direct child expression (sub-selects excluded).
    pub fn for_each_child<'a>(&'a self, f: &mut impl FnMut(&'a Self)) {
        match &self.kind {
            ExprKind::Literal(_)
            | ExprKind::Variable(_)
            | ExprKind::Id(_)
            | ExprKind::QualifiedId { .. }
            | ExprKind::Column { .. }
            | ExprKind::Register(_)
            | ExprKind::Exists(_)
            | ExprKind::Subquery(_) => {}
            ExprKind::Binary { left, right, .. } => {
                f(left);
                f(right);
            }
            ExprKind::Unary { operand, .. }
            | ExprKind::IsNull(operand)
            | ExprKind::NotNull(operand)
            | ExprKind::Cast { expr: operand, .. } => f(operand),
            ExprKind::Between {
                expr, low, high, ..
            } => {
                f(expr);
                f(low);
                f(high);
            }
            ExprKind::In { expr, set, .. } => {
                f(expr);
                if let InSet::List(list) = set {
                    list.iter().for_each(f);
                }
            }
            ExprKind::Function { args, .. } => args.iter().for_each(f),
            ExprKind::Like {
                expr,
                pattern,
                escape,
                ..
            } => {
                f(expr);
                f(pattern);
                if let Some(e) = escape {
                    f(e);
                }
            }
            ExprKind::Case {
                operand,
                whens,
                else_expr,
            } => {
                if let Some(o) = operand {
                    f(o);
                }
                for (w, t) in whens {
                    f(w);
                    f(t);
                }
                if let Some(e) = else_expr {
                    f(e);
                }
            }
        }
    }

    /// Mutable form of [`for_each_child`](Self::for_each_child).
    pub fn for_each_child_mut(&mut self, f: &mut impl FnMut(&mut Self)) {
        match &mut self.kind {
            ExprKind::Literal(_)
            | ExprKind::Variable(_)
            | ExprKind::Id(_)
            | ExprKind::QualifiedId { .. }
            | ExprKind::Column { .. }
            | ExprKind::Register(_)
            | ExprKind::Exists(_)
            | ExprKind::Subquery(_) => {}
            ExprKind::Binary { left, right, .. } => {
                f(left);
                f(right);
            }
            ExprKind::Unary { operand, .. }
            | ExprKind::IsNull(operand)
            | ExprKind::NotNull(operand)
            | ExprKind::Cast { expr: operand, .. } => f(operand),
            ExprKind::Between {
                expr, low, high, ..
            } => {
                f(expr);
                f(low);
                f(high);
            }
            ExprKind::In { expr, set, .. } => {
                f(expr);
                if let InSet::List(list) = set {
                    list.iter_mut().for_each(f);
                }
            }
            ExprKind::Function { args, .. } => args.iter_mut().for_each(f),
            ExprKind::Like {
                expr,
                pattern,
                escape,
                ..
            } => {
                f(expr);
                f(pattern);
                if let Some(e) = escape {
                    f(e);
                }
            }
            ExprKind::Case {
                operand,
                whens,
                else_expr,
            } => {
                if let Some(o) = operand {
                    f(o);
                }
                for (w, t) in whens {
                    f(w);
                    f(t);
                }
                if let Some(e) = else_expr {
                    f(e);
                }
            }
        }
    }

    // ── Affinity and collation ──────────────────────────────────────────

    /// Affinity of this expression, or `None` when it has none.
    pub fn affinity(&self) -> Option<TypeAffinity> {
        match &self.kind {
            ExprKind::Column { .. } | ExprKind::Register(_) => self.column_affinity,
            ExprKind::Cast { affinity, .. } => Some(*affinity),
            ExprKind::Subquery(s) => s.first_column_affinity(),
            _ => None,
        }
    }

    /// The collating sequence this node carries, looking through CAST and
    /// unary plus.
    pub fn collation_seq(&self) -> Option<&str> {
        let mut e = self;
        loop {
            if let Some(c) = &e.collation {
                return Some(c);
            }
            match &e.kind {
                ExprKind::Cast { expr, .. }
                | ExprKind::Unary {
                    op: UnaryOp::Plus,
                    operand: expr,
                } => e = &**expr,
                _ => return None,
            }
        }
    }

    /// Whether the value of this expression is already compatible with
    /// affinity `aff`, so that applying `aff` before a comparison would be a
    /// no-op.
    pub fn needs_no_affinity_change(&self, aff: TypeAffinity) -> bool {
        if aff == TypeAffinity::Blob {
            return true;
        }
        let mut e = self;
        while let ExprKind::Unary {
            op: UnaryOp::Negate | UnaryOp::Plus,
            operand,
        } = &e.kind
        {
            e = &**operand;
        }
        match &e.kind {
            ExprKind::Literal(SqliteValue::Integer(_)) => aff.is_numeric(),
            ExprKind::Literal(SqliteValue::Float(_)) => {
                matches!(aff, TypeAffinity::Real | TypeAffinity::Numeric)
            }
            ExprKind::Literal(SqliteValue::Text(_)) => aff == TypeAffinity::Text,
            ExprKind::Literal(SqliteValue::Blob(_)) => true,
            ExprKind::Column { column, .. } => *column < 0 && aff.is_numeric(),
            _ => false,
        }
    }

    /// Whether this expression can never be NULL (used to skip NULL tests).
    pub const fn can_be_null(&self) -> bool {
        !matches!(
            self.kind,
            ExprKind::Literal(
                SqliteValue::Integer(_)
                    | SqliteValue::Float(_)
                    | SqliteValue::Text(_)
                    | SqliteValue::Blob(_)
            )
        )
    }

    // ── Constancy ───────────────────────────────────────────────────────

    /// True if the expression references no table column and contains no
    /// sub-select. Bound parameters count as constant.
    pub fn is_constant(&self) -> bool {
        self.is_constant_impl(false)
    }

    /// Like [`is_constant`](Self::is_constant), but also false for anything
    /// that originated in a join's ON clause.
    pub fn is_constant_not_join(&self) -> bool {
        self.is_constant_impl(true)
    }

    fn is_constant_impl(&self, not_join: bool) -> bool {
        if not_join && self.flags.contains(ExprFlags::FROM_JOIN) {
            return false;
        }
        match &self.kind {
            ExprKind::Id(_)
            | ExprKind::QualifiedId { .. }
            | ExprKind::Column { .. }
            | ExprKind::Exists(_)
            | ExprKind::Subquery(_)
            | ExprKind::In {
                set: InSet::Subquery(_),
                ..
            } => false,
            _ => {
                let mut ok = true;
                self.for_each_child(&mut |c| {
                    if ok && !c.is_constant_impl(not_join) {
                        ok = false;
                    }
                });
                ok
            }
        }
    }

    /// Number of nodes in the tree (sub-selects count as one).
    pub fn node_count(&self) -> usize {
        let mut n = 1;
        self.for_each_child(&mut |c| n += c.node_count());
        n
    }
}

/// The collating sequence used to compare `left` with `right`: an explicit
/// COLLATE on the left wins, then an explicit one on the right, then the
/// left's inherited one, then the right's.
pub fn binary_compare_collation<'a>(left: &'a Expr, right: &'a Expr) -> Option<&'a str> {
    if left.has_flag(ExprFlags::EXPLICIT_COLLATE) {
        return left.collation_seq();
    }
    if right.has_flag(ExprFlags::EXPLICIT_COLLATE) {
        if let Some(c) = right.collation_seq() {
            return Some(c);
        }
    }
    left.collation_seq().or_else(|| right.collation_seq())
}

/// Combined affinity of a comparison expression (`=`, `<`, IN, ...).
pub fn comparison_affinity(expr: &Expr) -> TypeAffinity {
    match &expr.kind {
        ExprKind::Binary { left, right, .. } => {
            TypeAffinity::compare(right.affinity(), left.affinity())
        }
        ExprKind::In {
            expr: lhs,
            set: InSet::Subquery(sel),
            ..
        } => TypeAffinity::compare(sel.first_column_affinity(), lhs.affinity()),
        ExprKind::In { expr: lhs, .. }
        | ExprKind::IsNull(lhs)
        | ExprKind::NotNull(lhs)
        | ExprKind::Between { expr: lhs, .. } => {
            lhs.affinity().unwrap_or(TypeAffinity::Blob)
        }
        _ => expr.affinity().unwrap_or(TypeAffinity::Blob),
    }
}

/// Whether an index column with affinity `index_affinity` may be used to
/// evaluate the comparison `expr`.
pub fn index_affinity_ok(expr: &Expr, index_affinity: TypeAffinity) -> bool {
    comparison_affinity(expr).index_usable_for(index_affinity)
}

/// Left-deep AND of `terms`; `None` when empty.
pub fn conjunction(terms: impl IntoIterator<Item = Expr>) -> Option<Expr> {
    terms.into_iter().reduce(Expr::and)
}
