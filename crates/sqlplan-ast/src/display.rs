//! SQL-like rendering of bound expressions via `fmt::Display`.
//!
//! Resolved column references print as `{cursor}.c{column}` (`rowid` for
//! column -1), which is what planner traces want to see.

#[allow(clippy::wildcard_imports)]
use crate::*;
use std::fmt;

// ---------------------------------------------------------------------------
// Helper: write a comma-separated list
// ---------------------------------------------------------------------------

fn comma_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ExprKind::Literal(v) => write!(f, "{v}")?,
            ExprKind::Variable(i) => write!(f, "?{i}")?,
            ExprKind::Id(name) => f.write_str(name)?,
            ExprKind::QualifiedId { table, column } => write!(f, "{table}.{column}")?,
            ExprKind::Column { cursor, column } => {
                if *column < 0 {
                    write!(f, "{{{cursor}}}.rowid")?;
                } else {
                    write!(f, "{{{cursor}}}.c{column}")?;
                }
            }
            ExprKind::Register(r) => write!(f, "r[{r}]")?,
            ExprKind::Binary { op, left, right } => write!(f, "({left} {} {right})", op.as_str())?,
            ExprKind::Unary { op, operand } => match op {
                UnaryOp::Not => write!(f, "NOT {operand}")?,
                UnaryOp::Negate => write!(f, "-{operand}")?,
                UnaryOp::Plus => write!(f, "+{operand}")?,
                UnaryOp::BitNot => write!(f, "~{operand}")?,
            },
            ExprKind::IsNull(e) => write!(f, "{e} IS NULL")?,
            ExprKind::NotNull(e) => write!(f, "{e} IS NOT NULL")?,
            ExprKind::Between {
                expr,
                low,
                high,
                not,
            } => {
                let not = if *not { "NOT " } else { "" };
                write!(f, "{expr} {not}BETWEEN {low} AND {high}")?;
            }
            ExprKind::In { expr, set, not } => {
                let not = if *not { "NOT " } else { "" };
                write!(f, "{expr} {not}IN (")?;
                match set {
                    InSet::List(list) => comma_list(f, list)?,
                    InSet::Subquery(_) => f.write_str("SELECT ...")?,
                }
                f.write_str(")")?;
            }
            ExprKind::Exists(_) => f.write_str("EXISTS (SELECT ...)")?,
            ExprKind::Subquery(_) => f.write_str("(SELECT ...)")?,
            ExprKind::Function { name, args } => {
                write!(f, "{name}(")?;
                comma_list(f, args)?;
                f.write_str(")")?;
            }
            ExprKind::Like {
                op,
                expr,
                pattern,
                escape,
                not,
            } => {
                let not = if *not { "NOT " } else { "" };
                let kw = match op {
                    LikeOp::Like => "LIKE",
                    LikeOp::Glob => "GLOB",
                    LikeOp::Match => "MATCH",
                    LikeOp::Regexp => "REGEXP",
                };
                write!(f, "{expr} {not}{kw} {pattern}")?;
                if let Some(esc) = escape {
                    write!(f, " ESCAPE {esc}")?;
                }
            }
            ExprKind::Cast { expr, affinity } => write!(f, "CAST({expr} AS {affinity:?})")?,
            ExprKind::Case {
                operand,
                whens,
                else_expr,
            } => {
                f.write_str("CASE")?;
                if let Some(o) = operand {
                    write!(f, " {o}")?;
                }
                for (w, t) in whens {
                    write!(f, " WHEN {w} THEN {t}")?;
                }
                if let Some(e) = else_expr {
                    write!(f, " ELSE {e}")?;
                }
                f.write_str(" END")?;
            }
        }
        if self.flags.contains(ExprFlags::EXPLICIT_COLLATE) {
            if let Some(c) = &self.collation {
                write!(f, " COLLATE {c}")?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for OrderingTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.sort_order {
            SortOrder::Asc => write!(f, "{}", self.expr),
            SortOrder::Desc => write!(f, "{} DESC", self.expr),
        }
    }
}
