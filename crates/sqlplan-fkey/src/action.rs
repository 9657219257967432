//! ON DELETE / ON UPDATE actions.
//!
//! Each action becomes a one-step program over the child table, written in
//! terms of the `old` and `new` images of the parent row, the way a
//! row trigger would be:
//!
//! ```text
//! ON DELETE CASCADE    DELETE FROM child WHERE old.k = ck
//! ON UPDATE CASCADE    UPDATE child SET ck = new.k WHERE old.k = ck
//! SET NULL / DEFAULT   UPDATE child SET ck = NULL WHERE old.k = ck
//! RESTRICT             SELECT RAISE(ABORT, ...) FROM child WHERE old.k = ck
//! ```
//!
//! UPDATE actions only fire when the parent key actually changed.

use std::fmt;

use sqlplan_ast::{BinaryOp, Expr, UnaryOp, conjunction};
use sqlplan_error::Result;
use sqlplan_planner::PlanContext;
use sqlplan_types::{FkAction, ForeignKey, Table};
use tracing::debug;

use crate::codegen::FK_FAILED;
use crate::parent_key::locate_parent_key;

/// What the single step of an action program does to the child table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FkStepOp {
    Delete,
    Update,
    /// `SELECT RAISE(ABORT, ...)` over the matching child rows.
    Raise,
}

/// The step of an action program.
#[derive(Debug, Clone, PartialEq)]
pub struct FkActionStep {
    pub op: FkStepOp,
    /// Child table the step runs against.
    pub target: String,
    /// Selects the child rows that refer to the old parent row.
    pub where_expr: Option<Expr>,
    /// `SET` list of an `Update` step.
    pub assignments: Vec<(String, Expr)>,
    /// Error message of a `Raise` step.
    pub raise: Option<&'static str>,
}

/// The program run for one foreign key when its parent row is deleted or
/// updated.
#[derive(Debug, Clone, PartialEq)]
pub struct FkActionProgram {
    pub child: String,
    pub parent: String,
    pub action: FkAction,
    pub is_update: bool,
    /// Guard evaluated before the steps run.
    pub when: Option<Expr>,
    pub steps: Vec<FkActionStep>,
}

impl fmt::Display for FkActionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.op {
            FkStepOp::Delete => write!(f, "DELETE FROM {}", self.target)?,
            FkStepOp::Update => {
                write!(f, "UPDATE {} SET ", self.target)?;
                for (i, (col, value)) in self.assignments.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{col} = {value}")?;
                }
            }
            FkStepOp::Raise => write!(
                f,
                "SELECT RAISE(ABORT, '{}') FROM {}",
                self.raise.unwrap_or(FK_FAILED),
                self.target
            )?,
        }
        if let Some(w) = &self.where_expr {
            write!(f, " WHERE {w}")?;
        }
        Ok(())
    }
}

impl fmt::Display for FkActionProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(when) = &self.when {
            write!(f, "WHEN {when} ")?;
        }
        for (i, step) in self.steps.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{step}")?;
        }
        Ok(())
    }
}

fn old_new(image: &str, column: &str) -> Expr {
    Expr::qualified(image, column)
}

/// Build the action program of `fk` for a DELETE (`is_update == false`) or
/// UPDATE of its parent table `parent`. Returns `None` when the key has no
/// action for that statement or its parent key cannot be located.
pub fn fk_action_program(
    ctx: &PlanContext,
    parent: &Table,
    child: &Table,
    fk: &ForeignKey,
    is_update: bool,
) -> Result<Option<FkActionProgram>> {
    let action = fk.action(is_update);
    if action == FkAction::None {
        return Ok(None);
    }
    let Some(key) = locate_parent_key(ctx, parent, fk)? else {
        return Ok(None);
    };

    let mut matches = Vec::with_capacity(key.child_columns.len());
    let mut unchanged = Vec::new();
    let mut assignments = Vec::new();
    for (i, &child_col) in key.child_columns.iter().enumerate() {
        let to_col = if key.is_rowid() {
            "oid"
        } else {
            parent.column_name(key.declared_column(i))
        };
        let from_col = child.column_name(child_col);
        matches.push(old_new("old", to_col).eq(Expr::id(from_col)));
        if is_update {
            unchanged.push(Expr::binary(
                BinaryOp::Is,
                old_new("old", to_col),
                old_new("new", to_col),
            ));
        }
        let value = match action {
            FkAction::Cascade if is_update => Some(old_new("new", to_col)),
            FkAction::SetDefault => Some(
                usize::try_from(child_col)
                    .ok()
                    .and_then(|c| child.columns.get(c))
                    .and_then(|c| c.default.clone())
                    .map_or_else(Expr::null, Expr::literal),
            ),
            FkAction::SetNull => Some(Expr::null()),
            _ => None,
        };
        if let Some(value) = value {
            assignments.push((from_col.to_owned(), value));
        }
    }

    let op = match action {
        FkAction::Restrict => FkStepOp::Raise,
        FkAction::Cascade if !is_update => FkStepOp::Delete,
        _ => FkStepOp::Update,
    };
    let step = FkActionStep {
        op,
        target: child.name.clone(),
        where_expr: conjunction(matches),
        assignments,
        raise: (op == FkStepOp::Raise).then_some(FK_FAILED),
    };
    let when = conjunction(unchanged).map(|e| Expr::unary(UnaryOp::Not, e));

    let program = FkActionProgram {
        child: child.name.clone(),
        parent: parent.name.clone(),
        action,
        is_update,
        when,
        steps: vec![step],
    };
    debug!(target: "sqlplan.fkey", %program, "action program built");
    Ok(Some(program))
}

/// The action programs to run when a row of `parent` is deleted or
/// updated, one per referencing foreign key that declares an action.
pub fn fk_actions(ctx: &PlanContext, parent: &Table, is_update: bool) -> Result<Vec<FkActionProgram>> {
    if !ctx.config.foreign_keys {
        return Ok(Vec::new());
    }
    let mut programs = Vec::new();
    for (child, i) in ctx.schema.referencing(&parent.name) {
        if let Some(p) = fk_action_program(ctx, parent, &child, &child.foreign_keys[i], is_update)? {
            programs.push(p);
        }
    }
    Ok(programs)
}
