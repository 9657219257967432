//! Virtual-table planning interchange.
//!
//! A virtual table picks its own access strategy. The planner describes the
//! usable constraints and the requested order in an [`IndexInfo`], the
//! module fills in which constraints it consumes and what the scan costs,
//! and the result is folded into an ordinary [`WhereCost`](crate::plan::WhereCost).

use sqlplan_ast::{ExprKind, OrderingTerm};
use sqlplan_error::{PlanError, Result};
use sqlplan_types::{SortOrder, Table};

use crate::clause::WhereClause;
use crate::mask::Bitmask;
use crate::plan::BIG_COST;
use crate::term::{OperatorMask, TermId};

/// Result code a module reports for allocation failure.
pub const MODULE_NOMEM: i32 = 7;

/// Constraint operators a module can see. IN and IS NULL are never passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConstraintOp {
    Eq = 2,
    Lt = 4,
    Le = 8,
    Gt = 16,
    Ge = 32,
    Match = 64,
}

impl ConstraintOp {
    #[must_use]
    pub fn from_operator(op: OperatorMask) -> Option<Self> {
        [
            (OperatorMask::EQ, Self::Eq),
            (OperatorMask::LT, Self::Lt),
            (OperatorMask::LE, Self::Le),
            (OperatorMask::GT, Self::Gt),
            (OperatorMask::GE, Self::Ge),
            (OperatorMask::MATCH, Self::Match),
        ]
        .into_iter()
        .find_map(|(mask, c)| (mask == op).then_some(c))
    }
}

/// `column op ?` as offered to the module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexConstraint {
    pub column: i32,
    pub op: ConstraintOp,
    /// Whether the right side is available in this join position.
    pub usable: bool,
    /// Term the constraint came from.
    pub term: TermId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexOrderBy {
    pub column: i32,
    pub desc: bool,
}

/// What the module does with one constraint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConstraintUsage {
    /// 1-based position of the constraint's value among the filter
    /// arguments; 0 when not used.
    pub argv_index: i32,
    /// The module guarantees the constraint, so it need not be re-tested.
    pub omit: bool,
}

/// Inputs and outputs of one planning call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexInfo {
    pub constraints: Vec<IndexConstraint>,
    pub order_by: Vec<IndexOrderBy>,
    /// One entry per constraint.
    pub usage: Vec<ConstraintUsage>,
    pub idx_num: i32,
    pub idx_str: Option<String>,
    pub order_by_consumed: bool,
    pub estimated_cost: f64,
}

impl IndexInfo {
    /// Collect the constraints on `cursor` and, if every ORDER BY term is a
    /// column of `cursor`, the requested order.
    #[must_use]
    pub fn for_cursor(wc: &WhereClause, cursor: i32, order_by: &[OrderingTerm]) -> Self {
        let constraints = wc
            .ids()
            .filter_map(|id| {
                let t = wc.term(id);
                if t.left_cursor != cursor {
                    return None;
                }
                let op = ConstraintOp::from_operator(t.operator)?;
                Some(IndexConstraint {
                    column: t.left_column,
                    op,
                    usable: false,
                    term: id,
                })
            })
            .collect::<Vec<_>>();

        let all_local = order_by.iter().all(|o| {
            matches!(o.expr.kind, ExprKind::Column { cursor: c, .. } if c == cursor)
        });
        let order_by = if all_local {
            order_by
                .iter()
                .filter_map(|o| {
                    o.expr.as_column().map(|(_, column)| IndexOrderBy {
                        column,
                        desc: o.sort_order == SortOrder::Desc,
                    })
                })
                .collect()
        } else {
            Vec::new()
        };

        let usage = vec![ConstraintUsage::default(); constraints.len()];
        Self {
            constraints,
            order_by,
            usage,
            ..Self::default()
        }
    }

    /// Reset the outputs and mark which constraints are usable when the
    /// tables in `not_ready` are not yet available.
    pub fn prepare(&mut self, wc: &WhereClause, not_ready: Bitmask) {
        for c in &mut self.constraints {
            c.usable = wc.term(c.term).prereq_right & not_ready == 0;
        }
        self.usage.iter_mut().for_each(|u| *u = ConstraintUsage::default());
        self.idx_num = 0;
        self.idx_str = None;
        self.order_by_consumed = false;
        self.estimated_cost = BIG_COST / 2.0;
    }

    /// Union of the right-side dependencies of the constraints the module
    /// consumed.
    pub fn used_mask(&self, wc: &WhereClause) -> Bitmask {
        self.constraints
            .iter()
            .zip(&self.usage)
            .filter(|(_, u)| u.argv_index > 0)
            .fold(0, |m, (c, _)| m | wc.term(c.term).prereq_right)
    }
}

/// Failure reported by a module's planning callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleError {
    pub code: i32,
    pub message: Option<String>,
}

/// The planning half of a virtual table module.
pub trait VirtualTableModule: Send + Sync {
    fn best_index(&self, table: &Table, info: &mut IndexInfo) -> std::result::Result<(), ModuleError>;
}

/// Generic message for a result code.
const fn status_message(code: i32) -> &'static str {
    match code {
        1 => "SQL logic error or missing database",
        4 => "callback requested query abort",
        5 => "database is locked",
        6 => "database table is locked",
        7 => "out of memory",
        11 => "database disk image is malformed",
        _ => "unknown error",
    }
}

/// Run the module's planner and validate its answer.
pub fn invoke_best_index(
    module: &dyn VirtualTableModule,
    table: &Table,
    info: &mut IndexInfo,
) -> Result<()> {
    if let Err(e) = module.best_index(table, info) {
        if e.code == MODULE_NOMEM {
            return Err(PlanError::OutOfMemory);
        }
        return Err(PlanError::virtual_table(
            e.message.unwrap_or_else(|| status_message(e.code).to_owned()),
        ));
    }
    if info.usage.len() != info.constraints.len() {
        return Err(PlanError::VirtualTableInvalidPlan {
            table: table.name.clone(),
        });
    }
    let invalid = info
        .constraints
        .iter()
        .zip(&info.usage)
        .any(|(c, u)| !c.usable && u.argv_index > 0);
    if invalid {
        return Err(PlanError::VirtualTableInvalidPlan {
            table: table.name.clone(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use sqlplan_ast::{BinaryOp, Expr};

    use super::*;
    use crate::term::TermFlags;

    fn clause() -> WhereClause {
        let mut wc = WhereClause::new(BinaryOp::And);
        let specs = [
            (0, 0, OperatorMask::EQ, 0b10),
            (0, 1, OperatorMask::IN, 0),
            (0, 2, OperatorMask::GT, 0),
            (1, 0, OperatorMask::EQ, 0),
        ];
        for (cursor, column, op, prereq) in specs {
            let id = wc.insert(Expr::column(cursor, column).eq(Expr::int(1)), TermFlags::empty());
            let t = wc.term_mut(id);
            t.left_cursor = cursor;
            t.left_column = column;
            t.operator = op;
            t.prereq_right = prereq;
        }
        wc
    }

    struct Claims(usize);

    impl VirtualTableModule for Claims {
        fn best_index(&self, _: &Table, info: &mut IndexInfo) -> std::result::Result<(), ModuleError> {
            info.usage[self.0].argv_index = 1;
            info.estimated_cost = 10.0;
            Ok(())
        }
    }

    struct Fails(Option<&'static str>, i32);

    impl VirtualTableModule for Fails {
        fn best_index(&self, _: &Table, _: &mut IndexInfo) -> std::result::Result<(), ModuleError> {
            Err(ModuleError {
                code: self.1,
                message: self.0.map(str::to_owned),
            })
        }
    }

    #[test]
    fn test_constraints_skip_in_and_other_tables() {
        let wc = clause();
        let info = IndexInfo::for_cursor(&wc, 0, &[]);
        let ops: Vec<_> = info.constraints.iter().map(|c| c.op).collect();
        assert_eq!(ops, vec![ConstraintOp::Eq, ConstraintOp::Gt]);
        assert_eq!(info.usage.len(), 2);
    }

    #[test]
    fn test_order_by_only_when_local() {
        let wc = clause();
        let local = [OrderingTerm::desc(Expr::column(0, 2))];
        assert_eq!(
            IndexInfo::for_cursor(&wc, 0, &local).order_by,
            vec![IndexOrderBy { column: 2, desc: true }]
        );
        let mixed = [
            OrderingTerm::asc(Expr::column(0, 2)),
            OrderingTerm::asc(Expr::column(1, 0)),
        ];
        assert!(IndexInfo::for_cursor(&wc, 0, &mixed).order_by.is_empty());
    }

    #[test]
    fn test_unusable_constraint_claimed_is_rejected() {
        let wc = clause();
        let table = Table::new("vt").with_virtual_module("m");
        let mut info = IndexInfo::for_cursor(&wc, 0, &[]);
        info.prepare(&wc, 0b10);
        assert!(!info.constraints[0].usable);
        assert!(info.constraints[1].usable);
        let err = invoke_best_index(&Claims(0), &table, &mut info).unwrap_err();
        assert_eq!(err.to_string(), "table vt: xBestIndex returned an invalid plan");

        info.prepare(&wc, 0b10);
        invoke_best_index(&Claims(1), &table, &mut info).unwrap();
        assert_eq!(info.used_mask(&wc), 0);
        info.prepare(&wc, 0);
        invoke_best_index(&Claims(0), &table, &mut info).unwrap();
        assert_eq!(info.used_mask(&wc), 0b10);
    }

    #[test]
    fn test_module_errors() {
        let table = Table::new("vt").with_virtual_module("m");
        let mut info = IndexInfo::default();
        let err = invoke_best_index(&Fails(Some("no way"), 1), &table, &mut info).unwrap_err();
        assert_eq!(err.to_string(), "no way");
        let err = invoke_best_index(&Fails(None, 5), &table, &mut info).unwrap_err();
        assert_eq!(err.to_string(), "database is locked");
        let err = invoke_best_index(&Fails(None, MODULE_NOMEM), &table, &mut info).unwrap_err();
        assert_eq!(err, PlanError::OutOfMemory);
    }
}
