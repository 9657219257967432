//! Expression code generation.
//!
//! Loop code needs a handful of expression primitives: evaluate into a
//! register, jump on truth or falsehood, materialize an IN list, read a
//! column. [`ExprCoder`] is that seam; [`DefaultExprCoder`] implements it
//! for bound expression trees.

use sqlplan_ast::{
    BinaryOp, Expr, ExprKind, InSet, UnaryOp, binary_compare_collation, comparison_affinity,
};
use sqlplan_error::{PlanError, Result};
use sqlplan_types::opcode::{Label, Opcode, P4, ProgramBuilder, p5};
use sqlplan_types::{BINARY, SqliteValue, Table};

/// Expression primitives used by the loop code generator.
pub trait ExprCoder: Send + Sync {
    /// Evaluate `expr`, preferably into `target`. Returns the register that
    /// holds the result, which may be a different one.
    fn code_expr(&self, b: &mut ProgramBuilder, expr: &Expr, target: i32) -> Result<i32>;

    /// Jump to `dest` when `expr` is false (and when it is NULL if
    /// `jump_if_null`); fall through otherwise.
    fn code_if_false(
        &self,
        b: &mut ProgramBuilder,
        expr: &Expr,
        dest: Label,
        jump_if_null: bool,
    ) -> Result<()>;

    /// Jump to `dest` when `expr` is true.
    fn code_if_true(
        &self,
        b: &mut ProgramBuilder,
        expr: &Expr,
        dest: Label,
        jump_if_null: bool,
    ) -> Result<()>;

    /// Open ephemeral index `cursor` holding the values on the right of the
    /// IN expression `expr`.
    fn code_in_operand(&self, b: &mut ProgramBuilder, expr: &Expr, cursor: i32) -> Result<()>;

    /// Read `column` of `table` open on `cursor` into `target`.
    fn code_get_column(
        &self,
        b: &mut ProgramBuilder,
        table: &Table,
        cursor: i32,
        column: i32,
        target: i32,
    ) -> i32;
}

/// [`ExprCoder`] for bound expression trees. Sub-selects are left to the
/// SELECT compiler and reported as not implemented.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultExprCoder;

const fn comparison_opcode(op: BinaryOp) -> Option<Opcode> {
    Some(match op {
        BinaryOp::Eq | BinaryOp::Is => Opcode::Eq,
        BinaryOp::Ne | BinaryOp::IsNot => Opcode::Ne,
        BinaryOp::Lt => Opcode::Lt,
        BinaryOp::Le => Opcode::Le,
        BinaryOp::Gt => Opcode::Gt,
        BinaryOp::Ge => Opcode::Ge,
        _ => return None,
    })
}

const fn arithmetic_opcode(op: BinaryOp) -> Option<Opcode> {
    Some(match op {
        BinaryOp::Add => Opcode::Add,
        BinaryOp::Subtract => Opcode::Subtract,
        BinaryOp::Multiply => Opcode::Multiply,
        BinaryOp::Divide => Opcode::Divide,
        BinaryOp::Modulo => Opcode::Remainder,
        BinaryOp::Concat => Opcode::Concat,
        BinaryOp::BitAnd => Opcode::BitAnd,
        BinaryOp::BitOr => Opcode::BitOr,
        BinaryOp::ShiftLeft => Opcode::ShiftLeft,
        BinaryOp::ShiftRight => Opcode::ShiftRight,
        BinaryOp::And => Opcode::And,
        BinaryOp::Or => Opcode::Or,
        _ => return None,
    })
}

fn emit_literal(b: &mut ProgramBuilder, value: &SqliteValue, reg: i32) {
    match value {
        SqliteValue::Integer(n) => {
            if let Ok(small) = i32::try_from(*n) {
                b.emit3(Opcode::Integer, small, reg, 0);
            } else {
                b.emit_op(Opcode::Int64, 0, reg, 0, P4::Int64(*n), 0);
            }
        }
        SqliteValue::Float(f) => {
            b.emit_op(Opcode::Real, 0, reg, 0, P4::Real(*f), 0);
        }
        SqliteValue::Text(s) => {
            b.emit_op(Opcode::String8, 0, reg, 0, P4::Str(s.clone()), 0);
        }
        SqliteValue::Blob(bytes) => {
            b.emit_op(
                Opcode::Blob,
                bytes.len() as i32,
                reg,
                0,
                P4::Blob(bytes.clone()),
                0,
            );
        }
        SqliteValue::Null => {
            b.emit3(Opcode::Null, 0, reg, 0);
        }
    }
}

/// `lo <= x AND x <= hi`, negated for NOT BETWEEN.
fn expand_between(expr: &Expr, low: &Expr, high: &Expr, not: bool) -> Expr {
    let e = expr.clone().ge(low.clone()).and(expr.clone().le(high.clone()));
    if not { Expr::unary(UnaryOp::Not, e) } else { e }
}

impl DefaultExprCoder {
    /// Code `left op right` as a conditional jump (or, with `STOREP2` in
    /// `flags`, as a stored boolean).
    fn code_compare(
        &self,
        b: &mut ProgramBuilder,
        whole: &Expr,
        op: BinaryOp,
        opcode: Opcode,
        dest: Label,
        flags: u16,
    ) -> Result<()> {
        let ExprKind::Binary { left, right, .. } = &whole.kind else {
            return Err(PlanError::internal("comparison without operands"));
        };
        let t1 = b.alloc_temp();
        let t2 = b.alloc_temp();
        let r1 = self.code_expr(b, left, t1)?;
        let r2 = self.code_expr(b, right, t2)?;
        let coll = binary_compare_collation(left, right).unwrap_or(BINARY);
        let mut p5 = comparison_affinity(whole).as_char() as u16 | flags;
        if matches!(op, BinaryOp::Is | BinaryOp::IsNot) {
            p5 |= p5::NULLEQ;
        }
        b.emit_jump_to_label(opcode, r2, r1, dest, P4::Collation(coll.to_owned()), p5);
        b.free_temp(t2);
        b.free_temp(t1);
        Ok(())
    }

    fn code_in_test(
        &self,
        b: &mut ProgramBuilder,
        expr: &Expr,
        dest: Label,
        jump_if_true: bool,
        jump_if_null: bool,
    ) -> Result<()> {
        let ExprKind::In { expr: lhs, set, not } = &expr.kind else {
            return Err(PlanError::internal("IN test on a non-IN expression"));
        };
        let InSet::List(list) = set else {
            return Err(PlanError::not_implemented("IN (SELECT ...) outside an index loop"));
        };
        // Jump to dest when membership equals `want`.
        let want = jump_if_true != *not;
        let coll = lhs.collation_seq().unwrap_or(BINARY).to_owned();
        let aff = comparison_affinity(expr).as_char() as u16;
        let t1 = b.alloc_temp();
        let r1 = self.code_expr(b, lhs, t1)?;
        if jump_if_null {
            b.emit_jump_to_label(Opcode::IsNull, r1, 0, dest, P4::None, 0);
        }
        let found = if want { dest } else { b.emit_label() };
        let t2 = b.alloc_temp();
        for v in list {
            let r2 = self.code_expr(b, v, t2)?;
            b.emit_jump_to_label(Opcode::Eq, r2, r1, found, P4::Collation(coll.clone()), aff);
        }
        b.free_temp(t2);
        if !want {
            b.emit_jump_to_label(Opcode::Goto, 0, 0, dest, P4::None, 0);
            b.resolve_label(found);
        }
        b.free_temp(t1);
        Ok(())
    }

    fn code_function(
        &self,
        b: &mut ProgramBuilder,
        name: &str,
        args: &[&Expr],
        target: i32,
    ) -> Result<i32> {
        let n = args.len() as i32;
        let base = b.alloc_regs(n.max(1));
        for (i, a) in args.iter().enumerate() {
            let r = self.code_expr(b, a, base + i as i32)?;
            if r != base + i as i32 {
                b.emit3(Opcode::SCopy, r, base + i as i32, 0);
            }
        }
        b.emit_op(
            Opcode::Function,
            0,
            base,
            target,
            P4::FuncName(name.to_owned()),
            n as u16,
        );
        Ok(target)
    }
}

impl ExprCoder for DefaultExprCoder {
    fn code_expr(&self, b: &mut ProgramBuilder, expr: &Expr, target: i32) -> Result<i32> {
        match &expr.kind {
            ExprKind::Literal(v) => {
                emit_literal(b, v, target);
                Ok(target)
            }
            ExprKind::Variable(n) => {
                b.emit3(Opcode::Variable, *n, target, 0);
                Ok(target)
            }
            ExprKind::Register(r) => Ok(*r),
            ExprKind::Column { cursor, column } => {
                if *column < 0 {
                    b.emit3(Opcode::Rowid, *cursor, target, 0);
                } else {
                    b.emit3(Opcode::Column, *cursor, *column, target);
                }
                Ok(target)
            }
            ExprKind::Id(name) => Err(PlanError::internal(format!("unresolved name {name}"))),
            ExprKind::QualifiedId { table, column } => {
                Err(PlanError::internal(format!("unresolved name {table}.{column}")))
            }
            ExprKind::Binary { op, left, right } => {
                if let Some(opcode) = comparison_opcode(*op) {
                    let done = b.emit_label();
                    self.code_compare(b, expr, *op, opcode, done, p5::STOREP2)?;
                    // The stored result goes to P2 instead of a jump.
                    let addr = b.current_addr() - 1;
                    b.resolve_label(done);
                    b.change_p2(addr, target);
                    return Ok(target);
                }
                let opcode = arithmetic_opcode(*op)
                    .ok_or_else(|| PlanError::internal(format!("unknown operator {op:?}")))?;
                let t1 = b.alloc_temp();
                let t2 = b.alloc_temp();
                let r1 = self.code_expr(b, left, t1)?;
                let r2 = self.code_expr(b, right, t2)?;
                b.emit3(opcode, r2, r1, target);
                b.free_temp(t2);
                b.free_temp(t1);
                Ok(target)
            }
            ExprKind::Unary { op, operand } => match op {
                UnaryOp::Plus => self.code_expr(b, operand, target),
                UnaryOp::Negate => {
                    if let ExprKind::Literal(v) = &operand.kind {
                        let negated = match v {
                            SqliteValue::Integer(i) => i.checked_neg().map(SqliteValue::Integer),
                            SqliteValue::Float(f) => Some(SqliteValue::Float(-f)),
                            _ => None,
                        };
                        if let Some(n) = negated {
                            emit_literal(b, &n, target);
                            return Ok(target);
                        }
                    }
                    let zero = b.alloc_temp();
                    b.emit3(Opcode::Integer, 0, zero, 0);
                    let t = b.alloc_temp();
                    let r = self.code_expr(b, operand, t)?;
                    b.emit3(Opcode::Subtract, r, zero, target);
                    b.free_temp(t);
                    b.free_temp(zero);
                    Ok(target)
                }
                UnaryOp::Not | UnaryOp::BitNot => {
                    let opcode = if *op == UnaryOp::Not {
                        Opcode::Not
                    } else {
                        Opcode::BitNot
                    };
                    let t = b.alloc_temp();
                    let r = self.code_expr(b, operand, t)?;
                    b.emit3(opcode, r, target, 0);
                    b.free_temp(t);
                    Ok(target)
                }
            },
            ExprKind::IsNull(operand) | ExprKind::NotNull(operand) => {
                let opcode = if matches!(expr.kind, ExprKind::IsNull(_)) {
                    Opcode::IsNull
                } else {
                    Opcode::NotNull
                };
                b.emit3(Opcode::Integer, 1, target, 0);
                let t = b.alloc_temp();
                let r = self.code_expr(b, operand, t)?;
                let addr = b.emit3(opcode, r, 0, 0);
                b.emit3(Opcode::Integer, 0, target, 0);
                b.jump_here(addr);
                b.free_temp(t);
                Ok(target)
            }
            ExprKind::Between {
                expr: e,
                low,
                high,
                not,
            } => self.code_expr(b, &expand_between(e, low, high, *not), target),
            ExprKind::In { .. } => {
                let is_false = b.emit_label();
                let done = b.emit_label();
                b.emit3(Opcode::Null, 0, target, 0);
                self.code_in_test(b, expr, is_false, false, false)?;
                b.emit3(Opcode::Integer, 1, target, 0);
                b.emit_jump_to_label(Opcode::Goto, 0, 0, done, P4::None, 0);
                b.resolve_label(is_false);
                b.emit3(Opcode::Integer, 0, target, 0);
                b.resolve_label(done);
                Ok(target)
            }
            ExprKind::Function { name, args } => {
                let refs: Vec<&Expr> = args.iter().collect();
                self.code_function(b, name, &refs, target)
            }
            ExprKind::Like {
                op,
                expr: subject,
                pattern,
                escape,
                not,
            } => {
                let mut args: Vec<&Expr> = vec![pattern, subject];
                if let Some(e) = escape {
                    args.push(e);
                }
                self.code_function(b, op.function_name(), &args, target)?;
                if *not {
                    b.emit3(Opcode::Not, target, target, 0);
                }
                Ok(target)
            }
            ExprKind::Cast { expr: inner, affinity } => {
                let r = self.code_expr(b, inner, target)?;
                if r != target {
                    b.emit3(Opcode::SCopy, r, target, 0);
                }
                b.emit3(Opcode::Cast, target, affinity.as_char() as i32, 0);
                Ok(target)
            }
            ExprKind::Case {
                operand,
                whens,
                else_expr,
            } => {
                let end = b.emit_label();
                for (when, then) in whens {
                    let next = b.emit_label();
                    let cond = match operand {
                        Some(o) => (**o).clone().eq(when.clone()),
                        None => when.clone(),
                    };
                    self.code_if_false(b, &cond, next, true)?;
                    let r = self.code_expr(b, then, target)?;
                    if r != target {
                        b.emit3(Opcode::SCopy, r, target, 0);
                    }
                    b.emit_jump_to_label(Opcode::Goto, 0, 0, end, P4::None, 0);
                    b.resolve_label(next);
                }
                match else_expr {
                    Some(e) => {
                        let r = self.code_expr(b, e, target)?;
                        if r != target {
                            b.emit3(Opcode::SCopy, r, target, 0);
                        }
                    }
                    None => {
                        b.emit3(Opcode::Null, 0, target, 0);
                    }
                }
                b.resolve_label(end);
                Ok(target)
            }
            ExprKind::Exists(_) | ExprKind::Subquery(_) => {
                Err(PlanError::not_implemented("sub-select evaluation"))
            }
        }
    }

    fn code_if_false(
        &self,
        b: &mut ProgramBuilder,
        expr: &Expr,
        dest: Label,
        jump_if_null: bool,
    ) -> Result<()> {
        match &expr.kind {
            ExprKind::Binary {
                op: BinaryOp::And,
                left,
                right,
            } => {
                self.code_if_false(b, left, dest, jump_if_null)?;
                self.code_if_false(b, right, dest, jump_if_null)
            }
            ExprKind::Binary {
                op: BinaryOp::Or,
                left,
                right,
            } => {
                let ok = b.emit_label();
                self.code_if_true(b, left, ok, !jump_if_null)?;
                self.code_if_false(b, right, dest, jump_if_null)?;
                b.resolve_label(ok);
                Ok(())
            }
            ExprKind::Unary {
                op: UnaryOp::Not,
                operand,
            } => self.code_if_true(b, operand, dest, jump_if_null),
            ExprKind::Binary { op, .. } if comparison_opcode(*op).is_some() => {
                let opcode = comparison_opcode(*op)
                    .map_or(Opcode::Ne, Opcode::negated_comparison);
                let flags = if jump_if_null { p5::JUMPIFNULL } else { 0 };
                self.code_compare(b, expr, *op, opcode, dest, flags)
            }
            ExprKind::IsNull(operand) | ExprKind::NotNull(operand) => {
                let opcode = if matches!(expr.kind, ExprKind::IsNull(_)) {
                    Opcode::NotNull
                } else {
                    Opcode::IsNull
                };
                let t = b.alloc_temp();
                let r = self.code_expr(b, operand, t)?;
                b.emit_jump_to_label(opcode, r, 0, dest, P4::None, 0);
                b.free_temp(t);
                Ok(())
            }
            ExprKind::Between {
                expr: e,
                low,
                high,
                not,
            } => self.code_if_false(b, &expand_between(e, low, high, *not), dest, jump_if_null),
            ExprKind::In {
                set: InSet::List(_),
                ..
            } => self.code_in_test(b, expr, dest, false, jump_if_null),
            _ => {
                let t = b.alloc_temp();
                let r = self.code_expr(b, expr, t)?;
                b.emit_jump_to_label(Opcode::IfNot, r, i32::from(jump_if_null), dest, P4::None, 0);
                b.free_temp(t);
                Ok(())
            }
        }
    }

    fn code_if_true(
        &self,
        b: &mut ProgramBuilder,
        expr: &Expr,
        dest: Label,
        jump_if_null: bool,
    ) -> Result<()> {
        match &expr.kind {
            ExprKind::Binary {
                op: BinaryOp::And,
                left,
                right,
            } => {
                let skip = b.emit_label();
                self.code_if_false(b, left, skip, !jump_if_null)?;
                self.code_if_true(b, right, dest, jump_if_null)?;
                b.resolve_label(skip);
                Ok(())
            }
            ExprKind::Binary {
                op: BinaryOp::Or,
                left,
                right,
            } => {
                self.code_if_true(b, left, dest, jump_if_null)?;
                self.code_if_true(b, right, dest, jump_if_null)
            }
            ExprKind::Unary {
                op: UnaryOp::Not,
                operand,
            } => self.code_if_false(b, operand, dest, jump_if_null),
            ExprKind::Binary { op, .. } if comparison_opcode(*op).is_some() => {
                let opcode = comparison_opcode(*op).unwrap_or(Opcode::Eq);
                let flags = if jump_if_null { p5::JUMPIFNULL } else { 0 };
                self.code_compare(b, expr, *op, opcode, dest, flags)
            }
            ExprKind::IsNull(operand) | ExprKind::NotNull(operand) => {
                let opcode = if matches!(expr.kind, ExprKind::IsNull(_)) {
                    Opcode::IsNull
                } else {
                    Opcode::NotNull
                };
                let t = b.alloc_temp();
                let r = self.code_expr(b, operand, t)?;
                b.emit_jump_to_label(opcode, r, 0, dest, P4::None, 0);
                b.free_temp(t);
                Ok(())
            }
            ExprKind::Between {
                expr: e,
                low,
                high,
                not,
            } => self.code_if_true(b, &expand_between(e, low, high, *not), dest, jump_if_null),
            ExprKind::In {
                set: InSet::List(_),
                ..
            } => self.code_in_test(b, expr, dest, true, jump_if_null),
            _ => {
                let t = b.alloc_temp();
                let r = self.code_expr(b, expr, t)?;
                b.emit_jump_to_label(Opcode::If, r, i32::from(jump_if_null), dest, P4::None, 0);
                b.free_temp(t);
                Ok(())
            }
        }
    }

    fn code_in_operand(&self, b: &mut ProgramBuilder, expr: &Expr, cursor: i32) -> Result<()> {
        let ExprKind::In { expr: lhs, set, .. } = &expr.kind else {
            return Err(PlanError::internal("IN operand of a non-IN expression"));
        };
        let InSet::List(list) = set else {
            return Err(PlanError::not_implemented("IN (SELECT ...) as an index driver"));
        };
        let coll = lhs.collation_seq().unwrap_or(BINARY).to_owned();
        let aff = comparison_affinity(expr).as_char().to_string();
        b.emit_op(
            Opcode::OpenEphemeral,
            cursor,
            1,
            0,
            P4::KeyInfo {
                index: String::new(),
                collations: vec![coll],
            },
            0,
        );
        let value = b.alloc_temp();
        let record = b.alloc_temp();
        for v in list {
            let r = self.code_expr(b, v, value)?;
            b.emit_op(Opcode::MakeRecord, r, 1, record, P4::Affinity(aff.clone()), 0);
            b.emit3(Opcode::IdxInsert, cursor, record, 0);
        }
        b.free_temp(record);
        b.free_temp(value);
        Ok(())
    }

    fn code_get_column(
        &self,
        b: &mut ProgramBuilder,
        table: &Table,
        cursor: i32,
        column: i32,
        target: i32,
    ) -> i32 {
        let is_rowid = column < 0 || table.ipk.is_some_and(|ipk| ipk as i32 == column);
        if is_rowid {
            b.emit3(Opcode::Rowid, cursor, target, 0);
        } else {
            b.emit3(Opcode::Column, cursor, column, target);
        }
        target
    }
}

#[cfg(test)]
mod tests {
    use sqlplan_types::TypeAffinity;
    use sqlplan_types::opcode::VdbeProgram;

    use super::*;

    fn opcodes(prog: &VdbeProgram) -> Vec<Opcode> {
        prog.ops().iter().map(|op| op.opcode).collect()
    }

    #[test]
    fn test_literals() {
        let mut b = ProgramBuilder::new();
        let c = DefaultExprCoder;
        let r = b.alloc_reg();
        c.code_expr(&mut b, &Expr::int(7), r).unwrap();
        c.code_expr(&mut b, &Expr::int(1 << 40), r).unwrap();
        c.code_expr(&mut b, &Expr::text("x"), r).unwrap();
        c.code_expr(&mut b, &Expr::null(), r).unwrap();
        c.code_expr(&mut b, &Expr::unary(UnaryOp::Negate, Expr::int(3)), r)
            .unwrap();
        let prog = b.finish().unwrap();
        assert_eq!(
            opcodes(&prog),
            vec![
                Opcode::Integer,
                Opcode::Int64,
                Opcode::String8,
                Opcode::Null,
                Opcode::Integer
            ]
        );
        assert_eq!(prog.ops()[4].p1, -3);
    }

    #[test]
    fn test_register_passthrough() {
        let mut b = ProgramBuilder::new();
        let e = Expr::register(42, TypeAffinity::Integer, None);
        assert_eq!(DefaultExprCoder.code_expr(&mut b, &e, 1).unwrap(), 42);
        assert!(b.ops().is_empty());
    }

    #[test]
    fn test_if_false_comparison_is_negated() {
        let mut b = ProgramBuilder::new();
        let dest = b.emit_label();
        let e = Expr::typed_column(0, 1, TypeAffinity::Integer, None).lt(Expr::int(5));
        DefaultExprCoder.code_if_false(&mut b, &e, dest, true).unwrap();
        b.resolve_label(dest);
        let prog = b.finish().unwrap();
        let cmp = prog.ops().last().unwrap();
        assert_eq!(cmp.opcode, Opcode::Ge);
        assert_eq!(cmp.p2, prog.len() as i32);
        assert_eq!(cmp.p4, P4::Collation(BINARY.to_owned()));
        assert_ne!(cmp.p5 & p5::JUMPIFNULL, 0);
        // Left operand in P3, right in P1.
        assert_eq!(prog.ops()[0].opcode, Opcode::Column);
        assert_eq!(cmp.p3, prog.ops()[0].p3);
    }

    #[test]
    fn test_and_or_jumps() {
        let mut b = ProgramBuilder::new();
        let dest = b.emit_label();
        let a = Expr::column(0, 0).eq(Expr::int(1));
        let c = Expr::column(0, 1).eq(Expr::int(2));
        DefaultExprCoder
            .code_if_false(&mut b, &a.or(c), dest, false)
            .unwrap();
        b.resolve_label(dest);
        let prog = b.finish().unwrap();
        let jumps: Vec<_> = prog
            .ops()
            .iter()
            .filter(|o| matches!(o.opcode, Opcode::Eq | Opcode::Ne))
            .map(|o| o.opcode)
            .collect();
        assert_eq!(jumps, vec![Opcode::Eq, Opcode::Ne]);
    }

    #[test]
    fn test_in_operand_fills_ephemeral_index() {
        let mut b = ProgramBuilder::new();
        let e = Expr::column(0, 0).in_list(vec![Expr::int(1), Expr::int(2)]);
        DefaultExprCoder.code_in_operand(&mut b, &e, 5).unwrap();
        let prog = b.finish().unwrap();
        assert_eq!(prog.ops()[0].opcode, Opcode::OpenEphemeral);
        assert_eq!(prog.ops()[0].p1, 5);
        assert_eq!(prog.count_opcode(Opcode::IdxInsert), 2);
    }

    #[test]
    fn test_in_subquery_is_not_implemented() {
        let mut b = ProgramBuilder::new();
        let e = Expr::column(0, 0).in_select(sqlplan_ast::Select::default());
        assert!(matches!(
            DefaultExprCoder.code_in_operand(&mut b, &e, 1),
            Err(PlanError::NotImplemented(_))
        ));
    }

    #[test]
    fn test_get_column_maps_ipk_to_rowid() {
        let t = Table::new("t").column("id", "INTEGER").column("v", "TEXT").with_ipk(0);
        let mut b = ProgramBuilder::new();
        DefaultExprCoder.code_get_column(&mut b, &t, 3, 0, 9);
        DefaultExprCoder.code_get_column(&mut b, &t, 3, 1, 9);
        assert_eq!(b.ops()[0].opcode, Opcode::Rowid);
        assert_eq!(b.ops()[1].opcode, Opcode::Column);
    }

    #[test]
    fn test_case_expression() {
        let mut b = ProgramBuilder::new();
        let e = Expr::new(ExprKind::Case {
            operand: Some(Box::new(Expr::column(0, 0))),
            whens: vec![(Expr::int(1), Expr::text("one"))],
            else_expr: None,
        });
        let r = b.alloc_reg();
        DefaultExprCoder.code_expr(&mut b, &e, r).unwrap();
        let prog = b.finish().unwrap();
        assert_eq!(prog.count_opcode(Opcode::Ne), 1);
        assert_eq!(prog.count_opcode(Opcode::Goto), 1);
        assert_eq!(prog.ops().last().unwrap().opcode, Opcode::Null);
    }
}
