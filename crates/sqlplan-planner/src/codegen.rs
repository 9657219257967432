//! Loop code generation: turns the plan chosen for one level into the
//! instructions that open, position and step its cursors.
//!
//! Five strategies exist, selected by the plan's flags: a virtual table
//! filter, a rowid lookup, a rowid range, an index scan, a multi-index OR,
//! and the plain full scan. Whatever the strategy, the terms that became
//! testable at this level are coded as filters afterwards.

use sqlplan_ast::{Expr, ExprFlags};
use sqlplan_error::{PlanError, Result};
use sqlplan_types::opcode::p5;
use sqlplan_types::{Label, Opcode, P4, ProgramBuilder, SortOrder, Table, TypeAffinity};

use crate::clause::WhereClause;
use crate::context::PlanContext;
use crate::explain::explain_one_scan;
use crate::join::{WhereInfo, where_begin, where_end};
use crate::level::{InLoop, WhereLevel};
use crate::mask::Bitmask;
use crate::plan::{AccessPath, WhereFlags, WsFlags};
use crate::source::SrcList;
use crate::term::{OperatorMask, TermFlags, TermId};

/// Affinity code that leaves a value unchanged.
const AFF_NONE: u8 = TypeAffinity::Blob as u8;

/// Emit an `Affinity` over the `n` registers from `base`, skipping the
/// no-op entries at either end. Nothing is emitted when all are no-ops.
pub fn code_apply_affinity(b: &mut ProgramBuilder, base: i32, n: usize, aff: &[u8]) {
    let aff = &aff[..n.min(aff.len())];
    let Some(start) = aff.iter().position(|&c| c != AFF_NONE) else {
        return;
    };
    let end = aff.iter().rposition(|&c| c != AFF_NONE).map_or(start, |e| e + 1);
    let text: String = aff[start..end].iter().map(|&c| char::from(c)).collect();
    b.emit_op(
        Opcode::Affinity,
        base + start as i32,
        (end - start) as i32,
        0,
        P4::Affinity(text),
        0,
    );
}

/// Evaluate `expr` into exactly `target`.
fn code_expr_into(ctx: &mut PlanContext, expr: &Expr, target: i32) -> Result<()> {
    let r = ctx.expr_coder.code_expr(&mut ctx.builder, expr, target)?;
    if r != target {
        ctx.builder.emit3(Opcode::SCopy, r, target, 0);
    }
    Ok(())
}

/// Jump to `dest` if `reg`, holding the value of `expr`, is NULL.
fn code_is_null_jump(b: &mut ProgramBuilder, expr: &Expr, reg: i32, dest: Label) {
    if expr.can_be_null() {
        b.emit_jump_to_label(Opcode::IsNull, reg, 0, dest, P4::None, 0);
    }
}

/// Drop the conversion for entry `j` when comparing `right` against the
/// index column needs none.
fn relax_affinity(aff: &mut [u8], j: usize, right: &Expr) {
    let Some(&c) = aff.get(j) else {
        return;
    };
    let column = TypeAffinity::from_char(char::from(c));
    if TypeAffinity::compare(right.affinity(), column) == TypeAffinity::Blob
        || column.is_some_and(|a| right.needs_no_affinity_change(a))
    {
        aff[j] = AFF_NONE;
    }
}

fn internal_missing(what: &str) -> PlanError {
    PlanError::internal(format!("plan refers to a {what} the clause does not have"))
}

/// Code the value side of the `=`, IS NULL or IN term `id` into `target`.
///
/// For IN, a loop over the value set is opened and recorded on `level`;
/// the returned register holds the current value. The term is disabled.
pub fn code_equality_term(
    ctx: &mut PlanContext,
    wc: &mut WhereClause,
    level: &mut WhereLevel,
    id: TermId,
    target: i32,
) -> Result<i32> {
    let term = wc.term(id);
    let reg = if term.operator.contains(OperatorMask::ISNULL) {
        ctx.builder.emit3(Opcode::Null, 0, target, 0);
        target
    } else if term.operator.contains(OperatorMask::IN) {
        let cursor = ctx.alloc_cursor();
        ctx.expr_coder
            .code_in_operand(&mut ctx.builder, &term.expr, cursor)?;
        let b = &mut ctx.builder;
        b.emit3(Opcode::Rewind, cursor, 0, 0);
        if level.in_loops.is_empty() {
            level.nxt = b.emit_label();
        }
        let addr_in_top = b.emit3(Opcode::Column, cursor, 0, target);
        b.emit3(Opcode::IsNull, target, 0, 0);
        level.in_loops.push(InLoop { cursor, addr_in_top });
        target
    } else {
        let right = term.right_operand().ok_or_else(|| internal_missing("value operand"))?;
        ctx.expr_coder.code_expr(&mut ctx.builder, right, target)?
    };
    wc.disable_term(id, level.left_join != 0);
    Ok(reg)
}

/// Code every term of the level's equality prefix into consecutive
/// registers, leaving `n_extra` more free after them for range bounds.
///
/// Returns the first register and the affinity to apply to the key, with
/// entries that need no conversion set to the no-op affinity.
pub fn code_all_equality_terms(
    ctx: &mut PlanContext,
    wc: &mut WhereClause,
    level: &mut WhereLevel,
    table: &Table,
    not_ready: Bitmask,
    n_extra: usize,
) -> Result<(i32, Vec<u8>)> {
    let idx = level.index().cloned().ok_or_else(|| internal_missing("index"))?;
    let n_eq = level.plan.n_eq;
    let n_reg = n_eq + n_extra;
    let mut reg_base = ctx.builder.alloc_regs(n_reg as i32);
    let mut aff = idx.affinity_string(table).into_bytes();

    for j in 0..n_eq {
        let column = idx.columns[j].column;
        let id = wc
            .find_term(level.tab_cursor, column, not_ready, level.plan.eq_term_mask, Some((&*idx, table)))
            .ok_or_else(|| internal_missing("equality term"))?;
        let target = reg_base + j as i32;
        let r = code_equality_term(ctx, wc, level, id, target)?;
        if r != target {
            if n_reg == 1 {
                reg_base = r;
            } else {
                ctx.builder.emit3(Opcode::SCopy, r, target, 0);
            }
        }
        let term = wc.term(id);
        if !term.operator.intersects(OperatorMask::ISNULL | OperatorMask::IN) {
            if let Some(right) = term.right_operand() {
                code_is_null_jump(&mut ctx.builder, right, reg_base + j as i32, level.brk);
                relax_affinity(&mut aff, j, right);
            }
        }
    }
    Ok((reg_base, aff))
}

/// Generate the top of the loop for level `i` of `info`. Returns
/// `not_ready` minus the table this level makes available.
pub fn code_one_loop_start(
    ctx: &mut PlanContext,
    info: &mut WhereInfo,
    i: usize,
    flags: WhereFlags,
    not_ready: Bitmask,
) -> Result<Bitmask> {
    let later: Vec<usize> = info.levels[i + 1..].iter().map(|l| l.from).collect();
    let n_levels = info.levels.len();
    let WhereInfo {
        levels,
        wc,
        src,
        masks,
        untested_terms,
        ..
    } = info;
    let level = &mut levels[i];
    let item = src.items[level.from].clone();
    let cur = item.cursor;
    let rev = level.plan.has(WsFlags::REVERSE);
    let omit_table = level.plan.has(WsFlags::IDX_ONLY) && !flags.contains(WhereFlags::FORCE_TABLE);
    let brk = level.brk;
    let cont = level.cont;

    if level.from > 0 && item.is_left_join() {
        level.left_join = ctx.builder.alloc_reg();
        ctx.builder.emit3(Opcode::Integer, 0, level.left_join, 0);
    }
    let left_join = level.left_join != 0;

    if level.plan.has(WsFlags::VIRTUALTABLE) {
        let AccessPath::Virtual(vinfo) = &level.plan.access else {
            return Err(internal_missing("virtual table plan"));
        };
        let vinfo = vinfo.clone();
        let n_constraint = vinfo.constraints.len();
        let reg = ctx.builder.alloc_regs(n_constraint as i32 + 2);
        let mut n_arg = 0;
        for j in 1..=n_constraint {
            let Some(k) = vinfo.usage.iter().position(|u| u.argv_index == j as i32) else {
                break;
            };
            let right = wc
                .term(vinfo.constraints[k].term)
                .right_operand()
                .ok_or_else(|| internal_missing("constraint value"))?
                .clone();
            code_expr_into(ctx, &right, reg + j as i32 + 1)?;
            n_arg = j;
        }
        let b = &mut ctx.builder;
        b.emit3(Opcode::Integer, vinfo.idx_num, reg, 0);
        b.emit3(Opcode::Integer, n_arg as i32, reg + 1, 0);
        b.emit_jump_to_label(
            Opcode::VFilter,
            cur,
            reg,
            brk,
            P4::Str(vinfo.idx_str.clone().unwrap_or_default()),
            0,
        );
        for (c, u) in vinfo.constraints.iter().zip(&vinfo.usage) {
            if u.omit {
                wc.disable_term(c.term, left_join);
            }
        }
        level.op = Opcode::VNext;
        level.p1 = cur;
        level.p2 = b.current_addr_i32();
    } else if level.plan.has(WsFlags::ROWID_EQ) {
        let id = wc
            .find_term(cur, -1, not_ready, OperatorMask::EQ | OperatorMask::IN, None)
            .ok_or_else(|| internal_missing("rowid term"))?;
        let target = ctx.builder.alloc_temp();
        let r = code_equality_term(ctx, wc, level, id, target)?;
        let nxt = level.nxt;
        let b = &mut ctx.builder;
        b.emit_jump_to_label(Opcode::MustBeInt, r, 0, nxt, P4::None, 0);
        b.emit_jump_to_label(Opcode::NotExists, cur, r, nxt, P4::None, 0);
        b.free_temp(target);
        level.op = Opcode::Noop;
    } else if level.plan.has(WsFlags::ROWID_RANGE) {
        code_rowid_range(ctx, wc, level, cur, not_ready, rev)?;
    } else if level.plan.has(WsFlags::COLUMN_RANGE | WsFlags::COLUMN_EQ) {
        code_index_scan(ctx, wc, level, &item.table, not_ready, flags, rev, omit_table)?;
    } else if level.plan.has(WsFlags::MULTI_OR) {
        let AccessPath::MultiOr(or_id) = level.plan.access else {
            return Err(internal_missing("OR term"));
        };
        let or_tab = if n_levels > 1 {
            let mut t = SrcList::new();
            t.push(item.clone());
            for &f in &later {
                t.push(src.items[f].clone());
            }
            t
        } else {
            src.clone()
        };
        let or_clause = wc
            .term(or_id)
            .or_info()
            .ok_or_else(|| internal_missing("OR term"))?
            .clause
            .clone();
        let untested = code_multi_or(ctx, level, i, &or_tab, &item.table, cur, &or_clause, flags)?;
        if !untested {
            wc.disable_term(or_id, left_join);
        }
    } else {
        let (step, start) = if rev {
            (Opcode::Prev, Opcode::Last)
        } else {
            (Opcode::Next, Opcode::Rewind)
        };
        let addr = ctx.builder.emit_jump_to_label(start, cur, 0, brk, P4::None, 0);
        level.op = step;
        level.p1 = cur;
        level.p2 = addr as i32 + 1;
        level.p5 = p5::FULLSCAN_STEP;
    }

    let not_ready = not_ready & !masks.get_mask(cur);

    // Every term that became testable at this level is a row filter here.
    for id in wc.ids() {
        let t = wc.term(id);
        if t.flags.intersects(TermFlags::VIRTUAL | TermFlags::CODED) {
            continue;
        }
        if t.prereq_all & not_ready != 0 {
            *untested_terms = true;
            continue;
        }
        if left_join && !t.expr.has_flag(ExprFlags::FROM_JOIN) {
            continue;
        }
        ctx.expr_coder
            .code_if_false(&mut ctx.builder, &t.expr, cont, true)?;
        wc.term_mut(id).flags |= TermFlags::CODED;
    }

    // The WHERE terms of a LEFT JOIN run once a row has matched the ON
    // clause, so that the NULL row is tested too.
    if left_join {
        level.first = ctx.builder.current_addr();
        ctx.builder.emit3(Opcode::Integer, 1, level.left_join, 0);
        for id in wc.ids() {
            let t = wc.term(id);
            if t.flags.intersects(TermFlags::VIRTUAL | TermFlags::CODED) || t.prereq_all & not_ready != 0 {
                continue;
            }
            ctx.expr_coder
                .code_if_false(&mut ctx.builder, &t.expr, cont, true)?;
            wc.term_mut(id).flags |= TermFlags::CODED;
        }
    }
    Ok(not_ready)
}

fn code_rowid_range(
    ctx: &mut PlanContext,
    wc: &mut WhereClause,
    level: &mut WhereLevel,
    cur: i32,
    not_ready: Bitmask,
    rev: bool,
) -> Result<()> {
    let left_join = level.left_join != 0;
    let brk = level.brk;
    let mut start = wc.find_term(cur, -1, not_ready, OperatorMask::GT | OperatorMask::GE, None);
    let mut end = wc.find_term(cur, -1, not_ready, OperatorMask::LT | OperatorMask::LE, None);
    if rev {
        std::mem::swap(&mut start, &mut end);
    }

    if let Some(id) = start {
        let term = wc.term(id);
        let right = term.right_operand().ok_or_else(|| internal_missing("range bound"))?;
        let seek = match term.operator {
            OperatorMask::GT => Opcode::SeekGt,
            OperatorMask::LE => Opcode::SeekLe,
            OperatorMask::LT => Opcode::SeekLt,
            _ => Opcode::SeekGe,
        };
        let tmp = ctx.builder.alloc_temp();
        let r1 = ctx.expr_coder.code_expr(&mut ctx.builder, right, tmp)?;
        ctx.builder.emit_jump_to_label(seek, cur, r1, brk, P4::None, 0);
        ctx.builder.free_temp(tmp);
        wc.disable_term(id, left_join);
    } else {
        let op = if rev { Opcode::Last } else { Opcode::Rewind };
        ctx.builder.emit_jump_to_label(op, cur, 0, brk, P4::None, 0);
    }

    let mut test = None;
    if let Some(id) = end {
        let term = wc.term(id);
        let right = term
            .right_operand()
            .ok_or_else(|| internal_missing("range bound"))?
            .clone();
        let strict = term.operator.intersects(OperatorMask::LT | OperatorMask::GT);
        let mem_end = ctx.builder.alloc_reg();
        code_expr_into(ctx, &right, mem_end)?;
        let op = match (strict, rev) {
            (true, false) => Opcode::Ge,
            (true, true) => Opcode::Le,
            (false, false) => Opcode::Gt,
            (false, true) => Opcode::Lt,
        };
        test = Some((op, mem_end));
        wc.disable_term(id, left_join);
    }

    let b = &mut ctx.builder;
    level.op = if rev { Opcode::Prev } else { Opcode::Next };
    level.p1 = cur;
    level.p2 = b.current_addr_i32();
    if start.is_none() && end.is_none() {
        level.p5 = p5::FULLSCAN_STEP;
    }
    if let Some((op, mem_end)) = test {
        let rowid = b.alloc_temp();
        b.emit3(Opcode::Rowid, cur, rowid, 0);
        b.emit_jump_to_label(
            op,
            mem_end,
            rowid,
            brk,
            P4::None,
            u16::from(TypeAffinity::Numeric as u8) | p5::JUMPIFNULL,
        );
        b.free_temp(rowid);
    }
    Ok(())
}

#[allow(clippy::too_many_arguments, clippy::too_many_lines, clippy::fn_params_excessive_bools)]
fn code_index_scan(
    ctx: &mut PlanContext,
    wc: &mut WhereClause,
    level: &mut WhereLevel,
    table: &Table,
    not_ready: Bitmask,
    flags: WhereFlags,
    rev: bool,
    omit_table: bool,
) -> Result<()> {
    const START_OPS: [Opcode; 8] = [
        Opcode::Noop,
        Opcode::Noop,
        Opcode::Rewind,
        Opcode::Last,
        Opcode::SeekGt,
        Opcode::SeekLt,
        Opcode::SeekGe,
        Opcode::SeekLe,
    ];

    let idx = level.index().cloned().ok_or_else(|| internal_missing("index"))?;
    let cur = level.tab_cursor;
    let idx_cur = level.idx_cursor;
    let left_join = level.left_join != 0;
    let n_eq = level.plan.n_eq;
    let n_col = idx.column_count();
    let range_col = idx.columns.get(n_eq).map_or(-1, |c| c.column);
    let probe = Some((&*idx, table));

    // min(x): the first row must not have a NULL x.
    let is_min_query =
        flags.contains(WhereFlags::ORDERBY_MIN) && level.plan.has(WsFlags::ORDERBY) && n_col > n_eq;
    let mut n_extra = usize::from(is_min_query);

    let mut range_end = None;
    let mut range_start = None;
    if level.plan.has(WsFlags::TOP_LIMIT) {
        range_end = wc.find_term(cur, range_col, not_ready, OperatorMask::LT | OperatorMask::LE, probe);
        n_extra = 1;
    }
    if level.plan.has(WsFlags::BTM_LIMIT) {
        range_start = wc.find_term(cur, range_col, not_ready, OperatorMask::GT | OperatorMask::GE, probe);
        n_extra = 1;
    }

    let (reg_base, mut start_aff) = code_all_equality_terms(ctx, wc, level, table, not_ready, n_extra)?;
    let mut end_aff = start_aff.clone();
    let nxt = level.nxt;

    // Scanning against the index order: the bounds trade places.
    if n_eq < n_col && rev == (idx.columns[n_eq].sort_order == SortOrder::Asc) {
        std::mem::swap(&mut range_end, &mut range_start);
    }

    let inclusive = |id: Option<TermId>| {
        id.is_none_or(|id| wc.term(id).operator.intersects(OperatorMask::LE | OperatorMask::GE))
    };
    let mut start_eq = inclusive(range_start);
    let end_eq = inclusive(range_end);
    let mut start_constraints = range_start.is_some() || n_eq > 0;
    let bound_reg = reg_base + n_eq as i32;

    let mut n_constraint = n_eq;
    if let Some(id) = range_start {
        let term = wc.term(id);
        let vnull = term.has(TermFlags::VNULL);
        let right = term
            .right_operand()
            .ok_or_else(|| internal_missing("range bound"))?
            .clone();
        code_expr_into(ctx, &right, bound_reg)?;
        if !vnull {
            code_is_null_jump(&mut ctx.builder, &right, bound_reg, nxt);
        }
        relax_affinity(&mut start_aff, n_eq, &right);
        n_constraint += 1;
    } else if is_min_query {
        ctx.builder.emit3(Opcode::Null, 0, bound_reg, 0);
        n_constraint += 1;
        start_eq = false;
        start_constraints = true;
    }
    code_apply_affinity(&mut ctx.builder, reg_base, n_constraint, &start_aff);
    let op = START_OPS[(usize::from(start_constraints) << 2) + (usize::from(start_eq) << 1) + usize::from(rev)];
    debug_assert_ne!(op, Opcode::Noop);
    ctx.builder
        .emit_jump_to_label(op, idx_cur, reg_base, nxt, P4::Int(n_constraint as i32), 0);

    let mut n_constraint = n_eq;
    if let Some(id) = range_end {
        let term = wc.term(id);
        let vnull = term.has(TermFlags::VNULL);
        let right = term
            .right_operand()
            .ok_or_else(|| internal_missing("range bound"))?
            .clone();
        code_expr_into(ctx, &right, bound_reg)?;
        if !vnull {
            code_is_null_jump(&mut ctx.builder, &right, bound_reg, nxt);
        }
        relax_affinity(&mut end_aff, n_eq, &right);
        code_apply_affinity(&mut ctx.builder, reg_base, n_eq + 1, &end_aff);
        n_constraint += 1;
    }

    let b = &mut ctx.builder;
    level.p2 = b.current_addr_i32();

    // Past the end of the range?
    if range_end.is_some() || n_eq > 0 {
        let op = if rev { Opcode::IdxLT } else { Opcode::IdxGE };
        b.emit_jump_to_label(
            op,
            idx_cur,
            reg_base,
            nxt,
            P4::Int(n_constraint as i32),
            u16::from(end_eq != rev),
        );
    }

    // Rows whose range column is NULL are not in any range.
    if level.plan.has(WsFlags::BOTH_LIMIT) {
        let r1 = b.alloc_temp();
        b.emit3(Opcode::Column, idx_cur, n_eq as i32, r1);
        b.emit_jump_to_label(Opcode::IsNull, r1, 0, level.cont, P4::None, 0);
        b.free_temp(r1);
    }

    for id in [range_start, range_end].into_iter().flatten() {
        wc.disable_term(id, left_join);
    }

    let b = &mut ctx.builder;
    if !omit_table {
        let rowid = b.alloc_temp();
        b.emit3(Opcode::IdxRowid, idx_cur, rowid, 0);
        b.emit3(Opcode::Seek, cur, rowid, 0);
        b.free_temp(rowid);
    }

    level.op = if level.plan.has(WsFlags::UNIQUE) {
        Opcode::Noop
    } else if rev {
        Opcode::Prev
    } else {
        Opcode::Next
    };
    level.p1 = idx_cur;
    Ok(())
}

/// One indexed sub-loop per disjunct, each calling the loop body as a
/// subroutine. A rowset keeps a row matched by several disjuncts from
/// being returned twice. Returns whether some disjunct left terms untested.
#[allow(clippy::too_many_arguments)]
fn code_multi_or(
    ctx: &mut PlanContext,
    level: &mut WhereLevel,
    i: usize,
    or_tab: &SrcList,
    table: &Table,
    cur: i32,
    or_clause: &WhereClause,
    flags: WhereFlags,
) -> Result<bool> {
    let dedup = !flags.contains(WhereFlags::DUPLICATES_OK);
    let b = &mut ctx.builder;
    let reg_return = b.alloc_reg();
    let loop_body = b.emit_label();
    level.op = Opcode::Return;
    level.p1 = reg_return;

    let (reg_rowset, reg_rowid) = if dedup {
        let rowset = b.alloc_reg();
        let rowid = b.alloc_reg();
        b.emit3(Opcode::Null, 0, rowset, 0);
        (rowset, rowid)
    } else {
        (0, 0)
    };
    let ret_init = b.emit3(Opcode::Integer, 0, reg_return, 0);

    let sub_flags =
        WhereFlags::OMIT_OPEN | WhereFlags::OMIT_CLOSE | WhereFlags::FORCE_TABLE | WhereFlags::ONETABLE_ONLY;
    let n_terms = or_clause.len();
    let mut untested = false;
    for (ii, sub) in or_clause.terms().iter().enumerate() {
        if sub.left_cursor != cur && sub.and_info().is_none() {
            continue;
        }
        let sub_info = where_begin(ctx, or_tab, Some(&sub.expr), None, sub_flags)?;
        explain_one_scan(ctx, or_tab, &sub_info.levels[0], i, level.from, WhereFlags::empty());
        if dedup {
            let set = if ii == n_terms - 1 { -1 } else { ii as i32 };
            let r = ctx
                .expr_coder
                .code_get_column(&mut ctx.builder, table, cur, -1, reg_rowid);
            let skip = ctx.builder.current_addr_i32() + 2;
            ctx.builder
                .emit_op(Opcode::RowSetTest, reg_rowset, skip, r, P4::Int(set), 0);
        }
        ctx.builder
            .emit_jump_to_label(Opcode::Gosub, reg_return, 0, loop_body, P4::None, 0);
        untested |= sub_info.untested_terms;
        where_end(ctx, sub_info)?;
    }

    let b = &mut ctx.builder;
    let after = b.current_addr_i32();
    b.change_p1(ret_init, after);
    b.emit_jump_to_label(Opcode::Goto, 0, 0, level.brk, P4::None, 0);
    b.resolve_label(loop_body);
    Ok(untested)
}
