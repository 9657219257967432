//! Join ordering and the outer frame of the generated loop.
//!
//! [`where_begin`] chooses, greedily and one nesting level at a time, which
//! FROM item to scan next and how, opens the cursors and emits the top of
//! every loop. The caller then generates the loop body and hands the
//! returned [`WhereInfo`] to [`where_end`], which closes the loops again.
//!
//! The greedy choice at each level first looks for an "optimal" table: one
//! whose best plan would not improve if any other table ran before it.
//! Only when no table is optimal does it fall back to the cheapest plan
//! given the tables already placed.

use sqlplan_ast::{BinaryOp, Expr, OrderingTerm};
use sqlplan_error::{MAX_JOIN_TABLES, PlanError, Result};
use sqlplan_observability::PlannerEvent;
use sqlplan_types::{Label, Opcode, P4};
use tracing::{debug, debug_span};

use crate::analyze::Analyzer;
use crate::auto_index::construct_automatic_index;
use crate::clause::WhereClause;
use crate::codegen::code_one_loop_start;
use crate::context::PlanContext;
use crate::cost::{CostQuery, best_index};
use crate::explain::{explain_one_scan, explain_scan_text, plan_summary};
use crate::level::WhereLevel;
use crate::mask::{Bitmask, CursorMaskSet};
use crate::plan::{WhereCost, WhereFlags, WsFlags};
use crate::source::{IndexHint, JoinType, SrcList};

/// Everything `where_end` needs to close the loops `where_begin` opened,
/// plus what the caller wants to know about the plan.
#[derive(Debug, Clone)]
pub struct WhereInfo {
    pub src: SrcList,
    pub wc: WhereClause,
    pub masks: CursorMaskSet,
    /// Outermost first.
    pub levels: Vec<WhereLevel>,
    pub flags: WhereFlags,
    /// The single-row UPDATE/DELETE shortcut applies.
    pub ok_one_pass: bool,
    /// Rows already come out in ORDER BY order; no sort is needed.
    pub order_by_consumed: bool,
    /// Some term could not be tested at any level. Only possible for the
    /// sub-loops of a multi-index OR.
    pub untested_terms: bool,
    /// Leave every loop.
    pub brk: Label,
    /// Advance the innermost loop.
    pub cont: Label,
    /// First address of the loop code.
    pub top: usize,
    /// Estimated rows the whole join produces.
    pub n_row_out: f64,
    saved_query_loop: f64,
    /// `table index` pairs per level; see [`plan_summary`].
    pub summary: String,
}

impl WhereInfo {
    /// Where the innermost loop continues.
    pub const fn continue_label(&self) -> Label {
        self.cont
    }

    pub const fn break_label(&self) -> Label {
        self.brk
    }
}

/// Plan the join of `src` filtered by `where_expr` and emit the top of the
/// loops. Column references in `where_expr` and `order_by` must already be
/// resolved against `src`.
///
/// Fails with [`PlanError::TooManyTables`] beyond 64 FROM items and with
/// [`PlanError::CannotUseIndex`] when an `INDEXED BY` index cannot serve.
pub fn where_begin(
    ctx: &mut PlanContext,
    src: &SrcList,
    where_expr: Option<&Expr>,
    order_by: Option<&[OrderingTerm]>,
    flags: WhereFlags,
) -> Result<WhereInfo> {
    let saved = ctx.query_loop;
    let result = begin(ctx, src, where_expr, order_by, flags, saved);
    if result.is_err() {
        ctx.query_loop = saved;
    }
    result
}

#[allow(clippy::too_many_lines)]
fn begin(
    ctx: &mut PlanContext,
    src: &SrcList,
    where_expr: Option<&Expr>,
    order_by: Option<&[OrderingTerm]>,
    flags: WhereFlags,
    saved_query_loop: f64,
) -> Result<WhereInfo> {
    if src.len() > MAX_JOIN_TABLES {
        return Err(PlanError::TooManyTables { max: MAX_JOIN_TABLES });
    }
    let n_tab_list = if flags.contains(WhereFlags::ONETABLE_ONLY) {
        src.len().min(1)
    } else {
        src.len()
    };
    let brk = ctx.builder.emit_label();

    let mut wc = WhereClause::new(BinaryOp::And);
    if let Some(e) = where_expr {
        wc.split(e);
    }

    // Terms that depend on no table are tested once, before any loop.
    let mut constant = Vec::new();
    wc.retain(|t| {
        if n_tab_list == 0 || t.expr.is_constant_not_join() {
            constant.push(t.expr.clone());
            false
        } else {
            true
        }
    });
    for e in &constant {
        ctx.expr_coder.code_if_false(&mut ctx.builder, e, brk, true)?;
    }

    let mut masks = CursorMaskSet::new();
    let mut vtab_mask: Bitmask = 0;
    for item in &src.items {
        let m = masks.create_mask(item.cursor)?;
        if item.table.is_virtual() {
            vtab_mask |= m;
        }
    }
    wc.vtab_mask = vtab_mask;

    let var_mask = {
        let mut analyzer = Analyzer::new(&masks, &ctx.config)
            .with_bound_values(&ctx.bound_values)
            .with_observer(&*ctx.observer);
        analyzer.vtab_mask = vtab_mask;
        analyzer.analyze_all(&mut wc);
        analyzer.var_mask
    };
    ctx.var_mask |= var_mask;

    // -----------------------------------------------------------------------
    // Join order
    // -----------------------------------------------------------------------

    let mut not_ready: Bitmask = !0;
    let mut and_flags = WsFlags::all();
    let mut order_by = order_by;
    let mut order_by_consumed = false;
    let mut levels: Vec<WhereLevel> = Vec::with_capacity(n_tab_list);
    let mut i_from = 0;

    for i in 0..n_tab_list {
        let _span = debug_span!(target: "sqlplan.planner", "loop_level", level = i).entered();
        let mut best = WhereCost::default();
        let mut best_j: Option<usize> = None;
        let mut n_unconstrained = 0;
        let mut not_indexed: Bitmask = 0;

        let mut is_optimal = i_from + 1 < n_tab_list;
        loop {
            for j in i_from..n_tab_list {
                let item = &src.items[j];
                let do_not_reorder = item.join_type.intersects(JoinType::LEFT | JoinType::CROSS);
                if j != i_from && do_not_reorder {
                    break;
                }
                let m = masks.get_mask(item.cursor);
                if m & not_ready == 0 {
                    if j == i_from {
                        i_from += 1;
                    }
                    continue;
                }
                let indexed_by = matches!(item.index_hint, IndexHint::IndexedBy(_));
                if !indexed_by {
                    n_unconstrained += 1;
                }
                let cost = best_index(
                    ctx,
                    &CostQuery {
                        wc: &wc,
                        masks: &masks,
                        src: item,
                        not_ready: if is_optimal { m } else { not_ready },
                        not_valid: not_ready,
                        order_by: if i == 0 { order_by } else { None },
                        level: i,
                    },
                )?;
                let scans = !cost.plan.has(WsFlags::NOT_FULLSCAN);
                if is_optimal && scans {
                    not_indexed |= m;
                }

                // A full scan only displaces an indexed plan when the scan
                // is optimal; a table without INDEXED BY is always
                // acceptable so that some plan is found.
                let ready = cost.used & not_ready == 0;
                let scan_ok = best_j.is_none()
                    || not_indexed & m != 0
                    || !best.plan.has(WsFlags::NOT_FULLSCAN)
                    || !scans;
                let hint_ok = n_unconstrained == 0 || !indexed_by || !scans;
                if ready && scan_ok && hint_ok && (best_j.is_none() || cost.better_than(&best)) {
                    best = cost;
                    best_j = Some(j);
                }
                if do_not_reorder {
                    break;
                }
            }
            if best_j.is_some() || !is_optimal {
                break;
            }
            is_optimal = false;
        }

        let best_j = best_j.ok_or_else(|| PlanError::internal("no table can be placed in the join"))?;
        let item = &src.items[best_j];
        if best.plan.has(WsFlags::ORDERBY) {
            order_by = None;
            order_by_consumed = true;
        }
        and_flags &= best.plan.ws_flags;

        let mut level = WhereLevel::new(&mut ctx.builder, best_j, item.cursor, best.plan, best.rcost);
        level.used = best.used;
        if level.plan.has(WsFlags::INDEXED) {
            level.idx_cursor = ctx.alloc_cursor();
        }
        not_ready &= !masks.get_mask(item.cursor);
        if level.plan.n_row >= 1.0 {
            ctx.query_loop *= level.plan.n_row;
        }
        if let IndexHint::IndexedBy(name) = &item.index_hint {
            if !level.plan.has(WsFlags::INDEXED) {
                return Err(PlanError::cannot_use_index(name.clone()));
            }
        }
        levels.push(level);
    }

    if and_flags.contains(WsFlags::UNIQUE) && order_by.is_some() {
        order_by_consumed = true;
    }
    let mut ok_one_pass = false;
    if flags.contains(WhereFlags::ONEPASS_DESIRED) && and_flags.contains(WsFlags::UNIQUE) {
        ok_one_pass = true;
        if let Some(first) = levels.first_mut() {
            first.plan.ws_flags.remove(WsFlags::IDX_ONLY);
        }
    }

    let mut info = WhereInfo {
        src: src.clone(),
        wc,
        masks,
        levels,
        flags,
        ok_one_pass,
        order_by_consumed,
        untested_terms: false,
        brk,
        cont: brk,
        top: 0,
        n_row_out: 1.0,
        saved_query_loop,
        summary: String::new(),
    };

    open_cursors(ctx, &mut info)?;
    info.top = ctx.builder.current_addr();

    // -----------------------------------------------------------------------
    // Loop code
    // -----------------------------------------------------------------------

    let mut not_ready: Bitmask = !0;
    for i in 0..info.levels.len() {
        let level = &info.levels[i];
        explain_one_scan(ctx, &info.src, level, i, level.from, flags);
        let item = &info.src.items[level.from];
        let detail = explain_scan_text(item, level, flags);
        debug!(
            target: "sqlplan.planner",
            loop_level = i,
            table = %item.display_name(),
            index = level.index_name().unwrap_or("-"),
            cost = level.rcost,
            rows = level.plan.n_row,
            %detail,
            "loop level chosen"
        );
        if ctx.tracing() {
            ctx.notify(PlannerEvent::LevelChosen {
                level: i,
                table: item.display_name().to_owned(),
                index: level.index_name().map(str::to_owned),
                cost: level.rcost,
                rows: level.plan.n_row,
                detail,
            });
        }
        not_ready = code_one_loop_start(ctx, &mut info, i, flags, not_ready)?;
        info.cont = info.levels[i].cont;
    }

    info.summary = plan_summary(&info.src, &info.levels);
    debug!(
        target: "sqlplan.planner",
        plan = %info.summary,
        rows_out = info.n_row_out,
        order_by_consumed = info.order_by_consumed,
        one_pass = info.ok_one_pass,
        "where plan finished"
    );
    ctx.notify(PlannerEvent::PlanFinished {
        levels: info.levels.len(),
        order_by_consumed: info.order_by_consumed,
        one_pass: info.ok_one_pass,
    });
    Ok(info)
}

/// Open the table and index cursors every level reads, and build the
/// automatic indexes.
fn open_cursors(ctx: &mut PlanContext, info: &mut WhereInfo) -> Result<()> {
    let mut not_ready: Bitmask = !0;
    for level in &mut info.levels {
        let item = &info.src.items[level.from];
        let table = &item.table;
        let cur = item.cursor;
        info.n_row_out *= level.plan.n_row;

        if level.plan.has(WsFlags::VIRTUALTABLE) {
            ctx.builder
                .emit_op(Opcode::VOpen, cur, 0, 0, P4::Table(table.name.clone()), 0);
        } else if !level.plan.has(WsFlags::IDX_ONLY) && !info.flags.contains(WhereFlags::OMIT_OPEN) {
            let write = info.ok_one_pass;
            let op = if write { Opcode::OpenWrite } else { Opcode::OpenRead };
            let n_col = table.columns.len();
            // Only the columns up to the last one read need decoding.
            let n = if !write && n_col < 64 {
                64 - item.col_used.leading_zeros() as i32
            } else {
                n_col as i32
            };
            ctx.builder.emit_op(
                op,
                cur,
                i32::try_from(table.root_page).unwrap_or(i32::MAX),
                table.db,
                P4::Int(n),
                0,
            );
            ctx.lock_table(table.db, table.root_page, write, &table.name);
        } else {
            ctx.lock_table(table.db, table.root_page, false, &table.name);
        }

        if level.plan.has(WsFlags::TEMP_INDEX) {
            let (idx, idx_cursor) = construct_automatic_index(ctx, &info.wc, item, not_ready, &mut level.plan)?;
            level.auto_index = Some(idx);
            level.idx_cursor = idx_cursor;
        } else if let Some(idx) = level.plan.access.index().filter(|_| level.plan.has(WsFlags::INDEXED)) {
            ctx.builder.emit_op(
                Opcode::OpenRead,
                level.idx_cursor,
                i32::try_from(idx.root_page).unwrap_or(i32::MAX),
                table.db,
                P4::KeyInfo {
                    index: idx.name.clone(),
                    collations: idx.collations(),
                },
                0,
            );
        }
        not_ready &= !info.masks.get_mask(cur);
    }
    Ok(())
}

/// Close the loops opened by [`where_begin`], close its cursors, and point
/// table reads inside the loops at the index where the index has the
/// column.
pub fn where_end(ctx: &mut PlanContext, info: WhereInfo) -> Result<()> {
    let b = &mut ctx.builder;
    for level in info.levels.iter().rev() {
        b.resolve_label(level.cont);
        if level.op != Opcode::Noop {
            b.emit3(level.op, level.p1, level.p2, 0);
            b.change_p5(level.p5);
        }
        if level.plan.has(WsFlags::IN_ABLE) && !level.in_loops.is_empty() {
            b.resolve_label(level.nxt);
            for in_loop in level.in_loops.iter().rev() {
                let top = in_loop.addr_in_top;
                b.jump_here(top + 1);
                b.emit3(Opcode::Next, in_loop.cursor, top as i32, 0);
                b.jump_here(top - 1);
            }
        }
        b.resolve_label(level.brk);

        // No row matched the ON clause: run the body once over NULLs.
        if level.left_join != 0 {
            let addr = b.emit3(Opcode::IfPos, level.left_join, 0, 0);
            if !level.plan.has(WsFlags::IDX_ONLY) {
                b.emit3(Opcode::NullRow, level.tab_cursor, 0, 0);
            }
            if level.idx_cursor >= 0 {
                b.emit3(Opcode::NullRow, level.idx_cursor, 0, 0);
            }
            let first = level.first as i32;
            if level.op == Opcode::Return {
                b.emit3(Opcode::Gosub, level.p1, first, 0);
            } else {
                b.emit3(Opcode::Goto, 0, first, 0);
            }
            b.jump_here(addr);
        }
    }
    b.resolve_label(info.brk);

    for level in &info.levels {
        let ws = level.plan.ws_flags;
        if !info.flags.contains(WhereFlags::OMIT_CLOSE) {
            if !info.ok_one_pass && !ws.intersects(WsFlags::IDX_ONLY) {
                b.emit3(Opcode::Close, level.tab_cursor, 0, 0);
            }
            if ws.intersects(WsFlags::INDEXED) && !ws.intersects(WsFlags::TEMP_INDEX) {
                b.emit3(Opcode::Close, level.idx_cursor, 0, 0);
            }
        }

        if !ws.intersects(WsFlags::INDEXED) {
            continue;
        }
        let Some(idx) = level.index() else {
            return Err(PlanError::internal("indexed level has no index"));
        };
        let last = b.current_addr();
        for k in info.top..last {
            let Some(op) = b.op_at_mut(k) else { break };
            if op.p1 != level.tab_cursor {
                continue;
            }
            match op.opcode {
                Opcode::Column => {
                    if let Some(j) = idx.columns.iter().position(|c| c.column == op.p2) {
                        op.p1 = level.idx_cursor;
                        op.p2 = j as i32;
                    }
                }
                Opcode::Rowid => {
                    op.p1 = level.idx_cursor;
                    op.opcode = Opcode::IdxRowid;
                }
                _ => {}
            }
        }
    }

    ctx.query_loop = info.saved_query_loop;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use sqlplan_ast::{Expr, resolve_names};
    use sqlplan_types::opcode::p5;
    use sqlplan_types::{Table, VdbeProgram};

    use super::*;
    use crate::plan::AccessPath;
    use crate::source::SrcItem;
    use crate::test_support::{people_table, plain_table};

    fn src_of(tables: Vec<Table>) -> SrcList {
        let mut src = SrcList::new();
        for (i, t) in tables.into_iter().enumerate() {
            src.push(SrcItem::new(Arc::new(t), i as i32));
        }
        src
    }

    fn resolved(src: &mut SrcList, mut e: Expr) -> Expr {
        resolve_names(&src.name_context(), &mut e).unwrap();
        src.mark_columns_used(&e);
        e
    }

    /// Plan, emit an empty body, and close the loops.
    fn compile(src: &SrcList, filter: Option<&Expr>, flags: WhereFlags) -> (WhereInfo, VdbeProgram) {
        let mut ctx = PlanContext::default();
        ctx.n_tab = src.len() as i32;
        let info = where_begin(&mut ctx, src, filter, None, flags).unwrap();
        let snapshot = info.clone();
        where_end(&mut ctx, info).unwrap();
        assert_eq!(ctx.query_loop, 1.0);
        (snapshot, ctx.finish().unwrap())
    }

    fn opcodes(prog: &VdbeProgram) -> Vec<Opcode> {
        prog.ops().iter().map(|op| op.opcode).collect()
    }

    #[test]
    fn test_single_table_full_scan() {
        let src = src_of(vec![plain_table("t1", 2)]);
        let (info, prog) = compile(&src, None, WhereFlags::empty());
        assert_eq!(
            opcodes(&prog),
            vec![Opcode::OpenRead, Opcode::Rewind, Opcode::Next, Opcode::Close]
        );
        assert_eq!(prog.get(1).unwrap().p2, 3);
        let next = prog.get(2).unwrap();
        assert_eq!((next.p1, next.p2, next.p5), (0, 2, p5::FULLSCAN_STEP));
        assert_eq!(info.summary, "t1 {}");
    }

    #[test]
    fn test_rowid_lookup() {
        let mut src = src_of(vec![people_table()]);
        let filter = resolved(&mut src, Expr::id("id").eq(Expr::int(5)));
        let (info, prog) = compile(&src, Some(&filter), WhereFlags::empty());
        assert!(info.levels[0].plan.has(WsFlags::ROWID_EQ));
        assert_eq!(prog.count_opcode(Opcode::NotExists), 1);
        assert_eq!(prog.count_opcode(Opcode::MustBeInt), 1);
        assert_eq!(prog.count_opcode(Opcode::Next), 0);
        assert_eq!(info.summary, "people *");
    }

    #[test]
    fn test_index_range_seek() {
        let mut src = src_of(vec![people_table()]);
        let filter = resolved(
            &mut src,
            Expr::id("age").gt(Expr::int(30)).and(Expr::id("age").lt(Expr::int(40))),
        );
        let (info, prog) = compile(&src, Some(&filter), WhereFlags::empty());
        let level = &info.levels[0];
        assert_eq!(level.index_name(), Some("people_age"));
        assert!(level.plan.ws_flags.contains(WsFlags::BOTH_LIMIT));
        let ops = opcodes(&prog);
        assert!(ops.contains(&Opcode::SeekGt));
        let end = prog.ops().iter().find(|op| op.opcode == Opcode::IdxGE).unwrap();
        assert_eq!(end.p5, 0);
        // Both bounds were consumed by the index; nothing re-tests them.
        assert!(!ops.contains(&Opcode::Le) && !ops.contains(&Opcode::Ge));
    }

    #[test]
    fn test_in_operator_loop() {
        let mut src = src_of(vec![people_table()]);
        let filter = resolved(
            &mut src,
            Expr::id("age").in_list(vec![Expr::int(1), Expr::int(2), Expr::int(3)]),
        );
        let (info, prog) = compile(&src, Some(&filter), WhereFlags::empty());
        assert_eq!(info.levels[0].index_name(), Some("people_age"));
        assert_eq!(info.levels[0].in_loops.len(), 1);
        let eph = prog
            .ops()
            .iter()
            .find(|op| op.opcode == Opcode::OpenEphemeral)
            .unwrap()
            .p1;
        let in_next = prog
            .ops()
            .iter()
            .rev()
            .find(|op| op.opcode == Opcode::Next && op.p1 == eph)
            .unwrap();
        let top = in_next.p2 as usize;
        assert_eq!(prog.get(top).unwrap().opcode, Opcode::Column);
        assert_eq!(prog.get(top - 1).unwrap().opcode, Opcode::Rewind);
    }

    #[test]
    fn test_optimal_table_goes_outer() {
        // t2 is reachable by rowid from t1, so t1 drives the join even
        // though t2 comes first.
        let mut src = src_of(vec![plain_table("t2", 3), plain_table("t1", 2)]);
        let filter = resolved(&mut src, Expr::qualified("t2", "rowid").eq(Expr::qualified("t1", "a")));
        let (info, _) = compile(&src, Some(&filter), WhereFlags::empty());
        assert_eq!(info.levels[0].from, 1);
        assert_eq!(info.levels[1].from, 0);
        assert!(info.levels[1].plan.has(WsFlags::ROWID_EQ));
        assert_eq!(info.summary, "t1 {} t2 *");
    }

    #[test]
    fn test_left_join_null_row() {
        let mut src = src_of(vec![plain_table("t1", 2), plain_table("t2", 3)]);
        src.items[1].join_type = JoinType::LEFT;
        let on = Expr::qualified("t2", "b")
            .eq(Expr::qualified("t1", "a"))
            .from_join(1);
        let filter = resolved(&mut src, on);
        let mut ctx = PlanContext::default();
        ctx.n_tab = 2;
        ctx.config.automatic_index = false;
        let info = where_begin(&mut ctx, &src, Some(&filter), None, WhereFlags::empty()).unwrap();
        assert_eq!(info.levels[1].from, 1);
        assert_ne!(info.levels[1].left_join, 0);
        where_end(&mut ctx, info).unwrap();
        let prog = ctx.finish().unwrap();
        let ops = opcodes(&prog);
        let if_pos = ops.iter().position(|&o| o == Opcode::IfPos).unwrap();
        assert_eq!(ops[if_pos + 1], Opcode::NullRow);
        assert_eq!(prog.get(if_pos + 1).unwrap().p1, 1);
        assert_eq!(ops[if_pos + 2], Opcode::Goto);
    }

    #[test]
    fn test_constant_terms_tested_before_loops() {
        let mut src = src_of(vec![plain_table("t1", 2)]);
        let filter = resolved(
            &mut src,
            Expr::int(1).eq(Expr::int(0)).and(Expr::id("a").eq(Expr::int(5))),
        );
        let (info, prog) = compile(&src, Some(&filter), WhereFlags::empty());
        assert_eq!(info.wc.terms().iter().filter(|t| t.expr.is_constant_not_join()).count(), 0);
        let open = opcodes(&prog).iter().position(|&o| o == Opcode::OpenRead).unwrap();
        let close = prog.len() - 1;
        let guard = prog.ops()[..open]
            .iter()
            .find(|op| op.opcode.is_jump())
            .unwrap();
        assert_eq!(guard.p2 as usize, close);
    }

    #[test]
    fn test_too_many_tables() {
        let tables = (0..65).map(|i| plain_table(&format!("t{i}"), i + 2)).collect();
        let src = src_of(tables);
        let mut ctx = PlanContext::default();
        ctx.query_loop = 7.0;
        let err = where_begin(&mut ctx, &src, None, None, WhereFlags::empty()).unwrap_err();
        assert_eq!(err, PlanError::TooManyTables { max: 64 });
        assert_eq!(ctx.query_loop, 7.0);
    }

    #[test]
    fn test_indexed_by_unusable() {
        let mut src = src_of(vec![people_table()]);
        src.items[0].index_hint = IndexHint::IndexedBy("people_name".to_owned());
        let filter = resolved(&mut src, Expr::id("age").eq(Expr::int(5)));
        let mut ctx = PlanContext::default();
        let err = where_begin(&mut ctx, &src, Some(&filter), None, WhereFlags::empty()).unwrap_err();
        assert_eq!(err, PlanError::cannot_use_index("people_name"));
    }

    #[test]
    fn test_covering_index_rewrites_table_reads() {
        let mut src = src_of(vec![people_table()]);
        let filter = resolved(&mut src, Expr::id("age").eq(Expr::int(5)));
        let mut ctx = PlanContext::default();
        ctx.n_tab = 1;
        let info = where_begin(&mut ctx, &src, Some(&filter), None, WhereFlags::empty()).unwrap();
        let level = &info.levels[0];
        assert!(level.plan.has(WsFlags::IDX_ONLY));
        assert!(matches!(level.plan.access, AccessPath::Index(_)));
        let idx_cur = level.idx_cursor;
        let table = info.src.items[0].table.clone();
        let reg = ctx.builder.alloc_regs(2);
        ctx.expr_coder.code_get_column(&mut ctx.builder, &table, 0, 2, reg);
        ctx.builder.emit3(Opcode::Rowid, 0, reg + 1, 0);
        let body = ctx.builder.current_addr() - 2;
        where_end(&mut ctx, info).unwrap();
        let prog = ctx.finish().unwrap();
        let col = prog.get(body).unwrap();
        assert_eq!((col.opcode, col.p1, col.p2), (Opcode::Column, idx_cur, 0));
        let rowid = prog.get(body + 1).unwrap();
        assert_eq!((rowid.opcode, rowid.p1), (Opcode::IdxRowid, idx_cur));
        // The table itself is never opened.
        assert_eq!(prog.count_opcode(Opcode::OpenRead), 1);
    }

    #[test]
    fn test_order_by_satisfied_by_index() {
        let mut src = src_of(vec![people_table()]);
        let filter = resolved(&mut src, Expr::id("age").gt(Expr::int(30)));
        let mut key = Expr::id("age");
        resolve_names(&src.name_context(), &mut key).unwrap();
        let order_by = [OrderingTerm::asc(key)];
        let mut ctx = PlanContext::default();
        let info = where_begin(&mut ctx, &src, Some(&filter), Some(&order_by), WhereFlags::empty()).unwrap();
        assert!(info.order_by_consumed);
        assert_eq!(info.levels[0].index_name(), Some("people_age"));
        where_end(&mut ctx, info).unwrap();
    }

    #[test]
    fn test_one_pass_opens_for_write() {
        let mut src = src_of(vec![people_table()]);
        let filter = resolved(&mut src, Expr::id("id").eq(Expr::int(9)));
        let mut ctx = PlanContext::default();
        let info = where_begin(&mut ctx, &src, Some(&filter), None, WhereFlags::ONEPASS_DESIRED).unwrap();
        assert!(info.ok_one_pass);
        where_end(&mut ctx, info).unwrap();
        assert!(ctx.locks()[0].write);
        let prog = ctx.finish().unwrap();
        assert_eq!(prog.count_opcode(Opcode::OpenWrite), 1);
        assert_eq!(prog.count_opcode(Opcode::Close), 0);
    }
}
