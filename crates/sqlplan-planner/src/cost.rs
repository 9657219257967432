//! The cost model: pick the cheapest way to read one table given which
//! tables are already available in outer loops.
//!
//! Costs are abstract units roughly proportional to b-tree steps. A full
//! scan costs four times the table's row estimate; each seek costs the log
//! of the tree size. Only the relative order of costs matters.

use std::sync::Arc;

use sqlplan_ast::{ExprKind, InSet, OrderingTerm, index_affinity_ok};
use sqlplan_error::{PlanError, Result};
use sqlplan_observability::PlannerEvent;
use sqlplan_types::{BINARY, Index, Table, collation_eq};
use tracing::{debug, debug_span, trace};

use crate::clause::WhereClause;
use crate::context::PlanContext;
use crate::mask::{Bitmask, CursorMaskSet};
use crate::plan::{AccessPath, BIG_COST, WhereCost, WsFlags};
use crate::source::{IndexHint, SrcItem};
use crate::stats::{ValueSource, equal_scan_est, in_scan_est, range_scan_est};
use crate::term::{OperatorMask, Term, TermFlags};
use crate::vtab::{IndexInfo, invoke_best_index};

/// One costing question: how best to read `src` from `wc` when the tables
/// in `not_ready` are not yet available.
#[derive(Clone, Copy)]
pub struct CostQuery<'a> {
    pub wc: &'a WhereClause,
    pub masks: &'a CursorMaskSet,
    pub src: &'a SrcItem,
    /// Tables whose columns cannot appear on the right of a usable term.
    pub not_ready: Bitmask,
    /// Tables that cannot be referenced by any term counted as a filter.
    /// Differs from `not_ready` while looking for a table's optimal plan.
    pub not_valid: Bitmask,
    pub order_by: Option<&'a [OrderingTerm]>,
    /// Join position being filled; only used for reporting.
    pub level: usize,
}

impl<'a> CostQuery<'a> {
    /// The same question asked of a sub-clause, with no ORDER BY.
    fn with_clause<'b>(&self, wc: &'b WhereClause) -> CostQuery<'b>
    where
        'a: 'b,
    {
        CostQuery {
            wc,
            order_by: None,
            ..*self
        }
    }
}

/// Crude base-10 logarithm: the number of decimal digits of `n`, at least 1.
#[must_use]
pub fn est_log(n: f64) -> f64 {
    let mut log_n = 1.0;
    let mut x = 10.0;
    while n > x {
        log_n += 1.0;
        x *= 10.0;
    }
    log_n
}

/// Find the cheapest plan for `q.src`.
pub fn best_index(ctx: &mut PlanContext, q: &CostQuery<'_>) -> Result<WhereCost> {
    if q.src.table.is_virtual() {
        best_virtual_index(ctx, q)
    } else {
        best_btree_index(ctx, q)
    }
}

fn report(ctx: &PlanContext, q: &CostQuery<'_>, index: Option<String>, cost: f64, rows: f64, ws: WsFlags) {
    if ctx.tracing() {
        ctx.notify(PlannerEvent::CandidateCost {
            level: q.level,
            table: q.src.display_name().to_owned(),
            index,
            cost,
            rows,
            ws_flags: ws.bits(),
        });
    }
}

// ---------------------------------------------------------------------------
// B-tree tables
// ---------------------------------------------------------------------------

/// An access path being costed: the table's own rowid order, or an index.
#[derive(Clone, Copy)]
enum Probe<'a> {
    Rowid { rows: f64 },
    Index(&'a Arc<Index>),
}

impl<'a> Probe<'a> {
    fn column_count(self) -> usize {
        match self {
            Self::Rowid { .. } => 1,
            Self::Index(idx) => idx.column_count(),
        }
    }

    fn column(self, i: usize) -> i32 {
        match self {
            Self::Rowid { .. } => -1,
            Self::Index(idx) => idx.columns[i].column,
        }
    }

    fn row_estimate(self, n_eq: usize) -> f64 {
        match self {
            Self::Rowid { rows } => {
                if n_eq == 0 {
                    rows
                } else {
                    1.0
                }
            }
            Self::Index(idx) => idx.row_estimate(n_eq),
        }
    }

    fn is_unique(self) -> bool {
        match self {
            Self::Rowid { .. } => true,
            Self::Index(idx) => idx.is_unique(),
        }
    }

    fn unordered(self) -> bool {
        matches!(self, Self::Index(idx) if idx.unordered)
    }

    fn index(self) -> Option<&'a Arc<Index>> {
        match self {
            Self::Rowid { .. } => None,
            Self::Index(idx) => Some(idx),
        }
    }

    fn name(self) -> String {
        self.index().map_or_else(|| "ipk".to_owned(), |i| i.name.clone())
    }
}

/// Whether ORDER BY terms from `first` on reference any table but `base`.
fn references_other_tables(
    masks: &CursorMaskSet,
    order_by: &[OrderingTerm],
    first: usize,
    base: i32,
) -> bool {
    let allowed = !masks.get_mask(base);
    order_by
        .iter()
        .skip(first)
        .any(|o| masks.expr_usage(&o.expr) & allowed != 0)
}

/// Whether scanning `probe` yields rows in ORDER BY order. Returns the scan
/// direction (`true` for reverse) when it does.
///
/// The first `n_eq` index columns are pinned by equality constraints and
/// may be skipped by the ORDER BY. The rowid that ends every index entry
/// may match the last ORDER BY term.
fn is_sorting_index(
    masks: &CursorMaskSet,
    probe: Probe<'_>,
    table: &Table,
    base: i32,
    order_by: &[OrderingTerm],
    n_eq: usize,
    ws_flags: WsFlags,
) -> Option<bool> {
    let n_term = order_by.len();
    let n_col = probe.column_count();
    let mut sort_order = 0_u8;
    let (mut i, mut j) = (0, 0);

    while j < n_term && i <= n_col {
        let term = &order_by[j];
        let Some((cursor, column)) = term.expr.as_column() else {
            break;
        };
        if cursor != base {
            break;
        }
        let coll = term.expr.collation_seq().unwrap_or(BINARY);
        let (idx_column, idx_sort, idx_coll) = match probe {
            Probe::Index(idx) if i < n_col => {
                let c = &idx.columns[i];
                let col = match table.ipk {
                    Some(ipk) if ipk as i32 == c.column => -1,
                    _ => c.column,
                };
                (col, c.sort_order.as_bit(), c.collation.as_str())
            }
            _ => (-1, 0, coll),
        };
        if column != idx_column || !collation_eq(coll, idx_coll) {
            if i < n_eq {
                i += 1;
                continue;
            } else if i == n_col {
                break;
            }
            return None;
        }
        let term_sort = idx_sort ^ term.sort_order.as_bit();
        if i > n_eq {
            if term_sort != sort_order {
                return None;
            }
        } else {
            sort_order = term_sort;
        }
        j += 1;
        if idx_column < 0 && !references_other_tables(masks, order_by, j, base) {
            j = n_term;
        }
        i += 1;
    }

    let rev = sort_order != 0;
    if j >= n_term {
        return Some(rev);
    }
    // A unique index fully matched: the rest of the ORDER BY cannot matter.
    if probe.is_unique()
        && i == n_col
        && !ws_flags.contains(WsFlags::COLUMN_NULL)
        && !references_other_tables(masks, order_by, j, base)
    {
        return Some(rev);
    }
    None
}

#[allow(clippy::too_many_lines)]
fn best_btree_index(ctx: &mut PlanContext, q: &CostQuery<'_>) -> Result<WhereCost> {
    let src = q.src;
    let table = &src.table;
    let cur = src.cursor;
    let mut best = WhereCost::default();

    let idx_eq_mask = if src.is_left_join() {
        OperatorMask::EQ | OperatorMask::IN
    } else {
        OperatorMask::EQ | OperatorMask::IN | OperatorMask::ISNULL
    };

    let (probes, mut ws_mask, mut eq_mask) = match &src.index_hint {
        IndexHint::IndexedBy(name) => {
            let idx = table.index(name).ok_or_else(|| PlanError::NoSuchIndex {
                name: name.clone(),
            })?;
            (
                vec![Probe::Index(idx)],
                !(WsFlags::ROWID_EQ | WsFlags::ROWID_RANGE),
                idx_eq_mask,
            )
        }
        hint => {
            let mut probes = vec![Probe::Rowid {
                rows: table.row_estimate as f64,
            }];
            if *hint != IndexHint::NotIndexed {
                probes.extend(table.indexes.iter().map(Probe::Index));
            }
            (
                probes,
                !(WsFlags::COLUMN_IN | WsFlags::COLUMN_EQ | WsFlags::COLUMN_NULL | WsFlags::COLUMN_RANGE),
                OperatorMask::EQ | OperatorMask::IN,
            )
        }
    };

    let mut values = ValueSource::new(&ctx.bound_values);
    for probe in probes {
        let _span = debug_span!(
            target: "sqlplan.planner",
            "candidate",
            table = %table.name,
            index = %probe.name()
        )
        .entered();
        let idx_table = probe.index().map(|i| (&**i, &**table));
        let n_col = probe.column_count();
        let mut ws = WsFlags::empty();
        let mut used: Bitmask = 0;
        let mut n_in_mul = 1.0_f64;
        let mut in_est = false;
        let mut est_bound = 100_u32;
        let mut n_bound = 0;
        let mut sort = false;
        let mut lookup = false;
        let mut first_term: Option<&Term> = None;

        let mut n_eq = 0;
        while n_eq < n_col {
            let Some(id) = q.wc.find_term(cur, probe.column(n_eq), q.not_ready, eq_mask, idx_table) else {
                break;
            };
            let t = q.wc.term(id);
            ws |= WsFlags::COLUMN_EQ | WsFlags::ROWID_EQ;
            if t.operator.contains(OperatorMask::IN) {
                ws |= WsFlags::COLUMN_IN;
                match &t.expr.kind {
                    ExprKind::In {
                        set: InSet::Subquery(_),
                        ..
                    } => {
                        n_in_mul *= 25.0;
                        in_est = true;
                    }
                    ExprKind::In {
                        set: InSet::List(list),
                        ..
                    } if !list.is_empty() => n_in_mul *= list.len() as f64,
                    _ => {}
                }
            } else if t.operator.contains(OperatorMask::ISNULL) {
                ws |= WsFlags::COLUMN_NULL;
            }
            if n_eq == 0 && ctx.config.use_stat2 && probe.index().is_some_and(|i| i.samples.is_some()) {
                first_term = Some(t);
            }
            used |= t.prereq_right;
            n_eq += 1;
        }

        if n_eq < n_col && !probe.unordered() {
            let col = probe.column(n_eq);
            let range = OperatorMask::LT | OperatorMask::LE | OperatorMask::GT | OperatorMask::GE;
            if q.wc.find_term(cur, col, q.not_ready, range, idx_table).is_some() {
                let top = q
                    .wc
                    .find_term(cur, col, q.not_ready, OperatorMask::LT | OperatorMask::LE, idx_table)
                    .map(|id| q.wc.term(id));
                let btm = q
                    .wc
                    .find_term(cur, col, q.not_ready, OperatorMask::GT | OperatorMask::GE, idx_table)
                    .map(|id| q.wc.term(id));
                est_bound = range_scan_est(
                    probe.index().map(|i| &**i),
                    table,
                    n_eq,
                    btm,
                    top,
                    ctx.config.use_stat2,
                    &mut values,
                );
                if let Some(t) = top {
                    n_bound = 1;
                    ws |= WsFlags::TOP_LIMIT;
                    used |= t.prereq_right;
                }
                if let Some(t) = btm {
                    n_bound += 1;
                    ws |= WsFlags::BTM_LIMIT;
                    used |= t.prereq_right;
                }
                ws |= WsFlags::COLUMN_RANGE | WsFlags::ROWID_RANGE;
            }
        } else if probe.is_unique() && !ws.intersects(WsFlags::COLUMN_IN | WsFlags::COLUMN_NULL) {
            ws |= WsFlags::UNIQUE;
        }

        if let Some(order_by) = q.order_by {
            let rev = if ws.contains(WsFlags::COLUMN_IN) || probe.unordered() {
                None
            } else {
                is_sorting_index(q.masks, probe, table, cur, order_by, n_eq, ws)
            };
            match rev {
                Some(rev) => {
                    ws |= WsFlags::ROWID_RANGE | WsFlags::COLUMN_RANGE | WsFlags::ORDERBY;
                    if rev {
                        ws |= WsFlags::REVERSE;
                    }
                }
                None => sort = true,
            }
        }

        if let Some(idx) = probe.index()
            && !ws.is_empty()
        {
            let uncovered = idx
                .columns
                .iter()
                .filter(|c| (0..63).contains(&c.column))
                .fold(src.col_used, |m, c| m & !(1 << c.column));
            if uncovered == 0 {
                ws |= WsFlags::IDX_ONLY;
            } else {
                lookup = true;
            }
        }

        let est0 = probe.row_estimate(0);
        let mut n_row = probe.row_estimate(n_eq) * n_in_mul;
        if in_est && n_row * 2.0 > est0 {
            n_row = (est0 / 2.0).floor();
            n_in_mul = (n_row / probe.row_estimate(n_eq)).floor();
        }

        if let (Some(idx), Some(t)) = (probe.index(), first_term)
            && n_row > 1.0
            && n_eq == 1
        {
            if t.operator.intersects(OperatorMask::EQ | OperatorMask::ISNULL) {
                equal_scan_est(idx, table, t.right_operand(), &mut values, &mut n_row);
            } else if t.operator == OperatorMask::IN && !in_est {
                if let ExprKind::In {
                    set: InSet::List(list),
                    ..
                } = &t.expr.kind
                {
                    in_scan_est(idx, table, list, &mut values, &mut n_row);
                }
            }
        }

        n_row = (n_row * f64::from(est_bound) / 100.0).max(1.0);

        let mut cost = if ws.intersects(WsFlags::NOT_FULLSCAN) {
            let log_n = est_log(est0);
            if lookup {
                n_row + (n_in_mul + n_row) * log_n
            } else {
                n_row + n_in_mul * log_n
            }
        } else {
            est0 * 4.0
        };
        if sort {
            cost += n_row * est_log(n_row) * 3.0;
        }

        // Terms the index cannot use still shrink the output.
        if n_row > 2.0 && cost <= best.rcost {
            let mut skip_eq = n_eq;
            let mut skip_range = n_bound;
            let this_tab = q.masks.get_mask(cur);
            for t in q.wc.terms() {
                if n_row <= 2.0 {
                    break;
                }
                if t.has(TermFlags::VIRTUAL) || t.prereq_all & q.not_valid != this_tab {
                    continue;
                }
                if t.operator.intersects(OperatorMask::EQ | OperatorMask::IN | OperatorMask::ISNULL) {
                    if skip_eq > 0 {
                        skip_eq -= 1;
                    } else {
                        n_row /= 10.0;
                    }
                } else if t.operator.intersects(OperatorMask::RANGE) {
                    if skip_range > 0 {
                        skip_range -= 1;
                    } else {
                        n_row /= 3.0;
                    }
                } else if t.operator != OperatorMask::NOOP {
                    n_row /= 2.0;
                }
            }
            n_row = n_row.max(2.0);
        }

        trace!(
            target: "sqlplan.planner",
            n_eq,
            n_in_mul,
            est_bound,
            sort,
            lookup,
            ws_flags = ws.bits(),
            rows = n_row,
            cost,
            used,
            "costed access path"
        );
        report(ctx, q, probe.index().map(|i| i.name.clone()), cost, n_row, ws);

        if (probe.index().is_none() || !ws.is_empty())
            && (cost < best.rcost || (cost <= best.rcost && n_row < best.plan.n_row))
        {
            best.rcost = cost;
            best.used = used;
            best.plan.n_row = n_row;
            best.plan.ws_flags = ws & ws_mask;
            best.plan.n_eq = n_eq;
            best.plan.access = probe
                .index()
                .map_or(AccessPath::Table, |i| AccessPath::Index(Arc::clone(i)));
        }

        if matches!(src.index_hint, IndexHint::IndexedBy(_)) {
            break;
        }
        ws_mask = !(WsFlags::ROWID_EQ | WsFlags::ROWID_RANGE);
        eq_mask = idx_eq_mask;
    }
    ctx.var_mask |= values.var_mask;

    if q.order_by.is_none() && ctx.config.reverse_unordered_selects {
        best.plan.ws_flags |= WsFlags::REVERSE;
    }

    best_or_clause_index(ctx, q, &mut best)?;
    best_automatic_index(ctx, q, &mut best);
    best.plan.eq_term_mask = eq_mask;
    Ok(best)
}

// ---------------------------------------------------------------------------
// Multi-index OR
// ---------------------------------------------------------------------------

/// Replace `best` with a plan that runs one indexed lookup per disjunct of
/// an OR term, if that is cheaper.
fn best_or_clause_index(ctx: &mut PlanContext, q: &CostQuery<'_>, best: &mut WhereCost) -> Result<()> {
    if q.src.index_hint != IndexHint::None {
        return Ok(());
    }
    let cur = q.src.cursor;
    let mask_src = q.masks.get_mask(cur);

    for id in q.wc.ids() {
        let term = q.wc.term(id);
        let Some(or_info) = term.or_info() else {
            continue;
        };
        if term.operator != OperatorMask::OR
            || (term.prereq_all & !mask_src) & q.not_ready != 0
            || or_info.indexable & mask_src == 0
        {
            continue;
        }

        let mut total = 0.0;
        let mut n_row = 0.0;
        let mut used: Bitmask = 0;
        for sub in or_info.clause.terms() {
            let sub_cost = if let Some(and_info) = sub.and_info() {
                best_index(ctx, &q.with_clause(&and_info.clause))?
            } else if sub.left_cursor == cur {
                let single = WhereClause::single(sub);
                best_index(ctx, &q.with_clause(&single))?
            } else {
                continue;
            };
            total += sub_cost.rcost;
            n_row += sub_cost.plan.n_row;
            used |= sub_cost.used;
            if total >= best.rcost {
                break;
            }
        }
        if q.order_by.is_some() {
            total += n_row * est_log(n_row);
        }
        report(ctx, q, Some(format!("or-term-{}", id.0)), total, n_row, WsFlags::MULTI_OR);
        if total < best.rcost {
            debug!(
                target: "sqlplan.planner",
                table = %q.src.table.name,
                term = id.0,
                cost = total,
                rows = n_row,
                "multi-index OR chosen"
            );
            best.rcost = total;
            best.used = used;
            best.plan.n_row = n_row;
            best.plan.ws_flags = WsFlags::MULTI_OR;
            best.plan.access = AccessPath::MultiOr(id);
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Automatic indexes
// ---------------------------------------------------------------------------

/// Whether `term` could seek a transient index on `src` built from the
/// equality's left column.
pub fn term_can_drive_index(term: &Term, src: &SrcItem, not_ready: Bitmask) -> bool {
    term.left_cursor == src.cursor
        && term.operator == OperatorMask::EQ
        && term.prereq_right & not_ready == 0
        && index_affinity_ok(&term.expr, src.table.column_affinity(term.left_column))
}

/// Switch a full scan to a transient index when building the index once
/// beats scanning the table on every iteration of the outer loops.
fn best_automatic_index(ctx: &PlanContext, q: &CostQuery<'_>, best: &mut WhereCost) {
    if ctx.query_loop <= 1.0
        || !ctx.config.automatic_index
        || best.plan.has(WsFlags::NOT_FULLSCAN)
        || q.src.index_hint == IndexHint::NotIndexed
    {
        return;
    }
    let table_rows = q.src.table.row_estimate as f64;
    let log_n = est_log(table_rows);
    let cost = 2.0 * log_n * (table_rows / ctx.query_loop + 1.0);
    if cost >= best.rcost {
        return;
    }
    if let Some(t) = q
        .wc
        .terms()
        .iter()
        .find(|t| term_can_drive_index(t, q.src, q.not_ready))
    {
        debug!(
            target: "sqlplan.planner",
            table = %q.src.table.name,
            from = best.rcost,
            to = cost,
            "automatic index reduces cost"
        );
        report(ctx, q, Some("auto-index".to_owned()), cost, log_n + 1.0, WsFlags::TEMP_INDEX);
        best.rcost = cost;
        best.plan.n_row = log_n + 1.0;
        best.plan.ws_flags = WsFlags::TEMP_INDEX;
        best.plan.access = AccessPath::AutoIndex;
        best.used = t.prereq_right;
    }
}

// ---------------------------------------------------------------------------
// Virtual tables
// ---------------------------------------------------------------------------

fn best_virtual_index(ctx: &mut PlanContext, q: &CostQuery<'_>) -> Result<WhereCost> {
    let table = &q.src.table;
    let module_name = table.virtual_module.as_deref().unwrap_or_default();
    let module = ctx
        .module(module_name)
        .ok_or_else(|| PlanError::virtual_table(format!("no such module: {module_name}")))?;

    let mut info = IndexInfo::for_cursor(q.wc, q.src.cursor, q.order_by.unwrap_or_default());
    info.prepare(q.wc, q.not_ready);
    invoke_best_index(module.as_ref(), table, &mut info)?;

    let used = info.used_mask(q.wc);
    let mut rcost = info.estimated_cost;
    if q.order_by.is_some() && !info.order_by_consumed {
        rcost += est_log(rcost) * rcost;
    }
    let rcost = rcost.min(BIG_COST / 2.0);

    let mut ws = WsFlags::VIRTUALTABLE;
    if info.order_by_consumed {
        ws |= WsFlags::ORDERBY;
    }
    report(ctx, q, info.idx_str.clone(), rcost, rcost, ws);

    let mut best = WhereCost::default();
    best.rcost = rcost;
    best.used = used;
    best.plan.ws_flags = ws;
    best.plan.n_eq = 0;
    best.plan.n_row = rcost;
    best.plan.access = AccessPath::Virtual(Box::new(info));

    best_or_clause_index(ctx, q, &mut best)?;
    Ok(best)
}
