//! `EXPLAIN QUERY PLAN` rows and the compact plan summary.

use std::fmt::Write as _;

use sqlplan_types::{Opcode, P4, Table};

use crate::context::PlanContext;
use crate::level::WhereLevel;
use crate::plan::{AccessPath, WhereFlags, WsFlags};
use crate::source::{SrcItem, SrcList};

fn append_term(out: &mut String, i: usize, column: &str, op: &str) {
    if i > 0 {
        out.push_str(" AND ");
    }
    let _ = write!(out, "{column}{op}?");
}

/// `" (a=? AND b>?)"` for the constrained columns of an index scan, or
/// nothing when the scan is unconstrained.
fn index_range_text(level: &WhereLevel, table: &Table) -> String {
    let plan = &level.plan;
    let Some(idx) = level.index() else {
        return String::new();
    };
    if plan.n_eq == 0 && !plan.has(WsFlags::BOTH_LIMIT) {
        return String::new();
    }
    let name = |j: usize| idx.columns.get(j).map_or("rowid", |c| table.column_name(c.column));
    let mut out = String::from(" (");
    for j in 0..plan.n_eq {
        append_term(&mut out, j, name(j), "=");
    }
    let mut i = plan.n_eq;
    let range = name(plan.n_eq);
    if plan.has(WsFlags::BTM_LIMIT) {
        append_term(&mut out, i, range, ">");
        i += 1;
    }
    if plan.has(WsFlags::TOP_LIMIT) {
        append_term(&mut out, i, range, "<");
    }
    out.push(')');
    out
}

/// The text of the `Explain` row describing how `item` is scanned.
pub fn explain_scan_text(item: &SrcItem, level: &WhereLevel, flags: WhereFlags) -> String {
    let plan = &level.plan;
    let min_max = flags.intersects(WhereFlags::ORDERBY_MIN | WhereFlags::ORDERBY_MAX);
    let is_search = plan.n_eq > 0 || plan.has(WsFlags::BOTH_LIMIT) || min_max;

    let mut out = String::from(if is_search { "SEARCH" } else { "SCAN" });
    let _ = write!(out, " TABLE {}", item.table.name);
    if let Some(alias) = &item.alias {
        let _ = write!(out, " AS {alias}");
    }

    if plan.has(WsFlags::INDEXED) {
        let temp = plan.has(WsFlags::TEMP_INDEX);
        out.push_str(" USING ");
        if temp {
            out.push_str("AUTOMATIC ");
        }
        if plan.has(WsFlags::IDX_ONLY) {
            out.push_str("COVERING ");
        }
        out.push_str("INDEX");
        if !temp {
            let _ = write!(out, " {}", level.index_name().unwrap_or_default());
        }
        out.push_str(&index_range_text(level, &item.table));
    } else if plan.has(WsFlags::ROWID_EQ | WsFlags::ROWID_RANGE) {
        out.push_str(" USING INTEGER PRIMARY KEY");
        if plan.has(WsFlags::ROWID_EQ) {
            out.push_str(" (rowid=?)");
        } else if plan.ws_flags.contains(WsFlags::BOTH_LIMIT) {
            out.push_str(" (rowid>? AND rowid<?)");
        } else if plan.has(WsFlags::BTM_LIMIT) {
            out.push_str(" (rowid>?)");
        } else if plan.has(WsFlags::TOP_LIMIT) {
            out.push_str(" (rowid<?)");
        }
    } else if let AccessPath::Virtual(info) = &plan.access {
        let _ = write!(
            out,
            " VIRTUAL TABLE INDEX {}:{}",
            info.idx_num,
            info.idx_str.as_deref().unwrap_or_default()
        );
    }

    let n_row = if min_max { 1 } else { plan.n_row as i64 };
    let _ = write!(out, " (~{n_row} rows)");
    out
}

/// Emit the `Explain` row for one level when the statement is being
/// compiled for `EXPLAIN QUERY PLAN`.
pub fn explain_one_scan(
    ctx: &mut PlanContext,
    src: &SrcList,
    level: &WhereLevel,
    level_no: usize,
    from: usize,
    flags: WhereFlags,
) {
    if !ctx.config.explain_query_plan()
        || level.plan.has(WsFlags::MULTI_OR)
        || flags.contains(WhereFlags::ONETABLE_ONLY)
    {
        return;
    }
    let Some(item) = src.items.get(level.from) else {
        return;
    };
    let text = explain_scan_text(item, level, flags);
    ctx.builder.emit_op(
        Opcode::Explain,
        ctx.select_id,
        level_no as i32,
        from as i32,
        P4::Str(text),
        0,
    );
}

/// One line naming, per level, the table (or `{}` when only an index is
/// read) and the access: `*` for rowid, the index name, or `{}` for a scan.
pub fn plan_summary(src: &SrcList, levels: &[WhereLevel]) -> String {
    let mut out = String::new();
    for level in levels {
        let plan = &level.plan;
        if plan.has(WsFlags::IDX_ONLY) {
            out.push_str("{}");
        } else if let Some(item) = src.items.get(level.from) {
            out.push_str(item.display_name());
        }
        out.push(' ');
        if plan.has(WsFlags::ROWID_EQ | WsFlags::ROWID_RANGE) && !plan.has(WsFlags::INDEXED) {
            out.push_str("* ");
        } else if let Some(name) = level.index_name() {
            let _ = write!(out, "{name} ");
        } else {
            out.push_str("{} ");
        }
    }
    out.truncate(out.trim_end().len());
    out
}
