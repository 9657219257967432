//! Transient indexes built at run time for a single statement.
//!
//! The index is keyed on the columns of the equality terms that can drive
//! it, followed by every other column the statement reads from the table,
//! so the loop never has to visit the table itself.

use std::sync::Arc;

use sqlplan_ast::binary_compare_collation;
use sqlplan_error::Result;
use sqlplan_observability::PlannerEvent;
use sqlplan_types::{BINARY, Index, IndexColumn, IndexOrigin, OnError, Opcode, P4, SortOrder};
use tracing::debug;

use crate::clause::WhereClause;
use crate::context::PlanContext;
use crate::cost::term_can_drive_index;
use crate::mask::Bitmask;
use crate::plan::{WherePlan, WsFlags};
use crate::source::SrcItem;
use crate::term::OperatorMask;

/// Name every automatic index carries.
pub const AUTO_INDEX_NAME: &str = "auto-index";

const fn column_bit(column: i32) -> Bitmask {
    if column >= 63 { 1 << 63 } else { 1 << column }
}

/// Emit code that fills a transient index for `src` the first time the
/// loop is entered, and adjust `plan` to seek it.
///
/// Returns the index description and the cursor it is open on.
pub fn construct_automatic_index(
    ctx: &mut PlanContext,
    wc: &WhereClause,
    src: &SrcItem,
    not_ready: Bitmask,
    plan: &mut WherePlan,
) -> Result<(Arc<Index>, i32)> {
    let table = &src.table;
    let n_col = table.columns.len() as i32;

    // Only build once, even inside a correlated subquery or trigger.
    let b = &mut ctx.builder;
    let reg_is_init = b.alloc_reg();
    let addr_init = b.emit3(Opcode::If, reg_is_init, 0, 0);
    b.emit3(Opcode::Integer, 1, reg_is_init, 0);

    let mut key = Vec::new();
    let mut idx_cols: Bitmask = 0;
    for t in wc.terms() {
        if !term_can_drive_index(t, src, not_ready) || t.left_column < 0 {
            continue;
        }
        let bit = column_bit(t.left_column);
        if idx_cols & bit != 0 {
            continue;
        }
        idx_cols |= bit;
        let collation = t
            .expr
            .as_binary()
            .and_then(|(_, l, r)| binary_compare_collation(l, r))
            .unwrap_or(BINARY);
        key.push(IndexColumn {
            column: t.left_column,
            collation: collation.to_owned(),
            sort_order: SortOrder::Asc,
        });
    }
    let n_eq = key.len();

    // Everything else the statement reads makes the index covering.
    let extra = src.col_used & (!idx_cols | (1 << 63));
    let max_bit_col = n_col.min(63);
    for i in (0..max_bit_col).filter(|&i| extra & (1 << i) != 0) {
        key.push(IndexColumn {
            column: i,
            collation: BINARY.to_owned(),
            sort_order: SortOrder::Asc,
        });
    }
    if src.col_used & (1 << 63) != 0 {
        for i in 63..n_col {
            key.push(IndexColumn {
                column: i,
                collation: BINARY.to_owned(),
                sort_order: SortOrder::Asc,
            });
        }
    }

    plan.n_eq = n_eq;
    plan.ws_flags |= WsFlags::COLUMN_EQ | WsFlags::IDX_ONLY;
    plan.eq_term_mask = OperatorMask::EQ;

    let mut index = Index {
        name: AUTO_INDEX_NAME.to_owned(),
        table: table.name.clone(),
        root_page: 0,
        columns: key,
        on_error: OnError::None,
        origin: IndexOrigin::Automatic,
        row_estimates: Vec::new(),
        samples: None,
        unordered: false,
    };
    index.set_default_row_estimates(table.row_estimate);
    let index = Arc::new(index);

    let idx_cursor = ctx.alloc_cursor();
    let n_key = index.column_count() as i32;
    let b = &mut ctx.builder;
    b.emit_op(
        Opcode::OpenAutoindex,
        idx_cursor,
        n_key + 1,
        0,
        P4::KeyInfo {
            index: index.name.clone(),
            collations: index.collations(),
        },
        0,
    );

    let addr_top = b.emit3(Opcode::Rewind, src.cursor, 0, 0);
    let reg_base = b.alloc_regs(n_key + 1);
    for (j, c) in index.columns.iter().enumerate() {
        ctx.expr_coder
            .code_get_column(b, table, src.cursor, c.column, reg_base + j as i32);
    }
    b.emit3(Opcode::Rowid, src.cursor, reg_base + n_key, 0);
    let record = b.alloc_temp();
    b.emit_op(
        Opcode::MakeRecord,
        reg_base,
        n_key + 1,
        record,
        P4::Affinity(index.affinity_string(table)),
        0,
    );
    b.emit3(Opcode::IdxInsert, idx_cursor, record, 0);
    b.emit3(Opcode::Next, src.cursor, i32::try_from(addr_top + 1).unwrap_or(i32::MAX), 0);
    b.jump_here(addr_top);
    b.free_temp(record);
    b.jump_here(addr_init);

    let columns: Vec<String> = index
        .columns
        .iter()
        .map(|c| table.column_name(c.column).to_owned())
        .collect();
    debug!(
        target: "sqlplan.planner",
        table = %table.name,
        cursor = idx_cursor,
        n_eq,
        columns = ?columns,
        "automatic index"
    );
    if ctx.tracing() {
        ctx.notify(PlannerEvent::AutomaticIndex {
            table: table.name.clone(),
            columns,
            cost: plan.n_row,
        });
    }
    Ok((index, idx_cursor))
}
