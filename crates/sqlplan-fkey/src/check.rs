//! Foreign-key processing of INSERT, UPDATE, DELETE and DROP TABLE.

use std::sync::Arc;

use sqlplan_error::{PlanError, Result};
use sqlplan_observability::PlannerEvent;
use sqlplan_planner::{PlanContext, SrcItem, SrcList, WhereFlags, where_begin, where_end};
use sqlplan_types::{Opcode, P4, Table};
use tracing::{debug, debug_span};

use crate::codegen::{code_halt_constraint, code_lookup_parent, code_scan_children, halts_immediately};
use crate::parent_key::{locate_parent_key, locate_parent_key_index};

/// Bit for column `i` in a 32-bit column mask. Columns past 31 set every
/// bit.
pub const fn column_mask(i: usize) -> u32 {
    if i > 31 { u32::MAX } else { 1 << i }
}

fn notify_coded(ctx: &PlanContext, child: &str, parent: &str, incr: i32, deferred: bool) {
    ctx.notify(PlannerEvent::ForeignKeyCoded {
        child: child.to_owned(),
        parent: parent.to_owned(),
        incr,
        deferred,
    });
}

/// Emit the foreign-key checks for one row of `table` being deleted
/// (`reg_old != 0`) or inserted (`reg_new != 0`). An UPDATE is coded as
/// both, one call each. Exactly one of the registers is set.
///
/// For every key where `table` is the child, the parent row is looked up.
/// For every key where `table` is the parent, the child table is scanned.
pub fn fk_check(ctx: &mut PlanContext, table: &Table, reg_old: i32, reg_new: i32) -> Result<()> {
    debug_assert!((reg_old == 0) != (reg_new == 0));
    if !ctx.config.foreign_keys {
        return Ok(());
    }
    let _span = debug_span!(target: "sqlplan.fkey", "fk_check", table = %table.name).entered();
    let ignore_errors = ctx.disable_triggers;
    let schema = Arc::clone(&ctx.schema);

    for fk in &table.foreign_keys {
        let Some(parent) = schema.table(&fk.parent_table) else {
            if ignore_errors {
                continue;
            }
            return Err(PlanError::NoSuchTable {
                name: fk.parent_table.clone(),
            });
        };
        let Some(mut key) = locate_parent_key(ctx, parent, fk)? else {
            continue;
        };
        key.map_child_ipk(table);

        ctx.lock_table(parent.db, parent.root_page, false, &parent.name);
        let cursor = ctx.alloc_cursor();
        if reg_old != 0 {
            code_lookup_parent(ctx, parent, &key, fk, cursor, reg_old, -1, false);
            notify_coded(ctx, &table.name, &parent.name, -1, fk.deferred);
        }
        if reg_new != 0 {
            code_lookup_parent(ctx, parent, &key, fk, cursor, reg_new, 1, false);
            notify_coded(ctx, &table.name, &parent.name, 1, fk.deferred);
        }
        debug!(
            target: "sqlplan.fkey",
            child = %table.name,
            parent = %parent.name,
            deferred = fk.deferred,
            rowid_key = key.is_rowid(),
            "parent lookup coded"
        );
    }

    for (child, i) in schema.referencing(&table.name) {
        let fk = &child.foreign_keys[i];
        if halts_immediately(ctx, fk) {
            // Inserting one parent row cannot break an immediate constraint.
            debug_assert!(reg_old == 0 && reg_new != 0);
            continue;
        }
        let Some(key) = locate_parent_key(ctx, table, fk)? else {
            continue;
        };
        let cursor = ctx.alloc_cursor();
        if reg_new != 0 {
            code_scan_children(ctx, table, &child, &key, fk, cursor, reg_new, -1)?;
            notify_coded(ctx, &child.name, &table.name, -1, fk.deferred);
        }
        if reg_old != 0 {
            code_scan_children(ctx, table, &child, &key, fk, cursor, reg_old, 1)?;
            notify_coded(ctx, &child.name, &table.name, 1, fk.deferred);
        }
        debug!(
            target: "sqlplan.fkey",
            child = %child.name,
            parent = %table.name,
            deferred = fk.deferred,
            "child scan coded"
        );
    }
    Ok(())
}

/// Columns of `table` that [`fk_check`] reads from the OLD row image of an
/// UPDATE or DELETE: child key columns and, for keys that reference the
/// table, the parent key index columns.
pub fn fk_old_mask(ctx: &PlanContext, table: &Table) -> u32 {
    if !ctx.config.foreign_keys {
        return 0;
    }
    let mut mask = 0;
    for fk in &table.foreign_keys {
        for c in &fk.columns {
            mask |= column_mask(c.child_column);
        }
    }
    for (child, i) in ctx.schema.referencing(&table.name) {
        let fk = &child.foreign_keys[i];
        if let Some(idx) = locate_parent_key_index(table, fk).and_then(|k| k.index) {
            for ic in &idx.columns {
                if let Ok(col) = usize::try_from(ic.column) {
                    mask |= column_mask(col);
                }
            }
        }
    }
    mask
}

/// Whether a change to `table` needs any foreign-key processing.
///
/// `changes` is `None` for INSERT and DELETE. For UPDATE it holds, per
/// column, the index of the SET expression assigning it, or a negative
/// number for columns left alone. `rowid_changed` is set when the UPDATE
/// assigns the rowid.
pub fn fk_required(
    ctx: &PlanContext,
    table: &Table,
    changes: Option<&[i32]>,
    rowid_changed: bool,
) -> bool {
    if !ctx.config.foreign_keys {
        return false;
    }
    let referencing = ctx.schema.referencing(&table.name);
    let Some(changes) = changes else {
        return !referencing.is_empty() || !table.foreign_keys.is_empty();
    };
    let changed = |col: usize| {
        changes.get(col).is_some_and(|&c| c >= 0) || (table.ipk == Some(col) && rowid_changed)
    };

    let child_key_changed = table
        .foreign_keys
        .iter()
        .flat_map(|fk| &fk.columns)
        .any(|c| changed(c.child_column));
    if child_key_changed {
        return true;
    }

    referencing.iter().any(|(child, i)| {
        child.foreign_keys[*i].columns.iter().any(|c| {
            table.columns.iter().enumerate().any(|(col, column)| {
                let in_key = match &c.parent_column {
                    Some(name) => column.name.eq_ignore_ascii_case(name),
                    None => is_primary_key_column(table, col),
                };
                in_key && changed(col)
            })
        })
    })
}

fn is_primary_key_column(table: &Table, col: usize) -> bool {
    table.ipk == Some(col)
        || table
            .primary_key_index()
            .is_some_and(|idx| idx.position_of(col as i32).is_some())
}

/// Code the foreign-key side of `DROP TABLE table`: delete every row with
/// the checks on, then fail the statement if that left immediate violations
/// behind.
///
/// When no other table refers to `table` and none of its own keys is
/// deferred, nothing is coded. When only its own deferred keys matter, the
/// whole block is skipped while the deferred counter is zero.
pub fn fk_drop_table(ctx: &mut PlanContext, table: &Arc<Table>) -> Result<()> {
    if !ctx.config.foreign_keys || table.is_virtual() {
        return Ok(());
    }
    let mut skip = None;
    if ctx.schema.referencing(&table.name).is_empty() {
        if !table.foreign_keys.iter().any(|fk| fk.deferred) {
            return Ok(());
        }
        let label = ctx.builder.emit_label();
        ctx.builder
            .emit_jump_to_label(Opcode::FkIfZero, 1, 0, label, P4::None, 0);
        skip = Some(label);
    }

    let saved = (ctx.disable_triggers, ctx.is_multi_write);
    ctx.disable_triggers = true;
    ctx.is_multi_write = true;
    let deleted = code_delete_all(ctx, table);
    (ctx.disable_triggers, ctx.is_multi_write) = saved;
    deleted?;

    let past_halt = ctx.builder.current_addr_i32() + 2;
    ctx.builder.emit3(Opcode::FkIfZero, 0, past_halt, 0);
    code_halt_constraint(ctx);
    if let Some(label) = skip {
        ctx.builder.resolve_label(label);
    }
    debug!(target: "sqlplan.fkey", table = %table.name, "drop table check coded");
    Ok(())
}

/// `DELETE FROM table` with foreign-key checks on every row.
fn code_delete_all(ctx: &mut PlanContext, table: &Arc<Table>) -> Result<()> {
    let cursor = ctx.alloc_cursor();
    let src = SrcList::new().with(SrcItem::new(Arc::clone(table), cursor));
    let info = where_begin(ctx, &src, None, None, WhereFlags::ONEPASS_DESIRED)?;

    let n_col = table.columns.len() as i32;
    let reg_old = ctx.builder.alloc_regs(n_col + 1);
    ctx.builder.emit3(Opcode::Rowid, cursor, reg_old, 0);
    let coder = Arc::clone(&ctx.expr_coder);
    for col in 0..n_col {
        coder.code_get_column(&mut ctx.builder, table, cursor, col, reg_old + 1 + col);
    }
    fk_check(ctx, table, reg_old, 0)?;
    ctx.builder.emit3(Opcode::Delete, cursor, 0, 0);
    where_end(ctx, info)
}
