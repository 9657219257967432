//! Code for one foreign key at one row change: probing the parent table
//! for a child row, and scanning the child table for a parent row.
//!
//! Row images live in registers: `reg_data` holds the rowid and
//! `reg_data + 1 + i` holds column `i`.

use std::sync::Arc;

use sqlplan_ast::{Expr, NameContext, conjunction, resolve_names};
use sqlplan_error::Result;
use sqlplan_planner::{PlanContext, SrcItem, SrcList, WhereFlags, where_begin, where_end};
use sqlplan_types::opcode::{SQLITE_CONSTRAINT, on_error, p5};
use sqlplan_types::{ForeignKey, Opcode, P4, Table, TypeAffinity};
use tracing::trace;

use crate::parent_key::ParentKey;

pub(crate) const FK_FAILED: &str = "foreign key constraint failed";

/// Register holding column `column` of the row image at `reg_data`; -1 is
/// the rowid.
pub(crate) const fn row_reg(reg_data: i32, column: i32) -> i32 {
    if column < 0 { reg_data } else { reg_data + 1 + column }
}

fn is_self_reference(table: &Table, fk: &ForeignKey) -> bool {
    table.name.eq_ignore_ascii_case(&fk.child_table)
}

/// Abort the statement with "foreign key constraint failed".
pub(crate) fn code_halt_constraint(ctx: &mut PlanContext) {
    ctx.builder.emit_op(
        Opcode::Halt,
        SQLITE_CONSTRAINT,
        on_error::ABORT,
        0,
        P4::Str(FK_FAILED.to_owned()),
        0,
    );
}

/// Whether a violation of an immediate constraint halts on the spot rather
/// than being counted: a top-level statement that writes a single row.
pub(crate) const fn halts_immediately(ctx: &PlanContext, fk: &ForeignKey) -> bool {
    !fk.deferred && ctx.nested == 0 && !ctx.is_multi_write
}

/// Look for the parent row of the child row image at `reg_data`.
///
/// With `incr == 1` (a child row is being written) a missing parent either
/// halts the statement or bumps the constraint counter. With `incr == -1` (a
/// child row is going away) a missing parent takes one violation back off
/// the counter, and the probe is skipped when the counter is already zero.
/// With `is_ignore` the parent is assumed to hold only NULLs, so the probe
/// always fails.
pub(crate) fn code_lookup_parent(
    ctx: &mut PlanContext,
    parent: &Table,
    key: &ParentKey,
    fk: &ForeignKey,
    cursor: i32,
    reg_data: i32,
    incr: i32,
    is_ignore: bool,
) {
    let deferred = i32::from(fk.deferred);
    let ok = ctx.builder.emit_label();

    if incr < 0 {
        ctx.builder
            .emit_jump_to_label(Opcode::FkIfZero, deferred, 0, ok, P4::None, 0);
    }
    // A NULL anywhere in the child key satisfies the constraint.
    for &col in &key.child_columns {
        ctx.builder
            .emit_jump_to_label(Opcode::IsNull, row_reg(reg_data, col), 0, ok, P4::None, 0);
    }

    if !is_ignore {
        let self_insert = is_self_reference(parent, fk) && incr == 1;
        match &key.index {
            None => {
                let tmp = ctx.builder.alloc_temp();
                ctx.builder
                    .emit3(Opcode::SCopy, row_reg(reg_data, key.child_columns[0]), tmp, 0);
                // A key that is not an integer cannot match any rowid.
                let must_be_int = ctx.builder.emit3(Opcode::MustBeInt, tmp, 0, 0);
                if self_insert {
                    // The row is its own parent.
                    ctx.builder
                        .emit_jump_to_label(Opcode::Eq, reg_data, tmp, ok, P4::None, 0);
                }
                ctx.builder.emit_op(
                    Opcode::OpenRead,
                    cursor,
                    i32::try_from(parent.root_page).unwrap_or(i32::MAX),
                    parent.db,
                    P4::Int(parent.columns.len() as i32),
                    0,
                );
                ctx.builder.emit3(Opcode::NotExists, cursor, 0, tmp);
                ctx.builder
                    .emit_jump_to_label(Opcode::Goto, 0, 0, ok, P4::None, 0);
                let not_exists = ctx.builder.current_addr() - 2;
                ctx.builder.jump_here(not_exists);
                ctx.builder.jump_here(must_be_int);
                ctx.builder.free_temp(tmp);
            }
            Some(idx) => {
                let n_col = key.child_columns.len();
                let regs = ctx.builder.alloc_regs(n_col as i32);
                let rec = ctx.builder.alloc_temp();
                ctx.builder.emit_op(
                    Opcode::OpenRead,
                    cursor,
                    i32::try_from(idx.root_page).unwrap_or(i32::MAX),
                    parent.db,
                    P4::KeyInfo {
                        index: idx.name.clone(),
                        collations: idx.collations(),
                    },
                    0,
                );
                for (i, &col) in key.child_columns.iter().enumerate() {
                    ctx.builder
                        .emit3(Opcode::Copy, row_reg(reg_data, col), regs + i as i32, 0);
                }
                if self_insert {
                    // Skip the probe when the new row's parent key equals
                    // its own child key.
                    let past = ctx.builder.current_addr_i32() + n_col as i32 + 1;
                    for (i, &col) in key.child_columns.iter().enumerate() {
                        let child = row_reg(reg_data, col);
                        let parent_reg = row_reg(reg_data, key.parent_column(parent, i));
                        ctx.builder
                            .emit_op(Opcode::Ne, child, past, parent_reg, P4::None, p5::JUMPIFNULL);
                    }
                    ctx.builder
                        .emit_jump_to_label(Opcode::Goto, 0, 0, ok, P4::None, 0);
                }
                ctx.builder.emit_op(
                    Opcode::MakeRecord,
                    regs,
                    n_col as i32,
                    rec,
                    P4::Affinity(idx.affinity_string(parent)),
                    0,
                );
                ctx.builder
                    .emit_jump_to_label(Opcode::Found, cursor, rec, ok, P4::Int(0), 0);
                ctx.builder.free_temp(rec);
            }
        }
    }

    if halts_immediately(ctx, fk) {
        debug_assert_eq!(incr, 1);
        code_halt_constraint(ctx);
    } else {
        if incr > 0 && !fk.deferred {
            ctx.may_abort = true;
        }
        ctx.builder.emit3(Opcode::FkCounter, deferred, incr, 0);
    }
    ctx.builder.resolve_label(ok);
    ctx.builder.emit3(Opcode::Close, cursor, 0, 0);
}

/// Build the WHERE clause selecting the child rows that refer to the parent
/// row image at `reg_data`, resolved against `child` open on `cursor`.
pub(crate) fn child_match_expr(
    parent: &Table,
    child: &Table,
    key: &ParentKey,
    fk: &ForeignKey,
    cursor: i32,
    reg_data: i32,
    incr: i32,
) -> Result<Expr> {
    let mut terms = Vec::with_capacity(key.child_columns.len() + 1);
    for i in 0..key.child_columns.len() {
        let left = if key.is_rowid() {
            Expr::register(reg_data, TypeAffinity::Integer, None)
        } else {
            // An INTEGER PRIMARY KEY is read from the rowid register but
            // compares with its declared affinity and collation.
            let declared = key.declared_column(i);
            Expr::register(
                row_reg(reg_data, key.parent_column(parent, i)),
                parent.column_affinity(declared),
                Some(parent.column_collation(declared)),
            )
        };
        // By name, so a child INTEGER PRIMARY KEY resolves to the rowid.
        let right = Expr::id(child.column_name(key.child_columns[i]));
        terms.push(left.eq(right));
    }
    if is_self_reference(parent, fk) && incr > 0 {
        // A row deleted from a self-referencing table does not orphan itself.
        terms.push(
            Expr::register(reg_data, TypeAffinity::Integer, None).ne(Expr::column(cursor, -1)),
        );
    }
    let mut expr = conjunction(terms).unwrap_or_else(|| Expr::int(1));
    resolve_names(&NameContext::single(cursor, child), &mut expr)?;
    Ok(expr)
}

/// Count, into the constraint counter, the child rows that refer to the
/// parent row image at `reg_data`. `incr` is +1 when the parent row goes
/// away and -1 when it appears.
pub(crate) fn code_scan_children(
    ctx: &mut PlanContext,
    parent: &Table,
    child: &Arc<Table>,
    key: &ParentKey,
    fk: &ForeignKey,
    cursor: i32,
    reg_data: i32,
    incr: i32,
) -> Result<()> {
    let deferred = i32::from(fk.deferred);
    let if_zero = (incr < 0).then(|| ctx.builder.emit3(Opcode::FkIfZero, deferred, 0, 0));

    let filter = child_match_expr(parent, child, key, fk, cursor, reg_data, incr)?;
    trace!(target: "sqlplan.fkey", child = %child.name, %filter, "child scan");
    let mut src = SrcList::new().with(SrcItem::new(Arc::clone(child), cursor));
    src.mark_columns_used(&filter);

    let info = where_begin(ctx, &src, Some(&filter), None, WhereFlags::empty())?;
    if incr > 0 && !fk.deferred {
        ctx.may_abort = true;
    }
    ctx.builder.emit3(Opcode::FkCounter, deferred, incr, 0);
    where_end(ctx, info)?;

    if let Some(addr) = if_zero {
        ctx.builder.jump_here(addr);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use sqlplan_types::{FkAction, FkColumn, Index};

    use super::*;
    use crate::parent_key::locate_parent_key_index;

    fn fk_on(child: &str, parent: &str, child_column: usize, parent_column: &str) -> ForeignKey {
        ForeignKey {
            child_table: child.to_owned(),
            parent_table: parent.to_owned(),
            columns: vec![FkColumn {
                child_column,
                parent_column: Some(parent_column.to_owned()),
            }],
            deferred: false,
            on_delete: FkAction::None,
            on_update: FkAction::None,
        }
    }

    fn opcodes(ctx: &PlanContext) -> Vec<Opcode> {
        ctx.builder.ops().iter().map(|o| o.opcode).collect()
    }

    #[test]
    fn test_rowid_lookup_halts_single_row_insert() {
        let parent = Table::new("parent").column("id", "INTEGER").with_ipk(0).with_root(2);
        let fk = fk_on("child", "parent", 0, "id");
        let key = locate_parent_key_index(&parent, &fk).unwrap();

        let mut ctx = PlanContext::default();
        code_lookup_parent(&mut ctx, &parent, &key, &fk, 0, 10, 1, false);
        assert_eq!(
            opcodes(&ctx),
            vec![
                Opcode::IsNull,
                Opcode::SCopy,
                Opcode::MustBeInt,
                Opcode::OpenRead,
                Opcode::NotExists,
                Opcode::Goto,
                Opcode::Halt,
                Opcode::Close,
            ]
        );
        let ops = ctx.builder.ops();
        // A missing parent and a non-integer key both land on the Halt.
        assert_eq!(ops[2].p2, 6);
        assert_eq!(ops[4].p2, 6);
        assert_eq!(ops[0].p2, 7);
        assert_eq!(ops[5].p2, 7);
        assert_eq!(ops[0].p1, 11);
        assert!(!ctx.may_abort);
    }

    #[test]
    fn test_multi_row_statement_counts_instead_of_halting() {
        let parent = Table::new("parent").column("id", "INTEGER").with_ipk(0).with_root(2);
        let fk = fk_on("child", "parent", 0, "id");
        let key = locate_parent_key_index(&parent, &fk).unwrap();

        let mut ctx = PlanContext::default();
        ctx.is_multi_write = true;
        code_lookup_parent(&mut ctx, &parent, &key, &fk, 0, 10, 1, false);
        assert_eq!(ctx.builder.ops().iter().filter(|o| o.opcode == Opcode::Halt).count(), 0);
        let counter = ctx.builder.ops().iter().find(|o| o.opcode == Opcode::FkCounter).unwrap();
        assert_eq!((counter.p1, counter.p2), (0, 1));
        assert!(ctx.may_abort);
    }

    #[test]
    fn test_delete_side_lookup_checks_counter_first() {
        let parent = Table::new("parent").column("k", "TEXT").with_root(2);
        let idx = Index::on("parent_k", &parent, &["k"]).unique().with_root(3);
        let parent = parent.with_index(idx);
        let mut fk = fk_on("child", "parent", 1, "k");
        fk.deferred = true;
        let key = locate_parent_key_index(&parent, &fk).unwrap();

        let mut ctx = PlanContext::default();
        code_lookup_parent(&mut ctx, &parent, &key, &fk, 4, 20, -1, false);
        assert_eq!(
            opcodes(&ctx),
            vec![
                Opcode::FkIfZero,
                Opcode::IsNull,
                Opcode::OpenRead,
                Opcode::Copy,
                Opcode::MakeRecord,
                Opcode::Found,
                Opcode::FkCounter,
                Opcode::Close,
            ]
        );
        let ops = ctx.builder.ops();
        assert_eq!(ops[0].p1, 1);
        assert_eq!(ops[2].p2, 3);
        assert_eq!(ops[3].p1, 22);
        assert_eq!((ops[6].p1, ops[6].p2), (1, -1));
        assert_eq!(ops[5].p2, 7);
    }

    #[test]
    fn test_self_reference_insert_skips_probe_for_own_key() {
        let t = Table::new("node").column("k", "TEXT").column("up", "TEXT").with_root(2);
        let idx = Index::on("node_k", &t, &["k"]).unique().with_root(3);
        let t = t.with_index(idx);
        let fk = fk_on("node", "node", 1, "k");
        let key = locate_parent_key_index(&t, &fk).unwrap();

        let mut ctx = PlanContext::default();
        ctx.is_multi_write = true;
        code_lookup_parent(&mut ctx, &t, &key, &fk, 0, 30, 1, false);
        let ops = ctx.builder.ops();
        let ne = ops.iter().position(|o| o.opcode == Opcode::Ne).unwrap();
        assert_eq!((ops[ne].p1, ops[ne].p3), (32, 31));
        assert_eq!(ops[ne].p5, p5::JUMPIFNULL);
        assert_eq!(ops[ne + 1].opcode, Opcode::Goto);
        assert_eq!(ops[ne].p2 as usize, ne + 2);
        assert_eq!(ops[ne + 2].opcode, Opcode::MakeRecord);
    }

    #[test]
    fn test_ignored_lookup_never_probes() {
        let parent = Table::new("parent").column("id", "INTEGER").with_ipk(0).with_root(2);
        let fk = fk_on("child", "parent", 0, "id");
        let key = locate_parent_key_index(&parent, &fk).unwrap();
        let mut ctx = PlanContext::default();
        ctx.nested = 1;
        code_lookup_parent(&mut ctx, &parent, &key, &fk, 0, 10, 1, true);
        assert_eq!(
            opcodes(&ctx),
            vec![Opcode::IsNull, Opcode::FkCounter, Opcode::Close]
        );
    }

    #[test]
    fn test_child_match_expr_uses_parent_collation() {
        let parent = Table::new("parent")
            .with_column(
                sqlplan_types::Column::new("k", TypeAffinity::Text).with_collation(sqlplan_types::NOCASE),
            )
            .with_root(2);
        let idx = Index::on("parent_k", &parent, &["k"]).unique().with_root(3);
        let parent = parent.with_index(idx);
        let child = Table::new("child").column("id", "INTEGER").column("pk", "TEXT").with_root(4);
        let fk = fk_on("child", "parent", 1, "k");
        let key = locate_parent_key_index(&parent, &fk).unwrap();

        let e = child_match_expr(&parent, &child, &key, &fk, 5, 40, 1).unwrap();
        let (_, left, right) = e.as_binary().unwrap();
        assert_eq!(left.collation.as_deref(), Some(sqlplan_types::NOCASE));
        assert_eq!(right.as_column(), Some((5, 1)));
        assert_eq!(e.to_string(), "(r[41] = {5}.c1)");
    }

    #[test]
    fn test_child_match_expr_keeps_ipk_column_collation() {
        // parent(id INTEGER PRIMARY KEY COLLATE NOCASE, tag, UNIQUE(id, tag))
        let parent = Table::new("parent")
            .with_column(
                sqlplan_types::Column::new("id", TypeAffinity::Integer)
                    .with_collation(sqlplan_types::NOCASE),
            )
            .column("tag", "TEXT")
            .with_ipk(0)
            .with_root(2);
        let idx = Index::on("parent_id_tag", &parent, &["id", "tag"]).unique().with_root(3);
        let parent = parent.with_index(idx);
        let child = Table::new("child").column("pid", "INTEGER").column("ptag", "TEXT").with_root(4);
        let mut fk = fk_on("child", "parent", 0, "id");
        fk.columns.push(FkColumn {
            child_column: 1,
            parent_column: Some("tag".to_owned()),
        });
        let key = locate_parent_key_index(&parent, &fk).unwrap();
        assert!(!key.is_rowid());

        let e = child_match_expr(&parent, &child, &key, &fk, 5, 40, 1).unwrap();
        let (_, first, _) = e.as_binary().unwrap();
        let (_, reg, _) = first.as_binary().unwrap();
        // The value comes from the rowid register, the comparison rules from
        // the declared column.
        assert!(matches!(reg.kind, sqlplan_ast::ExprKind::Register(40)));
        assert_eq!(reg.collation.as_deref(), Some(sqlplan_types::NOCASE));
        assert_eq!(reg.column_affinity, Some(TypeAffinity::Integer));
    }

    #[test]
    fn test_scan_children_counts_matches() {
        let parent = Table::new("parent").column("id", "INTEGER").with_ipk(0).with_root(2);
        let child = Arc::new(Table::new("child").column("pid", "INTEGER").with_root(4));
        let fk = fk_on("child", "parent", 0, "id");
        let key = locate_parent_key_index(&parent, &fk).unwrap();

        let mut ctx = PlanContext::default();
        let cursor = ctx.alloc_cursor();
        code_scan_children(&mut ctx, &parent, &child, &key, &fk, cursor, 10, 1).unwrap();
        let ops = ctx.builder.ops();
        assert_eq!(ops[0].opcode, Opcode::OpenRead);
        let counter = ops.iter().find(|o| o.opcode == Opcode::FkCounter).unwrap();
        assert_eq!((counter.p1, counter.p2), (0, 1));
        assert!(ctx.may_abort);
        assert!(ops.iter().any(|o| o.opcode == Opcode::Next));
        assert!(ctx.locks().iter().any(|l| l.root_page == 4 && !l.write));
    }

    #[test]
    fn test_scan_children_on_insert_skips_when_counter_zero() {
        let parent = Table::new("parent").column("id", "INTEGER").with_ipk(0).with_root(2);
        let child = Arc::new(Table::new("child").column("pid", "INTEGER").with_root(4));
        let fk = fk_on("child", "parent", 0, "id");
        let key = locate_parent_key_index(&parent, &fk).unwrap();

        let mut ctx = PlanContext::default();
        code_scan_children(&mut ctx, &parent, &child, &key, &fk, 0, 10, -1).unwrap();
        let ops = ctx.builder.ops();
        assert_eq!(ops[0].opcode, Opcode::FkIfZero);
        assert_eq!(ops[0].p2 as usize, ops.len());
        assert!(!ctx.may_abort);
    }
}
