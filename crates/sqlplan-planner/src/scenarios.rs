//! End-to-end planning scenarios and property tests over the whole planner:
//! analysis, costing, join ordering and loop generation together.

use std::cmp::Ordering;
use std::sync::Arc;

use proptest::prelude::*;
use sqlplan_ast::{BinaryOp, Expr, ExprFlags, ExprKind, InSet, binary_compare_collation, resolve_names};
use sqlplan_types::{BINARY, Index, NOCASE, Opcode, RTRIM, SqliteValue, Table, TypeAffinity};

use crate::context::PlanContext;
use crate::cost::{CostQuery, best_index};
use crate::join::{WhereInfo, where_begin, where_end};
use crate::mask::Bitmask;
use crate::plan::{WhereCost, WhereFlags, WsFlags};
use crate::source::{JoinType, SrcItem, SrcList};
use crate::term::{OperatorMask, TermFlags};
use crate::test_support::{Fixture, people_table, plain_table};

fn table(name: &str, columns: &[&str], root: u32, rows: u64) -> Table {
    columns
        .iter()
        .fold(Table::new(name), |t, c| t.column(c, "INTEGER"))
        .with_root(root)
        .with_row_estimate(rows)
}

fn indexed(t: Table, name: &str, columns: &[&str]) -> Table {
    let idx = Index::on(name, &t, columns);
    t.with_index(idx)
}

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

fn plan(ctx: &mut PlanContext, src: &SrcList, filter: Option<&Expr>) -> WhereInfo {
    ctx.n_tab = ctx.n_tab.max(src.len() as i32);
    where_begin(ctx, src, filter, None, WhereFlags::empty()).unwrap()
}

/// Best plan for the single table of `fx`.
fn estimate(fx: &mut Fixture) -> WhereCost {
    let mask = fx.masks.get_mask(fx.src.items[0].cursor);
    best_index(
        &mut fx.ctx,
        &CostQuery {
            wc: &fx.wc,
            masks: &fx.masks,
            src: &fx.src.items[0],
            not_ready: mask,
            not_valid: mask,
            order_by: None,
            level: 0,
        },
    )
    .unwrap()
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[test]
fn test_equality_on_indexed_column() {
    let t1 = indexed(table("t1", &["a", "b"], 2, 1000), "t1_a", &["a"]);
    let mut src = src_of(vec![t1]);
    let filter = resolved(&mut src, Expr::id("a").eq(Expr::int(5)));
    let mut ctx = PlanContext::default();
    let info = plan(&mut ctx, &src, Some(&filter));

    let level = &info.levels[0];
    assert_eq!(level.index_name(), Some("t1_a"));
    assert_eq!(level.plan.n_eq, 1);
    assert!(level.plan.has(WsFlags::COLUMN_EQ));
    // Only `a` is read, and the index has it.
    assert!(level.plan.has(WsFlags::IDX_ONLY));
    where_end(&mut ctx, info).unwrap();
    ctx.finish().unwrap();
}

#[test]
fn test_or_of_equalities_without_index() {
    let t1 = table("t1", &["a", "b"], 2, 1000);
    let filter = Expr::id("a")
        .eq(Expr::int(5))
        .or(Expr::id("a").eq(Expr::int(7)))
        .or(Expr::id("a").eq(Expr::int(9)));
    let mut fx = Fixture::new(vec![t1], Some(filter));

    // The OR stays as an inert parent of a synthesized IN.
    assert_eq!(fx.wc.len(), 2);
    let or = &fx.wc.terms()[0];
    assert_eq!(or.operator, OperatorMask::NOOP);
    assert_eq!(or.child_count, 1);
    let in_term = &fx.wc.terms()[1];
    assert_eq!(in_term.operator, OperatorMask::IN);
    assert!(in_term.has(TermFlags::VIRTUAL));
    let ExprKind::In {
        set: InSet::List(values),
        ..
    } = &in_term.expr.kind
    else {
        panic!("expected an IN list");
    };
    assert_eq!(values, &vec![Expr::int(5), Expr::int(7), Expr::int(9)]);

    let once = estimate(&mut fx);
    assert!(!once.plan.has(WsFlags::NOT_FULLSCAN));
    assert!(!once.plan.has(WsFlags::TEMP_INDEX));

    // Inside an outer loop the automatic index is weighed, but only a
    // plain equality can key it.
    fx.ctx.query_loop = 1000.0;
    let repeated = estimate(&mut fx);
    assert!(!repeated.plan.has(WsFlags::NOT_FULLSCAN));

    let mut eq = Fixture::new(vec![table("t1", &["a", "b"], 2, 1000)], Some(Expr::id("a").eq(Expr::int(5))));
    eq.ctx.query_loop = 1000.0;
    assert!(estimate(&mut eq).plan.has(WsFlags::TEMP_INDEX));
}

#[test]
fn test_smaller_table_placed_outer() {
    let mut src = src_of(vec![table("t1", &["a"], 2, 500), table("t2", &["b"], 3, 100)]);
    let filter = resolved(&mut src, Expr::qualified("t1", "a").eq(Expr::qualified("t2", "b")));
    let mut ctx = PlanContext::default();
    let info = plan(&mut ctx, &src, Some(&filter));
    assert_eq!(info.levels[0].from, 1);
    assert!(!info.levels[0].plan.has(WsFlags::TEMP_INDEX));
    where_end(&mut ctx, info).unwrap();

    // Equal sizes: FROM order decides.
    let mut src = src_of(vec![table("t1", &["a"], 2, 100), table("t2", &["b"], 3, 100)]);
    let filter = resolved(&mut src, Expr::qualified("t1", "a").eq(Expr::qualified("t2", "b")));
    let mut ctx = PlanContext::default();
    let info = plan(&mut ctx, &src, Some(&filter));
    assert_eq!(info.levels[0].from, 0);
}

#[test]
fn test_no_automatic_index_when_loop_runs_once() {
    let filter = Expr::qualified("t1", "a").eq(Expr::qualified("t2", "b"));
    let mut fx = Fixture::new(
        vec![table("t1", &["a"], 2, 500), table("t2", &["b"], 3, 100)],
        Some(filter),
    );
    assert_eq!(fx.ctx.query_loop, 1.0);
    let all: Bitmask = 0b11;
    for i in 0..2 {
        let cost = best_index(
            &mut fx.ctx,
            &CostQuery {
                wc: &fx.wc,
                masks: &fx.masks,
                src: &fx.src.items[i],
                not_ready: all,
                not_valid: all,
                order_by: None,
                level: 0,
            },
        )
        .unwrap();
        assert!(!cost.plan.has(WsFlags::TEMP_INDEX));
    }
}

#[test]
fn test_left_join_terms_cannot_drive_outer_table() {
    let t1 = indexed(table("t1", &["a"], 2, 1000), "t1_a", &["a"]);
    let t2 = indexed(table("t2", &["b", "c"], 3, 1000), "t2_b", &["b"]);
    let mut src = src_of(vec![t1, t2]);
    src.items[1].join_type = JoinType::LEFT;
    let on = Expr::qualified("t1", "a")
        .eq(Expr::qualified("t2", "b"))
        .from_join(1);
    let filter = resolved(&mut src, on.and(Expr::qualified("t2", "c").eq(Expr::int(5))));
    let mut ctx = PlanContext::default();
    let info = plan(&mut ctx, &src, Some(&filter));

    // Every term keyed on t1 needs t1 itself on its right, so none of them
    // can seek t1.
    let t1_mask = info.masks.get_mask(0);
    for t in info.wc.terms().iter().filter(|t| t.left_cursor == 0) {
        assert_ne!(t.prereq_right & t1_mask, 0, "{}", t.expr);
    }
    let outer = &info.levels[0];
    assert_eq!(outer.from, 0);
    assert_eq!(outer.plan.n_eq, 0);
    assert_eq!(outer.used, 0);

    let inner = &info.levels[1];
    assert_eq!(inner.index_name(), Some("t2_b"));
    assert_eq!(inner.plan.n_eq, 1);
    let match_flag = inner.left_join;
    assert_ne!(match_flag, 0);

    where_end(&mut ctx, info).unwrap();
    let prog = ctx.finish().unwrap();
    let ops = prog.ops();
    // The WHERE filter on t2.c runs after the row is marked as matched.
    let set_matched = ops
        .iter()
        .position(|op| op.opcode == Opcode::Integer && op.p1 == 1 && op.p2 == match_flag)
        .unwrap();
    let filter_c = ops
        .iter()
        .rposition(|op| op.opcode == Opcode::Ne)
        .unwrap();
    assert!(filter_c > set_matched);
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

fn literal(e: &Expr, x: Option<i64>) -> Option<i64> {
    match &e.kind {
        ExprKind::Column { .. } => x,
        ExprKind::Literal(SqliteValue::Integer(v)) => Some(*v),
        ExprKind::Literal(SqliteValue::Null) => None,
        other => panic!("unexpected operand {other:?}"),
    }
}

/// Three-valued evaluation of an OR of equalities or an IN list, with the
/// column bound to `x`.
fn truth(e: &Expr, x: Option<i64>) -> Option<bool> {
    match &e.kind {
        ExprKind::Binary {
            op: BinaryOp::Or,
            left,
            right,
        } => match (truth(left, x), truth(right, x)) {
            (Some(true), _) | (_, Some(true)) => Some(true),
            (Some(false), Some(false)) => Some(false),
            _ => None,
        },
        ExprKind::Binary {
            op: BinaryOp::Eq,
            left,
            right,
        } => Some(literal(left, x)? == literal(right, x)?),
        ExprKind::In {
            expr,
            set: InSet::List(list),
            not: false,
        } => {
            let v = literal(expr, x)?;
            let mut unknown = false;
            for item in list {
                match literal(item, x) {
                    Some(w) if w == v => return Some(true),
                    None => unknown = true,
                    Some(_) => {}
                }
            }
            if unknown { None } else { Some(false) }
        }
        other => panic!("unexpected expression {other:?}"),
    }
}

fn join_case() -> impl Strategy<Value = (Vec<u64>, Vec<bool>, Vec<(usize, usize, u8)>)> {
    (2_usize..=8).prop_flat_map(|n| {
        (
            proptest::collection::vec(1_u64..100_000, n),
            proptest::collection::vec(any::<bool>(), n),
            proptest::collection::vec((0..n, 0..n, 0_u8..3), 0..12),
        )
    })
}

fn column_term(column: usize, op: u8, v: i64) -> Expr {
    let name = ["id", "name", "age", "city"][column];
    let value = if column % 2 == 1 {
        Expr::text(&v.to_string())
    } else {
        Expr::int(v)
    };
    let col = Expr::id(name);
    match op {
        0 => col.eq(value),
        1 => col.lt(value),
        2 => col.le(value),
        3 => col.gt(value),
        _ => col.ge(value),
    }
}

const COMPARISONS: [BinaryOp; 5] = [BinaryOp::Eq, BinaryOp::Lt, BinaryOp::Le, BinaryOp::Gt, BinaryOp::Ge];

fn holds(op: BinaryOp, ord: Ordering) -> bool {
    match op {
        BinaryOp::Eq => ord == Ordering::Equal,
        BinaryOp::Lt => ord == Ordering::Less,
        BinaryOp::Le => ord != Ordering::Greater,
        BinaryOp::Gt => ord == Ordering::Greater,
        BinaryOp::Ge => ord != Ordering::Less,
        other => panic!("unexpected operator {other:?}"),
    }
}

/// A row of `t1` and `t2`: `row[cursor][column]`.
type JoinRow = [[Option<i64>; 2]; 2];

fn bound(e: &Expr, row: &JoinRow) -> Option<i64> {
    match e.as_column() {
        Some((cursor, column)) => row[cursor as usize][column as usize],
        None => literal(e, None),
    }
}

/// Three-valued evaluation of an AND tree of integer comparisons.
fn eval_and(e: &Expr, row: &JoinRow) -> Option<bool> {
    let (op, left, right) = e.as_binary().expect("comparison or AND");
    if op == BinaryOp::And {
        return match (eval_and(left, row), eval_and(right, row)) {
            (Some(false), _) | (_, Some(false)) => Some(false),
            (Some(true), Some(true)) => Some(true),
            _ => None,
        };
    }
    Some(holds(op, bound(left, row)?.cmp(&bound(right, row)?)))
}

/// `t1.c op v`, `v op t2.c` or `t1.c op t2.c`, with `v` possibly NULL.
fn comparison() -> impl Strategy<Value = Expr> {
    (0_u8..3, 0_i32..2, 0_i32..2, 0_usize..5, proptest::option::of(-3_i64..3)).prop_map(
        |(shape, c1, c2, op, v)| {
            let op = COMPARISONS[op];
            let value = v.map_or_else(Expr::null, Expr::int);
            match shape {
                0 => Expr::binary(op, Expr::column(0, c1), value),
                1 => Expr::binary(op, value, Expr::column(1, c2)),
                _ => Expr::binary(op, Expr::column(0, c1), Expr::column(1, c2)),
            }
        },
    )
}

fn and_tree() -> impl Strategy<Value = Expr> {
    comparison().prop_recursive(3, 12, 2, |inner| {
        (inner.clone(), inner).prop_map(|(l, r)| l.and(r))
    })
}

const WORDS: [Option<&str>; 5] = [Some("a"), Some("A"), Some("a  "), Some("b"), None];
const COLLATIONS: [Option<&str>; 3] = [None, Some(NOCASE), Some(RTRIM)];

/// Text column 0 of `cursor`, with an inherited or explicit collation.
fn text_column(cursor: i32, collation: usize, explicit: bool) -> Expr {
    match (COLLATIONS[collation], explicit) {
        (Some(c), true) => Expr::typed_column(cursor, 0, TypeAffinity::Text, None).collate(c),
        (c, _) => Expr::typed_column(cursor, 0, TypeAffinity::Text, c),
    }
}

/// Evaluate a comparison of two text columns bound to `values[cursor]`
/// under the collating sequence the comparison resolves to.
fn eval_text(e: &Expr, values: [Option<&str>; 2]) -> Option<bool> {
    let (op, left, right) = e.as_binary().expect("comparison");
    let value = |x: &Expr| {
        let (cursor, _) = x.as_column().expect("column operand");
        values[cursor as usize].map(SqliteValue::from)
    };
    let coll = binary_compare_collation(left, right).unwrap_or(BINARY);
    Some(holds(op, value(left)?.collate_cmp(&value(right)?, coll)))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn test_join_order_respects_dependencies((rows, has_index, preds) in join_case()) {
        let n = rows.len();
        let tables = (0..n)
            .map(|i| {
                let t = plain_table(&format!("t{i}"), i as u32 + 2).with_row_estimate(rows[i]);
                if has_index[i] { indexed(t, &format!("t{i}_b"), &["b"]) } else { t }
            })
            .collect();
        let mut src = src_of(tables);
        let filter = preds
            .iter()
            .filter(|(i, j, _)| i != j)
            .map(|&(i, j, kind)| {
                let (ti, tj) = (format!("t{i}"), format!("t{j}"));
                match kind {
                    0 => Expr::qualified(&ti, "a").eq(Expr::qualified(&tj, "b")),
                    1 => Expr::qualified(&ti, "rowid").eq(Expr::qualified(&tj, "a")),
                    _ => Expr::qualified(&ti, "b").lt(Expr::qualified(&tj, "a")),
                }
            })
            .reduce(Expr::and)
            .map(|e| resolved(&mut src, e));

        let mut ctx = PlanContext::default();
        let info = plan(&mut ctx, &src, filter.as_ref());
        let mut order: Vec<usize> = info.levels.iter().map(|l| l.from).collect();
        order.sort_unstable();
        prop_assert_eq!(order, (0..n).collect::<Vec<_>>());

        for k in 0..n {
            let later = info.levels[k + 1..]
                .iter()
                .fold(0, |m, l| m | info.masks.get_mask(src.items[l.from].cursor));
            prop_assert_eq!(info.levels[k].used & later, 0, "level {}", k);
        }
        where_end(&mut ctx, info).unwrap();
        prop_assert!(ctx.finish().is_ok());
    }

    #[test]
    fn test_estimates_are_deterministic(
        terms in proptest::collection::vec((0_usize..4, 0_u8..5, -50_i64..50), 1..5)
    ) {
        let filter = terms
            .iter()
            .map(|&(c, op, v)| column_term(c, op, v))
            .reduce(Expr::and);
        let mut first = Fixture::new(vec![people_table()], filter.clone());
        let mut second = Fixture::new(vec![people_table()], filter);
        let a = estimate(&mut first);
        let b = estimate(&mut second);
        let b_again = estimate(&mut second);
        for other in [&b, &b_again] {
            prop_assert_eq!(a.rcost.to_bits(), other.rcost.to_bits());
            prop_assert_eq!(a.plan.n_row.to_bits(), other.plan.n_row.to_bits());
            prop_assert_eq!(a.plan.ws_flags, other.plan.ws_flags);
            prop_assert_eq!(a.plan.n_eq, other.plan.n_eq);
            prop_assert_eq!(a.plan.access.index_name(), other.plan.access.index_name());
            prop_assert_eq!(a.used, other.used);
        }
    }

    #[test]
    fn test_or_to_in_preserves_rows(
        values in proptest::collection::vec(-5_i64..5, 2..6),
        x in proptest::option::of(-6_i64..6),
    ) {
        let filter = values
            .iter()
            .map(|&v| Expr::id("a").eq(Expr::int(v)))
            .reduce(Expr::or);
        let fx = Fixture::new(vec![plain_table("t1", 2)], filter);
        let or = &fx.wc.terms()[0].expr;
        let in_term = fx
            .wc
            .terms()
            .iter()
            .find(|t| t.operator == OperatorMask::IN)
            .expect("OR of equalities on one column becomes IN");
        let satisfied = |e: &Expr| truth(e, x) == Some(true);
        prop_assert_eq!(satisfied(or), satisfied(&in_term.expr));
        if x.is_none() {
            prop_assert!(!satisfied(&in_term.expr));
        }
    }

    #[test]
    fn test_extra_equality_never_raises_row_estimate(
        rows in 10_u64..1_000_000,
        a in -100_i64..100,
        b in -100_i64..100,
    ) {
        let t = || indexed(table("t", &["a", "b", "c"], 2, rows), "t_ab", &["a", "b"]);
        let mut one = Fixture::new(vec![t()], Some(Expr::id("a").eq(Expr::int(a))));
        let mut two = Fixture::new(
            vec![t()],
            Some(Expr::id("a").eq(Expr::int(a)).and(Expr::id("b").eq(Expr::int(b)))),
        );
        let r1 = estimate(&mut one);
        let r2 = estimate(&mut two);
        prop_assert!(r2.plan.n_row <= r1.plan.n_row, "{} > {}", r2.plan.n_row, r1.plan.n_row);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn test_split_terms_rebuild_the_where_clause(
        filter in and_tree(),
        rows in proptest::collection::vec(
            prop::array::uniform2(prop::array::uniform2(proptest::option::of(-3_i64..3))),
            1..16,
        ),
    ) {
        let fx = Fixture::join(Some(filter.clone()));
        let rebuilt = fx
            .wc
            .terms()
            .iter()
            .filter(|t| t.parent.is_none() && !t.has(TermFlags::VIRTUAL))
            .map(|t| t.expr.clone())
            .reduce(Expr::and)
            .expect("an AND tree has at least one term");
        for row in &rows {
            prop_assert_eq!(eval_and(&filter, row), eval_and(&rebuilt, row), "row {:?}", row);
        }
    }

    #[test]
    fn test_commuted_term_agrees_on_every_row(
        op in 0_usize..5,
        (left_coll, left_explicit) in (0_usize..3, any::<bool>()),
        (right_coll, right_explicit) in (0_usize..3, any::<bool>()),
    ) {
        let expr = Expr::binary(
            COMPARISONS[op],
            text_column(0, left_coll, left_explicit),
            text_column(1, right_coll, right_explicit),
        );
        let fx = Fixture::join(Some(expr));
        let orig = &fx.wc.terms()[0];
        let copy = fx
            .wc
            .terms()
            .iter()
            .find(|t| t.parent.is_some())
            .expect("column to column comparison gains a commuted copy");
        prop_assert!(copy.has(TermFlags::VIRTUAL));

        let (_, ol, or) = orig.expr.as_binary().unwrap();
        let (_, cl, cr) = copy.expr.as_binary().unwrap();
        prop_assert_eq!(cl.as_column(), or.as_column());
        prop_assert_eq!(cr.as_column(), ol.as_column());
        // Collations stay on their side of the operator.
        prop_assert_eq!(cl.collation_seq(), ol.collation_seq());
        prop_assert_eq!(cr.collation_seq(), or.collation_seq());
        prop_assert_eq!(
            cl.has_flag(ExprFlags::EXPLICIT_COLLATE),
            ol.has_flag(ExprFlags::EXPLICIT_COLLATE)
        );
        prop_assert_eq!(binary_compare_collation(cl, cr), binary_compare_collation(ol, or));

        for a in WORDS {
            for b in WORDS {
                prop_assert_eq!(
                    eval_text(&orig.expr, [a, b]),
                    eval_text(&copy.expr, [a, b]),
                    "{:?} vs {:?}", a, b
                );
            }
        }
    }
}
