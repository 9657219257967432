//! Shared fixtures for the planner's unit tests.

use std::sync::Arc;

use sqlplan_ast::{BinaryOp, Expr, resolve_names};
use sqlplan_observability::PlanTraceBuffer;
use sqlplan_types::{Index, Table};

use crate::analyze::Analyzer;
use crate::clause::WhereClause;
use crate::context::PlanContext;
use crate::mask::CursorMaskSet;
use crate::source::{SrcItem, SrcList};

/// `people(id INTEGER PRIMARY KEY, name TEXT, age INTEGER, city TEXT)` with
/// 1000 rows and single-column indexes on `name` and `age`.
pub fn people_table() -> Table {
    let base = Table::new("people")
        .column("id", "INTEGER")
        .column("name", "TEXT")
        .column("age", "INTEGER")
        .column("city", "TEXT")
        .with_ipk(0)
        .with_root(2)
        .with_row_estimate(1000);
    base.clone()
        .with_index(Index::on("people_name", &base, &["name"]).with_root(3))
        .with_index(Index::on("people_age", &base, &["age"]).with_root(4))
}

/// `name(a INTEGER, b INTEGER)` with 1000 rows and no indexes.
pub fn plain_table(name: &str, root: u32) -> Table {
    Table::new(name)
        .column("a", "INTEGER")
        .column("b", "INTEGER")
        .with_root(root)
        .with_row_estimate(1000)
}

/// A FROM list, its cursor masks and an analyzed WHERE clause.
pub struct Fixture {
    pub ctx: PlanContext,
    pub src: SrcList,
    pub masks: CursorMaskSet,
    pub wc: WhereClause,
}

impl Fixture {
    /// Tables get cursors 0, 1, ... in order.
    pub fn new(tables: Vec<Table>, filter: Option<Expr>) -> Self {
        let mut src = SrcList::new();
        for (i, t) in tables.into_iter().enumerate() {
            src.push(SrcItem::new(Arc::new(t), i as i32));
        }
        let mut masks = CursorMaskSet::new();
        for item in &src.items {
            masks.create_mask(item.cursor).unwrap();
        }
        let ctx = PlanContext::default();
        let mut wc = WhereClause::new(BinaryOp::And);
        if let Some(mut e) = filter {
            resolve_names(&src.name_context(), &mut e).unwrap();
            src.mark_columns_used(&e);
            wc.split(&e);
            Analyzer::new(&masks, &ctx.config).analyze_all(&mut wc);
        }
        Self { ctx, src, masks, wc }
    }

    /// `t1` and `t2`, both plain.
    pub fn join(filter: Option<Expr>) -> Self {
        Self::new(vec![plain_table("t1", 2), plain_table("t2", 3)], filter)
    }

    /// A resolved column reference.
    pub fn resolve(&self, name: &str) -> Expr {
        let mut e = match name.split_once('.') {
            Some((t, c)) => Expr::qualified(t, c),
            None => Expr::id(name),
        };
        resolve_names(&self.src.name_context(), &mut e).unwrap();
        e
    }

    /// Turn on event delivery into a fresh buffer.
    pub fn trace_events(&mut self) -> Arc<PlanTraceBuffer> {
        let buf = Arc::new(PlanTraceBuffer::new(256));
        self.ctx.observer = buf.clone();
        self.ctx.config.trace = true;
        buf
    }
}
