//! Name resolution: bind `Id`/`QualifiedId` references to cursor columns.

use sqlplan_error::{PlanError, Result};
use sqlplan_types::Table;

use crate::{Expr, ExprFlags, ExprKind};

/// One FROM-list entry visible to name resolution.
#[derive(Debug, Clone, Copy)]
pub struct NameSource<'a> {
    pub cursor: i32,
    pub table: &'a Table,
    pub alias: Option<&'a str>,
}

impl NameSource<'_> {
    fn matches_qualifier(&self, qualifier: &str) -> bool {
        match self.alias {
            Some(alias) => alias.eq_ignore_ascii_case(qualifier),
            None => self.table.name.eq_ignore_ascii_case(qualifier),
        }
    }
}

/// The tables a name may refer to.
#[derive(Debug, Clone, Default)]
pub struct NameContext<'a> {
    sources: Vec<NameSource<'a>>,
}

impl<'a> NameContext<'a> {
    #[must_use]
    pub const fn new(sources: Vec<NameSource<'a>>) -> Self {
        Self { sources }
    }

    /// A context with a single table.
    #[must_use]
    pub fn single(cursor: i32, table: &'a Table) -> Self {
        Self::new(vec![NameSource {
            cursor,
            table,
            alias: None,
        }])
    }

    pub fn sources(&self) -> &[NameSource<'a>] {
        &self.sources
    }
}

fn is_rowid_name(name: &str) -> bool {
    ["rowid", "oid", "_rowid_"]
        .iter()
        .any(|r| r.eq_ignore_ascii_case(name))
}

/// Bind every unresolved name in `expr` to a concrete column reference.
///
/// Column references take the affinity of the table column and, unless a
/// COLLATE was written explicitly, its declared collation. The INTEGER
/// PRIMARY KEY column resolves to the rowid (`column == -1`). Sub-selects are
/// left to the SELECT compiler.
pub fn resolve_names(ctx: &NameContext<'_>, expr: &mut Expr) -> Result<()> {
    let target = match &expr.kind {
        ExprKind::Id(name) => Some(lookup(ctx, None, name)?),
        ExprKind::QualifiedId { table, column } => Some(lookup(ctx, Some(table), column)?),
        _ => None,
    };

    if let Some((source, column)) = target {
        bind(expr, source, column);
        return Ok(());
    }

    let mut result = Ok(());
    expr.for_each_child_mut(&mut |child| {
        if result.is_ok() {
            result = resolve_names(ctx, child);
        }
    });
    result
}

fn lookup<'c, 'a>(
    ctx: &'c NameContext<'a>,
    qualifier: Option<&str>,
    name: &str,
) -> Result<(&'c NameSource<'a>, i32)> {
    let candidates = ctx
        .sources
        .iter()
        .filter(|s| qualifier.is_none_or(|q| s.matches_qualifier(q)));

    let mut found: Option<(&NameSource<'a>, i32)> = None;
    let mut tables_in_scope = 0usize;
    let mut last_source = None;
    for source in candidates {
        tables_in_scope += 1;
        last_source = Some(source);
        if let Some(idx) = source.table.column_index(name) {
            if found.is_some() {
                return Err(PlanError::AmbiguousColumn {
                    name: display_name(qualifier, name),
                });
            }
            found = Some((source, idx as i32));
        }
    }

    if let Some(hit) = found {
        return Ok(hit);
    }
    if tables_in_scope == 1 && is_rowid_name(name) {
        if let Some(source) = last_source {
            return Ok((source, -1));
        }
    }
    Err(PlanError::NoSuchColumn {
        name: display_name(qualifier, name),
    })
}

fn display_name(qualifier: Option<&str>, name: &str) -> String {
    qualifier.map_or_else(|| name.to_owned(), |q| format!("{q}.{name}"))
}

fn bind(expr: &mut Expr, source: &NameSource<'_>, column: i32) {
    let table = source.table;
    let column = match table.ipk {
        Some(ipk) if ipk as i32 == column => -1,
        _ => column,
    };
    expr.kind = ExprKind::Column {
        cursor: source.cursor,
        column,
    };
    expr.column_affinity = Some(table.column_affinity(column));
    if !expr.flags.contains(ExprFlags::EXPLICIT_COLLATE) && column >= 0 {
        expr.collation = Some(table.column_collation(column).to_owned());
    }
}
