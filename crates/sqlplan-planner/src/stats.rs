//! Index statistics and the row estimators that use them.
//!
//! An index may carry [`INDEX_SAMPLES`] evenly spaced samples of its first
//! column. The samples split the column's domain into `INDEX_SAMPLES + 1`
//! regions; the range, equality and IN estimators count how many regions a
//! constraint covers. Without samples the coarse defaults apply: each
//! range bound keeps a quarter of the rows.

use std::cmp::Ordering;

use sqlplan_ast::{Expr, ExprKind, UnaryOp};
use sqlplan_btree::{BtreeStore, CursorMode};
use sqlplan_error::Result;
use sqlplan_types::{BINARY, Index, SqliteValue, Table, TypeAffinity};
use tracing::debug;

use crate::analyze::variable_bit;
use crate::term::{OperatorMask, Term, TermFlags};

pub use sqlplan_types::schema::INDEX_SAMPLES;

/// Values a constant expression can contribute to estimation.
pub struct ValueSource<'a> {
    pub bound_values: &'a [SqliteValue],
    /// Parameters consulted so far.
    pub var_mask: u32,
}

impl<'a> ValueSource<'a> {
    #[must_use]
    pub const fn new(bound_values: &'a [SqliteValue]) -> Self {
        Self {
            bound_values,
            var_mask: 0,
        }
    }

    /// The value of `expr` with affinity `aff` applied, if it is a literal
    /// or a parameter with a bound value.
    pub fn value_of(&mut self, expr: &Expr, aff: TypeAffinity) -> Option<SqliteValue> {
        match &expr.kind {
            ExprKind::Literal(v) => Some(v.clone().apply_affinity(aff)),
            ExprKind::Variable(n) => {
                self.var_mask |= variable_bit(*n);
                let idx = usize::try_from(*n).ok()?.checked_sub(1)?;
                self.bound_values.get(idx).map(|v| v.clone().apply_affinity(aff))
            }
            ExprKind::Unary {
                op: UnaryOp::Negate,
                operand,
            } => match &operand.kind {
                ExprKind::Literal(SqliteValue::Integer(i)) => {
                    i.checked_neg().map(|n| SqliteValue::Integer(n).apply_affinity(aff))
                }
                ExprKind::Literal(SqliteValue::Float(f)) => {
                    Some(SqliteValue::Float(-f).apply_affinity(aff))
                }
                _ => None,
            },
            _ => None,
        }
    }
}

fn first_column_affinity(index: &Index, table: &Table) -> TypeAffinity {
    index
        .columns
        .first()
        .map_or(TypeAffinity::Blob, |c| table.column_affinity(c.column))
}

/// Region of the sampled domain that `value` falls in, between 0 and
/// `INDEX_SAMPLES` inclusive.
///
/// Runs of equal samples make several regions possible; `round_up` picks
/// the largest, otherwise the smallest.
pub fn range_region(index: &Index, value: &SqliteValue, round_up: bool) -> usize {
    let Some(samples) = index.samples.as_deref() else {
        return 0;
    };
    let samples = &samples[..samples.len().min(INDEX_SAMPLES)];
    let stop = |c: Ordering| if round_up { c == Ordering::Greater } else { c != Ordering::Less };

    let i = match value {
        SqliteValue::Null => {
            if round_up {
                samples.iter().take_while(|s| s.is_null()).count()
            } else {
                0
            }
        }
        SqliteValue::Integer(_) | SqliteValue::Float(_) => {
            let r = value.to_float();
            let mut i = 0;
            while i < samples.len() {
                let s = &samples[i];
                if !s.is_null() {
                    if s.sort_class() > 1 {
                        break;
                    }
                    if stop(s.to_float().partial_cmp(&r).unwrap_or(Ordering::Equal)) {
                        break;
                    }
                }
                i += 1;
            }
            i
        }
        SqliteValue::Text(_) | SqliteValue::Blob(_) => {
            let collation = match value {
                SqliteValue::Blob(_) => BINARY,
                _ => index
                    .columns
                    .first()
                    .map_or(BINARY, |c| c.collation.as_str()),
            };
            let class = value.sort_class();
            let mut i = 0;
            while i < samples.len() {
                let s = &samples[i];
                if !s.is_null() && s.sort_class() >= class {
                    if s.sort_class() != class {
                        break;
                    }
                    if stop(s.collate_cmp(value, collation)) {
                        break;
                    }
                }
                i += 1;
            }
            i
        }
    };
    i.min(INDEX_SAMPLES)
}

/// Percentage (1 to 100) of the rows selected by the equality prefix that a
/// range scan on the next column visits.
///
/// `lower` is a `>`/`>=` term and `upper` a `<`/`<=` term on that column.
/// The histogram is only consulted for the first column of a real index;
/// `None` stands for the rowid.
pub fn range_scan_est(
    index: Option<&Index>,
    table: &Table,
    n_eq: usize,
    lower: Option<&Term>,
    upper: Option<&Term>,
    use_stat2: bool,
    values: &mut ValueSource<'_>,
) -> u32 {
    debug_assert!(lower.is_some() || upper.is_some());
    let sampled = index.filter(|i| use_stat2 && n_eq == 0 && i.samples.is_some());
    if let Some(index) = sampled {
        let aff = first_column_affinity(index, table);
        let lower_val = lower.and_then(|t| {
            debug_assert!(t.operator.intersects(OperatorMask::GT | OperatorMask::GE));
            t.right_operand().and_then(|e| values.value_of(e, aff))
        });
        let upper_val = upper.and_then(|t| {
            debug_assert!(t.operator.intersects(OperatorMask::LT | OperatorMask::LE));
            t.right_operand().and_then(|e| values.value_of(e, aff))
        });
        let round_up_lower = lower.is_some_and(|t| t.operator == OperatorMask::GT);
        let round_up_upper = upper.is_some_and(|t| t.operator == OperatorMask::LE);

        let bounds = match (&lower_val, &upper_val) {
            (None, None) => None,
            (None, Some(u)) => {
                let hi = range_region(index, u, round_up_upper);
                let lo = if lower.is_some() { hi / 2 } else { 0 };
                Some((lo, hi))
            }
            (Some(l), None) => {
                let lo = range_region(index, l, round_up_lower);
                let hi = if upper.is_some() {
                    (lo + INDEX_SAMPLES + 1) / 2
                } else {
                    INDEX_SAMPLES
                };
                Some((lo, hi))
            }
            (Some(l), Some(u)) => Some((
                range_region(index, l, round_up_lower),
                range_region(index, u, round_up_upper),
            )),
        };
        if let Some((lo, hi)) = bounds {
            let regions = hi.saturating_sub(lo);
            return if regions < 1 {
                (50 / INDEX_SAMPLES) as u32
            } else {
                (regions * 100 / INDEX_SAMPLES) as u32
            };
        }
    }

    let mut est = 100;
    if lower.is_some_and(|t| !t.has(TermFlags::VNULL)) {
        est /= 4;
    }
    if upper.is_some() {
        est /= 4;
    }
    est
}

/// Refine the row estimate for `x = rhs` on the first index column. A
/// `None` right side means `x IS NULL`. Leaves `n_row` alone when the value
/// is unknown.
pub fn equal_scan_est(
    index: &Index,
    table: &Table,
    rhs: Option<&Expr>,
    values: &mut ValueSource<'_>,
    n_row: &mut f64,
) {
    debug_assert!(index.samples.is_some());
    let value = match rhs {
        Some(e) => match values.value_of(e, first_column_affinity(index, table)) {
            Some(v) => v,
            None => return,
        },
        None => SqliteValue::Null,
    };
    let lo = range_region(index, &value, false);
    let hi = range_region(index, &value, true);
    let total = index.row_estimate(0) as u64;
    if lo >= hi {
        let est = (total / (INDEX_SAMPLES as u64 * 2)) as f64;
        if est < *n_row {
            *n_row = est;
        }
    } else {
        *n_row = ((hi - lo) as u64 * total / INDEX_SAMPLES as u64) as f64;
    }
}

/// Refine the row estimate for `x IN (v1, v2, ...)` on the first index
/// column.
pub fn in_scan_est(
    index: &Index,
    table: &Table,
    list: &[Expr],
    values: &mut ValueSource<'_>,
    n_row: &mut f64,
) {
    debug_assert!(index.samples.is_some());
    let aff = first_column_affinity(index, table);
    let mut span = [false; INDEX_SAMPLES + 1];
    let mut single = [false; INDEX_SAMPLES + 1];
    let mut not_found = 0_u64;
    for e in list {
        let v = match values.value_of(e, aff) {
            Some(v) if !v.is_null() => v,
            _ => {
                not_found += 1;
                continue;
            }
        };
        let lo = range_region(index, &v, false);
        let hi = range_region(index, &v, true);
        if lo >= hi {
            single[lo] = true;
        } else {
            span[lo..hi].iter_mut().for_each(|s| *s = true);
        }
    }
    let n_span = span.iter().filter(|s| **s).count() as u64;
    let n_single = span
        .iter()
        .zip(&single)
        .filter(|(sp, si)| !**sp && **si)
        .count() as u64;
    let total = index.row_estimate(0) as u64;
    let per_key = index.row_estimate(1) as u64;
    let est = (n_span * 2 + n_single) * total / (2 * INDEX_SAMPLES as u64) + not_found * per_key;
    *n_row = est.min(total) as f64;
    debug!(
        target: "sqlplan.planner",
        index = %index.name,
        n_span,
        n_single,
        not_found,
        rows = *n_row,
        "IN-list estimate"
    );
}

// ---------------------------------------------------------------------------
// Gathering
// ---------------------------------------------------------------------------

/// Walk the index tree open on `cursor` and refresh the index's per-prefix
/// row estimates and first-column samples.
///
/// Entry `k` of the estimates is the average number of rows sharing a
/// `k`-column prefix, rounded up. Sample `i` is the entry at position
/// `n * (2i + 1) / (2 * INDEX_SAMPLES)`. An empty index keeps its
/// defaults.
pub fn gather_index_samples(
    store: &mut dyn BtreeStore,
    cursor: i32,
    table: &Table,
    index: &mut Index,
) -> Result<()> {
    store.open(cursor, index.root_page, table.db, CursorMode::Read)?;
    let result = scan_index(store, cursor, index);
    store.close(cursor)?;
    let (n_rows, distinct, first_column) = result?;
    if n_rows == 0 {
        return Ok(());
    }

    let mut estimates = Vec::with_capacity(distinct.len() + 1);
    estimates.push(n_rows);
    estimates.extend(distinct.iter().map(|&d| n_rows.div_ceil(d.max(1))));
    index.row_estimates = estimates;

    let n = first_column.len();
    index.samples = Some(
        (0..INDEX_SAMPLES)
            .map(|i| first_column[(n * (2 * i + 1) / (2 * INDEX_SAMPLES)).min(n - 1)].clone())
            .collect(),
    );
    debug!(
        target: "sqlplan.planner",
        index = %index.name,
        rows = n_rows,
        estimates = ?index.row_estimates,
        "gathered index statistics"
    );
    Ok(())
}

/// Row count, distinct count per prefix length, and every first-column
/// value in index order.
fn scan_index(
    store: &mut dyn BtreeStore,
    cursor: i32,
    index: &Index,
) -> Result<(u64, Vec<u64>, Vec<SqliteValue>)> {
    let n_col = index.column_count();
    let collations = index.collations();
    let mut distinct = vec![0_u64; n_col];
    let mut first_column = Vec::new();
    let mut prev: Vec<SqliteValue> = Vec::new();
    let mut n_rows = 0_u64;

    let mut exhausted = store.rewind(cursor)?;
    while !exhausted {
        let key = (0..n_col)
            .map(|i| store.column(cursor, i))
            .collect::<Result<Vec<_>>>()?;
        // Length of the prefix shared with the previous entry.
        let same = if n_rows == 0 {
            0
        } else {
            key.iter()
                .zip(&prev)
                .zip(&collations)
                .take_while(|((a, b), coll)| a.collate_cmp(b, coll) == Ordering::Equal)
                .count()
        };
        for d in &mut distinct[same..] {
            *d += 1;
        }
        if let Some(first) = key.first() {
            first_column.push(first.clone());
        }
        prev = key;
        n_rows += 1;
        exhausted = store.next(cursor)?;
    }
    Ok((n_rows, distinct, first_column))
}
