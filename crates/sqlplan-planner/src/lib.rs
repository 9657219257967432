//! WHERE-clause optimizer.
//!
//! [`where_begin`] splits a WHERE expression into terms, analyzes each term
//! for the indexes it could drive, picks a nested-loop order table by table
//! with the cost model in [`cost`], and emits the loop prologue into the
//! [`PlanContext`] program. The caller emits the loop body and then calls
//! [`where_end`] to close the loops.
//!
//! Expressions handed to the planner must already be resolved against the
//! FROM list (see [`SrcList::name_context`]).

pub mod analyze;
pub mod auto_index;
pub mod clause;
pub mod codegen;
pub mod config;
pub mod context;
pub mod cost;
pub mod explain;
pub mod expr_code;
pub mod join;
pub mod level;
pub mod like;
pub mod mask;
mod or_clause;
pub mod plan;
pub mod source;
pub mod stats;
pub mod term;
pub mod vtab;

#[cfg(test)]
mod scenarios;
#[cfg(test)]
mod test_support;

pub use analyze::Analyzer;
pub use clause::WhereClause;
pub use config::{ExplainMode, PlannerConfig};
pub use context::{PendingLock, PlanContext};
pub use cost::{CostQuery, best_index};
pub use explain::{explain_scan_text, plan_summary};
pub use expr_code::{DefaultExprCoder, ExprCoder};
pub use join::{WhereInfo, where_begin, where_end};
pub use level::{InLoop, WhereLevel};
pub use mask::{Bitmask, CursorMaskSet};
pub use plan::{AccessPath, WhereCost, WhereFlags, WherePlan, WsFlags};
pub use source::{IndexHint, JoinType, SrcItem, SrcList};
pub use term::{OperatorMask, Term, TermFlags, TermId};
pub use vtab::{IndexInfo, VirtualTableModule};
