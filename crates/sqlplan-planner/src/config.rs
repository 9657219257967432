//! Planner configuration.
//!
//! These are the knobs a connection exposes through pragmas. The planner
//! reads them from the compilation context; nothing is global.

use serde::{Deserialize, Serialize};

/// What an EXPLAIN prefix asks for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExplainMode {
    #[default]
    Off,
    /// `EXPLAIN`: the program is returned instead of run.
    Program,
    /// `EXPLAIN QUERY PLAN`: one `Explain` row per loop level.
    QueryPlan,
}

/// Per-connection planner settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Build transient indexes when that beats a repeated full scan.
    pub automatic_index: bool,
    /// LIKE compares with BINARY rather than NOCASE.
    pub case_sensitive_like: bool,
    /// Scan in reverse when no ORDER BY was requested. Used to flush out
    /// queries that silently depend on scan order.
    pub reverse_unordered_selects: bool,
    /// Refine estimates with index samples when they are present.
    pub use_stat2: bool,
    /// Enforce foreign-key constraints.
    pub foreign_keys: bool,
    /// Deliver [`PlannerEvent`](sqlplan_observability::PlannerEvent)s to
    /// the observer.
    pub trace: bool,
    pub explain: ExplainMode,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            automatic_index: true,
            case_sensitive_like: false,
            reverse_unordered_selects: false,
            use_stat2: true,
            foreign_keys: true,
            trace: false,
            explain: ExplainMode::Off,
        }
    }
}

impl PlannerConfig {
    #[must_use]
    pub const fn explain_query_plan(&self) -> bool {
        matches!(self.explain, ExplainMode::QueryPlan)
    }
}
