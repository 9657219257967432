//! Access plans chosen by the cost model.

use std::sync::Arc;

use bitflags::bitflags;
use sqlplan_types::Index;

use crate::mask::Bitmask;
use crate::term::{OperatorMask, TermId};
use crate::vtab::IndexInfo;

/// Cost of a plan that cannot be used at all.
pub const BIG_COST: f64 = 1e99;

bitflags! {
    /// What a chosen plan does. The low byte is free for callers.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct WsFlags: u32 {
        /// `rowid = expr` or `rowid IN (...)`.
        const ROWID_EQ     = 0x0000_1000;
        /// `rowid < expr` and/or `rowid > expr`.
        const ROWID_RANGE  = 0x0000_2000;
        const COLUMN_EQ    = 0x0001_0000;
        const COLUMN_RANGE = 0x0002_0000;
        const COLUMN_IN    = 0x0004_0000;
        const COLUMN_NULL  = 0x0008_0000;
        const INDEXED      = 0x000f_0000;
        const IN_ABLE      = 0x000f_1000;
        /// Any of these means the plan is not a full scan.
        const NOT_FULLSCAN = 0x100f_3000;
        const TOP_LIMIT    = 0x0010_0000;
        const BTM_LIMIT    = 0x0020_0000;
        const BOTH_LIMIT   = 0x0030_0000;
        /// Covering index: the table itself is never read.
        const IDX_ONLY     = 0x0080_0000;
        /// Output comes out in ORDER BY order.
        const ORDERBY      = 0x0100_0000;
        const REVERSE      = 0x0200_0000;
        /// At most one row.
        const UNIQUE       = 0x0400_0000;
        const VIRTUALTABLE = 0x0800_0000;
        const MULTI_OR     = 0x1000_0000;
        const TEMP_INDEX   = 0x2000_0000;
    }
}

bitflags! {
    /// Requests from the caller of `where_begin`.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct WhereFlags: u16 {
        /// Only the minimum row is wanted (min() optimization).
        const ORDERBY_MIN     = 0x0001;
        /// Only the maximum row is wanted.
        const ORDERBY_MAX     = 0x0002;
        /// Single-pass UPDATE/DELETE if the plan allows it.
        const ONEPASS_DESIRED = 0x0004;
        /// Multi-index OR may return a row more than once.
        const DUPLICATES_OK   = 0x0008;
        /// The caller opens the table cursors.
        const OMIT_OPEN       = 0x0010;
        /// The caller closes the table cursors.
        const OMIT_CLOSE      = 0x0020;
        /// Always seek the table, even for a covering index.
        const FORCE_TABLE     = 0x0040;
        /// Plan only the first FROM item.
        const ONETABLE_ONLY   = 0x0080;
    }
}

/// The way one table is accessed.
#[derive(Debug, Clone, Default)]
pub enum AccessPath {
    /// Rowid lookup, rowid range, or a plain scan of the table b-tree.
    #[default]
    Table,
    /// A real index.
    Index(Arc<Index>),
    /// A transient index built before the loop starts.
    AutoIndex,
    /// Whatever the virtual table module chose.
    Virtual(Box<IndexInfo>),
    /// One indexed lookup per disjunct of the OR term.
    MultiOr(TermId),
}

impl AccessPath {
    pub fn index(&self) -> Option<&Arc<Index>> {
        match self {
            Self::Index(idx) => Some(idx),
            _ => None,
        }
    }

    pub fn index_name(&self) -> Option<String> {
        match self {
            Self::Index(idx) => Some(idx.name.clone()),
            Self::AutoIndex => Some("auto-index".to_owned()),
            _ => None,
        }
    }
}

/// A plan for one table.
#[derive(Debug, Clone, Default)]
pub struct WherePlan {
    pub access: AccessPath,
    pub ws_flags: WsFlags,
    /// Leading index columns pinned by `=`, IN or IS NULL.
    pub n_eq: usize,
    /// Estimated rows out.
    pub n_row: f64,
    /// Operators the equality prefix was matched with.
    pub eq_term_mask: OperatorMask,
}

impl WherePlan {
    #[inline]
    pub const fn has(&self, flags: WsFlags) -> bool {
        self.ws_flags.intersects(flags)
    }

    /// Access on the table b-tree by rowid.
    pub const fn is_rowid_access(&self) -> bool {
        self.ws_flags
            .intersects(WsFlags::ROWID_EQ.union(WsFlags::ROWID_RANGE))
            && !self.ws_flags.intersects(WsFlags::INDEXED)
    }
}

/// A plan, what it costs, and which tables it needs.
#[derive(Debug, Clone)]
pub struct WhereCost {
    pub plan: WherePlan,
    pub rcost: f64,
    /// Tables that must be in outer loops.
    pub used: Bitmask,
}

impl Default for WhereCost {
    fn default() -> Self {
        Self {
            plan: WherePlan::default(),
            rcost: BIG_COST,
            used: 0,
        }
    }
}

impl WhereCost {
    /// Whether this beats `other`: cheaper, or as cheap with fewer rows.
    pub fn better_than(&self, other: &Self) -> bool {
        self.rcost < other.rcost || (self.rcost <= other.rcost && self.plan.n_row < other.plan.n_row)
    }
}
