//! One nesting level of the generated loop.

use std::sync::Arc;

use smallvec::SmallVec;
use sqlplan_types::{Index, Label, Opcode, ProgramBuilder};

use crate::mask::Bitmask;
use crate::plan::{AccessPath, WherePlan};

/// The sub-loop over the values of one `IN (...)` operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InLoop {
    /// Cursor on the ephemeral value set.
    pub cursor: i32,
    /// Address of the instruction that loads the current value. It is
    /// preceded by the `Rewind` and followed by the NULL test.
    pub addr_in_top: usize,
}

/// A FROM item placed at one depth of the nested loop, with its plan and
/// the bookkeeping needed to close the loop again.
#[derive(Debug, Clone)]
pub struct WhereLevel {
    /// Position of the table in the FROM list.
    pub from: usize,
    pub tab_cursor: i32,
    /// Index cursor, or -1.
    pub idx_cursor: i32,
    pub plan: WherePlan,
    /// Cost of the plan when it was chosen.
    pub rcost: f64,
    /// Tables the plan needs positioned in outer loops.
    pub used: Bitmask,
    /// Register holding the LEFT JOIN match flag, or 0.
    pub left_join: i32,
    /// Leave this loop.
    pub brk: Label,
    /// Advance to the next IN value combination. Same as `brk` when the
    /// level has no IN operators.
    pub nxt: Label,
    /// Advance to the next row.
    pub cont: Label,
    /// Address of the LEFT JOIN match-flag store.
    pub first: usize,
    /// Instruction that steps the loop, with its operands.
    pub op: Opcode,
    pub p1: i32,
    pub p2: i32,
    pub p5: u16,
    /// Rarely more than a couple per level.
    pub in_loops: SmallVec<[InLoop; 2]>,
    /// The transient index, once built.
    pub auto_index: Option<Arc<Index>>,
}

impl WhereLevel {
    pub fn new(b: &mut ProgramBuilder, from: usize, tab_cursor: i32, plan: WherePlan, rcost: f64) -> Self {
        let brk = b.emit_label();
        let cont = b.emit_label();
        Self {
            from,
            tab_cursor,
            idx_cursor: -1,
            plan,
            rcost,
            used: 0,
            left_join: 0,
            brk,
            nxt: brk,
            cont,
            first: 0,
            op: Opcode::Noop,
            p1: 0,
            p2: 0,
            p5: 0,
            in_loops: SmallVec::new(),
            auto_index: None,
        }
    }

    /// The index this level reads, real or transient.
    pub fn index(&self) -> Option<&Arc<Index>> {
        match &self.plan.access {
            AccessPath::Index(idx) => Some(idx),
            AccessPath::AutoIndex => self.auto_index.as_ref(),
            _ => None,
        }
    }

    pub fn index_name(&self) -> Option<&str> {
        self.index().map(|i| i.name.as_str())
    }
}
