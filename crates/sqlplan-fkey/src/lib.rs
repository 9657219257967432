//! Foreign-key constraint tracking.
//!
//! When a row of a table changes, [`fk_check`] emits code that keeps two
//! counters of outstanding violations: one per statement for immediate
//! constraints and one per transaction for deferred ones.
//!
//! - Writing a child row looks up its parent row and counts one violation
//!   when it is missing.
//! - Deleting a child row takes back the violation it caused, if any.
//! - Deleting a parent row scans the child table and counts every child
//!   that still refers to it. Inserting a parent row takes those back.
//!
//! A single-row statement on an immediate constraint does not count. It
//! halts at the first violation instead.
//!
//! Parent rows are found through the parent key index located by
//! [`locate_parent_key_index`]. Child scans go through the WHERE planner, so
//! they use whatever index the child table offers.

pub mod action;
pub mod check;
mod codegen;
pub mod parent_key;
pub mod runtime;

pub use action::{FkActionProgram, FkActionStep, FkStepOp, fk_action_program, fk_actions};
pub use check::{column_mask, fk_check, fk_drop_table, fk_old_mask, fk_required};
pub use parent_key::{ParentKey, locate_parent_key, locate_parent_key_index};
pub use runtime::{FkCounters, FkRuntimeChecker};
