//! Per-statement compilation state shared by the planner and the
//! foreign-key coder.

use std::collections::HashMap;
use std::sync::Arc;

use sqlplan_btree::{BtreeStore, TableLock};
use sqlplan_error::Result;
use sqlplan_observability::{NoOpObserver, PlannerEvent, PlannerObserver};
use sqlplan_types::{Opcode, P4, ProgramBuilder, Schema, SqliteValue, VdbeProgram};
use tracing::debug;

use crate::config::PlannerConfig;
use crate::expr_code::{DefaultExprCoder, ExprCoder};
use crate::vtab::VirtualTableModule;

/// A table lock the statement will take before it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingLock {
    pub db: i32,
    pub root_page: u32,
    pub write: bool,
    pub name: String,
}

/// Everything one statement compilation carries around.
pub struct PlanContext {
    pub builder: ProgramBuilder,
    pub config: PlannerConfig,
    pub schema: Arc<Schema>,
    /// Next free cursor number.
    pub n_tab: i32,
    /// Estimated number of times the loop currently being coded runs.
    pub query_loop: f64,
    pub observer: Arc<dyn PlannerObserver>,
    pub expr_coder: Arc<dyn ExprCoder>,
    /// Values bound to the statement's parameters, if known at plan time.
    pub bound_values: Vec<SqliteValue>,
    /// Parameters whose values shaped the plan.
    pub var_mask: u32,
    /// Counter for `EXPLAIN QUERY PLAN` select ids.
    pub select_id: i32,
    /// Depth of nested statement generation (trigger and action programs).
    pub nested: u32,
    /// The statement may write more than one row.
    pub is_multi_write: bool,
    /// The statement may need to abort part way through.
    pub may_abort: bool,
    pub disable_triggers: bool,
    locks: Vec<PendingLock>,
    modules: HashMap<String, Arc<dyn VirtualTableModule>>,
}

impl Default for PlanContext {
    fn default() -> Self {
        Self::new(PlannerConfig::default())
    }
}

impl std::fmt::Debug for PlanContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanContext")
            .field("config", &self.config)
            .field("n_tab", &self.n_tab)
            .field("ops", &self.builder.ops().len())
            .field("locks", &self.locks)
            .field("modules", &self.modules.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl PlanContext {
    #[must_use]
    pub fn new(config: PlannerConfig) -> Self {
        Self {
            builder: ProgramBuilder::new(),
            config,
            schema: Arc::new(Schema::new()),
            n_tab: 0,
            query_loop: 1.0,
            observer: Arc::new(NoOpObserver),
            expr_coder: Arc::new(DefaultExprCoder),
            bound_values: Vec::new(),
            var_mask: 0,
            select_id: 0,
            nested: 0,
            is_multi_write: false,
            may_abort: false,
            disable_triggers: false,
            locks: Vec::new(),
            modules: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_schema(mut self, schema: Arc<Schema>) -> Self {
        self.schema = schema;
        self
    }

    /// Deliver events to `observer`. Events are only produced while
    /// `config.trace` is set.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn PlannerObserver>) -> Self {
        self.observer = observer;
        self
    }

    #[must_use]
    pub fn with_expr_coder(mut self, coder: Arc<dyn ExprCoder>) -> Self {
        self.expr_coder = coder;
        self
    }

    #[must_use]
    pub fn with_bound_values(mut self, values: Vec<SqliteValue>) -> Self {
        self.bound_values = values;
        self
    }

    /// Reserve `n` cursor numbers and return the first.
    pub fn alloc_cursors(&mut self, n: i32) -> i32 {
        let first = self.n_tab;
        self.n_tab += n;
        first
    }

    pub fn alloc_cursor(&mut self) -> i32 {
        self.alloc_cursors(1)
    }

    pub fn register_module(&mut self, name: &str, module: Arc<dyn VirtualTableModule>) {
        self.modules.insert(name.to_ascii_lowercase(), module);
    }

    pub fn module(&self, name: &str) -> Option<Arc<dyn VirtualTableModule>> {
        self.modules.get(&name.to_ascii_lowercase()).cloned()
    }

    /// Send `event` to the observer if tracing is on.
    pub fn notify(&self, event: PlannerEvent) {
        if self.config.trace {
            self.observer.on_event(&event);
        }
    }

    /// Whether events are being produced. Lets callers skip building an
    /// event's strings.
    pub const fn tracing(&self) -> bool {
        self.config.trace
    }

    // -----------------------------------------------------------------------
    // Table locks
    // -----------------------------------------------------------------------

    /// Record that the statement needs a lock on the table at `root_page`.
    /// Asking twice for the same table keeps one lock, upgraded to a write
    /// lock if either request was for writing.
    pub fn lock_table(&mut self, db: i32, root_page: u32, write: bool, name: &str) {
        if let Some(lock) = self
            .locks
            .iter_mut()
            .find(|l| l.db == db && l.root_page == root_page)
        {
            lock.write |= write;
            return;
        }
        self.locks.push(PendingLock {
            db,
            root_page,
            write,
            name: name.to_owned(),
        });
    }

    pub fn locks(&self) -> &[PendingLock] {
        &self.locks
    }

    /// Emit one `TableLock` instruction per recorded lock.
    pub fn code_table_locks(&mut self) {
        for lock in &self.locks {
            self.builder.emit_op(
                Opcode::TableLock,
                lock.db,
                i32::try_from(lock.root_page).unwrap_or(i32::MAX),
                i32::from(lock.write),
                P4::Table(lock.name.clone()),
                0,
            );
        }
    }

    /// Take the recorded locks on `store` directly.
    pub fn apply_table_locks(&self, store: &dyn BtreeStore) {
        for lock in &self.locks {
            store.lock_table(TableLock {
                db: lock.db,
                root_page: lock.root_page,
                write: lock.write,
            });
        }
    }

    /// Finish the program.
    pub fn finish(self) -> Result<VdbeProgram> {
        debug!(
            target: "sqlplan.planner",
            ops = self.builder.ops().len(),
            registers = self.builder.register_count(),
            cursors = self.n_tab,
            var_mask = self.var_mask,
            "program finished"
        );
        self.builder.finish()
    }
}
