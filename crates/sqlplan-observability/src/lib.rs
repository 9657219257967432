//! Planner observability: events, observers, a trace buffer and metrics.
//!
//! The planner and the foreign-key compiler report decisions through an
//! injected [`PlannerObserver`] instead of a process-wide trace switch.
//! Nothing here depends on planner types; events carry rendered names and
//! plain numbers so they can be serialized as-is.
//!
//! Observers must be cheap and must not call back into the planner.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;

// ---------------------------------------------------------------------------
// PlannerEvent
// ---------------------------------------------------------------------------

/// A single decision reported by the planner.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum PlannerEvent {
    /// A WHERE term was analyzed.
    TermAnalyzed {
        term: usize,
        expr: String,
        /// Mask of tables the term depends on.
        prereq_all: u64,
        /// Whether the term is an indexable comparison.
        indexable: bool,
    },

    /// A candidate access path was costed.
    CandidateCost {
        /// Position in the join order being filled.
        level: usize,
        table: String,
        index: Option<String>,
        cost: f64,
        rows: f64,
        ws_flags: u32,
    },

    /// A table was committed to a level of the join.
    LevelChosen {
        level: usize,
        table: String,
        index: Option<String>,
        cost: f64,
        rows: f64,
        /// EXPLAIN QUERY PLAN style description.
        detail: String,
    },

    /// An OR of equalities on one column was rewritten to IN.
    OrRewrittenToIn { term: usize, column: String, values: usize },

    /// An automatic index was planned.
    AutomaticIndex {
        table: String,
        columns: Vec<String>,
        cost: f64,
    },

    /// `where_begin` finished generating loop headers.
    PlanFinished {
        levels: usize,
        order_by_consumed: bool,
        one_pass: bool,
    },

    /// A foreign-key check was compiled.
    ForeignKeyCoded {
        child: String,
        parent: String,
        /// +1 for an insert-side check, -1 for a delete-side check.
        incr: i32,
        deferred: bool,
    },
}

impl PlannerEvent {
    /// Short machine-readable name of the event kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::TermAnalyzed { .. } => "term_analyzed",
            Self::CandidateCost { .. } => "candidate_cost",
            Self::LevelChosen { .. } => "level_chosen",
            Self::OrRewrittenToIn { .. } => "or_rewritten_to_in",
            Self::AutomaticIndex { .. } => "automatic_index",
            Self::PlanFinished { .. } => "plan_finished",
            Self::ForeignKeyCoded { .. } => "foreign_key_coded",
        }
    }

    /// Render as a JSON object.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

// ---------------------------------------------------------------------------
// PlannerObserver
// ---------------------------------------------------------------------------

/// Receives planner events.
pub trait PlannerObserver: Send + Sync {
    fn on_event(&self, event: &PlannerEvent);
}

/// Observer that drops every event. Default when tracing is not configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpObserver;

impl PlannerObserver for NoOpObserver {
    #[inline(always)]
    fn on_event(&self, _event: &PlannerEvent) {}
}

/// Forwards events to `tracing` at DEBUG level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl PlannerObserver for TracingObserver {
    fn on_event(&self, event: &PlannerEvent) {
        match event {
            PlannerEvent::LevelChosen {
                level,
                table,
                detail,
                cost,
                ..
            } => {
                tracing::debug!(
                    target: "sqlplan.planner",
                    loop_level = *level,
                    %table,
                    cost = *cost,
                    %detail,
                    "level chosen"
                );
            }
            PlannerEvent::ForeignKeyCoded {
                child,
                parent,
                incr,
                ..
            } => {
                tracing::debug!(
                    target: "sqlplan.fkey",
                    %child,
                    %parent,
                    incr = *incr,
                    "fk check coded"
                );
            }
            other => {
                tracing::debug!(target: "sqlplan.planner", kind = other.kind(), event = ?other);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// PlanTraceBuffer: bounded event storage
// ---------------------------------------------------------------------------

/// Fixed-capacity ring of recent planner events.
///
/// When full, the oldest event is overwritten.
pub struct PlanTraceBuffer {
    events: Mutex<RingBuf>,
}

struct RingBuf {
    buf: Vec<PlannerEvent>,
    capacity: usize,
    head: usize,
}

impl RingBuf {
    fn push(&mut self, event: PlannerEvent) {
        if self.capacity == 0 {
            return;
        }
        if self.buf.len() < self.capacity {
            self.buf.push(event);
        } else {
            self.buf[self.head] = event;
            self.head = (self.head + 1) % self.capacity;
        }
    }

    fn ordered(&self) -> Vec<PlannerEvent> {
        let (newer, older) = self.buf.split_at(self.head);
        older.iter().chain(newer).cloned().collect()
    }
}

impl PlanTraceBuffer {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            events: Mutex::new(RingBuf {
                buf: Vec::with_capacity(capacity),
                capacity,
                head: 0,
            }),
        }
    }

    pub fn push(&self, event: PlannerEvent) {
        self.events.lock().push(event);
    }

    /// All stored events, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<PlannerEvent> {
        self.events.lock().ordered()
    }

    pub fn clear(&self) {
        let mut ring = self.events.lock();
        ring.buf.clear();
        ring.head = 0;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().buf.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.events.lock().capacity
    }
}

impl PlannerObserver for PlanTraceBuffer {
    fn on_event(&self, event: &PlannerEvent) {
        self.push(event.clone());
    }
}

// ---------------------------------------------------------------------------
// PlanMetrics: aggregated counters
// ---------------------------------------------------------------------------

/// Aggregated planner statistics. All counters are atomic.
pub struct PlanMetrics {
    pub terms_analyzed: AtomicU64,
    pub candidates_costed: AtomicU64,
    pub levels_planned: AtomicU64,
    /// Levels that ended up as a full table scan.
    pub full_scans: AtomicU64,
    pub or_to_in_rewrites: AtomicU64,
    pub automatic_indexes: AtomicU64,
    pub plans_finished: AtomicU64,
    /// Plans whose ORDER BY was satisfied by the chosen loops.
    pub sorts_avoided: AtomicU64,
    pub fk_checks_coded: AtomicU64,
    created_at: Instant,
}

impl PlanMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self {
            terms_analyzed: AtomicU64::new(0),
            candidates_costed: AtomicU64::new(0),
            levels_planned: AtomicU64::new(0),
            full_scans: AtomicU64::new(0),
            or_to_in_rewrites: AtomicU64::new(0),
            automatic_indexes: AtomicU64::new(0),
            plans_finished: AtomicU64::new(0),
            sorts_avoided: AtomicU64::new(0),
            fk_checks_coded: AtomicU64::new(0),
            created_at: Instant::now(),
        }
    }

    /// Update the counters an event contributes to.
    pub fn record(&self, event: &PlannerEvent) {
        let bump = |c: &AtomicU64| {
            c.fetch_add(1, Ordering::Relaxed);
        };
        match event {
            PlannerEvent::TermAnalyzed { .. } => bump(&self.terms_analyzed),
            PlannerEvent::CandidateCost { .. } => bump(&self.candidates_costed),
            PlannerEvent::LevelChosen { index, .. } => {
                bump(&self.levels_planned);
                if index.is_none() {
                    bump(&self.full_scans);
                }
            }
            PlannerEvent::OrRewrittenToIn { .. } => bump(&self.or_to_in_rewrites),
            PlannerEvent::AutomaticIndex { .. } => bump(&self.automatic_indexes),
            PlannerEvent::PlanFinished {
                order_by_consumed, ..
            } => {
                bump(&self.plans_finished);
                if *order_by_consumed {
                    bump(&self.sorts_avoided);
                }
            }
            PlannerEvent::ForeignKeyCoded { .. } => bump(&self.fk_checks_coded),
        }
    }

    pub fn reset(&self) {
        for c in [
            &self.terms_analyzed,
            &self.candidates_costed,
            &self.levels_planned,
            &self.full_scans,
            &self.or_to_in_rewrites,
            &self.automatic_indexes,
            &self.plans_finished,
            &self.sorts_avoided,
            &self.fk_checks_coded,
        ] {
            c.store(0, Ordering::Relaxed);
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> PlanMetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        PlanMetricsSnapshot {
            terms_analyzed: load(&self.terms_analyzed),
            candidates_costed: load(&self.candidates_costed),
            levels_planned: load(&self.levels_planned),
            full_scans: load(&self.full_scans),
            or_to_in_rewrites: load(&self.or_to_in_rewrites),
            automatic_indexes: load(&self.automatic_indexes),
            plans_finished: load(&self.plans_finished),
            sorts_avoided: load(&self.sorts_avoided),
            fk_checks_coded: load(&self.fk_checks_coded),
            elapsed_secs: self.created_at.elapsed().as_secs_f64(),
        }
    }
}

impl Default for PlanMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializable snapshot of [`PlanMetrics`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanMetricsSnapshot {
    pub terms_analyzed: u64,
    pub candidates_costed: u64,
    pub levels_planned: u64,
    pub full_scans: u64,
    pub or_to_in_rewrites: u64,
    pub automatic_indexes: u64,
    pub plans_finished: u64,
    pub sorts_avoided: u64,
    pub fk_checks_coded: u64,
    pub elapsed_secs: f64,
}

impl PlanMetricsSnapshot {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

// ---------------------------------------------------------------------------
// MetricsObserver: metrics plus trace buffer
// ---------------------------------------------------------------------------

/// Records every event into both a [`PlanMetrics`] and a
/// [`PlanTraceBuffer`].
pub struct MetricsObserver {
    metrics: PlanMetrics,
    log: PlanTraceBuffer,
}

impl MetricsObserver {
    #[must_use]
    pub fn new(log_capacity: usize) -> Self {
        Self {
            metrics: PlanMetrics::new(),
            log: PlanTraceBuffer::new(log_capacity),
        }
    }

    #[must_use]
    pub fn metrics(&self) -> &PlanMetrics {
        &self.metrics
    }

    #[must_use]
    pub fn log(&self) -> &PlanTraceBuffer {
        &self.log
    }

    pub fn reset(&self) {
        self.metrics.reset();
        self.log.clear();
    }
}

impl PlannerObserver for MetricsObserver {
    fn on_event(&self, event: &PlannerEvent) {
        self.metrics.record(event);
        self.log.push(event.clone());
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn chosen(level: usize, index: Option<&str>) -> PlannerEvent {
        PlannerEvent::LevelChosen {
            level,
            table: format!("t{level}"),
            index: index.map(str::to_owned),
            cost: 10.0,
            rows: 1.0,
            detail: String::new(),
        }
    }

    #[test]
    fn test_noop_observer_accepts_events() {
        NoOpObserver.on_event(&chosen(0, None));
        TracingObserver.on_event(&chosen(0, Some("i1")));
    }

    #[test]
    fn test_trace_buffer_overwrites_oldest() {
        let rb = PlanTraceBuffer::new(2);
        assert!(rb.is_empty());
        rb.push(chosen(0, None));
        rb.push(chosen(1, None));
        rb.push(chosen(2, None));
        let snap = rb.snapshot();
        assert_eq!(snap.len(), 2);
        assert!(matches!(&snap[0], PlannerEvent::LevelChosen { level: 1, .. }));
        assert!(matches!(&snap[1], PlannerEvent::LevelChosen { level: 2, .. }));
        rb.push(chosen(3, None));
        let snap = rb.snapshot();
        assert!(matches!(&snap[0], PlannerEvent::LevelChosen { level: 2, .. }));
        assert!(matches!(&snap[1], PlannerEvent::LevelChosen { level: 3, .. }));
        rb.clear();
        assert!(rb.is_empty());
        assert_eq!(rb.capacity(), 2);
    }

    #[test]
    fn test_zero_capacity_buffer_stores_nothing() {
        let rb = PlanTraceBuffer::new(0);
        rb.push(chosen(0, None));
        assert!(rb.is_empty());
    }

    #[test]
    fn test_metrics_count_full_scans_and_sorts() {
        let obs = MetricsObserver::new(8);
        obs.on_event(&chosen(0, None));
        obs.on_event(&chosen(1, Some("i1")));
        obs.on_event(&PlannerEvent::PlanFinished {
            levels: 2,
            order_by_consumed: true,
            one_pass: false,
        });
        let snap = obs.metrics().snapshot();
        assert_eq!(snap.levels_planned, 2);
        assert_eq!(snap.full_scans, 1);
        assert_eq!(snap.plans_finished, 1);
        assert_eq!(snap.sorts_avoided, 1);
        assert_eq!(obs.log().len(), 3);

        obs.reset();
        assert_eq!(obs.metrics().snapshot().levels_planned, 0);
        assert!(obs.log().is_empty());
    }

    #[test]
    fn test_events_serialize_to_json() {
        let json = PlannerEvent::OrRewrittenToIn {
            term: 3,
            column: "a".into(),
            values: 2,
        }
        .to_json()
        .unwrap();
        assert!(json.contains("OrRewrittenToIn"));
        assert!(json.contains("\"values\":2"));

        let snap = PlanMetrics::new().snapshot().to_json().unwrap();
        assert!(snap.contains("\"fk_checks_coded\": 0"));
    }

    #[test]
    fn test_observer_is_shareable_across_threads() {
        let obs: Arc<dyn PlannerObserver> = Arc::new(MetricsObserver::new(4));
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let obs = Arc::clone(&obs);
                std::thread::spawn(move || obs.on_event(&chosen(i, None)))
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }
}
