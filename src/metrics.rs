//! In-process observability for pipeline execution.
//!
//! Mirrors this codebase's lineage `metrics` module in spirit -- a
//! `MetricsCollector`-like registry with counters and gauges a caller can
//! print or export as JSON -- but scoped to the single-threaded, in-memory
//! reality of this engine: no background collection thread, no file/network
//! sink, and the counters are keyed by *step kind* and *event channel*
//! rather than by arbitrary user-registered metric objects.
//!
//! Compiles out entirely when the `metrics` feature is disabled; every call
//! site in the step chain goes through [`EngineMetrics::record_emitted`] /
//! [`EngineMetrics::record_error`], which become no-ops via `#[cfg]`.

pub use crate::event_kind::EventKind;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Per-step-kind emission counters plus a live-parent gauge, shared by
/// `Rc<RefCell<_>>` across every step in a pipeline.
#[derive(Clone, Default)]
pub struct EngineMetrics {
    inner: Rc<RefCell<Inner>>,
}

#[derive(Default)]
struct Inner {
    emitted: HashMap<(&'static str, EventKind), u64>,
    live_parents: HashMap<&'static str, i64>,
    errors: u64,
}

impl EngineMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one emission of `kind` by a step of `step_label` (e.g. `"group_by"`).
    pub fn record_emitted(&self, step_label: &'static str, kind: EventKind) {
        let mut inner = self.inner.borrow_mut();
        *inner.emitted.entry((step_label, kind)).or_insert(0) += 1;
    }

    /// Adjust the live-parent gauge for a step (e.g. `GroupBy` incrementing
    /// on a new group, decrementing when the last member is removed).
    pub fn adjust_live_parents(&self, step_label: &'static str, delta: i64) {
        let mut inner = self.inner.borrow_mut();
        *inner.live_parents.entry(step_label).or_insert(0) += delta;
    }

    /// Record an `EngineError` having been raised, regardless of whether the
    /// caller's [`crate::config::EngineConfig`] turned it into a panic.
    pub fn record_error(&self) {
        self.inner.borrow_mut().errors += 1;
    }

    #[must_use]
    pub fn emitted_count(&self, step_label: &str, kind: EventKind) -> u64 {
        self.inner
            .borrow()
            .emitted
            .get(&(step_label, kind))
            .copied()
            .unwrap_or(0)
    }

    #[must_use]
    pub fn live_parents(&self, step_label: &str) -> i64 {
        self.inner.borrow().live_parents.get(step_label).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn error_count(&self) -> u64 {
        self.inner.borrow().errors
    }

    /// Render a human-readable snapshot to stdout.
    pub fn print(&self) {
        let inner = self.inner.borrow();
        println!("EngineMetrics:");
        let mut emitted: Vec<_> = inner.emitted.iter().collect();
        emitted.sort_by_key(|((label, kind), _)| (*label, format!("{kind:?}")));
        for ((label, kind), count) in emitted {
            println!("  {label} {kind:?}: {count}");
        }
        let mut gauges: Vec<_> = inner.live_parents.iter().collect();
        gauges.sort_by_key(|(label, _)| **label);
        for (label, count) in gauges {
            println!("  {label} live_parents: {count}");
        }
        println!("  errors: {}", inner.errors);
    }

    /// Render the snapshot as a `serde_json::Value`, suitable for tests or
    /// embedding in a caller's own diagnostics.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let inner = self.inner.borrow();
        let emitted: serde_json::Map<String, serde_json::Value> = inner
            .emitted
            .iter()
            .map(|((label, kind), count)| (format!("{label}.{kind:?}"), serde_json::json!(count)))
            .collect();
        let live_parents: serde_json::Map<String, serde_json::Value> = inner
            .live_parents
            .iter()
            .map(|(label, count)| ((*label).to_string(), serde_json::json!(count)))
            .collect();
        serde_json::json!({
            "emitted": emitted,
            "live_parents": live_parents,
            "errors": inner.errors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_per_label_and_kind() {
        let m = EngineMetrics::new();
        m.record_emitted("group_by", EventKind::Added);
        m.record_emitted("group_by", EventKind::Added);
        m.record_emitted("group_by", EventKind::Removed);
        assert_eq!(m.emitted_count("group_by", EventKind::Added), 2);
        assert_eq!(m.emitted_count("group_by", EventKind::Removed), 1);
        assert_eq!(m.emitted_count("filter", EventKind::Added), 0);
    }

    #[test]
    fn live_parents_gauge_tracks_deltas() {
        let m = EngineMetrics::new();
        m.adjust_live_parents("group_by", 1);
        m.adjust_live_parents("group_by", 1);
        m.adjust_live_parents("group_by", -1);
        assert_eq!(m.live_parents("group_by"), 1);
    }
}
