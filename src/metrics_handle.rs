//! A `metrics`-feature-agnostic handle the step chain can hold unconditionally.
//!
//! With the `metrics` feature enabled, [`MetricsHandle`] *is*
//! [`crate::metrics::EngineMetrics`]. With it disabled, it's a zero-sized
//! stub whose methods are no-ops -- so step structs never need their own
//! `#[cfg(feature = "metrics")]` field, only this one indirection.

use crate::event_kind::EventKind;

#[cfg(feature = "metrics")]
pub(crate) type MetricsHandle = crate::metrics::EngineMetrics;

#[cfg(not(feature = "metrics"))]
#[derive(Clone, Default)]
pub(crate) struct MetricsHandle;

#[cfg(not(feature = "metrics"))]
impl MetricsHandle {
    pub fn new() -> Self {
        Self
    }

    pub fn record_emitted(&self, _step_label: &'static str, _kind: EventKind) {}

    pub fn adjust_live_parents(&self, _step_label: &'static str, _delta: i64) {}

    pub fn record_error(&self) {}
}
