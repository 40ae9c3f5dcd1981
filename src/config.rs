//! Engine-wide configuration.
//!
//! A narrow, explicit knob set supplied once at [`crate::create_pipeline_with_config`]
//! time and immutable afterward -- the same shape this crate's ancestry uses
//! for its own per-feature config structs (e.g. checkpoint policy, runner
//! execution mode), scaled down to what this engine actually needs.

/// Engine-wide behavior knobs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    /// When `true` (the default), an [`crate::error::EngineError`] surfacing
    /// from `add`/`remove` is converted into a panic after being recorded in
    /// the metrics error counter -- appropriate when an invariant violation
    /// means the caller has a bug and should fail loudly and immediately.
    /// When `false`, the error is returned to the caller untouched.
    pub panic_on_invariant_violation: bool,
    /// Whether the metrics layer records emission/error counters. Has no
    /// effect when the crate is built without the `metrics` feature.
    pub collect_metrics: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            panic_on_invariant_violation: true,
            collect_metrics: true,
        }
    }
}
