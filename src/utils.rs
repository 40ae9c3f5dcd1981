//! Small shared utility types.

use ordered_float::NotNan;
use std::cmp::Ordering;

/// A wrapper around f64 that implements `Ord` by delegating to
/// `ordered_float::NotNan`. This allows f64 values to be used in contexts
/// requiring total ordering, such as `BinaryHeap`, sorting, and other ordered
/// collections -- including the min/max/pick-by aggregates' per-parent
/// numeric state.
///
/// Values only ever arrive here from `serde_json` numbers (`Item::get_f64`),
/// which cannot represent NaN, so the `NotNan` construction never fails.
///
/// # Examples
///
/// ```
/// use viewflow::utils::OrdF64;
/// use std::collections::BinaryHeap;
///
/// let mut heap = BinaryHeap::new();
/// heap.push(OrdF64::new(3.14));
/// heap.push(OrdF64::new(2.71));
/// heap.push(OrdF64::new(1.41));
///
/// assert_eq!(heap.pop().unwrap().get(), 3.14);
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OrdF64(NotNan<f64>);

impl OrdF64 {
    /// Build an `OrdF64` from a finite f64. Panics if `value` is NaN, which
    /// cannot occur for values sourced from JSON.
    #[must_use]
    #[allow(clippy::new_ret_no_self)]
    pub fn new(value: f64) -> Self {
        Self(NotNan::new(value).expect("JSON-sourced f64 is never NaN"))
    }

    #[must_use]
    pub fn get(self) -> f64 {
        self.0.into_inner()
    }
}

impl Eq for OrdF64 {}

impl PartialOrd for OrdF64 {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrdF64 {
    #[inline]
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl From<f64> for OrdF64 {
    fn from(value: f64) -> Self {
        Self::new(value)
    }
}

impl From<OrdF64> for f64 {
    fn from(value: OrdF64) -> Self {
        value.get()
    }
}
