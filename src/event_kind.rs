//! The tiny, always-compiled vocabulary shared between the step chain and
//! the optional metrics layer, so step code doesn't need to gate on the
//! `metrics` feature just to name which channel an emission traveled on.

/// Which of the three event channels an emission traveled on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    Added,
    Removed,
    Modified,
}
