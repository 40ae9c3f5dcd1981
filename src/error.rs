//! Engine-contract-violation errors (§7 of the design doc).
//!
//! These are not recoverable business errors -- they signal a bug in the
//! caller (a malformed path, a removal with no matching add) or in the
//! engine itself. `EngineError` is a closed enum rather than a generic
//! `anyhow::Error` so call sites can match on `.kind()` when they need to,
//! while still composing under `anyhow::Context` the way the rest of this
//! crate's fallible surface does.

use crate::path::{KeyPath, SegmentPath};
use std::fmt;

/// One of the fixed set of fatal engine-contract violations.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    /// The materializer received a key path whose length didn't match the
    /// segment path it was addressing.
    MismatchedPathLength {
        segment_path: SegmentPath,
        key_path: KeyPath,
    },
    /// An add/remove referenced a parent key not present in materialized state.
    UnknownParent { segment_path: SegmentPath, key_path: KeyPath },
    /// `GroupBy` or a pick-by step could not find an item it expected in its store.
    UnknownItem { item_key: String },
    /// `CommutativeAggregate` (or a numeric/pick aggregate) saw a removal with
    /// no accumulator recorded for the parent.
    MissingAggregate { key_path: KeyPath },
    /// An array name contained the reserved `":"` delimiter.
    InvalidArrayName { name: String },
    /// A subscription or scope path does not exist in the accumulated
    /// type descriptor at the point it was requested.
    InvalidSegmentPath { path: SegmentPath },
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::MismatchedPathLength { segment_path, key_path } => write!(
                f,
                "key path {key_path} has length {} but segment path {segment_path} has length {}",
                key_path.len(),
                segment_path.len()
            ),
            EngineError::UnknownParent { segment_path, key_path } => write!(
                f,
                "no parent found at key path {key_path} for segment path {segment_path}"
            ),
            EngineError::UnknownItem { item_key } => {
                write!(f, "no item recorded for key {item_key:?}")
            }
            EngineError::MissingAggregate { key_path } => {
                write!(f, "no aggregate accumulator recorded for parent {key_path}")
            }
            EngineError::InvalidArrayName { name } => write!(
                f,
                "array name {name:?} contains the reserved delimiter \":\""
            ),
            EngineError::InvalidSegmentPath { path } => {
                write!(f, "segment path {path} is not present in the type descriptor")
            }
        }
    }
}

impl std::error::Error for EngineError {}

/// Reject array names containing the reserved key-path delimiter.
pub fn validate_array_name(name: &str) -> Result<(), EngineError> {
    if name.contains(':') {
        Err(EngineError::InvalidArrayName { name: name.to_string() })
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_reserved_delimiter() {
        assert!(validate_array_name("venues").is_ok());
        assert!(matches!(
            validate_array_name("ve:nues"),
            Err(EngineError::InvalidArrayName { .. })
        ));
        assert!(matches!(
            validate_array_name("ve::nues"),
            Err(EngineError::InvalidArrayName { .. })
        ));
    }
}
