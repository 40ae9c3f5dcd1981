//! Segment paths and key paths: the two address spaces the engine reasons about.
//!
//! A [`SegmentPath`] is a schema-level address -- an ordered sequence of array
//! names, known at pipeline-construction time. A [`KeyPath`] is the runtime
//! counterpart: an ordered sequence of concrete keys, one per ancestor array,
//! parallel in length to some segment path.
//!
//! Both are thin, cheaply-cloned wrappers over `Vec<String>` with the handful
//! of predicates (`is_empty`, `starts_with`, `push`, `with_pushed`) the step
//! chain actually needs. Neither type enforces that a `KeyPath` belongs to any
//! particular `SegmentPath`; that correspondence is an invariant the steps
//! maintain, not something the types encode.

use std::fmt;

/// A schema-level address: an ordered sequence of array-name strings.
///
/// The empty path denotes the root. Two segment paths are equal iff their
/// name sequences are equal element-wise.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SegmentPath(Vec<String>);

impl SegmentPath {
    /// The empty (root) path.
    #[must_use]
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Build a path from an ordered list of segment names.
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// Borrow the segment names.
    #[must_use]
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Return a new path with `name` appended.
    #[must_use]
    pub fn with_pushed(&self, name: impl Into<String>) -> Self {
        let mut v = self.0.clone();
        v.push(name.into());
        Self(v)
    }

    /// Return a new path with the final segment removed, or `None` at the root.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            None
        } else {
            Some(Self(self.0[..self.0.len() - 1].to_vec()))
        }
    }

    /// The final segment name, or `None` at the root.
    #[must_use]
    pub fn last(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    /// True iff `self` is `prefix` with zero or more additional segments appended.
    #[must_use]
    pub fn starts_with(&self, prefix: &SegmentPath) -> bool {
        self.0.len() >= prefix.0.len() && self.0[..prefix.0.len()] == prefix.0[..]
    }

    /// Strip `prefix` from the front of `self`, if it is in fact a prefix.
    #[must_use]
    pub fn strip_prefix(&self, prefix: &SegmentPath) -> Option<SegmentPath> {
        if self.starts_with(prefix) {
            Some(SegmentPath(self.0[prefix.0.len()..].to_vec()))
        } else {
            None
        }
    }

    /// Return a new path with every segment of `other` appended after `self`'s own.
    #[must_use]
    pub fn extended(&self, other: &SegmentPath) -> Self {
        let mut v = self.0.clone();
        v.extend(other.0.iter().cloned());
        Self(v)
    }

    /// Remove a single segment name from anywhere in the path (used when a
    /// downstream subscription names an array that GroupBy inserted and the
    /// upstream registration must be expressed without it).
    #[must_use]
    pub fn without_segment(&self, name: &str) -> SegmentPath {
        SegmentPath(self.0.iter().filter(|s| s.as_str() != name).cloned().collect())
    }
}

impl fmt::Display for SegmentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.0.join("/"))
    }
}

impl<S: Into<String>> FromIterator<S> for SegmentPath {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::new(iter)
    }
}

/// A runtime address: an ordered sequence of concrete key strings, parallel
/// in length to some [`SegmentPath`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct KeyPath(Vec<String>);

impl KeyPath {
    #[must_use]
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(keys.into_iter().map(Into::into).collect())
    }

    #[must_use]
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn with_pushed(&self, key: impl Into<String>) -> Self {
        let mut v = self.0.clone();
        v.push(key.into());
        Self(v)
    }

    /// The final key, or `None` at the root.
    #[must_use]
    pub fn last(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    /// All but the final key, or `None` at the root.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            None
        } else {
            Some(Self(self.0[..self.0.len() - 1].to_vec()))
        }
    }

    /// A stable join used as a bookkeeping map key (`"a::b::c"`).
    #[must_use]
    pub fn join(&self) -> String {
        self.0.join("::")
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.0.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_and_strip() {
        let a = SegmentPath::new(["cities", "venues"]);
        let root = SegmentPath::root();
        assert!(a.starts_with(&root));
        assert!(!root.starts_with(&a));
        let b = SegmentPath::new(["cities"]);
        assert!(a.starts_with(&b));
        assert_eq!(a.strip_prefix(&b), Some(SegmentPath::new(["venues"])));
    }

    #[test]
    fn without_segment_removes_named_array() {
        let p = SegmentPath::new(["cities", "venues", "rooms"]);
        assert_eq!(p.without_segment("venues"), SegmentPath::new(["cities", "rooms"]));
    }

    #[test]
    fn key_path_join_is_stable() {
        let kp = KeyPath::new(["a", "b", "c"]);
        assert_eq!(kp.join(), "a::b::c");
        assert_eq!(kp.parent(), Some(KeyPath::new(["a", "b"])));
        assert_eq!(kp.last(), Some("c"));
    }
}
