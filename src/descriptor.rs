//! The type descriptor: a recursive tree mirroring the nested-array shape a
//! step's emitted events will have.
//!
//! A descriptor with no arrays is a leaf. The descriptor's set of segment
//! paths is `{[]} ∪ {[a] ++ p | a ∈ arrays, p ∈ paths(a.type)}`
//! (root-inclusive pre-order) -- see [`TypeDescriptor::segment_paths`].

use crate::path::SegmentPath;

/// One nested array named within a [`TypeDescriptor`].
#[derive(Clone, Debug, PartialEq)]
pub struct ArrayDescriptor {
    pub name: String,
    pub ty: TypeDescriptor,
}

/// A recursive description of the nested arrays present at some point in the
/// output shape.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TypeDescriptor {
    pub arrays: Vec<ArrayDescriptor>,
}

impl TypeDescriptor {
    /// The leaf descriptor (no nested arrays).
    #[must_use]
    pub fn leaf() -> Self {
        Self { arrays: Vec::new() }
    }

    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.arrays.is_empty()
    }

    /// Find the sub-descriptor reached by following `path` from this node.
    #[must_use]
    pub fn subtree(&self, path: &SegmentPath) -> Option<&TypeDescriptor> {
        let mut cur = self;
        for name in path.as_slice() {
            cur = &cur.arrays.iter().find(|a| a.name == *name)?.ty;
        }
        Some(cur)
    }

    /// True iff `path` is a valid segment path within this descriptor.
    #[must_use]
    pub fn contains_path(&self, path: &SegmentPath) -> bool {
        self.subtree(path).is_some()
    }

    /// Replace the sub-descriptor at `path` with `new_subtree`, returning a
    /// new top-level descriptor. `path` must already resolve within `self`.
    #[must_use]
    pub fn with_subtree_replaced(&self, path: &SegmentPath, new_subtree: TypeDescriptor) -> Self {
        fn go(node: &TypeDescriptor, remaining: &[String], replacement: &TypeDescriptor) -> TypeDescriptor {
            match remaining.split_first() {
                None => replacement.clone(),
                Some((head, tail)) => {
                    let arrays = node
                        .arrays
                        .iter()
                        .map(|a| {
                            if a.name == *head {
                                ArrayDescriptor {
                                    name: a.name.clone(),
                                    ty: go(&a.ty, tail, replacement),
                                }
                            } else {
                                a.clone()
                            }
                        })
                        .collect();
                    TypeDescriptor { arrays }
                }
            }
        }
        go(self, path.as_slice(), &new_subtree)
    }

    /// Wrap the subtree at `scope` inside a single new array named `array_name`.
    /// Used by `GroupBy`: the descriptor that used to live at `scope` becomes
    /// the descriptor of the items inside the new group array.
    #[must_use]
    pub fn wrap_scope_in_array(&self, scope: &SegmentPath, array_name: &str) -> Self {
        let inner = self.subtree(scope).cloned().unwrap_or_default();
        let wrapped = TypeDescriptor {
            arrays: vec![ArrayDescriptor {
                name: array_name.to_string(),
                ty: inner,
            }],
        };
        self.with_subtree_replaced(scope, wrapped)
    }

    /// Remove the array named by the final segment of `target` from the
    /// descriptor subtree rooted at `target`'s parent. Used by `DropArray`.
    #[must_use]
    pub fn without_array(&self, target: &SegmentPath) -> Self {
        let Some(parent) = target.parent() else {
            return self.clone();
        };
        let Some(name) = target.last() else {
            return self.clone();
        };
        fn go(node: &TypeDescriptor, remaining: &[String], drop_name: &str) -> TypeDescriptor {
            match remaining.split_first() {
                None => TypeDescriptor {
                    arrays: node.arrays.iter().filter(|a| a.name != drop_name).cloned().collect(),
                },
                Some((head, tail)) => {
                    let arrays = node
                        .arrays
                        .iter()
                        .map(|a| {
                            if a.name == *head {
                                ArrayDescriptor {
                                    name: a.name.clone(),
                                    ty: go(&a.ty, tail, drop_name),
                                }
                            } else {
                                a.clone()
                            }
                        })
                        .collect();
                    TypeDescriptor { arrays }
                }
            }
        }
        go(self, parent.as_slice(), name)
    }

    /// All segment paths this descriptor describes, root-inclusive, pre-order.
    #[must_use]
    pub fn segment_paths(&self) -> Vec<SegmentPath> {
        let mut out = vec![SegmentPath::root()];
        self.collect_paths(&SegmentPath::root(), &mut out);
        out
    }

    fn collect_paths(&self, prefix: &SegmentPath, out: &mut Vec<SegmentPath>) {
        for a in &self.arrays {
            let p = prefix.with_pushed(a.name.clone());
            out.push(p.clone());
            a.ty.collect_paths(&p, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_has_only_root_path() {
        let d = TypeDescriptor::leaf();
        assert_eq!(d.segment_paths(), vec![SegmentPath::root()]);
    }

    #[test]
    fn wrap_scope_in_array_then_segment_paths() {
        let d = TypeDescriptor::leaf().wrap_scope_in_array(&SegmentPath::root(), "items");
        let paths = d.segment_paths();
        assert_eq!(paths, vec![SegmentPath::root(), SegmentPath::new(["items"])]);
    }

    #[test]
    fn without_array_removes_named_array_only() {
        let d = TypeDescriptor {
            arrays: vec![
                ArrayDescriptor { name: "items".into(), ty: TypeDescriptor::leaf() },
                ArrayDescriptor { name: "other".into(), ty: TypeDescriptor::leaf() },
            ],
        };
        let dropped = d.without_array(&SegmentPath::new(["items"]));
        assert!(!dropped.contains_path(&SegmentPath::new(["items"])));
        assert!(dropped.contains_path(&SegmentPath::new(["other"])));
    }
}
