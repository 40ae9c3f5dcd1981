//! The materializer (§4.11): the terminal consumer that reconstructs a
//! concrete nested-keyed-array value from the `Added`/`Removed`/`Modified`
//! events the finished step chain emits.
//!
//! Unlike every step in [`crate::steps`], the materializer has no downstream
//! of its own -- it subscribes at every path in the final [`TypeDescriptor`]
//! and folds each event into the caller's state through a [`Sink`], a plain
//! `state -> state` function the caller supplies. State itself is a
//! [`KeyedArray`]: an ordered sequence of `(key, MaterializedItem)` pairs,
//! recursively nested the same way the pipeline's output shape is.
//!
//! The three reducers (`add_to_keyed_array`, `remove_from_keyed_array`,
//! `modify_in_keyed_array`) are pure functions over an owned `KeyedArray`,
//! matching the sink's own `state -> state` shape. All three share one
//! navigation rule: consume one `(segment, key)` pair per level, finding the
//! parent entry keyed by `key` in the current array and stepping into its
//! child array named `segment`, until both lists run out together -- at
//! which point the current array *is* the target the caller addressed.

use crate::error::EngineError;
use crate::path::{KeyPath, SegmentPath};
use crate::step::Step;
use crate::value::Item;
use anyhow::Result;
use serde_json::Value;
use std::collections::BTreeMap;
use std::rc::Rc;

/// One materialized entity: its own properties plus its nested arrays, keyed
/// by the array name the pipeline's [`TypeDescriptor`] declared for them.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MaterializedItem {
    pub properties: Item,
    pub arrays: BTreeMap<String, KeyedArray>,
}

impl MaterializedItem {
    #[must_use]
    fn leaf(properties: Item) -> Self {
        Self { properties, arrays: BTreeMap::new() }
    }

    /// Render as a `serde_json::Value`: properties and nested arrays
    /// flattened into one object, arrays as plain JSON arrays in key order
    /// with the bookkeeping key itself dropped (it was never a property).
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut map = self.properties.as_map().clone();
        for (name, arr) in &self.arrays {
            map.insert(name.clone(), keyed_array_to_json(arr));
        }
        Value::Object(map)
    }
}

/// An ordered, keyed sequence of materialized entities -- the shape of the
/// pipeline's output at any one nesting level, root included.
pub type KeyedArray = Vec<(String, MaterializedItem)>;

/// Render a [`KeyedArray`] as a plain JSON array (keys themselves aren't
/// part of the rendered value; they exist only to let the reducers find an
/// entry again on a later `Removed`/`Modified`).
#[must_use]
pub fn keyed_array_to_json(arr: &KeyedArray) -> Value {
    Value::Array(arr.iter().map(|(_, item)| item.to_json()).collect())
}

/// A transform the sink applies to the current state, producing the next.
pub type Transform = Box<dyn FnOnce(KeyedArray) -> Result<KeyedArray>>;

/// The caller-supplied destination for materialized state. Called once per
/// `Added`/`Removed`/`Modified` event the materializer observes, with a
/// `Transform` already closed over that event's data.
pub type SinkFn = dyn Fn(Transform) -> Result<()>;

/// A ready-made in-memory sink: a shared [`KeyedArray`] cell plus the
/// `SinkFn` that folds transforms into it. Convenient for tests and for
/// callers who don't need to route materialized state anywhere external.
#[must_use]
pub fn in_memory_sink() -> (Rc<SinkFn>, Rc<std::cell::RefCell<KeyedArray>>) {
    let state = Rc::new(std::cell::RefCell::new(KeyedArray::new()));
    let state2 = state.clone();
    let sink: Rc<SinkFn> = Rc::new(move |transform: Transform| {
        let current = state2.borrow().clone();
        let next = transform(current)?;
        *state2.borrow_mut() = next;
        Ok(())
    });
    (sink, state)
}

fn mismatched(segment_path: &SegmentPath, key_path: &KeyPath) -> anyhow::Error {
    EngineError::MismatchedPathLength { segment_path: segment_path.clone(), key_path: key_path.clone() }.into()
}

fn unknown_parent(segment_path: &SegmentPath, key_path: &KeyPath) -> anyhow::Error {
    EngineError::UnknownParent { segment_path: segment_path.clone(), key_path: key_path.clone() }.into()
}

/// Append `(key, item)` to the array addressed by `(segment_path, key_path)`.
pub fn add_to_keyed_array(
    state: &KeyedArray,
    segment_path: &SegmentPath,
    key_path: &KeyPath,
    key: &str,
    item: &Item,
) -> Result<KeyedArray> {
    if key_path.len() != segment_path.len() {
        return Err(mismatched(segment_path, key_path));
    }

    fn go(
        entries: &KeyedArray,
        segs: &[String],
        keys: &[String],
        key: &str,
        item: &Item,
        segment_path: &SegmentPath,
        key_path: &KeyPath,
    ) -> Result<KeyedArray> {
        match (segs.split_first(), keys.split_first()) {
            (None, None) => {
                let mut out = entries.clone();
                out.push((key.to_string(), MaterializedItem::leaf(item.clone())));
                Ok(out)
            }
            (Some((array_name, rest_segs)), Some((parent_key, rest_keys))) => {
                let mut out = entries.clone();
                let idx = out
                    .iter()
                    .position(|(k, _)| k == parent_key)
                    .ok_or_else(|| unknown_parent(segment_path, key_path))?;
                let child = out[idx].1.arrays.entry(array_name.clone()).or_default().clone();
                let new_child = go(&child, rest_segs, rest_keys, key, item, segment_path, key_path)?;
                out[idx].1.arrays.insert(array_name.clone(), new_child);
                Ok(out)
            }
            _ => unreachable!("equal-length paths checked above"),
        }
    }

    go(state, segment_path.as_slice(), key_path.as_slice(), key, item, segment_path, key_path)
}

/// Remove the entry keyed `key` from the array addressed by
/// `(segment_path, key_path)`.
pub fn remove_from_keyed_array(
    state: &KeyedArray,
    segment_path: &SegmentPath,
    key_path: &KeyPath,
    key: &str,
) -> Result<KeyedArray> {
    if key_path.len() != segment_path.len() {
        return Err(mismatched(segment_path, key_path));
    }

    fn go(
        entries: &KeyedArray,
        segs: &[String],
        keys: &[String],
        key: &str,
        segment_path: &SegmentPath,
        key_path: &KeyPath,
    ) -> Result<KeyedArray> {
        match (segs.split_first(), keys.split_first()) {
            (None, None) => {
                let mut out = entries.clone();
                let before = out.len();
                out.retain(|(k, _)| k != key);
                if out.len() == before {
                    return Err(unknown_parent(segment_path, key_path));
                }
                Ok(out)
            }
            (Some((array_name, rest_segs)), Some((parent_key, rest_keys))) => {
                let mut out = entries.clone();
                let idx = out
                    .iter()
                    .position(|(k, _)| k == parent_key)
                    .ok_or_else(|| unknown_parent(segment_path, key_path))?;
                let child = out[idx].1.arrays.entry(array_name.clone()).or_default().clone();
                let new_child = go(&child, rest_segs, rest_keys, key, segment_path, key_path)?;
                out[idx].1.arrays.insert(array_name.clone(), new_child);
                Ok(out)
            }
            _ => unreachable!("equal-length paths checked above"),
        }
    }

    go(state, segment_path.as_slice(), key_path.as_slice(), key, segment_path, key_path)
}

/// Set property `name` to `value` on the entry keyed `parent_key` within the
/// array addressed by `(segment_path, key_path)`.
pub fn modify_in_keyed_array(
    state: &KeyedArray,
    segment_path: &SegmentPath,
    key_path: &KeyPath,
    parent_key: &str,
    name: &str,
    value: &Value,
) -> Result<KeyedArray> {
    if key_path.len() != segment_path.len() {
        return Err(mismatched(segment_path, key_path));
    }

    fn go(
        entries: &KeyedArray,
        segs: &[String],
        keys: &[String],
        parent_key: &str,
        name: &str,
        value: &Value,
        segment_path: &SegmentPath,
        key_path: &KeyPath,
    ) -> Result<KeyedArray> {
        match (segs.split_first(), keys.split_first()) {
            (None, None) => {
                let mut out = entries.clone();
                let idx = out
                    .iter()
                    .position(|(k, _)| k == parent_key)
                    .ok_or_else(|| unknown_parent(segment_path, key_path))?;
                out[idx].1.properties = out[idx].1.properties.with_property(name.to_string(), value.clone());
                Ok(out)
            }
            (Some((array_name, rest_segs)), Some((navigate_key, rest_keys))) => {
                let mut out = entries.clone();
                let idx = out
                    .iter()
                    .position(|(k, _)| k == navigate_key)
                    .ok_or_else(|| unknown_parent(segment_path, key_path))?;
                let child = out[idx].1.arrays.entry(array_name.clone()).or_default().clone();
                let new_child = go(&child, rest_segs, rest_keys, parent_key, name, value, segment_path, key_path)?;
                out[idx].1.arrays.insert(array_name.clone(), new_child);
                Ok(out)
            }
            _ => unreachable!("equal-length paths checked above"),
        }
    }

    go(state, segment_path.as_slice(), key_path.as_slice(), parent_key, name, value, segment_path, key_path)
}

/// Attaches a [`Sink`] to every path a step's [`crate::descriptor::TypeDescriptor`]
/// names, translating `Added`/`Removed`/`Modified` events into calls against
/// the three reducers above.
pub struct Materializer;

impl Materializer {
    /// Subscribe to `step` at every segment path in its descriptor, folding
    /// each observed event into `sink`.
    pub fn attach(step: &Rc<dyn Step>, sink: Rc<SinkFn>) -> Result<()> {
        let descriptor = step.type_descriptor();
        for path in descriptor.segment_paths() {
            let sink_added = sink.clone();
            let p = path.clone();
            step.on_added(
                &path,
                Box::new(move |key_path, key, item| {
                    let p = p.clone();
                    let key_path = key_path.clone();
                    let key = key.to_string();
                    let item = item.clone();
                    sink_added(Box::new(move |state| add_to_keyed_array(&state, &p, &key_path, &key, &item)))
                }),
            )?;

            let sink_removed = sink.clone();
            let p = path.clone();
            step.on_removed(
                &path,
                Box::new(move |key_path, key, _item| {
                    let p = p.clone();
                    let key_path = key_path.clone();
                    let key = key.to_string();
                    sink_removed(Box::new(move |state| remove_from_keyed_array(&state, &p, &key_path, &key)))
                }),
            )?;

            let sink_modified = sink.clone();
            let p = path.clone();
            step.on_modified(
                &path,
                Box::new(move |key_path, parent_key, name, value| {
                    let p = p.clone();
                    let key_path = key_path.clone();
                    let parent_key = parent_key.to_string();
                    let name = name.to_string();
                    let value = value.clone();
                    sink_modified(Box::new(move |state| modify_in_keyed_array(&state, &p, &key_path, &parent_key, &name, &value)))
                }),
            )?;
        }
        Ok(())
    }
}

/// Render a root-level [`KeyedArray`] to the flat JSON array shape tests and
/// callers usually want.
#[must_use]
pub fn to_json_array(state: &KeyedArray) -> Vec<Value> {
    state.iter().map(|(_, item)| item.to_json()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::metrics_handle::MetricsHandle;
    use crate::source::Source;
    use serde_json::json;

    #[test]
    fn add_at_root_appends_entry() {
        let state = KeyedArray::new();
        let item = Item::from_map(json!({"v": 1}).as_object().unwrap().clone());
        let next = add_to_keyed_array(&state, &SegmentPath::root(), &KeyPath::root(), "a", &item).unwrap();
        assert_eq!(keyed_array_to_json(&next), json!([{"v": 1}]));
    }

    #[test]
    fn add_into_nested_array_requires_parent() {
        let state = KeyedArray::new();
        let item = Item::from_map(json!({"v": 1}).as_object().unwrap().clone());
        let err = add_to_keyed_array(&state, &SegmentPath::new(["items"]), &KeyPath::new(["missing"]), "x", &item);
        assert!(err.is_err());
    }

    #[test]
    fn add_then_modify_then_remove_round_trip() {
        let state = KeyedArray::new();
        let group = Item::from_map(json!({"c": "A"}).as_object().unwrap().clone());
        let state = add_to_keyed_array(&state, &SegmentPath::root(), &KeyPath::root(), "g1", &group).unwrap();

        let member = Item::from_map(json!({"v": 10}).as_object().unwrap().clone());
        let state =
            add_to_keyed_array(&state, &SegmentPath::new(["items"]), &KeyPath::new(["g1"]), "m1", &member).unwrap();
        assert_eq!(keyed_array_to_json(&state), json!([{"c": "A", "items": [{"v": 10}]}]));

        let state =
            modify_in_keyed_array(&state, &SegmentPath::root(), &KeyPath::root(), "g1", "total", &json!(10.0)).unwrap();
        assert_eq!(keyed_array_to_json(&state), json!([{"c": "A", "total": 10.0, "items": [{"v": 10}]}]));

        let state = remove_from_keyed_array(&state, &SegmentPath::new(["items"]), &KeyPath::new(["g1"]), "m1").unwrap();
        assert_eq!(keyed_array_to_json(&state), json!([{"c": "A", "total": 10.0, "items": []}]));
    }

    #[test]
    fn mismatched_path_length_is_rejected() {
        let state = KeyedArray::new();
        let item = Item::empty();
        let err = add_to_keyed_array(&state, &SegmentPath::new(["items"]), &KeyPath::root(), "x", &item);
        assert!(matches!(err.unwrap_err().downcast::<EngineError>().unwrap(), EngineError::MismatchedPathLength { .. }));
    }

    #[test]
    fn attach_materializes_root_adds_and_removes() {
        let src = Source::new(EngineConfig::default(), MetricsHandle::new());
        let (sink, state) = in_memory_sink();
        let step: Rc<dyn Step> = src.clone();
        Materializer::attach(&step, sink).unwrap();

        let item = Item::from_map(json!({"v": 1}).as_object().unwrap().clone());
        src.add("a", item.clone()).unwrap();
        assert_eq!(to_json_array(&state.borrow()), vec![json!({"v": 1})]);

        src.remove("a", item).unwrap();
        assert!(state.borrow().is_empty());
    }
}
