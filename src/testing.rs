//! Test tooling (§4.16): a thin pipeline wrapper, state-assertion helpers,
//! an event-script replay builder, and a couple of canned item-stream
//! fixtures, mirroring the shape of this codebase's ancestry's own
//! `testing` module (assertions/builders/debug/fixtures) scaled to this
//! engine's push-based, materialized-state world.

use crate::builder::{create_pipeline, Builder};
use crate::materializer::{keyed_array_to_json, KeyedArray, SinkFn, Transform};
use crate::value::Item;
use serde_json::Value;
use std::rc::Rc;

/// A thin wrapper around [`Builder`] exposing a couple of introspection
/// helpers useful from a test -- how many arrays the descriptor built so far
/// declares, and a human-readable dump of its shape.
pub struct TestPipeline(Builder);

impl TestPipeline {
    #[must_use]
    pub fn new() -> Self {
        Self(create_pipeline())
    }

    /// The number of nested arrays declared by the descriptor built so far
    /// (root excluded).
    #[must_use]
    pub fn array_count(&self) -> usize {
        self.0.type_descriptor().segment_paths().len() - 1
    }

    /// Print the descriptor's segment paths, one per line, for debugging a
    /// pipeline under construction.
    pub fn debug_print_descriptor(&self) {
        println!("Pipeline descriptor:");
        for path in self.0.type_descriptor().segment_paths() {
            println!("  {path}");
        }
    }
}

impl Default for TestPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestPipeline {
    type Target = Builder;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Deep-compare materialized state against an expected `Item`-shaped JSON
/// literal. Panics with both sides rendered if they differ.
pub fn assert_state_eq(actual: &KeyedArray, expected: Value) {
    let rendered = keyed_array_to_json(actual);
    assert_eq!(rendered, expected, "materialized state did not match expected shape");
}

/// Assert the top-level materialized array has exactly `expected_len` entries.
pub fn assert_array_len(actual: &KeyedArray, expected_len: usize) {
    assert_eq!(actual.len(), expected_len, "expected {expected_len} entries, found {}", actual.len());
}

/// Assert the entry keyed `key` has property `name` equal to `expected`.
pub fn assert_property_eq(actual: &KeyedArray, key: &str, name: &str, expected: &Value) {
    let entry = actual.iter().find(|(k, _)| k == key).unwrap_or_else(|| panic!("no entry keyed {key:?} in materialized state"));
    assert_eq!(entry.1.properties.get(name), Some(expected), "property {name:?} on entry {key:?} did not match");
}

enum ScriptEvent {
    Add { key: String, item: Item },
    Remove { key: String, item: Item },
}

/// A fluent builder for a sequence of `add`/`remove` calls, replayed against
/// a [`crate::source::Source`] in one call rather than spelling out each one
/// at the test call site.
#[derive(Default)]
pub struct EventScript {
    events: Vec<ScriptEvent>,
}

impl EventScript {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn add(mut self, key: impl Into<String>, item: Item) -> Self {
        self.events.push(ScriptEvent::Add { key: key.into(), item });
        self
    }

    #[must_use]
    pub fn remove(mut self, key: impl Into<String>, item: Item) -> Self {
        self.events.push(ScriptEvent::Remove { key: key.into(), item });
        self
    }

    /// Replay every event in order against `source`.
    pub fn replay(self, source: &crate::source::Source) -> anyhow::Result<()> {
        for event in self.events {
            match event {
                ScriptEvent::Add { key, item } => source.add(key, item)?,
                ScriptEvent::Remove { key, item } => source.remove(key, item)?,
            }
        }
        Ok(())
    }
}

/// Wrap a [`SinkFn`] so every transform prints the state before and after
/// it runs -- handy when chasing down exactly which event diverged from
/// expectations in a failing incremental test.
#[must_use]
pub fn debug_sink(inner: Rc<SinkFn>, label: &'static str) -> Rc<SinkFn> {
    Rc::new(move |transform: Transform| {
        inner(Box::new(move |state: KeyedArray| {
            let before = keyed_array_to_json(&state);
            let next = transform(state)?;
            println!("[{label}] {before} -> {}", keyed_array_to_json(&next));
            Ok(next)
        }))
    })
}

fn item(fields: Value) -> Item {
    Item::from_map(fields.as_object().expect("fixture literal must be a JSON object").clone())
}

/// Small canned stream of venue items grouped by state/city, mirroring the
/// nested group/aggregate scenario worked through in the design doc: four
/// venues across two Texas cities and one Oklahoma city.
#[must_use]
pub fn cities_and_venues() -> Vec<(String, Item)> {
    vec![
        ("v1".to_string(), item(serde_json::json!({"state": "TX", "city": "Dallas", "capacity": 20000}))),
        ("v2".to_string(), item(serde_json::json!({"state": "TX", "city": "Dallas", "capacity": 50000}))),
        ("v3".to_string(), item(serde_json::json!({"state": "TX", "city": "Austin", "capacity": 40000}))),
        ("v4".to_string(), item(serde_json::json!({"state": "OK", "city": "Tulsa", "capacity": 18000}))),
    ]
}

/// Small canned stream of priced items grouped by category, for exercising
/// min/max/average/pick-by scenarios.
#[must_use]
pub fn categorized_prices() -> Vec<(String, Item)> {
    vec![
        ("p1".to_string(), item(serde_json::json!({"category": "produce", "price": 1.5}))),
        ("p2".to_string(), item(serde_json::json!({"category": "produce", "price": 2.25}))),
        ("p3".to_string(), item(serde_json::json!({"category": "dairy", "price": 3.0}))),
        ("p4".to_string(), item(serde_json::json!({"category": "dairy", "price": null}))),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::materializer::to_json_array;

    #[test]
    fn test_pipeline_reports_array_count() {
        let p = TestPipeline::new();
        assert_eq!(p.array_count(), 0);
    }

    #[test]
    fn event_script_replays_adds_and_removes() {
        let (source, state) = create_pipeline().build_in_memory().unwrap();
        let a = item(serde_json::json!({"v": 1}));
        EventScript::new().add("a", a.clone()).replay(&source).unwrap();
        assert_eq!(to_json_array(&state.borrow()).len(), 1);
        EventScript::new().remove("a", a).replay(&source).unwrap();
        assert!(state.borrow().is_empty());
    }

    #[test]
    fn fixtures_are_well_formed() {
        assert_eq!(cities_and_venues().len(), 4);
        assert_eq!(categorized_prices().len(), 4);
    }

    #[test]
    fn assertion_helpers_compare_materialized_state() {
        let (source, state) = create_pipeline().group_by(["city"], "venues").unwrap().build_in_memory().unwrap();
        for (key, venue) in cities_and_venues().into_iter().take(2) {
            source.add(key, venue).unwrap();
        }
        let borrowed = state.borrow();
        assert_array_len(&borrowed, 1);
        let (dallas_key, _) = borrowed.iter().find(|(_, m)| m.properties.get("city") == Some(&Value::String("Dallas".into()))).unwrap();
        assert_property_eq(&borrowed, dallas_key, "city", &serde_json::json!("Dallas"));
    }
}
