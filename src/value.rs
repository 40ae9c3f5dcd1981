//! The dynamic property bag that flows through the pipeline.
//!
//! [`Item`] is a thin, ordered wrapper around [`serde_json::Map`]. Items are
//! immutable once emitted (§3 of the design doc): every transformation that
//! changes an item's shape (`DefineProperty`, `DropProperty`, `GroupBy`)
//! produces a *new* `Item` rather than mutating one in place.
//!
//! `serde_json::Map`'s default (non-`preserve_order`) backing store is a
//! `BTreeMap`, so iterating an `Item`'s properties always yields them in a
//! canonical, insertion-order-independent sequence -- exactly what grouping
//! key canonicalization needs.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// An immutable, ordered property bag.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Item(Map<String, Value>);

impl Item {
    /// The empty item.
    #[must_use]
    pub fn empty() -> Self {
        Self(Map::new())
    }

    /// Wrap an existing JSON object map.
    #[must_use]
    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Convert any `Serialize` value into an `Item`. Fails if `value` does not
    /// serialize to a JSON object.
    pub fn from_serializable<T: Serialize>(value: &T) -> anyhow::Result<Self> {
        match serde_json::to_value(value)? {
            Value::Object(map) => Ok(Self(map)),
            other => anyhow::bail!("item must serialize to a JSON object, got {other}"),
        }
    }

    #[must_use]
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Read a numeric property, treating missing/null/non-numeric as absent.
    #[must_use]
    pub fn get_f64(&self, name: &str) -> Option<f64> {
        match self.0.get(name) {
            Some(Value::Number(n)) => n.as_f64(),
            _ => None,
        }
    }

    /// Insert or overwrite a property, returning a new `Item`.
    #[must_use]
    pub fn with_property(&self, name: impl Into<String>, value: Value) -> Self {
        let mut m = self.0.clone();
        m.insert(name.into(), value);
        Self(m)
    }

    /// Return a new `Item` with `name` stripped, if present.
    #[must_use]
    pub fn without_property(&self, name: &str) -> Self {
        let mut m = self.0.clone();
        m.remove(name);
        Self(m)
    }

    /// Return a new `Item` with every name in `names` stripped.
    #[must_use]
    pub fn without_properties<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Self {
        let drop: BTreeSet<&str> = names.into_iter().collect();
        let m: Map<String, Value> = self
            .0
            .iter()
            .filter(|(k, _)| !drop.contains(k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Self(m)
    }

    /// Extract the sub-dictionary of exactly the named properties, in the
    /// order given (the resulting map's own iteration order is canonical
    /// regardless, since `serde_json::Map` is BTreeMap-backed).
    #[must_use]
    pub fn sub_dict<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Self {
        let mut m = Map::new();
        for name in names {
            // Absent properties canonicalize to `null` so two items missing
            // the same grouping property still hash identically.
            m.insert(name.to_string(), self.0.get(name).cloned().unwrap_or(Value::Null));
        }
        Self(m)
    }
}

impl From<Map<String, Value>> for Item {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// A total order over `Value`'s dynamic type, used by the pick-by-min/max
/// steps (§4.8): numeric when both sides are numeric, else lexicographic on
/// strings, else lexicographic on each side's `Display` rendering. Neither
/// side being comparable this way (e.g. two objects) falls back to equal,
/// since the pick-by steps only ever feed this a scalar comparison property.
#[must_use]
pub fn compare_dynamic(a: &Value, b: &Value) -> std::cmp::Ordering {
    use crate::utils::OrdF64;
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => OrdF64::new(x).cmp(&OrdF64::new(y)),
        _ => match (a.as_str(), b.as_str()) {
            (Some(x), Some(y)) => x.cmp(y),
            _ => a.to_string().cmp(&b.to_string()),
        },
    }
}

impl Serialize for Item {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.0.serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sub_dict_is_order_independent() {
        let item = Item::from_map(json!({"c": "A", "v": 10, "extra": true}).as_object().unwrap().clone());
        let a = item.sub_dict(["c"]);
        let b = item.sub_dict(["c"]);
        assert_eq!(a, b);
        assert_eq!(a.get("c"), Some(&json!("A")));
    }

    #[test]
    fn without_properties_drops_named_keys() {
        let item = Item::from_map(json!({"c": "A", "v": 10}).as_object().unwrap().clone());
        let stripped = item.without_properties(["c"]);
        assert_eq!(stripped.get("c"), None);
        assert_eq!(stripped.get("v"), Some(&json!(10)));
    }

    #[test]
    fn get_f64_treats_non_numeric_as_absent() {
        let item = Item::from_map(json!({"v": null, "s": "x"}).as_object().unwrap().clone());
        assert_eq!(item.get_f64("v"), None);
        assert_eq!(item.get_f64("s"), None);
        assert_eq!(item.get_f64("missing"), None);
    }
}
