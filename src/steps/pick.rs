//! `PickByMin` / `PickByMax` (§4.8): surface the single item per parent array
//! whose comparison property is extreme, re-derived when the current winner
//! is removed.
//!
//! Ties are broken by insertion order (first-inserted wins), matching the
//! multiset semantics of [`crate::steps::minmax`]. A removed item is
//! identified by its *key*, not by shallow value equality, so two
//! structurally-identical items at the same parent are never confused with
//! each other. Unlike `Min`/`Max`/`Average`, a `Modified` is emitted only
//! when the winner itself actually changes (§4.8: "Otherwise: no emission") --
//! every add/remove is checked against the current winner rather than always
//! re-announcing the same value.

use crate::descriptor::TypeDescriptor;
use crate::event_kind::EventKind;
use crate::metrics_handle::MetricsHandle;
use crate::path::{KeyPath, SegmentPath};
use crate::step::{require_path, AddedFn, AddedRegistry, ModifiedFn, ModifiedRegistry, RemovedFn, RemovedRegistry, Step};
use crate::value::{compare_dynamic, Item};
use anyhow::Result;
use serde_json::Value;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::rc::Rc;

/// Per-parent bookkeeping (§4.8's `item_store` plus the current winner's
/// identity): every live item keyed by its own key, in arrival order, so a
/// winner-removal recomputation ties the same way a fresh evaluation would.
#[derive(Default)]
struct ParentItems {
    items: Vec<(String, Item)>,
    picked_key: Option<String>,
    /// Set once an "absent" `Modified` has been emitted for this parent with
    /// no winner selected yet, so repeated invalid-comparison adds don't
    /// re-announce the same absence (§4.8: "emit absent once").
    absent_announced: bool,
}

/// A property value usable for comparison: present and not JSON `null`.
fn comparable<'a>(item: &'a Item, comparison_property: &str) -> Option<&'a Value> {
    item.get(comparison_property).filter(|v| !v.is_null())
}

/// The first item in arrival order whose comparison value is best under
/// `maximize`, among those with a comparable value. Used only to recompute a
/// parent's winner after its current one is removed.
fn winner_by<'a>(items: &'a [(String, Item)], comparison_property: &str, maximize: bool) -> Option<(&'a str, &'a Item)> {
    items
        .iter()
        .filter_map(|(k, item)| comparable(item, comparison_property).map(|v| (k.as_str(), item, v)))
        .fold(None, |best: Option<(&str, &Item, &Value)>, (k, item, v)| match &best {
            None => Some((k, item, v)),
            Some((_, _, bv)) => {
                let ord = compare_dynamic(v, bv);
                let takes = if maximize { ord == Ordering::Greater } else { ord == Ordering::Less };
                if takes { Some((k, item, v)) } else { best }
            }
        })
        .map(|(k, item, _)| (k, item))
}

fn emit_parent_modified(
    modified: &ModifiedRegistry,
    target: &SegmentPath,
    key_path: &KeyPath,
    output_property: &str,
    value: &Value,
) -> Result<()> {
    let (out_key_path, out_parent_key) = match key_path.last() {
        Some(k) => (key_path.parent().unwrap_or_else(KeyPath::root), k.to_string()),
        None => (KeyPath::root(), String::new()),
    };
    let out_segment = target.parent().unwrap_or_else(SegmentPath::root);
    modified.dispatch(&out_segment, |h| h(&out_key_path, &out_parent_key, output_property, value))
}

fn wire_passthrough(
    upstream: &Rc<dyn Step>,
    descriptor: &TypeDescriptor,
    target: &SegmentPath,
    added: &Rc<AddedRegistry>,
    removed: &Rc<RemovedRegistry>,
    modified: &Rc<ModifiedRegistry>,
) -> Result<()> {
    for path in descriptor.segment_paths() {
        if path != *target {
            let a = added.clone();
            let p = path.clone();
            upstream.on_added(&path, Box::new(move |key_path, key, item| a.dispatch(&p, |h| h(key_path, key, item))))?;

            let r = removed.clone();
            let p = path.clone();
            upstream.on_removed(&path, Box::new(move |key_path, key, item| r.dispatch(&p, |h| h(key_path, key, item))))?;
        }

        let m = modified.clone();
        let p = path.clone();
        upstream.on_modified(
            &path,
            Box::new(move |key_path, parent_key, name, value| m.dispatch(&p, |h| h(key_path, parent_key, name, value))),
        )?;
    }
    Ok(())
}

/// Shared machinery behind both [`PickByMin`] and [`PickByMax`], which differ
/// only in `maximize`. Kept private: the two public types exist so the
/// builder's `pick_by_min`/`pick_by_max` calls read the same way `min`/`max`
/// do, rather than a single type parameterized by a comparison direction.
struct PickByInner {
    descriptor: TypeDescriptor,
    added: Rc<AddedRegistry>,
    removed: Rc<RemovedRegistry>,
    modified: Rc<ModifiedRegistry>,
}

impl PickByInner {
    fn new(
        upstream: Rc<dyn Step>,
        target: SegmentPath,
        output_property: String,
        comparison_property: String,
        maximize: bool,
        metrics: MetricsHandle,
        label: &'static str,
    ) -> Result<Rc<Self>> {
        let descriptor = upstream.type_descriptor();
        require_path(&descriptor, &target)?;

        let this = Rc::new(Self {
            descriptor: descriptor.clone(),
            added: AddedRegistry::new(),
            removed: RemovedRegistry::new(),
            modified: ModifiedRegistry::new(),
        });
        wire_passthrough(&upstream, &descriptor, &target, &this.added, &this.removed, &this.modified)?;

        let state: Rc<RefCell<HashMap<String, ParentItems>>> = Rc::new(RefCell::new(HashMap::new()));

        let added = this.added.clone();
        let modified = this.modified.clone();
        let t = target.clone();
        let out = output_property.clone();
        let cmp_prop = comparison_property.clone();
        let st = state.clone();
        let m = metrics.clone();
        upstream.on_added(
            &target,
            Box::new(move |key_path, key, item| {
                added.dispatch(&t, |h| h(key_path, key, item))?;
                let parent = key_path.join();
                let mut st = st.borrow_mut();
                let entry = st.entry(parent).or_default();
                entry.items.push((key.to_string(), item.clone()));

                let emission = match comparable(item, &cmp_prop) {
                    Some(v) => {
                        let takes_over = match &entry.picked_key {
                            None => true,
                            Some(pk) => {
                                let current_value = entry
                                    .items
                                    .iter()
                                    .find(|(k, _)| k == pk)
                                    .and_then(|(_, it)| comparable(it, &cmp_prop));
                                match current_value {
                                    Some(pv) => {
                                        let ord = compare_dynamic(v, pv);
                                        if maximize { ord == Ordering::Greater } else { ord == Ordering::Less }
                                    }
                                    None => true,
                                }
                            }
                        };
                        if takes_over {
                            entry.picked_key = Some(key.to_string());
                            entry.absent_announced = false;
                            Some(serde_json::to_value(item).unwrap_or(Value::Null))
                        } else {
                            None
                        }
                    }
                    None => {
                        if entry.picked_key.is_none() && !entry.absent_announced {
                            entry.absent_announced = true;
                            Some(Value::Null)
                        } else {
                            None
                        }
                    }
                };
                drop(st);

                match emission {
                    Some(value) => {
                        m.record_emitted(label, EventKind::Added);
                        emit_parent_modified(&modified, &t, key_path, &out, &value)
                    }
                    None => Ok(()),
                }
            }),
        )?;

        let removed = this.removed.clone();
        let modified = this.modified.clone();
        let t = target.clone();
        let out = output_property;
        let cmp_prop = comparison_property;
        let st = state;
        let m = metrics;
        upstream.on_removed(
            &target,
            Box::new(move |key_path, key, item| {
                removed.dispatch(&t, |h| h(key_path, key, item))?;
                let parent = key_path.join();
                let mut st = st.borrow_mut();
                let entry = st.entry(parent.clone()).or_default();
                entry.items.retain(|(k, _)| k != key);

                let was_winner = entry.picked_key.as_deref() == Some(key);
                let emission = if was_winner {
                    match winner_by(&entry.items, &cmp_prop, maximize) {
                        Some((new_key, new_item)) => {
                            entry.picked_key = Some(new_key.to_string());
                            entry.absent_announced = false;
                            Some(serde_json::to_value(new_item).unwrap_or(Value::Null))
                        }
                        None => {
                            entry.picked_key = None;
                            entry.absent_announced = true;
                            Some(Value::Null)
                        }
                    }
                } else {
                    None
                };

                let is_empty = entry.items.is_empty();
                if is_empty {
                    st.remove(&parent);
                }
                drop(st);

                match emission {
                    Some(value) => {
                        m.record_emitted(label, EventKind::Removed);
                        emit_parent_modified(&modified, &t, key_path, &out, &value)
                    }
                    None => Ok(()),
                }
            }),
        )?;

        Ok(this)
    }
}

impl Step for PickByInner {
    fn type_descriptor(&self) -> TypeDescriptor {
        self.descriptor.clone()
    }

    fn on_added(&self, path: &SegmentPath, handler: Box<AddedFn>) -> Result<()> {
        require_path(&self.descriptor, path)?;
        self.added.subscribe(path.clone(), handler);
        Ok(())
    }

    fn on_removed(&self, path: &SegmentPath, handler: Box<RemovedFn>) -> Result<()> {
        require_path(&self.descriptor, path)?;
        self.removed.subscribe(path.clone(), handler);
        Ok(())
    }

    fn on_modified(&self, path: &SegmentPath, handler: Box<ModifiedFn>) -> Result<()> {
        require_path(&self.descriptor, path)?;
        self.modified.subscribe(path.clone(), handler);
        Ok(())
    }
}

/// `pick_by_min(array, comparison_property) -> output`: the item whose
/// `comparison_property` is smallest under [`compare_dynamic`].
pub struct PickByMin(Rc<PickByInner>);

impl PickByMin {
    pub fn new(
        upstream: Rc<dyn Step>,
        target: SegmentPath,
        output_property: String,
        comparison_property: String,
        metrics: MetricsHandle,
    ) -> Result<Rc<Self>> {
        let inner = PickByInner::new(upstream, target, output_property, comparison_property, false, metrics, "pick_by_min")?;
        Ok(Rc::new(Self(inner)))
    }
}

impl Step for PickByMin {
    fn type_descriptor(&self) -> TypeDescriptor {
        self.0.type_descriptor()
    }

    fn on_added(&self, path: &SegmentPath, handler: Box<AddedFn>) -> Result<()> {
        self.0.on_added(path, handler)
    }

    fn on_removed(&self, path: &SegmentPath, handler: Box<RemovedFn>) -> Result<()> {
        self.0.on_removed(path, handler)
    }

    fn on_modified(&self, path: &SegmentPath, handler: Box<ModifiedFn>) -> Result<()> {
        self.0.on_modified(path, handler)
    }
}

/// `pick_by_max(array, comparison_property) -> output`: the item whose
/// `comparison_property` is largest under [`compare_dynamic`].
pub struct PickByMax(Rc<PickByInner>);

impl PickByMax {
    pub fn new(
        upstream: Rc<dyn Step>,
        target: SegmentPath,
        output_property: String,
        comparison_property: String,
        metrics: MetricsHandle,
    ) -> Result<Rc<Self>> {
        let inner = PickByInner::new(upstream, target, output_property, comparison_property, true, metrics, "pick_by_max")?;
        Ok(Rc::new(Self(inner)))
    }
}

impl Step for PickByMax {
    fn type_descriptor(&self) -> TypeDescriptor {
        self.0.type_descriptor()
    }

    fn on_added(&self, path: &SegmentPath, handler: Box<AddedFn>) -> Result<()> {
        self.0.on_added(path, handler)
    }

    fn on_removed(&self, path: &SegmentPath, handler: Box<RemovedFn>) -> Result<()> {
        self.0.on_removed(path, handler)
    }

    fn on_modified(&self, path: &SegmentPath, handler: Box<ModifiedFn>) -> Result<()> {
        self.0.on_modified(path, handler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::source::Source;
    use serde_json::json;
    use std::cell::RefCell as StdRefCell;

    fn collect_modified(step: &Rc<dyn Step>, path: &SegmentPath) -> Rc<StdRefCell<Vec<Value>>> {
        let seen = Rc::new(StdRefCell::new(Vec::new()));
        let seen2 = seen.clone();
        step.on_modified(
            path,
            Box::new(move |_kp, _pk, _name, value| {
                seen2.borrow_mut().push(value.clone());
                Ok(())
            }),
        )
        .unwrap();
        seen
    }

    #[test]
    fn pick_by_min_recomputes_on_winner_removal() {
        let src = Source::new(EngineConfig::default(), MetricsHandle::new());
        let step: Rc<dyn Step> =
            PickByMin::new(src.clone(), SegmentPath::root(), "cheapest".into(), "price".into(), MetricsHandle::new()).unwrap();
        let seen = collect_modified(&step, &SegmentPath::root());

        let a = Item::from_map(json!({"name": "a", "price": 50}).as_object().unwrap().clone());
        let b = Item::from_map(json!({"name": "b", "price": 10}).as_object().unwrap().clone());
        let c = Item::from_map(json!({"name": "c", "price": 30}).as_object().unwrap().clone());
        src.add("a", a.clone()).unwrap();
        src.add("b", b.clone()).unwrap();
        src.add("c", c).unwrap();
        assert_eq!(seen.borrow().last().unwrap()["name"], json!("b"));

        src.remove("b", b).unwrap();
        assert_eq!(seen.borrow().last().unwrap()["name"], json!("c"));
    }

    #[test]
    fn pick_by_max_ties_prefer_first_inserted() {
        let src = Source::new(EngineConfig::default(), MetricsHandle::new());
        let step: Rc<dyn Step> =
            PickByMax::new(src.clone(), SegmentPath::root(), "winner".into(), "score".into(), MetricsHandle::new()).unwrap();
        let seen = collect_modified(&step, &SegmentPath::root());

        let a = Item::from_map(json!({"name": "a", "score": 5}).as_object().unwrap().clone());
        let b = Item::from_map(json!({"name": "b", "score": 5}).as_object().unwrap().clone());
        src.add("a", a).unwrap();
        src.add("b", b).unwrap();
        assert_eq!(seen.borrow().last().unwrap()["name"], json!("a"));
    }

    #[test]
    fn no_modified_emitted_when_new_item_does_not_beat_current_winner() {
        let src = Source::new(EngineConfig::default(), MetricsHandle::new());
        let step: Rc<dyn Step> =
            PickByMin::new(src.clone(), SegmentPath::root(), "cheapest".into(), "price".into(), MetricsHandle::new()).unwrap();
        let seen = collect_modified(&step, &SegmentPath::root());

        let a = Item::from_map(json!({"name": "a", "price": 10}).as_object().unwrap().clone());
        let b = Item::from_map(json!({"name": "b", "price": 20}).as_object().unwrap().clone());
        src.add("a", a).unwrap();
        assert_eq!(seen.borrow().len(), 1);
        // b doesn't beat a's price, so the step must not re-announce a.
        src.add("b", b).unwrap();
        assert_eq!(seen.borrow().len(), 1);
    }

    #[test]
    fn removing_a_non_winner_emits_nothing() {
        let src = Source::new(EngineConfig::default(), MetricsHandle::new());
        let step: Rc<dyn Step> =
            PickByMin::new(src.clone(), SegmentPath::root(), "cheapest".into(), "price".into(), MetricsHandle::new()).unwrap();
        let seen = collect_modified(&step, &SegmentPath::root());

        let a = Item::from_map(json!({"name": "a", "price": 10}).as_object().unwrap().clone());
        let b = Item::from_map(json!({"name": "b", "price": 20}).as_object().unwrap().clone());
        src.add("a", a).unwrap();
        src.add("b", b.clone()).unwrap();
        assert_eq!(seen.borrow().len(), 1);

        src.remove("b", b).unwrap();
        assert_eq!(seen.borrow().len(), 1);
    }
}
