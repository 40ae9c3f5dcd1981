//! Numeric per-parent aggregates (§4.7): `Min`, `Max`, `Average`.
//!
//! All three share the wiring shape of [`crate::steps::aggregate::CommutativeAggregate`]
//! -- observe `Added`/`Removed` at a target array, forward them unchanged,
//! and emit `Modified` at the parent's segment path -- but read a single
//! numeric source property instead of taking caller-supplied `add`/`subtract`
//! closures, and treat a missing/non-numeric value as "skip this item"
//! rather than an error (§4.7: "Null/undefined/non-numeric values of `q` are
//! skipped").

use crate::descriptor::TypeDescriptor;
use crate::event_kind::EventKind;
use crate::metrics_handle::MetricsHandle;
use crate::path::{KeyPath, SegmentPath};
use crate::step::{require_path, AddedFn, AddedRegistry, ModifiedFn, ModifiedRegistry, RemovedFn, RemovedRegistry, Step};
use crate::value::Item;
use anyhow::Result;
use serde_json::{json, Value};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

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

/// Wire every non-target path as a transparent passthrough. Returns the three
/// registries the target-path handling (specific to each aggregate) should
/// dispatch into directly.
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

/// `min(array, property) -> output`: the smallest numeric value of `property`
/// currently present across the array's live items, or absent.
pub struct Min {
    descriptor: TypeDescriptor,
    added: Rc<AddedRegistry>,
    removed: Rc<RemovedRegistry>,
    modified: Rc<ModifiedRegistry>,
}

impl Min {
    pub fn new(
        upstream: Rc<dyn Step>,
        target: SegmentPath,
        output_property: String,
        source_property: String,
        metrics: MetricsHandle,
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

        let values: Rc<RefCell<HashMap<String, Vec<f64>>>> = Rc::new(RefCell::new(HashMap::new()));
        const LABEL: &str = "min";

        let added = this.added.clone();
        let modified = this.modified.clone();
        let t = target.clone();
        let out = output_property.clone();
        let src = source_property.clone();
        let vals = values.clone();
        let m = metrics.clone();
        upstream.on_added(
            &target,
            Box::new(move |key_path, key, item| {
                added.dispatch(&t, |h| h(key_path, key, item))?;
                let Some(v) = item.get_f64(&src) else { return Ok(()) };
                let parent = key_path.join();
                vals.borrow_mut().entry(parent.clone()).or_default().push(v);
                let value = vals.borrow()[&parent].iter().copied().fold(f64::INFINITY, f64::min);
                m.record_emitted(LABEL, EventKind::Added);
                emit_parent_modified(&modified, &t, key_path, &out, &json!(value))
            }),
        )?;

        let removed = this.removed.clone();
        let modified = this.modified.clone();
        let t = target.clone();
        let out = output_property;
        let src = source_property;
        let vals = values;
        let m = metrics;
        upstream.on_removed(
            &target,
            Box::new(move |key_path, key, item| {
                removed.dispatch(&t, |h| h(key_path, key, item))?;
                let Some(v) = item.get_f64(&src) else { return Ok(()) };
                let parent = key_path.join();
                let mut vals = vals.borrow_mut();
                let list = vals.entry(parent.clone()).or_default();
                if let Some(pos) = list.iter().position(|x| *x == v) {
                    list.remove(pos);
                }
                let out_value = if list.is_empty() { Value::Null } else { json!(list.iter().copied().fold(f64::INFINITY, f64::min)) };
                drop(vals);
                m.record_emitted(LABEL, EventKind::Removed);
                emit_parent_modified(&modified, &t, key_path, &out, &out_value)
            }),
        )?;

        Ok(this)
    }
}

impl Step for Min {
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

/// `max(array, property) -> output`: the largest numeric value of `property`.
pub struct Max {
    descriptor: TypeDescriptor,
    added: Rc<AddedRegistry>,
    removed: Rc<RemovedRegistry>,
    modified: Rc<ModifiedRegistry>,
}

impl Max {
    pub fn new(
        upstream: Rc<dyn Step>,
        target: SegmentPath,
        output_property: String,
        source_property: String,
        metrics: MetricsHandle,
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

        let values: Rc<RefCell<HashMap<String, Vec<f64>>>> = Rc::new(RefCell::new(HashMap::new()));
        const LABEL: &str = "max";

        let added = this.added.clone();
        let modified = this.modified.clone();
        let t = target.clone();
        let out = output_property.clone();
        let src = source_property.clone();
        let vals = values.clone();
        let m = metrics.clone();
        upstream.on_added(
            &target,
            Box::new(move |key_path, key, item| {
                added.dispatch(&t, |h| h(key_path, key, item))?;
                let Some(v) = item.get_f64(&src) else { return Ok(()) };
                let parent = key_path.join();
                vals.borrow_mut().entry(parent.clone()).or_default().push(v);
                let value = vals.borrow()[&parent].iter().copied().fold(f64::NEG_INFINITY, f64::max);
                m.record_emitted(LABEL, EventKind::Added);
                emit_parent_modified(&modified, &t, key_path, &out, &json!(value))
            }),
        )?;

        let removed = this.removed.clone();
        let modified = this.modified.clone();
        let t = target.clone();
        let out = output_property;
        let src = source_property;
        let vals = values;
        let m = metrics;
        upstream.on_removed(
            &target,
            Box::new(move |key_path, key, item| {
                removed.dispatch(&t, |h| h(key_path, key, item))?;
                let Some(v) = item.get_f64(&src) else { return Ok(()) };
                let parent = key_path.join();
                let mut vals = vals.borrow_mut();
                let list = vals.entry(parent.clone()).or_default();
                if let Some(pos) = list.iter().position(|x| *x == v) {
                    list.remove(pos);
                }
                let out_value = if list.is_empty() { Value::Null } else { json!(list.iter().copied().fold(f64::NEG_INFINITY, f64::max)) };
                drop(vals);
                m.record_emitted(LABEL, EventKind::Removed);
                emit_parent_modified(&modified, &t, key_path, &out, &out_value)
            }),
        )?;

        Ok(this)
    }
}

impl Step for Max {
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

/// `average(array, property) -> output`: the mean of `property` over the
/// array's live items with a numeric value, or absent if none do.
pub struct Average {
    descriptor: TypeDescriptor,
    added: Rc<AddedRegistry>,
    removed: Rc<RemovedRegistry>,
    modified: Rc<ModifiedRegistry>,
}

impl Average {
    pub fn new(
        upstream: Rc<dyn Step>,
        target: SegmentPath,
        output_property: String,
        source_property: String,
        metrics: MetricsHandle,
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

        let sums: Rc<RefCell<HashMap<String, (f64, u64)>>> = Rc::new(RefCell::new(HashMap::new()));
        const LABEL: &str = "average";

        let added = this.added.clone();
        let modified = this.modified.clone();
        let t = target.clone();
        let out = output_property.clone();
        let src = source_property.clone();
        let state = sums.clone();
        let m = metrics.clone();
        upstream.on_added(
            &target,
            Box::new(move |key_path, key, item| {
                added.dispatch(&t, |h| h(key_path, key, item))?;
                let Some(v) = item.get_f64(&src) else { return Ok(()) };
                let parent = key_path.join();
                let mut state = state.borrow_mut();
                let entry = state.entry(parent).or_insert((0.0, 0));
                entry.0 += v;
                entry.1 += 1;
                let avg = entry.0 / entry.1 as f64;
                drop(state);
                m.record_emitted(LABEL, EventKind::Added);
                emit_parent_modified(&modified, &t, key_path, &out, &json!(avg))
            }),
        )?;

        let removed = this.removed.clone();
        let modified = this.modified.clone();
        let t = target.clone();
        let out = output_property;
        let src = source_property;
        let state = sums;
        let m = metrics;
        upstream.on_removed(
            &target,
            Box::new(move |key_path, key, item| {
                removed.dispatch(&t, |h| h(key_path, key, item))?;
                let Some(v) = item.get_f64(&src) else { return Ok(()) };
                let parent = key_path.join();
                let mut state = state.borrow_mut();
                let entry = state.entry(parent.clone()).or_insert((0.0, 0));
                entry.0 -= v;
                entry.1 = entry.1.saturating_sub(1);
                let out_value = if entry.1 == 0 {
                    state.remove(&parent);
                    Value::Null
                } else {
                    json!(entry.0 / entry.1 as f64)
                };
                drop(state);
                m.record_emitted(LABEL, EventKind::Removed);
                emit_parent_modified(&modified, &t, key_path, &out, &out_value)
            }),
        )?;

        Ok(this)
    }
}

impl Step for Average {
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
    fn min_tracks_smallest_live_value() {
        let src = Source::new(EngineConfig::default(), MetricsHandle::new());
        let step: Rc<dyn Step> = Min::new(
            src.clone(),
            SegmentPath::root(),
            "cheapest".into(),
            "price".into(),
            MetricsHandle::new(),
        )
        .unwrap();
        let seen = collect_modified(&step, &SegmentPath::root());

        let a = Item::from_map(json!({"price": 100}).as_object().unwrap().clone());
        let b = Item::from_map(json!({"price": 50}).as_object().unwrap().clone());
        let c = Item::from_map(json!({"price": 75}).as_object().unwrap().clone());
        src.add("a", a.clone()).unwrap();
        src.add("b", b.clone()).unwrap();
        src.add("c", c.clone()).unwrap();
        assert_eq!(*seen.borrow().last().unwrap(), json!(50.0));

        src.remove("b", b).unwrap();
        assert_eq!(*seen.borrow().last().unwrap(), json!(75.0));

        src.remove("c", c).unwrap();
        assert_eq!(*seen.borrow().last().unwrap(), json!(100.0));

        src.remove("a", a).unwrap();
        assert_eq!(*seen.borrow().last().unwrap(), Value::Null);
    }

    #[test]
    fn average_excludes_nulls_and_non_numeric() {
        let src = Source::new(EngineConfig::default(), MetricsHandle::new());
        let step: Rc<dyn Step> = Average::new(
            src.clone(),
            SegmentPath::root(),
            "avg".into(),
            "v".into(),
            MetricsHandle::new(),
        )
        .unwrap();
        let seen = collect_modified(&step, &SegmentPath::root());

        src.add("a", Item::from_map(json!({"v": null}).as_object().unwrap().clone())).unwrap();
        src.add("b", Item::from_map(json!({}).as_object().unwrap().clone())).unwrap();
        src.add("c", Item::from_map(json!({"v": 100}).as_object().unwrap().clone())).unwrap();
        src.add("d", Item::from_map(json!({"v": 200}).as_object().unwrap().clone())).unwrap();

        assert_eq!(*seen.borrow().last().unwrap(), json!(150.0));
    }
}
