//! `DefineProperty` (§4.2): derive a new property from the item at `scope`.

use crate::descriptor::TypeDescriptor;
use crate::event_kind::EventKind;
use crate::metrics_handle::MetricsHandle;
use crate::path::SegmentPath;
use crate::step::{require_path, AddedFn, AddedRegistry, ModifiedFn, ModifiedRegistry, RemovedFn, RemovedRegistry, Step};
use anyhow::Result;
use serde_json::Value;
use std::rc::Rc;

const LABEL: &str = "define_property";

pub struct DefineProperty {
    descriptor: TypeDescriptor,
    added: Rc<AddedRegistry>,
    removed: Rc<RemovedRegistry>,
    modified: Rc<ModifiedRegistry>,
}

impl DefineProperty {
    pub fn new(
        upstream: Rc<dyn Step>,
        scope: SegmentPath,
        property_name: String,
        compute: Rc<dyn Fn(&crate::value::Item) -> Value>,
        metrics: MetricsHandle,
    ) -> Result<Rc<Self>> {
        let descriptor = upstream.type_descriptor();
        require_path(&descriptor, &scope)?;

        let this = Rc::new(Self {
            descriptor: descriptor.clone(),
            added: AddedRegistry::new(),
            removed: RemovedRegistry::new(),
            modified: ModifiedRegistry::new(),
        });

        for path in descriptor.segment_paths() {
            let added = this.added.clone();
            let at_scope = path == scope;
            let name = property_name.clone();
            let compute = compute.clone();
            let metrics_added = metrics.clone();
            let path_for_added = path.clone();
            upstream.on_added(
                &path,
                Box::new(move |key_path, key, item| {
                    if at_scope {
                        let value = compute(item);
                        let new_item = item.with_property(name.clone(), value);
                        metrics_added.record_emitted(LABEL, EventKind::Added);
                        added.dispatch(&path_for_added, |h| h(key_path, key, &new_item))
                    } else {
                        added.dispatch(&path_for_added, |h| h(key_path, key, item))
                    }
                }),
            )?;

            let removed = this.removed.clone();
            let path_for_removed = path.clone();
            upstream.on_removed(
                &path,
                Box::new(move |key_path, key, item| removed.dispatch(&path_for_removed, |h| h(key_path, key, item))),
            )?;

            let modified = this.modified.clone();
            let path_for_modified = path.clone();
            upstream.on_modified(
                &path,
                Box::new(move |key_path, parent_key, name, value| {
                    modified.dispatch(&path_for_modified, |h| h(key_path, parent_key, name, value))
                }),
            )?;
        }

        Ok(this)
    }
}

impl Step for DefineProperty {
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
    use crate::path::KeyPath;
    use crate::source::Source;
    use crate::value::Item;
    use serde_json::json;
    use std::cell::RefCell;

    #[test]
    fn derives_property_at_scope() {
        let src = Source::new(EngineConfig::default(), MetricsHandle::new());
        let step = DefineProperty::new(
            src.clone(),
            SegmentPath::root(),
            "doubled".to_string(),
            Rc::new(|item: &Item| json!(item.get_f64("v").unwrap_or(0.0) * 2.0)),
            MetricsHandle::new(),
        )
        .unwrap();

        let seen = Rc::new(RefCell::new(None));
        let seen2 = seen.clone();
        step.on_added(
            &SegmentPath::root(),
            Box::new(move |_k, _key, item| {
                *seen2.borrow_mut() = Some(item.clone());
                Ok(())
            }),
        )
        .unwrap();

        let item = Item::from_map(json!({"v": 5}).as_object().unwrap().clone());
        src.add("i1", item).unwrap();
        let out = seen.borrow().clone().unwrap();
        assert_eq!(out.get("doubled"), Some(&json!(10.0)));
    }

    #[test]
    fn subscribing_unknown_path_fails() {
        let src = Source::new(EngineConfig::default(), MetricsHandle::new());
        let step = DefineProperty::new(
            src,
            SegmentPath::root(),
            "x".to_string(),
            Rc::new(|_: &Item| json!(null)),
            MetricsHandle::new(),
        )
        .unwrap();
        assert!(step.on_added(&SegmentPath::new(["nope"]), Box::new(|_: &KeyPath, _: &str, _: &Item| Ok(()))).is_err());
    }
}
