//! `DropProperty` (§4.3): strip a named property from the item at `scope`.
//!
//! Per the grounding ledger's resolution of the spec's drop-array/drop-property
//! synonymy (see `SPEC_FULL.md` §9 and `DESIGN.md`), this step rejects array-
//! typed targets at construction: dropping a nested array belongs to
//! [`crate::steps::drop_array::DropArray`], which also prunes the descriptor
//! and suppresses upstream subscription below the dropped path. `DropProperty`
//! only ever removes a scalar/object key, never a declared nested array name.

use crate::descriptor::TypeDescriptor;
use crate::metrics_handle::MetricsHandle;
use crate::path::SegmentPath;
use crate::step::{require_path, AddedFn, AddedRegistry, ModifiedFn, ModifiedRegistry, RemovedFn, RemovedRegistry, Step};
use anyhow::Result;
use std::rc::Rc;

pub struct DropProperty {
    descriptor: TypeDescriptor,
    added: Rc<AddedRegistry>,
    removed: Rc<RemovedRegistry>,
    modified: Rc<ModifiedRegistry>,
}

impl DropProperty {
    pub fn new(
        upstream: Rc<dyn Step>,
        scope: SegmentPath,
        property_name: String,
        _metrics: MetricsHandle,
    ) -> Result<Rc<Self>> {
        let descriptor = upstream.type_descriptor();
        require_path(&descriptor, &scope)?;
        if let Some(subtree) = descriptor.subtree(&scope) {
            if subtree.arrays.iter().any(|a| a.name == property_name) {
                anyhow::bail!(
                    "drop_property({property_name:?}) targets a nested array at {scope}; use drop_array instead"
                );
            }
        }

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
            let p = path.clone();
            upstream.on_added(
                &path,
                Box::new(move |key_path, key, item| {
                    if at_scope {
                        let stripped = item.without_property(&name);
                        added.dispatch(&p, |h| h(key_path, key, &stripped))
                    } else {
                        added.dispatch(&p, |h| h(key_path, key, item))
                    }
                }),
            )?;

            let removed = this.removed.clone();
            let p = path.clone();
            upstream.on_removed(&path, Box::new(move |key_path, key, item| removed.dispatch(&p, |h| h(key_path, key, item))))?;

            let modified = this.modified.clone();
            let p = path.clone();
            upstream.on_modified(
                &path,
                Box::new(move |key_path, parent_key, name, value| {
                    modified.dispatch(&p, |h| h(key_path, parent_key, name, value))
                }),
            )?;
        }

        Ok(this)
    }
}

impl Step for DropProperty {
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
    use crate::value::Item;
    use serde_json::json;
    use std::cell::RefCell;

    #[test]
    fn strips_property_at_scope() {
        let src = Source::new(EngineConfig::default(), MetricsHandle::new());
        let step = DropProperty::new(src.clone(), SegmentPath::root(), "secret".to_string(), MetricsHandle::new()).unwrap();
        let seen = Rc::new(RefCell::new(None));
        let seen2 = seen.clone();
        step.on_added(&SegmentPath::root(), Box::new(move |_k, _key, item| {
            *seen2.borrow_mut() = Some(item.clone());
            Ok(())
        }))
        .unwrap();
        let item = Item::from_map(json!({"v": 1, "secret": "x"}).as_object().unwrap().clone());
        src.add("i1", item).unwrap();
        let out = seen.borrow().clone().unwrap();
        assert_eq!(out.get("secret"), None);
        assert_eq!(out.get("v"), Some(&json!(1)));
    }
}
