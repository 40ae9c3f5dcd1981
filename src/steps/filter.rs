//! `Filter` (§4.4): admit items at `scope` matching a predicate.
//!
//! Stateless by construction -- removal re-applies the same predicate to the
//! original (immutable) item, which the spec guarantees matches the earlier
//! add decision as long as the predicate is deterministic.

use crate::descriptor::TypeDescriptor;
use crate::metrics_handle::MetricsHandle;
use crate::path::SegmentPath;
use crate::step::{require_path, AddedFn, AddedRegistry, ModifiedFn, ModifiedRegistry, RemovedFn, RemovedRegistry, Step};
use crate::value::Item;
use anyhow::Result;
use std::rc::Rc;

pub struct Filter {
    descriptor: TypeDescriptor,
    added: Rc<AddedRegistry>,
    removed: Rc<RemovedRegistry>,
    modified: Rc<ModifiedRegistry>,
}

impl Filter {
    pub fn new(
        upstream: Rc<dyn Step>,
        scope: SegmentPath,
        predicate: Rc<dyn Fn(&Item) -> bool>,
        _metrics: MetricsHandle,
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
            let pred = predicate.clone();
            let p = path.clone();
            upstream.on_added(
                &path,
                Box::new(move |key_path, key, item| {
                    if at_scope && !pred(item) {
                        return Ok(());
                    }
                    added.dispatch(&p, |h| h(key_path, key, item))
                }),
            )?;

            let removed = this.removed.clone();
            let at_scope = path == scope;
            let pred = predicate.clone();
            let p = path.clone();
            upstream.on_removed(
                &path,
                Box::new(move |key_path, key, item| {
                    if at_scope && !pred(item) {
                        return Ok(());
                    }
                    removed.dispatch(&p, |h| h(key_path, key, item))
                }),
            )?;

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

impl Step for Filter {
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
    use std::cell::RefCell;

    #[test]
    fn suppresses_items_failing_predicate() {
        let src = Source::new(EngineConfig::default(), MetricsHandle::new());
        let step = Filter::new(
            src.clone(),
            SegmentPath::root(),
            Rc::new(|item: &Item| item.get_f64("v").unwrap_or(0.0) > 10.0),
            MetricsHandle::new(),
        )
        .unwrap();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen2 = seen.clone();
        step.on_added(&SegmentPath::root(), Box::new(move |_k, key, _item| {
            seen2.borrow_mut().push(key.to_string());
            Ok(())
        }))
        .unwrap();

        src.add("low", Item::from_map(json!({"v": 1}).as_object().unwrap().clone())).unwrap();
        src.add("high", Item::from_map(json!({"v": 100}).as_object().unwrap().clone())).unwrap();
        assert_eq!(seen.borrow().as_slice(), &["high".to_string()]);
    }

    #[test]
    fn removal_follows_the_same_predicate() {
        let src = Source::new(EngineConfig::default(), MetricsHandle::new());
        let step = Filter::new(
            src.clone(),
            SegmentPath::root(),
            Rc::new(|item: &Item| item.get_f64("v").unwrap_or(0.0) > 10.0),
            MetricsHandle::new(),
        )
        .unwrap();
        let removed = Rc::new(RefCell::new(Vec::new()));
        let removed2 = removed.clone();
        step.on_removed(&SegmentPath::root(), Box::new(move |_k, key, _item| {
            removed2.borrow_mut().push(key.to_string());
            Ok(())
        }))
        .unwrap();

        let low = Item::from_map(json!({"v": 1}).as_object().unwrap().clone());
        src.add("low", low.clone()).unwrap();
        src.remove("low", low).unwrap();
        assert!(removed.borrow().is_empty());
    }
}
