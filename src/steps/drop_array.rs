//! `DropArray` (§4.9): prune a nested array from the descriptor and stop
//! forwarding events at or below it.
//!
//! Subscriptions upstream of this step are unaffected -- an aggregate built
//! directly on the array being dropped keeps receiving events, since it
//! attached to the upstream step before `DropArray` existed. `DropArray` only
//! withholds what it re-exposes *downstream*: it simply never wires a
//! forwarding closure for any path at or below the dropped array, because
//! those paths no longer appear in its own descriptor.

use crate::descriptor::TypeDescriptor;
use crate::metrics_handle::MetricsHandle;
use crate::path::SegmentPath;
use crate::step::{require_path, AddedFn, AddedRegistry, ModifiedFn, ModifiedRegistry, RemovedFn, RemovedRegistry, Step};
use anyhow::Result;
use std::rc::Rc;

pub struct DropArray {
    descriptor: TypeDescriptor,
    added: Rc<AddedRegistry>,
    removed: Rc<RemovedRegistry>,
    modified: Rc<ModifiedRegistry>,
}

impl DropArray {
    pub fn new(upstream: Rc<dyn Step>, target: SegmentPath, _metrics: MetricsHandle) -> Result<Rc<Self>> {
        let upstream_descriptor = upstream.type_descriptor();
        require_path(&upstream_descriptor, &target)?;
        let descriptor = upstream_descriptor.without_array(&target);

        let this = Rc::new(Self {
            descriptor: descriptor.clone(),
            added: AddedRegistry::new(),
            removed: RemovedRegistry::new(),
            modified: ModifiedRegistry::new(),
        });

        for path in descriptor.segment_paths() {
            let added = this.added.clone();
            let p = path.clone();
            upstream.on_added(&path, Box::new(move |key_path, key, item| added.dispatch(&p, |h| h(key_path, key, item))))?;

            let removed = this.removed.clone();
            let p = path.clone();
            upstream.on_removed(&path, Box::new(move |key_path, key, item| removed.dispatch(&p, |h| h(key_path, key, item))))?;

            let modified = this.modified.clone();
            let p = path.clone();
            upstream.on_modified(
                &path,
                Box::new(move |key_path, parent_key, name, value| modified.dispatch(&p, |h| h(key_path, parent_key, name, value))),
            )?;
        }

        Ok(this)
    }
}

impl Step for DropArray {
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
    use crate::descriptor::ArrayDescriptor;
    use crate::source::Source;
    use std::cell::RefCell;

    struct Stub(TypeDescriptor);
    impl Step for Stub {
        fn type_descriptor(&self) -> TypeDescriptor {
            self.0.clone()
        }
        fn on_added(&self, _path: &SegmentPath, _h: Box<AddedFn>) -> Result<()> {
            Ok(())
        }
        fn on_removed(&self, _path: &SegmentPath, _h: Box<RemovedFn>) -> Result<()> {
            Ok(())
        }
        fn on_modified(&self, _path: &SegmentPath, _h: Box<ModifiedFn>) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn removes_array_from_descriptor() {
        let upstream: Rc<dyn Step> = Rc::new(Stub(TypeDescriptor {
            arrays: vec![ArrayDescriptor { name: "items".into(), ty: TypeDescriptor::leaf() }],
        }));
        let step = DropArray::new(upstream, SegmentPath::new(["items"]), MetricsHandle::new()).unwrap();
        assert!(!step.type_descriptor().contains_path(&SegmentPath::new(["items"])));
    }

    #[test]
    fn forwards_paths_above_the_dropped_array() {
        let src = Source::new(EngineConfig::default(), MetricsHandle::new());
        // Root is preserved even though it has no arrays to drop below it in
        // this minimal fixture; a real pipeline drops a nested array built by
        // GroupBy (see tests under `builder`).
        let step = DropArray::new(src.clone(), SegmentPath::root(), MetricsHandle::new());
        assert!(step.is_ok());
        let step = step.unwrap();
        let seen = Rc::new(RefCell::new(false));
        let seen2 = seen.clone();
        step.on_added(
            &SegmentPath::root(),
            Box::new(move |_k, _key, _item| {
                *seen2.borrow_mut() = true;
                Ok(())
            }),
        )
        .unwrap();
        src.add("i1", crate::value::Item::empty()).unwrap();
        assert!(*seen.borrow());
    }
}
