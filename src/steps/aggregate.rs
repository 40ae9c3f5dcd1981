//! `CommutativeAggregate` (§4.6): maintain one accumulator per parent array
//! instance, re-derived incrementally as items come and go, surfaced on the
//! `Modified` channel at the parent's own segment path.
//!
//! The accumulator type is left dynamic (`serde_json::Value`) rather than a
//! generic type parameter: the builder composes steps behind `Rc<dyn Step>`,
//! so a generic `Acc` would need to be erased at the trait-object boundary
//! anyway, and every concrete aggregator (`sum`, `count`, `average`, ...)
//! this crate ships already operates on JSON scalars.

use crate::descriptor::TypeDescriptor;
use crate::error::EngineError;
use crate::event_kind::EventKind;
use crate::metrics_handle::MetricsHandle;
use crate::path::{KeyPath, SegmentPath};
use crate::step::{require_path, AddedFn, AddedRegistry, ModifiedFn, ModifiedRegistry, RemovedFn, RemovedRegistry, Step};
use crate::value::Item;
use anyhow::Result;
use serde_json::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

const LABEL: &str = "commutative_aggregate";

/// `add(current_accumulator, item) -> new_accumulator`. `None` means "no
/// accumulator yet for this parent".
pub type AddFn = dyn Fn(Option<&Value>, &Item) -> Value;
/// `subtract(current_accumulator, item) -> new_accumulator`.
pub type SubtractFn = dyn Fn(&Value, &Item) -> Value;

pub struct CommutativeAggregate {
    descriptor: TypeDescriptor,
    target: SegmentPath,
    output_property: String,
    accumulators: RefCell<HashMap<String, Value>>,
    counts: RefCell<HashMap<String, u64>>,
    added: Rc<AddedRegistry>,
    removed: Rc<RemovedRegistry>,
    modified: Rc<ModifiedRegistry>,
    metrics: MetricsHandle,
}

impl CommutativeAggregate {
    pub fn new(
        upstream: Rc<dyn Step>,
        target: SegmentPath,
        output_property: String,
        add: Rc<AddFn>,
        subtract: Rc<SubtractFn>,
        metrics: MetricsHandle,
    ) -> Result<Rc<Self>> {
        let descriptor = upstream.type_descriptor();
        require_path(&descriptor, &target)?;

        let this = Rc::new(Self {
            descriptor: descriptor.clone(),
            target: target.clone(),
            output_property,
            accumulators: RefCell::new(HashMap::new()),
            counts: RefCell::new(HashMap::new()),
            added: AddedRegistry::new(),
            removed: RemovedRegistry::new(),
            modified: ModifiedRegistry::new(),
            metrics,
        });

        for path in descriptor.segment_paths() {
            if path == target {
                // The aggregate observes events at `target` but doesn't
                // consume them: it updates its own bookkeeping and emits
                // `Modified` upstream, then still forwards the original
                // `Added`/`Removed` unchanged so a materializer (or any
                // further step) subscribed at `target` sees the item itself.
                let this2 = this.clone();
                let add = add.clone();
                let added = this.added.clone();
                let p = path.clone();
                upstream.on_added(
                    &path,
                    Box::new(move |key_path, key, item| {
                        this2.handle_added(key_path, key, item, &add)?;
                        added.dispatch(&p, |h| h(key_path, key, item))
                    }),
                )?;

                let this2 = this.clone();
                let subtract = subtract.clone();
                let removed = this.removed.clone();
                let p = path.clone();
                upstream.on_removed(
                    &path,
                    Box::new(move |key_path, key, item| {
                        this2.handle_removed(key_path, key, item, &subtract)?;
                        removed.dispatch(&p, |h| h(key_path, key, item))
                    }),
                )?;
            } else {
                let added = this.added.clone();
                let p = path.clone();
                upstream.on_added(&path, Box::new(move |key_path, key, item| added.dispatch(&p, |h| h(key_path, key, item))))?;

                let removed = this.removed.clone();
                let p = path.clone();
                upstream
                    .on_removed(&path, Box::new(move |key_path, key, item| removed.dispatch(&p, |h| h(key_path, key, item))))?;
            }

            let modified = this.modified.clone();
            let p = path.clone();
            upstream.on_modified(
                &path,
                Box::new(move |key_path, parent_key, name, value| modified.dispatch(&p, |h| h(key_path, parent_key, name, value))),
            )?;
        }

        Ok(this)
    }

    fn handle_added(&self, key_path: &KeyPath, _key: &str, item: &Item, add: &AddFn) -> Result<()> {
        let parent = key_path.join();
        let mut accs = self.accumulators.borrow_mut();
        let mut counts = self.counts.borrow_mut();
        let new_acc = add(accs.get(&parent), item);
        accs.insert(parent.clone(), new_acc.clone());
        *counts.entry(parent).or_insert(0) += 1;
        drop(accs);
        drop(counts);
        self.metrics.record_emitted(LABEL, EventKind::Added);
        self.emit_modified(key_path, &new_acc)
    }

    fn handle_removed(&self, key_path: &KeyPath, _key: &str, item: &Item, subtract: &SubtractFn) -> Result<()> {
        let parent = key_path.join();
        let mut accs = self.accumulators.borrow_mut();
        let mut counts = self.counts.borrow_mut();
        let Some(current) = accs.get(&parent).cloned() else {
            return Err(EngineError::MissingAggregate { key_path: key_path.clone() }.into());
        };
        let new_acc = subtract(&current, item);
        let remaining = counts.get(&parent).copied().unwrap_or(0).saturating_sub(1);
        if remaining == 0 {
            accs.remove(&parent);
            counts.remove(&parent);
            return Ok(());
        }
        counts.insert(parent.clone(), remaining);
        accs.insert(parent, new_acc.clone());
        drop(accs);
        drop(counts);
        self.metrics.record_emitted(LABEL, EventKind::Removed);
        self.emit_modified(key_path, &new_acc)
    }

    fn emit_modified(&self, key_path: &KeyPath, value: &Value) -> Result<()> {
        let (out_key_path, out_parent_key) = match key_path.last() {
            Some(k) => (key_path.parent().unwrap_or_else(KeyPath::root), k.to_string()),
            None => (KeyPath::root(), String::new()),
        };
        let out_segment = self.target.parent().unwrap_or_else(SegmentPath::root);
        self.metrics.record_emitted(LABEL, EventKind::Modified);
        self.modified
            .dispatch(&out_segment, |h| h(&out_key_path, &out_parent_key, &self.output_property, value))
    }
}

impl Step for CommutativeAggregate {
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
