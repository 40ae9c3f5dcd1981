//! The input step (§2 item 6, §4.1): the single entry point for `add`/`remove`.
//!
//! `Source` is the one step with no upstream. It emits `Added`/`Removed` at
//! the root segment path only and never emits `Modified` (derived values only
//! ever travel downstream of an aggregate). Every downstream step is wired,
//! at construction, directly or transitively to this step's registries.

use crate::config::EngineConfig;
use crate::descriptor::TypeDescriptor;
use crate::error::EngineError;
use crate::event_kind::EventKind;
use crate::metrics_handle::MetricsHandle;
use crate::path::{KeyPath, SegmentPath};
use crate::step::{require_path, AddedFn, AddedRegistry, ModifiedFn, ModifiedRegistry, RemovedFn, RemovedRegistry, Step};
use crate::value::Item;
use anyhow::Result;
use std::rc::Rc;

pub(crate) const LABEL: &str = "source";

/// The pipeline's single entry point. Obtained from [`crate::Builder::build`].
pub struct Source {
    config: EngineConfig,
    metrics: MetricsHandle,
    added: Rc<AddedRegistry>,
    removed: Rc<RemovedRegistry>,
    modified: Rc<ModifiedRegistry>,
}

impl Source {
    pub(crate) fn new(config: EngineConfig, metrics: MetricsHandle) -> Rc<Self> {
        Rc::new(Self {
            config,
            metrics,
            added: AddedRegistry::new(),
            removed: RemovedRegistry::new(),
            modified: ModifiedRegistry::new(),
        })
    }

    /// Add an item under `key`. Fails (or panics, per
    /// [`EngineConfig::panic_on_invariant_violation`]) only if a downstream
    /// step's bookkeeping is inconsistent -- the source itself never rejects
    /// an add.
    pub fn add(&self, key: impl Into<String>, item: Item) -> Result<()> {
        self.dispatch_fallibly(EventKind::Added, || {
            let key = key.into();
            self.added.dispatch(&SegmentPath::root(), |h| h(&KeyPath::root(), &key, &item));
            Ok(())
        })
    }

    /// Remove the item previously added under `key`.
    pub fn remove(&self, key: impl Into<String>, item: Item) -> Result<()> {
        self.dispatch_fallibly(EventKind::Removed, || {
            let key = key.into();
            self.removed.dispatch(&SegmentPath::root(), |h| h(&KeyPath::root(), &key, &item));
            Ok(())
        })
    }

    /// A snapshot handle to this pipeline's metrics, if the `metrics`
    /// feature is enabled.
    #[cfg(feature = "metrics")]
    #[must_use]
    pub fn metrics(&self) -> crate::metrics::EngineMetrics {
        self.metrics.clone()
    }

    fn dispatch_fallibly(&self, kind: EventKind, f: impl FnOnce() -> Result<()>) -> Result<()> {
        self.metrics.record_emitted(LABEL, kind);
        match f() {
            Ok(()) => Ok(()),
            Err(err) => {
                self.metrics.record_error();
                if self.config.panic_on_invariant_violation {
                    panic!("{err}");
                }
                Err(err)
            }
        }
    }
}

impl Step for Source {
    fn type_descriptor(&self) -> TypeDescriptor {
        TypeDescriptor::leaf()
    }

    fn on_added(&self, path: &SegmentPath, handler: Box<AddedFn>) -> Result<()> {
        require_path(&self.type_descriptor(), path)?;
        if path != &SegmentPath::root() {
            return Err(EngineError::InvalidSegmentPath { path: path.clone() }.into());
        }
        self.added.subscribe(path.clone(), handler);
        Ok(())
    }

    fn on_removed(&self, path: &SegmentPath, handler: Box<RemovedFn>) -> Result<()> {
        require_path(&self.type_descriptor(), path)?;
        if path != &SegmentPath::root() {
            return Err(EngineError::InvalidSegmentPath { path: path.clone() }.into());
        }
        self.removed.subscribe(path.clone(), handler);
        Ok(())
    }

    fn on_modified(&self, path: &SegmentPath, handler: Box<ModifiedFn>) -> Result<()> {
        require_path(&self.type_descriptor(), path)?;
        // The source never fires a Modified event; the subscription is
        // accepted (so a uniform builder loop doesn't need to special-case
        // the source) but will simply never be called.
        self.modified.subscribe(path.clone(), handler);
        Ok(())
    }
}
