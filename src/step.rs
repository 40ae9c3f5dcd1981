//! The step protocol (§4.1): the contract every node in the pipeline satisfies.
//!
//! Every step exposes a [`TypeDescriptor`] and three subscription points
//! (`on_added`, `on_removed`, `on_modified`), each parameterized by a
//! [`SegmentPath`]. Subscription is additive, dispatch is insertion-ordered,
//! and every handler call happens synchronously on the caller's stack --
//! there is no queue, no executor, and no `Send`/`Sync` requirement, since
//! concurrent input is explicitly out of scope.
//!
//! Concrete steps wire themselves to their upstream *eagerly*, at
//! construction time (see [`crate::steps`] and [`crate::group_by`]): each
//! step enumerates its upstream's descriptor and installs exactly one
//! forwarding/transforming closure per upstream path per channel. Those
//! closures hold `Rc`-shared handles to this step's own [`Registry`]
//! instances, which downstream steps subscribe into later via `on_added` /
//! `on_removed` / `on_modified`. Because the whole chain is fully
//! constructed before any `add`/`remove` call reaches the source, there is
//! no ordering hazard between "wiring" and "firing".

use crate::descriptor::TypeDescriptor;
use crate::error::EngineError;
use crate::path::{KeyPath, SegmentPath};
use crate::value::Item;
use anyhow::Result;
use serde_json::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// `(key_path, key, item)` -- the shape shared by `Added` and `Removed`.
/// Handlers return `Result` (rather than a bare `()`) so a fatal
/// [`EngineError`] raised deep in the chain (e.g. `CommutativeAggregate`
/// finding no accumulator on a `Removed`) propagates back to the `add`/
/// `remove` call on [`crate::source::Source`] instead of being forced to
/// panic with no way to honor [`crate::config::EngineConfig::panic_on_invariant_violation`].
pub type AddedFn = dyn Fn(&KeyPath, &str, &Item) -> Result<()>;
pub type RemovedFn = dyn Fn(&KeyPath, &str, &Item) -> Result<()>;
/// `(key_path, parent_key, property_name, new_value)`.
pub type ModifiedFn = dyn Fn(&KeyPath, &str, &str, &Value) -> Result<()>;

/// The abstract contract every pipeline node satisfies (§4.1).
pub trait Step {
    /// The shape of events this step emits, reflecting its own transformation.
    fn type_descriptor(&self) -> TypeDescriptor;

    /// Subscribe to `Added` events at `path`. Fails with
    /// [`EngineError::InvalidSegmentPath`] if `path` is not present in
    /// [`Step::type_descriptor`].
    fn on_added(&self, path: &SegmentPath, handler: Box<AddedFn>) -> Result<()>;

    /// Subscribe to `Removed` events at `path`.
    fn on_removed(&self, path: &SegmentPath, handler: Box<RemovedFn>) -> Result<()>;

    /// Subscribe to `Modified` events at `path`.
    fn on_modified(&self, path: &SegmentPath, handler: Box<ModifiedFn>) -> Result<()>;
}

/// A per-path collection of handlers of one channel, shared by `Rc` between
/// the step struct that owns it and the upstream-installed closure that
/// dispatches into it.
pub(crate) struct Registry<F: ?Sized> {
    handlers: RefCell<HashMap<SegmentPath, Vec<Box<F>>>>,
}

impl<F: ?Sized> Default for Registry<F> {
    fn default() -> Self {
        Self { handlers: RefCell::new(HashMap::new()) }
    }
}

impl<F: ?Sized> Registry<F> {
    pub(crate) fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub(crate) fn subscribe(&self, path: SegmentPath, handler: Box<F>) {
        self.handlers.borrow_mut().entry(path).or_default().push(handler);
    }

    /// Invoke `call` for every handler subscribed at `path`, in insertion
    /// order, short-circuiting on the first `Err`.
    pub(crate) fn dispatch(&self, path: &SegmentPath, mut call: impl FnMut(&F) -> Result<()>) -> Result<()> {
        if let Some(hs) = self.handlers.borrow().get(path) {
            for h in hs {
                call(h)?;
            }
        }
        Ok(())
    }
}

pub(crate) type AddedRegistry = Registry<AddedFn>;
pub(crate) type RemovedRegistry = Registry<RemovedFn>;
pub(crate) type ModifiedRegistry = Registry<ModifiedFn>;

/// Validate `path` against `descriptor`, converting absence into the engine's
/// construction-time error kind. Every `on_added`/`on_removed`/`on_modified`
/// implementation calls this before touching its registry.
pub(crate) fn require_path(descriptor: &TypeDescriptor, path: &SegmentPath) -> Result<()> {
    if descriptor.contains_path(path) {
        Ok(())
    } else {
        Err(EngineError::InvalidSegmentPath { path: path.clone() }.into())
    }
}
