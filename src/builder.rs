//! The builder (§4.10): the fluent façade that wires a [`Source`] through a
//! chain of [`crate::steps`] and, at [`Builder::build`], attaches a
//! [`Materializer`].
//!
//! A `Builder` is an immutable value: every transformation method consumes
//! `self` and returns a new `Builder` sharing the same `source` handle and
//! pointing its `last_step` at the newly-constructed step. This mirrors the
//! fluent, consuming style the rest of this crate's call chains use --
//! nothing here mutates in place, so cloning a `Builder` mid-chain (before
//! calling a transform) is always safe to branch from.
//!
//! Array targets can be named two equivalent ways (§9): relative to the
//! builder's current scope (set by [`Builder::in_array`]) with a bare array
//! name, or as an absolute [`SegmentPath`] ignoring scope entirely. Every
//! method that names a target array takes `impl Into<Target>`, and both
//! spellings resolve through [`Target::resolve`].

use crate::config::EngineConfig;
use crate::descriptor::TypeDescriptor;
use crate::materializer::{Materializer, SinkFn};
use crate::metrics_handle::MetricsHandle;
use crate::path::SegmentPath;
use crate::source::Source;
use crate::step::Step;
use crate::steps::{
    aggregate::{AddFn, SubtractFn},
    Average, CommutativeAggregate, DefineProperty, DropArray, DropProperty, Filter, GroupBy, Max, Min, PickByMax,
    PickByMin,
};
use crate::value::Item;
use anyhow::Result;
use serde_json::{json, Value};
use std::rc::Rc;

/// An array reference a builder method accepts: either a bare name (resolved
/// against the builder's current scope) or an absolute path (scope-blind).
#[derive(Clone, Debug)]
pub enum Target {
    Name(String),
    Path(SegmentPath),
}

impl Target {
    #[must_use]
    fn resolve(&self, scope: &SegmentPath) -> SegmentPath {
        match self {
            Target::Name(name) => scope.with_pushed(name.clone()),
            Target::Path(path) => path.clone(),
        }
    }
}

impl From<&str> for Target {
    fn from(name: &str) -> Self {
        Target::Name(name.to_string())
    }
}

impl From<String> for Target {
    fn from(name: String) -> Self {
        Target::Name(name)
    }
}

impl From<SegmentPath> for Target {
    fn from(path: SegmentPath) -> Self {
        Target::Path(path)
    }
}

impl<const N: usize> From<[&str; N]> for Target {
    fn from(segments: [&str; N]) -> Self {
        Target::Path(SegmentPath::new(segments))
    }
}

/// The fluent pipeline-construction handle (§4.10).
#[derive(Clone)]
pub struct Builder {
    source: Rc<Source>,
    last_step: Rc<dyn Step>,
    scope: SegmentPath,
    metrics: MetricsHandle,
}

/// Begin a new pipeline with the default [`EngineConfig`].
#[must_use]
pub fn create_pipeline() -> Builder {
    create_pipeline_with_config(EngineConfig::default())
}

/// Begin a new pipeline with an explicit [`EngineConfig`].
#[must_use]
pub fn create_pipeline_with_config(config: EngineConfig) -> Builder {
    let metrics = MetricsHandle::new();
    let source = Source::new(config, metrics.clone());
    let last_step: Rc<dyn Step> = source.clone();
    Builder { source, last_step, scope: SegmentPath::root(), metrics }
}

impl Builder {
    /// The descriptor of the pipeline as built so far.
    #[must_use]
    pub fn type_descriptor(&self) -> TypeDescriptor {
        self.last_step.type_descriptor()
    }

    /// The current scope path -- the array subsequent scope-relative
    /// transforms (those naming a property, predicate, or bare array name)
    /// apply within.
    #[must_use]
    pub fn scope(&self) -> &SegmentPath {
        &self.scope
    }

    /// Set the scope for subsequent scope-relative calls to `path`,
    /// absolute from the root (not appended to any prior scope).
    #[must_use]
    pub fn in_array(&self, path: impl Into<Target>) -> Builder {
        let scope = path.into().resolve(&self.scope);
        Builder { source: self.source.clone(), last_step: self.last_step.clone(), scope, metrics: self.metrics.clone() }
    }

    /// `DefineProperty` (§4.2) at the current scope.
    pub fn define_property(self, name: impl Into<String>, compute: Rc<dyn Fn(&Item) -> Value>) -> Result<Builder> {
        let step = DefineProperty::new(self.last_step.clone(), self.scope.clone(), name.into(), compute, self.metrics.clone())?;
        Ok(self.with_step(step))
    }

    /// `DropProperty` (§4.3) at the current scope.
    pub fn drop_property(self, name: impl Into<String>) -> Result<Builder> {
        let step = DropProperty::new(self.last_step.clone(), self.scope.clone(), name.into(), self.metrics.clone())?;
        Ok(self.with_step(step))
    }

    /// `Filter` (§4.4) at the current scope.
    pub fn filter(self, predicate: Rc<dyn Fn(&Item) -> bool>) -> Result<Builder> {
        let step = Filter::new(self.last_step.clone(), self.scope.clone(), predicate, self.metrics.clone())?;
        Ok(self.with_step(step))
    }

    /// `GroupBy` (§4.5) at the current scope. The group occupies the scope
    /// path itself; the scope is unchanged by this call (use [`Builder::in_array`]
    /// with the new `array_name` to descend into the grouped items).
    pub fn group_by<I, S>(self, group_names: I, array_name: impl Into<String>) -> Result<Builder>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names = group_names.into_iter().map(Into::into).collect();
        let step = GroupBy::new(self.last_step.clone(), self.scope.clone(), names, array_name.into(), self.metrics.clone())?;
        Ok(self.with_step(step))
    }

    /// `CommutativeAggregate` (§4.6) over `target`.
    pub fn commutative_aggregate(
        self,
        target: impl Into<Target>,
        output_property: impl Into<String>,
        add: Rc<AddFn>,
        subtract: Rc<SubtractFn>,
    ) -> Result<Builder> {
        let target = target.into().resolve(&self.scope);
        let step = CommutativeAggregate::new(self.last_step.clone(), target, output_property.into(), add, subtract, self.metrics.clone())?;
        Ok(self.with_step(step))
    }

    /// Sugar over [`Builder::commutative_aggregate`]: sum `source_property`
    /// over `target`, treating a missing/non-numeric value as zero.
    pub fn sum(self, target: impl Into<Target>, source_property: impl Into<String>, output_property: impl Into<String>) -> Result<Builder> {
        let source_property = source_property.into();
        let sp_add = source_property.clone();
        let add: Rc<AddFn> = Rc::new(move |acc: Option<&Value>, item: &Item| {
            let base = acc.and_then(Value::as_f64).unwrap_or(0.0);
            json!(base + item.get_f64(&sp_add).unwrap_or(0.0))
        });
        let subtract: Rc<SubtractFn> = Rc::new(move |acc: &Value, item: &Item| json!(acc.as_f64().unwrap_or(0.0) - item.get_f64(&source_property).unwrap_or(0.0)));
        self.commutative_aggregate(target, output_property, add, subtract)
    }

    /// Sugar over [`Builder::commutative_aggregate`]: count members of `target`.
    pub fn count(self, target: impl Into<Target>, output_property: impl Into<String>) -> Result<Builder> {
        let add: Rc<AddFn> = Rc::new(|acc: Option<&Value>, _item: &Item| json!(acc.and_then(Value::as_f64).unwrap_or(0.0) + 1.0));
        let subtract: Rc<SubtractFn> = Rc::new(|acc: &Value, _item: &Item| json!(acc.as_f64().unwrap_or(0.0) - 1.0));
        self.commutative_aggregate(target, output_property, add, subtract)
    }

    /// `Min` (§4.7) over `target`'s `source_property`.
    pub fn min(self, target: impl Into<Target>, source_property: impl Into<String>, output_property: impl Into<String>) -> Result<Builder> {
        let target = target.into().resolve(&self.scope);
        let step = Min::new(self.last_step.clone(), target, output_property.into(), source_property.into(), self.metrics.clone())?;
        Ok(self.with_step(step))
    }

    /// `Max` (§4.7) over `target`'s `source_property`.
    pub fn max(self, target: impl Into<Target>, source_property: impl Into<String>, output_property: impl Into<String>) -> Result<Builder> {
        let target = target.into().resolve(&self.scope);
        let step = Max::new(self.last_step.clone(), target, output_property.into(), source_property.into(), self.metrics.clone())?;
        Ok(self.with_step(step))
    }

    /// `Average` (§4.7) over `target`'s `source_property`.
    pub fn average(self, target: impl Into<Target>, source_property: impl Into<String>, output_property: impl Into<String>) -> Result<Builder> {
        let target = target.into().resolve(&self.scope);
        let step = Average::new(self.last_step.clone(), target, output_property.into(), source_property.into(), self.metrics.clone())?;
        Ok(self.with_step(step))
    }

    /// `PickByMin` (§4.8) over `target`'s `comparison_property`.
    pub fn pick_by_min(
        self,
        target: impl Into<Target>,
        comparison_property: impl Into<String>,
        output_property: impl Into<String>,
    ) -> Result<Builder> {
        let target = target.into().resolve(&self.scope);
        let step = PickByMin::new(self.last_step.clone(), target, output_property.into(), comparison_property.into(), self.metrics.clone())?;
        Ok(self.with_step(step))
    }

    /// `PickByMax` (§4.8) over `target`'s `comparison_property`.
    pub fn pick_by_max(
        self,
        target: impl Into<Target>,
        comparison_property: impl Into<String>,
        output_property: impl Into<String>,
    ) -> Result<Builder> {
        let target = target.into().resolve(&self.scope);
        let step = PickByMax::new(self.last_step.clone(), target, output_property.into(), comparison_property.into(), self.metrics.clone())?;
        Ok(self.with_step(step))
    }

    /// `DropArray` (§4.9): prune `target` from the descriptor entirely.
    pub fn drop_array(self, target: impl Into<Target>) -> Result<Builder> {
        let target = target.into().resolve(&self.scope);
        let step = DropArray::new(self.last_step.clone(), target, self.metrics.clone())?;
        Ok(self.with_step(step))
    }

    /// Attach a [`Materializer`] to the chain built so far and return the
    /// [`Source`] handle callers drive with `add`/`remove`.
    pub fn build(self, sink: Rc<SinkFn>) -> Result<Rc<Source>> {
        Materializer::attach(&self.last_step, sink)?;
        Ok(self.source)
    }

    /// Convenience over [`Builder::build`]: materialize into a private
    /// in-memory [`crate::materializer::KeyedArray`] and hand back both the
    /// driving `Source` and a read handle to the live state.
    pub fn build_in_memory(self) -> Result<(Rc<Source>, Rc<std::cell::RefCell<crate::materializer::KeyedArray>>)> {
        let (sink, state) = crate::materializer::in_memory_sink();
        let source = self.build(sink)?;
        Ok((source, state))
    }

    fn with_step(&self, step: Rc<dyn Step>) -> Builder {
        Builder { source: self.source.clone(), last_step: step, scope: self.scope.clone(), metrics: self.metrics.clone() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::materializer::to_json_array;
    use serde_json::json;

    #[test]
    fn group_and_sum_materializes_nested_totals() {
        let (source, state) = create_pipeline()
            .group_by(["city"], "items")
            .unwrap()
            .sum("items", "v", "total")
            .unwrap()
            .build_in_memory()
            .unwrap();

        source.add("a", Item::from_map(json!({"city": "Dallas", "v": 10}).as_object().unwrap().clone())).unwrap();
        source.add("b", Item::from_map(json!({"city": "Dallas", "v": 20}).as_object().unwrap().clone())).unwrap();

        let out = to_json_array(&state.borrow());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].get("total"), Some(&json!(30.0)));
        assert_eq!(out[0].get("items").unwrap().as_array().unwrap().len(), 2);
    }

    #[test]
    fn filter_excludes_items_before_group_by() {
        let (source, state) = create_pipeline()
            .filter(Rc::new(|item: &Item| item.get_f64("v").unwrap_or(0.0) > 5.0))
            .unwrap()
            .build_in_memory()
            .unwrap();

        source.add("a", Item::from_map(json!({"v": 1}).as_object().unwrap().clone())).unwrap();
        source.add("b", Item::from_map(json!({"v": 100}).as_object().unwrap().clone())).unwrap();

        let out = to_json_array(&state.borrow());
        assert_eq!(out, vec![json!({"v": 100})]);
    }

    #[test]
    fn absolute_path_target_ignores_scope() {
        let builder = create_pipeline().in_array("wrong_scope");
        let (source, state) = builder.sum(SegmentPath::root(), "v", "total").unwrap().build_in_memory().unwrap();
        source.add("a", Item::from_map(json!({"v": 7}).as_object().unwrap().clone())).unwrap();
        assert_eq!(to_json_array(&state.borrow()), vec![json!({"v": 7})]);
    }
}
