//! # viewflow
//!
//! An **incremental view maintenance engine** over a hierarchical, keyed data
//! model. Items stream in and out through [`add`](source::Source::add) and
//! [`remove`](source::Source::remove) calls; a pipeline of composable
//! [`steps`] re-derives whatever downstream state depends on them -- group
//! membership, aggregates, filters -- without ever re-scanning the whole
//! dataset, and a [`materializer::Materializer`] folds the resulting
//! `Added`/`Removed`/`Modified` events into a concrete nested keyed-array
//! value.
//!
//! ## Quick Start
//!
//! ```
//! use viewflow::builder::create_pipeline;
//! use viewflow::materializer::to_json_array;
//! use viewflow::value::Item;
//! use serde_json::json;
//!
//! # fn main() -> anyhow::Result<()> {
//! let (source, state) = create_pipeline()
//!     .group_by(["city"], "venues")?
//!     .sum("venues", "capacity", "total_capacity")?
//!     .build_in_memory()?;
//!
//! source.add("v1", Item::from_map(json!({"city": "Dallas", "capacity": 500}).as_object().unwrap().clone()))?;
//! source.add("v2", Item::from_map(json!({"city": "Dallas", "capacity": 700}).as_object().unwrap().clone()))?;
//!
//! let rendered = to_json_array(&state.borrow());
//! assert_eq!(rendered[0]["total_capacity"], json!(1200.0));
//! # Ok(())
//! # }
//! ```
//!
//! ## Core Concepts
//!
//! ### The step protocol
//!
//! Every node in a pipeline -- the [`source::Source`] and every entry in
//! [`steps`] -- implements [`step::Step`]: it exposes a [`descriptor::TypeDescriptor`]
//! describing the shape of what it emits, and three subscription points
//! (`on_added`, `on_removed`, `on_modified`) parameterized by a
//! [`path::SegmentPath`]. Dispatch is synchronous, insertion-ordered, and
//! short-circuits on the first error -- there is no queue, no executor, and
//! no `Send`/`Sync` requirement, since concurrent input is explicitly out of
//! scope (see [REDESIGN FLAGS] in the design doc for why).
//!
//! ### Two address spaces
//!
//! A [`path::SegmentPath`] is the schema-level address of an array (known at
//! pipeline-construction time); a [`path::KeyPath`] is its runtime
//! counterpart, one concrete key per ancestor array. Every `Added` carries a
//! key path whose length equals its segment path's length; `Modified`
//! addresses the same way, with the entity's own key split out as
//! `parent_key`.
//!
//! ### Steps
//!
//! - [`steps::DefineProperty`] / [`steps::DropProperty`] -- derive or strip
//!   a property on the item at some scope.
//! - [`steps::Filter`] -- admit items at some scope matching a predicate.
//! - [`steps::GroupBy`] -- the one step whose descriptor differs from its
//!   upstream's: it wraps the items at `scope` in a new keyed array, the
//!   group occupying `scope` itself.
//! - [`steps::CommutativeAggregate`] -- an arbitrary `add`/`subtract`
//!   accumulator over a target array, surfaced as a `Modified` at the
//!   array's parent.
//! - [`steps::Min`] / [`steps::Max`] / [`steps::Average`] -- numeric
//!   aggregates over a named source property, skipping non-numeric values.
//! - [`steps::PickByMin`] / [`steps::PickByMax`] -- surface the single
//!   extreme item per parent array, re-derived when the winner is removed.
//! - [`steps::DropArray`] -- prune a nested array from the descriptor and
//!   stop forwarding events at or below it.
//!
//! ### Builder and Materializer
//!
//! [`builder::Builder`] is the fluent façade over the step chain; every
//! transformation method consumes and returns a `Builder`, so a chain reads
//! top to bottom in the order data flows. [`builder::Builder::build`]
//! attaches a [`materializer::Materializer`] and hands back the driving
//! [`source::Source`]; [`builder::Builder::build_in_memory`] is the
//! convenience form that materializes into an owned
//! [`materializer::KeyedArray`] rather than a caller-supplied sink.
//!
//! ## Error Handling
//!
//! Every fallible call returns `anyhow::Result`. Fatal contract violations
//! (a removal with no matching add, a materializer key path of the wrong
//! length) are represented by the closed [`error::EngineError`] enum, which
//! composes under `anyhow` like the rest of this crate's fallible surface.
//! [`config::EngineConfig::panic_on_invariant_violation`] (on by default)
//! converts such an error into a panic at the `add`/`remove` call site
//! instead of returning it, on the theory that these represent a caller bug
//! rather than a recoverable condition.
//!
//! ## Metrics
//!
//! With the default `metrics` feature enabled, [`source::Source::metrics`]
//! exposes an [`metrics::EngineMetrics`] snapshot: per-step-kind emission
//! counters, a live-parent gauge (how many groups/parents currently have at
//! least one member), and an error counter. Disabling the feature compiles
//! the whole layer out; every call site goes through [`metrics_handle::MetricsHandle`],
//! which becomes a zero-sized no-op.
//!
//! ## Testing
//!
//! The [`testing`] module provides `assert_state_eq`/`assert_array_len`/
//! `assert_property_eq` helpers for comparing materialized state, an
//! [`testing::EventScript`] for replaying a sequence of adds/removes against
//! a freshly-built pipeline, and a couple of pre-built fixtures
//! ([`testing::cities_and_venues`], [`testing::categorized_prices`]) for
//! exercising group/aggregate scenarios without hand-writing test data every
//! time.

pub mod builder;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod event_kind;
pub mod hash;
pub mod materializer;
pub mod path;
pub mod source;
pub mod step;
pub mod steps;
pub mod testing;
pub mod utils;
pub mod value;

#[cfg(feature = "metrics")]
pub mod metrics;

pub(crate) mod metrics_handle;

pub use builder::{create_pipeline, create_pipeline_with_config, Builder, Target};
pub use config::EngineConfig;
pub use descriptor::{ArrayDescriptor, TypeDescriptor};
pub use error::EngineError;
pub use materializer::{KeyedArray, Materializer, MaterializedItem, SinkFn};
pub use path::{KeyPath, SegmentPath};
pub use source::Source;
pub use step::Step;
pub use value::Item;
