//! The six transformation steps (§4.2-4.9), each wrapping exactly one
//! upstream [`crate::step::Step`] and wiring its own forwarding/transforming
//! closures onto it at construction time.
//!
//! Every step here follows the same shape: compute its own descriptor (often
//! identical to upstream's), then walk `upstream.type_descriptor().segment_paths()`
//! once per channel, installing one closure per upstream path. Group-by is
//! the one step whose descriptor differs from upstream's and which therefore
//! needs path translation; it lives in [`group_by`] with its own module
//! documentation.

pub mod aggregate;
pub mod define_property;
pub mod drop_array;
pub mod drop_property;
pub mod filter;
pub mod group_by;
pub mod minmax;
pub mod pick;

pub use aggregate::CommutativeAggregate;
pub use define_property::DefineProperty;
pub use drop_array::DropArray;
pub use drop_property::DropProperty;
pub use filter::Filter;
pub use group_by::GroupBy;
pub use minmax::{Average, Max, Min};
pub use pick::{PickByMax, PickByMin};
