//! Builders and the build graph they are registered into.
//!
//! A builder is a unit of work with a stable identity ([`BuilderKey`]),
//! a dependency descriptor deciding cache validity, and prerequisites it
//! registers into a [`BuildContext`]. Running the context executes the
//! builders a root depends on in topological order.
//!
//! # Submodules
//!
//! - [`builder`] - The [`Builder`] contract and a closure-backed builder
//! - [`graph`] - Edge-set graph rewritten by transformations
//! - [`context`] - Registration and the per-run pipeline
//! - [`merging`] - Fan-in over a set of builders
//! - [`reference`] - Builders resolving symbolic references

pub mod builder;
pub mod context;
mod execute;
pub mod graph;
pub mod merging;
pub mod reference;
mod stats;
mod types;

pub use builder::{Builder, FnBuilder};
pub use context::{BuildContext, RegistrationState, RunContext};
pub use graph::{BuildGraph, BuilderId, Edge};
pub use merging::{MergingBuilder, merge};
pub use stats::{BuilderStatistics, KindStatistics};
pub use types::*;
