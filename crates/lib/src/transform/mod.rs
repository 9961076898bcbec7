//! Rewrite passes applied to a copy of the build graph before each run.
//!
//! Passes run once each, in the order they were added to the context. A pass
//! returning [`ControlFlow::Break`] cancels the run before any builder executes.

pub mod aggregates;
pub mod forced;

use std::ops::ControlFlow;

use crate::build::BuildGraph;

pub use aggregates::RedundantAggregates;
pub use forced::{ForcedOrdering, OrderDeclaration};

pub trait GraphTransformation: Send + Sync {
  fn name(&self) -> &str;

  fn apply(&self, graph: &mut BuildGraph) -> ControlFlow<()>;
}

/// A named transformation backed by a closure.
pub struct FnTransformation<F> {
  name: String,
  apply: F,
}

impl<F> GraphTransformation for FnTransformation<F>
where
  F: Fn(&mut BuildGraph) -> ControlFlow<()> + Send + Sync,
{
  fn name(&self) -> &str {
    &self.name
  }

  fn apply(&self, graph: &mut BuildGraph) -> ControlFlow<()> {
    (self.apply)(graph)
  }
}

pub fn from_fn<F>(name: impl Into<String>, apply: F) -> FnTransformation<F>
where
  F: Fn(&mut BuildGraph) -> ControlFlow<()> + Send + Sync,
{
  FnTransformation {
    name: name.into(),
    apply,
  }
}
