use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use crate::dependency::Dependency;
use crate::util::hash::ObjectHash;

use super::builder::Builder;
use super::context::{BuildContext, RunContext};
use super::graph::BuilderId;
use super::types::{BuildError, BuilderKey, Capabilities, OutputSet, ProjectRef};

pub const MERGE_KIND: &str = "merge";

/// Unions the results of a set of source builders.
///
/// The source set is unordered: builders over the same sources in any order
/// have the same Uid and collapse into one node. Never cached, it has no
/// output of its own.
pub struct MergingBuilder {
  sources: Vec<Arc<dyn Builder>>,
  uid: String,
}

impl MergingBuilder {
  pub fn new(sources: impl IntoIterator<Item = Arc<dyn Builder>>) -> Self {
    let sources: BTreeMap<BuilderKey, Arc<dyn Builder>> =
      sources.into_iter().map(|builder| (builder.key(), builder)).collect();
    let mut uids: Vec<String> = sources.keys().map(|key| key.uid.clone()).collect();
    uids.sort();

    Self {
      sources: sources.into_values().collect(),
      uid: ObjectHash::of_lines(&uids).0,
    }
  }

  pub fn sources(&self) -> &[Arc<dyn Builder>] {
    &self.sources
  }
}

impl Builder for MergingBuilder {
  fn kind(&self) -> &str {
    MERGE_KIND
  }

  fn uid(&self) -> String {
    self.uid.clone()
  }

  fn dependencies(&self) -> Dependency {
    Dependency::compose(self.sources.iter().map(|source| source.dependencies()))
  }

  fn add_to_context(&self, ctx: &mut BuildContext) -> Result<Vec<BuilderId>, BuildError> {
    self.sources.iter().map(|source| ctx.register(source.clone())).collect()
  }

  fn run(&self, ctx: &RunContext<'_>) -> Result<OutputSet, BuildError> {
    let mut outputs = OutputSet::new();
    for (_, results) in ctx.prerequisite_results()? {
      outputs.extend(results.iter().cloned());
    }
    Ok(outputs)
  }

  fn capabilities(&self) -> Capabilities {
    Capabilities::composition()
  }

  /// Union of the sources' work sets, if every source is an aggregate.
  fn work_set(&self) -> Option<BTreeSet<ProjectRef>> {
    let mut work = BTreeSet::new();
    for source in &self.sources {
      work.extend(source.work_set()?);
    }
    Some(work)
  }
}

impl PartialEq for MergingBuilder {
  fn eq(&self, other: &Self) -> bool {
    self.uid == other.uid
  }
}

impl Eq for MergingBuilder {}

impl fmt::Display for MergingBuilder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "merge[")?;
    for (i, source) in self.sources.iter().enumerate() {
      if i > 0 {
        write!(f, ", ")?;
      }
      write!(f, "{source}")?;
    }
    write!(f, "]")
  }
}

/// Merge builders: none gives `None`, one is returned as is, more are wrapped
/// in a [`MergingBuilder`].
pub fn merge(builders: Vec<Arc<dyn Builder>>) -> Option<Arc<dyn Builder>> {
  let mut builders = builders;
  match builders.len() {
    0 => None,
    1 => builders.pop(),
    _ => Some(Arc::new(MergingBuilder::new(builders))),
  }
}
