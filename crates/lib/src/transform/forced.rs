use std::ops::ControlFlow;

use tracing::{debug, warn};

use crate::build::{BuildGraph, BuilderId, ProjectRef};

use super::GraphTransformation;

/// Builders of one project that must run in the given order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderDeclaration {
  pub project: Option<ProjectRef>,
  /// Builder label names, first to last.
  pub sequence: Vec<String>,
}

impl OrderDeclaration {
  pub fn new<I, S>(project: Option<ProjectRef>, sequence: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      project,
      sequence: sequence.into_iter().map(Into::into).collect(),
    }
  }
}

/// Adds prerequisite edges between consecutive builders of each declaration.
///
/// Names that match no builder are logged and left out of the sequence.
#[derive(Debug, Clone, Default)]
pub struct ForcedOrdering {
  declarations: Vec<OrderDeclaration>,
}

impl ForcedOrdering {
  pub fn new(declarations: Vec<OrderDeclaration>) -> Self {
    Self { declarations }
  }

  fn resolve(graph: &BuildGraph, declaration: &OrderDeclaration, name: &str) -> Option<BuilderId> {
    let found = graph.find_by_label(declaration.project.as_ref(), name).into_iter().next();
    if found.is_none() {
      match &declaration.project {
        Some(project) => warn!(%project, label = name, "could not find builder for forced ordering"),
        None => warn!(label = name, "could not find builder for forced ordering"),
      }
    }
    found
  }
}

impl GraphTransformation for ForcedOrdering {
  fn name(&self) -> &str {
    "forced-ordering"
  }

  fn apply(&self, graph: &mut BuildGraph) -> ControlFlow<()> {
    for declaration in &self.declarations {
      let resolved: Vec<BuilderId> = declaration
        .sequence
        .iter()
        .filter_map(|name| Self::resolve(graph, declaration, name))
        .collect();

      for pair in resolved.windows(2) {
        let (first, second) = (pair[0], pair[1]);
        if first != second && graph.add_edge(first, second) {
          debug!(
            prerequisite = %graph.builder(first),
            dependent = %graph.builder(second),
            "added forced ordering edge"
          );
        }
      }
    }
    ControlFlow::Continue(())
  }
}
