//! Elimination of redundant aggregate builds.
//!
//! An aggregate is a builder that reports a [`Builder::work_set`], the closed
//! set of projects it builds in one go (e.g. a whole solution). Two passes
//! run in order:
//!
//! 1. Aggregates with identical work sets collapse into the one with the
//!    smallest Uid. Their dependents are redirected to it and their
//!    prerequisites move over.
//! 2. A reference to a project that an aggregate already builds, used by a
//!    builder inside that aggregate, stops depending on its own sub-builders.
//!    It runs after the aggregate instead, and the builders inside the
//!    aggregate no longer wait for it.
//!
//! Each rewrite is tried on a copy of the graph and dropped if the copy has a
//! cycle.
//!
//! [`Builder::work_set`]: crate::build::Builder::work_set

use std::collections::{BTreeMap, BTreeSet};
use std::ops::ControlFlow;

use tracing::{debug, info};

use crate::build::{BuildGraph, BuilderId, ProjectRef};

use super::GraphTransformation;

#[derive(Debug, Clone, Copy, Default)]
pub struct RedundantAggregates;

impl RedundantAggregates {
  pub fn new() -> Self {
    Self
  }

  /// Sort ids by Uid, then kind, so tie-breaks do not depend on registration order.
  fn sort_by_uid(graph: &BuildGraph, ids: &mut [BuilderId]) {
    ids.sort_by_cached_key(|&id| {
      let key = graph.builder(id).key();
      (key.uid, key.kind)
    });
  }

  fn aggregates(graph: &BuildGraph) -> BTreeMap<BuilderId, BTreeSet<ProjectRef>> {
    graph
      .nodes()
      .into_iter()
      .filter_map(|id| {
        let work = graph.builder(id).work_set()?;
        (!work.is_empty()).then_some((id, work))
      })
      .collect()
  }

  fn collapse_duplicates(graph: &mut BuildGraph) {
    let mut groups: BTreeMap<BTreeSet<ProjectRef>, Vec<BuilderId>> = BTreeMap::new();
    for (id, work) in Self::aggregates(graph) {
      groups.entry(work).or_default().push(id);
    }

    for (_, mut members) in groups {
      if members.len() < 2 {
        continue;
      }
      Self::sort_by_uid(graph, &mut members);
      let canonical = members[0];

      for &duplicate in &members[1..] {
        let mut trial = graph.clone();
        trial.merge_into(duplicate, canonical);
        if trial.has_cycle() {
          debug!(
            duplicate = %graph.builder(duplicate),
            canonical = %graph.builder(canonical),
            "keeping duplicate aggregate, merging would create a cycle"
          );
          continue;
        }
        info!(
          duplicate = %graph.builder(duplicate),
          canonical = %graph.builder(canonical),
          "collapsed redundant aggregate"
        );
        *graph = trial;
      }
    }
  }

  fn narrow_references(graph: &mut BuildGraph) {
    let references: Vec<(BuilderId, ProjectRef)> = graph
      .nodes()
      .into_iter()
      .filter(|&id| graph.builder(id).capabilities().is_reference)
      .filter_map(|id| graph.builder(id).referenced_unit().map(|unit| (id, unit)))
      .collect();

    for (reference, unit) in references {
      let aggregates = Self::aggregates(graph);
      let mut candidates: Vec<BuilderId> = aggregates
        .iter()
        .filter(|&(&id, work)| id != reference && work.contains(&unit))
        .map(|(&id, _)| id)
        .collect();
      Self::sort_by_uid(graph, &mut candidates);

      for aggregate in candidates {
        let inside: Vec<BuilderId> = graph
          .dependents(reference)
          .into_iter()
          .filter(|&dependent| graph.has_edge(dependent, aggregate))
          .collect();
        if inside.is_empty() {
          continue;
        }

        let mut trial = graph.clone();
        for &dependent in &inside {
          trial.remove_edge(reference, dependent);
        }
        for prerequisite in trial.prerequisites(reference) {
          trial.remove_edge(prerequisite, reference);
        }
        trial.add_edge(aggregate, reference);

        if trial.has_cycle() {
          debug!(
            reference = %graph.builder(reference),
            aggregate = %graph.builder(aggregate),
            "cannot narrow reference, rewrite would create a cycle"
          );
          continue;
        }
        info!(
          reference = %graph.builder(reference),
          aggregate = %graph.builder(aggregate),
          "narrowed reference to shared aggregate"
        );
        *graph = trial;
        break;
      }
    }
  }
}

impl GraphTransformation for RedundantAggregates {
  fn name(&self) -> &str {
    "redundant-aggregates"
  }

  fn apply(&self, graph: &mut BuildGraph) -> ControlFlow<()> {
    Self::collapse_duplicates(graph);
    Self::narrow_references(graph);
    ControlFlow::Continue(())
  }
}
