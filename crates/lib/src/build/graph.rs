//! The mutable prerequisite graph that transformations rewrite.
//!
//! Builders live in an append-only arena addressed by [`BuilderId`]; the
//! graph structure is an ordered set of [`Edge`]s. A node counts as part of
//! the graph while at least one edge touches it. Registration adds a self
//! edge, so isolated builders are still present.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use petgraph::algo::is_cyclic_directed;
use petgraph::graphmap::DiGraphMap;

use super::builder::Builder;
use super::types::{BuilderKey, BuilderLabel, ProjectRef};

/// Stable handle of a builder inside a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BuilderId(pub(crate) usize);

impl BuilderId {
  pub fn index(self) -> usize {
    self.0
  }
}

impl fmt::Display for BuilderId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "#{}", self.0)
  }
}

/// A prerequisite relation: `prerequisite` must run before `dependent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Edge {
  pub prerequisite: BuilderId,
  pub dependent: BuilderId,
}

impl Edge {
  pub fn new(prerequisite: BuilderId, dependent: BuilderId) -> Self {
    Self {
      prerequisite,
      dependent,
    }
  }

  pub fn is_self_edge(&self) -> bool {
    self.prerequisite == self.dependent
  }
}

#[derive(Clone, Default)]
pub struct BuildGraph {
  nodes: Vec<Arc<dyn Builder>>,
  index: HashMap<BuilderKey, BuilderId>,
  edges: BTreeSet<Edge>,
  /// Builders merged into another one, mapped to the builder that replaced them.
  aliases: HashMap<BuilderId, BuilderId>,
}

impl BuildGraph {
  pub fn new() -> Self {
    Self::default()
  }

  /// Add a builder to the arena, or return the id of the equal builder already there.
  pub fn insert_node(&mut self, builder: Arc<dyn Builder>) -> BuilderId {
    let key = builder.key();
    if let Some(&id) = self.index.get(&key) {
      return id;
    }
    let id = BuilderId(self.nodes.len());
    self.nodes.push(builder);
    self.index.insert(key, id);
    id
  }

  /// The builder behind `id`. Ids always come from this graph's arena.
  pub fn builder(&self, id: BuilderId) -> &Arc<dyn Builder> {
    &self.nodes[id.0]
  }

  /// Id of the builder answering for `key`, following merges.
  pub fn id_of(&self, key: &BuilderKey) -> Option<BuilderId> {
    self.index.get(key).map(|&id| self.canonical(id))
  }

  /// The builder that stands in for `id` after merges, or `id` itself.
  pub fn canonical(&self, mut id: BuilderId) -> BuilderId {
    while let Some(&to) = self.aliases.get(&id) {
      id = to;
    }
    id
  }

  /// Merged builders paired with the builder that now answers for them.
  pub fn aliases(&self) -> Vec<(BuilderId, BuilderId)> {
    let mut pairs: Vec<_> = self.aliases.keys().map(|&from| (from, self.canonical(from))).collect();
    pairs.sort();
    pairs
  }

  /// Move every edge touching `from` over to `to` and record `from` as an alias of `to`.
  pub fn merge_into(&mut self, from: BuilderId, to: BuilderId) {
    let to = self.canonical(to);
    if from == to {
      return;
    }
    let touching: Vec<_> = self
      .edges
      .iter()
      .filter(|e| e.prerequisite == from || e.dependent == from)
      .copied()
      .collect();
    for edge in touching {
      self.edges.remove(&edge);
      let prerequisite = if edge.prerequisite == from { to } else { edge.prerequisite };
      let dependent = if edge.dependent == from { to } else { edge.dependent };
      self.edges.insert(Edge::new(prerequisite, dependent));
    }
    self.aliases.insert(from, to);
  }

  pub fn add_edge(&mut self, prerequisite: BuilderId, dependent: BuilderId) -> bool {
    self.edges.insert(Edge::new(prerequisite, dependent))
  }

  pub fn remove_edge(&mut self, prerequisite: BuilderId, dependent: BuilderId) -> bool {
    self.edges.remove(&Edge::new(prerequisite, dependent))
  }

  pub fn has_edge(&self, prerequisite: BuilderId, dependent: BuilderId) -> bool {
    self.edges.contains(&Edge::new(prerequisite, dependent))
  }

  pub fn edges(&self) -> impl Iterator<Item = Edge> + '_ {
    self.edges.iter().copied()
  }

  pub fn edge_count(&self) -> usize {
    self.edges.len()
  }

  /// Keep only the edges matching `keep`.
  pub fn retain(&mut self, mut keep: impl FnMut(&Edge) -> bool) {
    self.edges.retain(|edge| keep(edge));
  }

  /// True if the builder is part of the graph.
  pub fn contains(&self, id: BuilderId) -> bool {
    self.edges.iter().any(|e| e.prerequisite == id || e.dependent == id)
  }

  /// Ids of all builders in the graph, ascending.
  pub fn nodes(&self) -> BTreeSet<BuilderId> {
    self
      .edges
      .iter()
      .flat_map(|e| [e.prerequisite, e.dependent])
      .collect()
  }

  /// Edges whose dependent is `id`, self edges excluded.
  pub fn edges_into(&self, id: BuilderId) -> Vec<Edge> {
    self
      .edges
      .iter()
      .filter(|e| e.dependent == id && !e.is_self_edge())
      .copied()
      .collect()
  }

  /// Edges whose prerequisite is `id`, self edges excluded.
  pub fn edges_from(&self, id: BuilderId) -> Vec<Edge> {
    self
      .edges
      .iter()
      .filter(|e| e.prerequisite == id && !e.is_self_edge())
      .copied()
      .collect()
  }

  pub fn prerequisites(&self, id: BuilderId) -> Vec<BuilderId> {
    self.edges_into(id).into_iter().map(|e| e.prerequisite).collect()
  }

  pub fn dependents(&self, id: BuilderId) -> Vec<BuilderId> {
    self.edges_from(id).into_iter().map(|e| e.dependent).collect()
  }

  /// Builders in the graph whose label matches, ascending by id.
  pub fn find_by_label(&self, project: Option<&ProjectRef>, name: &str) -> Vec<BuilderId> {
    self
      .nodes()
      .into_iter()
      .filter(|&id| {
        let BuilderLabel { project: p, name: n } = self.builder(id).label();
        n == name && p.as_ref() == project
      })
      .collect()
  }

  /// Adjacency view without self edges.
  pub fn to_graph_map(&self) -> DiGraphMap<BuilderId, ()> {
    let mut map = DiGraphMap::new();
    for id in self.nodes() {
      map.add_node(id);
    }
    for edge in self.edges.iter().filter(|e| !e.is_self_edge()) {
      map.add_edge(edge.prerequisite, edge.dependent, ());
    }
    map
  }

  pub fn has_cycle(&self) -> bool {
    is_cyclic_directed(&self.to_graph_map())
  }
}

impl fmt::Debug for BuildGraph {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let edges: Vec<String> = self
      .edges
      .iter()
      .map(|e| format!("{} -> {}", self.builder(e.prerequisite), self.builder(e.dependent)))
      .collect();
    f.debug_struct("BuildGraph")
      .field("nodes", &self.nodes.len())
      .field("edges", &edges)
      .finish()
  }
}
