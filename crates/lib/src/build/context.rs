//! The build context: registration of builders and the per-run pipeline.
//!
//! A run works on a copy of the registered graph:
//! 1. forget the results of the previous run
//! 2. apply the graph transformations in registration order
//! 3. drop self edges
//! 4. prune everything the root does not (transitively) depend on
//! 5. look for a cycle
//! 6. sort topologically
//! 7. execute every builder, through the cache unless it opts out

use std::collections::{HashMap, VecDeque};
use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};

use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::dot::{Config, Dot};
use petgraph::graph::DiGraph;
use petgraph::graphmap::DiGraphMap;
use petgraph::visit::{Control, DfsEvent, Reversed, depth_first_search};
use tracing::{debug, info};

use crate::cache::{BuildCache, FileBuildCache};
use crate::config::ContextConfig;
use crate::dependency::{Dependency, Fingerprint, FingerprintMemo};
use crate::fs::{Directory, LocalDirectory};
use crate::transform::GraphTransformation;

use super::builder::Builder;
use super::execute::Executor;
use super::graph::{BuildGraph, BuilderId};
use super::stats::BuilderStatistics;
use super::types::{BuildError, BuilderKey, OutputSet};

/// Registration progress of a logical builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
  Unregistered,
  /// `add_to_context` is running; seeing the key again means a cycle.
  Registering,
  Registered,
}

pub struct BuildContext {
  config: ContextConfig,
  target: Arc<dyn Directory>,
  cache: Arc<dyn BuildCache>,
  graph: BuildGraph,
  states: HashMap<BuilderKey, RegistrationState>,
  registered: HashMap<BuilderKey, Vec<BuilderId>>,
  transformations: Vec<Box<dyn GraphTransformation>>,
  results: HashMap<BuilderKey, OutputSet>,
  statistics: BuilderStatistics,
}

impl BuildContext {
  pub fn new(config: ContextConfig, target: Arc<dyn Directory>, cache: Arc<dyn BuildCache>) -> Self {
    Self {
      config,
      target,
      cache,
      graph: BuildGraph::new(),
      states: HashMap::new(),
      registered: HashMap::new(),
      transformations: Vec::new(),
      results: HashMap::new(),
      statistics: BuilderStatistics::default(),
    }
  }

  /// Context writing to `config.target_root` with a file cache in `config.cache_dir`.
  pub fn open(config: ContextConfig) -> io::Result<Self> {
    let target: Arc<dyn Directory> = Arc::new(LocalDirectory::create(&config.target_root)?);
    let cache_root: Arc<dyn Directory> = Arc::new(LocalDirectory::create(&config.cache_dir)?);
    let cache = Arc::new(FileBuildCache::new(cache_root));
    Ok(Self::new(config, target, cache))
  }

  pub fn config(&self) -> &ContextConfig {
    &self.config
  }

  pub fn target(&self) -> &Arc<dyn Directory> {
    &self.target
  }

  pub fn graph(&self) -> &BuildGraph {
    &self.graph
  }

  pub fn builder(&self, id: BuilderId) -> &Arc<dyn Builder> {
    self.graph.builder(id)
  }

  pub fn id_of(&self, key: &BuilderKey) -> Option<BuilderId> {
    self.graph.id_of(key)
  }

  pub fn registration_state(&self, key: &BuilderKey) -> RegistrationState {
    self
      .states
      .get(key)
      .copied()
      .unwrap_or(RegistrationState::Unregistered)
  }

  /// True if an equal builder has been registered.
  pub fn contains(&self, key: &BuilderKey) -> bool {
    self.registration_state(key) == RegistrationState::Registered
  }

  /// Register a builder together with the prerequisites its
  /// [`Builder::add_to_context`] reports.
  ///
  /// Registering the same instance again is a no-op. A distinct but equal
  /// instance still gets its `add_to_context` called, so it can pick up the
  /// earlier registration; its edges are merged into the existing node.
  pub fn register(&mut self, builder: Arc<dyn Builder>) -> Result<BuilderId, BuildError> {
    let key = builder.key();
    let previous = self.registration_state(&key);
    match previous {
      RegistrationState::Registering => return Err(BuildError::RegistrationCycle(key)),
      RegistrationState::Registered => {
        if let Some(id) = self.graph.id_of(&key)
          && Arc::ptr_eq(self.graph.builder(id), &builder)
        {
          return Ok(id);
        }
        debug!(builder = %key, "registering equal builder instance");
      }
      RegistrationState::Unregistered => debug!(builder = %key, "registering builder"),
    }

    self.states.insert(key.clone(), RegistrationState::Registering);
    let prerequisites = match builder.add_to_context(self) {
      Ok(prerequisites) => prerequisites,
      Err(e) => {
        match previous {
          RegistrationState::Unregistered => self.states.remove(&key),
          state => self.states.insert(key, state),
        };
        return Err(e);
      }
    };

    Ok(self.add_builder(builder, &prerequisites))
  }

  /// Add a node with a self edge and one edge from each prerequisite.
  ///
  /// Prerequisites must already be registered.
  pub fn add_builder(&mut self, builder: Arc<dyn Builder>, prerequisites: &[BuilderId]) -> BuilderId {
    let key = builder.key();
    let id = self.graph.insert_node(builder);
    self.graph.add_edge(id, id);
    for &prerequisite in prerequisites {
      self.graph.add_edge(prerequisite, id);
    }

    let recorded = self.registered.entry(key.clone()).or_default();
    for &prerequisite in prerequisites {
      if !recorded.contains(&prerequisite) {
        recorded.push(prerequisite);
      }
    }
    debug!(builder = %key, prerequisites = prerequisites.len(), "added builder");
    self.states.insert(key, RegistrationState::Registered);
    id
  }

  /// Prerequisites recorded for a builder by earlier registrations.
  pub fn registered_prerequisites(&self, key: &BuilderKey) -> Option<&[BuilderId]> {
    self.registered.get(key).map(Vec::as_slice)
  }

  pub fn add_transformation(&mut self, transformation: impl GraphTransformation + 'static) {
    self.transformations.push(Box::new(transformation));
  }

  /// Results of a builder in the current or last run.
  pub fn results(&self, key: &BuilderKey) -> Result<&OutputSet, BuildError> {
    self.results.get(key).ok_or_else(|| BuildError::NotRun(key.clone()))
  }

  /// Every recorded output below the target root `root`.
  pub fn results_in(&self, root: &str) -> OutputSet {
    self
      .results
      .values()
      .flatten()
      .filter(|path| path.root == root)
      .cloned()
      .collect()
  }

  /// Statistics of the last run.
  pub fn statistics(&self) -> &BuilderStatistics {
    &self.statistics
  }

  /// Run the builders `root` depends on, or every registered builder.
  pub fn run(&mut self, root: Option<&BuilderKey>) -> Result<OutputSet, BuildError> {
    self.results.clear();

    let graph = self.transformed()?;
    let dag = prune(&graph, root)?;
    check_acyclic(&graph, &dag, root)?;

    let order = toposort(&dag, None).map_err(|cycle| {
      let key = graph.builder(cycle.node_id()).key();
      BuildError::CycleDetected {
        from: key.clone(),
        to: key,
      }
    })?;
    info!(builders = order.len(), parallelism = self.config.parallelism, "running build graph");

    let executor = Executor::new(&graph, &dag, self.cache.clone(), self.target.as_ref(), &self.config);
    let outcome = executor.execute(&order);

    let mut outputs = OutputSet::new();
    for id in &order {
      if let Some(result) = outcome.results.get(id) {
        outputs.extend(result.iter().cloned());
        self.results.insert(graph.builder(*id).key(), result.clone());
      }
    }
    for (from, to) in graph.aliases() {
      if let Some(result) = outcome.results.get(&to) {
        self.results.insert(graph.builder(from).key(), result.clone());
      }
    }
    self.statistics = outcome.statistics;
    self.statistics.log();

    match outcome.failure {
      Some(e) => Err(e),
      None => {
        info!(outputs = outputs.len(), "build graph finished");
        Ok(outputs)
      }
    }
  }

  /// Write the transformed and pruned graph in Graphviz DOT format.
  pub fn dump_dot(&self, root: Option<&BuilderKey>, mut writer: impl Write) -> Result<(), BuildError> {
    let graph = self.transformed()?;
    let dag = prune(&graph, root)?;

    let mut labelled: DiGraph<String, &str> = DiGraph::new();
    let mut indices = HashMap::new();
    for id in dag.nodes() {
      indices.insert(id, labelled.add_node(graph.builder(id).to_string()));
    }
    for (prerequisite, dependent, _) in dag.all_edges() {
      labelled.add_edge(indices[&prerequisite], indices[&dependent], "");
    }

    write!(writer, "{}", Dot::with_config(&labelled, &[Config::EdgeNoLabel]))?;
    Ok(())
  }

  fn transformed(&self) -> Result<BuildGraph, BuildError> {
    let mut graph = self.graph.clone();
    for transformation in &self.transformations {
      debug!(transformation = transformation.name(), "applying graph transformation");
      if transformation.apply(&mut graph).is_break() {
        info!(transformation = transformation.name(), "run cancelled by graph transformation");
        return Err(BuildError::Cancelled(transformation.name().to_string()));
      }
    }
    Ok(graph)
  }
}

/// Adjacency map without self edges, limited to what `root` depends on.
fn prune(graph: &BuildGraph, root: Option<&BuilderKey>) -> Result<DiGraphMap<BuilderId, ()>, BuildError> {
  let full = graph.to_graph_map();
  let Some(key) = root else {
    return Ok(full);
  };
  let root_id = graph
    .id_of(key)
    .filter(|&id| full.contains_node(id))
    .ok_or_else(|| BuildError::UnknownBuilder(key.clone()))?;

  let mut reachable: DiGraphMap<BuilderId, ()> = DiGraphMap::new();
  reachable.add_node(root_id);
  let mut queue = VecDeque::from([root_id]);
  while let Some(id) = queue.pop_front() {
    for prerequisite in full.neighbors_directed(id, Direction::Incoming) {
      if !reachable.contains_node(prerequisite) {
        reachable.add_node(prerequisite);
        queue.push_back(prerequisite);
      }
    }
  }

  let mut pruned = DiGraphMap::new();
  for id in reachable.nodes() {
    pruned.add_node(id);
  }
  for (prerequisite, dependent, _) in full.all_edges() {
    if reachable.contains_node(prerequisite) && reachable.contains_node(dependent) {
      pruned.add_edge(prerequisite, dependent, ());
    }
  }
  debug!(kept = pruned.node_count(), total = full.node_count(), "pruned build graph");
  Ok(pruned)
}

/// Depth-first search along prerequisite edges, reporting the first back edge.
fn check_acyclic(
  graph: &BuildGraph,
  dag: &DiGraphMap<BuilderId, ()>,
  root: Option<&BuilderKey>,
) -> Result<(), BuildError> {
  let mut starts: Vec<BuilderId> = match root.and_then(|key| graph.id_of(key)) {
    Some(id) => vec![id],
    None => dag.nodes().collect(),
  };
  starts.sort();

  let back_edge = depth_first_search(Reversed(dag), starts, |event| match event {
    DfsEvent::BackEdge(dependent, prerequisite) => Control::Break((prerequisite, dependent)),
    _ => Control::Continue,
  });

  match back_edge.break_value() {
    Some((prerequisite, dependent)) => Err(BuildError::CycleDetected {
      from: graph.builder(prerequisite).key(),
      to: graph.builder(dependent).key(),
    }),
    None => Ok(()),
  }
}

/// Read-only view of the running build handed to [`Builder::run`].
pub struct RunContext<'a> {
  pub(crate) graph: &'a BuildGraph,
  pub(crate) results: &'a HashMap<BuilderId, OutputSet>,
  pub(crate) current: BuilderId,
  pub(crate) target: &'a dyn Directory,
  pub(crate) memo: &'a Mutex<FingerprintMemo>,
  pub(crate) config: &'a ContextConfig,
}

impl<'a> RunContext<'a> {
  /// The builder being run.
  pub fn current(&self) -> BuilderId {
    self.current
  }

  pub fn target(&self) -> &'a dyn Directory {
    self.target
  }

  pub fn config(&self) -> &'a ContextConfig {
    self.config
  }

  pub fn id_of(&self, key: &BuilderKey) -> Option<BuilderId> {
    self.graph.id_of(key)
  }

  /// Results of a builder that already ran in this run.
  pub fn results(&self, key: &BuilderKey) -> Result<&'a OutputSet, BuildError> {
    self
      .graph
      .id_of(key)
      .and_then(|id| self.results.get(&id))
      .ok_or_else(|| BuildError::NotRun(key.clone()))
  }

  /// Results of the current builder's prerequisites in the transformed graph.
  pub fn prerequisite_results(&self) -> Result<Vec<(&'a Arc<dyn Builder>, &'a OutputSet)>, BuildError> {
    self
      .graph
      .prerequisites(self.current)
      .into_iter()
      .map(|id| {
        let builder = self.graph.builder(id);
        self
          .results
          .get(&id)
          .map(|outputs| (builder, outputs))
          .ok_or_else(|| BuildError::NotRun(builder.key()))
      })
      .collect()
  }

  /// Fingerprint of a dependency, memoized for the rest of the run.
  pub fn fingerprint(&self, dependency: &Dependency) -> io::Result<Fingerprint> {
    let mut memo = self.memo.lock().unwrap_or_else(PoisonError::into_inner);
    dependency.fingerprint(&mut memo)
  }
}
