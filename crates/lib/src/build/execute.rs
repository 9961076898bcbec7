//! Execution of a sorted build graph.
//!
//! With `parallelism == 1` builders run one after the other in topological
//! order. Otherwise they are grouped into waves, where every builder's
//! prerequisites are in earlier waves, and each wave runs on a rayon pool.
//! Builders sharing an output scope never run at the same time.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use petgraph::Direction;
use petgraph::graphmap::DiGraphMap;
use rayon::prelude::*;
use tracing::{debug, error};

use crate::cache::{BuildCache, CachedBuilder, LockTable};
use crate::config::ContextConfig;
use crate::dependency::FingerprintMemo;
use crate::fs::Directory;

use super::builder::Builder;
use super::context::RunContext;
use super::graph::{BuildGraph, BuilderId};
use super::stats::BuilderStatistics;
use super::types::{BuildError, OutputSet};

pub(crate) struct Outcome {
  pub results: HashMap<BuilderId, OutputSet>,
  pub failure: Option<BuildError>,
  pub statistics: BuilderStatistics,
}

pub(crate) struct Executor<'a> {
  graph: &'a BuildGraph,
  dag: &'a DiGraphMap<BuilderId, ()>,
  cache: Arc<dyn BuildCache>,
  target: &'a dyn Directory,
  config: &'a ContextConfig,
  memo: Mutex<FingerprintMemo>,
  scopes: LockTable<String>,
  statistics: Mutex<BuilderStatistics>,
}

impl<'a> Executor<'a> {
  pub fn new(
    graph: &'a BuildGraph,
    dag: &'a DiGraphMap<BuilderId, ()>,
    cache: Arc<dyn BuildCache>,
    target: &'a dyn Directory,
    config: &'a ContextConfig,
  ) -> Self {
    Self {
      graph,
      dag,
      cache,
      target,
      config,
      memo: Mutex::new(FingerprintMemo::new()),
      scopes: LockTable::new(),
      statistics: Mutex::new(BuilderStatistics::default()),
    }
  }

  /// Run every builder of `order`, stopping at the first failure.
  pub fn execute(self, order: &[BuilderId]) -> Outcome {
    let mut results = HashMap::new();
    let failure = if self.config.parallelism <= 1 {
      self.execute_sequential(order, &mut results).err()
    } else {
      self.execute_waves(order, &mut results).err()
    };

    Outcome {
      results,
      failure,
      statistics: self.statistics.into_inner().unwrap_or_else(PoisonError::into_inner),
    }
  }

  fn execute_sequential(
    &self,
    order: &[BuilderId],
    results: &mut HashMap<BuilderId, OutputSet>,
  ) -> Result<(), BuildError> {
    for &id in order {
      let outputs = self.run_one(id, results)?;
      results.insert(id, outputs);
    }
    Ok(())
  }

  fn execute_waves(&self, order: &[BuilderId], results: &mut HashMap<BuilderId, OutputSet>) -> Result<(), BuildError> {
    let pool = rayon::ThreadPoolBuilder::new()
      .num_threads(self.config.parallelism)
      .build()
      .map_err(io::Error::other)?;

    for (idx, wave) in waves(self.dag, order).iter().enumerate() {
      debug!(wave = idx, builders = wave.len(), "executing wave");

      let snapshot: &HashMap<BuilderId, OutputSet> = results;
      let wave_results: Vec<(BuilderId, Result<OutputSet, BuildError>)> =
        pool.install(|| wave.par_iter().map(|&id| (id, self.run_one(id, snapshot))).collect());

      let mut failure = None;
      for (id, result) in wave_results {
        match result {
          Ok(outputs) => {
            results.insert(id, outputs);
          }
          Err(e) => {
            if failure.is_none() {
              failure = Some(e);
            }
          }
        }
      }
      if let Some(e) = failure {
        return Err(e);
      }
    }
    Ok(())
  }

  fn run_one(&self, id: BuilderId, results: &HashMap<BuilderId, OutputSet>) -> Result<OutputSet, BuildError> {
    let builder = self.graph.builder(id);
    let ctx = RunContext {
      graph: self.graph,
      results,
      current: id,
      target: self.target,
      memo: &self.memo,
      config: self.config,
    };

    let scope = builder.output_scope().map(|scope| self.scopes.get(&scope));
    let _scope_guard = scope
      .as_ref()
      .map(|lock| lock.lock().unwrap_or_else(PoisonError::into_inner));

    let start = Instant::now();
    let result = if builder.capabilities().should_cache {
      CachedBuilder::new(builder.clone(), self.cache.clone())
        .with_aggressive_restore(self.config.aggressive_restore)
        .run(&ctx)
    } else {
      builder.run(&ctx)
    };
    let elapsed = start.elapsed();

    self
      .statistics
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .record(builder.kind(), elapsed);

    match &result {
      Ok(outputs) => debug!(builder = %builder.key(), outputs = outputs.len(), "builder finished"),
      Err(e) => error!(builder = %builder.key(), error = %e, "builder failed"),
    }
    result
  }
}

/// Group a topological order into waves: a builder lands one wave after its
/// latest prerequisite.
fn waves(dag: &DiGraphMap<BuilderId, ()>, order: &[BuilderId]) -> Vec<Vec<BuilderId>> {
  let mut level: HashMap<BuilderId, usize> = HashMap::new();
  let mut waves: BTreeMap<usize, Vec<BuilderId>> = BTreeMap::new();

  for &id in order {
    let wave = dag
      .neighbors_directed(id, Direction::Incoming)
      .filter_map(|prerequisite| level.get(&prerequisite))
      .map(|l| l + 1)
      .max()
      .unwrap_or(0);
    level.insert(id, wave);
    waves.entry(wave).or_default().push(id);
  }

  waves
    .into_values()
    .map(|mut wave| {
      wave.sort();
      wave
    })
    .collect()
}
