//! Shared test helpers for engine integration tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use suitegraph_lib::build::reference::{ProjectBuilderFactory, Reference, SuiteModel};
use suitegraph_lib::build::{BuildContext, Builder, FnBuilder, OutputSet, ProjectRef, TargetPath};
use suitegraph_lib::cache::{BuildCache, MemoryBuildCache};
use suitegraph_lib::config::ContextConfig;
use suitegraph_lib::fs::{Directory, LocalDirectory};
use tempfile::TempDir;

/// Isolated test environment.
///
/// Each test gets its own temporary directory holding a target directory, a
/// source directory and a cache.
pub struct TestEnv {
  pub temp: TempDir,
  pub target: Arc<LocalDirectory>,
  pub sources: Arc<LocalDirectory>,
  pub cache: Arc<MemoryBuildCache>,
}

impl TestEnv {
  pub fn new() -> Self {
    let temp = TempDir::new().unwrap();
    let target = Arc::new(LocalDirectory::create(temp.path().join("target")).unwrap());
    let sources = Arc::new(LocalDirectory::create(temp.path().join("src")).unwrap());
    Self {
      temp,
      target,
      sources,
      cache: Arc::new(MemoryBuildCache::new()),
    }
  }

  pub fn config(&self, parallelism: usize) -> ContextConfig {
    ContextConfig::default()
      .with_parallelism(parallelism)
      .with_target_root(self.target.root())
      .with_cache_dir(self.temp.path().join("cache"))
  }

  /// Context using the in-memory cache.
  pub fn context(&self) -> BuildContext {
    self.context_with(1)
  }

  pub fn context_with(&self, parallelism: usize) -> BuildContext {
    BuildContext::new(self.config(parallelism), self.target.clone(), self.cache.clone())
  }

  /// Context using an arbitrary cache.
  pub fn context_with_cache(&self, cache: Arc<dyn BuildCache>) -> BuildContext {
    BuildContext::new(self.config(1), self.target.clone(), cache)
  }

  /// Write a source file relative to the source directory.
  pub fn write_source(&self, rel: &str, content: &str) {
    self.sources.write(rel, content.as_bytes()).unwrap();
  }
}

/// Records builder runs, in order.
#[derive(Clone, Default)]
pub struct RunLog {
  runs: Arc<Mutex<Vec<String>>>,
  count: Arc<AtomicUsize>,
}

impl RunLog {
  pub fn record(&self, name: &str) {
    self.count.fetch_add(1, Ordering::SeqCst);
    self.runs.lock().unwrap().push(name.to_string());
  }

  pub fn runs(&self) -> Vec<String> {
    self.runs.lock().unwrap().clone()
  }

  pub fn count(&self) -> usize {
    self.count.load(Ordering::SeqCst)
  }

  pub fn count_of(&self, name: &str) -> usize {
    self.runs.lock().unwrap().iter().filter(|r| *r == name).count()
  }

  pub fn position(&self, name: &str) -> Option<usize> {
    self.runs.lock().unwrap().iter().position(|r| r == name)
  }
}

/// A builder with no output, logging its runs.
pub fn task(uid: &str, log: &RunLog) -> FnBuilder {
  let log = log.clone();
  let name = uid.to_string();
  FnBuilder::new("task", uid, move |_| {
    log.record(&name);
    Ok(OutputSet::new())
  })
}

/// A builder writing `content` to `out/<uid>.txt`.
pub fn writer(uid: &str, content: &'static str, log: &RunLog) -> FnBuilder {
  let log = log.clone();
  let name = uid.to_string();
  FnBuilder::new("write", uid, move |ctx| {
    log.record(&name);
    let rel = format!("{name}.txt");
    ctx.target().write(&format!("out/{rel}"), content.as_bytes())?;
    Ok(OutputSet::from([TargetPath::new("out", rel)]))
  })
}

pub fn arc(builder: FnBuilder) -> Arc<dyn Builder> {
  Arc::new(builder)
}

/// In-memory suite model: modules with projects, plus an alias table.
#[derive(Default)]
pub struct TestSuite {
  modules: BTreeMap<String, BTreeSet<String>>,
  aliases: BTreeMap<String, Vec<Reference>>,
}

impl TestSuite {
  pub fn module(mut self, name: &str, projects: &[&str]) -> Self {
    self
      .modules
      .insert(name.to_string(), projects.iter().map(|p| p.to_string()).collect());
    self
  }

  pub fn alias(mut self, name: &str, references: Vec<Reference>) -> Self {
    self.aliases.insert(name.to_string(), references);
    self
  }
}

impl SuiteModel for TestSuite {
  fn has_module(&self, module: &str) -> bool {
    self.modules.contains_key(module)
  }

  fn project(&self, module: &str, name: &str) -> Option<ProjectRef> {
    self
      .modules
      .get(module)
      .filter(|projects| projects.contains(name))
      .map(|_| ProjectRef::new(module, name))
  }

  fn alias(&self, name: &str) -> Option<Vec<Reference>> {
    self.aliases.get(name).cloned()
  }
}

/// Creates one builder per project, writing `bin/<project>.dll`.
#[derive(Clone, Default)]
pub struct ProjectFactory {
  pub log: RunLog,
  pub calls: Arc<AtomicUsize>,
}

impl ProjectBuilderFactory for ProjectFactory {
  fn builder_for(&self, projects: &[ProjectRef]) -> Option<Arc<dyn Builder>> {
    let [project] = projects else {
      return None;
    };
    self.calls.fetch_add(1, Ordering::SeqCst);
    let log = self.log.clone();
    let name = project.name.clone();
    Some(arc(
      FnBuilder::new("project", project.to_string(), move |ctx| {
        log.record(&name);
        let rel = format!("{name}.dll");
        ctx.target().write(&format!("bin/{rel}"), name.as_bytes())?;
        Ok(OutputSet::from([TargetPath::new("bin", rel)]))
      })
      .with_work_set([project.clone()]),
    ))
  }
}

pub fn parse(uri: &str) -> Reference {
  uri.parse().unwrap()
}
