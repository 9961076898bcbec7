//! Test utilities for suitegraph-lib.
//!
//! Helpers for tests that need a scratch target directory, a cache and
//! builders that count how often they run.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tempfile::TempDir;

use crate::build::{BuildContext, FnBuilder, OutputSet, TargetPath};
use crate::cache::MemoryBuildCache;
use crate::config::ContextConfig;
use crate::fs::{Directory, LocalDirectory};

/// A temporary target directory with an in-memory cache.
pub struct Workspace {
  pub temp: TempDir,
  pub target: Arc<LocalDirectory>,
  pub cache: Arc<MemoryBuildCache>,
}

impl Workspace {
  pub fn new() -> Self {
    let temp = TempDir::new().unwrap();
    let target = Arc::new(LocalDirectory::create(temp.path().join("target")).unwrap());
    Self {
      temp,
      target,
      cache: Arc::new(MemoryBuildCache::new()),
    }
  }

  /// A fresh context over this workspace's target and cache.
  pub fn context(&self, parallelism: usize) -> BuildContext {
    let config = ContextConfig::default()
      .with_parallelism(parallelism)
      .with_target_root(self.target.root())
      .with_cache_dir(self.temp.path().join("cache"));
    BuildContext::new(config, self.target.clone(), self.cache.clone())
  }
}

/// Shared run counter.
#[derive(Clone, Default)]
pub struct Counter(Arc<AtomicUsize>);

impl Counter {
  pub fn hit(&self) {
    self.0.fetch_add(1, Ordering::SeqCst);
  }

  pub fn get(&self) -> usize {
    self.0.load(Ordering::SeqCst)
  }
}

/// A builder writing `content` to `out/<uid>.txt` and counting its runs.
pub fn writer(uid: &str, content: &'static str, counter: &Counter) -> FnBuilder {
  let counter = counter.clone();
  let file = format!("{uid}.txt");
  FnBuilder::new("write", uid, move |ctx| {
    counter.hit();
    ctx.target().write(&format!("out/{file}"), content.as_bytes())?;
    Ok(OutputSet::from([TargetPath::new("out", file.clone())]))
  })
}
