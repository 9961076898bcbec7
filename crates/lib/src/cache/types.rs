use std::collections::HashMap;
use std::hash::Hash;
use std::io;
use std::sync::{Arc, Mutex, PoisonError};

use regex::Regex;
use thiserror::Error;

use crate::build::{BuilderKey, OutputSet};
use crate::dependency::Fingerprint;
use crate::fs::Directory;

#[derive(Debug, Error)]
pub enum CacheError {
  #[error("io error: {0}")]
  Io(#[from] io::Error),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error("corrupt cache entry for {key}: {message}")]
  Corrupt { key: BuilderKey, message: String },
}

/// How restored files are written back to the target directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct RestoreMode<'a> {
  /// Overwrite without comparing first.
  pub aggressive: bool,
  /// Paths matching any of these are compared first even in aggressive mode.
  pub exceptions: &'a [Regex],
}

impl RestoreMode<'_> {
  pub fn careful() -> Self {
    Self::default()
  }

  pub fn overwrites(&self, path: &str) -> bool {
    self.aggressive && !self.exceptions.iter().any(|re| re.is_match(path))
  }
}

/// Persistent store of builder outputs keyed by builder and fingerprint.
///
/// Only the latest entry per builder is kept. Callers that check and then
/// store or restore hold [`BuildCache::key_lock`] for the whole sequence.
pub trait BuildCache: Send + Sync {
  /// Lock serializing cache access for one builder.
  fn key_lock(&self, key: &BuilderKey) -> Arc<Mutex<()>>;

  /// True if the stored entry was produced with an equal fingerprint.
  fn contains(&self, key: &BuilderKey, fingerprint: &Fingerprint) -> Result<bool, CacheError>;

  /// True if anything is stored for the builder.
  fn contains_any(&self, key: &BuilderKey) -> Result<bool, CacheError>;

  /// Store the builder's outputs, read from `target`.
  fn store(
    &self,
    key: &BuilderKey,
    fingerprint: &Fingerprint,
    outputs: &OutputSet,
    target: &dyn Directory,
  ) -> Result<(), CacheError>;

  /// Write the stored outputs back into `target` and return their paths.
  fn restore(&self, key: &BuilderKey, target: &dyn Directory, mode: RestoreMode<'_>) -> Result<OutputSet, CacheError>;
}

/// Lazily created mutexes, one per key.
#[derive(Debug)]
pub struct LockTable<K> {
  locks: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K> Default for LockTable<K> {
  fn default() -> Self {
    Self {
      locks: Mutex::new(HashMap::new()),
    }
  }
}

impl<K: Eq + Hash + Clone> LockTable<K> {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn get(&self, key: &K) -> Arc<Mutex<()>> {
    let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
    locks.entry(key.clone()).or_default().clone()
  }
}

/// A cache that never holds anything.
#[derive(Debug, Default)]
pub struct NullBuildCache {
  locks: LockTable<BuilderKey>,
}

impl NullBuildCache {
  pub fn new() -> Self {
    Self::default()
  }
}

impl BuildCache for NullBuildCache {
  fn key_lock(&self, key: &BuilderKey) -> Arc<Mutex<()>> {
    self.locks.get(key)
  }

  fn contains(&self, _key: &BuilderKey, _fingerprint: &Fingerprint) -> Result<bool, CacheError> {
    Ok(false)
  }

  fn contains_any(&self, _key: &BuilderKey) -> Result<bool, CacheError> {
    Ok(false)
  }

  fn store(&self, _: &BuilderKey, _: &Fingerprint, _: &OutputSet, _: &dyn Directory) -> Result<(), CacheError> {
    Ok(())
  }

  fn restore(&self, _: &BuilderKey, _: &dyn Directory, _: RestoreMode<'_>) -> Result<OutputSet, CacheError> {
    Ok(OutputSet::new())
  }
}
