//! Process-local build cache.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::build::{BuilderKey, OutputSet, TargetPath};
use crate::dependency::Fingerprint;
use crate::fs::Directory;

use super::types::{BuildCache, CacheError, LockTable, RestoreMode};
use super::write_if_different;

/// A stored output; `content` is `None` for paths that did not exist as files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct CachedOutput {
  path: TargetPath,
  content: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MemoryEntry {
  key: BuilderKey,
  fingerprint: Fingerprint,
  outputs: Vec<CachedOutput>,
}

/// Build cache holding output contents in memory.
///
/// [`MemoryBuildCache::save`] and [`MemoryBuildCache::load`] move the whole
/// cache through a JSON snapshot.
#[derive(Debug, Default)]
pub struct MemoryBuildCache {
  entries: RwLock<BTreeMap<BuilderKey, MemoryEntry>>,
  locks: LockTable<BuilderKey>,
}

impl MemoryBuildCache {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Write every entry as JSON.
  pub fn save(&self, writer: impl Write) -> Result<(), CacheError> {
    let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
    let snapshot: Vec<&MemoryEntry> = entries.values().collect();
    serde_json::to_writer(writer, &snapshot)?;
    Ok(())
  }

  /// Build a cache from a snapshot written by [`MemoryBuildCache::save`].
  pub fn load(reader: impl Read) -> Result<Self, CacheError> {
    let snapshot: Vec<MemoryEntry> = serde_json::from_reader(reader)?;
    let entries = snapshot.into_iter().map(|entry| (entry.key.clone(), entry)).collect();
    Ok(Self {
      entries: RwLock::new(entries),
      locks: LockTable::new(),
    })
  }
}

impl BuildCache for MemoryBuildCache {
  fn key_lock(&self, key: &BuilderKey) -> Arc<Mutex<()>> {
    self.locks.get(key)
  }

  fn contains(&self, key: &BuilderKey, fingerprint: &Fingerprint) -> Result<bool, CacheError> {
    let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
    Ok(entries.get(key).is_some_and(|entry| entry.fingerprint == *fingerprint))
  }

  fn contains_any(&self, key: &BuilderKey) -> Result<bool, CacheError> {
    let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
    Ok(entries.contains_key(key))
  }

  fn store(
    &self,
    key: &BuilderKey,
    fingerprint: &Fingerprint,
    outputs: &OutputSet,
    target: &dyn Directory,
  ) -> Result<(), CacheError> {
    let mut cached = Vec::with_capacity(outputs.len());
    for path in outputs {
      let rel = path.full_path();
      let content = if target.exists(&rel) { Some(target.read(&rel)?) } else { None };
      cached.push(CachedOutput {
        path: path.clone(),
        content,
      });
    }

    debug!(builder = %key, outputs = cached.len(), "storing outputs in memory cache");
    let entry = MemoryEntry {
      key: key.clone(),
      fingerprint: fingerprint.clone(),
      outputs: cached,
    };
    self
      .entries
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .insert(key.clone(), entry);
    Ok(())
  }

  fn restore(&self, key: &BuilderKey, target: &dyn Directory, mode: RestoreMode<'_>) -> Result<OutputSet, CacheError> {
    let outputs = {
      let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
      match entries.get(key) {
        Some(entry) => entry.outputs.clone(),
        None => return Ok(OutputSet::new()),
      }
    };

    let mut restored = OutputSet::new();
    for output in outputs {
      if let Some(content) = &output.content {
        let rel = output.path.full_path();
        if mode.overwrites(&rel) {
          target.write(&rel, content)?;
        } else {
          write_if_different(target, &rel, content)?;
        }
      }
      restored.insert(output.path);
    }
    Ok(restored)
  }
}
