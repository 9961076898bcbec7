//! Build cache persisted below a cache root directory.
//!
//! Every builder gets one entry directory holding:
//! - `.deps`: the serialized fingerprint the outputs were produced with
//! - `.names`: a JSON manifest of the output paths
//! - `0`, `1`, ...: contents of the outputs that existed as files
//!
//! `.deps` is written last, so an interrupted store leaves an entry that
//! [`BuildCache::contains_any`] does not report.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::build::{BuilderKey, OutputSet, TargetPath};
use crate::consts::{CACHE_DEPS_FILENAME, CACHE_NAMES_FILENAME};
use crate::dependency::Fingerprint;
use crate::fs::Directory;

use super::types::{BuildCache, CacheError, LockTable, RestoreMode};
use super::{copy_if_different, entry_dir_name};

#[derive(Debug, Serialize, Deserialize)]
struct ManifestEntry {
  root: String,
  path: String,
  /// Name of the content file, absent for outputs that were not files.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  file: Option<String>,
}

#[derive(Debug)]
pub struct FileBuildCache {
  root: Arc<dyn Directory>,
  locks: LockTable<BuilderKey>,
}

impl FileBuildCache {
  pub fn new(root: Arc<dyn Directory>) -> Self {
    Self {
      root,
      locks: LockTable::new(),
    }
  }

  fn entry(&self, key: &BuilderKey) -> Result<Option<Box<dyn Directory>>, CacheError> {
    let name = entry_dir_name(key);
    if !self.root.child_directories()?.contains(&name) {
      return Ok(None);
    }
    Ok(Some(self.root.child(&name, false)?))
  }
}

impl BuildCache for FileBuildCache {
  fn key_lock(&self, key: &BuilderKey) -> Arc<Mutex<()>> {
    self.locks.get(key)
  }

  fn contains(&self, key: &BuilderKey, fingerprint: &Fingerprint) -> Result<bool, CacheError> {
    let Some(entry) = self.entry(key)? else {
      return Ok(false);
    };
    if !entry.exists(CACHE_DEPS_FILENAME) {
      return Ok(false);
    }

    match Fingerprint::from_bytes(&entry.read(CACHE_DEPS_FILENAME)?) {
      Ok(stored) => Ok(stored == *fingerprint),
      Err(e) => {
        warn!(builder = %key, error = %e, "unreadable cached fingerprint, ignoring entry");
        Ok(false)
      }
    }
  }

  fn contains_any(&self, key: &BuilderKey) -> Result<bool, CacheError> {
    Ok(self.entry(key)?.is_some_and(|entry| entry.exists(CACHE_DEPS_FILENAME)))
  }

  fn store(
    &self,
    key: &BuilderKey,
    fingerprint: &Fingerprint,
    outputs: &OutputSet,
    target: &dyn Directory,
  ) -> Result<(), CacheError> {
    let name = entry_dir_name(key);
    self.root.delete_dir(&name)?;
    let entry = self.root.child(&name, true)?;

    let mut manifest = Vec::with_capacity(outputs.len());
    for (idx, output) in outputs.iter().enumerate() {
      let rel = output.full_path();
      // An output path may be virtual and not refer to a file.
      let file = if target.exists(&rel) {
        let file = idx.to_string();
        target.copy_file(&rel, entry.as_ref(), &file)?;
        Some(file)
      } else {
        None
      };
      manifest.push(ManifestEntry {
        root: output.root.clone(),
        path: output.path.clone(),
        file,
      });
    }

    entry.write(CACHE_NAMES_FILENAME, &serde_json::to_vec_pretty(&manifest)?)?;
    entry.write(CACHE_DEPS_FILENAME, &fingerprint.to_bytes()?)?;
    debug!(builder = %key, outputs = manifest.len(), "stored outputs in file cache");
    Ok(())
  }

  fn restore(&self, key: &BuilderKey, target: &dyn Directory, mode: RestoreMode<'_>) -> Result<OutputSet, CacheError> {
    let Some(entry) = self.entry(key)? else {
      return Ok(OutputSet::new());
    };
    if !entry.exists(CACHE_NAMES_FILENAME) {
      return Ok(OutputSet::new());
    }

    let manifest: Vec<ManifestEntry> =
      serde_json::from_slice(&entry.read(CACHE_NAMES_FILENAME)?).map_err(|e| CacheError::Corrupt {
        key: key.clone(),
        message: e.to_string(),
      })?;

    let mut restored = OutputSet::new();
    for item in manifest {
      let output = TargetPath::new(item.root, item.path);
      if let Some(file) = item.file.as_deref()
        && entry.exists(file)
      {
        let rel = output.full_path();
        if mode.overwrites(&rel) {
          entry.copy_file(file, target, &rel)?;
        } else {
          if mode.aggressive {
            debug!(path = %rel, "aggressive restore disabled for file");
          }
          copy_if_different(entry.as_ref(), file, target, &rel)?;
        }
      }
      restored.insert(output);
    }
    Ok(restored)
  }
}
