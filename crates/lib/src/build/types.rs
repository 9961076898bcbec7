use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::CacheError;
use crate::fs::join_rel;
use crate::params::ParamError;

/// A path relative to the target directory, split into a root and a path
/// inside that root.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TargetPath {
  pub root: String,
  pub path: String,
}

impl TargetPath {
  pub fn new(root: impl Into<String>, path: impl Into<String>) -> Self {
    Self {
      root: root.into(),
      path: path.into(),
    }
  }

  /// Path relative to the target directory.
  pub fn full_path(&self) -> String {
    join_rel(&self.root, &self.path)
  }

  pub fn file_name(&self) -> &str {
    self.path.rsplit('/').next().unwrap_or(&self.path)
  }

  /// File name without its last extension.
  pub fn file_stem(&self) -> &str {
    let name = self.file_name();
    match name.rfind('.') {
      Some(0) | None => name,
      Some(idx) => &name[..idx],
    }
  }
}

impl fmt::Display for TargetPath {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.full_path())
  }
}

/// Outputs of a builder.
pub type OutputSet = BTreeSet<TargetPath>;

/// Logical identity of a builder: its kind and its Uid.
///
/// Two builders with equal keys are the same graph node and share a cache entry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BuilderKey {
  pub kind: String,
  pub uid: String,
}

impl BuilderKey {
  pub fn new(kind: impl Into<String>, uid: impl Into<String>) -> Self {
    Self {
      kind: kind.into(),
      uid: uid.into(),
    }
  }
}

impl fmt::Display for BuilderKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}__{}", self.kind, self.uid)
  }
}

/// A project inside a module of the suite.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProjectRef {
  pub module: String,
  pub name: String,
}

impl ProjectRef {
  pub fn new(module: impl Into<String>, name: impl Into<String>) -> Self {
    Self {
      module: module.into(),
      name: name.into(),
    }
  }
}

impl fmt::Display for ProjectRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}", self.module, self.name)
  }
}

/// Name a builder is matched by in forced ordering declarations.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BuilderLabel {
  pub project: Option<ProjectRef>,
  pub name: String,
}

impl BuilderLabel {
  pub fn new(project: Option<ProjectRef>, name: impl Into<String>) -> Self {
    Self {
      project,
      name: name.into(),
    }
  }
}

/// Capability flags of a builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
  pub is_reference: bool,
  pub is_post_processor: bool,
  /// Run through the build cache. Pure composition nodes turn this off.
  pub should_cache: bool,
  /// Restore the last cached outputs when the builder cannot run or fails.
  pub fallback_to_cache: bool,
  /// Overwrite restored files without comparing them first.
  pub aggressive_restore: bool,
}

impl Default for Capabilities {
  fn default() -> Self {
    Self {
      is_reference: false,
      is_post_processor: false,
      should_cache: true,
      fallback_to_cache: false,
      aggressive_restore: false,
    }
  }
}

impl Capabilities {
  /// Capabilities of a node that only composes other builders' results.
  pub fn composition() -> Self {
    Self {
      should_cache: false,
      ..Self::default()
    }
  }

  pub fn reference() -> Self {
    Self {
      is_reference: true,
      should_cache: false,
      ..Self::default()
    }
  }
}

/// Errors that can occur while registering or running builders.
#[derive(Debug, Error)]
pub enum BuildError {
  /// A prerequisite edge closes a cycle.
  #[error("dependency cycle detected: {from} -> {to}")]
  CycleDetected { from: BuilderKey, to: BuilderKey },

  /// Results were requested for a builder that did not run in this run.
  #[error("builder has not run in the current run: {0}")]
  NotRun(BuilderKey),

  /// A symbolic reference points at something that does not exist.
  #[error("invalid reference {reference}: {reason}")]
  InvalidReference { reference: String, reason: String },

  /// A builder's registration re-entered itself.
  #[error("builder registration re-entered itself: {0}")]
  RegistrationCycle(BuilderKey),

  #[error("builder is not registered: {0}")]
  UnknownBuilder(BuilderKey),

  #[error("builder {builder} failed: {message}")]
  BuilderFailed { builder: BuilderKey, message: String },

  /// The builder cannot run and there is nothing cached to fall back to.
  #[error("builder cannot run and has no cached outputs: {0}")]
  CannotRun(BuilderKey),

  #[error("run cancelled by graph transformation {0}")]
  Cancelled(String),

  #[error("cache error: {0}")]
  Cache(#[from] CacheError),

  #[error("parameter error: {0}")]
  Param(#[from] ParamError),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

impl BuildError {
  pub fn failed(builder: BuilderKey, message: impl fmt::Display) -> Self {
    BuildError::BuilderFailed {
      builder,
      message: message.to_string(),
    }
  }

  pub fn invalid_reference(reference: impl fmt::Display, reason: impl Into<String>) -> Self {
    BuildError::InvalidReference {
      reference: reference.to_string(),
      reason: reason.into(),
    }
  }
}
