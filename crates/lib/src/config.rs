//! Build context configuration.

use std::path::PathBuf;

use tracing::warn;

use crate::consts::{ENV_AGGRESSIVE_RESTORE, ENV_PARALLELISM};
use crate::platform::paths::cache_dir;

/// Settings of a [`crate::build::BuildContext`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextConfig {
  /// Maximum number of builders executed at the same time. `1` runs strictly
  /// in topological order on the calling thread.
  pub parallelism: usize,

  /// Root of the persistent build cache.
  pub cache_dir: PathBuf,

  /// Directory builder outputs are relative to.
  pub target_root: PathBuf,

  /// Overwrite files on cache restore without comparing them first, for every builder.
  pub aggressive_restore: bool,
}

impl Default for ContextConfig {
  fn default() -> Self {
    Self {
      parallelism: num_cpus(),
      cache_dir: cache_dir(),
      target_root: PathBuf::from("target"),
      aggressive_restore: false,
    }
  }
}

impl ContextConfig {
  /// Defaults overridden by environment variables.
  ///
  /// Unparseable values are logged and ignored.
  pub fn from_env() -> Self {
    let mut config = Self::default();

    if let Ok(value) = std::env::var(ENV_PARALLELISM) {
      match value.trim().parse::<usize>() {
        Ok(n) if n > 0 => config.parallelism = n,
        _ => warn!(var = ENV_PARALLELISM, value = %value, "ignoring invalid parallelism"),
      }
    }

    if let Ok(value) = std::env::var(ENV_AGGRESSIVE_RESTORE) {
      match value.trim() {
        "1" | "true" | "yes" => config.aggressive_restore = true,
        "0" | "false" | "no" | "" => config.aggressive_restore = false,
        _ => warn!(var = ENV_AGGRESSIVE_RESTORE, value = %value, "ignoring invalid flag"),
      }
    }

    config
  }

  pub fn with_parallelism(mut self, parallelism: usize) -> Self {
    self.parallelism = parallelism.max(1);
    self
  }

  pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
    self.cache_dir = dir.into();
    self
  }

  pub fn with_target_root(mut self, dir: impl Into<PathBuf>) -> Self {
    self.target_root = dir.into();
    self
  }
}

fn num_cpus() -> usize {
  std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4)
}
