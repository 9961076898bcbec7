use std::fmt;
use std::sync::{Arc, PoisonError};

use regex::Regex;
use tracing::{debug, error, warn};

use crate::build::{
  BuildContext, BuildError, Builder, BuilderId, BuilderKey, BuilderLabel, Capabilities, OutputSet, RunContext,
};
use crate::dependency::Dependency;

use super::types::{BuildCache, RestoreMode};

/// Runs a builder through a [`BuildCache`].
///
/// When the builder can run, its outputs are restored if the cached
/// fingerprint matches and produced (then stored) otherwise. Builders with
/// `fallback_to_cache` restore the last stored outputs if running fails. A
/// builder that cannot run at all is satisfied from whatever is cached.
pub struct CachedBuilder {
  inner: Arc<dyn Builder>,
  cache: Arc<dyn BuildCache>,
  aggressive: bool,
}

impl CachedBuilder {
  pub fn new(inner: Arc<dyn Builder>, cache: Arc<dyn BuildCache>) -> Self {
    let aggressive = inner.capabilities().aggressive_restore;
    Self {
      inner,
      cache,
      aggressive,
    }
  }

  /// Force aggressive restore on, in addition to the builder's own flag.
  pub fn with_aggressive_restore(mut self, aggressive: bool) -> Self {
    self.aggressive |= aggressive;
    self
  }

  pub fn inner(&self) -> &Arc<dyn Builder> {
    &self.inner
  }

  fn restore_mode(&self) -> RestoreMode<'_> {
    RestoreMode {
      aggressive: self.aggressive,
      exceptions: self.inner.aggressive_restore_exceptions(),
    }
  }

  fn restore(&self, key: &BuilderKey, ctx: &RunContext<'_>) -> Result<OutputSet, BuildError> {
    Ok(self.cache.restore(key, ctx.target(), self.restore_mode())?)
  }

  /// Whether a failed run can fall back to a cached entry. A failing lookup counts as no entry.
  fn has_fallback(&self, key: &BuilderKey) -> bool {
    match self.cache.contains_any(key) {
      Ok(found) => found,
      Err(e) => {
        warn!(builder = %key, error = %e, "cache lookup failed, no fallback available");
        false
      }
    }
  }

  fn run_or_restore(&self, key: &BuilderKey, ctx: &RunContext<'_>) -> Result<OutputSet, BuildError> {
    let fingerprint = ctx.fingerprint(&self.inner.dependencies())?;

    if self.cache.contains(key, &fingerprint)? {
      debug!(builder = %key, "restoring cached build outputs");
      return self.restore(key, ctx);
    }

    debug!(builder = %key, fingerprint = fingerprint.kind(), "running builder");
    let outputs = self.inner.run(ctx)?;

    debug!(builder = %key, outputs = outputs.len(), "storing build outputs");
    self.cache.store(key, &fingerprint, &outputs, ctx.target())?;
    Ok(outputs)
  }
}

impl Builder for CachedBuilder {
  fn kind(&self) -> &str {
    self.inner.kind()
  }

  fn uid(&self) -> String {
    self.inner.uid()
  }

  fn key(&self) -> BuilderKey {
    self.inner.key()
  }

  fn dependencies(&self) -> Dependency {
    self.inner.dependencies()
  }

  fn add_to_context(&self, ctx: &mut BuildContext) -> Result<Vec<BuilderId>, BuildError> {
    self.inner.add_to_context(ctx)
  }

  fn run(&self, ctx: &RunContext<'_>) -> Result<OutputSet, BuildError> {
    let key = self.inner.key();
    let lock = self.cache.key_lock(&key);
    let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

    if !self.inner.can_run() {
      if self.cache.contains_any(&key)? {
        warn!(builder = %key, "builder cannot run, restoring cached outputs without fingerprint check");
        return self.restore(&key, ctx);
      }
      return Err(BuildError::CannotRun(key));
    }

    match self.run_or_restore(&key, ctx) {
      Ok(outputs) => Ok(outputs),
      Err(e) => {
        error!(builder = %key, error = %e, "failed to run builder");
        if self.inner.capabilities().fallback_to_cache && self.has_fallback(&key) {
          warn!(builder = %key, "restoring cached outputs without fingerprint check");
          return self.restore(&key, ctx);
        }
        Err(e)
      }
    }
  }

  fn can_run(&self) -> bool {
    let key = self.inner.key();
    let lock = self.cache.key_lock(&key);
    let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
    self.inner.can_run() || self.cache.contains_any(&key).unwrap_or(false)
  }

  fn capabilities(&self) -> Capabilities {
    self.inner.capabilities()
  }

  fn aggressive_restore_exceptions(&self) -> &[Regex] {
    self.inner.aggressive_restore_exceptions()
  }

  fn label(&self) -> BuilderLabel {
    self.inner.label()
  }

  fn output_scope(&self) -> Option<String> {
    self.inner.output_scope()
  }
}

impl fmt::Display for CachedBuilder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}*", self.inner)
  }
}
