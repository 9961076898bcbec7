use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use regex::Regex;

use crate::dependency::Dependency;

use super::context::{BuildContext, RunContext};
use super::graph::BuilderId;
use super::types::{BuildError, BuilderKey, BuilderLabel, Capabilities, OutputSet, ProjectRef};

/// A unit of work with declared dependencies and a cacheable result.
///
/// Builders are identified by [`Builder::key`], never by instance: two
/// independently constructed builders with the same kind and Uid collapse into
/// one graph node.
pub trait Builder: Send + Sync + fmt::Display {
  /// Builder family, part of the identity key.
  fn kind(&self) -> &str;

  /// Stable identifier of the logical unit this builder produces.
  fn uid(&self) -> String;

  fn key(&self) -> BuilderKey {
    BuilderKey::new(self.kind(), self.uid())
  }

  /// Descriptor whose fingerprint decides whether cached outputs are valid.
  fn dependencies(&self) -> Dependency {
    Dependency::none()
  }

  /// Register the builder's prerequisites into `ctx` and return their ids.
  ///
  /// Called by [`BuildContext::register`], which adds the builder itself.
  /// When the context already knows this logical builder the implementation
  /// should reuse [`BuildContext::registered_prerequisites`] instead of
  /// discovering them again.
  fn add_to_context(&self, _ctx: &mut BuildContext) -> Result<Vec<BuilderId>, BuildError> {
    Ok(Vec::new())
  }

  /// Execute the work. Prerequisites have already run.
  fn run(&self, ctx: &RunContext<'_>) -> Result<OutputSet, BuildError>;

  /// Cheap check whether [`Builder::run`] can work at all.
  fn can_run(&self) -> bool {
    true
  }

  fn capabilities(&self) -> Capabilities {
    Capabilities::default()
  }

  /// Output paths matching any of these patterns are restored from the cache
  /// carefully even when aggressive restore is enabled.
  fn aggressive_restore_exceptions(&self) -> &[Regex] {
    &[]
  }

  fn label(&self) -> BuilderLabel {
    BuilderLabel::new(None, self.kind())
  }

  /// The closed set of projects an aggregate builder performs work for.
  fn work_set(&self) -> Option<BTreeSet<ProjectRef>> {
    None
  }

  /// The project a reference builder points at.
  fn referenced_unit(&self) -> Option<ProjectRef> {
    None
  }

  /// Output subdirectory this builder writes to. Builders sharing a scope never
  /// run concurrently.
  fn output_scope(&self) -> Option<String> {
    None
  }
}

type WorkFn = dyn Fn(&RunContext<'_>) -> Result<OutputSet, BuildError> + Send + Sync;

/// A leaf builder backed by a closure.
pub struct FnBuilder {
  kind: String,
  uid: String,
  dependencies: Dependency,
  prerequisites: Vec<Arc<dyn Builder>>,
  capabilities: Capabilities,
  label: Option<BuilderLabel>,
  work_set: Option<BTreeSet<ProjectRef>>,
  referenced_unit: Option<ProjectRef>,
  output_scope: Option<String>,
  can_run: bool,
  work: Box<WorkFn>,
}

impl FnBuilder {
  pub fn new<F>(kind: impl Into<String>, uid: impl Into<String>, work: F) -> Self
  where
    F: Fn(&RunContext<'_>) -> Result<OutputSet, BuildError> + Send + Sync + 'static,
  {
    Self {
      kind: kind.into(),
      uid: uid.into(),
      dependencies: Dependency::none(),
      prerequisites: Vec::new(),
      capabilities: Capabilities::default(),
      label: None,
      work_set: None,
      referenced_unit: None,
      output_scope: None,
      can_run: true,
      work: Box::new(work),
    }
  }

  pub fn with_prerequisite(mut self, builder: Arc<dyn Builder>) -> Self {
    self.prerequisites.push(builder);
    self
  }

  pub fn with_dependencies(mut self, dependencies: Dependency) -> Self {
    self.dependencies = dependencies;
    self
  }

  pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
    self.capabilities = capabilities;
    self
  }

  pub fn with_label(mut self, label: BuilderLabel) -> Self {
    self.label = Some(label);
    self
  }

  pub fn with_work_set(mut self, projects: impl IntoIterator<Item = ProjectRef>) -> Self {
    self.work_set = Some(projects.into_iter().collect());
    self
  }

  pub fn with_referenced_unit(mut self, unit: ProjectRef) -> Self {
    self.referenced_unit = Some(unit);
    self
  }

  pub fn with_output_scope(mut self, scope: impl Into<String>) -> Self {
    self.output_scope = Some(scope.into());
    self
  }

  /// Mark the builder as unable to run, e.g. because its tool is missing.
  pub fn unrunnable(mut self) -> Self {
    self.can_run = false;
    self
  }
}

impl Builder for FnBuilder {
  fn kind(&self) -> &str {
    &self.kind
  }

  fn uid(&self) -> String {
    self.uid.clone()
  }

  fn dependencies(&self) -> Dependency {
    self.dependencies.clone()
  }

  fn add_to_context(&self, ctx: &mut BuildContext) -> Result<Vec<BuilderId>, BuildError> {
    self
      .prerequisites
      .iter()
      .map(|prerequisite| ctx.register(prerequisite.clone()))
      .collect()
  }

  fn run(&self, ctx: &RunContext<'_>) -> Result<OutputSet, BuildError> {
    (self.work)(ctx)
  }

  fn can_run(&self) -> bool {
    self.can_run
  }

  fn capabilities(&self) -> Capabilities {
    self.capabilities
  }

  fn label(&self) -> BuilderLabel {
    self
      .label
      .clone()
      .unwrap_or_else(|| BuilderLabel::new(None, self.kind.clone()))
  }

  fn work_set(&self) -> Option<BTreeSet<ProjectRef>> {
    self.work_set.clone()
  }

  fn referenced_unit(&self) -> Option<ProjectRef> {
    self.referenced_unit.clone()
  }

  fn output_scope(&self) -> Option<String> {
    self.output_scope.clone()
  }
}

impl fmt::Display for FnBuilder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.kind, self.uid)
  }
}
