//! Builders resolving symbolic references to other projects.
//!
//! References are written as URIs:
//! - `alias://name` expands through the suite's alias table
//! - `module://project` points at a project of the referencing module
//! - `suite://module/project` points at any project of the suite
//!
//! Resolution happens in [`Builder::add_to_context`], when the whole suite
//! model is known. A builder registered again for the same reference reuses
//! the sub-builders found by the first registration.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, OnceLock, Weak};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dependency::Dependency;

use super::builder::Builder;
use super::context::{BuildContext, RunContext};
use super::graph::BuilderId;
use super::types::{BuildError, BuilderKey, BuilderLabel, Capabilities, OutputSet, ProjectRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceKind {
  Alias,
  Module,
  Suite,
}

impl ReferenceKind {
  pub fn scheme(&self) -> &'static str {
    match self {
      ReferenceKind::Alias => "alias",
      ReferenceKind::Module => "module",
      ReferenceKind::Suite => "suite",
    }
  }
}

/// Whether a reference is needed to build or only at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceType {
  #[default]
  Build,
  Runtime,
}

impl fmt::Display for ReferenceType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ReferenceType::Build => write!(f, "Build"),
      ReferenceType::Runtime => write!(f, "Runtime"),
    }
  }
}

/// A symbolic reference to a project or an alias.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Reference {
  pub kind: ReferenceKind,
  /// Alias name, project name or module name, depending on the kind.
  pub target: String,
  /// Project name of suite references, empty otherwise.
  pub path: String,
  pub ty: ReferenceType,
}

impl Reference {
  pub fn with_type(mut self, ty: ReferenceType) -> Self {
    self.ty = ty;
    self
  }
}

impl FromStr for Reference {
  type Err = BuildError;

  fn from_str(uri: &str) -> Result<Self, Self::Err> {
    let (scheme, rest) = uri
      .split_once("://")
      .ok_or_else(|| BuildError::invalid_reference(uri, "missing scheme"))?;
    let kind = match scheme {
      "alias" => ReferenceKind::Alias,
      "module" => ReferenceKind::Module,
      "suite" => ReferenceKind::Suite,
      other => return Err(BuildError::invalid_reference(uri, format!("unknown scheme {other}"))),
    };

    let rest = rest.trim_end_matches('/');
    let (target, path) = match kind {
      ReferenceKind::Suite => rest
        .split_once('/')
        .ok_or_else(|| BuildError::invalid_reference(uri, "expected suite://module/project"))?,
      _ => (rest, ""),
    };
    if target.is_empty() || (kind == ReferenceKind::Suite && path.is_empty()) || path.contains('/') {
      return Err(BuildError::invalid_reference(uri, "malformed reference"));
    }

    Ok(Reference {
      kind,
      target: target.to_string(),
      path: path.to_string(),
      ty: ReferenceType::default(),
    })
  }
}

impl fmt::Display for Reference {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}://{}", self.kind.scheme(), self.target)?;
    if !self.path.is_empty() {
      write!(f, "/{}", self.path)?;
    }
    Ok(())
  }
}

/// Lookups into the suite model.
pub trait SuiteModel: Send + Sync {
  fn has_module(&self, module: &str) -> bool;

  /// A project or test project of a module.
  fn project(&self, module: &str, name: &str) -> Option<ProjectRef>;

  /// References an alias expands to, or `None` if no such alias exists.
  fn alias(&self, name: &str) -> Option<Vec<Reference>>;
}

/// Creates the builder producing a set of projects.
pub trait ProjectBuilderFactory: Send + Sync {
  fn builder_for(&self, projects: &[ProjectRef]) -> Option<Arc<dyn Builder>>;
}

/// Creates the builder for a reference made from a project.
pub trait ReferenceBuilderFactory: Send + Sync {
  fn reference_builder(&self, reference: &Reference, project: &ProjectRef) -> Result<Arc<dyn Builder>, BuildError>;
}

/// Sub-builders resolved during registration.
#[derive(Default)]
struct Subtasks(OnceLock<Vec<Arc<dyn Builder>>>);

impl Subtasks {
  fn get(&self) -> &[Arc<dyn Builder>] {
    self.0.get().map(Vec::as_slice).unwrap_or_default()
  }

  /// Reuse an earlier registration of `key`, or resolve and register afresh.
  fn register(
    &self,
    key: &BuilderKey,
    ctx: &mut BuildContext,
    resolve: impl FnOnce(&mut BuildContext) -> Result<Vec<Arc<dyn Builder>>, BuildError>,
  ) -> Result<Vec<BuilderId>, BuildError> {
    if let Some(previous) = ctx.registered_prerequisites(key) {
      let ids = previous.to_vec();
      debug!(builder = %key, subtasks = ids.len(), "reusing registered subtasks");
      let _ = self.0.set(ids.iter().map(|&id| ctx.builder(id).clone()).collect());
      return Ok(ids);
    }

    let builders = resolve(ctx)?;
    let mut ids = Vec::with_capacity(builders.len());
    for builder in &builders {
      let id = ctx.register(builder.clone())?;
      if !ids.contains(&id) {
        ids.push(id);
      }
    }
    let _ = self.0.set(builders);
    Ok(ids)
  }

  fn dependencies(&self) -> Dependency {
    Dependency::compose(self.get().iter().map(|b| Dependency::subtask(b.clone())))
  }

  fn contains(&self, key: &BuilderKey) -> bool {
    self.get().iter().any(|b| b.key() == *key)
  }
}

fn union_of_prerequisites(ctx: &RunContext<'_>) -> Result<OutputSet, BuildError> {
  let mut outputs = OutputSet::new();
  for (_, results) in ctx.prerequisite_results()? {
    outputs.extend(results.iter().cloned());
  }
  Ok(outputs)
}

fn project_builders(factories: &[Arc<dyn ProjectBuilderFactory>], project: &ProjectRef) -> Vec<Arc<dyn Builder>> {
  factories
    .iter()
    .filter_map(|factory| factory.builder_for(std::slice::from_ref(project)))
    .collect()
}

/// Reference to a project of the referencing project's module.
pub struct ModuleReferenceBuilder {
  module: String,
  reference: Reference,
  suite: Arc<dyn SuiteModel>,
  factories: Vec<Arc<dyn ProjectBuilderFactory>>,
  subtasks: Subtasks,
}

impl ModuleReferenceBuilder {
  pub fn new(
    module: impl Into<String>,
    reference: Reference,
    suite: Arc<dyn SuiteModel>,
    factories: Vec<Arc<dyn ProjectBuilderFactory>>,
  ) -> Self {
    Self {
      module: module.into(),
      reference,
      suite,
      factories,
      subtasks: Subtasks::default(),
    }
  }

  pub fn reference(&self) -> &Reference {
    &self.reference
  }

  /// False if the module has no such project. Registering it then fails.
  pub fn is_effective(&self) -> bool {
    self.suite.project(&self.module, &self.reference.target).is_some()
  }
}

impl Builder for ModuleReferenceBuilder {
  fn kind(&self) -> &str {
    "module-ref"
  }

  fn uid(&self) -> String {
    format!("{}.{}", self.module, self.reference.target)
  }

  fn dependencies(&self) -> Dependency {
    self.subtasks.dependencies()
  }

  fn add_to_context(&self, ctx: &mut BuildContext) -> Result<Vec<BuilderId>, BuildError> {
    self.subtasks.register(&self.key(), ctx, |_| {
      let project = self.suite.project(&self.module, &self.reference.target).ok_or_else(|| {
        BuildError::invalid_reference(
          &self.reference,
          format!("Module {} has no project called {}", self.module, self.reference.target),
        )
      })?;
      Ok(project_builders(&self.factories, &project))
    })
  }

  fn run(&self, ctx: &RunContext<'_>) -> Result<OutputSet, BuildError> {
    union_of_prerequisites(ctx)
  }

  fn capabilities(&self) -> Capabilities {
    Capabilities::reference()
  }

  fn label(&self) -> BuilderLabel {
    BuilderLabel::new(None, self.reference.to_string())
  }

  fn referenced_unit(&self) -> Option<ProjectRef> {
    Some(ProjectRef::new(&self.module, &self.reference.target))
  }
}

impl fmt::Display for ModuleReferenceBuilder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "[{}]", self.reference)
  }
}

/// Reference to any project of the suite.
///
/// When a transformation reroutes the builder to a shared aggregate, only
/// the aggregate outputs named after the referenced project are passed on.
pub struct SuiteReferenceBuilder {
  reference: Reference,
  suite: Arc<dyn SuiteModel>,
  factories: Vec<Arc<dyn ProjectBuilderFactory>>,
  subtasks: Subtasks,
}

impl SuiteReferenceBuilder {
  pub fn new(reference: Reference, suite: Arc<dyn SuiteModel>, factories: Vec<Arc<dyn ProjectBuilderFactory>>) -> Self {
    Self {
      reference,
      suite,
      factories,
      subtasks: Subtasks::default(),
    }
  }

  pub fn reference(&self) -> &Reference {
    &self.reference
  }

  pub fn is_effective(&self) -> bool {
    let module = &self.reference.target;
    self.suite.has_module(module) && self.suite.project(module, self.project_name()).is_some()
  }

  fn project_name(&self) -> &str {
    &self.reference.path
  }
}

impl Builder for SuiteReferenceBuilder {
  fn kind(&self) -> &str {
    "suite-ref"
  }

  fn uid(&self) -> String {
    format!("{}.{}", self.reference.target, self.reference.path)
  }

  fn dependencies(&self) -> Dependency {
    self.subtasks.dependencies()
  }

  fn add_to_context(&self, ctx: &mut BuildContext) -> Result<Vec<BuilderId>, BuildError> {
    self.subtasks.register(&self.key(), ctx, |_| {
      let module = &self.reference.target;
      if !self.suite.has_module(module) {
        return Err(BuildError::invalid_reference(
          &self.reference,
          format!("Suite has no module called {module}"),
        ));
      }
      let project = self.suite.project(module, self.project_name()).ok_or_else(|| {
        BuildError::invalid_reference(
          &self.reference,
          format!("Module {module} has no project called {}", self.project_name()),
        )
      })?;
      Ok(project_builders(&self.factories, &project))
    })
  }

  fn run(&self, ctx: &RunContext<'_>) -> Result<OutputSet, BuildError> {
    let mut outputs = OutputSet::new();
    for (prerequisite, results) in ctx.prerequisite_results()? {
      if self.subtasks.contains(&prerequisite.key()) {
        outputs.extend(results.iter().cloned());
      } else {
        outputs.extend(
          results
            .iter()
            .filter(|path| path.file_stem() == self.project_name())
            .cloned(),
        );
      }
    }
    Ok(outputs)
  }

  fn capabilities(&self) -> Capabilities {
    Capabilities::reference()
  }

  fn label(&self) -> BuilderLabel {
    BuilderLabel::new(None, self.reference.to_string())
  }

  fn referenced_unit(&self) -> Option<ProjectRef> {
    Some(ProjectRef::new(&self.reference.target, &self.reference.path))
  }
}

impl fmt::Display for SuiteReferenceBuilder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "[{}]", self.reference)
  }
}

/// Reference expanding to the references listed under an alias.
///
/// Only alias entries with the same [`ReferenceType`] are followed. A missing
/// alias resolves to nothing.
pub struct AliasReferenceBuilder {
  project: ProjectRef,
  reference: Reference,
  suite: Arc<dyn SuiteModel>,
  factory: Arc<dyn ReferenceBuilderFactory>,
  subtasks: Subtasks,
}

impl AliasReferenceBuilder {
  pub fn new(
    project: ProjectRef,
    reference: Reference,
    suite: Arc<dyn SuiteModel>,
    factory: Arc<dyn ReferenceBuilderFactory>,
  ) -> Self {
    Self {
      project,
      reference,
      suite,
      factory,
      subtasks: Subtasks::default(),
    }
  }

  pub fn reference(&self) -> &Reference {
    &self.reference
  }

  fn matching_references(&self) -> Vec<Reference> {
    self
      .suite
      .alias(&self.reference.target)
      .unwrap_or_default()
      .into_iter()
      .filter(|r| r.ty == self.reference.ty)
      .collect()
  }

  /// False if the alias provably resolves to nothing.
  pub fn is_effective(&self) -> bool {
    !self.matching_references().is_empty()
  }
}

impl Builder for AliasReferenceBuilder {
  fn kind(&self) -> &str {
    "alias-ref"
  }

  fn uid(&self) -> String {
    format!("alias.{}__{}", self.reference.target, self.reference.ty)
  }

  fn dependencies(&self) -> Dependency {
    self.subtasks.dependencies()
  }

  fn add_to_context(&self, ctx: &mut BuildContext) -> Result<Vec<BuilderId>, BuildError> {
    self.subtasks.register(&self.key(), ctx, |_| {
      self
        .matching_references()
        .iter()
        .map(|reference| self.factory.reference_builder(reference, &self.project))
        .collect()
    })
  }

  fn run(&self, ctx: &RunContext<'_>) -> Result<OutputSet, BuildError> {
    union_of_prerequisites(ctx)
  }

  fn capabilities(&self) -> Capabilities {
    Capabilities::reference()
  }

  fn label(&self) -> BuilderLabel {
    BuilderLabel::new(Some(self.project.clone()), self.reference.to_string())
  }
}

impl fmt::Display for AliasReferenceBuilder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "[{} ({})]", self.reference, self.reference.ty)
  }
}

/// Creates reference builders of every kind from a suite model and the
/// project builder factories.
pub struct ReferenceResolver {
  suite: Arc<dyn SuiteModel>,
  factories: Vec<Arc<dyn ProjectBuilderFactory>>,
  this: Weak<ReferenceResolver>,
}

impl ReferenceResolver {
  pub fn new(suite: Arc<dyn SuiteModel>, factories: Vec<Arc<dyn ProjectBuilderFactory>>) -> Arc<Self> {
    Arc::new_cyclic(|this| Self {
      suite,
      factories,
      this: this.clone(),
    })
  }

  /// Reference builders for several references of a project, skipping the
  /// ones that resolve to nothing.
  pub fn effective_builders(
    &self,
    references: &[Reference],
    project: &ProjectRef,
  ) -> Result<Vec<Arc<dyn Builder>>, BuildError> {
    let mut builders = Vec::new();
    for reference in references {
      if reference.kind == ReferenceKind::Alias
        && let Some(factory) = self.this.upgrade()
      {
        let alias = AliasReferenceBuilder::new(project.clone(), reference.clone(), self.suite.clone(), factory);
        if !alias.is_effective() {
          debug!(reference = %reference, "skipping ineffective alias reference");
          continue;
        }
        builders.push(Arc::new(alias) as Arc<dyn Builder>);
      } else {
        builders.push(self.reference_builder(reference, project)?);
      }
    }
    Ok(builders)
  }
}

impl ReferenceBuilderFactory for ReferenceResolver {
  fn reference_builder(&self, reference: &Reference, project: &ProjectRef) -> Result<Arc<dyn Builder>, BuildError> {
    match reference.kind {
      ReferenceKind::Alias => {
        let factory: Arc<dyn ReferenceBuilderFactory> = self
          .this
          .upgrade()
          .ok_or_else(|| BuildError::invalid_reference(reference, "resolver dropped"))?;
        Ok(Arc::new(AliasReferenceBuilder::new(
          project.clone(),
          reference.clone(),
          self.suite.clone(),
          factory,
        )))
      }
      ReferenceKind::Module => Ok(Arc::new(ModuleReferenceBuilder::new(
        &project.module,
        reference.clone(),
        self.suite.clone(),
        self.factories.clone(),
      ))),
      ReferenceKind::Suite => Ok(Arc::new(SuiteReferenceBuilder::new(
        reference.clone(),
        self.suite.clone(),
        self.factories.clone(),
      ))),
    }
  }
}
