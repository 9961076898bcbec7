//! Dependency descriptors and their composition.
//!
//! A [`Dependency`] describes what a builder's output depends on. It is
//! separate from graph edges: edges order execution, dependencies decide
//! whether a cached result is still valid.
//!
//! Fingerprints are computed through a [`FingerprintMemo`], so a descriptor
//! instance shared by several builders is only fingerprinted once per run.

pub mod fingerprint;
pub mod source_set;

use std::collections::{BTreeMap, HashMap};
use std::fmt::{self, Write as _};
use std::io;
use std::sync::Arc;

use crate::build::Builder;
use crate::params::{ParameterBlock, PropertySource, PropertyValue};

pub use fingerprint::{FileStamp, Fingerprint};
pub use source_set::{ExcludeFn, SourceSet, SourceSetMode};

/// The variants a dependency descriptor can take.
pub enum DependencyKind {
  None,
  /// The dependencies of another builder.
  Subtask(Arc<dyn Builder>),
  Multiple(Vec<Dependency>),
  Properties {
    source: Arc<dyn PropertySource>,
    names: Vec<String>,
  },
  Inherited(Arc<ParameterBlock>),
  SourceSet(SourceSet),
}

/// Shared handle to a dependency descriptor.
///
/// Cloning is cheap and keeps the identity used by [`FingerprintMemo`].
#[derive(Clone)]
pub struct Dependency(Arc<DependencyKind>);

impl Dependency {
  pub fn new(kind: DependencyKind) -> Self {
    Dependency(Arc::new(kind))
  }

  pub fn none() -> Self {
    Self::new(DependencyKind::None)
  }

  pub fn subtask(builder: Arc<dyn Builder>) -> Self {
    Self::new(DependencyKind::Subtask(builder))
  }

  pub fn properties<I, S>(source: Arc<dyn PropertySource>, names: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self::new(DependencyKind::Properties {
      source,
      names: names.into_iter().map(Into::into).collect(),
    })
  }

  pub fn inherited(block: Arc<ParameterBlock>) -> Self {
    Self::new(DependencyKind::Inherited(block))
  }

  pub fn source_set(set: SourceSet) -> Self {
    Self::new(DependencyKind::SourceSet(set))
  }

  /// Combine several dependencies.
  ///
  /// No dependencies yield [`Dependency::none`], a single one is returned
  /// unchanged, more become an unordered composite.
  pub fn compose(deps: impl IntoIterator<Item = Dependency>) -> Self {
    let mut deps: Vec<Dependency> = deps.into_iter().collect();
    match deps.len() {
      0 => Self::none(),
      1 => deps.remove(0),
      _ => Self::new(DependencyKind::Multiple(deps)),
    }
  }

  pub fn kind(&self) -> &DependencyKind {
    &self.0
  }

  /// True if both handles point at the same descriptor instance.
  pub fn same_instance(&self, other: &Dependency) -> bool {
    Arc::ptr_eq(&self.0, &other.0)
  }

  fn identity(&self) -> usize {
    Arc::as_ptr(&self.0) as *const () as usize
  }

  /// Compute the current fingerprint, reusing results already in `memo`.
  pub fn fingerprint(&self, memo: &mut FingerprintMemo) -> io::Result<Fingerprint> {
    if let Some((_, fp)) = memo.entries.get(&self.identity()) {
      return Ok(fp.clone());
    }

    let fp = match self.kind() {
      DependencyKind::None => Fingerprint::NoDependency,
      DependencyKind::Subtask(builder) => builder.dependencies().fingerprint(memo)?,
      DependencyKind::Multiple(deps) => {
        let mut parts = Vec::with_capacity(deps.len());
        for dep in deps {
          parts.push(dep.fingerprint(memo)?);
        }
        Fingerprint::combined(parts)
      }
      DependencyKind::Properties { source, names } => Fingerprint::Properties {
        values: names
          .iter()
          .map(|name| (name.clone(), source.property(name).unwrap_or(PropertyValue::Null)))
          .collect::<BTreeMap<_, _>>(),
      },
      DependencyKind::Inherited(block) => Fingerprint::InheritedProperties {
        values: block.specified_values(),
      },
      DependencyKind::SourceSet(set) => set.fingerprint()?,
    };

    memo.entries.insert(self.identity(), (self.clone(), fp.clone()));
    Ok(fp)
  }

  /// Human-readable, indented description of the dependency tree.
  pub fn describe(&self) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = self.describe_into(&mut out, 0);
    out
  }

  fn describe_into(&self, out: &mut String, indent: usize) -> fmt::Result {
    let pad = "  ".repeat(indent);
    match self.kind() {
      DependencyKind::None => writeln!(out, "{pad}none"),
      DependencyKind::Subtask(builder) => {
        writeln!(out, "{pad}subtask {builder}")?;
        builder.dependencies().describe_into(out, indent + 1)
      }
      DependencyKind::Multiple(deps) => {
        writeln!(out, "{pad}multiple ({})", deps.len())?;
        for dep in deps {
          dep.describe_into(out, indent + 1)?;
        }
        Ok(())
      }
      DependencyKind::Properties { names, .. } => writeln!(out, "{pad}properties [{}]", names.join(", ")),
      DependencyKind::Inherited(block) => {
        let names: Vec<String> = block.specified_values().into_keys().collect();
        writeln!(out, "{pad}inherited properties [{}]", names.join(", "))
      }
      DependencyKind::SourceSet(set) => writeln!(out, "{pad}source set ({:?})", set.mode()),
    }
  }
}

impl Default for Dependency {
  fn default() -> Self {
    Self::none()
  }
}

impl fmt::Debug for Dependency {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Dependency({})", self.describe().trim_end())
  }
}

/// Fingerprints computed during one run, keyed by descriptor instance.
///
/// Entries hold a clone of the descriptor so its address cannot be reused by
/// another descriptor while the memo is alive.
#[derive(Default)]
pub struct FingerprintMemo {
  entries: HashMap<usize, (Dependency, Fingerprint)>,
}

impl FingerprintMemo {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}
