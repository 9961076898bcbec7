//! Serializable snapshots of a dependency's state.

use std::collections::{BTreeMap, BTreeSet};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::params::PropertyValue;

/// Size and modification time of a tracked file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FileStamp {
  pub size: u64,
  pub modified: SystemTime,
}

/// A comparable, serializable digest of a dependency's current input state.
///
/// The build cache stores one fingerprint per builder and reuses the stored
/// outputs only when the freshly computed fingerprint is equal. Fingerprints of
/// different kinds never compare equal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Fingerprint {
  /// Constant fingerprint of something with no inputs.
  NoDependency,
  /// Unordered union of several fingerprints.
  Combined { parts: BTreeSet<Fingerprint> },
  /// Snapshot of named property values of an object.
  Properties { values: BTreeMap<String, PropertyValue> },
  /// Snapshot of the properties specified on a parameter block or its ancestors.
  InheritedProperties { values: BTreeMap<String, PropertyValue> },
  /// File names of a source set, without metadata.
  SourceStructure { files: BTreeSet<String> },
  /// File names of a source set with size and modification time.
  SourceSet { files: BTreeMap<String, FileStamp> },
}

impl Fingerprint {
  pub fn combined(parts: impl IntoIterator<Item = Fingerprint>) -> Self {
    Fingerprint::Combined {
      parts: parts.into_iter().collect(),
    }
  }

  pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(self)
  }

  pub fn from_bytes(data: &[u8]) -> Result<Self, serde_json::Error> {
    serde_json::from_slice(data)
  }

  /// Short name of the fingerprint kind, for log output.
  pub fn kind(&self) -> &'static str {
    match self {
      Fingerprint::NoDependency => "no_dependency",
      Fingerprint::Combined { .. } => "combined",
      Fingerprint::Properties { .. } => "properties",
      Fingerprint::InheritedProperties { .. } => "inherited_properties",
      Fingerprint::SourceStructure { .. } => "source_structure",
      Fingerprint::SourceSet { .. } => "source_set",
    }
  }
}
