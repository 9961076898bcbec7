//! Source-set snapshots over a [`Directory`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::io;
use std::sync::Arc;

use crate::fs::Directory;

use super::fingerprint::{FileStamp, Fingerprint};

/// Predicate selecting relative file names to leave out of a source set.
pub type ExcludeFn = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Whether a source-set fingerprint tracks file metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceSetMode {
  /// File names only.
  Structure,
  /// File names plus size and modification time.
  #[default]
  Full,
}

#[derive(Debug, Clone)]
enum SourceFiles {
  Listed(BTreeSet<String>),
  Tree,
}

/// A set of files below a root directory.
///
/// Listed sets only count the listed files that currently exist, so deleting a
/// tracked file changes the fingerprint instead of failing it. Tree sets walk
/// the root on every fingerprint and pick up added files as well.
#[derive(Clone)]
pub struct SourceSet {
  root: Arc<dyn Directory>,
  files: SourceFiles,
  mode: SourceSetMode,
  exclude: Option<ExcludeFn>,
}

impl SourceSet {
  pub fn listed<I, S>(root: Arc<dyn Directory>, files: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      root,
      files: SourceFiles::Listed(files.into_iter().map(Into::into).collect()),
      mode: SourceSetMode::default(),
      exclude: None,
    }
  }

  pub fn tree(root: Arc<dyn Directory>) -> Self {
    Self {
      root,
      files: SourceFiles::Tree,
      mode: SourceSetMode::default(),
      exclude: None,
    }
  }

  pub fn with_mode(mut self, mode: SourceSetMode) -> Self {
    self.mode = mode;
    self
  }

  pub fn excluding(mut self, exclude: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
    self.exclude = Some(Arc::new(exclude));
    self
  }

  pub fn mode(&self) -> SourceSetMode {
    self.mode
  }

  /// Relative names of the files currently in the set.
  pub fn names(&self) -> io::Result<BTreeSet<String>> {
    let candidates: Vec<String> = match &self.files {
      SourceFiles::Listed(files) => files.iter().filter(|f| self.root.exists(f)).cloned().collect(),
      SourceFiles::Tree => self.root.walk_files()?,
    };

    Ok(
      candidates
        .into_iter()
        .filter(|name| !self.exclude.as_ref().is_some_and(|exclude| exclude(name)))
        .collect(),
    )
  }

  pub fn fingerprint(&self) -> io::Result<Fingerprint> {
    let names = self.names()?;
    match self.mode {
      SourceSetMode::Structure => Ok(Fingerprint::SourceStructure { files: names }),
      SourceSetMode::Full => {
        let mut files = BTreeMap::new();
        for name in names {
          let stamp = FileStamp {
            size: self.root.file_size(&name)?,
            modified: self.root.last_modified(&name)?,
          };
          files.insert(name, stamp);
        }
        Ok(Fingerprint::SourceSet { files })
      }
    }
  }
}

impl fmt::Debug for SourceSet {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SourceSet")
      .field("root", &self.root)
      .field("files", &self.files)
      .field("mode", &self.mode)
      .field("exclude", &self.exclude.is_some())
      .finish()
  }
}
