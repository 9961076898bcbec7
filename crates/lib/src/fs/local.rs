use std::fs;
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use walkdir::WalkDir;

use super::Directory;

/// [`Directory`] backed by the local file system.
#[derive(Debug, Clone)]
pub struct LocalDirectory {
  root: PathBuf,
}

impl LocalDirectory {
  /// Open an existing directory.
  pub fn open(root: impl AsRef<Path>) -> io::Result<Self> {
    Ok(Self {
      root: dunce::canonicalize(root.as_ref())?,
    })
  }

  /// Open a directory, creating it (and its parents) first if needed.
  pub fn create(root: impl AsRef<Path>) -> io::Result<Self> {
    fs::create_dir_all(root.as_ref())?;
    Self::open(root)
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  /// Join a `/`-separated relative path onto the root. Segments that would
  /// leave the root, such as `..`, are rejected.
  fn resolve(&self, rel: &str) -> io::Result<PathBuf> {
    let mut path = self.root.clone();
    for part in rel.split('/').filter(|part| !part.is_empty() && *part != ".") {
      if !Path::new(part).components().all(|c| matches!(c, Component::Normal(_))) {
        return Err(io::Error::new(
          io::ErrorKind::InvalidInput,
          format!("path {rel:?} escapes {}", self.root.display()),
        ));
      }
      path.push(part);
    }
    Ok(path)
  }

  fn entries(&self, want_dirs: bool) -> io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(&self.root)? {
      let entry = entry?;
      if entry.file_type()?.is_dir() == want_dirs {
        names.push(entry.file_name().to_string_lossy().to_string());
      }
    }
    names.sort();
    Ok(names)
  }
}

impl Directory for LocalDirectory {
  fn files(&self) -> io::Result<Vec<String>> {
    self.entries(false)
  }

  fn child_directories(&self) -> io::Result<Vec<String>> {
    self.entries(true)
  }

  fn walk_files(&self) -> io::Result<Vec<String>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(&self.root).sort_by_file_name() {
      let entry = entry.map_err(io::Error::other)?;
      if !entry.file_type().is_file() {
        continue;
      }
      let rel = entry
        .path()
        .strip_prefix(&self.root)
        .map_err(io::Error::other)?
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join("/");
      files.push(rel);
    }
    files.sort();
    Ok(files)
  }

  fn child(&self, name: &str, create: bool) -> io::Result<Box<dyn Directory>> {
    let path = self.resolve(name)?;
    if create {
      Ok(Box::new(LocalDirectory::create(path)?))
    } else {
      Ok(Box::new(LocalDirectory::open(path)?))
    }
  }

  fn exists(&self, rel: &str) -> bool {
    self.resolve(rel).is_ok_and(|path| path.exists())
  }

  fn open_read(&self, rel: &str) -> io::Result<Box<dyn Read + Send>> {
    Ok(Box::new(io::BufReader::new(fs::File::open(self.resolve(rel)?)?)))
  }

  fn create_file(&self, rel: &str) -> io::Result<Box<dyn Write + Send>> {
    let path = self.resolve(rel)?;
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent)?;
    }
    Ok(Box::new(io::BufWriter::new(fs::File::create(path)?)))
  }

  fn file_size(&self, rel: &str) -> io::Result<u64> {
    Ok(fs::metadata(self.resolve(rel)?)?.len())
  }

  fn last_modified(&self, rel: &str) -> io::Result<SystemTime> {
    fs::metadata(self.resolve(rel)?)?.modified()
  }

  fn create_dir(&self, rel: &str) -> io::Result<()> {
    fs::create_dir_all(self.resolve(rel)?)
  }

  fn delete_dir(&self, rel: &str) -> io::Result<()> {
    let path = self.resolve(rel)?;
    match fs::remove_dir_all(&path) {
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
      other => other,
    }
  }
}
