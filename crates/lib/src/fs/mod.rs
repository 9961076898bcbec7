//! File-system abstraction consumed by source-set fingerprints, the build cache
//! and concrete builders.
//!
//! The graph engine itself never touches the file system; everything goes
//! through [`Directory`], which is rooted at some location and addresses files
//! by `/`-separated relative paths.

mod local;

use std::io::{self, Read, Write};
use std::time::SystemTime;

pub use local::LocalDirectory;

/// A directory handle able to enumerate, read and write files below itself.
pub trait Directory: Send + Sync + std::fmt::Debug {
  /// Names of the files directly inside this directory, sorted.
  fn files(&self) -> io::Result<Vec<String>>;

  /// Names of the subdirectories directly inside this directory, sorted.
  fn child_directories(&self) -> io::Result<Vec<String>>;

  /// Relative paths of every file below this directory, sorted.
  fn walk_files(&self) -> io::Result<Vec<String>>;

  /// Open a child directory, creating it first when `create` is set.
  fn child(&self, name: &str, create: bool) -> io::Result<Box<dyn Directory>>;

  fn exists(&self, rel: &str) -> bool;

  fn open_read(&self, rel: &str) -> io::Result<Box<dyn Read + Send>>;

  /// Create (or truncate) a file, creating missing parent directories.
  fn create_file(&self, rel: &str) -> io::Result<Box<dyn Write + Send>>;

  fn file_size(&self, rel: &str) -> io::Result<u64>;

  fn last_modified(&self, rel: &str) -> io::Result<SystemTime>;

  fn create_dir(&self, rel: &str) -> io::Result<()>;

  fn delete_dir(&self, rel: &str) -> io::Result<()>;

  fn read(&self, rel: &str) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    self.open_read(rel)?.read_to_end(&mut buf)?;
    Ok(buf)
  }

  fn write(&self, rel: &str, data: &[u8]) -> io::Result<()> {
    let mut file = self.create_file(rel)?;
    file.write_all(data)?;
    file.flush()
  }

  /// Copy a file of this directory to `target_rel` inside `target`.
  fn copy_file(&self, rel: &str, target: &dyn Directory, target_rel: &str) -> io::Result<()> {
    let mut reader = self.open_read(rel)?;
    let mut writer = target.create_file(target_rel)?;
    io::copy(&mut reader, &mut writer)?;
    writer.flush()
  }
}

/// Join two relative path fragments with `/`, skipping empty ones.
pub fn join_rel(root: &str, path: &str) -> String {
  match (root.is_empty(), path.is_empty()) {
    (true, _) => path.to_string(),
    (false, true) => root.to_string(),
    (false, false) => format!("{}/{}", root.trim_end_matches('/'), path.trim_start_matches('/')),
  }
}
