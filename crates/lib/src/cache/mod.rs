//! Build cache: stored outputs of builders keyed by dependency fingerprint.
//!
//! # Submodules
//!
//! - [`memory`] - Process-local cache with JSON snapshots
//! - [`file`] - Cache persisted below a cache root directory
//! - [`cached`] - Decorator running a builder through a cache

pub mod cached;
pub mod file;
pub mod memory;
mod types;

use std::io;

use tracing::debug;

use crate::build::BuilderKey;
use crate::fs::Directory;
use crate::util::hash::{hash_bytes, hash_reader};

pub use cached::CachedBuilder;
pub use file::FileBuildCache;
pub use memory::MemoryBuildCache;
pub use types::*;

/// Directory name of a builder's cache entry.
///
/// Kind and Uid are escaped before joining with `__`: bytes outside
/// `[A-Za-z0-9.-]` become `_xx` hex, so an escaped part never holds `__`
/// and distinct keys never share a directory.
pub fn entry_dir_name(key: &BuilderKey) -> String {
  format!("{}__{}", escape_name_part(&key.kind), escape_name_part(&key.uid))
}

fn escape_name_part(part: &str) -> String {
  let mut escaped = String::with_capacity(part.len());
  for byte in part.bytes() {
    if byte.is_ascii_alphanumeric() || byte == b'.' || byte == b'-' {
      escaped.push(char::from(byte));
    } else {
      escaped.push_str(&format!("_{byte:02x}"));
    }
  }
  escaped
}

/// Copy `name` from `source` to `target_rel` unless the target already holds
/// the same content. Returns whether a copy happened.
pub(crate) fn copy_if_different(
  source: &dyn Directory,
  name: &str,
  target: &dyn Directory,
  target_rel: &str,
) -> io::Result<bool> {
  if target.exists(target_rel) && source.file_size(name)? == target.file_size(target_rel)? {
    let source_hash = hash_reader(source.open_read(name)?)?;
    let target_hash = hash_reader(target.open_read(target_rel)?)?;
    if source_hash == target_hash {
      debug!(path = target_rel, "file is the same as the cached one");
      return Ok(false);
    }
  }

  source.copy_file(name, target, target_rel)?;
  Ok(true)
}

/// Write `data` to `target_rel` unless the target already holds the same content.
pub(crate) fn write_if_different(target: &dyn Directory, target_rel: &str, data: &[u8]) -> io::Result<bool> {
  if target.exists(target_rel) && target.file_size(target_rel)? == data.len() as u64 {
    let current = hash_reader(target.open_read(target_rel)?)?;
    if current == hash_bytes(data) {
      debug!(path = target_rel, "file is the same as the cached one");
      return Ok(false);
    }
  }

  target.write(target_rel, data)?;
  Ok(true)
}
