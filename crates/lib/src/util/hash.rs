//! Hashing utilities for builder identities and cache verification.
//!
//! This module provides:
//! - `ObjectHash`: A truncated 20-character hash used in Uids and cache directory names
//! - `ContentHash`: A full 64-character hash for content comparison
//! - `hash_reader()`: Stream hashing
//! - `hash_bytes()`: Arbitrary byte hashing

use std::io::{self, Read};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::consts::OBJ_HASH_PREFIX_LEN;

/// A truncated SHA-256 digest identifying a composite object.
///
/// # Format
///
/// The hash is a lowercase hexadecimal string, e.g., `"a1b2c3d4e5f6789012ab"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectHash(pub String);

impl ObjectHash {
  /// Hash a sequence of lines, one per item, in the given order.
  pub fn of_lines<I, S>(lines: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    let mut hasher = Sha256::new();
    for line in lines {
      hasher.update(line.as_ref().as_bytes());
      hasher.update(b"\n");
    }
    let full = format!("{:x}", hasher.finalize());
    ObjectHash(full[..OBJ_HASH_PREFIX_LEN].to_string())
  }
}

impl std::fmt::Display for ObjectHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// A full 64-character SHA256 hash for content verification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl std::fmt::Display for ContentHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Hash everything readable from a stream.
pub fn hash_reader(mut reader: impl Read) -> io::Result<ContentHash> {
  let mut hasher = Sha256::new();
  let mut buffer = [0u8; 8192];

  loop {
    let bytes_read = reader.read(&mut buffer)?;
    if bytes_read == 0 {
      break;
    }
    hasher.update(&buffer[..bytes_read]);
  }

  Ok(ContentHash(format!("{:x}", hasher.finalize())))
}

/// Hash arbitrary bytes.
pub fn hash_bytes(data: &[u8]) -> ContentHash {
  let mut hasher = Sha256::new();
  hasher.update(data);
  ContentHash(format!("{:x}", hasher.finalize()))
}
