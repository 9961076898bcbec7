//! Crate-wide constants.

/// Application name used for platform directories and environment variables.
pub const APP_NAME: &str = "suitegraph";

/// Length of the truncated object hash used for composite Uids and cache directory names.
pub const OBJ_HASH_PREFIX_LEN: usize = 20;

/// File holding the serialized dependency fingerprint of a cache entry.
pub const CACHE_DEPS_FILENAME: &str = ".deps";

/// File holding the output manifest of a cache entry.
pub const CACHE_NAMES_FILENAME: &str = ".names";

/// Environment variable overriding the number of builders executed concurrently.
pub const ENV_PARALLELISM: &str = "SUITEGRAPH_PARALLELISM";

/// Environment variable overriding the persistent cache location.
pub const ENV_CACHE_DIR: &str = "SUITEGRAPH_CACHE_DIR";

/// Environment variable enabling aggressive cache restore for every builder.
pub const ENV_AGGRESSIVE_RESTORE: &str = "SUITEGRAPH_AGGRESSIVE_RESTORE";
