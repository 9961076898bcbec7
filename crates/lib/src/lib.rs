//! suitegraph-lib: build orchestration for multi-project suites
//!
//! This crate provides the engine that turns a set of builders into a run:
//! - `Builder`: a unit of work with a dependency descriptor and cached outputs
//! - `Dependency`: what a builder's result depends on, reduced to a `Fingerprint`
//! - `BuildContext`: registers builders, transforms the graph, and runs it
//! - `BuildCache`: stores outputs keyed by builder and fingerprint
//! - `GraphTransformation`: rewrite passes such as forced ordering

pub mod build;
pub mod cache;
pub mod config;
pub mod consts;
pub mod dependency;
pub mod fs;
pub mod params;
pub mod platform;
pub mod transform;
pub mod util;

pub use build::{BuildContext, BuildError, Builder, BuilderKey, OutputSet, TargetPath};
pub use cache::{BuildCache, FileBuildCache, MemoryBuildCache};
pub use config::ContextConfig;
pub use dependency::{Dependency, Fingerprint};
