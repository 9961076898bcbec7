//! Fingerprint properties of dependency descriptors.

use std::collections::BTreeMap;
use std::sync::Arc;

use suitegraph_lib::build::{Builder, BuilderKey, MergingBuilder, OutputSet, merge};
use suitegraph_lib::dependency::{Dependency, FingerprintMemo, SourceSet, SourceSetMode};
use suitegraph_lib::fs::Directory;
use suitegraph_lib::params::PropertyValue;

use super::common::{RunLog, TestEnv, arc, task, writer};

fn props(pairs: &[(&str, &str)]) -> Dependency {
  let values: BTreeMap<String, PropertyValue> = pairs.iter().map(|(k, v)| (k.to_string(), PropertyValue::from(*v))).collect();
  let names: Vec<String> = pairs.iter().map(|(k, _)| k.to_string()).collect();
  Dependency::properties(Arc::new(values), names)
}

#[test]
fn compose_collapses_small_inputs() {
  let mut memo = FingerprintMemo::new();
  assert_eq!(
    Dependency::compose(Vec::new()).fingerprint(&mut memo).unwrap(),
    Dependency::none().fingerprint(&mut memo).unwrap()
  );

  let single = props(&[("mode", "debug")]);
  assert!(Dependency::compose([single.clone()]).same_instance(&single));
}

#[test]
fn compose_is_order_independent() {
  let a = props(&[("mode", "debug")]);
  let b = props(&[("arch", "x64")]);

  let forward = Dependency::compose([a.clone(), b.clone()])
    .fingerprint(&mut FingerprintMemo::new())
    .unwrap();
  let backward = Dependency::compose([b, a]).fingerprint(&mut FingerprintMemo::new()).unwrap();
  assert_eq!(forward, backward);
}

#[test]
fn structural_fingerprint_ignores_content_changes() {
  let env = TestEnv::new();
  env.write_source("a.cs", "short");
  let root: Arc<dyn Directory> = env.sources.clone();
  let structure = SourceSet::tree(root.clone()).with_mode(SourceSetMode::Structure);
  let full = SourceSet::tree(root);

  let structure_before = structure.fingerprint().unwrap();
  let full_before = full.fingerprint().unwrap();

  env.write_source("a.cs", "a much longer body");
  assert_eq!(structure.fingerprint().unwrap(), structure_before);
  assert_ne!(full.fingerprint().unwrap(), full_before);

  env.write_source("b.cs", "new");
  assert_ne!(structure.fingerprint().unwrap(), structure_before);
}

#[test]
fn subtask_dependency_follows_the_builder() {
  let log = RunLog::default();
  let debug = arc(task("a", &log).with_dependencies(props(&[("mode", "debug")])));
  let release = arc(task("a", &log).with_dependencies(props(&[("mode", "release")])));

  let fp = |builder: Arc<dyn Builder>| Dependency::subtask(builder).fingerprint(&mut FingerprintMemo::new()).unwrap();
  assert_ne!(fp(debug.clone()), fp(release));
  assert_eq!(fp(debug.clone()), fp(debug));
}

#[test]
fn merged_builders_are_equal_regardless_of_order() {
  let log = RunLog::default();
  let a = arc(task("a", &log));
  let b = arc(task("b", &log));

  let ab = MergingBuilder::new([a.clone(), b.clone()]);
  let ba = MergingBuilder::new([b.clone(), a.clone(), b.clone()]);
  assert!(ab == ba);
  assert_eq!(ab.key(), ba.key());
  assert_eq!(ba.sources().len(), 2);

  let c = arc(task("c", &log));
  assert!(ab != MergingBuilder::new([a.clone(), c]));
  assert!(merge(Vec::new()).is_none());
  assert_eq!(merge(vec![a.clone()]).unwrap().key(), a.key());
}

#[test]
fn merging_builder_runs_sources_and_unions_outputs() {
  let env = TestEnv::new();
  let log = RunLog::default();
  let mut ctx = env.context();

  let merged = merge(vec![arc(writer("x", "1", &log)), arc(writer("y", "2", &log))]).unwrap();
  let root = ctx.register(merged).unwrap();
  let key: BuilderKey = ctx.builder(root).key();

  let outputs: OutputSet = ctx.run(Some(&key)).unwrap();
  assert_eq!(log.count(), 2);
  assert_eq!(ctx.results(&key).unwrap().len(), 2);
  assert_eq!(outputs.len(), 2);
}
