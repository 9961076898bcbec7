//! Reference resolution through the suite model.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use suitegraph_lib::build::reference::{
  AliasReferenceBuilder, ModuleReferenceBuilder, ProjectBuilderFactory, ReferenceBuilderFactory, ReferenceResolver,
  ReferenceType, SuiteModel, SuiteReferenceBuilder,
};
use suitegraph_lib::build::{BuildError, Builder, OutputSet, ProjectRef, TargetPath};
use suitegraph_lib::transform::RedundantAggregates;

use super::common::{ProjectFactory, RunLog, TestEnv, TestSuite, arc, parse, task};

fn suite() -> Arc<TestSuite> {
  Arc::new(
    TestSuite::default()
      .module("core", &["lib", "app"])
      .module("util", &["log"])
      .alias(
        "tools",
        vec![
          parse("suite://util/log"),
          parse("module://lib").with_type(ReferenceType::Runtime),
        ],
      ),
  )
}

fn resolver(factory: &ProjectFactory) -> Arc<ReferenceResolver> {
  let suite: Arc<dyn SuiteModel> = suite();
  let factories: Vec<Arc<dyn ProjectBuilderFactory>> = vec![Arc::new(factory.clone())];
  ReferenceResolver::new(suite, factories)
}

fn app() -> ProjectRef {
  ProjectRef::new("core", "app")
}

#[test]
fn module_reference_runs_the_project_builder() {
  let env = TestEnv::new();
  let factory = ProjectFactory::default();
  let resolver = resolver(&factory);
  let mut ctx = env.context();

  let reference = resolver.reference_builder(&parse("module://lib"), &app()).unwrap();
  assert_eq!(reference.key().to_string(), "module-ref__core.lib");
  assert_eq!(reference.referenced_unit(), Some(ProjectRef::new("core", "lib")));
  let root = ctx.register(reference).unwrap();
  let key = ctx.builder(root).key();

  let outputs = ctx.run(Some(&key)).unwrap();
  assert_eq!(factory.log.runs(), vec!["lib"]);
  assert_eq!(outputs, OutputSet::from([TargetPath::new("bin", "lib.dll")]));
  assert_eq!(ctx.results(&key).unwrap(), &outputs);
}

#[test]
fn unknown_targets_are_invalid_references() {
  let env = TestEnv::new();
  let resolver = resolver(&ProjectFactory::default());
  let mut ctx = env.context();

  let missing_project = resolver.reference_builder(&parse("module://nope"), &app()).unwrap();
  match ctx.register(missing_project).unwrap_err() {
    BuildError::InvalidReference { reason, .. } => assert_eq!(reason, "Module core has no project called nope"),
    other => panic!("unexpected error: {other}"),
  }

  let missing_module = resolver.reference_builder(&parse("suite://gui/shell"), &app()).unwrap();
  match ctx.register(missing_module).unwrap_err() {
    BuildError::InvalidReference { reason, .. } => assert_eq!(reason, "Suite has no module called gui"),
    other => panic!("unexpected error: {other}"),
  }
}

#[test]
fn alias_follows_entries_of_its_own_type() {
  let env = TestEnv::new();
  let factory = ProjectFactory::default();
  let resolver = resolver(&factory);
  let mut ctx = env.context();

  let build_alias = resolver.reference_builder(&parse("alias://tools"), &app()).unwrap();
  let root = ctx.register(build_alias).unwrap();
  let key = ctx.builder(root).key();
  assert_eq!(key.to_string(), "alias-ref__alias.tools__Build");

  let outputs = ctx.run(Some(&key)).unwrap();
  assert_eq!(factory.log.runs(), vec!["log"]);
  assert_eq!(outputs, OutputSet::from([TargetPath::new("bin", "log.dll")]));

  let runtime_alias = resolver
    .reference_builder(&parse("alias://tools").with_type(ReferenceType::Runtime), &app())
    .unwrap();
  let root = ctx.register(runtime_alias).unwrap();
  let key = ctx.builder(root).key();
  ctx.run(Some(&key)).unwrap();
  assert_eq!(factory.log.count_of("lib"), 1);
}

#[test]
fn missing_alias_is_not_effective() {
  let factory = ProjectFactory::default();
  let resolver = resolver(&factory);
  let suite: Arc<dyn SuiteModel> = suite();

  let missing = AliasReferenceBuilder::new(app(), parse("alias://nothing"), suite.clone(), resolver.clone());
  assert!(!missing.is_effective());
  let present = AliasReferenceBuilder::new(app(), parse("alias://tools"), suite, resolver.clone());
  assert!(present.is_effective());

  let builders = resolver
    .effective_builders(&[parse("alias://nothing"), parse("module://lib")], &app())
    .unwrap();
  assert_eq!(builders.len(), 1);
  assert_eq!(builders[0].kind(), "module-ref");
}

#[test]
fn module_and_suite_references_are_effective_only_for_known_projects() {
  let suite: Arc<dyn SuiteModel> = suite();
  let module_ref = |uri: &str| ModuleReferenceBuilder::new("core", parse(uri), suite.clone(), Vec::new());
  let suite_ref = |uri: &str| SuiteReferenceBuilder::new(parse(uri), suite.clone(), Vec::new());

  assert!(module_ref("module://lib").is_effective());
  assert!(!module_ref("module://log").is_effective());
  assert!(suite_ref("suite://util/log").is_effective());
  assert!(!suite_ref("suite://util/lib").is_effective());
  assert!(!suite_ref("suite://missing/log").is_effective());

  // An ineffective reference still reports why when registered.
  let env = TestEnv::new();
  let mut ctx = env.context();
  let err = ctx.register(Arc::new(suite_ref("suite://missing/log"))).unwrap_err();
  assert!(matches!(err, BuildError::InvalidReference { .. }), "unexpected error: {err}");
}

#[test]
fn equal_reference_reuses_registered_subtasks() {
  let env = TestEnv::new();
  let factory = ProjectFactory::default();
  let resolver = resolver(&factory);
  let mut ctx = env.context();

  let first = resolver.reference_builder(&parse("suite://util/log"), &app()).unwrap();
  let second = resolver.reference_builder(&parse("suite://util/log"), &app()).unwrap();
  let first_id = ctx.register(first).unwrap();
  let second_id = ctx.register(second.clone()).unwrap();

  assert_eq!(first_id, second_id);
  assert_eq!(factory.calls.load(Ordering::SeqCst), 1);
  // The second instance knows its subtasks without resolving them again.
  assert!(second.dependencies().describe().starts_with("subtask project:util/log"));
}

#[test]
fn suite_reference_narrows_shared_aggregate_outputs() {
  let env = TestEnv::new();
  let factory = ProjectFactory::default();
  let resolver = resolver(&factory);
  let mut ctx = env.context();

  let reference = resolver.reference_builder(&parse("suite://core/lib"), &app()).unwrap();
  let prepare = arc(task("prepare-app", &factory.log).with_prerequisite(reference.clone()));
  let sln_log = factory.log.clone();
  let solution = arc(
    suitegraph_lib::build::FnBuilder::new("sln", "core", move |ctx| {
      sln_log.record("sln");
      let mut outputs = OutputSet::new();
      for name in ["lib", "app"] {
        ctx.target().write(&format!("bin/{name}.dll"), name.as_bytes())?;
        outputs.insert(TargetPath::new("bin", format!("{name}.dll")));
      }
      Ok(outputs)
    })
    .with_work_set([ProjectRef::new("core", "lib"), ProjectRef::new("core", "app")])
    .with_prerequisite(prepare),
  );
  let package = arc(
    task("package", &factory.log)
      .with_prerequisite(reference.clone())
      .with_prerequisite(solution),
  );
  let root = ctx.register(package).unwrap();
  let root_key = ctx.builder(root).key();
  ctx.add_transformation(RedundantAggregates::new());

  ctx.run(Some(&root_key)).unwrap();

  // The solution builds lib, so the standalone project builder never runs.
  assert_eq!(factory.log.count_of("lib"), 0);
  assert_eq!(factory.log.count_of("sln"), 1);
  assert!(factory.log.position("sln") < factory.log.position("package"));
  assert_eq!(
    ctx.results(&reference.key()).unwrap(),
    &OutputSet::from([TargetPath::new("bin", "lib.dll")])
  );
}
