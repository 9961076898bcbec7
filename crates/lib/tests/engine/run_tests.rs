//! Registration and execution order tests.

use std::ops::ControlFlow;

use suitegraph_lib::build::{BuildError, BuilderKey, FnBuilder, OutputSet, TargetPath};
use suitegraph_lib::fs::Directory;
use suitegraph_lib::transform;

use super::common::{RunLog, TestEnv, arc, task, writer};

#[test]
fn every_builder_runs_once_after_its_prerequisites() {
  let env = TestEnv::new();
  let log = RunLog::default();
  let mut ctx = env.context();

  // Diamond: a <- b, a <- c, {b, c} <- d
  let a = arc(task("a", &log));
  let b = arc(task("b", &log).with_prerequisite(a.clone()));
  let c = arc(task("c", &log).with_prerequisite(a));
  let d = arc(task("d", &log).with_prerequisite(b).with_prerequisite(c));
  let root = ctx.register(d).unwrap();
  let key = ctx.builder(root).key();

  ctx.run(Some(&key)).unwrap();

  assert_eq!(log.count(), 4);
  for name in ["a", "b", "c", "d"] {
    assert_eq!(log.count_of(name), 1, "{name} ran more than once");
  }
  assert!(log.position("a") < log.position("b"));
  assert!(log.position("a") < log.position("c"));
  assert!(log.position("b") < log.position("d"));
  assert!(log.position("c") < log.position("d"));
}

#[test]
fn run_is_pruned_to_the_root() {
  let env = TestEnv::new();
  let log = RunLog::default();
  let mut ctx = env.context();

  let a = arc(task("a", &log));
  let b = arc(task("b", &log).with_prerequisite(a));
  ctx.register(b).unwrap();
  ctx.register(arc(task("unrelated", &log))).unwrap();

  ctx.run(Some(&BuilderKey::new("task", "b"))).unwrap();
  assert_eq!(log.runs(), vec!["a", "b"]);

  let log_all = RunLog::default();
  let mut ctx = env.context();
  ctx.register(arc(task("x", &log_all))).unwrap();
  ctx.register(arc(task("y", &log_all))).unwrap();
  ctx.run(None).unwrap();
  assert_eq!(log_all.count(), 2);
}

#[test]
fn cycle_is_reported_before_anything_runs() {
  let env = TestEnv::new();
  let log = RunLog::default();
  let mut ctx = env.context();

  let a = arc(task("a", &log));
  let b = arc(task("b", &log).with_prerequisite(a.clone()));
  let c = arc(task("c", &log).with_prerequisite(b));
  let root = ctx.register(c).unwrap();
  let a_id = ctx.id_of(&a.key()).unwrap();
  let c_key = ctx.builder(root).key();

  // Close the loop: c must also run before a.
  ctx.add_transformation(transform::from_fn("loop", move |graph| {
    graph.add_edge(root, a_id);
    ControlFlow::Continue(())
  }));

  let first = ctx.run(Some(&c_key)).unwrap_err();
  assert!(matches!(first, BuildError::CycleDetected { .. }), "{first}");
  assert_eq!(log.count(), 0);

  let second = ctx.run(Some(&c_key)).unwrap_err();
  assert_eq!(first.to_string(), second.to_string());
}

#[test]
fn registration_cycle_is_rejected() {
  use std::fmt;
  use std::sync::Arc;

  use suitegraph_lib::build::{BuildContext, Builder, BuilderId, RunContext};

  /// Registers a builder equal to itself as its own prerequisite.
  struct SelfReferencing;

  impl fmt::Display for SelfReferencing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      write!(f, "self-referencing")
    }
  }

  impl Builder for SelfReferencing {
    fn kind(&self) -> &str {
      "loop"
    }

    fn uid(&self) -> String {
      "x".to_string()
    }

    fn add_to_context(&self, ctx: &mut BuildContext) -> Result<Vec<BuilderId>, BuildError> {
      Ok(vec![ctx.register(Arc::new(SelfReferencing))?])
    }

    fn run(&self, _ctx: &RunContext<'_>) -> Result<OutputSet, BuildError> {
      Ok(OutputSet::new())
    }
  }

  let env = TestEnv::new();
  let mut ctx = env.context();
  let err = ctx.register(Arc::new(SelfReferencing)).unwrap_err();
  assert!(matches!(err, BuildError::RegistrationCycle(_)));
  assert!(!ctx.contains(&BuilderKey::new("loop", "x")));
}

#[test]
fn outputs_flow_from_prerequisite_to_dependent() {
  let env = TestEnv::new();
  let log = RunLog::default();
  let mut ctx = env.context();

  let a = arc(writer("a", "from a", &log));
  let copy_log = log.clone();
  let b = arc(
    FnBuilder::new("copy", "b", move |ctx| {
      copy_log.record("b");
      let source = ctx.results(&suitegraph_lib::build::BuilderKey::new("write", "a"))?;
      let path = source.iter().next().unwrap();
      let data = ctx.target().read(&path.full_path())?;
      ctx.target().write("out/b.txt", &data)?;
      Ok(OutputSet::from([TargetPath::new("out", "b.txt")]))
    })
    .with_prerequisite(a),
  );
  let root = ctx.register(b).unwrap();
  let key = ctx.builder(root).key();

  let outputs = ctx.run(Some(&key)).unwrap();

  assert_eq!(log.runs(), vec!["a", "b"]);
  assert_eq!(env.target.read("out/b.txt").unwrap(), b"from a");
  assert_eq!(
    outputs,
    OutputSet::from([TargetPath::new("out", "a.txt"), TargetPath::new("out", "b.txt")])
  );
  assert_eq!(ctx.results(&key).unwrap().len(), 1);
}

#[test]
fn failing_builder_stops_the_run() {
  let env = TestEnv::new();
  let log = RunLog::default();
  let mut ctx = env.context();

  let broken = arc(FnBuilder::new("task", "broken", |_| {
    Err(BuildError::failed(BuilderKey::new("task", "broken"), "exit code 1"))
  }));
  let after = arc(task("after", &log).with_prerequisite(broken));
  ctx.register(after).unwrap();

  let err = ctx.run(None).unwrap_err();
  assert!(matches!(err, BuildError::BuilderFailed { .. }));
  assert_eq!(log.count(), 0);
  assert!(matches!(
    ctx.results(&BuilderKey::new("task", "after")),
    Err(BuildError::NotRun(_))
  ));
}

#[test]
fn parallel_run_respects_prerequisites() {
  let env = TestEnv::new();
  let log = RunLog::default();
  let mut ctx = env.context_with(4);

  let leaves: Vec<_> = (0..8).map(|i| arc(writer(&format!("leaf{i}"), "x", &log))).collect();
  let mut join = task("join", &log);
  for leaf in &leaves {
    join = join.with_prerequisite(leaf.clone());
  }
  let root = ctx.register(arc(join)).unwrap();
  let key = ctx.builder(root).key();

  let outputs = ctx.run(Some(&key)).unwrap();

  assert_eq!(outputs.len(), 8);
  assert_eq!(log.count(), 9);
  assert_eq!(log.position("join"), Some(8));
  assert_eq!(ctx.statistics().executed(), 9);
  assert_eq!(ctx.statistics().get("write").unwrap().count, 8);
}

#[test]
fn shared_output_scope_serializes_builders() {
  use std::sync::Arc;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::thread;
  use std::time::Duration;

  let env = TestEnv::new();
  let mut ctx = env.context_with(4);
  let active = Arc::new(AtomicUsize::new(0));
  let peak = Arc::new(AtomicUsize::new(0));

  for i in 0..4 {
    let active = active.clone();
    let peak = peak.clone();
    let builder = FnBuilder::new("scoped", format!("s{i}"), move |_| {
      let now = active.fetch_add(1, Ordering::SeqCst) + 1;
      peak.fetch_max(now, Ordering::SeqCst);
      thread::sleep(Duration::from_millis(20));
      active.fetch_sub(1, Ordering::SeqCst);
      Ok(OutputSet::new())
    })
    .with_output_scope("bin");
    ctx.register(arc(builder)).unwrap();
  }

  ctx.run(None).unwrap();
  assert_eq!(peak.load(Ordering::SeqCst), 1);
}

#[test]
fn breaking_transformation_cancels_the_run() {
  let env = TestEnv::new();
  let log = RunLog::default();
  let mut ctx = env.context();
  ctx.register(arc(task("a", &log))).unwrap();
  ctx.add_transformation(transform::from_fn("stop", |_| ControlFlow::Break(())));

  let err = ctx.run(None).unwrap_err();
  assert!(matches!(err, BuildError::Cancelled(ref name) if name == "stop"));
  assert_eq!(log.count(), 0);
}

#[test]
fn dot_dump_lists_pruned_builders() {
  let env = TestEnv::new();
  let log = RunLog::default();
  let mut ctx = env.context();
  let a = arc(task("a", &log));
  let b = arc(task("b", &log).with_prerequisite(a));
  ctx.register(b).unwrap();
  ctx.register(arc(task("other", &log))).unwrap();

  let mut dot = Vec::new();
  ctx.dump_dot(Some(&BuilderKey::new("task", "b")), &mut dot).unwrap();
  let dot = String::from_utf8(dot).unwrap();

  assert!(dot.starts_with("digraph"));
  assert!(dot.contains("task:a"));
  assert!(dot.contains("task:b"));
  assert!(!dot.contains("task:other"));
  assert!(dot.contains("->"));
  assert_eq!(log.count(), 0);
}
