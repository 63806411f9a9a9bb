use std::path::PathBuf;
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use assert_matches::assert_matches;
use rstest::rstest;
use testresult::TestResult;

use dev_shared::test::{build, TestBuild};
use kiln::tracker::event::Event;
use kiln::{BuildScriptError, Error, FnScript, GraphError, Task, TaskGraph, TaskOutput, TaskState};

type Log = Arc<Mutex<Vec<String>>>;

/// An action task that appends its name to `log` when it runs.
fn logging(log: &Log, name: &str) -> Task {
  let log = log.clone();
  let entry = name.to_string();
  Task::action(name, move |_| {
    log.lock().unwrap().push(entry.clone());
    Ok(TaskOutput::None)
  })
}

fn failing(name: &str) -> Task {
  Task::action(name, |_| Err("boom".into()))
}

#[rstest]
fn test_dependencies_run_first(build: TestBuild) -> TestResult {
  let log = Log::default();
  let script_log = log.clone();
  let script = FnScript::new(move |graph: &mut TaskGraph| {
    graph.register(logging(&script_log, "c").depends_on(["b"]))?;
    graph.register(logging(&script_log, "b").depends_on(["a"]))?;
    graph.register(logging(&script_log, "a"))?;
    Ok(())
  });
  let mut session = build.session();
  session.try_init_build(&script, "build.kiln")?;
  let outcome = session.try_run_tasks(&["c"])?;
  assert!(outcome.succeeded());
  assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);

  let events = &build.events;
  for task in ["a", "b", "c"] {
    assert_eq!(events.started_count(task), 1);
    assert_eq!(events.completed_count(task), 1);
    assert_eq!(events.completed_state(task), Some(TaskState::Succeeded));
  }
  let a_completed = events.completed_index("a").expect("a not completed");
  let b_started = events.started_index("b").expect("b not started");
  let b_completed = events.completed_index("b").expect("b not completed");
  let c_started = events.started_index("c").expect("c not started");
  assert!(a_completed < b_started);
  assert!(b_completed < c_started);
  assert_matches!(events.events().first(), Some(Event::BuildStart { requested }) if requested == &["c"]);
  assert_matches!(events.events().last(), Some(Event::BuildEnd { succeeded: true }));
  Ok(())
}

#[rstest]
fn test_only_closure_runs(build: TestBuild) -> TestResult {
  let log = Log::default();
  let script_log = log.clone();
  let script = FnScript::new(move |graph: &mut TaskGraph| {
    graph.register(logging(&script_log, "a"))?;
    graph.register(logging(&script_log, "b").depends_on(["a"]))?;
    graph.register(logging(&script_log, "unrelated"))?;
    Ok(())
  });
  let mut session = build.session();
  session.try_init_build(&script, "build.kiln")?;
  session.try_run_tasks(&["b"])?;
  assert_eq!(*log.lock().unwrap(), vec!["a", "b"]);
  assert_eq!(session.state("unrelated"), TaskState::Pending);
  Ok(())
}

#[rstest]
fn test_shared_dependency_runs_once(build: TestBuild) -> TestResult {
  let log = Log::default();
  let script_log = log.clone();
  let script = FnScript::new(move |graph: &mut TaskGraph| {
    graph.register(logging(&script_log, "base"))?;
    graph.register(logging(&script_log, "left").depends_on(["base"]))?;
    graph.register(logging(&script_log, "right").depends_on(["base"]))?;
    graph.register(Task::group("all").depends_on(["left", "right"]))?;
    Ok(())
  });
  let mut session = build.session();
  session.try_init_build(&script, "build.kiln")?;
  session.try_run_tasks(&["all", "left"])?;
  let log = log.lock().unwrap();
  assert_eq!(log.iter().filter(|t| *t == "base").count(), 1);
  assert_eq!(log.len(), 3);
  assert_eq!(log[0], "base");
  assert_eq!(build.events.completed_state("all"), Some(TaskState::Succeeded));
  Ok(())
}

#[rstest]
fn test_independent_tasks_run_concurrently(build: TestBuild) -> TestResult {
  let (x_tx, x_rx) = mpsc::channel::<()>();
  let (y_tx, y_rx) = mpsc::channel::<()>();
  let x_rx = Arc::new(Mutex::new(x_rx));
  let y_rx = Arc::new(Mutex::new(y_rx));
  let script = FnScript::new(move |graph: &mut TaskGraph| {
    let (x_tx, y_rx) = (x_tx.clone(), y_rx.clone());
    graph.register(Task::action("x", move |_| {
      x_tx.send(()).map_err(|e| e.to_string())?;
      y_rx.lock().unwrap().recv_timeout(Duration::from_secs(10)).map_err(|e| e.to_string())?;
      Ok(TaskOutput::None)
    }))?;
    let (y_tx, x_rx) = (y_tx.clone(), x_rx.clone());
    graph.register(Task::action("y", move |_| {
      y_tx.send(()).map_err(|e| e.to_string())?;
      x_rx.lock().unwrap().recv_timeout(Duration::from_secs(10)).map_err(|e| e.to_string())?;
      Ok(TaskOutput::None)
    }))?;
    Ok(())
  });
  let mut session = build.session();
  session.try_init_build(&script, "build.kiln")?;
  session.try_run_tasks(&["x", "y"])?;
  Ok(())
}

#[rstest]
fn test_single_thread(build: TestBuild) -> TestResult {
  let log = Log::default();
  let script_log = log.clone();
  let script = FnScript::new(move |graph: &mut TaskGraph| {
    for name in ["a", "b", "c", "d"] {
      graph.register(logging(&script_log, name))?;
    }
    Ok(())
  });
  let config = kiln::SessionConfig { task_threads: 1, ..build.config() };
  let mut session = build.session_with(config);
  session.try_init_build(&script, "build.kiln")?;
  session.try_run_tasks(&["a", "b", "c", "d"])?;
  assert_eq!(log.lock().unwrap().len(), 4);
  Ok(())
}

#[rstest]
fn test_dependency_outputs(build: TestBuild) -> TestResult {
  let produced = build.work_dir().join("produced.txt");
  let expected = produced.clone();
  let script = FnScript::new(move |graph: &mut TaskGraph| {
    let produced = produced.clone();
    graph.register(Task::action("produce", move |_| Ok(TaskOutput::Files(vec![produced.clone()]))))?;
    let expected = expected.clone();
    graph.register(Task::action("consume", move |context| {
      assert_eq!(context.dependency_files(), vec![expected.clone()]);
      assert_matches!(context.dependency_output("produce"), Some(TaskOutput::Files(_)));
      assert_eq!(context.classpath()?, expected.clone().into_os_string());
      Ok(TaskOutput::None)
    }).depends_on(["produce"]))?;
    Ok(())
  });
  let mut session = build.session();
  session.try_init_build(&script, "build.kiln")?;
  let outcome = session.try_run_tasks(&["consume"])?;
  let files = outcome.output("produce").map(|o| o.files()).unwrap_or_default();
  assert_eq!(files, vec![build.work_dir().join("produced.txt")]);
  Ok(())
}

#[rstest]
fn test_failure_skips_dependents(build: TestBuild) -> TestResult {
  let script = FnScript::new(|graph: &mut TaskGraph| {
    graph.register(failing("a"))?;
    graph.register(Task::group("b").depends_on(["a"]))?;
    graph.register(Task::group("c").depends_on(["b"]))?;
    Ok(())
  });
  let mut session = build.session();
  session.try_init_build(&script, "build.kiln")?;
  let error = assert_matches!(session.try_run_tasks(&["c"]), Err(Error::FailedBuild(error)) => error);
  assert_eq!(error.failed_tasks().collect::<Vec<_>>(), vec!["a"]);
  assert_eq!(error.failures[0].chain, vec!["a", "b", "c"]);
  assert_eq!(error.failures[0].message, "boom");

  assert_eq!(session.state("a"), TaskState::Failed);
  assert_eq!(session.state("b"), TaskState::Skipped);
  assert_eq!(session.state("c"), TaskState::Skipped);
  let events = &build.events;
  assert_eq!(events.started_count("b"), 0);
  assert_eq!(events.completed_count("b"), 1);
  assert_matches!(events.events().iter().find(|e| e.match_completed("a").is_some()),
    Some(Event::TaskCompleted { error: Some(message), .. }) if message == "boom");
  assert_matches!(events.events().last(), Some(Event::BuildEnd { succeeded: false }));
  assert!(!session.run_tasks(&["c"]));
  Ok(())
}

#[rstest]
fn test_keep_going(build: TestBuild) -> TestResult {
  let log = Log::default();
  let script_log = log.clone();
  let script = FnScript::new(move |graph: &mut TaskGraph| {
    graph.register(failing("a"))?;
    graph.register(Task::group("b").depends_on(["a"]))?;
    graph.register(Task::action("slow", |_| {
      std::thread::sleep(Duration::from_millis(50));
      Ok(TaskOutput::None)
    }))?;
    graph.register(logging(&script_log, "c").depends_on(["slow"]))?;
    Ok(())
  });
  let config = kiln::SessionConfig { keep_going: true, ..build.config() };
  let mut session = build.session_with(config);
  session.try_init_build(&script, "build.kiln")?;
  assert_matches!(session.try_run_tasks(&["b", "c"]), Err(Error::FailedBuild(_)));
  assert_eq!(session.state("b"), TaskState::Skipped);
  assert_eq!(session.state("c"), TaskState::Succeeded);
  assert_eq!(*log.lock().unwrap(), vec!["c"]);
  Ok(())
}

#[rstest]
fn test_halts_after_failure(build: TestBuild) -> TestResult {
  let log = Log::default();
  let script_log = log.clone();
  let script = FnScript::new(move |graph: &mut TaskGraph| {
    graph.register(failing("a"))?;
    graph.register(Task::action("slow", |_| {
      std::thread::sleep(Duration::from_millis(200));
      Ok(TaskOutput::None)
    }))?;
    graph.register(logging(&script_log, "c").depends_on(["slow"]))?;
    Ok(())
  });
  let mut session = build.session();
  session.try_init_build(&script, "build.kiln")?;
  assert_matches!(session.try_run_tasks(&["a", "c"]), Err(Error::FailedBuild(_)));
  assert_eq!(session.state("slow"), TaskState::Succeeded);
  assert_eq!(session.state("c"), TaskState::Skipped);
  assert!(log.lock().unwrap().is_empty());
  Ok(())
}

#[rstest]
fn test_panic_is_failure(build: TestBuild) -> TestResult {
  let script = FnScript::new(|graph: &mut TaskGraph| {
    graph.register(Task::action("explode", |_| panic!("kaboom")))?;
    graph.register(Task::group("after").depends_on(["explode"]))?;
    Ok(())
  });
  let mut session = build.session();
  session.try_init_build(&script, "build.kiln")?;
  let error = assert_matches!(session.try_run_tasks(&["after"]), Err(Error::FailedBuild(error)) => error);
  assert_eq!(error.failures.len(), 1);
  assert!(error.failures[0].message.contains("kaboom"));
  assert_eq!(session.state("explode"), TaskState::Failed);
  assert_eq!(session.state("after"), TaskState::Skipped);

  // The session stays usable.
  assert_matches!(session.try_run_tasks(&["explode"]), Err(Error::FailedBuild(_)));
  Ok(())
}

#[rstest]
fn test_unknown_requested_task(build: TestBuild) -> TestResult {
  let script = FnScript::new(|graph: &mut TaskGraph| Ok(graph.register(Task::group("a"))?));
  let mut session = build.session();
  session.try_init_build(&script, "build.kiln")?;
  assert_matches!(session.try_run_tasks(&["nope"]), Err(Error::Graph(GraphError::UnknownTask(e))) => {
    assert_eq!(e.name, "nope");
    assert_eq!(e.required_by, None);
  });
  assert!(build.events.events().is_empty());
  assert!(session.last_outcome().is_none());
  Ok(())
}

#[rstest]
fn test_unknown_dependency(build: TestBuild) {
  let script = FnScript::new(|graph: &mut TaskGraph| Ok(graph.register(Task::group("a").depends_on(["ghost"]))?));
  let mut session = build.session();
  assert_matches!(session.try_init_build(&script, "build.kiln"), Err(Error::Graph(GraphError::UnknownTask(e))) => {
    assert_eq!(e.name, "ghost");
    assert_eq!(e.required_by.as_deref(), Some("a"));
  });
  assert!(session.graph().is_none());
}

#[rstest]
fn test_duplicate_task(build: TestBuild) {
  let script = FnScript::new(|graph: &mut TaskGraph| {
    graph.register(Task::group("a"))?;
    graph.register(Task::group("a"))?;
    Ok(())
  });
  let mut session = build.session();
  assert_matches!(
    session.try_init_build(&script, "build.kiln"),
    Err(Error::BuildScript(BuildScriptError::Register(GraphError::DuplicateTask(e)))) if e.name == "a"
  );
}

#[rstest]
fn test_cycle_aborts_before_execution(build: TestBuild) {
  let log = Log::default();
  let script_log = log.clone();
  let script = FnScript::new(move |graph: &mut TaskGraph| {
    graph.register(logging(&script_log, "a").depends_on(["b"]))?;
    graph.register(logging(&script_log, "b").depends_on(["a"]))?;
    Ok(())
  });
  let mut session = build.session();
  assert_matches!(session.try_init_build(&script, "build.kiln"), Err(Error::Graph(GraphError::CyclicDependency(e))) => {
    assert_eq!(e.cycle.first(), e.cycle.last());
    assert_eq!(e.cycle.len(), 3);
  });
  assert_matches!(session.try_run_tasks(&["a"]), Err(Error::NotInitialized));
  assert!(log.lock().unwrap().is_empty());
}

#[rstest]
fn test_session_lifecycle(build: TestBuild) -> TestResult {
  let script = FnScript::new(|graph: &mut TaskGraph| {
    graph.register(Task::group("compile").with_group("build"))?;
    graph.register(Task::action("test", |_| Ok(TaskOutput::None)).with_group("verification").depends_on(["compile"]))?;
    Ok(())
  });
  let mut session = build.session();
  assert_matches!(session.try_run_tasks(&["compile"]), Err(Error::NotInitialized));
  assert!(session.init_build(&script, "build.kiln"));
  assert_matches!(session.try_init_build(&script, "build.kiln"), Err(Error::AlreadyInitialized));
  assert!(build.work_dir().join("build").is_dir());

  let summaries = session.tasks();
  let names: Vec<_> = summaries.iter().map(|t| (t.name.as_str(), t.group.as_deref(), t.kind)).collect();
  assert_eq!(names, vec![("compile", Some("build"), "group"), ("test", Some("verification"), "action")]);
  assert!(summaries.iter().all(|t| t.state == TaskState::Pending));

  assert!(session.run_tasks(&["test"]));
  assert!(session.tasks().iter().all(|t| t.state == TaskState::Succeeded));
  assert!(build.work_dir().join("build/.kiln/state.json").is_file());
  Ok(())
}

#[rstest]
fn test_execute_start_counts_closure(build: TestBuild) -> TestResult {
  let script = FnScript::new(|graph: &mut TaskGraph| {
    graph.register(Task::group("a"))?;
    graph.register(Task::group("b").depends_on(["a"]))?;
    graph.register(Task::group("c"))?;
    Ok(())
  });
  let mut session = build.session();
  session.try_init_build(&script, PathBuf::from("build.kiln"))?;
  session.try_run_tasks(&["b"])?;
  assert_eq!(build.events.count(|e| matches!(e, Event::ExecuteStart { task_count: 2 })), 1);
  Ok(())
}
