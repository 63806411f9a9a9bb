use std::fs::{create_dir_all, read_to_string, remove_file, write};

use rstest::rstest;
use testresult::TestResult;

use dev_shared::fs::write_until_modified;
use dev_shared::test::{build, TestBuild};
use kiln::{CopyTask, FileStamper, FnScript, Task, TaskGraph, TaskOutput, TaskState};

fn copy_script(stamper: FileStamper) -> impl Fn(&mut TaskGraph) -> Result<(), kiln::BuildScriptError> + Clone {
  move |graph: &mut TaskGraph| {
    graph.register(Task::new("copy", CopyTask::new("build/out").source("src").stamper(stamper)))?;
    Ok(())
  }
}

#[rstest]
fn test_up_to_date_task_does_not_run(build: TestBuild) -> TestResult {
  create_dir_all(build.work_dir().join("src/nested"))?;
  write(build.work_dir().join("src/a.txt"), "a")?;
  write(build.work_dir().join("src/nested/b.txt"), "b")?;
  let script = FnScript::new(copy_script(FileStamper::Modified));
  let mut session = build.session();
  session.try_init_build(&script, "build.kiln")?;
  let copied = build.work_dir().join("build/out/nested/b.txt");

  // First run: no record yet.
  session.try_run_tasks(&["copy"])?;
  assert_eq!(build.events.dispatched(), vec!["copy"]);
  assert_eq!(read_to_string(&copied)?, "b");

  // Nothing changed.
  session.try_run_tasks(&["copy"])?;
  assert!(build.events.dispatched().is_empty());
  assert_eq!(build.events.completed_state("copy"), Some(TaskState::Succeeded));
  assert_eq!(build.events.started_count("copy"), 1);
  let outcome = session.last_outcome().expect("no outcome");
  assert_eq!(outcome.output("copy").map(|o| o.files().len()), Some(2));
  assert_eq!(outcome.report().total_up_to_date_tasks, 1);
  assert_eq!(outcome.report().total_executed_tasks, 0);

  // Input changed.
  write_until_modified(build.work_dir().join("src/nested/b.txt"), "b2")?;
  session.try_run_tasks(&["copy"])?;
  assert_eq!(build.events.dispatched(), vec!["copy"]);
  assert_eq!(read_to_string(&copied)?, "b2");

  // Output removed.
  remove_file(&copied)?;
  session.try_run_tasks(&["copy"])?;
  assert_eq!(build.events.dispatched(), vec!["copy"]);
  assert!(copied.is_file());

  // New input file.
  write(build.work_dir().join("src/c.txt"), "c")?;
  session.try_run_tasks(&["copy"])?;
  assert_eq!(build.events.dispatched(), vec!["copy"]);
  assert!(build.work_dir().join("build/out/c.txt").is_file());
  Ok(())
}

#[rstest]
fn test_state_persists_across_sessions(build: TestBuild) -> TestResult {
  create_dir_all(build.work_dir().join("src"))?;
  write(build.work_dir().join("src/a.txt"), "a")?;
  let script = FnScript::new(copy_script(FileStamper::Hash));

  {
    let mut session = build.session();
    session.try_init_build(&script, "build.kiln")?;
    session.try_run_tasks(&["copy"])?;
    assert_eq!(build.events.dispatched(), vec!["copy"]);
  }

  let mut session = build.session();
  session.try_init_build(&script, "build.kiln")?;
  session.try_run_tasks(&["copy"])?;
  assert!(build.events.dispatched().is_empty());
  assert_eq!(build.events.completed_state("copy"), Some(TaskState::Succeeded));
  Ok(())
}

#[rstest]
fn test_changed_configuration_is_outdated(build: TestBuild) -> TestResult {
  create_dir_all(build.work_dir().join("src"))?;
  write(build.work_dir().join("src/a.txt"), "a")?;
  {
    let mut session = build.session();
    session.try_init_build(&FnScript::new(copy_script(FileStamper::Modified)), "build.kiln")?;
    session.try_run_tasks(&["copy"])?;
  }
  let mut session = build.session();
  session.try_init_build(&FnScript::new(copy_script(FileStamper::Hash)), "build.kiln")?;
  session.try_run_tasks(&["copy"])?;
  assert_eq!(build.events.dispatched(), vec!["copy"]);
  Ok(())
}

#[rstest]
fn test_up_to_date_task_stays_up_to_date_after_dependency_executed(build: TestBuild) -> TestResult {
  create_dir_all(build.work_dir().join("src"))?;
  write(build.work_dir().join("src/a.txt"), "a")?;
  let script = FnScript::new(|graph: &mut TaskGraph| {
    graph.register(Task::action("deps", |_| Ok(TaskOutput::None)))?;
    graph.register(Task::new("copy", CopyTask::new("build/out").source("src")).depends_on(["deps"]))?;
    Ok(())
  });
  let mut session = build.session();
  session.try_init_build(&script, "build.kiln")?;
  session.try_run_tasks(&["copy"])?;
  assert_eq!(build.events.dispatched(), vec!["deps", "copy"]);

  // The action always runs, but what it hands to `copy` did not change.
  session.try_run_tasks(&["copy"])?;
  assert_eq!(build.events.dispatched(), vec!["deps"]);
  assert_eq!(build.events.completed_state("copy"), Some(TaskState::Succeeded));
  let outcome = session.last_outcome().expect("no outcome");
  assert_eq!(outcome.report().total_executed_tasks, 1);
  assert_eq!(outcome.report().total_up_to_date_tasks, 1);
  assert_eq!(outcome.output("copy").map(|o| o.files()), Some(vec![build.work_dir().join("build/out/a.txt")]));
  Ok(())
}

#[rstest]
fn test_dependent_reruns_when_dependency_output_changes(build: TestBuild) -> TestResult {
  create_dir_all(build.work_dir().join("src"))?;
  write(build.work_dir().join("src/a.txt"), "a")?;
  let script = FnScript::new(|graph: &mut TaskGraph| {
    graph.register(Task::new("copy", CopyTask::new("build/out").source("src")))?;
    graph.register(Task::new("stage", CopyTask::new("build/stage").source("build/out")).depends_on(["copy"]))?;
    graph.register(Task::action("check", |context| {
      let files = context.dependency_files();
      if files.len() != 1 || !files[0].ends_with("build/stage/a.txt") {
        return Err(format!("unexpected dependency files: {:?}", files).into());
      }
      Ok(TaskOutput::None)
    }).depends_on(["stage"]))?;
    Ok(())
  });
  let mut session = build.session();
  session.try_init_build(&script, "build.kiln")?;
  session.try_run_tasks(&["check"])?;
  assert_eq!(build.events.dispatched(), vec!["copy", "stage", "check"]);

  // Up-to-date tasks present their outputs to dependents that run.
  session.try_run_tasks(&["check"])?;
  assert_eq!(build.events.dispatched(), vec!["check"]);

  // `stage` looked up to date before `copy` rewrote its input.
  write_until_modified(build.work_dir().join("src/a.txt"), "changed")?;
  session.try_run_tasks(&["check"])?;
  assert_eq!(build.events.dispatched(), vec!["copy", "stage", "check"]);
  assert_eq!(read_to_string(build.work_dir().join("build/stage/a.txt"))?, "changed");
  Ok(())
}

#[rstest]
fn test_dependency_outputs_are_recorded_across_runs(build: TestBuild) -> TestResult {
  create_dir_all(build.work_dir().join("src"))?;
  create_dir_all(build.work_dir().join("res"))?;
  write(build.work_dir().join("src/a.txt"), "a")?;
  write(build.work_dir().join("res/r.txt"), "r")?;
  let script = FnScript::new(|graph: &mut TaskGraph| {
    graph.register(Task::new("copy", CopyTask::new("build/out").source("src/a.txt")))?;
    graph.register(Task::new("stage", CopyTask::new("build/stage").source("res")).depends_on(["copy"]))?;
    Ok(())
  });
  let mut session = build.session();
  session.try_init_build(&script, "build.kiln")?;
  session.try_run_tasks(&["stage"])?;
  assert_eq!(build.events.dispatched(), vec!["copy", "stage"]);

  // `copy` runs on its own, so `stage` has not seen its new output yet.
  write_until_modified(build.work_dir().join("src/a.txt"), "b")?;
  session.try_run_tasks(&["copy"])?;
  assert_eq!(build.events.dispatched(), vec!["copy"]);
  session.try_run_tasks(&["stage"])?;
  assert_eq!(build.events.dispatched(), vec!["stage"]);
  session.try_run_tasks(&["stage"])?;
  assert!(build.events.dispatched().is_empty());
  Ok(())
}

#[rstest]
fn test_failed_task_reruns(build: TestBuild) -> TestResult {
  let script = FnScript::new(|graph: &mut TaskGraph| {
    graph.register(Task::new("copy", CopyTask::new("build/out").source("missing.txt")))?;
    Ok(())
  });
  let mut session = build.session();
  session.try_init_build(&script, "build.kiln")?;
  assert!(!session.run_tasks(&["copy"]));
  assert_eq!(session.state("copy"), TaskState::Failed);

  write(build.work_dir().join("missing.txt"), "here now")?;
  session.try_run_tasks(&["copy"])?;
  assert_eq!(build.events.dispatched(), vec!["copy"]);
  assert_eq!(read_to_string(build.work_dir().join("build/out/missing.txt"))?, "here now");
  Ok(())
}

#[cfg(unix)]
#[rstest]
fn test_exec_with_outputs(build: TestBuild) -> TestResult {
  use kiln::ExecTask;

  create_dir_all(build.work_dir().join("src"))?;
  write(build.work_dir().join("src/in.txt"), "hello")?;
  let script = FnScript::new(|graph: &mut TaskGraph| {
    let exec = ExecTask::new("sh")
      .args(["-c", "mkdir -p build && tr a-z A-Z < src/in.txt > build/out.txt"])
      .input("src/in.txt")
      .output("build/out.txt");
    graph.register(Task::new("upper", exec))?;
    graph.register(Task::new("fail", ExecTask::new("sh").args(["-c", "echo broken >&2; exit 3"])))?;
    Ok(())
  });
  let mut session = build.session();
  session.try_init_build(&script, "build.kiln")?;
  session.try_run_tasks(&["upper"])?;
  assert_eq!(read_to_string(build.work_dir().join("build/out.txt"))?, "HELLO");
  session.try_run_tasks(&["upper"])?;
  assert!(build.events.dispatched().is_empty());

  let error = match session.try_run_tasks(&["fail"]) {
    Err(kiln::Error::FailedBuild(error)) => error,
    other => panic!("expected failed build, got {:?}", other.map(|_| ())),
  };
  assert!(error.failures[0].message.contains("broken"));
  Ok(())
}
