use std::fs::{read_to_string, write};

use assert_matches::assert_matches;
use rstest::rstest;
use testresult::TestResult;

use dev_shared::pom::{DependencyXml, PomBuilder};
use dev_shared::test::{build, TestBuild};
use kiln::{BuildScriptError, Error, ManifestLoader, SessionConfig, TaskState};
use kiln::resolve::Scope;

const BUILD_FILE: &str = r#"
[[repository]]
name = "central"
url = "https://central.repo.test/maven2"

[[task]]
name = "deps"
type = "resolve"
dependencies = ["org.example:app-core:1.0", { coordinate = "org.example:test-kit:2.0", scope = "test" }]

[[task]]
name = "all"
type = "group"
group = "lifecycle"
depends_on = ["deps"]
"#;

fn publish_repository(build: &TestBuild) {
  let central = build.remote("central");
  let core = PomBuilder::new("org.example:app-core:1.0")
    .dependency("org.example:util:1.2")
    .dependency_xml(DependencyXml::new("org.example:servlet:3.0").scope("provided"))
    .build();
  build.transport.publish(&central, "org.example:app-core:1.0", core, Some(b"core"));
  build.transport.publish_jar(&central, "org.example:util:1.2");
  build.transport.publish_jar(&central, "org.example:servlet:3.0");
  build.transport.publish_jar(&central, "org.example:test-kit:2.0");
}

#[rstest]
fn test_manifest_build(build: TestBuild) -> TestResult {
  publish_repository(&build);
  write(build.work_dir().join("build.toml"), BUILD_FILE)?;
  let mut session = build.session();
  session.try_init_build(&ManifestLoader, "build.toml")?;

  let tasks = session.tasks();
  assert_eq!(tasks.len(), 2);
  assert_eq!((tasks[0].name.as_str(), tasks[0].kind), ("deps", "resolve"));
  assert_eq!(tasks[1].group.as_deref(), Some("lifecycle"));
  assert_eq!(tasks[1].state, TaskState::Pending);

  session.try_run_tasks(&["all"])?;
  assert_eq!(session.state("deps"), TaskState::Succeeded);
  assert_eq!(session.state("all"), TaskState::Succeeded);

  let resolved = session.resolved("deps").expect("deps resolved nothing");
  // Provided dependencies are not transitive.
  assert_eq!(resolved.len(), 3);
  assert!(resolved.get("org.example", "servlet").is_none());
  let test_kit = resolved.get("org.example", "test-kit").expect("test-kit missing");
  assert_eq!(test_kit.scope, Scope::Test);
  let core = resolved.get("org.example", "app-core").expect("app-core missing");
  let file = core.file.as_ref().expect("app-core has no file");
  assert!(file.starts_with(build.work_dir().join(".kiln/cache")));
  assert_eq!(read_to_string(file)?, "core");
  assert!(session.resolved("all").is_none());
  Ok(())
}

#[rstest]
fn test_warm_cache_across_sessions(build: TestBuild) -> TestResult {
  publish_repository(&build);
  write(build.work_dir().join("build.toml"), BUILD_FILE)?;
  {
    let mut session = build.session();
    session.try_init_build(&ManifestLoader, "build.toml")?;
    session.try_run_tasks(&["deps"])?;
  }
  build.transport.reset_requests();

  let mut session = build.session();
  session.try_init_build(&ManifestLoader, "build.toml")?;
  let first = session.try_run_tasks(&["deps"])?.output("deps").and_then(|o| o.resolved().cloned());
  assert_eq!(build.transport.total_requests(), 0);
  // Resolution always runs, so the result is available to dependents.
  assert_eq!(build.events.dispatched(), vec!["deps"]);
  assert_eq!(first.map(|r| r.len()), Some(3));
  Ok(())
}

#[rstest]
fn test_offline_without_cache_fails(build: TestBuild) -> TestResult {
  publish_repository(&build);
  write(build.work_dir().join("build.toml"), BUILD_FILE)?;
  let mut session = build.session_with(SessionConfig { offline: true, ..build.config() });
  session.try_init_build(&ManifestLoader, "build.toml")?;
  let error = assert_matches!(session.try_run_tasks(&["all"]), Err(Error::FailedBuild(error)) => error);
  assert_eq!(error.failed_tasks().collect::<Vec<_>>(), vec!["deps"]);
  assert_eq!(error.failures[0].chain, vec!["deps", "all"]);
  assert_eq!(session.state("all"), TaskState::Skipped);
  assert_eq!(build.transport.total_requests(), 0);
  Ok(())
}

#[rstest]
fn test_init_errors(build: TestBuild) -> TestResult {
  let mut session = build.session();
  assert_matches!(session.try_init_build(&ManifestLoader, "missing.toml"), Err(Error::BuildScript(BuildScriptError::Read { .. })));
  assert!(session.graph().is_none());
  assert_matches!(session.try_run_tasks(&["all"]), Err(Error::NotInitialized));

  write(build.work_dir().join("build.toml"), BUILD_FILE)?;
  session.try_init_build(&ManifestLoader, "build.toml")?;
  assert_matches!(session.try_init_build(&ManifestLoader, "build.toml"), Err(Error::AlreadyInitialized));
  assert!(!session.init_build(&ManifestLoader, "build.toml"));
  Ok(())
}

#[cfg(unix)]
#[rstest]
fn test_exec_consumes_classpath(build: TestBuild) -> TestResult {
  publish_repository(&build);
  let build_file = format!(r#"{}
[[task]]
name = "compile"
type = "exec"
depends_on = ["deps"]
program = "sh"
args = ["-c", "printf '%s' \"$1\" > cp.txt", "sh", "${{classpath}}"]
"#, BUILD_FILE);
  write(build.work_dir().join("build.toml"), build_file)?;
  let mut session = build.session();
  session.try_init_build(&ManifestLoader, "build.toml")?;
  session.try_run_tasks(&["compile"])?;

  let resolved = session.resolved("deps").expect("deps resolved nothing");
  let classpath = read_to_string(build.work_dir().join("cp.txt"))?;
  let entries: Vec<_> = std::env::split_paths(&classpath).collect();
  let files: Vec<_> = resolved.iter().filter_map(|a| a.file.clone()).collect();
  assert_eq!(entries, files);
  assert_eq!(entries.len(), 3);
  Ok(())
}

#[cfg(unix)]
#[rstest]
fn test_compile_after_resolution_is_incremental(build: TestBuild) -> TestResult {
  publish_repository(&build);
  write(build.work_dir().join("src.txt"), "source")?;
  let build_file = format!(r#"{}
[[task]]
name = "compile"
type = "exec"
depends_on = ["deps"]
program = "sh"
args = ["-c", "mkdir -p out && printf '%s' \"$1\" > out/cp.txt", "sh", "${{classpath}}"]
inputs = ["src.txt"]
outputs = ["out/cp.txt"]
"#, BUILD_FILE);
  write(build.work_dir().join("build.toml"), build_file)?;
  let mut session = build.session();
  session.try_init_build(&ManifestLoader, "build.toml")?;
  session.try_run_tasks(&["compile"])?;
  assert_eq!(build.events.dispatched(), vec!["deps", "compile"]);

  // Resolution runs again and hands over the same cached files.
  session.try_run_tasks(&["compile"])?;
  assert_eq!(build.events.dispatched(), vec!["deps"]);
  assert_eq!(session.state("compile"), TaskState::Succeeded);
  Ok(())
}

#[cfg(unix)]
#[rstest]
fn test_exec_failure_reports_stderr(build: TestBuild) -> TestResult {
  let build_file = r#"
[[task]]
name = "broken"
type = "exec"
program = "sh"
args = ["-c", "echo first >&2; echo 'compilation failed' >&2; exit 1"]
"#;
  write(build.work_dir().join("build.toml"), build_file)?;
  let mut session = build.session();
  session.try_init_build(&ManifestLoader, "build.toml")?;
  let error = assert_matches!(session.try_run_tasks(&["broken"]), Err(Error::FailedBuild(error)) => error);
  assert!(error.failures[0].message.ends_with("compilation failed"), "{}", error.failures[0].message);
  assert_eq!(session.state("broken"), TaskState::Failed);
  Ok(())
}
