use std::ffi::OsString;
use std::fmt::{Debug, Display, Formatter};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::error::TaskError;
use crate::resolve::{ResolvedSet, Transport};
use crate::stamp::FileStamper;
use crate::store::{Store, TaskRecord};

pub use action::ActionTask;
pub use copy::CopyTask;
pub use exec::ExecTask;
pub use group::GroupTask;
pub use resolve::ResolveTask;

mod action;
mod copy;
mod exec;
mod group;
mod resolve;

/// Lifecycle state of a task within one run.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
pub enum TaskState {
  #[default]
  Pending,
  Outdated,
  UpToDate,
  Running,
  Succeeded,
  Failed,
  Skipped,
}

impl TaskState {
  #[inline]
  pub fn is_terminal(&self) -> bool {
    matches!(self, TaskState::Succeeded | TaskState::Failed | TaskState::Skipped)
  }
  /// Failed and skipped tasks both count as failures for their dependents.
  #[inline]
  pub fn is_failure(&self) -> bool {
    matches!(self, TaskState::Failed | TaskState::Skipped)
  }
}

impl Display for TaskState {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    let name = match self {
      TaskState::Pending => "PENDING",
      TaskState::Outdated => "OUTDATED",
      TaskState::UpToDate => "UPTODATE",
      TaskState::Running => "RUNNING",
      TaskState::Succeeded => "SUCCEEDED",
      TaskState::Failed => "FAILED",
      TaskState::Skipped => "SKIPPED",
    };
    f.write_str(name)
  }
}

/// Result of [`Work::prepare`].
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum Staleness {
  Outdated,
  UpToDate,
}

impl From<Staleness> for TaskState {
  #[inline]
  fn from(staleness: Staleness) -> Self {
    match staleness {
      Staleness::Outdated => TaskState::Outdated,
      Staleness::UpToDate => TaskState::UpToDate,
    }
  }
}

/// What a task produced; dependents consume it through [`RunContext`].
#[derive(Clone, Debug, Default)]
pub enum TaskOutput {
  #[default]
  None,
  Files(Vec<PathBuf>),
  Resolved(Arc<ResolvedSet>),
}

impl TaskOutput {
  /// Files of this output: declared files, or the primary files of resolved artifacts.
  pub fn files(&self) -> Vec<PathBuf> {
    match self {
      TaskOutput::None => Vec::new(),
      TaskOutput::Files(files) => files.clone(),
      TaskOutput::Resolved(resolved) => resolved.iter().filter_map(|a| a.file.clone()).collect(),
    }
  }

  #[inline]
  pub fn resolved(&self) -> Option<&Arc<ResolvedSet>> {
    match self {
      TaskOutput::Resolved(resolved) => Some(resolved),
      _ => None,
    }
  }
}

/// Directories, settings, and services shared by all tasks of a run.
#[derive(Clone, Debug)]
pub struct BuildEnv {
  pub work_dir: PathBuf,
  pub output_dir: PathBuf,
  pub cache_dir: PathBuf,
  pub refresh_dependencies: bool,
  pub offline: bool,
  pub download_threads: usize,
  pub transport: Arc<dyn Transport>,
}

impl BuildEnv {
  /// Resolves `path` against the working directory, unless it is absolute.
  #[inline]
  pub fn resolve_path(&self, path: impl AsRef<Path>) -> PathBuf {
    self.work_dir.join(path)
  }
}

/// Context of [`Work::prepare`]: read access to the incremental store.
pub struct PrepareContext<'a> {
  pub(crate) task: &'a str,
  pub(crate) env: &'a BuildEnv,
  pub(crate) store: &'a Store,
}

impl<'a> PrepareContext<'a> {
  #[inline]
  pub fn task_name(&self) -> &str { self.task }
  #[inline]
  pub fn env(&self) -> &BuildEnv { self.env }
  #[inline]
  pub fn record(&self) -> Option<&TaskRecord> { self.store.get(self.task) }

  /// Compares the recorded state of this task against `inputs` and `outputs`.
  pub fn check(
    &self,
    fingerprint: &str,
    stamper: FileStamper,
    inputs: &[PathBuf],
    outputs: &[PathBuf],
  ) -> Result<Staleness, io::Error> {
    match self.store.check(self.task, fingerprint, stamper, inputs, outputs)? {
      Some(inconsistency) => {
        debug!(task = self.task, ?inconsistency, "outdated");
        Ok(Staleness::Outdated)
      }
      None => Ok(Staleness::UpToDate),
    }
  }
}

/// Context of [`Work::run`]: outputs of direct dependencies, and a place to leave a record for the next run.
pub struct RunContext<'a> {
  pub(crate) task: &'a str,
  pub(crate) env: &'a BuildEnv,
  pub(crate) dependencies: &'a [(String, Arc<TaskOutput>)],
  pub(crate) record: Option<TaskRecord>,
}

impl<'a> RunContext<'a> {
  #[inline]
  pub fn task_name(&self) -> &str { self.task }
  #[inline]
  pub fn env(&self) -> &BuildEnv { self.env }

  /// Outputs of the direct dependencies of this task, in declaration order.
  #[inline]
  pub fn dependency_outputs(&self) -> impl Iterator<Item=(&str, &TaskOutput)> + '_ {
    self.dependencies.iter().map(|(name, output)| (name.as_str(), output.as_ref()))
  }
  #[inline]
  pub fn dependency_output(&self, task: &str) -> Option<&TaskOutput> {
    self.dependency_outputs().find(|(name, _)| *name == task).map(|(_, output)| output)
  }

  /// Files produced by all direct dependencies, without duplicates.
  pub fn dependency_files(&self) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for (_, output) in self.dependency_outputs() {
      for file in output.files() {
        if !files.contains(&file) {
          files.push(file);
        }
      }
    }
    files
  }

  /// [`dependency_files`](Self::dependency_files) joined with the platform path separator.
  pub fn classpath(&self) -> Result<OsString, TaskError> {
    Ok(std::env::join_paths(self.dependency_files())?)
  }

  /// Leaves a record for the incremental store; it is persisted only if the task succeeds.
  #[inline]
  pub fn set_record(&mut self, record: TaskRecord) { self.record = Some(record); }
}

/// Capability interface of every task variant.
pub trait Work: Send + Sync + Debug {
  /// Type tag, used for log grouping.
  fn kind(&self) -> &'static str;

  /// Determines whether this task needs to run. Must not have side effects.
  #[inline]
  fn prepare(&self, _context: &PrepareContext) -> Result<Staleness, TaskError> {
    Ok(Staleness::Outdated)
  }

  /// Performs the effect of this task. Only called for outdated tasks: [`prepare`](Self::prepare) returned
  /// [`Staleness::Outdated`], or the task turned outdated once its dependencies settled.
  fn run(&self, context: &mut RunContext) -> Result<TaskOutput, TaskError>;

  /// Output presented to dependents when this task is up to date and does not run.
  #[inline]
  fn up_to_date_output(&self, _context: &PrepareContext) -> TaskOutput { TaskOutput::None }
}

/// The closed set of task variants.
#[derive(Clone, Debug)]
pub enum TaskKind {
  Group(GroupTask),
  Action(ActionTask),
  Exec(ExecTask),
  Copy(CopyTask),
  Resolve(ResolveTask),
}

impl TaskKind {
  #[inline]
  pub fn work(&self) -> &dyn Work {
    match self {
      TaskKind::Group(task) => task,
      TaskKind::Action(task) => task,
      TaskKind::Exec(task) => task,
      TaskKind::Copy(task) => task,
      TaskKind::Resolve(task) => task,
    }
  }
}

impl From<GroupTask> for TaskKind {
  #[inline]
  fn from(task: GroupTask) -> Self { Self::Group(task) }
}
impl From<ActionTask> for TaskKind {
  #[inline]
  fn from(task: ActionTask) -> Self { Self::Action(task) }
}
impl From<ExecTask> for TaskKind {
  #[inline]
  fn from(task: ExecTask) -> Self { Self::Exec(task) }
}
impl From<CopyTask> for TaskKind {
  #[inline]
  fn from(task: CopyTask) -> Self { Self::Copy(task) }
}
impl From<ResolveTask> for TaskKind {
  #[inline]
  fn from(task: ResolveTask) -> Self { Self::Resolve(task) }
}

/// A named unit of build work with dependencies on other tasks (by name).
#[derive(Clone, Debug)]
pub struct Task {
  name: String,
  group: Option<String>,
  dependencies: Vec<String>,
  kind: TaskKind,
}

impl Task {
  #[inline]
  pub fn new(name: impl Into<String>, kind: impl Into<TaskKind>) -> Self {
    Self { name: name.into(), group: None, dependencies: Vec::new(), kind: kind.into() }
  }

  /// Creates a task that only aggregates its dependencies.
  #[inline]
  pub fn group(name: impl Into<String>) -> Self { Self::new(name, GroupTask) }

  /// Creates a task running `action`.
  #[inline]
  pub fn action(
    name: impl Into<String>,
    action: impl Fn(&mut RunContext) -> Result<TaskOutput, TaskError> + Send + Sync + 'static,
  ) -> Self {
    Self::new(name, ActionTask::new(action))
  }

  #[inline]
  pub fn with_group(mut self, group: impl Into<String>) -> Self {
    self.group = Some(group.into());
    self
  }

  /// Adds dependencies on the tasks named `names`. Duplicates are ignored; names are resolved when the graph is
  /// validated, so they may refer to tasks registered later.
  pub fn depends_on<I: IntoIterator<Item=S>, S: Into<String>>(mut self, names: I) -> Self {
    self.add_dependencies(names);
    self
  }

  pub(crate) fn add_dependencies<I: IntoIterator<Item=S>, S: Into<String>>(&mut self, names: I) {
    for name in names {
      let name = name.into();
      if !self.dependencies.contains(&name) {
        self.dependencies.push(name);
      }
    }
  }

  #[inline]
  pub fn name(&self) -> &str { &self.name }
  #[inline]
  pub fn group_label(&self) -> Option<&str> { self.group.as_deref() }
  #[inline]
  pub fn dependencies(&self) -> &[String] { &self.dependencies }
  #[inline]
  pub fn kind(&self) -> &TaskKind { &self.kind }
  #[inline]
  pub fn type_tag(&self) -> &'static str { self.kind.work().kind() }
}

/// Whether `name` is a valid task name: one or more ASCII letters, digits, or underscores.
#[inline]
pub fn is_valid_name(name: &str) -> bool {
  !name.is_empty() && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn names() {
    assert!(is_valid_name("compile_java2"));
    assert!(!is_valid_name(""));
    assert!(!is_valid_name("compile-java"));
    assert!(!is_valid_name("compile java"));
    assert!(!is_valid_name("kompilér"));
  }

  #[test]
  fn dependencies_are_an_ordered_set() {
    let task = Task::group("all")
      .depends_on(["jar", "test"])
      .depends_on(["jar", "docs"])
      .with_group("build");
    assert_eq!(task.dependencies(), ["jar", "test", "docs"]);
    assert_eq!(task.group_label(), Some("build"));
    assert_eq!(task.type_tag(), "group");
  }

  #[test]
  fn states() {
    assert!(TaskState::Skipped.is_failure());
    assert!(TaskState::Skipped.is_terminal());
    assert!(!TaskState::UpToDate.is_terminal());
    assert_eq!(TaskState::from(Staleness::UpToDate), TaskState::UpToDate);
    assert_eq!(TaskState::UpToDate.to_string(), "UPTODATE");
  }
}
