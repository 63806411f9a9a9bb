use std::error::Error as StdError;
use std::fmt::{Display, Formatter};
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::resolve::ResolveError;

/// Task-level error: anything a task body returns, or a caught panic.
pub type TaskError = Box<dyn StdError + Send + Sync + 'static>;

/// A task with the same name is already registered. The graph is left unchanged.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
#[error("task '{name}' is already registered")]
pub struct DuplicateTaskError {
  pub name: String,
}

/// A task name that does not resolve to a registered task, either because it was requested for execution or because
/// another task depends on it.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
#[error("unknown task '{name}'{}", .required_by.as_ref().map(|d| format!(" (required by '{d}')")).unwrap_or_default())]
pub struct UnknownTaskError {
  pub name: String,
  pub required_by: Option<String>,
}

/// A cycle in a dependency graph, either between tasks or between artifacts. `cycle` starts and ends with the same
/// element.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
#[error("cyclic dependency: {}", .cycle.join(" -> "))]
pub struct CyclicDependencyError {
  pub cycle: Vec<String>,
}

/// Errors from constructing or validating the task graph.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum GraphError {
  #[error(transparent)]
  DuplicateTask(#[from] DuplicateTaskError),
  #[error(transparent)]
  UnknownTask(#[from] UnknownTaskError),
  #[error(transparent)]
  CyclicDependency(#[from] CyclicDependencyError),
  #[error("invalid task name '{0}': only ASCII letters, digits, and '_' are allowed")]
  InvalidTaskName(String),
}

/// Errors from loading or evaluating a build script.
#[derive(Debug, Error)]
pub enum BuildScriptError {
  #[error("failed to read build file '{}'", .path.display())]
  Read { path: PathBuf, #[source] source: io::Error },
  #[error("failed to parse build file '{}': {message}", .path.display())]
  Parse { path: PathBuf, message: String },
  #[error("failed to register tasks")]
  Register(#[from] GraphError),
  #[error("build script failed: {0}")]
  Script(String),
}

/// A task that failed, with the chain of tasks that led from it to a requested task.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct TaskFailure {
  pub task: String,
  pub message: String,
  /// Task names from the failed task up to the requested task that (transitively) depends on it, inclusive.
  pub chain: Vec<String>,
}

impl Display for TaskFailure {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    write!(f, "task '{}' failed: {}", self.task, self.message)?;
    if self.chain.len() > 1 {
      write!(f, " (required by {})", self.chain[1..].join(" <- "))?;
    }
    Ok(())
  }
}

/// A build in which at least one task failed.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct FailedBuildError {
  pub failures: Vec<TaskFailure>,
}

impl FailedBuildError {
  #[inline]
  pub fn failed_tasks(&self) -> impl Iterator<Item=&str> + '_ {
    self.failures.iter().map(|f| f.task.as_str())
  }
}

impl Display for FailedBuildError {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    write!(f, "build failed with {} failed task(s)", self.failures.len())?;
    for failure in &self.failures {
      write!(f, "\n  {}", failure)?;
    }
    Ok(())
  }
}

impl StdError for FailedBuildError {}

/// Errors from loading or saving the incremental store.
#[derive(Debug, Error)]
pub enum StoreError {
  #[error("failed to access build state at '{}'", .path.display())]
  Io { path: PathBuf, #[source] source: io::Error },
  #[error("failed to encode build state")]
  Encode(#[from] serde_json::Error),
}

/// Errors from loading a session configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read configuration file '{}'", .path.display())]
  Read { path: PathBuf, #[source] source: io::Error },
  #[error("failed to parse configuration file '{}'", .path.display())]
  Parse { path: PathBuf, #[source] source: toml::de::Error },
}

/// Top-level error of a build session.
#[derive(Debug, Error)]
pub enum Error {
  #[error(transparent)]
  Graph(#[from] GraphError),
  #[error(transparent)]
  BuildScript(#[from] BuildScriptError),
  #[error(transparent)]
  FailedBuild(#[from] FailedBuildError),
  #[error(transparent)]
  Resolve(#[from] ResolveError),
  #[error(transparent)]
  Store(#[from] StoreError),
  #[error(transparent)]
  Config(#[from] ConfigError),
  #[error("build was already initialized in this session")]
  AlreadyInitialized,
  #[error("build has not been initialized; call `init_build` first")]
  NotInitialized,
  #[error("failed to create directory '{}'", .path.display())]
  CreateDir { path: PathBuf, #[source] source: io::Error },
}
