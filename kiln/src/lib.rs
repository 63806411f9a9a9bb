//! Build automation engine.
//!
//! A build script registers named [tasks](Task) with dependencies into a [`TaskGraph`]. A [`BuildSession`] validates
//! the graph and runs requested tasks together with everything they depend on: dependencies first, independent tasks
//! in parallel, and tasks whose inputs and outputs did not change since their last successful run are skipped.
//! [Resolve tasks](ResolveTask) fetch Maven artifacts and their transitive dependencies from remote or local
//! repositories into an artifact cache.

pub use error::{
  BuildScriptError, ConfigError, CyclicDependencyError, DuplicateTaskError, Error, FailedBuildError, GraphError,
  StoreError, TaskError, TaskFailure, UnknownTaskError,
};
pub use config::SessionConfig;
pub use graph::TaskGraph;
pub use manifest::{ManifestLoader, ManifestScript};
pub use scheduler::{BuildOutcome, SchedulerOptions};
pub use script::{BuildScript, FnScript, ScriptLoader};
pub use session::{BuildSession, SessionArena, SessionClaim, TaskSummary};
pub use stamp::{FileStamp, FileStamper};
pub use store::TaskRecord;
pub use task::{
  ActionTask, BuildEnv, CopyTask, ExecTask, GroupTask, PrepareContext, ResolveTask, RunContext, Staleness, Task,
  TaskKind, TaskOutput, TaskState, Work,
};
pub use tracker::Tracker;

pub mod error;
pub mod task;
pub mod graph;
pub mod scheduler;
pub mod tracker;
pub mod stamp;
pub mod store;
pub mod config;
pub mod script;
pub mod manifest;
pub mod session;
pub mod resolve;

mod fs;
