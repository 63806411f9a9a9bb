use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use once_cell::sync::Lazy;
use tracing::{error, info};

use crate::config::SessionConfig;
use crate::error::Error;
use crate::graph::TaskGraph;
use crate::resolve::{HttpTransport, ResolvedSet, Transport};
use crate::scheduler::{run_tasks, BuildOutcome, SchedulerOptions};
use crate::script::{load_script, ScriptLoader};
use crate::store::Store;
use crate::task::{BuildEnv, TaskState};
use crate::tracker::Tracker;

/// Claim arena that lets only one [`BuildSession`] be active at a time. Callers waiting for the claim are served in
/// arrival order.
#[derive(Clone, Default, Debug)]
pub struct SessionArena {
  inner: Arc<ArenaInner>,
}

#[derive(Default, Debug)]
struct ArenaInner {
  state: Mutex<ArenaState>,
  released: Condvar,
}

#[derive(Default, Debug)]
struct ArenaState {
  claimed: bool,
  next_ticket: u64,
  waiting: VecDeque<u64>,
}

static GLOBAL_ARENA: Lazy<SessionArena> = Lazy::new(SessionArena::default);

impl SessionArena {
  #[inline]
  pub fn new() -> Self { Self::default() }

  /// The process-wide arena.
  #[inline]
  pub fn global() -> Self { GLOBAL_ARENA.clone() }

  /// Blocks until the claim is free and it is this caller's turn, then takes the claim.
  pub fn acquire(&self) -> SessionClaim {
    let mut state = self.lock();
    let ticket = state.next_ticket;
    state.next_ticket += 1;
    state.waiting.push_back(ticket);
    while state.claimed || state.waiting.front() != Some(&ticket) {
      state = self.inner.released.wait(state).unwrap_or_else(PoisonError::into_inner);
    }
    state.waiting.pop_front();
    state.claimed = true;
    SessionClaim { arena: self.clone() }
  }

  /// Takes the claim if it is free and nobody is waiting for it.
  pub fn try_acquire(&self) -> Option<SessionClaim> {
    let mut state = self.lock();
    if state.claimed || !state.waiting.is_empty() {
      return None;
    }
    state.claimed = true;
    Some(SessionClaim { arena: self.clone() })
  }

  #[inline]
  pub fn is_claimed(&self) -> bool { self.lock().claimed }

  /// Number of callers blocked in [`acquire`](Self::acquire).
  #[inline]
  pub fn waiting(&self) -> usize { self.lock().waiting.len() }

  fn release(&self) {
    self.lock().claimed = false;
    self.inner.released.notify_all();
  }

  #[inline]
  fn lock(&self) -> MutexGuard<'_, ArenaState> {
    self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

/// The claim of a [`SessionArena`]; released when dropped.
#[derive(Debug)]
pub struct SessionClaim {
  arena: SessionArena,
}

impl Drop for SessionClaim {
  #[inline]
  fn drop(&mut self) { self.arena.release(); }
}

/// Name, group, kind, and current state of a registered task.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct TaskSummary {
  pub name: String,
  pub group: Option<String>,
  pub kind: &'static str,
  /// State reached in the latest run, or [`TaskState::Pending`] if the task was not part of it.
  pub state: TaskState,
}

/// Drives one build: a single [`init_build`](Self::init_build) that loads the build script into the task graph,
/// followed by any number of [`run_tasks`](Self::run_tasks) over that graph.
///
/// A session holds the claim of its [`SessionArena`] for its whole lifetime.
pub struct BuildSession<A: Tracker = ()> {
  config: SessionConfig,
  tracker: A,
  transport: Option<Arc<dyn Transport>>,
  graph: Option<TaskGraph>,
  store: Store,
  outcome: Option<BuildOutcome>,
  _claim: SessionClaim,
}

impl BuildSession {
  /// Creates a session without status tracking, waiting for the process-wide claim.
  #[inline]
  pub fn new(config: SessionConfig) -> Self { Self::with_tracker(config, ()) }
}

impl<A: Tracker> BuildSession<A> {
  /// Creates a session reporting status to `tracker`, waiting for the process-wide claim.
  #[inline]
  pub fn with_tracker(config: SessionConfig, tracker: A) -> Self {
    Self::with_arena(config, tracker, &SessionArena::global())
  }

  /// Creates a session reporting status to `tracker`, waiting for the claim of `arena`.
  pub fn with_arena(config: SessionConfig, tracker: A, arena: &SessionArena) -> Self {
    let claim = arena.acquire();
    Self { config, tracker, transport: None, graph: None, store: Store::default(), outcome: None, _claim: claim }
  }

  /// Uses `transport` for repository access instead of HTTP.
  #[inline]
  pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
    self.transport = Some(transport);
    self
  }

  #[inline]
  pub fn config(&self) -> &SessionConfig { &self.config }
  #[inline]
  pub fn tracker(&self) -> &A { &self.tracker }
  #[inline]
  pub fn graph(&self) -> Option<&TaskGraph> { self.graph.as_ref() }

  /// Re-fetch dependency metadata in the next run only.
  #[inline]
  pub fn set_refresh_dependencies(&mut self, refresh: bool) { self.config.refresh_dependencies = refresh; }

  /// Loads `build_file` (relative to the working directory) with `loader`, registers its tasks, and validates the
  /// task graph. Returns `false` after logging the error if that fails.
  pub fn init_build<L: ScriptLoader>(&mut self, loader: &L, build_file: impl AsRef<Path>) -> bool {
    match self.try_init_build(loader, build_file) {
      Ok(()) => true,
      Err(e) => {
        error!("{}", e);
        false
      }
    }
  }

  /// Like [`init_build`](Self::init_build), but returns the error.
  pub fn try_init_build<L: ScriptLoader>(&mut self, loader: &L, build_file: impl AsRef<Path>) -> Result<(), Error> {
    if self.graph.is_some() {
      return Err(Error::AlreadyInitialized);
    }
    for dir in [self.config.work_dir.clone(), self.config.output_dir(), self.config.cache_dir()] {
      create_dir(dir)?;
    }
    self.store = Store::load(self.config.state_file())?;

    let build_file = self.config.work_dir.join(build_file);
    let mut graph = TaskGraph::new();
    load_script(loader, &build_file, &mut graph)?;
    graph.validate()?;
    info!(build_file = %build_file.display(), tasks = graph.len(), "initialized build");
    self.graph = Some(graph);
    Ok(())
  }

  /// Runs the tasks named `names` and their dependencies. Returns `false` after logging the error if the graph is
  /// not initialized, a name is unknown, or the build fails.
  pub fn run_tasks(&mut self, names: &[&str]) -> bool {
    match self.try_run_tasks(names) {
      Ok(_) => true,
      Err(e) => {
        error!("{}", e);
        false
      }
    }
  }

  /// Like [`run_tasks`](Self::run_tasks), but returns the outcome or the error. A failed build still updates the
  /// [last outcome](Self::last_outcome).
  pub fn try_run_tasks(&mut self, names: &[&str]) -> Result<&BuildOutcome, Error> {
    if self.graph.is_none() {
      return Err(Error::NotInitialized);
    }
    let transport = match &self.transport {
      Some(transport) => transport.clone(),
      None => {
        let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(self.config.http_timeout())?);
        self.transport = Some(transport.clone());
        transport
      }
    };
    let env = BuildEnv {
      work_dir: self.config.work_dir.clone(),
      output_dir: self.config.output_dir(),
      cache_dir: self.config.cache_dir(),
      refresh_dependencies: self.config.refresh_dependencies,
      offline: self.config.offline,
      download_threads: self.config.download_threads(),
      transport,
    };
    let options = SchedulerOptions { threads: self.config.task_threads(), keep_going: self.config.keep_going };

    let Some(graph) = &self.graph else { return Err(Error::NotInitialized); };
    let outcome = run_tasks(graph, names, &env, &mut self.store, &options, &self.tracker)?;
    self.config.refresh_dependencies = false;
    self.store.save(self.config.state_file())?;

    let failure = outcome.failure().cloned();
    let outcome = self.outcome.insert(outcome);
    match failure {
      Some(failure) => Err(failure.into()),
      None => Ok(outcome),
    }
  }

  /// Outcome of the latest run.
  #[inline]
  pub fn last_outcome(&self) -> Option<&BuildOutcome> { self.outcome.as_ref() }

  /// All registered tasks in registration order, with their current state.
  pub fn tasks(&self) -> Vec<TaskSummary> {
    let Some(graph) = &self.graph else { return Vec::new(); };
    graph.tasks()
      .map(|task| TaskSummary {
        name: task.name().to_string(),
        group: task.group_label().map(str::to_string),
        kind: task.type_tag(),
        state: self.state(task.name()),
      })
      .collect()
  }

  /// State of the task named `name` in the latest run.
  #[inline]
  pub fn state(&self, name: &str) -> TaskState {
    self.outcome.as_ref().and_then(|o| o.state(name)).unwrap_or_default()
  }

  /// Artifacts resolved by the resolve task named `name` in the latest run.
  #[inline]
  pub fn resolved(&self, name: &str) -> Option<Arc<ResolvedSet>> {
    self.outcome.as_ref()?.output(name)?.resolved().cloned()
  }
}

fn create_dir(path: PathBuf) -> Result<(), Error> {
  fs::create_dir_all(&path).map_err(|source| Error::CreateDir { path, source })
}
