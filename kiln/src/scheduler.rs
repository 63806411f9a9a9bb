use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{mpsc, Arc, Mutex, PoisonError};
use std::thread;

use hashlink::LinkedHashMap;
use tracing::{debug, error};

use crate::error::{FailedBuildError, GraphError, TaskError, TaskFailure};
use crate::graph::TaskGraph;
use crate::store::{fingerprint_dependencies, Store, TaskRecord};
use crate::task::{BuildEnv, PrepareContext, RunContext, Staleness, Task, TaskOutput, TaskState};
use crate::tracker::{CompositeTracker, Tracker};
use crate::tracker::metrics::{MetricsTracker, Report};

/// Settings of one scheduler run.
#[derive(Clone, Debug)]
pub struct SchedulerOptions {
  /// Maximum number of tasks executing concurrently.
  pub threads: usize,
  /// Keep dispatching tasks unaffected by a failure, instead of halting dispatch at the first failure.
  pub keep_going: bool,
}

impl Default for SchedulerOptions {
  fn default() -> Self { Self { threads: 8, keep_going: false } }
}

/// Result of running a set of tasks: the terminal state and output of every task in the dependency closure.
#[derive(Clone, Default, Debug)]
pub struct BuildOutcome {
  states: LinkedHashMap<String, TaskState>,
  outputs: HashMap<String, Arc<TaskOutput>>,
  failure: Option<FailedBuildError>,
  report: Report,
}

impl BuildOutcome {
  #[inline]
  pub fn succeeded(&self) -> bool { self.failure.is_none() }
  #[inline]
  pub fn failure(&self) -> Option<&FailedBuildError> { self.failure.as_ref() }
  #[inline]
  pub fn into_result(self) -> Result<Self, FailedBuildError> {
    match self.failure {
      Some(failure) => Err(failure),
      None => Ok(self),
    }
  }

  /// Terminal state of `task`, or `None` if it was not part of the run.
  #[inline]
  pub fn state(&self, task: &str) -> Option<TaskState> { self.states.get(task).copied() }
  /// Terminal states in the order tasks became ready: dependencies before dependents.
  #[inline]
  pub fn states(&self) -> impl Iterator<Item=(&str, TaskState)> + '_ {
    self.states.iter().map(|(name, state)| (name.as_str(), *state))
  }
  /// Output of `task`, if it succeeded in this run.
  #[inline]
  pub fn output(&self, task: &str) -> Option<&Arc<TaskOutput>> { self.outputs.get(task) }
  /// Task counts and duration of the run.
  #[inline]
  pub fn report(&self) -> &Report { &self.report }
}

struct Job<'g> {
  index: usize,
  task: &'g Task,
  dependencies: Vec<(String, Arc<TaskOutput>)>,
}

struct JobResult {
  index: usize,
  result: Result<TaskOutput, TaskError>,
  record: Option<TaskRecord>,
}

/// Bookkeeping of the coordinating thread.
struct Coordinator<'g, 'a, A> {
  tasks: Vec<&'g Task>,
  dependencies: Vec<Vec<usize>>,
  dependents: Vec<Vec<usize>>,
  remaining: Vec<usize>,
  states: Vec<TaskState>,
  outputs: Vec<Option<Arc<TaskOutput>>>,
  up_to_date_outputs: Vec<Option<TaskOutput>>,
  prepare_errors: Vec<Option<TaskError>>,
  errors: Vec<Option<String>>,
  executed: Vec<bool>,
  ready: VecDeque<usize>,
  halted: bool,
  keep_going: bool,
  tracker: &'a A,
}

/// Runs the `requested` tasks of the validated `graph` and all their dependencies.
///
/// First every task of the closure is prepared on the calling thread, which determines whether it is outdated. Then
/// tasks are executed in dependency order by at most `options.threads` worker threads, while the calling thread
/// coordinates: a task becomes ready when all its dependencies reached a terminal state. A ready task is skipped if a
/// dependency failed or was skipped, succeeds without running if it is still up to date, and is dispatched to a worker
/// otherwise. An up-to-date task is still up to date when the dependency outputs it receives match those recorded for
/// it, and, if a dependency executed in this run, when preparing it again reports it up to date. Task failures and
/// panics never escape: they turn into [`TaskState::Failed`].
pub fn run_tasks<A: Tracker>(
  graph: &TaskGraph,
  requested: &[&str],
  env: &BuildEnv,
  store: &mut Store,
  options: &SchedulerOptions,
  tracker: &A,
) -> Result<BuildOutcome, GraphError> {
  let closure = graph.closure(requested)?;
  let index: HashMap<_, _> = closure.iter().enumerate().map(|(i, node)| (*node, i)).collect();
  let tasks: Vec<&Task> = closure.iter().filter_map(|node| graph.task(*node)).collect();
  let dependencies: Vec<Vec<usize>> = closure.iter()
    .map(|node| graph.dependency_nodes(*node).filter_map(|d| index.get(&d).copied()).collect())
    .collect();
  let mut dependents = vec![Vec::new(); closure.len()];
  for (i, deps) in dependencies.iter().enumerate() {
    for d in deps {
      dependents[*d].push(i);
    }
  }

  let metrics = MetricsTracker::default();
  let tracker = CompositeTracker(tracker, &metrics);
  tracker.build_start(requested);
  let mut coordinator = Coordinator {
    remaining: dependencies.iter().map(Vec::len).collect(),
    states: vec![TaskState::Pending; tasks.len()],
    outputs: vec![None; tasks.len()],
    up_to_date_outputs: (0..tasks.len()).map(|_| None).collect(),
    prepare_errors: (0..tasks.len()).map(|_| None).collect(),
    errors: vec![None; tasks.len()],
    executed: vec![false; tasks.len()],
    ready: VecDeque::new(),
    halted: false,
    keep_going: options.keep_going,
    tasks,
    dependencies,
    dependents,
    tracker: &tracker,
  };

  coordinator.prepare(env, store);
  tracker.execute_start(coordinator.tasks.len());
  coordinator.execute(env, store, options.threads);

  let failure = coordinator.failure(requested);
  let succeeded = failure.is_none();
  if let Some(failure) = &failure {
    error!("{}", failure);
  }
  tracker.build_end(succeeded);

  let mut outcome = BuildOutcome { failure, report: metrics.report(), ..BuildOutcome::default() };
  for (i, task) in coordinator.tasks.iter().enumerate() {
    outcome.states.insert(task.name().to_string(), coordinator.states[i]);
    if let Some(output) = coordinator.outputs[i].take() {
      outcome.outputs.insert(task.name().to_string(), output);
    }
  }
  Ok(outcome)
}

impl<'g, 'a, A: Tracker> Coordinator<'g, 'a, A> {
  fn prepare(&mut self, env: &BuildEnv, store: &Store) {
    for (i, task) in self.tasks.iter().enumerate() {
      let context = PrepareContext { task: task.name(), env, store };
      let work = task.kind().work();
      match catch_unwind(AssertUnwindSafe(|| work.prepare(&context))) {
        Ok(Ok(staleness)) => {
          if staleness == Staleness::UpToDate {
            self.up_to_date_outputs[i] = Some(work.up_to_date_output(&context));
          }
          self.states[i] = staleness.into();
          self.tracker.task_status(task.name(), self.states[i]);
        }
        Ok(Err(e)) => self.prepare_errors[i] = Some(e),
        Err(payload) => self.prepare_errors[i] = Some(panic_error(payload)),
      }
    }
  }

  fn execute(&mut self, env: &BuildEnv, store: &mut Store, threads: usize) {
    self.ready.extend((0..self.tasks.len()).filter(|i| self.remaining[*i] == 0));
    let worker_count = threads.max(1).min(self.tasks.len()).max(1);
    let (job_tx, job_rx) = mpsc::channel::<Job<'g>>();
    let (result_tx, result_rx) = mpsc::channel::<JobResult>();
    let job_rx = Mutex::new(job_rx);
    let job_rx = &job_rx;

    thread::scope(|s| {
      for _ in 0..worker_count {
        let result_tx = result_tx.clone();
        s.spawn(move || {
          loop {
            let job = match job_rx.lock().unwrap_or_else(PoisonError::into_inner).recv() {
              Ok(job) => job,
              Err(_) => break,
            };
            let result = run_job(job, env);
            if result_tx.send(result).is_err() {
              break;
            }
          }
        });
      }
      drop(result_tx);

      let mut in_flight = 0usize;
      loop {
        while let Some(i) = self.ready.pop_front() {
          if let Some(job) = self.decide(i, env, store) {
            debug!(task = self.tasks[i].name(), "dispatching");
            if job_tx.send(job).is_ok() {
              in_flight += 1;
            } else {
              self.complete(i, TaskState::Failed, Some("no worker available to run task".into()));
            }
          }
        }
        if in_flight == 0 {
          break;
        }
        let Ok(JobResult { index, result, record }) = result_rx.recv() else {
          break;
        };
        in_flight -= 1;
        let task = self.tasks[index];
        let name = task.name();
        match result {
          Ok(output) => {
            self.executed[index] = true;
            self.outputs[index] = Some(Arc::new(output));
            match record {
              Some(record) => store.set(name, record),
              None => { store.remove(name); }
            }
            self.complete(index, TaskState::Succeeded, None);
          }
          Err(e) => {
            store.remove(name);
            if !self.keep_going {
              self.halted = true;
            }
            self.complete(index, TaskState::Failed, Some(e));
          }
        }
      }
      drop(job_tx);
    });

    // Only reachable when workers vanished; leave no task without a terminal state.
    for i in 0..self.tasks.len() {
      if !self.states[i].is_terminal() {
        self.complete(i, TaskState::Skipped, None);
      }
    }
  }

  /// Settles ready task `i` on the coordinating thread, or returns a job to run it.
  fn decide(&mut self, i: usize, env: &BuildEnv, store: &Store) -> Option<Job<'g>> {
    let task = self.tasks[i];
    if let Some(e) = self.prepare_errors[i].take() {
      self.complete(i, TaskState::Failed, Some(e));
      return None;
    }
    if self.halted || self.dependencies[i].iter().any(|d| self.states[*d].is_failure()) {
      self.complete(i, TaskState::Skipped, None);
      return None;
    }
    let dependencies = self.dependency_outputs(i);
    if self.states[i] == TaskState::UpToDate {
      match self.still_up_to_date(i, &dependencies, env, store) {
        Ok(true) => {
          let output = self.up_to_date_outputs[i].take().unwrap_or_default();
          self.outputs[i] = Some(Arc::new(output));
          self.tracker.task_started(task.name());
          self.complete(i, TaskState::Succeeded, None);
          return None;
        }
        Ok(false) => {
          self.states[i] = TaskState::Outdated;
          self.tracker.task_status(task.name(), TaskState::Outdated);
        }
        Err(e) => {
          self.complete(i, TaskState::Failed, Some(e));
          return None;
        }
      }
    }

    self.states[i] = TaskState::Running;
    self.tracker.task_status(task.name(), TaskState::Running);
    self.tracker.task_started(task.name());
    Some(Job { index: i, task, dependencies })
  }

  /// Outputs of the direct dependencies of task `i`, in declaration order.
  fn dependency_outputs(&self, i: usize) -> Vec<(String, Arc<TaskOutput>)> {
    self.tasks[i].dependencies().iter()
      .filter_map(|name| {
        let d = self.dependencies[i].iter().copied().find(|d| self.tasks[*d].name() == name)?;
        let output = self.outputs[d].clone()?;
        Some((name.clone(), output))
      })
      .collect()
  }

  /// Whether up-to-date task `i` stays up to date now that its `dependencies` settled.
  fn still_up_to_date(
    &mut self,
    i: usize,
    dependencies: &[(String, Arc<TaskOutput>)],
    env: &BuildEnv,
    store: &Store,
  ) -> Result<bool, TaskError> {
    let task = self.tasks[i];
    if let Some(record) = store.get(task.name()) {
      let current = fingerprint_dependencies(dependencies)?;
      if record.dependencies.as_deref() != Some(current.as_str()) {
        debug!(task = task.name(), "outdated: dependency outputs changed");
        return Ok(false);
      }
    }
    if !self.dependencies[i].iter().any(|d| self.executed[*d]) {
      return Ok(true);
    }
    // Dependencies that executed may have written this task's inputs.
    let context = PrepareContext { task: task.name(), env, store };
    let work = task.kind().work();
    match catch_unwind(AssertUnwindSafe(|| work.prepare(&context))) {
      Ok(Ok(Staleness::UpToDate)) => {
        self.up_to_date_outputs[i] = Some(work.up_to_date_output(&context));
        Ok(true)
      }
      Ok(Ok(Staleness::Outdated)) => Ok(false),
      Ok(Err(e)) => Err(e),
      Err(payload) => Err(panic_error(payload)),
    }
  }

  fn complete(&mut self, i: usize, state: TaskState, error: Option<TaskError>) {
    let task = self.tasks[i];
    let name = task.name();
    self.states[i] = state;
    match &error {
      Some(e) => {
        self.errors[i] = Some(e.to_string());
        self.tracker.task_completed(name, state, Some(e.as_ref()));
      }
      None => self.tracker.task_completed(name, state, None),
    }
    for j in self.dependents[i].clone() {
      self.remaining[j] = self.remaining[j].saturating_sub(1);
      if self.remaining[j] == 0 {
        self.ready.push_back(j);
      }
    }
  }

  /// Every failed task with the shortest chain of dependents leading from it to a requested task.
  fn failure(&self, requested: &[&str]) -> Option<FailedBuildError> {
    if self.states.iter().all(|s| *s == TaskState::Succeeded) {
      return None;
    }
    let mut failures = Vec::new();
    for (i, state) in self.states.iter().enumerate() {
      if *state != TaskState::Failed {
        continue;
      }
      failures.push(TaskFailure {
        task: self.tasks[i].name().to_string(),
        message: self.errors[i].clone().unwrap_or_default(),
        chain: self.chain(i, requested),
      });
    }
    Some(FailedBuildError { failures })
  }

  fn chain(&self, from: usize, requested: &[&str]) -> Vec<String> {
    let is_requested = |i: usize| requested.contains(&self.tasks[i].name());
    let mut previous: HashMap<usize, usize> = HashMap::new();
    let mut queue = VecDeque::from([from]);
    let mut end = from;
    while let Some(i) = queue.pop_front() {
      if is_requested(i) {
        end = i;
        break;
      }
      for j in &self.dependents[i] {
        if *j != from && !previous.contains_key(j) {
          previous.insert(*j, i);
          queue.push_back(*j);
        }
      }
    }
    let mut chain = vec![self.tasks[end].name().to_string()];
    let mut current = end;
    while let Some(prev) = previous.get(&current) {
      chain.push(self.tasks[*prev].name().to_string());
      current = *prev;
    }
    chain.reverse();
    chain
  }
}

fn run_job(job: Job, env: &BuildEnv) -> JobResult {
  let mut context = RunContext { task: job.task.name(), env, dependencies: &job.dependencies, record: None };
  let work = job.task.kind().work();
  let result = match catch_unwind(AssertUnwindSafe(|| work.run(&mut context))) {
    Ok(result) => result,
    Err(payload) => Err(panic_error(payload)),
  };
  let mut record = context.record;
  if let Some(record) = &mut record {
    // A record without a dependency digest never matches, so the task runs again next time.
    record.dependencies = fingerprint_dependencies(&job.dependencies).ok();
  }
  JobResult { index: job.index, result, record }
}

fn panic_error(payload: Box<dyn Any + Send>) -> TaskError {
  let message = if let Some(message) = payload.downcast_ref::<&str>() {
    message.to_string()
  } else if let Some(message) = payload.downcast_ref::<String>() {
    message.clone()
  } else {
    "unknown panic payload".to_string()
  };
  format!("task panicked: {}", message).into()
}
