use std::error::Error;
use std::sync::Arc;

use crate::task::TaskState;

pub mod writing;
pub mod event;
pub mod metrics;

/// Build status sink. Can be used to implement progress reporting, logging, event tracing, metrics, etc.
///
/// Worker threads call trackers concurrently, so methods take `&self` and implementations synchronise internally.
#[allow(unused_variables)]
pub trait Tracker: Send + Sync {
  /// Start: a new run of the `requested` tasks.
  #[inline]
  fn build_start(&self, requested: &[&str]) {}
  /// End: completed run, which `succeeded` or not.
  #[inline]
  fn build_end(&self, succeeded: bool) {}

  /// Start: execution phase over `task_count` tasks, after all of them were prepared.
  #[inline]
  fn execute_start(&self, task_count: usize) {}

  /// `task` transitioned to an intermediate `state`: [`TaskState::Outdated`] or [`TaskState::UpToDate`] after
  /// preparing, [`TaskState::Running`] when dispatched.
  #[inline]
  fn task_status(&self, task: &str, state: TaskState) {}
  /// Start: `task` is dispatched, or confirmed up to date.
  #[inline]
  fn task_started(&self, task: &str) {}
  /// End: `task` reached terminal `state`, with `error` if it failed.
  #[inline]
  fn task_completed(&self, task: &str, state: TaskState, error: Option<&(dyn Error + 'static)>) {}
}

/// Implement [`Tracker`] for `()` that does nothing.
impl Tracker for () {}

/// Forward to a shared tracker, so that callers can keep a handle to inspect it.
impl<A: Tracker + ?Sized> Tracker for Arc<A> {
  #[inline]
  fn build_start(&self, requested: &[&str]) { self.as_ref().build_start(requested) }
  #[inline]
  fn build_end(&self, succeeded: bool) { self.as_ref().build_end(succeeded) }
  #[inline]
  fn execute_start(&self, task_count: usize) { self.as_ref().execute_start(task_count) }
  #[inline]
  fn task_status(&self, task: &str, state: TaskState) { self.as_ref().task_status(task, state) }
  #[inline]
  fn task_started(&self, task: &str) { self.as_ref().task_started(task) }
  #[inline]
  fn task_completed(&self, task: &str, state: TaskState, error: Option<&(dyn Error + 'static)>) {
    self.as_ref().task_completed(task, state, error)
  }
}

impl<A: Tracker + ?Sized> Tracker for &A {
  #[inline]
  fn build_start(&self, requested: &[&str]) { (**self).build_start(requested) }
  #[inline]
  fn build_end(&self, succeeded: bool) { (**self).build_end(succeeded) }
  #[inline]
  fn execute_start(&self, task_count: usize) { (**self).execute_start(task_count) }
  #[inline]
  fn task_status(&self, task: &str, state: TaskState) { (**self).task_status(task, state) }
  #[inline]
  fn task_started(&self, task: &str) { (**self).task_started(task) }
  #[inline]
  fn task_completed(&self, task: &str, state: TaskState, error: Option<&(dyn Error + 'static)>) {
    (**self).task_completed(task, state, error)
  }
}

/// A [`Tracker`] that forwards events to two [`Tracker`]s.
#[derive(Default, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Debug)]
pub struct CompositeTracker<A1, A2>(pub A1, pub A2);
impl<A1, A2> CompositeTracker<A1, A2> {
  pub fn new(tracker_1: A1, tracker_2: A2) -> Self { Self(tracker_1, tracker_2) }
}
impl<A1: Tracker, A2: Tracker> Tracker for CompositeTracker<A1, A2> {
  #[inline]
  fn build_start(&self, requested: &[&str]) {
    self.0.build_start(requested);
    self.1.build_start(requested);
  }
  #[inline]
  fn build_end(&self, succeeded: bool) {
    self.0.build_end(succeeded);
    self.1.build_end(succeeded);
  }

  #[inline]
  fn execute_start(&self, task_count: usize) {
    self.0.execute_start(task_count);
    self.1.execute_start(task_count);
  }

  #[inline]
  fn task_status(&self, task: &str, state: TaskState) {
    self.0.task_status(task, state);
    self.1.task_status(task, state);
  }
  #[inline]
  fn task_started(&self, task: &str) {
    self.0.task_started(task);
    self.1.task_started(task);
  }
  #[inline]
  fn task_completed(&self, task: &str, state: TaskState, error: Option<&(dyn Error + 'static)>) {
    self.0.task_completed(task, state, error);
    self.1.task_completed(task, state, error);
  }
}
