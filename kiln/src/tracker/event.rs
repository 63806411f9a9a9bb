use std::error::Error;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::task::TaskState;
use crate::tracker::Tracker;

/// A [`Tracker`] that stores [`Event`]s in order, useful in testing to assert on scheduling and on the status
/// reported to observers.
#[derive(Debug)]
pub struct EventTracker {
  events: Mutex<Vec<Event>>,
  clear_on_build_start: bool,
}

impl Default for EventTracker {
  fn default() -> Self {
    Self { events: Mutex::default(), clear_on_build_start: true }
  }
}

/// Enumeration of build events.
#[derive(Clone, Eq, PartialEq, Debug)]
pub enum Event {
  BuildStart { requested: Vec<String> },
  BuildEnd { succeeded: bool },
  ExecuteStart { task_count: usize },
  TaskStatus { task: String, state: TaskState },
  TaskStarted { task: String },
  TaskCompleted { task: String, state: TaskState, error: Option<String> },
}

impl Event {
  /// Name of the task this event is about, if any.
  #[inline]
  pub fn task(&self) -> Option<&str> {
    match self {
      Event::TaskStatus { task, .. } | Event::TaskStarted { task } | Event::TaskCompleted { task, .. } => Some(task),
      _ => None,
    }
  }
  /// Returns `true` if this is a [task started event](Event::TaskStarted) for `task`.
  #[inline]
  pub fn is_started_of(&self, task: &str) -> bool {
    matches!(self, Event::TaskStarted { task: t } if t == task)
  }
  /// Returns `Some(state)` if this is a [task completed event](Event::TaskCompleted) for `task`.
  #[inline]
  pub fn match_completed(&self, task: &str) -> Option<TaskState> {
    match self {
      Event::TaskCompleted { task: t, state, .. } if t == task => Some(*state),
      _ => None,
    }
  }
}

impl EventTracker {
  /// Keep events of earlier builds when a new build starts.
  #[inline]
  pub fn accumulating() -> Self { Self { clear_on_build_start: false, ..Self::default() } }

  /// Copy of all events so far.
  #[inline]
  pub fn events(&self) -> Vec<Event> { self.lock().clone() }
  #[inline]
  pub fn clear(&self) { self.lock().clear() }

  /// Number of events for which `predicate` holds.
  #[inline]
  pub fn count(&self, predicate: impl FnMut(&&Event) -> bool) -> usize {
    self.lock().iter().filter(predicate).count()
  }

  /// Number of [task started events](Event::TaskStarted) for `task`.
  #[inline]
  pub fn started_count(&self, task: &str) -> usize { self.count(|e| e.is_started_of(task)) }
  /// Number of [task completed events](Event::TaskCompleted) for `task`.
  #[inline]
  pub fn completed_count(&self, task: &str) -> usize { self.count(|e| e.match_completed(task).is_some()) }

  /// Terminal state of `task` in its first [task completed event](Event::TaskCompleted).
  #[inline]
  pub fn completed_state(&self, task: &str) -> Option<TaskState> {
    self.lock().iter().find_map(|e| e.match_completed(task))
  }

  /// Index of the first [task started event](Event::TaskStarted) for `task`.
  #[inline]
  pub fn started_index(&self, task: &str) -> Option<usize> {
    self.lock().iter().position(|e| e.is_started_of(task))
  }
  /// Index of the first [task completed event](Event::TaskCompleted) for `task`.
  #[inline]
  pub fn completed_index(&self, task: &str) -> Option<usize> {
    self.lock().iter().position(|e| e.match_completed(task).is_some())
  }

  /// Names of the tasks that reached [`TaskState::Running`], in dispatch order.
  pub fn dispatched(&self) -> Vec<String> {
    self.lock().iter()
      .filter_map(|e| match e {
        Event::TaskStatus { task, state: TaskState::Running } => Some(task.clone()),
        _ => None,
      })
      .collect()
  }

  #[inline]
  fn lock(&self) -> MutexGuard<'_, Vec<Event>> {
    self.events.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

impl Tracker for EventTracker {
  #[inline]
  fn build_start(&self, requested: &[&str]) {
    let mut events = self.lock();
    if self.clear_on_build_start {
      events.clear();
    }
    events.push(Event::BuildStart { requested: requested.iter().map(|s| s.to_string()).collect() });
  }
  #[inline]
  fn build_end(&self, succeeded: bool) {
    self.lock().push(Event::BuildEnd { succeeded });
  }
  #[inline]
  fn execute_start(&self, task_count: usize) {
    self.lock().push(Event::ExecuteStart { task_count });
  }
  #[inline]
  fn task_status(&self, task: &str, state: TaskState) {
    self.lock().push(Event::TaskStatus { task: task.to_string(), state });
  }
  #[inline]
  fn task_started(&self, task: &str) {
    self.lock().push(Event::TaskStarted { task: task.to_string() });
  }
  #[inline]
  fn task_completed(&self, task: &str, state: TaskState, error: Option<&(dyn Error + 'static)>) {
    let error = error.map(|e| e.to_string());
    self.lock().push(Event::TaskCompleted { task: task.to_string(), state, error });
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn queries() {
    let tracker = EventTracker::default();
    tracker.build_start(&["b"]);
    tracker.task_status("a", TaskState::Running);
    tracker.task_started("a");
    tracker.task_completed("a", TaskState::Succeeded, None);
    tracker.task_completed("b", TaskState::Skipped, None);
    assert_eq!(tracker.started_count("a"), 1);
    assert_eq!(tracker.started_count("b"), 0);
    assert_eq!(tracker.completed_state("b"), Some(TaskState::Skipped));
    assert!(tracker.started_index("a") < tracker.completed_index("a"));
    assert_eq!(tracker.dispatched(), vec!["a"]);

    tracker.build_start(&["b"]);
    assert_eq!(tracker.events(), vec![Event::BuildStart { requested: vec!["b".to_string()] }]);
  }
}
