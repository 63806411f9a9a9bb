use std::collections::HashSet;
use std::error::Error;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::task::TaskState;
use crate::tracker::Tracker;

/// A [`Tracker`] that counts task outcomes and measures build duration.
#[derive(Debug)]
pub struct MetricsTracker {
  state: Mutex<State>,
  clear_on_build_start: bool,
}

#[derive(Default, Debug)]
struct State {
  report: Report,
  last_build_start: Option<Instant>,
  running: HashSet<String>,
}

impl Default for MetricsTracker {
  fn default() -> Self {
    Self { state: Mutex::default(), clear_on_build_start: true }
  }
}

impl MetricsTracker {
  /// Keep counting across builds instead of starting over at every build.
  #[inline]
  pub fn accumulating() -> Self { Self { clear_on_build_start: false, ..Self::default() } }

  /// Copy of the report so far.
  #[inline]
  pub fn report(&self) -> Report { self.lock().report.clone() }

  #[inline]
  fn lock(&self) -> MutexGuard<'_, State> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

#[derive(Default, Clone, Eq, PartialEq, Debug)]
pub struct Report {
  pub total_tasks: u32,
  pub total_executed_tasks: u32,
  pub total_up_to_date_tasks: u32,
  pub total_failed_tasks: u32,
  pub total_skipped_tasks: u32,

  pub build_duration: Duration,
}

impl Report {
  fn clear(&mut self) {
    *self = Self::default();
  }
}

impl Tracker for MetricsTracker {
  #[inline]
  fn build_start(&self, _requested: &[&str]) {
    let mut state = self.lock();
    if self.clear_on_build_start {
      state.report.clear();
    }
    state.running.clear();
    state.last_build_start = Some(Instant::now());
  }
  #[inline]
  fn build_end(&self, _succeeded: bool) {
    let mut state = self.lock();
    if let Some(start) = state.last_build_start {
      state.report.build_duration = start.elapsed();
    }
  }

  #[inline]
  fn execute_start(&self, task_count: usize) {
    let count = u32::try_from(task_count).unwrap_or(u32::MAX);
    let mut state = self.lock();
    state.report.total_tasks = state.report.total_tasks.saturating_add(count);
  }
  #[inline]
  fn task_status(&self, task: &str, state: TaskState) {
    if state == TaskState::Running {
      let mut guard = self.lock();
      guard.report.total_executed_tasks += 1;
      guard.running.insert(task.to_string());
    }
  }
  #[inline]
  fn task_completed(&self, task: &str, state: TaskState, _error: Option<&(dyn Error + 'static)>) {
    let mut guard = self.lock();
    let executed = guard.running.remove(task);
    let report = &mut guard.report;
    match state {
      TaskState::Succeeded if !executed => report.total_up_to_date_tasks += 1,
      TaskState::Failed => report.total_failed_tasks += 1,
      TaskState::Skipped => report.total_skipped_tasks += 1,
      _ => {}
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn counts_outcomes() {
    let tracker = MetricsTracker::default();
    tracker.build_start(&["jar"]);
    tracker.execute_start(3);
    tracker.task_status("compile", TaskState::Running);
    tracker.task_completed("compile", TaskState::Succeeded, None);
    tracker.task_completed("resources", TaskState::Succeeded, None);
    tracker.task_completed("jar", TaskState::Skipped, None);
    tracker.build_end(false);

    let report = tracker.report();
    assert_eq!(report.total_tasks, 3);
    assert_eq!(report.total_executed_tasks, 1);
    assert_eq!(report.total_up_to_date_tasks, 1);
    assert_eq!(report.total_skipped_tasks, 1);
    assert_eq!(report.total_failed_tasks, 0);

    tracker.build_start(&["jar"]);
    assert_eq!(tracker.report().total_tasks, 0);
  }
}
