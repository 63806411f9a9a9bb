use std::error::Error;
use std::io::{self, Stderr, Stdout};
use std::sync::{Mutex, PoisonError};

use crate::task::TaskState;
use crate::tracker::Tracker;

/// A [`Tracker`] that writes human-readable progress lines to a [`std::io::Write`] instance, for example
/// [`std::io::Stdout`].
///
/// - `→ task`: started
/// - `✓ task`: succeeded
/// - `☒ task`: failed
/// - `⤼ task`: skipped because a dependency failed
#[derive(Debug)]
pub struct WritingTracker<W> {
  writer: Mutex<W>,
  verbose: bool,
}

impl Default for WritingTracker<Stdout> {
  #[inline]
  fn default() -> Self { Self::new_stdout_writer() }
}

impl Default for WritingTracker<Stderr> {
  #[inline]
  fn default() -> Self { Self::new_stderr_writer() }
}

impl<W: io::Write> WritingTracker<W> {
  #[inline]
  pub fn new(writer: W) -> Self { Self { writer: Mutex::new(writer), verbose: false } }
  /// Also write intermediate status updates.
  #[inline]
  pub fn verbose(mut self) -> Self {
    self.verbose = true;
    self
  }
  #[inline]
  pub fn into_inner(self) -> W { self.writer.into_inner().unwrap_or_else(PoisonError::into_inner) }
}

impl WritingTracker<Stdout> {
  #[inline]
  pub fn new_stdout_writer() -> Self { Self::new(io::stdout()) }
}

impl WritingTracker<Stderr> {
  #[inline]
  pub fn new_stderr_writer() -> Self { Self::new(io::stderr()) }
}

impl<W: io::Write + Send> Tracker for WritingTracker<W> {
  #[inline]
  fn build_start(&self, requested: &[&str]) {
    self.writeln(format_args!("Build start: {}", requested.join(", ")));
  }
  #[inline]
  fn build_end(&self, succeeded: bool) {
    if succeeded {
      self.writeln(format_args!("Build succeeded"));
    } else {
      self.writeln(format_args!("Build failed"));
    }
  }

  #[inline]
  fn execute_start(&self, task_count: usize) {
    if self.verbose {
      self.writeln(format_args!("Executing {} task(s)", task_count));
    }
  }

  #[inline]
  fn task_status(&self, task: &str, state: TaskState) {
    if self.verbose {
      self.writeln(format_args!("· {} [{}]", task, state));
    }
  }
  #[inline]
  fn task_started(&self, task: &str) {
    self.writeln(format_args!("→ {}", task));
  }
  #[inline]
  fn task_completed(&self, task: &str, state: TaskState, error: Option<&(dyn Error + 'static)>) {
    match (state, error) {
      (TaskState::Failed, Some(error)) => self.writeln(format_args!("☒ {} [error: {}]", task, error)),
      (TaskState::Failed, None) => self.writeln(format_args!("☒ {}", task)),
      (TaskState::Skipped, _) => self.writeln(format_args!("⤼ {}", task)),
      _ => self.writeln(format_args!("✓ {}", task)),
    }
  }
}

impl<W: io::Write> WritingTracker<W> {
  #[inline]
  fn writeln(&self, args: std::fmt::Arguments) {
    let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
    writeln!(writer, "{}", args).ok();
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn writes_progress_lines() {
    let tracker = WritingTracker::new(Vec::new());
    tracker.build_start(&["jar"]);
    tracker.task_status("compile", TaskState::Outdated);
    tracker.task_started("compile");
    tracker.task_completed("compile", TaskState::Succeeded, None);
    let error: Box<dyn Error> = "exit status 1".into();
    tracker.task_completed("test", TaskState::Failed, Some(error.as_ref()));
    tracker.task_completed("jar", TaskState::Skipped, None);
    tracker.build_end(false);

    let output = String::from_utf8(tracker.into_inner()).unwrap();
    assert_eq!(
      output,
      "Build start: jar\n→ compile\n✓ compile\n☒ test [error: exit status 1]\n⤼ jar\nBuild failed\n"
    );
  }
}
