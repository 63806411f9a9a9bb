use crate::error::TaskError;
use crate::task::{PrepareContext, RunContext, Staleness, TaskOutput, Work};

/// Aggregates its dependencies. Always up to date, so it succeeds once its dependencies succeeded.
#[derive(Copy, Clone, Default, Debug)]
pub struct GroupTask;

impl Work for GroupTask {
  #[inline]
  fn kind(&self) -> &'static str { "group" }

  #[inline]
  fn prepare(&self, _context: &PrepareContext) -> Result<Staleness, TaskError> {
    Ok(Staleness::UpToDate)
  }

  #[inline]
  fn run(&self, _context: &mut RunContext) -> Result<TaskOutput, TaskError> {
    Ok(TaskOutput::None)
  }
}
