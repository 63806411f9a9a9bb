use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use crate::error::TaskError;
use crate::task::{RunContext, TaskOutput, Work};

type Action = dyn Fn(&mut RunContext) -> Result<TaskOutput, TaskError> + Send + Sync;

/// Runs a closure. Always outdated, as the closure cannot be inspected.
#[derive(Clone)]
pub struct ActionTask {
  action: Arc<Action>,
}

impl ActionTask {
  #[inline]
  pub fn new(action: impl Fn(&mut RunContext) -> Result<TaskOutput, TaskError> + Send + Sync + 'static) -> Self {
    Self { action: Arc::new(action) }
  }
}

impl Work for ActionTask {
  #[inline]
  fn kind(&self) -> &'static str { "action" }

  #[inline]
  fn run(&self, context: &mut RunContext) -> Result<TaskOutput, TaskError> {
    (self.action)(context)
  }
}

impl Debug for ActionTask {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ActionTask").finish_non_exhaustive()
  }
}
