use std::fmt::{Debug, Formatter};
use std::path::Path;

use tracing::debug;

use crate::error::BuildScriptError;
use crate::graph::TaskGraph;

/// A loaded build script. The engine does not inspect scripts; it only sees the tasks they register.
pub trait BuildScript {
  /// Registers tasks into `graph`.
  fn init(&mut self, graph: &mut TaskGraph) -> Result<(), BuildScriptError>;
  /// Called after [`init`](Self::init), before the graph is validated.
  #[inline]
  fn finish(&mut self, _graph: &TaskGraph) -> Result<(), BuildScriptError> { Ok(()) }
}

/// Turns a build description into a [`BuildScript`].
pub trait ScriptLoader {
  type Script: BuildScript;
  fn load(&self, build_file: &Path) -> Result<Self::Script, BuildScriptError>;
}

/// Loads `build_file` with `loader` and runs the resulting script against `graph`.
pub fn load_script<L: ScriptLoader>(
  loader: &L,
  build_file: &Path,
  graph: &mut TaskGraph,
) -> Result<L::Script, BuildScriptError> {
  let mut script = loader.load(build_file)?;
  script.init(graph)?;
  script.finish(graph)?;
  debug!(build_file = %build_file.display(), tasks = graph.len(), "loaded build script");
  Ok(script)
}

/// A build script given by a closure, for programmatic builds. It is its own loader and ignores the build file.
#[derive(Clone)]
pub struct FnScript<F> {
  init: F,
}

impl<F: Fn(&mut TaskGraph) -> Result<(), BuildScriptError>> FnScript<F> {
  #[inline]
  pub fn new(init: F) -> Self { Self { init } }
}

impl<F: Fn(&mut TaskGraph) -> Result<(), BuildScriptError>> BuildScript for FnScript<F> {
  #[inline]
  fn init(&mut self, graph: &mut TaskGraph) -> Result<(), BuildScriptError> { (self.init)(graph) }
}

impl<F: Fn(&mut TaskGraph) -> Result<(), BuildScriptError> + Clone> ScriptLoader for FnScript<F> {
  type Script = Self;
  #[inline]
  fn load(&self, _build_file: &Path) -> Result<Self::Script, BuildScriptError> { Ok(self.clone()) }
}

impl<F> Debug for FnScript<F> {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("FnScript").finish_non_exhaustive()
  }
}
