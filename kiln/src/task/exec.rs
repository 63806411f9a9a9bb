use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Command;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::TaskError;
use crate::stamp::FileStamper;
use crate::store::{fingerprint, TaskRecord};
use crate::task::{BuildEnv, PrepareContext, RunContext, Staleness, TaskOutput, Work};

/// Argument token replaced by the files produced by the task's dependencies.
pub const CLASSPATH_TOKEN: &str = "${classpath}";

/// Runs an external process. Incremental when it declares outputs: up to date while its record in the store is
/// consistent with the declared inputs and outputs.
#[derive(Clone, Default, Debug, Serialize, Deserialize)]
pub struct ExecTask {
  pub program: String,
  #[serde(default)]
  pub args: Vec<String>,
  #[serde(default)]
  pub working_dir: Option<PathBuf>,
  #[serde(default)]
  pub env: BTreeMap<String, String>,
  #[serde(default)]
  pub inputs: Vec<PathBuf>,
  #[serde(default)]
  pub outputs: Vec<PathBuf>,
  #[serde(default)]
  pub stamper: FileStamper,
}

impl ExecTask {
  #[inline]
  pub fn new(program: impl Into<String>) -> Self {
    Self { program: program.into(), ..Self::default() }
  }
  #[inline]
  pub fn arg(mut self, arg: impl Into<String>) -> Self {
    self.args.push(arg.into());
    self
  }
  #[inline]
  pub fn args<I: IntoIterator<Item=S>, S: Into<String>>(mut self, args: I) -> Self {
    self.args.extend(args.into_iter().map(Into::into));
    self
  }
  #[inline]
  pub fn working_dir(mut self, working_dir: impl Into<PathBuf>) -> Self {
    self.working_dir = Some(working_dir.into());
    self
  }
  #[inline]
  pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.env.insert(key.into(), value.into());
    self
  }
  #[inline]
  pub fn input(mut self, path: impl Into<PathBuf>) -> Self {
    self.inputs.push(path.into());
    self
  }
  #[inline]
  pub fn output(mut self, path: impl Into<PathBuf>) -> Self {
    self.outputs.push(path.into());
    self
  }
  #[inline]
  pub fn stamper(mut self, stamper: FileStamper) -> Self {
    self.stamper = stamper;
    self
  }

  fn paths(&self, env: &BuildEnv) -> (Vec<PathBuf>, Vec<PathBuf>) {
    let inputs = self.inputs.iter().map(|p| env.resolve_path(p)).collect();
    let outputs = self.outputs.iter().map(|p| env.resolve_path(p)).collect();
    (inputs, outputs)
  }
}

impl Work for ExecTask {
  #[inline]
  fn kind(&self) -> &'static str { "exec" }

  fn prepare(&self, context: &PrepareContext) -> Result<Staleness, TaskError> {
    if self.outputs.is_empty() {
      return Ok(Staleness::Outdated);
    }
    let (inputs, outputs) = self.paths(context.env());
    Ok(context.check(&fingerprint(self)?, self.stamper, &inputs, &outputs)?)
  }

  fn run(&self, context: &mut RunContext) -> Result<TaskOutput, TaskError> {
    let mut args = Vec::with_capacity(self.args.len());
    for arg in &self.args {
      if arg.contains(CLASSPATH_TOKEN) {
        let classpath = context.classpath()?;
        args.push(arg.replace(CLASSPATH_TOKEN, &classpath.to_string_lossy()));
      } else {
        args.push(arg.clone());
      }
    }
    let working_dir = match &self.working_dir {
      Some(dir) => context.env().resolve_path(dir),
      None => context.env().work_dir.clone(),
    };

    debug!(task = context.task_name(), program = %self.program, ?args, "spawning");
    let output = Command::new(&self.program)
      .args(&args)
      .current_dir(&working_dir)
      .envs(&self.env)
      .output()
      .map_err(|e| format!("failed to spawn '{}': {}", self.program, e))?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    for line in stdout.lines() {
      info!(task = context.task_name(), "{}", line);
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !output.status.success() {
      let message = stderr.lines().last().unwrap_or_default();
      return Err(format!("'{}' exited with {}: {}", self.program, output.status, message).into());
    }
    for line in stderr.lines() {
      info!(task = context.task_name(), "{}", line);
    }

    let (inputs, outputs) = self.paths(context.env());
    if !outputs.is_empty() {
      context.set_record(TaskRecord::capture(fingerprint(self)?, self.stamper, &inputs, &outputs)?);
    }
    Ok(TaskOutput::Files(outputs))
  }

  fn up_to_date_output(&self, context: &PrepareContext) -> TaskOutput {
    TaskOutput::Files(self.paths(context.env()).1)
  }
}
