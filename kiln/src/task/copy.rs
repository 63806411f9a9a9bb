use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::error::TaskError;
use crate::fs::{copy_file, metadata};
use crate::stamp::FileStamper;
use crate::store::{fingerprint, TaskRecord};
use crate::task::{BuildEnv, PrepareContext, RunContext, Staleness, TaskOutput, Work};

/// Copies files and directories into a directory. Files land directly in `into`; directories are copied recursively
/// with their contents placed in `into`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CopyTask {
  pub from: Vec<PathBuf>,
  pub into: PathBuf,
  #[serde(default)]
  pub stamper: FileStamper,
}

impl CopyTask {
  #[inline]
  pub fn new(into: impl Into<PathBuf>) -> Self {
    Self { from: Vec::new(), into: into.into(), stamper: FileStamper::default() }
  }
  #[inline]
  pub fn source(mut self, path: impl Into<PathBuf>) -> Self {
    self.from.push(path.into());
    self
  }
  #[inline]
  pub fn stamper(mut self, stamper: FileStamper) -> Self {
    self.stamper = stamper;
    self
  }

  #[inline]
  fn sources(&self, env: &BuildEnv) -> Vec<PathBuf> {
    self.from.iter().map(|p| env.resolve_path(p)).collect()
  }

  /// Pairs of (source file, destination file). Sources that do not exist are kept, so that copying them fails.
  fn plan(&self, env: &BuildEnv) -> Result<Vec<(PathBuf, PathBuf)>, io::Error> {
    let into = env.resolve_path(&self.into);
    let mut plan = Vec::new();
    for source in self.sources(env) {
      match metadata(&source)? {
        Some(metadata) if metadata.is_dir() => {
          for entry in WalkDir::new(&source).sort_by_file_name() {
            let entry = entry.map_err(io::Error::from)?;
            if !entry.file_type().is_file() { continue; }
            let relative = entry.path().strip_prefix(&source).unwrap_or(entry.path());
            let destination = into.join(relative);
            plan.push((entry.into_path(), destination));
          }
        }
        _ => {
          let destination = match source.file_name() {
            Some(name) => into.join(name),
            None => into.clone(),
          };
          plan.push((source, destination));
        }
      }
    }
    Ok(plan)
  }
}

impl Work for CopyTask {
  #[inline]
  fn kind(&self) -> &'static str { "copy" }

  fn prepare(&self, context: &PrepareContext) -> Result<Staleness, TaskError> {
    let destinations: Vec<_> = self.plan(context.env())?.into_iter().map(|(_, d)| d).collect();
    Ok(context.check(&fingerprint(self)?, self.stamper, &self.sources(context.env()), &destinations)?)
  }

  fn run(&self, context: &mut RunContext) -> Result<TaskOutput, TaskError> {
    let plan = self.plan(context.env())?;
    let mut destinations = Vec::with_capacity(plan.len());
    for (source, destination) in plan {
      copy_file(&source, &destination)
        .map_err(|e| format!("failed to copy '{}' to '{}': {}", source.display(), destination.display(), e))?;
      destinations.push(destination);
    }
    let record = TaskRecord::capture(fingerprint(self)?, self.stamper, &self.sources(context.env()), &destinations)?;
    context.set_record(record);
    Ok(TaskOutput::Files(destinations))
  }

  fn up_to_date_output(&self, context: &PrepareContext) -> TaskOutput {
    match self.plan(context.env()) {
      Ok(plan) => TaskOutput::Files(plan.into_iter().map(|(_, d)| d).collect()),
      Err(_) => TaskOutput::None,
    }
  }
}
