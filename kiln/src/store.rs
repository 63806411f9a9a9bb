use std::collections::HashMap;
use std::fs;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::{StoreError, TaskError};
use crate::fs::{expand_files, metadata};
use crate::stamp::{FileStamp, FileStamper};
use crate::task::TaskOutput;

/// Persisted incremental-build state: one [`TaskRecord`] per task that last completed successfully.
#[derive(Default, Debug, Serialize, Deserialize)]
pub struct Store {
  tasks: HashMap<String, TaskRecord>,
}

/// What a task saw and produced the last time it ran.
#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub struct TaskRecord {
  /// Digest of the task's declared configuration.
  pub fingerprint: String,
  pub stamper: FileStamper,
  /// Input files (directories expanded) with their stamps.
  pub inputs: Vec<(PathBuf, FileStamp)>,
  /// Output files (directories expanded) with their modification stamps.
  pub outputs: Vec<(PathBuf, FileStamp)>,
  /// Digest of the outputs received from dependencies; see [`fingerprint_dependencies`].
  #[serde(default)]
  pub dependencies: Option<String>,
}

/// Reason why a task's record does not match the current state of the file system.
#[derive(Clone, Eq, PartialEq, Debug)]
pub enum Inconsistency {
  NoRecord,
  ConfigurationChanged,
  InputsChanged,
  InputChanged(PathBuf),
  OutputMissing(PathBuf),
  OutputOlderThanInput(PathBuf),
}

impl TaskRecord {
  /// Captures the current state of `inputs` and `outputs`.
  pub fn capture(
    fingerprint: impl Into<String>,
    stamper: FileStamper,
    inputs: &[PathBuf],
    outputs: &[PathBuf],
  ) -> Result<Self, io::Error> {
    let inputs = expand_files(inputs)?.into_iter()
      .map(|path| {
        let stamp = stamper.stamp(&path)?;
        Ok((path, stamp))
      })
      .collect::<Result<Vec<_>, io::Error>>()?;
    let outputs = expand_files(outputs)?.into_iter()
      .map(|path| {
        let stamp = FileStamper::Modified.stamp(&path)?;
        Ok((path, stamp))
      })
      .collect::<Result<Vec<_>, io::Error>>()?;
    Ok(Self { fingerprint: fingerprint.into(), stamper, inputs, outputs, dependencies: None })
  }

  /// Checks this record against the current state. Consistent when the configuration is unchanged, the input files
  /// and their stamps are unchanged, every declared output exists, and the oldest output is not older than the newest
  /// input.
  pub fn check(
    &self,
    fingerprint: &str,
    stamper: FileStamper,
    inputs: &[PathBuf],
    outputs: &[PathBuf],
  ) -> Result<Option<Inconsistency>, io::Error> {
    if self.fingerprint != fingerprint || self.stamper != stamper {
      return Ok(Some(Inconsistency::ConfigurationChanged));
    }

    let current_inputs = expand_files(inputs)?;
    if current_inputs.len() != self.inputs.len() || current_inputs.iter().zip(&self.inputs).any(|(c, (r, _))| c != r) {
      return Ok(Some(Inconsistency::InputsChanged));
    }
    let mut newest_input = None;
    for (path, stamp) in &self.inputs {
      if stamper.stamp(path)? != *stamp {
        return Ok(Some(Inconsistency::InputChanged(path.clone())));
      }
      if let Some(modified) = metadata(path)?.map(|m| m.modified()).transpose()? {
        newest_input = newest_input.max(Some(modified));
      }
    }

    for path in outputs {
      if metadata(path)?.is_none() {
        return Ok(Some(Inconsistency::OutputMissing(path.clone())));
      }
    }
    for path in expand_files(outputs)? {
      let Some(modified) = metadata(&path)?.map(|m| m.modified()).transpose()? else {
        return Ok(Some(Inconsistency::OutputMissing(path)));
      };
      if newest_input.is_some_and(|newest| modified < newest) {
        return Ok(Some(Inconsistency::OutputOlderThanInput(path)));
      }
    }
    for (path, _) in &self.outputs {
      if metadata(path)?.is_none() {
        return Ok(Some(Inconsistency::OutputMissing(path.clone())));
      }
    }
    Ok(None)
  }
}

impl Store {
  /// Loads the store from `path`. A missing file yields an empty store; a file that cannot be decoded is discarded
  /// with a warning.
  pub fn load(path: impl AsRef<Path>) -> Result<Self, StoreError> {
    let path = path.as_ref();
    let file = match fs::File::open(path) {
      Ok(file) => file,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
      Err(source) => return Err(StoreError::Io { path: path.to_path_buf(), source }),
    };
    match serde_json::from_reader(BufReader::new(file)) {
      Ok(store) => {
        debug!(path = %path.display(), "loaded build state");
        Ok(store)
      }
      Err(e) => {
        warn!(path = %path.display(), error = %e, "discarding undecodable build state");
        Ok(Self::default())
      }
    }
  }

  /// Saves the store to `path`, atomically replacing any previous state.
  pub fn save(&self, path: impl AsRef<Path>) -> Result<(), StoreError> {
    let path = path.as_ref();
    let io_error = |source| StoreError::Io { path: path.to_path_buf(), source };
    let directory = path.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(directory).map_err(io_error)?;
    let file = NamedTempFile::new_in(directory).map_err(io_error)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, self)?;
    writer.flush().map_err(io_error)?;
    let file = writer.into_inner().map_err(|e| io_error(e.into_error()))?;
    file.persist(path).map_err(|e| io_error(e.error))?;
    Ok(())
  }

  #[inline]
  pub fn get(&self, task: &str) -> Option<&TaskRecord> { self.tasks.get(task) }
  #[inline]
  pub fn set(&mut self, task: impl Into<String>, record: TaskRecord) { self.tasks.insert(task.into(), record); }
  #[inline]
  pub fn remove(&mut self, task: &str) -> Option<TaskRecord> { self.tasks.remove(task) }

  /// Checks the record of `task`; see [`TaskRecord::check`].
  pub fn check(
    &self,
    task: &str,
    fingerprint: &str,
    stamper: FileStamper,
    inputs: &[PathBuf],
    outputs: &[PathBuf],
  ) -> Result<Option<Inconsistency>, io::Error> {
    match self.get(task) {
      Some(record) => record.check(fingerprint, stamper, inputs, outputs),
      None => Ok(Some(Inconsistency::NoRecord)),
    }
  }
}

/// Digest of a task's declared configuration.
pub fn fingerprint(configuration: &impl Serialize) -> Result<String, serde_json::Error> {
  let bytes = serde_json::to_vec(configuration)?;
  Ok(hex::encode(Sha256::digest(bytes)))
}

/// Digest of the outputs a task receives from its dependencies: dependency names, their output files, and the
/// modification stamps of those files.
pub fn fingerprint_dependencies(dependencies: &[(String, Arc<TaskOutput>)]) -> Result<String, TaskError> {
  let mut stamped = Vec::with_capacity(dependencies.len());
  for (name, output) in dependencies {
    let files = output.files().into_iter()
      .map(|path| {
        let stamp = FileStamper::Modified.stamp(&path)?;
        Ok((path, stamp))
      })
      .collect::<Result<Vec<_>, io::Error>>()?;
    stamped.push((name, files));
  }
  Ok(fingerprint(&stamped)?)
}

#[cfg(test)]
mod test {
  use std::fs::write;

  use assert_matches::assert_matches;
  use testresult::TestResult;

  use dev_shared::fs::{create_temp_dir, write_until_modified};

  use super::*;

  #[test]
  fn consistent_until_input_changes() -> TestResult {
    let temp_dir = create_temp_dir()?;
    let input = temp_dir.path().join("in.txt");
    let output = temp_dir.path().join("out.txt");
    write(&input, "input")?;
    write_until_modified(&output, "output")?;
    let (inputs, outputs) = (vec![input.clone()], vec![output.clone()]);

    let record = TaskRecord::capture("config", FileStamper::Modified, &inputs, &outputs)?;
    assert_eq!(record.check("config", FileStamper::Modified, &inputs, &outputs)?, None);
    assert_eq!(
      record.check("other", FileStamper::Modified, &inputs, &outputs)?,
      Some(Inconsistency::ConfigurationChanged)
    );

    write_until_modified(&input, "changed")?;
    assert_eq!(
      record.check("config", FileStamper::Modified, &inputs, &outputs)?,
      Some(Inconsistency::InputChanged(input))
    );
    Ok(())
  }

  #[test]
  fn missing_output_is_inconsistent() -> TestResult {
    let temp_dir = create_temp_dir()?;
    let input = temp_dir.path().join("in.txt");
    let output = temp_dir.path().join("out.txt");
    write(&input, "input")?;
    write(&output, "output")?;
    let (inputs, outputs) = (vec![input], vec![output.clone()]);
    let record = TaskRecord::capture("config", FileStamper::Hash, &inputs, &outputs)?;
    fs::remove_file(&output)?;
    assert_matches!(
      record.check("config", FileStamper::Hash, &inputs, &outputs)?,
      Some(Inconsistency::OutputMissing(path)) if path == output
    );
    Ok(())
  }

  #[test]
  fn save_and_load() -> TestResult {
    let temp_dir = create_temp_dir()?;
    let input = temp_dir.path().join("in.txt");
    write(&input, "input")?;
    let path = temp_dir.path().join(".kiln/state.json");

    assert!(Store::load(&path)?.get("compile").is_none());

    let mut store = Store::default();
    let record = TaskRecord::capture("config", FileStamper::Hash, &[input], &[])?;
    store.set("compile", record.clone());
    store.save(&path)?;

    let loaded = Store::load(&path)?;
    assert_eq!(loaded.get("compile"), Some(&record));
    assert_eq!(loaded.check("missing", "config", FileStamper::Hash, &[], &[])?, Some(Inconsistency::NoRecord));
    Ok(())
  }

  #[test]
  fn undecodable_state_is_discarded() -> TestResult {
    let temp_dir = create_temp_dir()?;
    let path = temp_dir.path().join("state.json");
    write(&path, "{ not json")?;
    assert!(Store::load(&path)?.get("compile").is_none());
    Ok(())
  }

  #[test]
  fn fingerprint_tracks_configuration() -> TestResult {
    assert_eq!(fingerprint(&("javac", ["-d", "out"]))?, fingerprint(&("javac", ["-d", "out"]))?);
    assert_ne!(fingerprint(&("javac", ["-d", "out"]))?, fingerprint(&("javac", ["-d", "bin"]))?);
    Ok(())
  }

  #[test]
  fn unserializable_configuration_has_no_fingerprint() {
    // JSON object keys must be strings.
    let configuration = HashMap::from([((1, 2), "pair key")]);
    assert!(fingerprint(&configuration).is_err());
  }

  #[test]
  fn dependency_fingerprint_tracks_output_files() -> TestResult {
    let temp_dir = create_temp_dir()?;
    let jar = temp_dir.path().join("core.jar");
    write(&jar, "core")?;
    let dependencies = vec![("deps".to_string(), Arc::new(TaskOutput::Files(vec![jar.clone()])))];
    let first = fingerprint_dependencies(&dependencies)?;
    assert_eq!(fingerprint_dependencies(&dependencies)?, first);

    let nothing = vec![("deps".to_string(), Arc::new(TaskOutput::None))];
    assert_ne!(fingerprint_dependencies(&nothing)?, first);
    let renamed = vec![("other".to_string(), Arc::new(TaskOutput::Files(vec![jar.clone()])))];
    assert_ne!(fingerprint_dependencies(&renamed)?, first);

    write_until_modified(&jar, "core2")?;
    assert_ne!(fingerprint_dependencies(&dependencies)?, first);
    Ok(())
  }
}
