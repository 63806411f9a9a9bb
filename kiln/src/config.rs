use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Settings of a [`BuildSession`](crate::BuildSession).
///
/// Relative directories are resolved against `work_dir`.
#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
  pub work_dir: PathBuf,
  /// Build output directory; defaults to `<work_dir>/build`. The incremental state is kept below it.
  pub output_dir: Option<PathBuf>,
  /// Artifact cache directory; defaults to `<work_dir>/.kiln/cache`.
  pub cache_dir: Option<PathBuf>,
  /// Maximum number of tasks executing concurrently.
  pub task_threads: usize,
  /// Maximum number of concurrent artifact downloads per resolution.
  pub download_threads: usize,
  /// Re-fetch dependency metadata in the next run. Resets after that run.
  pub refresh_dependencies: bool,
  /// Keep dispatching tasks unaffected by a failure.
  pub keep_going: bool,
  /// Only consult local repositories and the artifact cache.
  pub offline: bool,
  pub http_timeout_secs: u64,
}

impl Default for SessionConfig {
  fn default() -> Self {
    Self {
      work_dir: PathBuf::from("."),
      output_dir: None,
      cache_dir: None,
      task_threads: 8,
      download_threads: 4,
      refresh_dependencies: false,
      keep_going: false,
      offline: false,
      http_timeout_secs: 30,
    }
  }
}

impl SessionConfig {
  /// Default settings for working directory `work_dir`.
  #[inline]
  pub fn new(work_dir: impl Into<PathBuf>) -> Self {
    Self { work_dir: work_dir.into(), ..Self::default() }
  }

  /// Loads settings from the TOML file at `path`. A relative `work_dir` is resolved against the directory of the file.
  pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)
      .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
    let mut config: Self = toml::from_str(&text)
      .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })?;
    if config.work_dir.is_relative() {
      let base = path.parent().unwrap_or(Path::new("."));
      config.work_dir = base.join(&config.work_dir);
    }
    Ok(config)
  }

  #[inline]
  pub fn output_dir(&self) -> PathBuf {
    match &self.output_dir {
      Some(dir) => self.work_dir.join(dir),
      None => self.work_dir.join("build"),
    }
  }
  #[inline]
  pub fn cache_dir(&self) -> PathBuf {
    match &self.cache_dir {
      Some(dir) => self.work_dir.join(dir),
      None => self.work_dir.join(".kiln").join("cache"),
    }
  }
  /// Location of the incremental build state.
  #[inline]
  pub fn state_file(&self) -> PathBuf { self.output_dir().join(".kiln").join("state.json") }
  #[inline]
  pub fn task_threads(&self) -> usize { self.task_threads.max(1) }
  #[inline]
  pub fn download_threads(&self) -> usize { self.download_threads.max(1) }
  #[inline]
  pub fn http_timeout(&self) -> Duration { Duration::from_secs(self.http_timeout_secs) }
}

#[cfg(test)]
mod test {
  use std::fs::write;

  use assert_matches::assert_matches;
  use testresult::TestResult;

  use dev_shared::fs::create_temp_dir;

  use super::*;

  #[test]
  fn defaults() {
    let config = SessionConfig::new("/project");
    assert_eq!(config.output_dir(), PathBuf::from("/project/build"));
    assert_eq!(config.cache_dir(), PathBuf::from("/project/.kiln/cache"));
    assert_eq!(config.state_file(), PathBuf::from("/project/build/.kiln/state.json"));
    assert_eq!(config.task_threads(), 8);
    assert_eq!(config.http_timeout(), Duration::from_secs(30));
  }

  #[test]
  fn load_from_toml() -> TestResult {
    let temp_dir = create_temp_dir()?;
    let path = temp_dir.path().join("kiln.toml");
    write(&path, "output_dir = \"out\"\ntask_threads = 0\nkeep_going = true\n")?;

    let config = SessionConfig::load(&path)?;
    assert_eq!(config.work_dir, temp_dir.path().join("."));
    assert_eq!(config.output_dir(), temp_dir.path().join(".").join("out"));
    assert_eq!(config.task_threads(), 1);
    assert!(config.keep_going);
    assert!(!config.offline);
    Ok(())
  }

  #[test]
  fn load_errors() -> TestResult {
    let temp_dir = create_temp_dir()?;
    let path = temp_dir.path().join("kiln.toml");
    assert_matches!(SessionConfig::load(&path), Err(ConfigError::Read { .. }));
    write(&path, "task_threads = \"many\"")?;
    assert_matches!(SessionConfig::load(&path), Err(ConfigError::Parse { .. }));
    Ok(())
  }
}
