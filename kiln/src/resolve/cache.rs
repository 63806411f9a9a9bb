use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use super::coordinate::Coordinate;
use super::repository::Repository;

/// On-disk artifact cache shared across resolutions and sessions, laid out as
/// `<root>/<repository id hash>/<group path>/<artifact>/<version>/<file>`.
///
/// Files only ever appear in the cache complete: they are written to a temporary file in the destination directory and
/// atomically renamed into place. Optional files a repository does not have are remembered with an empty `.missing`
/// marker next to where the file would be.
#[derive(Clone, Debug)]
pub struct ArtifactCache {
  root: PathBuf,
}

impl ArtifactCache {
  #[inline]
  pub fn new(root: impl Into<PathBuf>) -> Self { Self { root: root.into() } }

  #[inline]
  pub fn root(&self) -> &Path { &self.root }

  /// Cache path of `coordinate` as served by `repository`.
  #[inline]
  pub fn path(&self, repository: &Repository, coordinate: &Coordinate) -> PathBuf {
    self.resource_path(repository, &coordinate.path())
  }

  /// Cache path of any repository-relative resource, such as `maven-metadata.xml`.
  #[inline]
  pub fn resource_path(&self, repository: &Repository, path: &str) -> PathBuf {
    let mut result = self.root.join(repository.id_hash());
    for segment in path.split('/').filter(|s| !s.is_empty()) {
      result.push(segment);
    }
    result
  }

  /// Returns the cached file for `coordinate` from `repository`, if present.
  #[inline]
  pub fn get(&self, repository: &Repository, coordinate: &Coordinate) -> Option<PathBuf> {
    let path = self.path(repository, coordinate);
    path.is_file().then_some(path)
  }

  #[inline]
  fn missing_marker(&self, repository: &Repository, coordinate: &Coordinate) -> PathBuf {
    let mut path = self.path(repository, coordinate).into_os_string();
    path.push(".missing");
    PathBuf::from(path)
  }

  /// Whether `repository` was recorded as not having `coordinate`.
  #[inline]
  pub fn is_missing(&self, repository: &Repository, coordinate: &Coordinate) -> bool {
    self.missing_marker(repository, coordinate).is_file()
  }

  /// Records that `repository` does not have `coordinate`.
  pub fn mark_missing(&self, repository: &Repository, coordinate: &Coordinate) -> Result<(), io::Error> {
    let marker = self.missing_marker(repository, coordinate);
    if let Some(directory) = marker.parent() {
      fs::create_dir_all(directory)?;
    }
    fs::write(marker, b"")
  }

  /// Forgets that `repository` did not have `coordinate`.
  pub fn clear_missing(&self, repository: &Repository, coordinate: &Coordinate) -> Result<(), io::Error> {
    match fs::remove_file(self.missing_marker(repository, coordinate)) {
      Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
      _ => Ok(()),
    }
  }

  /// Writes `bytes` to a temporary file next to `destination`, calls `verify` on them, and only if that succeeds
  /// atomically promotes the temporary file to `destination`. The temporary file is removed when verification fails.
  pub fn store<E>(
    &self,
    destination: &Path,
    bytes: &[u8],
    verify: impl FnOnce(&[u8]) -> Result<(), E>,
  ) -> Result<Result<(), E>, io::Error> {
    let directory = destination.parent().unwrap_or(&self.root);
    fs::create_dir_all(directory)?;
    let mut file = NamedTempFile::new_in(directory)?;
    file.write_all(bytes)?;
    file.flush()?;
    if let Err(e) = verify(bytes) {
      return Ok(Err(e));
    }
    file.persist(destination).map_err(|e| e.error)?;
    Ok(Ok(()))
  }
}
