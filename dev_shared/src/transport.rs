use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use kiln::resolve::{ChecksumAlgorithm, Coordinate, ResolveError, Repository, Transport};

/// A [`Transport`] serving resources from memory, counting every request. Resources are keyed by repository URL and
/// repository-relative path.
#[derive(Default, Debug)]
pub struct MemoryTransport {
  resources: Mutex<HashMap<(String, String), Vec<u8>>>,
  failing: Mutex<HashSet<String>>,
  requests: Mutex<HashMap<String, usize>>,
}

impl MemoryTransport {
  #[inline]
  pub fn new() -> Self { Self::default() }

  /// Serves `bytes` at `path` of `repository`.
  pub fn put(&self, repository: &Repository, path: impl Into<String>, bytes: impl Into<Vec<u8>>) {
    lock(&self.resources).insert((repository.url().to_string(), path.into()), bytes.into());
  }

  /// Stops serving `path` of `repository`.
  pub fn remove(&self, repository: &Repository, path: &str) {
    lock(&self.resources).remove(&(repository.url().to_string(), path.to_string()));
  }

  /// Serves `bytes` at `path` of `repository`, together with a SHA-256 checksum sidecar.
  pub fn put_with_checksum(&self, repository: &Repository, path: impl Into<String>, bytes: impl Into<Vec<u8>>) {
    let path = path.into();
    let bytes = bytes.into();
    let checksum = ChecksumAlgorithm::Sha256.digest(&bytes);
    self.put(repository, format!("{}.sha256", path), checksum);
    self.put(repository, path, bytes);
  }

  /// Publishes the POM of `coordinate` and, if given, its artifact file, both with checksums.
  pub fn publish(&self, repository: &Repository, coordinate: &str, pom: impl Into<String>, jar: Option<&[u8]>) {
    let coordinate = parse(coordinate);
    self.put_with_checksum(repository, coordinate.pom().path(), pom.into());
    if let Some(jar) = jar {
      self.put_with_checksum(repository, coordinate.path(), jar);
    }
  }

  /// Publishes a `jar`-packaged artifact with generated content and a POM without dependencies.
  pub fn publish_jar(&self, repository: &Repository, coordinate: &str) {
    let pom = crate::pom::PomBuilder::new(coordinate).build();
    self.publish(repository, coordinate, pom, Some(coordinate.as_bytes()));
  }

  /// Publishes a version listing for `group:artifact`.
  pub fn publish_metadata(&self, repository: &Repository, group_artifact: &str, versions: &[&str]) {
    let (group, artifact) = group_artifact.split_once(':').unwrap_or((group_artifact, ""));
    let versions: String = versions.iter().map(|v| format!("<version>{}</version>", v)).collect();
    let xml = format!(
      "<metadata><groupId>{}</groupId><artifactId>{}</artifactId><versioning><versions>{}</versions></versioning></metadata>",
      group, artifact, versions
    );
    self.put(repository, format!("{}/{}/maven-metadata.xml", group.replace('.', "/"), artifact), xml);
  }

  /// Makes every request to `repository` fail.
  pub fn fail(&self, repository: &Repository) {
    lock(&self.failing).insert(repository.url().to_string());
  }

  /// Number of requests for `path`, across all repositories.
  pub fn requests(&self, path: &str) -> usize {
    lock(&self.requests).get(path).copied().unwrap_or_default()
  }

  /// Number of requests, across all repositories and paths.
  pub fn total_requests(&self) -> usize {
    lock(&self.requests).values().sum()
  }

  /// Number of requests for artifact files (not POMs, checksums, or metadata).
  pub fn artifact_requests(&self) -> usize {
    lock(&self.requests).iter()
      .filter(|(path, _)| !path.ends_with(".pom") && !path.ends_with(".xml") && !is_checksum(path))
      .map(|(_, count)| count)
      .sum()
  }

  #[inline]
  pub fn reset_requests(&self) { lock(&self.requests).clear(); }
}

impl Transport for MemoryTransport {
  fn fetch(&self, repository: &Repository, path: &str) -> Result<Option<Vec<u8>>, ResolveError> {
    *lock(&self.requests).entry(path.to_string()).or_default() += 1;
    if lock(&self.failing).contains(repository.url()) {
      return Err(ResolveError::Repository {
        repository: repository.name().to_string(),
        message: format!("failed to fetch '{}': connection refused", path),
      });
    }
    Ok(lock(&self.resources).get(&(repository.url().to_string(), path.to_string())).cloned())
  }
}

/// Parses a `group:artifact:version` coordinate; panics on malformed input.
pub fn parse(coordinate: &str) -> Coordinate {
  match coordinate.parse() {
    Ok(coordinate) => coordinate,
    Err(e) => panic!("invalid coordinate in test: {}", e),
  }
}

fn is_checksum(path: &str) -> bool {
  ChecksumAlgorithm::PREFERENCE.iter().any(|a| path.ends_with(&format!(".{}", a.extension())))
}

#[inline]
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> { mutex.lock().unwrap_or_else(PoisonError::into_inner) }
