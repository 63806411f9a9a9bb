//! Maven-style dependency resolution: POM fetching and interpolation, transitive closure with nearest-wins conflict
//! resolution, checksum-verified downloads, and an on-disk artifact cache.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

use hashlink::LinkedHashMap;
use thiserror::Error;

pub use cache::ArtifactCache;
pub use checksum::{Checksum, ChecksumAlgorithm};
pub use coordinate::{ArtifactKey, Coordinate, Dependency, Exclusion, Scope, ScopeFilter};
pub use repository::{CredentialProvider, Credentials, EnvCredentials, Repository};
pub use resolver::{ResolveRequest, Resolver, ResolverOptions};
pub use transport::{HttpTransport, Transport};
pub use version::{Version, VersionRange};

use crate::CyclicDependencyError;

pub mod coordinate;
pub mod version;
pub mod repository;
pub mod checksum;
pub mod pom;
pub mod transport;
pub mod cache;
pub mod resolver;

/// Errors of a resolution. Any of these aborts the whole resolution.
#[derive(Debug, Error)]
pub enum ResolveError {
  #[error("repository '{repository}' failed: {message}")]
  Repository { repository: String, message: String },
  #[error("artifact '{coordinate}' was not found in any repository ({})", .repositories.join(", "))]
  NotFound { coordinate: String, repositories: Vec<String> },
  #[error("unresolved property '${{{property}}}' in '{pom}'")]
  UnresolvedProperty { property: String, pom: String },
  #[error("checksum mismatch for '{file}' from repository '{repository}': expected {algorithm} {expected}, got {actual}")]
  ChecksumMismatch {
    file: String,
    repository: String,
    algorithm: ChecksumAlgorithm,
    expected: String,
    actual: String,
  },
  #[error(transparent)]
  CyclicDependency(#[from] CyclicDependencyError),
  #[error("invalid POM for '{coordinate}': {message}")]
  InvalidPom { coordinate: String, message: String },
  #[error("invalid coordinate '{0}'")]
  InvalidCoordinate(String),
  #[error("invalid scope '{0}'")]
  InvalidScope(String),
  #[error("invalid version range '{0}'")]
  InvalidVersionRange(String),
  #[error("no version of '{artifact}' matches range '{range}'")]
  NoMatchingVersion { artifact: String, range: String },
  #[error("I/O error on '{}'", .path.display())]
  Io { path: PathBuf, #[source] source: io::Error },
}

/// A conflict-resolved artifact and its files.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct ResolvedArtifact {
  pub coordinate: Coordinate,
  pub scope: Scope,
  /// Distance from the requested coordinates; requested coordinates have depth 0.
  pub depth: usize,
  /// Primary file; `None` for `pom`-packaged artifacts.
  pub file: Option<PathBuf>,
  /// Auxiliary files by classifier (e.g., `sources`, `javadoc`), when the repository has them.
  pub auxiliary: BTreeMap<String, PathBuf>,
}

/// Result of a resolution: exactly one version per [`ArtifactKey`], in resolution (breadth-first) order.
#[derive(Clone, Default, Eq, PartialEq, Debug)]
pub struct ResolvedSet {
  artifacts: LinkedHashMap<ArtifactKey, ResolvedArtifact>,
}

impl ResolvedSet {
  #[inline]
  pub(crate) fn insert(&mut self, artifact: ResolvedArtifact) {
    self.artifacts.insert(artifact.coordinate.key(), artifact);
  }

  #[inline]
  pub fn len(&self) -> usize { self.artifacts.len() }
  #[inline]
  pub fn is_empty(&self) -> bool { self.artifacts.is_empty() }
  #[inline]
  pub fn iter(&self) -> impl Iterator<Item=&ResolvedArtifact> + '_ { self.artifacts.values() }

  #[inline]
  pub fn artifact(&self, key: &ArtifactKey) -> Option<&ResolvedArtifact> { self.artifacts.get(key) }

  /// Finds the unclassified artifact `group:artifact`, or failing that any classified one.
  pub fn get(&self, group: &str, artifact: &str) -> Option<&ResolvedArtifact> {
    let mut matching = self.iter().filter(|a| a.coordinate.group == group && a.coordinate.artifact == artifact);
    let first = matching.next()?;
    if first.coordinate.classifier.is_none() {
      return Some(first);
    }
    matching.find(|a| a.coordinate.classifier.is_none()).or(Some(first))
  }

  /// Primary files of artifacts whose scope `filter` allows, in resolution order.
  pub fn files(&self, filter: &ScopeFilter) -> Vec<PathBuf> {
    self.iter()
      .filter(|a| filter.allows(a.scope))
      .filter_map(|a| a.file.clone())
      .collect()
  }

  /// Primary files per scope, keyed by artifact coordinate.
  pub fn files_by_scope(&self) -> BTreeMap<Scope, Vec<(&Coordinate, &Path)>> {
    let mut result: BTreeMap<Scope, Vec<(&Coordinate, &Path)>> = BTreeMap::new();
    for artifact in self.iter() {
      if let Some(file) = &artifact.file {
        result.entry(artifact.scope).or_default().push((&artifact.coordinate, file.as_path()));
      }
    }
    result
  }

  /// Platform-joined classpath of all primary files.
  pub fn classpath(&self) -> Result<OsString, std::env::JoinPathsError> {
    std::env::join_paths(self.iter().filter_map(|a| a.file.as_deref()))
  }
}

#[cfg(test)]
mod test {
  use super::*;

  fn artifact(coordinate: &str, scope: Scope, file: Option<&str>) -> ResolvedArtifact {
    ResolvedArtifact {
      coordinate: coordinate.parse().unwrap(),
      scope,
      depth: 0,
      file: file.map(PathBuf::from),
      auxiliary: BTreeMap::new(),
    }
  }

  #[test]
  fn files_per_scope() {
    let mut set = ResolvedSet::default();
    set.insert(artifact("org.a:a:1", Scope::Compile, Some("/c/a.jar")));
    set.insert(artifact("org.b:b:1", Scope::Runtime, Some("/c/b.jar")));
    set.insert(artifact("org.p:parent:1@pom", Scope::Compile, None));
    assert_eq!(set.len(), 3);
    assert_eq!(set.files(&ScopeFilter::compile()), vec![PathBuf::from("/c/a.jar")]);
    assert_eq!(set.files(&ScopeFilter::runtime()), vec![PathBuf::from("/c/a.jar"), PathBuf::from("/c/b.jar")]);
    let by_scope = set.files_by_scope();
    assert_eq!(by_scope[&Scope::Runtime].len(), 1);
    assert_eq!(by_scope[&Scope::Runtime][0].0.artifact, "b");
  }

  #[test]
  fn get_prefers_unclassified() {
    let mut set = ResolvedSet::default();
    set.insert(artifact("org.a:a:1:tests", Scope::Test, Some("/c/a-tests.jar")));
    set.insert(artifact("org.a:a:1", Scope::Compile, Some("/c/a.jar")));
    assert_eq!(set.get("org.a", "a").and_then(|a| a.file.clone()), Some(PathBuf::from("/c/a.jar")));
    assert!(set.get("org.a", "missing").is_none());
  }
}
