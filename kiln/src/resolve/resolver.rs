use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use hashlink::LinkedHashMap;
use tracing::{debug, info, warn};

use crate::CyclicDependencyError;

use super::{ResolvedArtifact, ResolvedSet, ResolveError};
use super::cache::ArtifactCache;
use super::checksum::{Checksum, ChecksumAlgorithm};
use super::coordinate::{ArtifactKey, Coordinate, Dependency, Exclusion, Scope, ScopeFilter};
use super::pom::{apply_management, EffectivePom, parse_metadata_versions, Pom, PomSource};
use super::repository::Repository;
use super::transport::Transport;
use super::version::VersionRange;

/// Settings of a [`Resolver`].
#[derive(Clone, Debug)]
pub struct ResolverOptions {
  /// Re-fetch metadata (POMs and version listings) even when cached. Verified artifact files are never re-downloaded.
  pub refresh: bool,
  /// Only consult local repositories and the cache.
  pub offline: bool,
  /// Remember repositories that fail with anything but "not found" as broken and continue with the next one, instead
  /// of failing the resolution.
  pub skip_on_error: bool,
  /// Maximum number of concurrent artifact downloads.
  pub download_threads: usize,
  /// Auxiliary classifiers (e.g., `sources`, `javadoc`) to fetch next to each primary artifact, when available.
  pub classifiers: Vec<String>,
}

impl Default for ResolverOptions {
  fn default() -> Self {
    Self { refresh: false, offline: false, skip_on_error: false, download_threads: 4, classifiers: Vec::new() }
  }
}

/// What to resolve: root dependencies, optional version/scope constraints that override everything reached
/// transitively, and the scopes to keep.
#[derive(Clone, Default, Debug)]
pub struct ResolveRequest {
  pub dependencies: Vec<Dependency>,
  pub management: Vec<Dependency>,
  pub scope_filter: ScopeFilter,
}

impl ResolveRequest {
  #[inline]
  pub fn new(dependencies: impl IntoIterator<Item=Dependency>, scope_filter: ScopeFilter) -> Self {
    Self { dependencies: dependencies.into_iter().collect(), management: Vec::new(), scope_filter }
  }
}

/// Resolves artifacts against an ordered list of repositories. Local repositories are always consulted before remote
/// ones; otherwise declaration order is kept.
#[derive(Debug)]
pub struct Resolver {
  repositories: Vec<Repository>,
  cache: ArtifactCache,
  transport: Arc<dyn Transport>,
  options: ResolverOptions,
  broken: Mutex<HashSet<String>>,
  raw_poms: Mutex<HashMap<Coordinate, Arc<Pom>>>,
  effective_poms: Mutex<HashMap<Coordinate, Arc<EffectivePom>>>,
  building: Mutex<Vec<Coordinate>>,
  versions: Mutex<HashMap<(String, String), Arc<Vec<String>>>>,
}

/// A dependency waiting in the breadth-first work queue.
struct Pending {
  dependency: Dependency,
  scope: Scope,
  depth: usize,
  /// Keys of the ancestors of this dependency, root first.
  path: Vec<ArtifactKey>,
  /// Exclusions declared on this dependency and all its ancestors.
  exclusions: Arc<Vec<Exclusion>>,
  /// Dependency management of the ancestors' POMs, root first; the first matching entry wins.
  management: Arc<Vec<Dependency>>,
}

struct Selected {
  coordinate: Coordinate,
  scope: Scope,
  depth: usize,
  has_file: bool,
}

struct Download {
  key: ArtifactKey,
  coordinate: Coordinate,
  classifier: Option<String>,
}

impl Resolver {
  pub fn new(
    repositories: impl IntoIterator<Item=Repository>,
    cache: ArtifactCache,
    transport: Arc<dyn Transport>,
    options: ResolverOptions,
  ) -> Self {
    let mut repositories: Vec<Repository> = repositories.into_iter().collect();
    repositories.sort_by_key(|r| !r.is_local());
    Self {
      repositories,
      cache,
      transport,
      options,
      broken: Mutex::default(),
      raw_poms: Mutex::default(),
      effective_poms: Mutex::default(),
      building: Mutex::default(),
      versions: Mutex::default(),
    }
  }

  #[inline]
  pub fn repositories(&self) -> &[Repository] { &self.repositories }

  /// Resolves `coordinates` (requested with `compile` scope) and their transitive dependencies.
  pub fn resolve(&self, coordinates: &[Coordinate], scope_filter: &ScopeFilter) -> Result<ResolvedSet, ResolveError> {
    let request = ResolveRequest::new(coordinates.iter().cloned().map(Dependency::new), scope_filter.clone());
    self.resolve_request(&request)
  }

  /// Resolves a request: computes the transitive closure breadth-first, selecting the version nearest to the roots
  /// for every artifact (first declared on ties), then downloads and verifies the selected artifacts.
  pub fn resolve_request(&self, request: &ResolveRequest) -> Result<ResolvedSet, ResolveError> {
    let selected = self.collect(request)?;
    let files = self.download_all(&selected)?;

    let mut resolved = ResolvedSet::default();
    for (key, selected) in selected {
      let (file, auxiliary) = files.get(&key).cloned().unwrap_or_default();
      resolved.insert(ResolvedArtifact {
        coordinate: selected.coordinate,
        scope: selected.scope,
        depth: selected.depth,
        file,
        auxiliary,
      });
    }
    info!(artifacts = resolved.len(), "resolved dependencies");
    Ok(resolved)
  }

  fn collect(&self, request: &ResolveRequest) -> Result<LinkedHashMap<ArtifactKey, Selected>, ResolveError> {
    let root_management = Arc::new(request.management.clone());
    let mut queue: VecDeque<Pending> = request.dependencies.iter().map(|dependency| {
      let mut dependency = dependency.clone();
      if let Some(managed) = root_management.iter().find(|m| m.coordinate.key() == dependency.coordinate.key()) {
        apply_management(&mut dependency, managed, false);
      }
      Pending {
        scope: dependency.effective_scope(),
        depth: 0,
        path: Vec::new(),
        exclusions: Arc::new(dependency.exclusions.clone()),
        management: root_management.clone(),
        dependency,
      }
    }).collect();

    let mut selected: LinkedHashMap<ArtifactKey, Selected> = LinkedHashMap::new();
    while let Some(node) = queue.pop_front() {
      let key = node.dependency.coordinate.key();
      if let Some(existing) = selected.get(&key) {
        if existing.coordinate.version != node.dependency.coordinate.version {
          debug!(artifact = %key, kept = %existing.coordinate.version, omitted = %node.dependency.coordinate.version,
            "version conflict resolved in favor of nearest");
        }
        continue;
      }

      let version = self.select_version(&node.dependency.coordinate)?;
      let coordinate = node.dependency.coordinate.with_version(version);
      let pom = self.effective_pom(&coordinate)?;
      let has_file = coordinate.extension != "pom" && (pom.has_artifact_file() || coordinate.classifier.is_some());
      selected.insert(key.clone(), Selected { coordinate: coordinate.clone(), scope: node.scope, depth: node.depth, has_file });

      let mut path = node.path.clone();
      path.push(key);
      let mut management = (*node.management).clone();
      management.extend(pom.management.iter().cloned());
      let management = Arc::new(management);

      for declared in &pom.dependencies {
        if declared.optional {
          continue;
        }
        let mut dependency = declared.clone();
        let child_key = dependency.coordinate.key();
        if let Some(managed) = node.management.iter().find(|m| m.coordinate.key() == child_key) {
          apply_management(&mut dependency, managed, true);
        }
        let Some(scope) = node.scope.transitive(dependency.effective_scope()) else { continue; };
        if !request.scope_filter.allows(scope) {
          continue;
        }
        let group = &dependency.coordinate.group;
        let artifact = &dependency.coordinate.artifact;
        if node.exclusions.iter().any(|e| e.matches(group, artifact)) {
          continue;
        }
        if let Some(start) = path.iter().position(|k| k == &child_key) {
          let mut cycle: Vec<String> = path[start..].iter().map(ArtifactKey::to_string).collect();
          cycle.push(child_key.to_string());
          return Err(ResolveError::CyclicDependency(CyclicDependencyError { cycle }));
        }
        if dependency.coordinate.version.is_empty() {
          return Err(ResolveError::InvalidPom {
            coordinate: coordinate.pom().to_string(),
            message: format!("no version for dependency '{}'", child_key),
          });
        }
        let mut exclusions = (*node.exclusions).clone();
        exclusions.extend(dependency.exclusions.iter().cloned());
        queue.push_back(Pending {
          dependency,
          scope,
          depth: node.depth + 1,
          path: path.clone(),
          exclusions: Arc::new(exclusions),
          management: management.clone(),
        });
      }
    }
    Ok(selected)
  }

  fn select_version(&self, coordinate: &Coordinate) -> Result<String, ResolveError> {
    if !VersionRange::is_range(&coordinate.version) {
      return Ok(coordinate.version.clone());
    }
    let range = VersionRange::parse(&coordinate.version)?;
    let versions = self.available_versions(&coordinate.group, &coordinate.artifact)?;
    range.select(versions.iter().map(String::as_str))
      .map(str::to_string)
      .ok_or_else(|| ResolveError::NoMatchingVersion {
        artifact: format!("{}:{}", coordinate.group, coordinate.artifact),
        range: coordinate.version.clone(),
      })
  }

  /// Union of the version listings of all repositories.
  fn available_versions(&self, group: &str, artifact: &str) -> Result<Arc<Vec<String>>, ResolveError> {
    let cache_key = (group.to_string(), artifact.to_string());
    if let Some(versions) = lock(&self.versions).get(&cache_key) {
      return Ok(versions.clone());
    }
    let directory = format!("{}/{}", group.replace('.', "/"), artifact);
    let mut versions: Vec<String> = Vec::new();
    for repository in &self.repositories {
      let bytes = if let Some(root) = repository.local_path() {
        ["maven-metadata-local.xml", "maven-metadata.xml"].iter()
          .map(|name| root.join(&directory).join(name))
          .find(|path| path.is_file())
          .map(|path| read(&path))
          .transpose()?
      } else {
        let path = format!("{}/maven-metadata.xml", directory);
        let cached = self.cache.resource_path(repository, &path);
        if cached.is_file() && (!self.options.refresh || self.options.offline) {
          Some(read(&cached)?)
        } else if self.options.offline || self.is_broken(repository) {
          None
        } else {
          let fetched = self.fetch(repository, &path)?;
          if let Some(bytes) = &fetched {
            self.cache.store(&cached, bytes, |_| Ok::<(), ResolveError>(()))
              .map_err(|source| ResolveError::Io { path: cached.clone(), source })??;
          }
          fetched
        }
      };
      let Some(bytes) = bytes else { continue; };
      let listed = parse_metadata_versions(&bytes).map_err(|message| ResolveError::InvalidPom {
        coordinate: format!("{}:{} (maven-metadata.xml)", group, artifact),
        message,
      })?;
      for version in listed {
        if !versions.contains(&version) {
          versions.push(version);
        }
      }
    }
    let versions = Arc::new(versions);
    lock(&self.versions).insert(cache_key, versions.clone());
    Ok(versions)
  }

  fn download_all(
    &self,
    selected: &LinkedHashMap<ArtifactKey, Selected>,
  ) -> Result<HashMap<ArtifactKey, (Option<PathBuf>, BTreeMap<String, PathBuf>)>, ResolveError> {
    let mut downloads = Vec::new();
    for (key, selected) in selected.iter().filter(|(_, s)| s.has_file) {
      downloads.push(Download { key: key.clone(), coordinate: selected.coordinate.clone(), classifier: None });
      for classifier in &self.options.classifiers {
        let coordinate = selected.coordinate.clone().with_classifier(classifier).with_extension("jar");
        downloads.push(Download { key: key.clone(), coordinate, classifier: Some(classifier.clone()) });
      }
    }
    if downloads.is_empty() {
      return Ok(HashMap::new());
    }

    let next = AtomicUsize::new(0);
    let failed = AtomicBool::new(false);
    let results: Mutex<Vec<Option<Result<Option<PathBuf>, ResolveError>>>> =
      Mutex::new((0..downloads.len()).map(|_| None).collect());
    let threads = self.options.download_threads.max(1).min(downloads.len());
    thread::scope(|scope| {
      for _ in 0..threads {
        scope.spawn(|| loop {
          let index = next.fetch_add(1, Ordering::SeqCst);
          if index >= downloads.len() || failed.load(Ordering::SeqCst) {
            break;
          }
          let download = &downloads[index];
          let result = self.locate(&download.coordinate, false, download.classifier.is_none());
          if result.is_err() {
            failed.store(true, Ordering::SeqCst);
          }
          lock(&results)[index] = Some(result);
        });
      }
    });

    let mut files: HashMap<ArtifactKey, (Option<PathBuf>, BTreeMap<String, PathBuf>)> = HashMap::new();
    let results = results.into_inner().unwrap_or_else(PoisonError::into_inner);
    for (download, result) in downloads.into_iter().zip(results) {
      let Some(result) = result else { continue; };
      let Some(path) = result? else { continue; };
      let entry = files.entry(download.key).or_default();
      match download.classifier {
        Some(classifier) => { entry.1.insert(classifier, path); }
        None => entry.0 = Some(path),
      }
    }
    Ok(files)
  }

  /// Finds `coordinate` in the first repository offering it: local repositories are used in place, remote files come
  /// from the cache or are downloaded and verified into it. `metadata` files are re-fetched when refreshing. Returns
  /// `Ok(None)` if no repository has the file and it is not `required`. Optional files a repository lacks are marked
  /// missing in the cache and not requested from it again until refreshing.
  fn locate(&self, coordinate: &Coordinate, metadata: bool, required: bool) -> Result<Option<PathBuf>, ResolveError> {
    let use_cache = !metadata || !self.options.refresh || self.options.offline;
    for repository in &self.repositories {
      if let Some(root) = repository.local_path() {
        let path = root.join(coordinate.path());
        if path.is_file() {
          debug!(%coordinate, repository = repository.name(), "using local repository file");
          return Ok(Some(path));
        }
      } else if use_cache {
        if let Some(path) = self.cache.get(repository, coordinate) {
          debug!(%coordinate, repository = repository.name(), "cache hit");
          return Ok(Some(path));
        }
      }
    }

    if !self.options.offline {
      for repository in self.repositories.iter().filter(|r| !r.is_local()) {
        if self.is_broken(repository) {
          continue;
        }
        let optional = !required && !metadata;
        if optional && !self.options.refresh && self.cache.is_missing(repository, coordinate) {
          debug!(%coordinate, repository = repository.name(), "known to be missing");
          continue;
        }
        if let Some(path) = self.download(repository, coordinate)? {
          if optional {
            self.cache.clear_missing(repository, coordinate).map_err(|source| ResolveError::Io { path: path.clone(), source })?;
          }
          return Ok(Some(path));
        }
        if optional && !self.is_broken(repository) {
          self.cache.mark_missing(repository, coordinate)
            .map_err(|source| ResolveError::Io { path: self.cache.path(repository, coordinate), source })?;
        }
        debug!(%coordinate, repository = repository.name(), "not found, trying next repository");
      }
    }

    if required {
      Err(ResolveError::NotFound {
        coordinate: coordinate.to_string(),
        repositories: self.repositories.iter().map(|r| r.name().to_string()).collect(),
      })
    } else {
      Ok(None)
    }
  }

  /// Downloads `coordinate` from `repository`, verifies it against the strongest published checksum, and promotes it
  /// into the cache.
  fn download(&self, repository: &Repository, coordinate: &Coordinate) -> Result<Option<PathBuf>, ResolveError> {
    let path = coordinate.path();
    info!(url = %repository.resource_url(&path), "downloading");
    let Some(bytes) = self.fetch(repository, &path)? else { return Ok(None); };
    let checksum = self.checksum(repository, &path)?;
    if self.is_broken(repository) {
      return Ok(None);
    }
    let destination = self.cache.path(repository, coordinate);
    self.cache.store(&destination, &bytes, |bytes| match &checksum {
      Some(checksum) => checksum.verify(bytes).map_err(|actual| ResolveError::ChecksumMismatch {
        file: coordinate.file_name(),
        repository: repository.name().to_string(),
        algorithm: checksum.algorithm,
        expected: checksum.expected.clone(),
        actual,
      }),
      None => {
        warn!(%coordinate, repository = repository.name(), "no checksum published; skipping verification");
        Ok(())
      }
    }).map_err(|source| ResolveError::Io { path: destination.clone(), source })??;
    Ok(Some(destination))
  }

  /// Fetches the strongest checksum published for `path`.
  fn checksum(&self, repository: &Repository, path: &str) -> Result<Option<Checksum>, ResolveError> {
    for algorithm in ChecksumAlgorithm::PREFERENCE {
      let Some(content) = self.fetch(repository, &format!("{}.{}", path, algorithm.extension()))? else { continue; };
      match Checksum::parse(algorithm, &content) {
        Some(checksum) => return Ok(Some(checksum)),
        None => warn!(path, %algorithm, repository = repository.name(), "ignoring malformed checksum file"),
      }
    }
    Ok(None)
  }

  /// Fetches through the transport. With `skip_on_error`, a failing repository is marked broken and treated as not
  /// having the resource.
  fn fetch(&self, repository: &Repository, path: &str) -> Result<Option<Vec<u8>>, ResolveError> {
    match self.transport.fetch(repository, path) {
      Ok(bytes) => Ok(bytes),
      Err(e) if self.options.skip_on_error => {
        warn!(repository = repository.name(), error = %e, "repository failed; skipping it for the rest of this resolution");
        lock(&self.broken).insert(repository.name().to_string());
        Ok(None)
      }
      Err(e) => Err(e),
    }
  }

  #[inline]
  fn is_broken(&self, repository: &Repository) -> bool {
    lock(&self.broken).contains(repository.name())
  }
}

impl PomSource for Resolver {
  fn raw_pom(&self, coordinate: &Coordinate) -> Result<Arc<Pom>, ResolveError> {
    let coordinate = coordinate.pom();
    if let Some(pom) = lock(&self.raw_poms).get(&coordinate) {
      return Ok(pom.clone());
    }
    let path = self.locate(&coordinate, true, true)?
      .ok_or_else(|| ResolveError::NotFound { coordinate: coordinate.to_string(), repositories: Vec::new() })?;
    let bytes = read(&path)?;
    let pom = Pom::parse(&bytes)
      .map_err(|message| ResolveError::InvalidPom { coordinate: coordinate.to_string(), message })?;
    let pom = Arc::new(pom);
    lock(&self.raw_poms).insert(coordinate, pom.clone());
    Ok(pom)
  }

  fn effective_pom(&self, coordinate: &Coordinate) -> Result<Arc<EffectivePom>, ResolveError> {
    let coordinate = coordinate.pom();
    if let Some(pom) = lock(&self.effective_poms).get(&coordinate) {
      return Ok(pom.clone());
    }
    {
      let mut building = lock(&self.building);
      if let Some(start) = building.iter().position(|c| c == &coordinate) {
        let mut cycle: Vec<String> = building[start..].iter().map(Coordinate::to_string).collect();
        cycle.push(coordinate.to_string());
        return Err(ResolveError::CyclicDependency(CyclicDependencyError { cycle }));
      }
      building.push(coordinate.clone());
    }
    let result = EffectivePom::build(&coordinate, self);
    lock(&self.building).retain(|c| c != &coordinate);
    let pom = Arc::new(result?);
    lock(&self.effective_poms).insert(coordinate, pom.clone());
    Ok(pom)
  }
}

#[inline]
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[inline]
fn read(path: &std::path::Path) -> Result<Vec<u8>, ResolveError> {
  fs::read(path).map_err(|source| ResolveError::Io { path: path.to_path_buf(), source })
}
