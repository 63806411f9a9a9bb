use std::sync::Arc;

use tracing::info;

use crate::error::TaskError;
use crate::resolve::{
  ArtifactCache, Coordinate, Dependency, Repository, ResolveRequest, Resolver, ResolverOptions, ScopeFilter,
};
use crate::task::{RunContext, TaskOutput, Work};

/// Resolves Maven-style dependencies into a [`ResolvedSet`](crate::resolve::ResolvedSet). Always outdated; the
/// artifact cache makes repeated resolutions cheap.
#[derive(Clone, Default, Debug)]
pub struct ResolveTask {
  pub dependencies: Vec<Dependency>,
  /// Version and scope constraints that override everything reached transitively.
  pub management: Vec<Dependency>,
  pub repositories: Vec<Repository>,
  pub scope_filter: ScopeFilter,
  /// Auxiliary classifiers to fetch next to every artifact, such as `sources`.
  pub classifiers: Vec<String>,
  pub skip_on_error: bool,
}

impl ResolveTask {
  #[inline]
  pub fn new(repositories: impl IntoIterator<Item=Repository>) -> Self {
    Self { repositories: repositories.into_iter().collect(), ..Self::default() }
  }
  #[inline]
  pub fn dependency(mut self, dependency: impl Into<Dependency>) -> Self {
    self.dependencies.push(dependency.into());
    self
  }
  #[inline]
  pub fn managed(mut self, dependency: impl Into<Dependency>) -> Self {
    self.management.push(dependency.into());
    self
  }
  #[inline]
  pub fn scope_filter(mut self, scope_filter: ScopeFilter) -> Self {
    self.scope_filter = scope_filter;
    self
  }
  #[inline]
  pub fn classifier(mut self, classifier: impl Into<String>) -> Self {
    self.classifiers.push(classifier.into());
    self
  }
  #[inline]
  pub fn skip_on_error(mut self, skip_on_error: bool) -> Self {
    self.skip_on_error = skip_on_error;
    self
  }

  #[inline]
  pub fn coordinates(&self) -> impl Iterator<Item=&Coordinate> + '_ {
    self.dependencies.iter().map(|d| &d.coordinate)
  }
}

impl Work for ResolveTask {
  #[inline]
  fn kind(&self) -> &'static str { "resolve" }

  fn run(&self, context: &mut RunContext) -> Result<TaskOutput, TaskError> {
    let env = context.env();
    let options = ResolverOptions {
      refresh: env.refresh_dependencies,
      offline: env.offline,
      skip_on_error: self.skip_on_error,
      download_threads: env.download_threads,
      classifiers: self.classifiers.clone(),
    };
    let resolver = Resolver::new(
      self.repositories.iter().cloned(),
      ArtifactCache::new(&env.cache_dir),
      env.transport.clone(),
      options,
    );
    let request = ResolveRequest {
      dependencies: self.dependencies.clone(),
      management: self.management.clone(),
      scope_filter: self.scope_filter.clone(),
    };
    let resolved = resolver.resolve_request(&request)?;
    info!(task = context.task_name(), artifacts = resolved.len(), "resolved");
    Ok(TaskOutput::Resolved(Arc::new(resolved)))
  }
}
