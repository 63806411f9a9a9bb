//! Declarative build descriptions in TOML.
//!
//! ```toml
//! [[repository]]
//! name = "central"
//! url = "https://repo.maven.apache.org/maven2"
//!
//! [[task]]
//! name = "dependencies"
//! type = "resolve"
//! dependencies = ["org.slf4j:slf4j-api:2.0.9", { coordinate = "junit:junit:4.13.2", scope = "test" }]
//! scopes = ["compile", "runtime", "test"]
//!
//! [[task]]
//! name = "compile"
//! type = "exec"
//! depends_on = ["dependencies"]
//! program = "javac"
//! args = ["-cp", "${classpath}", "-d", "build/classes", "src/Main.java"]
//! inputs = ["src"]
//! outputs = ["build/classes"]
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::BuildScriptError;
use crate::graph::TaskGraph;
use crate::resolve::{
  Coordinate, Credentials, Dependency, EnvCredentials, Exclusion, Repository, Scope, ScopeFilter,
};
use crate::script::{BuildScript, ScriptLoader};
use crate::task::{CopyTask, ExecTask, GroupTask, ResolveTask, Task, TaskKind};

/// Loads TOML build descriptions.
#[derive(Copy, Clone, Default, Debug)]
pub struct ManifestLoader;

impl ScriptLoader for ManifestLoader {
  type Script = ManifestScript;

  fn load(&self, build_file: &Path) -> Result<Self::Script, BuildScriptError> {
    let text = fs::read_to_string(build_file)
      .map_err(|source| BuildScriptError::Read { path: build_file.to_path_buf(), source })?;
    let manifest = toml::from_str(&text)
      .map_err(|e| BuildScriptError::Parse { path: build_file.to_path_buf(), message: e.to_string() })?;
    let base = build_file.parent().map(Path::to_path_buf).unwrap_or_default();
    Ok(ManifestScript { base, manifest, registered: 0 })
  }
}

/// A parsed build description.
#[derive(Debug)]
pub struct ManifestScript {
  base: PathBuf,
  manifest: Manifest,
  registered: usize,
}

impl ManifestScript {
  /// Parses a build description from `text`. Local repository paths are resolved against `base`.
  pub fn parse(text: &str, base: impl Into<PathBuf>) -> Result<Self, BuildScriptError> {
    let manifest = toml::from_str(text)
      .map_err(|e: toml::de::Error| BuildScriptError::Parse { path: PathBuf::new(), message: e.to_string() })?;
    Ok(Self { base: base.into(), manifest, registered: 0 })
  }

  fn repositories(&self) -> Vec<Repository> {
    self.manifest.repositories.iter().map(|entry| entry.to_repository(&self.base)).collect()
  }
}

impl BuildScript for ManifestScript {
  fn init(&mut self, graph: &mut TaskGraph) -> Result<(), BuildScriptError> {
    let repositories = self.repositories();
    let by_name: HashMap<&str, &Repository> = repositories.iter().map(|r| (r.name(), r)).collect();
    for entry in &self.manifest.tasks {
      let kind = match &entry.kind {
        TaskEntryKind::Group => TaskKind::Group(GroupTask),
        TaskEntryKind::Exec(task) => TaskKind::Exec(task.clone()),
        TaskEntryKind::Copy(task) => TaskKind::Copy(task.clone()),
        TaskEntryKind::Resolve(resolve) => TaskKind::Resolve(resolve.to_task(&entry.name, &repositories, &by_name)?),
      };
      let mut task = Task::new(entry.name.clone(), kind).depends_on(entry.depends_on.iter().cloned());
      if let Some(group) = &entry.group {
        task = task.with_group(group.clone());
      }
      graph.register(task)?;
      self.registered += 1;
    }
    Ok(())
  }

  fn finish(&mut self, _graph: &TaskGraph) -> Result<(), BuildScriptError> {
    if self.registered == 0 {
      return Err(BuildScriptError::Script("build description declares no tasks".to_string()));
    }
    Ok(())
  }
}

#[derive(Default, Debug, Deserialize)]
struct Manifest {
  #[serde(default, rename = "repository")]
  repositories: Vec<RepositoryEntry>,
  #[serde(default, rename = "task")]
  tasks: Vec<TaskEntry>,
}

#[derive(Debug, Deserialize)]
struct RepositoryEntry {
  name: String,
  /// URL of a remote repository, or path of a local one.
  url: String,
  #[serde(default)]
  local: bool,
  username: Option<String>,
  password: Option<String>,
  password_env: Option<String>,
  token: Option<String>,
  token_env: Option<String>,
}

impl RepositoryEntry {
  fn to_repository(&self, base: &Path) -> Repository {
    let repository = if self.local {
      Repository::local(self.name.clone(), base.join(&self.url))
    } else {
      Repository::new(self.name.clone(), self.url.clone())
    };
    match (&self.username, &self.password, &self.password_env, &self.token, &self.token_env) {
      (_, _, _, Some(token), _) => repository.with_credentials(Credentials::Bearer(token.clone())),
      (_, _, _, _, Some(token_var)) => repository.with_credentials(EnvCredentials::Bearer { token_var: token_var.clone() }),
      (Some(username), Some(password), _, _, _) => repository.with_credentials(Credentials::Basic {
        username: username.clone(),
        password: password.clone(),
      }),
      (Some(username), _, Some(password_var), _, _) => repository.with_credentials(EnvCredentials::Basic {
        username: username.clone(),
        password_var: password_var.clone(),
      }),
      _ => repository,
    }
  }
}

#[derive(Debug, Deserialize)]
struct TaskEntry {
  name: String,
  group: Option<String>,
  #[serde(default)]
  depends_on: Vec<String>,
  #[serde(flatten)]
  kind: TaskEntryKind,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum TaskEntryKind {
  Group,
  Exec(ExecTask),
  Copy(CopyTask),
  Resolve(ResolveEntry),
}

#[derive(Debug, Deserialize)]
struct ResolveEntry {
  dependencies: Vec<DependencyEntry>,
  /// Version and scope constraints for anything reached transitively.
  #[serde(default)]
  managed: Vec<DependencyEntry>,
  /// Names of the repositories to use; all declared repositories by default.
  repositories: Option<Vec<String>>,
  scopes: Option<Vec<Scope>>,
  #[serde(default)]
  classifiers: Vec<String>,
  #[serde(default)]
  skip_on_error: bool,
}

impl ResolveEntry {
  fn to_task(
    &self,
    task: &str,
    repositories: &[Repository],
    by_name: &HashMap<&str, &Repository>,
  ) -> Result<ResolveTask, BuildScriptError> {
    let repositories = match &self.repositories {
      Some(names) => names.iter()
        .map(|name| by_name.get(name.as_str()).map(|r| (*r).clone()).ok_or_else(|| {
          BuildScriptError::Script(format!("task '{}' uses undeclared repository '{}'", task, name))
        }))
        .collect::<Result<Vec<_>, _>>()?,
      None if repositories.is_empty() => vec![Repository::maven_central()],
      None => repositories.to_vec(),
    };
    let mut resolve = ResolveTask::new(repositories).skip_on_error(self.skip_on_error);
    if let Some(scopes) = &self.scopes {
      resolve = resolve.scope_filter(ScopeFilter::only(scopes.iter().copied()));
    }
    for dependency in &self.dependencies {
      resolve = resolve.dependency(dependency.to_dependency(task)?);
    }
    for dependency in &self.managed {
      resolve = resolve.managed(dependency.to_dependency(task)?);
    }
    for classifier in &self.classifiers {
      resolve = resolve.classifier(classifier.clone());
    }
    Ok(resolve)
  }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DependencyEntry {
  Short(String),
  Full {
    coordinate: String,
    scope: Option<Scope>,
    #[serde(default)]
    optional: bool,
    #[serde(default)]
    exclusions: Vec<String>,
  },
}

impl DependencyEntry {
  fn to_dependency(&self, task: &str) -> Result<Dependency, BuildScriptError> {
    let invalid = |e: crate::resolve::ResolveError| BuildScriptError::Script(format!("task '{}': {}", task, e));
    match self {
      DependencyEntry::Short(coordinate) => {
        Ok(Dependency::new(coordinate.parse::<Coordinate>().map_err(invalid)?))
      }
      DependencyEntry::Full { coordinate, scope, optional, exclusions } => {
        let mut dependency = Dependency::new(coordinate.parse::<Coordinate>().map_err(invalid)?);
        dependency.scope = *scope;
        dependency.optional = *optional;
        for exclusion in exclusions {
          dependency = dependency.with_exclusion(exclusion.parse::<Exclusion>().map_err(invalid)?);
        }
        Ok(dependency)
      }
    }
  }
}
