use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::ResolveError;

/// Maven artifact coordinate: `group:artifact:version`, plus an optional classifier and a file extension.
#[derive(Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Debug, Serialize, Deserialize)]
pub struct Coordinate {
  pub group: String,
  pub artifact: String,
  pub version: String,
  pub classifier: Option<String>,
  pub extension: String,
}

impl Coordinate {
  #[inline]
  pub fn new(group: impl Into<String>, artifact: impl Into<String>, version: impl Into<String>) -> Self {
    Self {
      group: group.into(),
      artifact: artifact.into(),
      version: version.into(),
      classifier: None,
      extension: "jar".to_string(),
    }
  }

  #[inline]
  pub fn with_classifier(mut self, classifier: impl Into<String>) -> Self {
    self.classifier = Some(classifier.into());
    self
  }
  #[inline]
  pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
    self.extension = extension.into();
    self
  }
  #[inline]
  pub fn with_version(&self, version: impl Into<String>) -> Self {
    let mut coordinate = self.clone();
    coordinate.version = version.into();
    coordinate
  }

  /// The coordinate of the POM describing this artifact.
  #[inline]
  pub fn pom(&self) -> Self {
    Self { classifier: None, extension: "pom".to_string(), ..self.clone() }
  }

  #[inline]
  pub fn key(&self) -> ArtifactKey {
    ArtifactKey {
      group: self.group.clone(),
      artifact: self.artifact.clone(),
      classifier: self.classifier.clone(),
      extension: self.extension.clone(),
    }
  }

  /// `<artifact>-<version>[-<classifier>].<extension>`
  pub fn file_name(&self) -> String {
    match &self.classifier {
      Some(classifier) => format!("{}-{}-{}.{}", self.artifact, self.version, classifier, self.extension),
      None => format!("{}-{}.{}", self.artifact, self.version, self.extension),
    }
  }

  /// Repository-relative directory: the group with dots replaced by slashes, then artifact, then version.
  pub fn directory(&self) -> String {
    format!("{}/{}/{}", self.group.replace('.', "/"), self.artifact, self.version)
  }

  /// Repository-relative path of the artifact file.
  #[inline]
  pub fn path(&self) -> String { format!("{}/{}", self.directory(), self.file_name()) }
}

impl Display for Coordinate {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}:{}:{}", self.group, self.artifact, self.version)?;
    if let Some(classifier) = &self.classifier {
      write!(f, ":{}", classifier)?;
    }
    if self.extension != "jar" {
      write!(f, "@{}", self.extension)?;
    }
    Ok(())
  }
}

/// Parses `group:artifact:version[:classifier][@extension]`.
impl FromStr for Coordinate {
  type Err = ResolveError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let invalid = || ResolveError::InvalidCoordinate(s.to_string());
    let (rest, extension) = match s.split_once('@') {
      Some((rest, extension)) if !extension.is_empty() => (rest, extension),
      Some(_) => return Err(invalid()),
      None => (s, "jar"),
    };
    let parts: Vec<&str> = rest.split(':').collect();
    if parts.iter().any(|p| p.trim().is_empty()) {
      return Err(invalid());
    }
    let mut coordinate = match parts.as_slice() {
      [group, artifact, version] => Coordinate::new(*group, *artifact, *version),
      [group, artifact, version, classifier] => Coordinate::new(*group, *artifact, *version)
        .with_classifier(*classifier),
      _ => return Err(invalid()),
    };
    coordinate.extension = extension.to_string();
    Ok(coordinate)
  }
}

/// Identity of an artifact independent of its version; conflict resolution selects one version per key.
#[derive(Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Debug, Serialize, Deserialize)]
pub struct ArtifactKey {
  pub group: String,
  pub artifact: String,
  pub classifier: Option<String>,
  pub extension: String,
}

impl Display for ArtifactKey {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}:{}", self.group, self.artifact)?;
    if let Some(classifier) = &self.classifier {
      write!(f, ":{}", classifier)?;
    }
    if self.extension != "jar" {
      write!(f, "@{}", self.extension)?;
    }
    Ok(())
  }
}

/// Dependency scope.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
  #[default]
  Compile,
  Provided,
  Runtime,
  Test,
  System,
  Import,
}

impl Scope {
  pub const ALL: [Scope; 6] = [Scope::Compile, Scope::Provided, Scope::Runtime, Scope::Test, Scope::System, Scope::Import];

  /// Scope that a transitive dependency declared with scope `declared` gets when reached through a dependency with
  /// this scope, or `None` when it is not propagated.
  pub fn transitive(self, declared: Scope) -> Option<Scope> {
    use Scope::*;
    match (self, declared) {
      (_, Provided | Test | System | Import) => None,
      (Compile, Compile) => Some(Compile),
      (Compile, Runtime) => Some(Runtime),
      (Provided, Compile | Runtime) => Some(Provided),
      (Runtime, Compile | Runtime) => Some(Runtime),
      (Test, Compile | Runtime) => Some(Test),
      (System | Import, _) => None,
    }
  }

  #[inline]
  pub fn as_str(&self) -> &'static str {
    match self {
      Scope::Compile => "compile",
      Scope::Provided => "provided",
      Scope::Runtime => "runtime",
      Scope::Test => "test",
      Scope::System => "system",
      Scope::Import => "import",
    }
  }
}

impl Display for Scope {
  #[inline]
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for Scope {
  type Err = ResolveError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Scope::ALL.into_iter()
      .find(|scope| scope.as_str() == s.trim())
      .ok_or_else(|| ResolveError::InvalidScope(s.to_string()))
  }
}

/// Predicate over scopes: dependencies whose (effective) scope is not allowed are dropped during resolution.
#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopeFilter {
  scopes: Vec<Scope>,
}

impl ScopeFilter {
  #[inline]
  pub fn only(scopes: impl IntoIterator<Item=Scope>) -> Self {
    let mut filter = Self { scopes: Vec::new() };
    for scope in scopes {
      if !filter.scopes.contains(&scope) {
        filter.scopes.push(scope);
      }
    }
    filter
  }
  /// Dependencies needed to compile against the requested artifacts.
  #[inline]
  pub fn compile() -> Self { Self::only([Scope::Compile]) }
  /// Dependencies needed to run the requested artifacts.
  #[inline]
  pub fn runtime() -> Self { Self::only([Scope::Compile, Scope::Runtime]) }
  #[inline]
  pub fn all() -> Self { Self::only(Scope::ALL) }

  #[inline]
  pub fn allows(&self, scope: Scope) -> bool { self.scopes.contains(&scope) }
  #[inline]
  pub fn scopes(&self) -> &[Scope] { &self.scopes }
}

impl Default for ScopeFilter {
  #[inline]
  fn default() -> Self { Self::runtime() }
}

/// `group:artifact` pattern excluding transitive dependencies; either part may be `*`.
#[derive(Clone, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
pub struct Exclusion {
  pub group: String,
  pub artifact: String,
}

impl Exclusion {
  #[inline]
  pub fn new(group: impl Into<String>, artifact: impl Into<String>) -> Self {
    Self { group: group.into(), artifact: artifact.into() }
  }

  #[inline]
  pub fn matches(&self, group: &str, artifact: &str) -> bool {
    (self.group == "*" || self.group == group) && (self.artifact == "*" || self.artifact == artifact)
  }
}

impl FromStr for Exclusion {
  type Err = ResolveError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.split_once(':') {
      Some((group, artifact)) if !group.is_empty() && !artifact.is_empty() => Ok(Self::new(group, artifact)),
      _ => Err(ResolveError::InvalidCoordinate(s.to_string())),
    }
  }
}

/// A dependency declaration: a coordinate whose version may still be a range or missing (to be filled in by
/// dependency management), a scope, optionality, and exclusions.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct Dependency {
  pub coordinate: Coordinate,
  pub scope: Option<Scope>,
  pub optional: bool,
  pub exclusions: Vec<Exclusion>,
}

impl Dependency {
  #[inline]
  pub fn new(coordinate: Coordinate) -> Self {
    Self { coordinate, scope: None, optional: false, exclusions: Vec::new() }
  }
  #[inline]
  pub fn with_scope(mut self, scope: Scope) -> Self {
    self.scope = Some(scope);
    self
  }
  #[inline]
  pub fn with_exclusion(mut self, exclusion: Exclusion) -> Self {
    self.exclusions.push(exclusion);
    self
  }

  #[inline]
  pub fn effective_scope(&self) -> Scope { self.scope.unwrap_or_default() }
}

impl From<Coordinate> for Dependency {
  #[inline]
  fn from(coordinate: Coordinate) -> Self { Self::new(coordinate) }
}

#[cfg(test)]
mod test {
  use assert_matches::assert_matches;

  use super::*;

  #[test]
  fn parse_and_display() {
    let coordinate: Coordinate = "org.slf4j:slf4j-api:2.0.9".parse().unwrap();
    assert_eq!(coordinate, Coordinate::new("org.slf4j", "slf4j-api", "2.0.9"));
    assert_eq!(coordinate.to_string(), "org.slf4j:slf4j-api:2.0.9");

    let sources: Coordinate = "org.slf4j:slf4j-api:2.0.9:sources".parse().unwrap();
    assert_eq!(sources.classifier.as_deref(), Some("sources"));
    assert_eq!(sources.file_name(), "slf4j-api-2.0.9-sources.jar");

    let pom: Coordinate = "org.slf4j:slf4j-parent:2.0.9@pom".parse().unwrap();
    assert_eq!(pom.extension, "pom");
    assert_eq!(pom.to_string(), "org.slf4j:slf4j-parent:2.0.9@pom");
  }

  #[test]
  fn parse_invalid() {
    assert_matches!("org.slf4j:slf4j-api".parse::<Coordinate>(), Err(ResolveError::InvalidCoordinate(_)));
    assert_matches!("org.slf4j::2.0".parse::<Coordinate>(), Err(ResolveError::InvalidCoordinate(_)));
    assert_matches!("a:b:c@".parse::<Coordinate>(), Err(ResolveError::InvalidCoordinate(_)));
  }

  #[test]
  fn repository_layout() {
    let coordinate = Coordinate::new("com.google.guava", "guava", "32.1.3-jre");
    assert_eq!(coordinate.directory(), "com/google/guava/guava/32.1.3-jre");
    assert_eq!(coordinate.path(), "com/google/guava/guava/32.1.3-jre/guava-32.1.3-jre.jar");
    assert_eq!(coordinate.pom().path(), "com/google/guava/guava/32.1.3-jre/guava-32.1.3-jre.pom");
  }

  #[test]
  fn transitive_scopes() {
    assert_eq!(Scope::Compile.transitive(Scope::Compile), Some(Scope::Compile));
    assert_eq!(Scope::Compile.transitive(Scope::Runtime), Some(Scope::Runtime));
    assert_eq!(Scope::Runtime.transitive(Scope::Compile), Some(Scope::Runtime));
    assert_eq!(Scope::Test.transitive(Scope::Runtime), Some(Scope::Test));
    assert_eq!(Scope::Compile.transitive(Scope::Test), None);
    assert_eq!(Scope::Compile.transitive(Scope::Provided), None);
  }

  #[test]
  fn exclusion_wildcards() {
    assert!(Exclusion::new("*", "*").matches("org.a", "b"));
    assert!(Exclusion::new("org.a", "*").matches("org.a", "b"));
    assert!(!Exclusion::new("org.a", "c").matches("org.a", "b"));
  }
}
