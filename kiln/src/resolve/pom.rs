use std::sync::Arc;

use hashlink::LinkedHashMap;
use roxmltree::{Document, Node};

use super::coordinate::{ArtifactKey, Coordinate, Dependency, Exclusion, Scope};
use super::ResolveError;

/// Placeholder substitution stops after this many passes; anything still unresolved is cyclic.
const MAX_INTERPOLATION_PASSES: usize = 32;
/// Deepest parent chain followed before giving up.
const MAX_PARENT_DEPTH: usize = 64;

/// A project descriptor as written, before inheritance and interpolation.
#[derive(Clone, Default, Debug)]
pub struct Pom {
  pub group: Option<String>,
  pub artifact: Option<String>,
  pub version: Option<String>,
  pub packaging: Option<String>,
  pub parent: Option<ParentRef>,
  pub properties: Vec<(String, String)>,
  pub dependencies: Vec<RawDependency>,
  pub management: Vec<RawDependency>,
}

#[derive(Clone, Eq, PartialEq, Debug)]
pub struct ParentRef {
  pub group: String,
  pub artifact: String,
  pub version: String,
}

impl ParentRef {
  #[inline]
  pub fn coordinate(&self) -> Coordinate {
    Coordinate::new(&self.group, &self.artifact, &self.version).pom()
  }
}

/// A `<dependency>` element as written.
#[derive(Clone, Default, Eq, PartialEq, Debug)]
pub struct RawDependency {
  pub group: String,
  pub artifact: String,
  pub version: Option<String>,
  pub kind: Option<String>,
  pub classifier: Option<String>,
  pub scope: Option<String>,
  pub optional: Option<String>,
  pub exclusions: Vec<(String, String)>,
}

impl Pom {
  /// Parses POM XML. Returns a message describing the problem on failure.
  pub fn parse(bytes: &[u8]) -> Result<Self, String> {
    let text = std::str::from_utf8(bytes).map_err(|e| format!("not valid UTF-8: {}", e))?;
    let text = text.trim_start_matches('\u{feff}');
    let document = Document::parse(text).map_err(|e| e.to_string())?;
    let project = document.root_element();
    if project.tag_name().name() != "project" {
      return Err(format!("expected root element 'project', found '{}'", project.tag_name().name()));
    }

    let mut pom = Pom {
      group: child_text(project, "groupId"),
      artifact: child_text(project, "artifactId"),
      version: child_text(project, "version"),
      packaging: child_text(project, "packaging"),
      ..Pom::default()
    };
    if let Some(parent) = child(project, "parent") {
      let field = |name: &str| child_text(parent, name).ok_or_else(|| format!("parent is missing '{}'", name));
      pom.parent = Some(ParentRef { group: field("groupId")?, artifact: field("artifactId")?, version: field("version")? });
    }
    if let Some(properties) = child(project, "properties") {
      for property in properties.children().filter(Node::is_element) {
        let value = property.text().unwrap_or_default().trim().to_string();
        pom.properties.push((property.tag_name().name().to_string(), value));
      }
    }
    if let Some(dependencies) = child(project, "dependencies") {
      pom.dependencies = parse_dependencies(dependencies)?;
    }
    if let Some(dependencies) = child(project, "dependencyManagement").and_then(|m| child(m, "dependencies")) {
      pom.management = parse_dependencies(dependencies)?;
    }
    Ok(pom)
  }
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
  node.children().find(|n| n.is_element() && n.tag_name().name() == name)
}

fn child_text(node: Node, name: &str) -> Option<String> {
  child(node, name)
    .and_then(|n| n.text())
    .map(|t| t.trim().to_string())
    .filter(|t| !t.is_empty())
}

fn parse_dependencies(node: Node) -> Result<Vec<RawDependency>, String> {
  let mut dependencies = Vec::new();
  for dependency in node.children().filter(|n| n.is_element() && n.tag_name().name() == "dependency") {
    let group = child_text(dependency, "groupId").ok_or("dependency is missing 'groupId'")?;
    let artifact = child_text(dependency, "artifactId").ok_or("dependency is missing 'artifactId'")?;
    let mut exclusions = Vec::new();
    if let Some(node) = child(dependency, "exclusions") {
      for exclusion in node.children().filter(|n| n.is_element() && n.tag_name().name() == "exclusion") {
        let group = child_text(exclusion, "groupId").unwrap_or_else(|| "*".to_string());
        let artifact = child_text(exclusion, "artifactId").unwrap_or_else(|| "*".to_string());
        exclusions.push((group, artifact));
      }
    }
    dependencies.push(RawDependency {
      group,
      artifact,
      version: child_text(dependency, "version"),
      kind: child_text(dependency, "type"),
      classifier: child_text(dependency, "classifier"),
      scope: child_text(dependency, "scope"),
      optional: child_text(dependency, "optional"),
      exclusions,
    });
  }
  Ok(dependencies)
}

/// Parses the version listing of a `maven-metadata.xml` file.
pub fn parse_metadata_versions(bytes: &[u8]) -> Result<Vec<String>, String> {
  let text = std::str::from_utf8(bytes).map_err(|e| format!("not valid UTF-8: {}", e))?;
  let document = Document::parse(text.trim_start_matches('\u{feff}')).map_err(|e| e.to_string())?;
  let versions = child(document.root_element(), "versioning")
    .and_then(|v| child(v, "versions"))
    .map(|versions| versions.children()
      .filter(|n| n.is_element() && n.tag_name().name() == "version")
      .filter_map(|n| n.text())
      .map(|t| t.trim().to_string())
      .filter(|t| !t.is_empty())
      .collect())
    .unwrap_or_default();
  Ok(versions)
}

/// Property mapping used for `${...}` substitution.
#[derive(Clone, Default, Debug)]
pub struct Properties {
  values: LinkedHashMap<String, String>,
}

impl Properties {
  #[inline]
  pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
    self.values.replace(key.into(), value.into());
  }
  #[inline]
  pub fn get(&self, key: &str) -> Option<&str> { self.values.get(key).map(String::as_str) }

  /// Substitutes placeholders until a fixed point is reached. Returns `Err(property)` naming a property that is
  /// undefined, or that still remains after [`MAX_INTERPOLATION_PASSES`] (a cyclic definition).
  pub fn interpolate(&self, value: &str) -> Result<String, String> {
    let mut current = value.to_string();
    for _ in 0..MAX_INTERPOLATION_PASSES {
      let mut result = String::with_capacity(current.len());
      let mut rest = current.as_str();
      let mut replaced = false;
      while let Some(start) = rest.find("${") {
        let Some(length) = rest[start + 2..].find('}') else { break; };
        let key = &rest[start + 2..start + 2 + length];
        let value = self.get(key).ok_or_else(|| key.to_string())?;
        result.push_str(&rest[..start]);
        result.push_str(value);
        rest = &rest[start + 3 + length..];
        replaced = true;
      }
      result.push_str(rest);
      if !replaced {
        return Ok(result);
      }
      current = result;
    }
    let start = current.find("${").map(|i| i + 2).unwrap_or(0);
    let end = current[start..].find('}').map(|i| start + i).unwrap_or(current.len());
    Err(current[start..end].to_string())
  }
}

/// Source of POMs for building effective models; implemented by the resolver on top of repositories and the cache.
pub trait PomSource {
  fn raw_pom(&self, coordinate: &Coordinate) -> Result<Arc<Pom>, ResolveError>;
  fn effective_pom(&self, coordinate: &Coordinate) -> Result<Arc<EffectivePom>, ResolveError>;
}

/// A POM after parent inheritance, property interpolation, BOM imports, and application of its own dependency
/// management.
#[derive(Clone, Debug)]
pub struct EffectivePom {
  pub coordinate: Coordinate,
  pub packaging: String,
  /// Declared dependencies. An empty version means neither the declaration nor dependency management pinned one.
  pub dependencies: Vec<Dependency>,
  pub management: Vec<Dependency>,
}

impl EffectivePom {
  pub fn build(coordinate: &Coordinate, source: &impl PomSource) -> Result<Self, ResolveError> {
    let coordinate = coordinate.pom();
    let invalid = |message: String| ResolveError::InvalidPom { coordinate: coordinate.to_string(), message };

    // Child first, then its ancestors.
    let mut chain = vec![source.raw_pom(&coordinate)?];
    let mut visited = vec![coordinate.clone()];
    while let Some(parent) = chain.last().and_then(|p| p.parent.clone()) {
      let parent = parent.coordinate();
      if visited.contains(&parent) {
        let mut cycle: Vec<String> = visited.iter().map(Coordinate::to_string).collect();
        cycle.push(parent.to_string());
        return Err(ResolveError::CyclicDependency(crate::CyclicDependencyError { cycle }));
      }
      if visited.len() > MAX_PARENT_DEPTH {
        return Err(invalid("parent chain is too deep".to_string()));
      }
      chain.push(source.raw_pom(&parent)?);
      visited.push(parent);
    }

    let child = &chain[0];
    let mut properties = Properties::default();
    for pom in chain.iter().rev() {
      for (key, value) in &pom.properties {
        properties.insert(key.clone(), value.clone());
      }
    }
    let group = child.group.clone().or_else(|| child.parent.as_ref().map(|p| p.group.clone()))
      .ok_or_else(|| invalid("missing 'groupId'".to_string()))?;
    let artifact = child.artifact.clone().ok_or_else(|| invalid("missing 'artifactId'".to_string()))?;
    let version = child.version.clone().or_else(|| child.parent.as_ref().map(|p| p.version.clone()))
      .ok_or_else(|| invalid("missing 'version'".to_string()))?;
    let packaging = child.packaging.clone().unwrap_or_else(|| "jar".to_string());
    for prefix in ["project", "pom"] {
      properties.insert(format!("{}.groupId", prefix), &group);
      properties.insert(format!("{}.artifactId", prefix), &artifact);
      properties.insert(format!("{}.version", prefix), &version);
      properties.insert(format!("{}.packaging", prefix), &packaging);
      if let Some(parent) = &child.parent {
        properties.insert(format!("{}.parent.groupId", prefix), &parent.group);
        properties.insert(format!("{}.parent.artifactId", prefix), &parent.artifact);
        properties.insert(format!("{}.parent.version", prefix), &parent.version);
      }
    }
    let interpolator = Interpolator { properties: &properties, pom: &coordinate };
    let version = interpolator.apply(&version)?;

    // Explicit management: ancestors first so that descendants override.
    let mut management: LinkedHashMap<ArtifactKey, Dependency> = LinkedHashMap::new();
    let mut imports = Vec::new();
    for pom in chain.iter().rev() {
      for raw in &pom.management {
        let dependency = interpolator.dependency(raw)?;
        if dependency.scope == Some(Scope::Import) && dependency.coordinate.extension == "pom" {
          imports.push(dependency.coordinate);
        } else {
          management.replace(dependency.coordinate.key(), dependency);
        }
      }
    }
    // Imported BOMs never override explicit entries; earlier imports take precedence over later ones.
    for bom in imports {
      let bom = source.effective_pom(&bom)?;
      for dependency in &bom.management {
        let key = dependency.coordinate.key();
        if !management.contains_key(&key) {
          management.insert(key, dependency.clone());
        }
      }
    }

    let mut dependencies: LinkedHashMap<ArtifactKey, Dependency> = LinkedHashMap::new();
    for pom in chain.iter().rev() {
      for raw in &pom.dependencies {
        let mut dependency = interpolator.dependency(raw)?;
        if let Some(managed) = management.get(&dependency.coordinate.key()) {
          apply_management(&mut dependency, managed, false);
        }
        dependencies.replace(dependency.coordinate.key(), dependency);
      }
    }

    Ok(Self {
      coordinate: coordinate.with_version(version),
      packaging,
      dependencies: dependencies.into_iter().map(|(_, d)| d).collect(),
      management: management.into_iter().map(|(_, d)| d).collect(),
    })
  }

  /// Finds the management entry for `key`.
  #[inline]
  pub fn managed(&self, key: &ArtifactKey) -> Option<&Dependency> {
    self.management.iter().find(|d| &d.coordinate.key() == key)
  }

  /// Whether this POM describes an artifact with a primary file (anything but `pom` packaging).
  #[inline]
  pub fn has_artifact_file(&self) -> bool { self.packaging != "pom" }
}

/// Applies a dependency management entry. Without `force`, only fills in what the declaration leaves open; with
/// `force` the managed version and scope win.
pub fn apply_management(dependency: &mut Dependency, managed: &Dependency, force: bool) {
  if !managed.coordinate.version.is_empty() && (force || dependency.coordinate.version.is_empty()) {
    dependency.coordinate.version = managed.coordinate.version.clone();
  }
  if managed.scope.is_some() && (force || dependency.scope.is_none()) {
    dependency.scope = managed.scope;
  }
  for exclusion in &managed.exclusions {
    if !dependency.exclusions.contains(exclusion) {
      dependency.exclusions.push(exclusion.clone());
    }
  }
}

/// Maps a dependency `<type>` to its file extension and implied classifier.
pub fn type_mapping(kind: &str) -> (&str, Option<&'static str>) {
  match kind {
    "test-jar" => ("jar", Some("tests")),
    "bundle" | "maven-plugin" | "ejb" | "java-source" => ("jar", None),
    other => (other, None),
  }
}

struct Interpolator<'a> {
  properties: &'a Properties,
  pom: &'a Coordinate,
}

impl Interpolator<'_> {
  fn apply(&self, value: &str) -> Result<String, ResolveError> {
    self.properties.interpolate(value).map_err(|property| ResolveError::UnresolvedProperty {
      property,
      pom: self.pom.to_string(),
    })
  }

  fn dependency(&self, raw: &RawDependency) -> Result<Dependency, ResolveError> {
    let group = self.apply(&raw.group)?;
    let artifact = self.apply(&raw.artifact)?;
    let version = raw.version.as_deref().map(|v| self.apply(v)).transpose()?.unwrap_or_default();
    let kind = raw.kind.as_deref().map(|k| self.apply(k)).transpose()?.unwrap_or_else(|| "jar".to_string());
    let (extension, implied_classifier) = type_mapping(&kind);
    let classifier = match raw.classifier.as_deref() {
      Some(classifier) => Some(self.apply(classifier)?),
      None => implied_classifier.map(str::to_string),
    };
    let scope = raw.scope.as_deref().map(|s| self.apply(s)?.parse::<Scope>()).transpose()?;
    let optional = match raw.optional.as_deref() {
      Some(optional) => self.apply(optional)? == "true",
      None => false,
    };
    let mut coordinate = Coordinate::new(group, artifact, version).with_extension(extension);
    coordinate.classifier = classifier;
    let exclusions = raw.exclusions.iter()
      .map(|(g, a)| Ok(Exclusion::new(self.apply(g)?, self.apply(a)?)))
      .collect::<Result<Vec<_>, ResolveError>>()?;
    Ok(Dependency { coordinate, scope, optional, exclusions })
  }
}
