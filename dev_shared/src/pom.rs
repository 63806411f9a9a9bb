use std::fmt::Write;

/// Builds POM documents for tests. Coordinates are given as `group:artifact[:version]`.
#[derive(Clone, Default, Debug)]
pub struct PomBuilder {
  coordinate: String,
  packaging: Option<String>,
  parent: Option<String>,
  properties: Vec<(String, String)>,
  dependencies: Vec<String>,
  management: Vec<String>,
}

/// A `<dependency>` element.
#[derive(Clone, Default, Debug)]
pub struct DependencyXml {
  coordinate: String,
  scope: Option<String>,
  kind: Option<String>,
  optional: bool,
  exclusions: Vec<String>,
}

impl DependencyXml {
  #[inline]
  pub fn new(coordinate: impl Into<String>) -> Self { Self { coordinate: coordinate.into(), ..Self::default() } }
  #[inline]
  pub fn scope(mut self, scope: impl Into<String>) -> Self {
    self.scope = Some(scope.into());
    self
  }
  #[inline]
  pub fn kind(mut self, kind: impl Into<String>) -> Self {
    self.kind = Some(kind.into());
    self
  }
  #[inline]
  pub fn optional(mut self) -> Self {
    self.optional = true;
    self
  }
  /// Excludes `group:artifact`, where either part may be `*`.
  #[inline]
  pub fn exclude(mut self, group_artifact: impl Into<String>) -> Self {
    self.exclusions.push(group_artifact.into());
    self
  }

  fn write(&self, xml: &mut String) {
    xml.push_str("<dependency>");
    write_coordinate(xml, &self.coordinate);
    if let Some(kind) = &self.kind {
      let _ = write!(xml, "<type>{}</type>", kind);
    }
    if let Some(scope) = &self.scope {
      let _ = write!(xml, "<scope>{}</scope>", scope);
    }
    if self.optional {
      xml.push_str("<optional>true</optional>");
    }
    if !self.exclusions.is_empty() {
      xml.push_str("<exclusions>");
      for exclusion in &self.exclusions {
        let (group, artifact) = exclusion.split_once(':').unwrap_or((exclusion, "*"));
        let _ = write!(xml, "<exclusion><groupId>{}</groupId><artifactId>{}</artifactId></exclusion>", group, artifact);
      }
      xml.push_str("</exclusions>");
    }
    xml.push_str("</dependency>");
  }
}

impl PomBuilder {
  #[inline]
  pub fn new(coordinate: impl Into<String>) -> Self { Self { coordinate: coordinate.into(), ..Self::default() } }

  #[inline]
  pub fn packaging(mut self, packaging: impl Into<String>) -> Self {
    self.packaging = Some(packaging.into());
    self
  }
  #[inline]
  pub fn parent(mut self, coordinate: impl Into<String>) -> Self {
    self.parent = Some(coordinate.into());
    self
  }
  #[inline]
  pub fn property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.properties.push((key.into(), value.into()));
    self
  }
  /// Adds a compile dependency on `coordinate`.
  #[inline]
  pub fn dependency(self, coordinate: impl Into<String>) -> Self { self.dependency_xml(DependencyXml::new(coordinate)) }
  #[inline]
  pub fn dependency_xml(mut self, dependency: DependencyXml) -> Self {
    let mut xml = String::new();
    dependency.write(&mut xml);
    self.dependencies.push(xml);
    self
  }
  /// Adds a dependency management entry for `coordinate`.
  #[inline]
  pub fn managed(self, coordinate: impl Into<String>) -> Self { self.managed_xml(DependencyXml::new(coordinate)) }
  #[inline]
  pub fn managed_xml(mut self, dependency: DependencyXml) -> Self {
    let mut xml = String::new();
    dependency.write(&mut xml);
    self.management.push(xml);
    self
  }

  pub fn build(&self) -> String {
    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<project>");
    xml.push_str("<modelVersion>4.0.0</modelVersion>");
    if let Some(parent) = &self.parent {
      xml.push_str("<parent>");
      write_coordinate(&mut xml, parent);
      xml.push_str("</parent>");
    }
    write_coordinate(&mut xml, &self.coordinate);
    if let Some(packaging) = &self.packaging {
      let _ = write!(xml, "<packaging>{}</packaging>", packaging);
    }
    if !self.properties.is_empty() {
      xml.push_str("<properties>");
      for (key, value) in &self.properties {
        let _ = write!(xml, "<{0}>{1}</{0}>", key, value);
      }
      xml.push_str("</properties>");
    }
    if !self.management.is_empty() {
      let _ = write!(xml, "<dependencyManagement><dependencies>{}</dependencies></dependencyManagement>", self.management.concat());
    }
    if !self.dependencies.is_empty() {
      let _ = write!(xml, "<dependencies>{}</dependencies>", self.dependencies.concat());
    }
    xml.push_str("</project>");
    xml
  }
}

fn write_coordinate(xml: &mut String, coordinate: &str) {
  let mut parts = coordinate.split(':');
  if let Some(group) = parts.next().filter(|p| !p.is_empty()) {
    let _ = write!(xml, "<groupId>{}</groupId>", group);
  }
  if let Some(artifact) = parts.next() {
    let _ = write!(xml, "<artifactId>{}</artifactId>", artifact);
  }
  if let Some(version) = parts.next() {
    let _ = write!(xml, "<version>{}</version>", version);
  }
}
