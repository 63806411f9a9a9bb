use std::fmt::{Debug, Formatter};
use std::path::PathBuf;
use std::sync::Arc;

use sha2::{Digest, Sha256};

use super::ResolveError;

/// Credentials presented to a remote repository.
#[derive(Clone, Eq, PartialEq)]
pub enum Credentials {
  Basic { username: String, password: String },
  Bearer(String),
}

impl Debug for Credentials {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    match self {
      Credentials::Basic { username, .. } => f.debug_struct("Basic")
        .field("username", username)
        .finish_non_exhaustive(),
      Credentials::Bearer(_) => f.write_str("Bearer(..)"),
    }
  }
}

/// Supplies credentials for a repository on demand, so that secrets are only read when a request is made.
pub trait CredentialProvider: Send + Sync + Debug {
  fn credentials(&self, repository: &str) -> Result<Credentials, ResolveError>;
}

impl CredentialProvider for Credentials {
  #[inline]
  fn credentials(&self, _repository: &str) -> Result<Credentials, ResolveError> { Ok(self.clone()) }
}

/// Reads a secret from an environment variable each time credentials are requested.
#[derive(Clone, Debug)]
pub enum EnvCredentials {
  Basic { username: String, password_var: String },
  Bearer { token_var: String },
}

impl CredentialProvider for EnvCredentials {
  fn credentials(&self, repository: &str) -> Result<Credentials, ResolveError> {
    let read = |var: &str| std::env::var(var).map_err(|_| ResolveError::Repository {
      repository: repository.to_string(),
      message: format!("credentials environment variable '{}' is not set", var),
    });
    match self {
      EnvCredentials::Basic { username, password_var } => Ok(Credentials::Basic {
        username: username.clone(),
        password: read(password_var)?,
      }),
      EnvCredentials::Bearer { token_var } => Ok(Credentials::Bearer(read(token_var)?)),
    }
  }
}

/// A Maven repository: remote (HTTP) or local (a directory laid out like a repository, used in place).
#[derive(Clone, Debug)]
pub struct Repository {
  name: String,
  url: String,
  local: bool,
  credentials: Option<Arc<dyn CredentialProvider>>,
}

impl Repository {
  /// Creates a remote repository. Trailing slashes of `url` are removed.
  #[inline]
  pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
    let url = url.into().trim_end_matches('/').to_string();
    let local = url.starts_with("file://");
    Self { name: name.into(), url, local, credentials: None }
  }

  /// Creates a local repository rooted at `path`.
  #[inline]
  pub fn local(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
    let path = path.into();
    Self { name: name.into(), url: format!("file://{}", path.display()), local: true, credentials: None }
  }

  /// The public Maven Central repository.
  #[inline]
  pub fn maven_central() -> Self { Self::new("central", "https://repo.maven.apache.org/maven2") }

  #[inline]
  pub fn with_credentials(mut self, credentials: impl CredentialProvider + 'static) -> Self {
    self.credentials = Some(Arc::new(credentials));
    self
  }

  #[inline]
  pub fn name(&self) -> &str { &self.name }
  #[inline]
  pub fn url(&self) -> &str { &self.url }
  #[inline]
  pub fn is_local(&self) -> bool { self.local }

  /// Directory of a local repository.
  #[inline]
  pub fn local_path(&self) -> Option<PathBuf> {
    if !self.local { return None; }
    self.url.strip_prefix("file://").map(PathBuf::from)
  }

  /// Resolves credentials, if this repository has any.
  #[inline]
  pub fn credentials(&self) -> Result<Option<Credentials>, ResolveError> {
    self.credentials.as_ref().map(|c| c.credentials(&self.name)).transpose()
  }

  /// URL of `path` inside this repository.
  #[inline]
  pub fn resource_url(&self, path: &str) -> String { format!("{}/{}", self.url, path.trim_start_matches('/')) }

  /// Stable identifier used to separate cached files per repository: the first 16 hex digits of the SHA-256 of the
  /// repository URL.
  pub fn id_hash(&self) -> String {
    let digest = hex::encode(Sha256::digest(self.url.as_bytes()));
    digest[..16].to_string()
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn normalizes_url() {
    let repository = Repository::new("central", "https://repo.example.com/maven2/");
    assert_eq!(repository.url(), "https://repo.example.com/maven2");
    assert_eq!(repository.resource_url("/a/b/c.pom"), "https://repo.example.com/maven2/a/b/c.pom");
    assert!(!repository.is_local());
    assert_eq!(repository.local_path(), None);
  }

  #[test]
  fn id_hash_is_stable_and_short() {
    let a = Repository::new("a", "https://repo.example.com/maven2");
    let b = Repository::new("b", "https://repo.example.com/maven2/");
    let c = Repository::new("c", "https://other.example.com/maven2");
    assert_eq!(a.id_hash().len(), 16);
    assert_eq!(a.id_hash(), b.id_hash());
    assert_ne!(a.id_hash(), c.id_hash());
  }

  #[test]
  fn local_repository() {
    let repository = Repository::local("local", "/tmp/repo");
    assert!(repository.is_local());
    assert_eq!(repository.local_path(), Some(PathBuf::from("/tmp/repo")));
  }

  #[test]
  fn credentials_debug_hides_secrets() {
    let credentials = Credentials::Basic { username: "deploy".into(), password: "hunter2".into() };
    let debug = format!("{:?}", credentials);
    assert!(debug.contains("deploy"));
    assert!(!debug.contains("hunter2"));
    let repository = Repository::new("private", "https://repo.example.com").with_credentials(credentials.clone());
    assert_eq!(repository.credentials().unwrap(), Some(credentials));
  }
}
