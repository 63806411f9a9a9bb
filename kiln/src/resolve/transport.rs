use std::fmt::Debug;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::StatusCode;
use tracing::trace;

use super::repository::{Credentials, Repository};
use super::ResolveError;

/// Fetches resources from remote repositories.
pub trait Transport: Send + Sync + Debug {
  /// Fetches `path` (relative to the repository base URL) from `repository`, returning:
  /// - `Ok(Some(bytes))` if the repository has the resource,
  /// - `Ok(None)` if the repository does not have the resource (e.g., HTTP 404),
  /// - `Err(e)` on any other failure: connection errors, timeouts, authentication failures, server errors.
  fn fetch(&self, repository: &Repository, path: &str) -> Result<Option<Vec<u8>>, ResolveError>;
}

/// [`Transport`] over HTTP(S), with per-repository credentials.
#[derive(Clone, Debug)]
pub struct HttpTransport {
  client: Client,
}

impl HttpTransport {
  pub fn new(timeout: Duration) -> Result<Self, ResolveError> {
    let client = Client::builder()
      .timeout(timeout)
      .user_agent(concat!("kiln/", env!("CARGO_PKG_VERSION")))
      .redirect(reqwest::redirect::Policy::limited(5))
      .build()
      .map_err(|e| ResolveError::Repository {
        repository: String::new(),
        message: format!("failed to create HTTP client: {}", e),
      })?;
    Ok(Self { client })
  }
}

impl Transport for HttpTransport {
  fn fetch(&self, repository: &Repository, path: &str) -> Result<Option<Vec<u8>>, ResolveError> {
    let url = repository.resource_url(path);
    let error = |message: String| ResolveError::Repository { repository: repository.name().to_string(), message };
    trace!(%url, "fetching");
    let mut request = self.client.get(&url);
    match repository.credentials()? {
      Some(Credentials::Basic { username, password }) => request = request.basic_auth(username, Some(password)),
      Some(Credentials::Bearer(token)) => request = request.bearer_auth(token),
      None => {}
    }
    let response = request.send().map_err(|e| error(format!("failed to fetch '{}': {}", url, e)))?;
    let status = response.status();
    if status == StatusCode::NOT_FOUND {
      return Ok(None);
    }
    if !status.is_success() {
      return Err(error(format!("failed to fetch '{}': HTTP {}", url, status)));
    }
    let bytes = response.bytes().map_err(|e| error(format!("failed to read '{}': {}", url, e)))?;
    Ok(Some(bytes.to_vec()))
  }
}
