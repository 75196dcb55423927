//! Request/response model and the network seam.
//!
//! Requests and responses are explicit owned values: headers are a sorted
//! map, bodies are byte buffers. Owning the body is what lets the cache
//! store a copy while the caller keeps a usable one.

use color_eyre::{eyre::eyre, Result};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Header map with deterministic iteration order.
pub type Headers = BTreeMap<String, String>;

/// HTTP methods the gateway handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
  Get,
  Head,
  Post,
  Put,
  Patch,
  Delete,
}

impl Method {
  /// Read methods never carry a body mutation and are safe to serve from cache.
  pub fn is_read(&self) -> bool {
    matches!(self, Method::Get | Method::Head)
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Method::Get => "GET",
      Method::Head => "HEAD",
      Method::Post => "POST",
      Method::Put => "PUT",
      Method::Patch => "PATCH",
      Method::Delete => "DELETE",
    }
  }
}

impl FromStr for Method {
  type Err = color_eyre::Report;

  fn from_str(s: &str) -> Result<Self> {
    match s.to_ascii_uppercase().as_str() {
      "GET" => Ok(Method::Get),
      "HEAD" => Ok(Method::Head),
      "POST" => Ok(Method::Post),
      "PUT" => Ok(Method::Put),
      "PATCH" => Ok(Method::Patch),
      "DELETE" => Ok(Method::Delete),
      other => Err(eyre!("Unknown HTTP method: {}", other)),
    }
  }
}

impl fmt::Display for Method {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// An outbound request as seen by the interception layer.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  /// Absolute URL, query string included.
  pub url: String,
  pub headers: Headers,
  pub body: Vec<u8>,
}

impl Request {
  pub fn get(url: impl Into<String>) -> Self {
    Self {
      method: Method::Get,
      url: url.into(),
      headers: Headers::new(),
      body: Vec::new(),
    }
  }

  pub fn new(method: Method, url: impl Into<String>, headers: Headers, body: Vec<u8>) -> Self {
    Self {
      method,
      url: url.into(),
      headers,
      body,
    }
  }

  /// Path component of the URL, used for strategy classification.
  pub fn path(&self) -> Result<String> {
    let url = Url::parse(&self.url).map_err(|e| eyre!("Invalid request URL {}: {}", self.url, e))?;
    Ok(url.path().to_string())
  }

  /// Normalized request identity: sha256 over method + canonical URL.
  ///
  /// The query string participates in the identity, the fragment does not.
  /// Two requests with the same identity are interchangeable for caching.
  pub fn cache_identity(&self) -> Result<String> {
    let mut url = Url::parse(&self.url).map_err(|e| eyre!("Invalid request URL {}: {}", self.url, e))?;
    url.set_fragment(None);

    let mut hasher = Sha256::new();
    hasher.update(self.method.as_str().as_bytes());
    hasher.update(b" ");
    hasher.update(url.as_str().as_bytes());
    Ok(hex::encode(hasher.finalize()))
  }

  /// A navigation is a GET whose Accept header asks for an HTML document.
  pub fn is_navigation(&self) -> bool {
    self.method == Method::Get
      && self
        .headers
        .get("accept")
        .or_else(|| self.headers.get("Accept"))
        .is_some_and(|v| v.contains("text/html"))
  }
}

/// A response flowing back through the interception layer.
///
/// The body is an owned buffer read once from the wire; cloning the
/// response duplicates it so both the caller and the cache get a copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub headers: Headers,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, headers: Headers, body: Vec<u8>) -> Self {
    Self {
      status,
      headers,
      body,
    }
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }
}

/// Seam between the gateway and the actual network.
///
/// `Err` means the network was unreachable (the request never produced a
/// response); an HTTP error status comes back as `Ok` with that status.
pub trait Network: Send + Sync {
  fn fetch(&self, request: &Request) -> impl Future<Output = Result<Response>> + Send;
}

/// reqwest-backed network implementation.
#[derive(Clone)]
pub struct HttpClient {
  client: reqwest::Client,
}

impl HttpClient {
  pub fn new(timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

impl Network for HttpClient {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
      .map_err(|e| eyre!("Invalid method: {}", e))?;

    let mut builder = self.client.request(method, &request.url);
    for (name, value) in &request.headers {
      builder = builder.header(name, value);
    }
    if !request.body.is_empty() {
      builder = builder.body(request.body.clone());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("Network unreachable for {} {}: {}", request.method, request.url, e))?;

    let status = response.status().as_u16();
    let mut headers = Headers::new();
    for (name, value) in response.headers() {
      if let Ok(v) = value.to_str() {
        headers.insert(name.as_str().to_string(), v.to_string());
      }
    }

    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read response body from {}: {}", request.url, e))?
      .to_vec();

    Ok(Response::new(status, headers, body))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn identity_includes_query() {
    let a = Request::get("https://api.example.com/api/v1/projects?page=1");
    let b = Request::get("https://api.example.com/api/v1/projects?page=2");
    assert_ne!(a.cache_identity().unwrap(), b.cache_identity().unwrap());
  }

  #[test]
  fn identity_ignores_fragment() {
    let a = Request::get("https://app.example.com/docs#intro");
    let b = Request::get("https://app.example.com/docs#usage");
    assert_eq!(a.cache_identity().unwrap(), b.cache_identity().unwrap());
  }

  #[test]
  fn identity_distinguishes_methods() {
    let get = Request::get("https://api.example.com/api/v1/projects");
    let mut post = get.clone();
    post.method = Method::Post;
    assert_ne!(get.cache_identity().unwrap(), post.cache_identity().unwrap());
  }

  #[test]
  fn navigation_requires_html_accept() {
    let mut req = Request::get("https://app.example.com/");
    assert!(!req.is_navigation());

    req
      .headers
      .insert("accept".to_string(), "text/html,application/xhtml+xml".to_string());
    assert!(req.is_navigation());

    req.method = Method::Post;
    assert!(!req.is_navigation());
  }

  #[test]
  fn method_round_trips_through_str() {
    for m in ["GET", "HEAD", "POST", "PUT", "PATCH", "DELETE"] {
      let parsed: Method = m.parse().unwrap();
      assert_eq!(parsed.as_str(), m);
    }
    assert!("TRACE".parse::<Method>().is_err());
  }
}
