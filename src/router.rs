//! Strategy router: classifies every outbound request and executes the
//! matching cache strategy.
//!
//! Classification is pure and deterministic given only the method and the
//! URL path; the router itself holds no persistent state. Mutating
//! requests are never served from cache — on network failure they are
//! queued for replay and answered with a synthesized 503.

use color_eyre::{eyre::WrapErr, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{CacheEntry, CacheStore, Criticality};
use crate::http::{Headers, Method, Network, Request, Response};
use crate::queue::RetryQueue;

/// The caching policy applied to a request. Closed set, selected once per
/// request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyClass {
  /// Serve from cache if present, else fetch and store.
  CacheFirst,
  /// Try the network; fall back to cache for reads.
  NetworkFirstWithCacheFallback,
  /// Network or a synthesized error; cache is never consulted.
  NetworkOnlyWithErrorResponse,
}

/// Classify a request by method and path.
///
/// API reads go network-first, API mutations are network-only, everything
/// else (static assets, navigations) is cache-first.
pub fn classify(method: Method, path: &str, api_prefix: &str) -> StrategyClass {
  if path.starts_with(api_prefix) {
    if method.is_read() {
      StrategyClass::NetworkFirstWithCacheFallback
    } else {
      StrategyClass::NetworkOnlyWithErrorResponse
    }
  } else {
    StrategyClass::CacheFirst
  }
}

/// Where an intercepted request was ultimately answered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServedFrom {
  Network,
  Cache,
  Synthesized,
}

/// Result of intercepting one request.
#[derive(Debug)]
pub struct InterceptOutcome {
  pub response: Response,
  pub served_from: ServedFrom,
  /// Set when the request was durably queued for replay; the synthesized
  /// 503 alongside it is the caller's "failed, will retry" signal.
  pub queued_action_id: Option<i64>,
}

impl InterceptOutcome {
  fn network(response: Response) -> Self {
    Self {
      response,
      served_from: ServedFrom::Network,
      queued_action_id: None,
    }
  }

  fn cache(entry: CacheEntry) -> Self {
    Self {
      response: entry.into_response(),
      served_from: ServedFrom::Cache,
      queued_action_id: None,
    }
  }

  fn synthesized(response: Response) -> Self {
    Self {
      response,
      served_from: ServedFrom::Synthesized,
      queued_action_id: None,
    }
  }
}

/// The synthesized response for an unreachable network.
pub fn network_error_response() -> Response {
  let mut headers = Headers::new();
  headers.insert("content-type".to_string(), "application/json".to_string());
  Response::new(503, headers, br#"{"error":"Network unavailable"}"#.to_vec())
}

/// Minimal offline document for navigations with nothing cached.
fn offline_page() -> Response {
  let mut headers = Headers::new();
  headers.insert("content-type".to_string(), "text/html".to_string());
  Response::new(
    503,
    headers,
    b"<!doctype html><html><body><h1>Offline</h1><p>This page is not available without a network connection.</p></body></html>"
      .to_vec(),
  )
}

/// Routes intercepted requests through the selected strategy.
pub struct Router<N: Network, C: CacheStore, Q: RetryQueue> {
  network: Arc<N>,
  cache: Arc<C>,
  queue: Arc<Q>,
  namespace: String,
  api_prefix: String,
}

impl<N: Network, C: CacheStore, Q: RetryQueue> Router<N, C, Q> {
  pub fn new(
    network: Arc<N>,
    cache: Arc<C>,
    queue: Arc<Q>,
    namespace: String,
    api_prefix: String,
  ) -> Self {
    Self {
      network,
      cache,
      queue,
      namespace,
      api_prefix,
    }
  }

  /// The interception entry point: always produces a response for
  /// strategies that can degrade, and an error only where the spec of the
  /// strategy says the failure propagates to the caller.
  pub async fn intercept(&self, request: &Request) -> Result<InterceptOutcome> {
    let path = request.path()?;
    let class = classify(request.method, &path, &self.api_prefix);
    debug!(method = %request.method, %path, ?class, "Routing request");

    match class {
      StrategyClass::NetworkFirstWithCacheFallback => self.network_first(request).await,
      StrategyClass::NetworkOnlyWithErrorResponse => self.network_only(request).await,
      StrategyClass::CacheFirst => self.cache_first(request).await,
    }
  }

  async fn network_first(&self, request: &Request) -> Result<InterceptOutcome> {
    match self.network.fetch(request).await {
      Ok(response) => {
        if request.method.is_read() && response.is_success() {
          // Best-effort: a failed cache write never blocks the response
          self
            .cache
            .put(&self.namespace, request, &response, Criticality::BestEffort)?;
        }
        Ok(InterceptOutcome::network(response))
      }
      Err(e) => {
        debug!(url = %request.url, "Network failed, falling back: {}", e);
        if request.method.is_read() {
          if let Some(entry) = self.lookup(request) {
            return Ok(InterceptOutcome::cache(entry));
          }
        }
        Ok(InterceptOutcome::synthesized(network_error_response()))
      }
    }
  }

  async fn network_only(&self, request: &Request) -> Result<InterceptOutcome> {
    match self.network.fetch(request).await {
      Ok(response) => Ok(InterceptOutcome::network(response)),
      Err(e) => {
        warn!(method = %request.method, url = %request.url, "Mutation failed to send, queueing: {}", e);
        // A mutation that is neither sent nor durably queued must not
        // fail silently, so enqueue errors propagate to the caller.
        let action = self
          .queue
          .enqueue(request)
          .wrap_err("Failed to queue mutation for replay")?;
        info!(id = action.id, url = %request.url, "Queued for replay");
        Ok(InterceptOutcome {
          queued_action_id: Some(action.id),
          ..InterceptOutcome::synthesized(network_error_response())
        })
      }
    }
  }

  async fn cache_first(&self, request: &Request) -> Result<InterceptOutcome> {
    if let Some(entry) = self.lookup(request) {
      return Ok(InterceptOutcome::cache(entry));
    }

    match self.network.fetch(request).await {
      Ok(response) => {
        if response.is_success() {
          self
            .cache
            .put(&self.namespace, request, &response, Criticality::BestEffort)?;
        }
        Ok(InterceptOutcome::network(response))
      }
      Err(e) => {
        if request.is_navigation() {
          // Fall back to the precached root document of the same origin
          if let Ok(root) = self.root_document(request) {
            if let Some(entry) = self.lookup(&root) {
              return Ok(InterceptOutcome::cache(entry));
            }
          }
          return Ok(InterceptOutcome::synthesized(offline_page()));
        }
        Err(e).wrap_err_with(|| format!("Fetch failed for {} {}", request.method, request.url))
      }
    }
  }

  /// Cache lookup that treats a store failure as a miss.
  fn lookup(&self, request: &Request) -> Option<CacheEntry> {
    match self.cache.get(&self.namespace, request) {
      Ok(entry) => entry,
      Err(e) => {
        warn!(url = %request.url, "Cache read failed, treating as miss: {}", e);
        None
      }
    }
  }

  fn root_document(&self, request: &Request) -> Result<Request> {
    let url = Url::parse(&request.url)
      .and_then(|u| u.join("/"))
      .wrap_err_with(|| format!("Invalid request URL: {}", request.url))?;
    Ok(Request::get(url))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteCacheStore;
  use crate::queue::SqliteRetryQueue;
  use crate::store::Database;
  use crate::testutil::FakeNetwork;

  const NS: &str = "app-cache-v1.0.0";
  const PREFIX: &str = "/api/v1/";

  struct Fixture {
    network: Arc<FakeNetwork>,
    cache: Arc<SqliteCacheStore>,
    queue: Arc<SqliteRetryQueue>,
    router: Router<FakeNetwork, SqliteCacheStore, SqliteRetryQueue>,
  }

  fn fixture() -> Fixture {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let network = Arc::new(FakeNetwork::new());
    let cache = Arc::new(SqliteCacheStore::new(Arc::clone(&db)));
    let queue = Arc::new(SqliteRetryQueue::new(Arc::clone(&db)));
    let router = Router::new(
      Arc::clone(&network),
      Arc::clone(&cache),
      Arc::clone(&queue),
      NS.to_string(),
      PREFIX.to_string(),
    );
    Fixture {
      network,
      cache,
      queue,
      router,
    }
  }

  fn api_get(path: &str) -> Request {
    Request::get(format!("https://api.example.com{}", path))
  }

  fn api_post(path: &str, body: &str) -> Request {
    Request::new(
      Method::Post,
      format!("https://api.example.com{}", path),
      Headers::new(),
      body.as_bytes().to_vec(),
    )
  }

  #[test]
  fn classification_is_deterministic() {
    assert_eq!(
      classify(Method::Get, "/api/v1/projects", PREFIX),
      StrategyClass::NetworkFirstWithCacheFallback
    );
    assert_eq!(
      classify(Method::Post, "/api/v1/projects", PREFIX),
      StrategyClass::NetworkOnlyWithErrorResponse
    );
    assert_eq!(
      classify(Method::Delete, "/api/v1/projects/3", PREFIX),
      StrategyClass::NetworkOnlyWithErrorResponse
    );
    assert_eq!(classify(Method::Get, "/style.css", PREFIX), StrategyClass::CacheFirst);
    assert_eq!(classify(Method::Get, "/", PREFIX), StrategyClass::CacheFirst);
  }

  #[tokio::test]
  async fn api_read_success_is_cached() {
    let f = fixture();
    let req = api_get("/api/v1/models");
    f.network.respond_ok(&req.url, r#"["gpt-4o"]"#);

    let outcome = f.router.intercept(&req).await.unwrap();
    assert_eq!(outcome.served_from, ServedFrom::Network);
    assert_eq!(outcome.response.body, br#"["gpt-4o"]"#);

    let entry = f.cache.get(NS, &req).unwrap().unwrap();
    assert_eq!(entry.body, br#"["gpt-4o"]"#);
  }

  #[tokio::test]
  async fn api_read_falls_back_to_identical_cached_bytes() {
    let f = fixture();
    let req = api_get("/api/v1/projects?page=1");
    f.network.respond_ok(&req.url, r#"[{"id":1}]"#);
    f.router.intercept(&req).await.unwrap();

    f.network.set_offline(true);
    let outcome = f.router.intercept(&req).await.unwrap();
    assert_eq!(outcome.served_from, ServedFrom::Cache);
    assert_eq!(outcome.response.body, br#"[{"id":1}]"#);
    assert_eq!(outcome.response.status, 200);
  }

  #[tokio::test]
  async fn api_read_miss_synthesizes_error() {
    let f = fixture();
    f.network.set_offline(true);

    let outcome = f.router.intercept(&api_get("/api/v1/projects")).await.unwrap();
    assert_eq!(outcome.served_from, ServedFrom::Synthesized);
    assert_eq!(outcome.response.status, 503);
    assert_eq!(outcome.response.body, br#"{"error":"Network unavailable"}"#);
  }

  #[tokio::test]
  async fn api_error_status_is_not_cached() {
    let f = fixture();
    let req = api_get("/api/v1/projects");
    f.network
      .respond("GET", &req.url, Response::new(500, Headers::new(), b"boom".to_vec()));

    let outcome = f.router.intercept(&req).await.unwrap();
    assert_eq!(outcome.response.status, 500);
    assert!(f.cache.get(NS, &req).unwrap().is_none());
  }

  #[tokio::test]
  async fn offline_mutation_is_queued_and_never_served_stale() {
    let f = fixture();
    f.network.set_offline(true);

    let req = api_post("/api/v1/projects", r#"{"name":"demo"}"#);
    let outcome = f.router.intercept(&req).await.unwrap();

    assert_eq!(outcome.served_from, ServedFrom::Synthesized);
    assert_eq!(outcome.response.status, 503);
    assert_eq!(outcome.response.body, br#"{"error":"Network unavailable"}"#);

    let pending = f.queue.oldest_first().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].method, Method::Post);
    assert_eq!(pending[0].body, req.body);
    assert_eq!(outcome.queued_action_id, Some(pending[0].id));
  }

  #[tokio::test]
  async fn online_mutation_passes_through_untouched() {
    let f = fixture();
    let req = api_post("/api/v1/projects", r#"{"name":"demo"}"#);
    f.network
      .respond("POST", &req.url, Response::new(201, Headers::new(), b"created".to_vec()));

    let outcome = f.router.intercept(&req).await.unwrap();
    assert_eq!(outcome.served_from, ServedFrom::Network);
    assert_eq!(outcome.response.status, 201);
    assert_eq!(f.queue.len().unwrap(), 0);
  }

  #[tokio::test]
  async fn cache_first_hit_skips_network() {
    let f = fixture();
    let req = Request::get("https://app.example.com/style.css");
    f.cache
      .put(
        NS,
        &req,
        &Response::new(200, Headers::new(), b"body { }".to_vec()),
        Criticality::Critical,
      )
      .unwrap();

    let outcome = f.router.intercept(&req).await.unwrap();
    assert_eq!(outcome.served_from, ServedFrom::Cache);
    assert_eq!(outcome.response.body, b"body { }");
    assert!(f.network.calls().is_empty());
  }

  #[tokio::test]
  async fn cache_first_miss_fetches_and_stores() {
    let f = fixture();
    let req = Request::get("https://app.example.com/app.js");
    f.network.respond_ok(&req.url, "console.log(1)");

    let outcome = f.router.intercept(&req).await.unwrap();
    assert_eq!(outcome.served_from, ServedFrom::Network);

    // now offline: the stored copy serves the second hit
    f.network.set_offline(true);
    let outcome = f.router.intercept(&req).await.unwrap();
    assert_eq!(outcome.served_from, ServedFrom::Cache);
    assert_eq!(outcome.response.body, b"console.log(1)");
  }

  #[tokio::test]
  async fn offline_navigation_serves_precached_root() {
    let f = fixture();
    let root = Request::get("https://app.example.com/");
    f.cache
      .put(
        NS,
        &root,
        &Response::new(200, Headers::new(), b"<html>shell</html>".to_vec()),
        Criticality::Critical,
      )
      .unwrap();
    f.network.set_offline(true);

    let mut nav = Request::get("https://app.example.com/dashboard");
    nav.headers.insert("accept".to_string(), "text/html".to_string());

    let outcome = f.router.intercept(&nav).await.unwrap();
    assert_eq!(outcome.served_from, ServedFrom::Cache);
    assert_eq!(outcome.response.status, 200);
    assert_eq!(outcome.response.body, b"<html>shell</html>");
  }

  #[tokio::test]
  async fn offline_navigation_without_root_gets_offline_page() {
    let f = fixture();
    f.network.set_offline(true);

    let mut nav = Request::get("https://app.example.com/dashboard");
    nav.headers.insert("accept".to_string(), "text/html".to_string());

    let outcome = f.router.intercept(&nav).await.unwrap();
    assert_eq!(outcome.served_from, ServedFrom::Synthesized);
    assert_eq!(outcome.response.status, 503);
    assert!(String::from_utf8(outcome.response.body).unwrap().contains("Offline"));
  }

  #[tokio::test]
  async fn offline_asset_miss_propagates_the_failure() {
    let f = fixture();
    f.network.set_offline(true);

    let req = Request::get("https://app.example.com/missing.js");
    assert!(f.router.intercept(&req).await.is_err());
  }
}
