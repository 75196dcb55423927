//! The gateway facade: one object, explicit event dispatch.
//!
//! `CacheService` is constructed once per process with injected store and
//! network dependencies; `handle` is the single entry point the host wires
//! its runtime events into, whatever that runtime's registration mechanism
//! looks like.

use color_eyre::Result;
use std::sync::Arc;
use tokio::sync::watch;

use crate::cache::SqliteCacheStore;
use crate::config::Config;
use crate::http::{Network, Request};
use crate::lifecycle::{LifecycleController, LifecyclePhase};
use crate::notify::{Dispatcher, NotificationPayload, NotificationSink};
use crate::queue::{RetryQueue, SqliteRetryQueue};
use crate::router::{InterceptOutcome, Router};
use crate::store::Database;
use crate::sync::{DrainOutcome, Drainer};

/// Everything the host application can feed into the gateway.
#[derive(Debug)]
pub enum Event {
  /// A new version is installing: precache the manifest.
  Installing,
  /// Activate the installed version: purge stale caches, claim clients.
  Activating,
  /// Control channel "activate now": skip the activation grace wait.
  ActivateNow,
  /// An outbound request to classify and answer.
  Intercept(Request),
  /// Connectivity restored: drain the retry queue.
  Reconnect,
  /// An externally-delivered push payload.
  Push(NotificationPayload),
  /// The user triggered a notification action.
  NotificationAction(String),
}

/// What handling an event produced.
#[derive(Debug)]
pub enum Handled {
  Installed,
  Activated,
  ActivationForced,
  Intercepted(InterceptOutcome),
  Drained(DrainOutcome),
  Delivered,
}

/// Offline-resilient request gateway.
pub struct CacheService<N: Network> {
  router: Router<N, SqliteCacheStore, SqliteRetryQueue>,
  lifecycle: LifecycleController<N, SqliteCacheStore>,
  drainer: Drainer<N, SqliteRetryQueue>,
  dispatcher: Dispatcher,
  queue: Arc<SqliteRetryQueue>,
}

impl<N: Network> CacheService<N> {
  pub fn new(
    config: &Config,
    db: Arc<Database>,
    network: Arc<N>,
    sink: Box<dyn NotificationSink>,
  ) -> Self {
    let cache = Arc::new(SqliteCacheStore::new(Arc::clone(&db)));
    let queue = Arc::new(SqliteRetryQueue::new(db));
    let namespace = config.namespace();

    let router = Router::new(
      Arc::clone(&network),
      Arc::clone(&cache),
      Arc::clone(&queue),
      namespace.clone(),
      config.cache.api_prefix.clone(),
    );
    let lifecycle = LifecycleController::new(
      Arc::clone(&network),
      cache,
      namespace,
      config.remote.base_url.clone(),
      config.precache.clone(),
      config.activation_grace(),
    );
    let drainer = Drainer::new(network, Arc::clone(&queue));
    let dispatcher = Dispatcher::new(sink, config.remote.base_url.clone());

    Self {
      router,
      lifecycle,
      drainer,
      dispatcher,
      queue,
    }
  }

  /// Dispatch one event through the gateway.
  pub async fn handle(&self, event: Event) -> Result<Handled> {
    match event {
      Event::Installing => {
        self.lifecycle.install().await?;
        Ok(Handled::Installed)
      }
      Event::Activating => {
        self.lifecycle.activate().await?;
        Ok(Handled::Activated)
      }
      Event::ActivateNow => {
        self.lifecycle.activate_now();
        Ok(Handled::ActivationForced)
      }
      Event::Intercept(request) => {
        let outcome = self.router.intercept(&request).await?;
        Ok(Handled::Intercepted(outcome))
      }
      Event::Reconnect => {
        let outcome = self.drainer.drain().await?;
        Ok(Handled::Drained(outcome))
      }
      Event::Push(payload) => {
        self.dispatcher.deliver(&payload)?;
        Ok(Handled::Delivered)
      }
      Event::NotificationAction(id) => {
        self.dispatcher.on_action(&id)?;
        Ok(Handled::Delivered)
      }
    }
  }

  pub fn phase(&self) -> Result<LifecyclePhase> {
    self.lifecycle.phase()
  }

  /// Number of mutations waiting for replay.
  pub fn pending_replays(&self) -> Result<u64> {
    self.queue.len()
  }

  /// Watch which cache version connected clients have adopted.
  pub fn subscribe_clients(&self) -> watch::Receiver<Option<String>> {
    self.lifecycle.subscribe()
  }
}
