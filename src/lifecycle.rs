//! Install/activate lifecycle for versioned cache namespaces.
//!
//! A new version first installs (precaches its asset manifest), then
//! activates (purges superseded namespaces and claims connected clients).
//! A failed install never becomes eligible to activate, so a broken
//! deployment leaves the previous version serving.

use color_eyre::{eyre::eyre, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tracing::{info, warn};
use url::Url;

use crate::cache::{CacheStore, Criticality};
use crate::http::{Network, Request};

/// Lifecycle progression of a cache version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
  Installing,
  Installed,
  Activating,
  Active,
}

/// Drives the Installing → Installed → Activating → Active transitions.
pub struct LifecycleController<N: Network, C: CacheStore> {
  network: Arc<N>,
  cache: Arc<C>,
  namespace: String,
  base_url: String,
  manifest: Vec<String>,
  /// How long activation waits for old clients before claiming.
  grace: Duration,
  phase: Mutex<LifecyclePhase>,
  skip_waiting: AtomicBool,
  activate_now: Notify,
  clients: watch::Sender<Option<String>>,
}

impl<N: Network, C: CacheStore> LifecycleController<N, C> {
  pub fn new(
    network: Arc<N>,
    cache: Arc<C>,
    namespace: String,
    base_url: String,
    manifest: Vec<String>,
    grace: Duration,
  ) -> Self {
    let (clients, _) = watch::channel(None);
    Self {
      network,
      cache,
      namespace,
      base_url,
      manifest,
      grace,
      phase: Mutex::new(LifecyclePhase::Installing),
      skip_waiting: AtomicBool::new(false),
      activate_now: Notify::new(),
      clients,
    }
  }

  pub fn phase(&self) -> Result<LifecyclePhase> {
    self
      .phase
      .lock()
      .map(|p| *p)
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  fn set_phase(&self, phase: LifecyclePhase) -> Result<()> {
    *self.phase.lock().map_err(|e| eyre!("Lock poisoned: {}", e))? = phase;
    Ok(())
  }

  /// Watch the currently adopted version. Receivers see the new namespace
  /// the moment activation claims them.
  pub fn subscribe(&self) -> watch::Receiver<Option<String>> {
    self.clients.subscribe()
  }

  /// Precache the asset manifest into the current namespace.
  ///
  /// Every URL is fetched and written independently; entries already
  /// written stay even when a later one fails. Any failure fails the
  /// install as a whole and the version stays un-activatable.
  pub async fn install(&self) -> Result<()> {
    self.set_phase(LifecyclePhase::Installing)?;
    self.cache.open_namespace(&self.namespace)?;

    let requests: Vec<Request> = self
      .manifest
      .iter()
      .map(|entry| self.resolve(entry).map(Request::get))
      .collect::<Result<_>>()?;

    let fetches = requests.iter().map(|req| async move {
      let result = self.network.fetch(req).await;
      (req, result)
    });

    let mut failed: Vec<String> = Vec::new();
    for (request, result) in futures::future::join_all(fetches).await {
      match result {
        Ok(response) if response.is_success() => {
          self
            .cache
            .put(&self.namespace, request, &response, Criticality::Critical)?;
        }
        Ok(response) => {
          warn!(url = %request.url, status = response.status, "Precache fetch returned error status");
          failed.push(request.url.clone());
        }
        Err(e) => {
          warn!(url = %request.url, "Precache fetch failed: {}", e);
          failed.push(request.url.clone());
        }
      }
    }

    if !failed.is_empty() {
      return Err(eyre!(
        "Install failed: {} of {} precache URLs unavailable ({})",
        failed.len(),
        self.manifest.len(),
        failed.join(", ")
      ));
    }

    self.set_phase(LifecyclePhase::Installed)?;
    info!(namespace = %self.namespace, urls = self.manifest.len(), "Install complete");
    Ok(())
  }

  /// Purge superseded namespaces and claim all connected clients.
  ///
  /// Waits out the grace period first unless a forced activation was
  /// requested.
  pub async fn activate(&self) -> Result<()> {
    if self.phase()? != LifecyclePhase::Installed {
      return Err(eyre!("Cannot activate {}: install has not completed", self.namespace));
    }
    self.set_phase(LifecyclePhase::Activating)?;

    if !self.grace.is_zero() && !self.skip_waiting.load(Ordering::SeqCst) {
      tokio::select! {
        _ = tokio::time::sleep(self.grace) => {}
        _ = self.activate_now.notified() => {
          info!("Grace period skipped by forced activation");
        }
      }
    }

    let purged = self.cache.purge_except(&self.namespace)?;
    if purged > 0 {
      info!(purged, namespace = %self.namespace, "Purged stale cache namespaces");
    }

    // Claim clients immediately; no reload required
    self.clients.send_replace(Some(self.namespace.clone()));

    self.set_phase(LifecyclePhase::Active)?;
    info!(namespace = %self.namespace, "Active");
    Ok(())
  }

  /// Forced-activation control message: skip any pending or future grace
  /// wait.
  pub fn activate_now(&self) {
    self.skip_waiting.store(true, Ordering::SeqCst);
    self.activate_now.notify_waiters();
  }

  fn resolve(&self, entry: &str) -> Result<String> {
    let base = Url::parse(&self.base_url)
      .map_err(|e| eyre!("Invalid base URL {}: {}", self.base_url, e))?;
    let url = base
      .join(entry)
      .map_err(|e| eyre!("Invalid manifest entry {}: {}", entry, e))?;
    Ok(url.into())
  }
}
