//! Connectivity watcher for the daemon.
//!
//! Probes the remote health endpoint on a tick; an offline-to-online edge
//! is the reconnect signal that triggers a queue drain.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::http::{Network, Request};
use crate::service::Event;

/// Produces gateway events from a background connectivity probe.
pub struct EventHandler {
  rx: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
  /// Spawn the probe loop against the given health URL.
  pub fn new<N: Network + 'static>(network: Arc<N>, probe_url: String, interval: Duration) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
      // Start offline so the first working probe is an edge: entries
      // queued before a restart must drain without a connectivity dip
      let mut online = false;
      loop {
        tokio::time::sleep(interval).await;

        let reachable = network.fetch(&Request::get(probe_url.clone())).await.is_ok();
        if reachable && !online {
          info!("Connectivity restored");
          if tx.send(Event::Reconnect).is_err() {
            break;
          }
        } else if !reachable && online {
          debug!("Connectivity lost");
        }
        online = reachable;
      }
    });

    Self { rx }
  }

  /// Receive the next event.
  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }
}
