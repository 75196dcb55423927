//! Sync drainer: replays the retry queue when connectivity returns.
//!
//! Strict FIFO: entries replay oldest-first and a failing head stops the
//! run, so later entries are never attempted out of order. At most one
//! drain runs at a time.

use color_eyre::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::http::Network;
use crate::queue::RetryQueue;

/// Result of one drain run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
  /// The queue was already empty.
  Idle,
  /// Every pending action replayed and was removed.
  Drained { replayed: usize },
  /// The head of the queue failed again; later entries were not attempted.
  /// `retry_after` is the suggested delay before the next drain.
  Blocked {
    replayed: usize,
    head_attempts: u32,
    retry_after: Duration,
  },
  /// Another drain is in flight; nothing was touched.
  AlreadyDraining,
}

/// Backoff for a blocked queue head: 2s doubling per attempt, capped at
/// five minutes. Attempts are unbounded but never hot-loop.
pub fn retry_delay(attempts: u32) -> Duration {
  const BASE: Duration = Duration::from_secs(2);
  const MAX: Duration = Duration::from_secs(300);

  let exp = attempts.saturating_sub(1).min(16);
  BASE.saturating_mul(1 << exp).min(MAX)
}

/// Walks the retry queue on reconnect and replays each action in order.
pub struct Drainer<N: Network, Q: RetryQueue> {
  network: Arc<N>,
  queue: Arc<Q>,
  draining: AtomicBool,
}

impl<N: Network, Q: RetryQueue> Drainer<N, Q> {
  pub fn new(network: Arc<N>, queue: Arc<Q>) -> Self {
    Self {
      network,
      queue,
      draining: AtomicBool::new(false),
    }
  }

  /// Replay pending actions oldest-first. Single-flight: a call that
  /// overlaps a running drain returns immediately.
  pub async fn drain(&self) -> Result<DrainOutcome> {
    if self.draining.swap(true, Ordering::SeqCst) {
      return Ok(DrainOutcome::AlreadyDraining);
    }

    let outcome = self.run().await;
    self.draining.store(false, Ordering::SeqCst);
    outcome
  }

  async fn run(&self) -> Result<DrainOutcome> {
    let pending = self.queue.oldest_first()?;
    if pending.is_empty() {
      return Ok(DrainOutcome::Idle);
    }

    info!(pending = pending.len(), "Draining retry queue");
    let mut replayed = 0;

    for action in pending {
      let request = action.to_request();
      match self.network.fetch(&request).await {
        Ok(response) => {
          // The server's verdict is final either way; replaying a
          // rejected mutation cannot succeed later.
          self.queue.remove(action.id)?;
          replayed += 1;
          info!(
            id = action.id,
            status = response.status,
            url = %action.url,
            "Replayed queued action"
          );
        }
        Err(e) => {
          let attempts = self.queue.record_attempt(action.id)?;
          let retry_after = retry_delay(attempts);
          warn!(
            id = action.id,
            attempts,
            url = %action.url,
            "Replay failed, queue blocked: {}",
            e
          );
          return Ok(DrainOutcome::Blocked {
            replayed,
            head_attempts: attempts,
            retry_after,
          });
        }
      }
    }

    Ok(DrainOutcome::Drained { replayed })
  }
}
