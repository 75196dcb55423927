//! Scripted fake network shared by unit tests.

use color_eyre::{eyre::eyre, Result};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::http::{Headers, Network, Request, Response};

enum Scripted {
  Respond(Response),
  Unreachable,
}

/// Network double that replays scripted responses keyed by "METHOD url".
///
/// With `set_offline(true)` every fetch fails as unreachable, regardless
/// of what is scripted. Each scripted response is consumed once.
#[derive(Default)]
pub struct FakeNetwork {
  scripted: Mutex<HashMap<String, VecDeque<Scripted>>>,
  calls: Mutex<Vec<String>>,
  offline: AtomicBool,
}

impl FakeNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  fn key(method: &str, url: &str) -> String {
    format!("{} {}", method, url)
  }

  fn script(&self, method: &str, url: &str, entry: Scripted) {
    self
      .scripted
      .lock()
      .unwrap()
      .entry(Self::key(method, url))
      .or_default()
      .push_back(entry);
  }

  /// Script a response for the next matching fetch.
  pub fn respond(&self, method: &str, url: &str, response: Response) {
    self.script(method, url, Scripted::Respond(response));
  }

  /// Script a 200 text response for the next matching GET.
  pub fn respond_ok(&self, url: &str, body: &str) {
    self.respond("GET", url, Response::new(200, Headers::new(), body.as_bytes().to_vec()));
  }

  /// Script a transport failure for the next matching fetch.
  pub fn unreachable_once(&self, method: &str, url: &str) {
    self.script(method, url, Scripted::Unreachable);
  }

  /// Toggle blanket unreachability.
  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  /// Every fetch observed, as "METHOD url", in order.
  pub fn calls(&self) -> Vec<String> {
    self.calls.lock().unwrap().clone()
  }
}

impl Network for FakeNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let key = Self::key(request.method.as_str(), &request.url);
    self.calls.lock().unwrap().push(key.clone());

    if self.offline.load(Ordering::SeqCst) {
      return Err(eyre!("Network unreachable (offline): {}", key));
    }

    let entry = self
      .scripted
      .lock()
      .unwrap()
      .get_mut(&key)
      .and_then(|q| q.pop_front());

    match entry {
      Some(Scripted::Respond(response)) => Ok(response),
      Some(Scripted::Unreachable) => Err(eyre!("Network unreachable: {}", key)),
      None => Err(eyre!("No scripted response for {}", key)),
    }
  }
}
