//! Notification dispatcher: surfaces externally-delivered push payloads.
//!
//! Interface-deep by design. The sink trait is the display surface; the
//! daemon plugs in a logging sink since it has no UI of its own.

use color_eyre::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Action id that opens the application window.
const ACTION_OPEN: &str = "open";

/// One actionable button on a notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationAction {
  pub id: String,
  pub label: String,
  #[serde(default)]
  pub icon: Option<String>,
}

/// Metadata carried alongside the notification body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationData {
  pub created_at: String,
  pub reference_id: String,
}

/// Externally-delivered push payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationPayload {
  #[serde(default)]
  pub title: Option<String>,
  pub body: String,
  #[serde(default)]
  pub icon: Option<String>,
  #[serde(default)]
  pub badge: Option<String>,
  #[serde(default)]
  pub data: Option<NotificationData>,
  #[serde(default)]
  pub actions: Vec<NotificationAction>,
}

/// Display surface for notifications and the "open application" effect.
pub trait NotificationSink: Send + Sync {
  fn deliver(&self, payload: &NotificationPayload) -> Result<()>;
  fn open_window(&self, url: &str) -> Result<()>;
}

/// Sink that surfaces notifications through the log.
pub struct LogSink;

impl NotificationSink for LogSink {
  fn deliver(&self, payload: &NotificationPayload) -> Result<()> {
    info!(
      title = payload.title.as_deref().unwrap_or(""),
      body = %payload.body,
      "Notification"
    );
    Ok(())
  }

  fn open_window(&self, url: &str) -> Result<()> {
    info!(%url, "Open application window");
    Ok(())
  }
}

/// Routes payloads to the sink and known action ids to their effects.
pub struct Dispatcher {
  sink: Box<dyn NotificationSink>,
  app_url: String,
}

impl Dispatcher {
  pub fn new(sink: Box<dyn NotificationSink>, app_url: String) -> Self {
    Self { sink, app_url }
  }

  pub fn deliver(&self, payload: &NotificationPayload) -> Result<()> {
    self.sink.deliver(payload)
  }

  /// Known actions open the application; unknown ids are no-ops.
  pub fn on_action(&self, action_id: &str) -> Result<()> {
    match action_id {
      ACTION_OPEN => self.sink.open_window(&self.app_url),
      other => {
        debug!(action = other, "Ignoring unknown notification action");
        Ok(())
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::{Arc, Mutex};

  #[derive(Default)]
  struct RecordingSink {
    delivered: Mutex<Vec<String>>,
    opened: Mutex<Vec<String>>,
  }

  impl NotificationSink for Arc<RecordingSink> {
    fn deliver(&self, payload: &NotificationPayload) -> Result<()> {
      self.delivered.lock().unwrap().push(payload.body.clone());
      Ok(())
    }

    fn open_window(&self, url: &str) -> Result<()> {
      self.opened.lock().unwrap().push(url.to_string());
      Ok(())
    }
  }

  fn dispatcher() -> (Arc<RecordingSink>, Dispatcher) {
    let sink = Arc::new(RecordingSink::default());
    let dispatcher = Dispatcher::new(
      Box::new(Arc::clone(&sink)),
      "https://app.example.com/".to_string(),
    );
    (sink, dispatcher)
  }

  fn payload(body: &str) -> NotificationPayload {
    NotificationPayload {
      title: None,
      body: body.to_string(),
      icon: None,
      badge: None,
      data: None,
      actions: Vec::new(),
    }
  }

  #[test]
  fn deliver_forwards_to_the_sink() {
    let (sink, dispatcher) = dispatcher();

    dispatcher.deliver(&payload("generation finished")).unwrap();
    assert_eq!(sink.delivered.lock().unwrap().as_slice(), ["generation finished"]);
  }

  #[test]
  fn open_action_opens_the_app_window() {
    let (sink, dispatcher) = dispatcher();

    dispatcher.on_action("open").unwrap();
    assert_eq!(sink.opened.lock().unwrap().as_slice(), ["https://app.example.com/"]);
  }

  #[test]
  fn unknown_action_is_a_noop() {
    let (sink, dispatcher) = dispatcher();

    dispatcher.on_action("dismiss").unwrap();
    assert!(sink.opened.lock().unwrap().is_empty());
    assert!(sink.delivered.lock().unwrap().is_empty());
  }

  #[test]
  fn payload_parses_the_wire_schema() {
    let json = r#"{
      "body": "Test run complete",
      "icon": "/icons/icon-192.png",
      "badge": "/icons/badge-72.png",
      "data": { "createdAt": "2026-08-26T10:00:00Z", "referenceId": "run-42" },
      "actions": [{ "id": "open", "label": "Open app", "icon": "/icons/open.png" }]
    }"#;

    let payload: NotificationPayload = serde_json::from_str(json).unwrap();
    assert_eq!(payload.body, "Test run complete");
    assert_eq!(payload.data.as_ref().unwrap().reference_id, "run-42");
    assert_eq!(payload.actions.len(), 1);
    assert_eq!(payload.actions[0].id, "open");
  }
}
