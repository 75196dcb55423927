//! Offline-resilient request gateway.
//!
//! Sits between an application and the network: classifies every outbound
//! request, applies a caching strategy per request class, and durably
//! queues mutating requests that fail so they replay once connectivity
//! returns.
//!
//! The embeddable surface is [`CacheService`]: construct it once with
//! injected store and network dependencies, then feed it [`Event`]s —
//! lifecycle transitions, intercepted requests, reconnect signals, push
//! payloads.

pub mod cache;
pub mod config;
pub mod event;
pub mod http;
pub mod lifecycle;
pub mod notify;
pub mod queue;
pub mod router;
pub mod service;
pub mod store;
pub mod sync;

#[cfg(test)]
mod testutil;

pub use config::Config;
pub use http::{HttpClient, Network, Request, Response};
pub use service::{CacheService, Event, Handled};
