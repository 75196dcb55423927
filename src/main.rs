use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use offramp::event::EventHandler;
use offramp::notify::LogSink;
use offramp::store::Database;
use offramp::sync::DrainOutcome;
use offramp::{CacheService, Config, Event, Handled, HttpClient, Network};

#[derive(Parser, Debug)]
#[command(name = "offramp")]
#[command(about = "Offline-resilient request gateway")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/offramp/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Database path override
  #[arg(long)]
  db: Option<PathBuf>,

  /// Activate the new cache version immediately, skipping the grace wait
  #[arg(long)]
  activate_now: bool,

  /// Seconds between connectivity probes
  #[arg(long, default_value_t = 30)]
  probe_interval_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("offramp=info")),
    )
    .init();

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;

  let db_path = match args.db.or_else(|| config.db_path.clone()) {
    Some(path) => path,
    None => Database::default_path()?,
  };
  let db = Arc::new(Database::open(&db_path)?);

  let network = Arc::new(HttpClient::new(config.request_timeout())?);
  let service = CacheService::new(&config, db, Arc::clone(&network), Box::new(LogSink));

  service.handle(Event::Installing).await?;
  if args.activate_now {
    service.handle(Event::ActivateNow).await?;
  }
  service.handle(Event::Activating).await?;
  info!(namespace = %config.namespace(), "Gateway active");

  // Mutations queued by a previous run must not wait for a connectivity
  // dip before replaying
  let pending = service.pending_replays()?;
  if pending > 0 {
    info!(pending, "Draining mutations persisted before this run");
    dispatch(&service, Event::Reconnect).await;
  }

  // Health endpoint doubles as the connectivity probe target
  let probe_url = format!(
    "{}{}health",
    config.remote.base_url.trim_end_matches('/'),
    config.cache.api_prefix
  );
  let mut events = EventHandler::new(
    network,
    probe_url,
    Duration::from_secs(args.probe_interval_secs),
  );

  while let Some(event) = events.next().await {
    dispatch(&service, event).await;
  }

  Ok(())
}

/// Handle one event, re-draining after the suggested backoff while the
/// queue head stays blocked.
async fn dispatch<N: Network>(service: &CacheService<N>, mut event: Event) {
  loop {
    match service.handle(event).await {
      Ok(Handled::Drained(DrainOutcome::Blocked { retry_after, .. })) => {
        tokio::time::sleep(retry_after).await;
        event = Event::Reconnect;
      }
      Ok(_) => break,
      Err(e) => {
        error!("Event handling failed: {:?}", e);
        break;
      }
    }
  }
}
