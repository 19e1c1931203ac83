//! galaxyd - Avorion galaxy daemon
//!
//! Loads the configuration, opens the tracking store, starts the game under
//! supervision and runs until interrupted.

use galaxyd::bus::{BusMessage, MessageBus, Topic};
use galaxyd::cache::GalaxyCache;
use galaxyd::config::{self, Config, LoggingConfig};
use galaxyd::events::builtin_registry;
use galaxyd::store::{self, NoOpStore, SqliteStore, TrackingStore};
use galaxyd::{Supervisor, http, metrics};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Echo outbound chat and operator log messages to the daemon's own log.
async fn relay_outbound(bus: Arc<MessageBus<BusMessage>>, shutdown: CancellationToken) {
    let (mut chat, chat_canceller) = bus.subscribe(Topic::ChatOutbound);
    let (mut log, log_canceller) = bus.subscribe(Topic::LogOutbound);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            Some(message) = chat.recv() => {
                if let BusMessage::Chat(data) = message {
                    info!(target: "chat", author = %data.name, uid = %data.uid, "{}", data.msg);
                }
            }
            Some(message) = log.recv() => {
                if let BusMessage::Log(data) = message {
                    info!(target: "operator", source = %data.name, "{}", data.msg);
                }
            }
            else => break,
        }
    }
    chat_canceller.cancel();
    log_canceller.cancel();
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
                return;
            }
            Err(e) => warn!(error = %e, "Failed to install SIGTERM handler"),
        }
    }
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for ctrl-c");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "galaxyd.toml".to_string());
    let config = Config::load(&config_path)
        .map_err(|e| anyhow::anyhow!("failed to load config {config_path}: {e}"))?;

    init_tracing(&config.logging);

    if let Err(errors) = config::validate(&config) {
        for e in &errors {
            error!(error = %e, "Invalid configuration");
        }
        return Err(anyhow::anyhow!(
            "refusing to start with {} configuration error(s)",
            errors.len()
        ));
    }

    info!(
        galaxy = %config.game.galaxy,
        install = %config.game.install_path.display(),
        "Starting galaxyd"
    );

    // Tracking store
    let store: Arc<dyn TrackingStore> = match &config.database {
        Some(db) => Arc::new(SqliteStore::open(&db.path).await?),
        None => {
            info!("No database configured. Tracking data will not survive a restart.");
            Arc::new(NoOpStore)
        }
    };
    store.init().await?;

    let config = Arc::new(config);
    let shutdown = CancellationToken::new();
    let bus = Arc::new(MessageBus::new(config.bus.queue_capacity));
    let cache = Arc::new(GalaxyCache::new());
    let registry = Arc::new(builtin_registry(&config.events)?);
    info!(rules = registry.len(), "Event registry built");

    let supervisor = Supervisor::builder(Arc::clone(&config))
        .registry(registry)
        .cache(cache)
        .bus(Arc::clone(&bus))
        .store(Arc::clone(&store))
        .shutdown(shutdown.clone())
        .build()?;

    // Prometheus metrics are optional; port 0 disables the HTTP endpoint
    let mut background = Vec::new();
    if config.metrics.port == 0 {
        info!("Metrics disabled");
    } else {
        metrics::init();
        background.push(tokio::spawn(http::run_http_server(
            config.metrics.port,
            supervisor.subscribe_state(),
            shutdown.clone(),
        )));
    }
    background.push(tokio::spawn(store::run_persistence(
        store,
        Arc::clone(&bus),
        shutdown.clone(),
    )));
    background.push(tokio::spawn(relay_outbound(bus, shutdown.clone())));

    let startup = supervisor.start();
    tokio::pin!(startup);
    let started = tokio::select! {
        result = &mut startup => result,
        _ = wait_for_signal() => {
            // Startup observes the token and gives up promptly
            shutdown.cancel();
            startup.await
        }
    };
    let exit = match started {
        Ok(()) => {
            info!(status = ?supervisor.status(), "Game server started");
            wait_for_signal().await;
            Ok(())
        }
        Err(e) if shutdown.is_cancelled() => {
            info!(error = %e, "Startup interrupted");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Initial start failed");
            Err(anyhow::Error::new(e))
        }
    };

    info!("Shutting down");
    supervisor.shutdown().await;
    for task in background {
        if let Err(e) = task.await {
            warn!(error = %e, "Background task ended abnormally");
        }
    }
    exit
}
