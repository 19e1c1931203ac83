//! Background tasks owned by the supervisor.
//!
//! Health and refresh tasks are bound to a run; the RCON bridge lives as long
//! as the supervisor.

use super::process::CrashReport;
use super::refresh;
use super::state::ServerState;
use crate::bus::{BusMessage, MessageBus, Topic};
use crate::cache::GalaxyCache;
use crate::rcon::CommandBus;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Lightweight probe sent on every health tick.
pub const HEALTH_COMMAND: &str = "status";

pub struct HealthCheck {
    pub run_id: String,
    pub interval: Duration,
    pub response: Duration,
    pub commands: CommandBus,
    pub state: watch::Receiver<ServerState>,
    pub crashes: mpsc::Sender<CrashReport>,
    pub cancel: CancellationToken,
}

impl HealthCheck {
    /// Probe until cancelled or a probe fails while the server is online.
    pub async fn run(self) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
            if *self.state.borrow() != ServerState::Online {
                continue;
            }

            let probe = tokio::time::timeout(
                self.response,
                self.commands.submit(HEALTH_COMMAND, Vec::new()),
            );
            let failure = tokio::select! {
                _ = self.cancel.cancelled() => break,
                outcome = probe => match outcome {
                    Ok(Ok(_)) => None,
                    Ok(Err(e)) => Some(format!("health check failed: {e}")),
                    Err(_) => Some(format!(
                        "health check got no response within {} seconds",
                        self.response.as_secs()
                    )),
                },
            };

            let Some(reason) = failure else {
                debug!("Health check passed");
                continue;
            };
            // Probes racing a stop or restart are not crashes
            if *self.state.borrow() != ServerState::Online || self.cancel.is_cancelled() {
                continue;
            }
            error!(reason = %reason, "Game server is unresponsive");
            let report = CrashReport {
                run_id: self.run_id,
                reason,
            };
            if let Err(e) = self.crashes.try_send(report) {
                warn!(error = %e, "Crash report dropped");
            }
            break;
        }
        debug!("Health check stopped");
    }
}

/// Refresh player data now and then every `interval` until cancelled.
pub async fn refresh_loop(
    interval: Duration,
    commands: CommandBus,
    cache: Arc<GalaxyCache>,
    bus: Arc<MessageBus<BusMessage>>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let refresh = refresh::refresh_players(&commands, &cache, &bus);
        tokio::select! {
            _ = cancel.cancelled() => break,
            result = refresh => if let Err(e) = result {
                warn!(error = %e, "Player data refresh failed");
            },
        }
    }
    debug!("Refresh timer stopped");
}

/// Forward `rcon` topic messages into the command bus.
pub async fn rcon_bridge(
    bus: Arc<MessageBus<BusMessage>>,
    commands: CommandBus,
    shutdown: CancellationToken,
) {
    let (mut inbox, canceller) = bus.subscribe(Topic::Rcon);
    info!("RCON bridge started");
    loop {
        let message = tokio::select! {
            _ = shutdown.cancelled() => break,
            message = inbox.recv() => message,
        };
        match message {
            Some(BusMessage::Rcon(request)) => {
                if let Err(e) = commands.submit_detached(request.command, request.arguments) {
                    warn!(error = %e, "Dropped bridged RCON command");
                }
            }
            Some(other) => debug!(topic = %other.topic(), "Ignoring non-RCON message"),
            None => break,
        }
    }
    canceller.cancel();
    info!("RCON bridge stopped");
}
