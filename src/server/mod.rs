//! Game process supervisor.
//!
//! # Architecture
//!
//! The [`Supervisor`] owns the lifecycle [`StateCell`], the current [`Run`]
//! and the tasks around it:
//!
//! - **Global tasks** (supervisor lifetime): the command bus actor, the crash
//!   watchdog and the RCON bridge. Tracked by `tasks`.
//! - **Run tasks** (one process lifetime): pumps, scanner, reaper, health
//!   check, refresh timer and the post-up hook. Tracked by the run.
//!
//! Lifecycle operations (`start`, `stop`, `restart`) are serialized by one
//! async mutex that also guards the run slot. The watchdog only ever reacts to
//! crash reports from the current run, and only while the state is `Online`.

pub mod hooks;
pub mod process;
pub mod refresh;
pub mod signal;
pub mod state;
pub mod tasks;

pub use process::{CrashReport, Readiness, Run};
pub use refresh::RefreshSummary;
pub use state::{ServerState, StateCell};

use crate::bus::{BusMessage, ChatData, MessageBus};
use crate::cache::{CacheStats, GalaxyCache, PlayerLookup, TrackedEntity};
use crate::config::Config;
use crate::error::{
    ActionError, CacheError, CommandError, CommandResult, LifecycleError, RegistryError,
};
use crate::events::handlers::Moderation;
use crate::events::{EventContext, Registry, builtin_registry};
use crate::rcon::{CommandBus, RconCliTransport, Transport};
use crate::store::{NoOpStore, TrackingStore};
use hooks::Hook;
use parking_lot::RwLock;
use process::RunDeps;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Crash reports buffered for the watchdog.
const CRASH_QUEUE_SIZE: usize = 8;

/// A point-in-time view of the supervised server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerStatus {
    pub galaxy: String,
    pub state: ServerState,
    pub run_id: Option<String>,
    pub pid: Option<u32>,
    pub cache: CacheStats,
}

/// Builder for [`Supervisor`].
pub struct SupervisorBuilder {
    config: Arc<Config>,
    registry: Option<Arc<Registry>>,
    cache: Option<Arc<GalaxyCache>>,
    bus: Option<Arc<MessageBus<BusMessage>>>,
    store: Option<Arc<dyn TrackingStore>>,
    transport: Option<Arc<dyn Transport>>,
    shutdown: Option<CancellationToken>,
}

impl SupervisorBuilder {
    pub fn registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn cache(mut self, cache: Arc<GalaxyCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn bus(mut self, bus: Arc<MessageBus<BusMessage>>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn store(mut self, store: Arc<dyn TrackingStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Replace the RCON command-line client, e.g. with a test double.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Spawn the global tasks and return the supervisor, in state `Offline`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn build(self) -> Result<Supervisor, RegistryError> {
        let config = self.config;
        let registry = match self.registry {
            Some(registry) => registry,
            None => Arc::new(builtin_registry(&config.events)?),
        };
        let cache = self.cache.unwrap_or_default();
        let bus = self
            .bus
            .unwrap_or_else(|| Arc::new(MessageBus::new(config.bus.queue_capacity)));
        let store = self.store.unwrap_or_else(|| Arc::new(NoOpStore));
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(RconCliTransport::new(&config.rcon)));
        let shutdown = self.shutdown.unwrap_or_default();

        let state = StateCell::new();
        let tasks = TaskTracker::new();
        let commands = CommandBus::spawn(
            transport,
            state.subscribe(),
            config.timeouts.command(),
            shutdown.clone(),
            &tasks,
        );
        let events = EventContext::new(
            Arc::clone(&cache),
            Arc::clone(&bus),
            commands.clone(),
            config.chat.clone(),
        );
        let (crash_tx, crash_rx) = mpsc::channel(CRASH_QUEUE_SIZE);

        let supervisor = Supervisor {
            inner: Arc::new(Inner {
                config,
                state,
                commands: commands.clone(),
                registry,
                events,
                store,
                shutdown: shutdown.clone(),
                tasks,
                lifecycle: Mutex::new(None),
                current: RwLock::new(None),
                crash_tx,
                restored: AtomicBool::new(false),
            }),
        };

        let inner = &supervisor.inner;
        inner.tasks.spawn(supervisor.clone().watchdog(crash_rx));
        inner
            .tasks
            .spawn(tasks::rcon_bridge(bus, commands, shutdown));

        Ok(supervisor)
    }
}

/// Identity of the current run, readable without the lifecycle lock.
#[derive(Debug, Clone)]
struct CurrentRun {
    id: String,
    pid: Option<u32>,
}

struct Inner {
    config: Arc<Config>,
    state: StateCell,
    commands: CommandBus,
    registry: Arc<Registry>,
    events: EventContext,
    store: Arc<dyn TrackingStore>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
    lifecycle: Mutex<Option<Run>>,
    current: RwLock<Option<CurrentRun>>,
    crash_tx: mpsc::Sender<CrashReport>,
    restored: AtomicBool,
}

/// Handle to the supervisor. Cheap to clone.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    pub fn builder(config: Arc<Config>) -> SupervisorBuilder {
        SupervisorBuilder {
            config,
            registry: None,
            cache: None,
            bus: None,
            store: None,
            transport: None,
            shutdown: None,
        }
    }

    pub fn state(&self) -> ServerState {
        self.inner.state.get()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ServerState> {
        self.inner.state.subscribe()
    }

    pub fn cache(&self) -> &Arc<GalaxyCache> {
        &self.inner.events.cache
    }

    pub fn bus(&self) -> &Arc<MessageBus<BusMessage>> {
        &self.inner.events.bus
    }

    pub fn commands(&self) -> &CommandBus {
        &self.inner.commands
    }

    pub fn status(&self) -> ServerStatus {
        let current = self.inner.current.read().clone();
        ServerStatus {
            galaxy: self.inner.config.game.galaxy.clone(),
            state: self.state(),
            run_id: current.as_ref().map(|c| c.id.clone()),
            pid: current.and_then(|c| c.pid),
            cache: self.cache().stats(),
        }
    }

    /// Start the game and wait for it to become ready.
    ///
    /// Allowed from `Offline` or `Crashed`; rejected without a state change
    /// otherwise. On failure the state is `Crashed`.
    pub async fn start(&self) -> Result<(), LifecycleError> {
        let mut slot = self.inner.lifecycle.lock().await;
        if self.state() == ServerState::Online {
            return Err(LifecycleError::AlreadyOnline);
        }
        self.start_locked(&mut slot, &[ServerState::Offline, ServerState::Crashed])
            .await
    }

    /// Save, stop and wait for the game to exit, then run the post-down hook.
    ///
    /// A no-op while `Offline`. The state is `Offline` afterwards even when
    /// the process had to be killed.
    pub async fn stop(&self) -> Result<(), LifecycleError> {
        let mut slot = self.inner.lifecycle.lock().await;
        if self.state() == ServerState::Offline {
            info!("Server is already offline");
            return Ok(());
        }
        self.inner
            .state
            .transition_from(&[ServerState::Online, ServerState::Crashed], ServerState::Stopping)?;

        info!("Stopping game server and waiting for it to exit");
        let result = self.stop_locked(&mut slot).await;
        self.inner.state.transition(ServerState::Offline)?;
        match &result {
            Ok(()) => info!("Game server stopped"),
            Err(e) => error!(error = %e, "Game server did not stop cleanly"),
        }
        result
    }

    /// Stop then start. A failed stop aborts with the state `Crashed`.
    pub async fn restart(&self) -> Result<(), LifecycleError> {
        let mut slot = self.inner.lifecycle.lock().await;
        self.inner.state.transition_from(
            &[ServerState::Online, ServerState::Crashed],
            ServerState::Restarting,
        )?;

        info!("Restarting game server");
        if let Err(e) = self.stop_locked(&mut slot).await {
            self.inner.state.transition(ServerState::Crashed)?;
            crate::metrics::record_restart(e.error_code());
            return Err(e);
        }

        let result = self.start_locked(&mut slot, &[ServerState::Restarting]).await;
        crate::metrics::record_restart(match &result {
            Ok(()) => "ok",
            Err(e) => e.error_code(),
        });
        result
    }

    /// Stop the game if it is up, then stop every task and wait for them.
    pub async fn shutdown(&self) {
        info!("Supervisor shutting down");
        // Let an in-flight start, stop or restart finish first
        drop(self.inner.lifecycle.lock().await);
        if matches!(self.state(), ServerState::Online | ServerState::Crashed)
            && let Err(e) = self.stop().await
        {
            warn!(error = %e, "Stop during shutdown failed");
        }

        self.inner.shutdown.cancel();
        if let Some(run) = self.inner.lifecycle.lock().await.take() {
            run.teardown().await;
        }
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
        info!("Supervisor stopped");
    }

    /// Run a command through the command bus and wait for its output.
    pub async fn send_command(&self, text: &str, arguments: Vec<String>) -> CommandResult {
        self.inner.commands.submit(text, arguments).await
    }

    /// Kick a player found by faction, Steam64 or Discord id, or by name.
    pub async fn kick_player(&self, reference: &str, reason: &str) -> Result<String, ActionError> {
        self.moderate(reference, reason, Moderation::Kick).await
    }

    /// Ban a player found by faction, Steam64 or Discord id, or by name.
    pub async fn ban_player(&self, reference: &str, reason: &str) -> Result<String, ActionError> {
        self.moderate(reference, reason, Moderation::Ban).await
    }

    async fn moderate(
        &self,
        reference: &str,
        reason: &str,
        action: Moderation,
    ) -> Result<String, ActionError> {
        let player = self
            .cache()
            .players
            .find_any(reference)
            .ok_or_else(|| CacheError::PlayerNotFound(reference.to_string()))?;

        let output = self
            .inner
            .commands
            .submit(action.command(), Moderation::arguments(&player.name, reason))
            .await?;
        self.bus().send(BusMessage::Log(ChatData::anonymous(
            action.log_message(&player.name, reason),
        )));
        Ok(output)
    }

    /// Map a Discord account to a player and tell the game about it.
    pub async fn link_discord(&self, faction_id: &str, discord_id: &str) -> Result<(), ActionError> {
        self.cache().players.set_discord(faction_id, discord_id)?;
        self.inner
            .commands
            .submit(
                "linkdiscordacct",
                vec![faction_id.to_string(), discord_id.to_string()],
            )
            .await?;
        if let Some(player) = self.cache().find(PlayerLookup::Faction(faction_id)) {
            self.bus()
                .send(BusMessage::Tracked(TrackedEntity::from_player(&player)));
        }
        info!(faction_id = %faction_id, "Linked Discord account");
        Ok(())
    }

    /// Query the game for player data and fold it into the cache.
    pub async fn refresh_players(&self) -> Result<RefreshSummary, CommandError> {
        refresh::refresh_players(&self.inner.commands, self.cache(), self.bus()).await
    }

    // ------------------------------------------------------------------
    // Lifecycle internals. Callers hold the lifecycle lock.
    // ------------------------------------------------------------------

    async fn start_locked(
        &self,
        slot: &mut Option<Run>,
        from: &[ServerState],
    ) -> Result<(), LifecycleError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(LifecycleError::ShuttingDown);
        }
        self.inner.state.transition_from(from, ServerState::Starting)?;
        info!(galaxy = %self.inner.config.game.galaxy, "Beginning game startup sequence");

        // Leftovers of a crashed run
        if let Some(stale) = slot.take() {
            stale.teardown().await;
            self.set_current(None);
        }

        match self.launch().await {
            Ok(run) => {
                self.set_current(Some(CurrentRun {
                    id: run.id().to_string(),
                    pid: run.pid(),
                }));
                if let Err(e) = self.inner.state.transition(ServerState::Online) {
                    // Only reachable if something else moved the state
                    run.teardown().await;
                    self.set_current(None);
                    return Err(e);
                }
                info!(run_id = %run.id(), "Game server is online");
                self.on_online(&run).await;
                *slot = Some(run);
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Game server failed to start");
                self.inner.state.transition(ServerState::Crashed)?;
                self.bus().send(BusMessage::Log(ChatData::anonymous(format!(
                    "**Server Error**: startup failed: {e}"
                ))));
                Err(e)
            }
        }
    }

    /// Pre-start hook, spawn, and wait for the readiness marker.
    async fn launch(&self) -> Result<Run, LifecycleError> {
        let config = &self.inner.config;
        hooks::run_to_completion(Hook::PreStart, config).await?;

        let mut run = Run::spawn(
            config,
            RunDeps {
                registry: Arc::clone(&self.inner.registry),
                events: self.inner.events.clone(),
                crashes: self.inner.crash_tx.clone(),
                shutdown: self.inner.shutdown.clone(),
            },
        )?;

        let readiness = config.timeouts.readiness();
        let outcome = {
            let mut exited = run.exited_watch();
            tokio::select! {
                seen = run.wait_ready() => match seen {
                    Readiness::Ready => Ok(()),
                    _ => Err(LifecycleError::StartupFailed),
                },
                _ = exited.wait_for(|e| *e) => Err(LifecycleError::ExitedDuringStartup),
                _ = tokio::time::sleep(readiness) => {
                    Err(LifecycleError::ReadinessTimeout(readiness.as_secs()))
                }
                _ = self.inner.shutdown.cancelled() => Err(LifecycleError::ShuttingDown),
            }
        };

        match outcome {
            Ok(()) => Ok(run),
            Err(e) => {
                run.mark_stopping();
                run.teardown().await;
                Err(e)
            }
        }
    }

    /// Work done once a run is ready: hooks, snapshot replay and run tasks.
    async fn on_online(&self, run: &Run) {
        let config = &self.inner.config;
        hooks::spawn_detached(
            Hook::PostUp,
            config,
            run.feed(),
            run.cancel_token().clone(),
            run.tracker(),
        );

        if !self.inner.restored.swap(true, Ordering::AcqRel) {
            match self.inner.store.load_snapshot().await {
                Ok(snapshot) => {
                    let stats = self.cache().restore(snapshot);
                    info!(?stats, "Replayed tracking snapshot");
                }
                Err(e) => error!(error = %e, "Failed to load tracking snapshot"),
            }
        }

        run.tracker().spawn(
            tasks::HealthCheck {
                run_id: run.id().to_string(),
                interval: config.timeouts.health_interval(),
                response: config.timeouts.health_response(),
                commands: self.inner.commands.clone(),
                state: self.subscribe_state(),
                crashes: self.inner.crash_tx.clone(),
                cancel: run.cancel_token().clone(),
            }
            .run(),
        );
        run.tracker().spawn(tasks::refresh_loop(
            config.timeouts.refresh_interval(),
            self.inner.commands.clone(),
            Arc::clone(self.cache()),
            Arc::clone(self.bus()),
            run.cancel_token().clone(),
        ));
    }

    /// Save and stop the game, wait for it, tear the run down, run post-down.
    async fn stop_locked(&self, slot: &mut Option<Run>) -> Result<(), LifecycleError> {
        let config = &self.inner.config;
        let result = match slot.take() {
            Some(mut run) => {
                run.mark_stopping();
                let result = if run.has_exited() {
                    Ok(())
                } else {
                    self.request_stop(&run);
                    if run.wait_exit(config.timeouts.stop()).await {
                        Ok(())
                    } else {
                        warn!("Game server took too long to exit, killing it");
                        Err(LifecycleError::StopTimeout)
                    }
                };
                run.teardown().await;
                self.set_current(None);
                result
            }
            None => Ok(()),
        };

        if let Err(e) = hooks::run_to_completion(Hook::PostDown, config).await {
            error!(error = %e, "Post-down hook failed");
        }
        result
    }

    /// Send `save` then `stop` in the background; kill if the game cannot take them.
    fn request_stop(&self, run: &Run) {
        let commands = self.inner.commands.clone();
        let cancel = run.cancel_token().clone();
        let kill = run.killer();
        run.tracker().spawn(async move {
            let sequence = async {
                commands.submit("save", Vec::new()).await?;
                commands.submit("stop", Vec::new()).await
            };
            tokio::select! {
                _ = cancel.cancelled() => {}
                result = sequence => if let Err(e) = result {
                    warn!(error = %e, "Graceful stop failed, killing the game process");
                    kill.cancel();
                },
            }
        });
    }

    fn set_current(&self, current: Option<CurrentRun>) {
        *self.inner.current.write() = current;
    }

    fn is_current(&self, run_id: &str) -> bool {
        self.inner
            .current
            .read()
            .as_ref()
            .is_some_and(|c| c.id == run_id)
    }

    async fn watchdog(self, mut reports: mpsc::Receiver<CrashReport>) {
        let shutdown = self.inner.shutdown.clone();
        loop {
            let report = tokio::select! {
                _ = shutdown.cancelled() => break,
                report = reports.recv() => match report {
                    Some(report) => report,
                    None => break,
                },
            };
            self.handle_crash(report).await;
        }
        debug!("Watchdog stopped");
    }

    async fn handle_crash(&self, report: CrashReport) {
        if !self.is_current(&report.run_id) {
            debug!(run_id = %report.run_id, "Ignoring crash report from a finished run");
            return;
        }
        if self
            .inner
            .state
            .transition_from(&[ServerState::Online], ServerState::Crashed)
            .is_err()
        {
            debug!(state = %self.state(), "Ignoring crash report outside Online");
            return;
        }

        error!(reason = %report.reason, "Game server crashed");
        crate::metrics::record_crash();
        self.bus().send(BusMessage::Log(ChatData::anonymous(format!(
            "**Server Error**: {}. Attempting a restart.",
            report.reason
        ))));

        match self.restart().await {
            Ok(()) => info!("Game server recovered after crash"),
            Err(e) => {
                error!(error = %e, "Restart after crash failed; server left crashed");
                self.bus().send(BusMessage::Log(ChatData::anonymous(format!(
                    "**Server Error**: restart failed: {e}. Manual intervention required."
                ))));
            }
        }
    }
}
