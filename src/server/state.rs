//! Server lifecycle states and the legal transitions between them.
//!
//! ```text
//! Offline ──► Starting ──► Online ──► Stopping ──► Offline
//!                │           │  └───► Restarting ──► Starting
//!                ▼           ▼
//!             Crashed ◄──────┘  (also reachable from Stopping / Restarting)
//!                │
//!                └──► Restarting | Starting | Stopping | Offline
//! ```

use crate::error::LifecycleError;
use std::fmt;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ServerState {
    #[default]
    Offline,
    Starting,
    Online,
    Stopping,
    Restarting,
    Crashed,
}

impl ServerState {
    /// Whether `self -> next` is a documented edge.
    pub fn can_transition(self, next: ServerState) -> bool {
        use ServerState::*;
        matches!(
            (self, next),
            (Offline, Starting)
                | (Starting, Online | Crashed)
                | (Online, Stopping | Restarting | Crashed)
                | (Stopping, Offline | Crashed)
                | (Restarting, Starting | Crashed)
                | (Crashed, Restarting | Starting | Stopping | Offline)
        )
    }

    /// Commands are rejected in these states without reaching the transport.
    pub fn accepts_commands(self) -> bool {
        !matches!(self, ServerState::Offline | ServerState::Starting)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Offline => "Offline",
            Self::Starting => "Starting",
            Self::Online => "Online",
            Self::Stopping => "Stopping",
            Self::Restarting => "Restarting",
            Self::Crashed => "Crashed",
        }
    }

    /// Numeric value exported as the state gauge.
    pub fn as_gauge(self) -> i64 {
        match self {
            Self::Offline => 0,
            Self::Starting => 1,
            Self::Online => 2,
            Self::Stopping => 3,
            Self::Restarting => 4,
            Self::Crashed => 5,
        }
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single owner of the lifecycle state.
///
/// Transitions are validated and applied atomically inside the watch
/// channel's lock, so every observer sees each accepted state.
#[derive(Debug)]
pub struct StateCell {
    tx: watch::Sender<ServerState>,
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

impl StateCell {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ServerState::Offline);
        Self { tx }
    }

    pub fn get(&self) -> ServerState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ServerState> {
        self.tx.subscribe()
    }

    /// Move to `next` if the edge is legal. On failure the state is unchanged.
    pub fn transition(&self, next: ServerState) -> Result<ServerState, LifecycleError> {
        let mut outcome = Err(LifecycleError::IllegalTransition {
            from: ServerState::Offline,
            to: next,
        });
        self.tx.send_if_modified(|current| {
            let from = *current;
            if from.can_transition(next) {
                *current = next;
                outcome = Ok(from);
                true
            } else {
                outcome = Err(LifecycleError::IllegalTransition { from, to: next });
                false
            }
        });
        if outcome.is_ok() {
            crate::metrics::set_server_state(next);
        }
        outcome
    }

    /// Move to `next` only from one of `from`. Returns the previous state.
    pub fn transition_from(
        &self,
        from: &[ServerState],
        next: ServerState,
    ) -> Result<ServerState, LifecycleError> {
        let mut outcome = Err(LifecycleError::IllegalTransition {
            from: ServerState::Offline,
            to: next,
        });
        self.tx.send_if_modified(|current| {
            let prev = *current;
            if from.contains(&prev) && prev.can_transition(next) {
                *current = next;
                outcome = Ok(prev);
                true
            } else {
                outcome = Err(LifecycleError::IllegalTransition { from: prev, to: next });
                false
            }
        });
        if outcome.is_ok() {
            crate::metrics::set_server_state(next);
        }
        outcome
    }
}
