//! Serialized command bus into the game's RCON interface.
//!
//! # Architecture
//!
//! - **Single consumer**: one actor task owns the [`Transport`] and executes
//!   requests strictly one at a time, in submission order.
//! - **Message passing**: callers hold a cloneable [`CommandBus`] and send
//!   [`CommandRequest`]s; each carries an optional `oneshot` reply.
//! - **Gating**: the actor reads the lifecycle state through a `watch`
//!   receiver and refuses to run commands while the server is not up.

mod transport;

pub use transport::{RconCliTransport, Transport, TransportError};

use crate::error::{CommandError, CommandResult};
use crate::server::ServerState;
use crate::telemetry::CommandTimer;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Bounded depth of the request queue.
pub const COMMAND_QUEUE_SIZE: usize = 256;

/// Game output that marks a rejected command.
const UNKNOWN_COMMAND_PREFIX: &str = "Unknown command: ";

/// A queued command.
#[derive(Debug)]
pub struct CommandRequest {
    pub text: String,
    pub arguments: Vec<String>,
    /// `None` for fire-and-forget submissions.
    pub reply: Option<oneshot::Sender<CommandResult>>,
}

impl CommandRequest {
    /// The command line as sent to the transport.
    pub fn render(&self) -> String {
        render(&self.text, &self.arguments)
    }
}

fn render(text: &str, arguments: &[String]) -> String {
    let mut command = text.trim().to_string();
    for arg in arguments {
        command.push(' ');
        command.push_str(arg);
    }
    command
}

/// First word of a command, used as a low-cardinality metric label.
fn verb(command: &str) -> &str {
    command.split_whitespace().next().unwrap_or("")
}

/// Handle for submitting commands.
#[derive(Debug, Clone)]
pub struct CommandBus {
    tx: mpsc::Sender<CommandRequest>,
}

impl CommandBus {
    /// Spawn the consumer actor on `tracker` and return its handle.
    pub fn spawn(
        transport: Arc<dyn Transport>,
        state: watch::Receiver<ServerState>,
        timeout: Duration,
        shutdown: CancellationToken,
        tracker: &TaskTracker,
    ) -> Self {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_SIZE);
        let actor = CommandBusActor {
            rx,
            transport,
            state,
            timeout,
            shutdown,
        };
        tracker.spawn(actor.run());
        Self { tx }
    }

    /// Submit a command and wait for its result.
    pub async fn submit(
        &self,
        text: impl Into<String>,
        arguments: Vec<String>,
    ) -> CommandResult {
        let (reply, rx) = oneshot::channel();
        let request = CommandRequest {
            text: text.into(),
            arguments,
            reply: Some(reply),
        };
        self.tx
            .send(request)
            .await
            .map_err(|_| CommandError::BusClosed)?;
        rx.await.map_err(|_| CommandError::BusClosed)?
    }

    /// Queue a command without waiting. Never blocks; the response is discarded.
    pub fn submit_detached(
        &self,
        text: impl Into<String>,
        arguments: Vec<String>,
    ) -> Result<(), CommandError> {
        let request = CommandRequest {
            text: text.into(),
            arguments,
            reply: None,
        };
        self.tx.try_send(request).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => CommandError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => CommandError::BusClosed,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// The consumer side. Owns the transport; runs one command at a time.
struct CommandBusActor {
    rx: mpsc::Receiver<CommandRequest>,
    transport: Arc<dyn Transport>,
    state: watch::Receiver<ServerState>,
    timeout: Duration,
    shutdown: CancellationToken,
}

impl CommandBusActor {
    async fn run(mut self) {
        loop {
            let request = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                request = self.rx.recv() => match request {
                    Some(request) => request,
                    None => break,
                },
            };
            self.handle(request).await;
        }

        // Anything still queued gets a definite answer.
        self.rx.close();
        while let Ok(request) = self.rx.try_recv() {
            if let Some(reply) = request.reply {
                let _ = reply.send(Err(CommandError::BusClosed));
            }
        }
        info!("Command bus stopped");
    }

    async fn handle(&self, request: CommandRequest) {
        let command = request.render();
        let result = self.execute(&command).await;

        crate::metrics::record_command_outcome(
            verb(&command),
            match &result {
                Ok(_) => "ok",
                Err(e) => e.error_code(),
            },
        );

        match request.reply {
            Some(reply) => {
                if reply.send(result).is_err() {
                    debug!(command = %verb(&command), "Command caller went away, response discarded");
                }
            }
            None => {
                if let Err(e) = result {
                    warn!(command = %verb(&command), error = %e, "Detached command failed");
                }
            }
        }
    }

    async fn execute(&self, command: &str) -> CommandResult {
        if command.trim().is_empty() {
            return Err(CommandError::EmptyCommand);
        }
        let state = *self.state.borrow();
        if !state.accepts_commands() {
            return Err(CommandError::ServerOffline);
        }

        let _timer = CommandTimer::new(verb(command));
        debug!(command = %verb(command), "Executing rcon command");

        match tokio::time::timeout(self.timeout, self.transport.execute(command)).await {
            Err(_) => Err(CommandError::TimedOut(command.to_string())),
            Ok(Err(e)) => Err(CommandError::Invocation {
                command: command.to_string(),
                reason: e.to_string(),
            }),
            Ok(Ok(output)) if output.starts_with(UNKNOWN_COMMAND_PREFIX) => {
                Err(CommandError::Invalid {
                    command: command.to_string(),
                    output: output.trim_end().to_string(),
                })
            }
            Ok(Ok(output)) => Ok(output.trim_end_matches(['\r', '\n']).to_string()),
        }
    }
}
