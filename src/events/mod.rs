//! Log-line event registry and dispatcher.
//!
//! Every line the game prints is matched against an ordered list of rules.
//! The first rule that matches handles the line; a catch-all registered last
//! makes sure every line is at least logged.
//!
//! - [`registry`]: the rule table and dispatch loop
//! - [`handlers`]: the built-in rules for the game's log formats
//! - [`configured`]: operator-defined rules from `[[events]]`

pub mod configured;
pub mod handlers;
pub mod registry;

pub use handlers::{EVENT_NONE, builtin_registry};
pub use registry::{EventMatch, EventRule, Handler, Registry, Severity, from_fn};

use crate::bus::{BusMessage, MessageBus};
use crate::cache::GalaxyCache;
use crate::config::ChatConfig;
use crate::rcon::CommandBus;
use std::sync::Arc;

/// Everything a handler may touch.
#[derive(Clone)]
pub struct EventContext {
    pub cache: Arc<GalaxyCache>,
    pub bus: Arc<MessageBus<BusMessage>>,
    pub commands: CommandBus,
    pub chat: ChatConfig,
}

impl EventContext {
    pub fn new(
        cache: Arc<GalaxyCache>,
        bus: Arc<MessageBus<BusMessage>>,
        commands: CommandBus,
        chat: ChatConfig,
    ) -> Self {
        Self {
            cache,
            bus,
            commands,
            chat,
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::rcon::{Transport, TransportError};
    use crate::server::ServerState;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::time::Duration;
    use tokio::sync::watch;
    use tokio_util::sync::CancellationToken;
    use tokio_util::task::TaskTracker;

    /// Transport that records commands and answers with an empty string.
    #[derive(Default)]
    pub struct Sink {
        pub commands: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Transport for Sink {
        async fn execute(&self, command: &str) -> Result<String, TransportError> {
            self.commands.lock().push(command.to_string());
            Ok(String::new())
        }
    }

    /// A context whose command bus is online and records into the returned sink.
    pub fn context_with_sink() -> (EventContext, Arc<Sink>, watch::Sender<ServerState>) {
        let sink = Arc::new(Sink::default());
        let (state_tx, state_rx) = watch::channel(ServerState::Online);
        let commands = CommandBus::spawn(
            sink.clone(),
            state_rx,
            Duration::from_secs(5),
            CancellationToken::new(),
            &TaskTracker::new(),
        );
        let ctx = EventContext::new(
            Arc::new(GalaxyCache::new()),
            Arc::new(MessageBus::new(64)),
            commands,
            ChatConfig::default(),
        );
        (ctx, sink, state_tx)
    }

    pub fn context() -> EventContext {
        context_with_sink().0
    }
}
