//! Topics and payloads carried on the application bus.

use crate::cache::{JumpEvent, TrackedEntity};
use std::fmt;

/// Topics the daemon publishes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Commands to forward into the command bus.
    Rcon,
    /// Player chat for the chat bridge.
    ChatOutbound,
    /// Operator-facing log messages.
    LogOutbound,
    /// Discord account link requests from players.
    IntegrationRequest,
    /// Entity and jump updates for the persistence task.
    Tracking,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rcon => "rcon",
            Self::ChatOutbound => "chat-outbound",
            Self::LogOutbound => "log-outbound",
            Self::IntegrationRequest => "integration-request",
            Self::Tracking => "tracking",
        }
    }
}

impl AsRef<str> for Topic {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A chat or log line, with the author's display name and optional id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatData {
    pub name: String,
    pub uid: String,
    pub msg: String,
}

impl ChatData {
    pub fn new(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uid: String::new(),
            msg: msg.into(),
        }
    }

    /// A message with no author, as used for operator log lines.
    pub fn anonymous(msg: impl Into<String>) -> Self {
        Self::new(String::new(), msg)
    }
}

/// A command destined for the game's RCON interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RconMessage {
    pub command: String,
    pub arguments: Vec<String>,
}

/// A player's request to link their Discord account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrationRequest {
    pub faction_id: String,
    pub pin: String,
}

/// Payloads carried on the application bus.
#[derive(Debug, Clone)]
pub enum BusMessage {
    Rcon(RconMessage),
    Chat(ChatData),
    Log(ChatData),
    Integration(IntegrationRequest),
    Tracked(TrackedEntity),
    Jump(JumpEvent),
}

impl BusMessage {
    /// The topic a message of this kind belongs on.
    pub fn topic(&self) -> Topic {
        match self {
            Self::Rcon(_) => Topic::Rcon,
            Self::Chat(_) => Topic::ChatOutbound,
            Self::Log(_) => Topic::LogOutbound,
            Self::Integration(_) => Topic::IntegrationRequest,
            Self::Tracked(_) | Self::Jump(_) => Topic::Tracking,
        }
    }
}

impl super::MessageBus<BusMessage> {
    /// Publish a message on the topic its kind belongs to.
    pub fn send(&self, message: BusMessage) -> usize {
        let topic = message.topic();
        self.publish(topic, message)
    }
}
