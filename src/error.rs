//! Unified error handling for galaxyd.
//!
//! This module provides the error hierarchy shared by the supervisor, the
//! command bus, the entity cache and the event registry, with static codes
//! for metric labeling.

use crate::server::ServerState;
use thiserror::Error;

// ============================================================================
// Command Errors (RCON command bus)
// ============================================================================

/// Errors returned to callers of the command bus.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// Empty commands destabilize the game process and are never sent.
    #[error("refusing to send an empty command")]
    EmptyCommand,

    #[error("server is currently offline")]
    ServerOffline,

    /// The transport could not be launched or exited unsuccessfully.
    #[error("failed to run command `{command}`: {reason}")]
    Invocation { command: String, reason: String },

    /// The game rejected the command; the output is preserved.
    #[error("invalid rcon command: {command}")]
    Invalid { command: String, output: String },

    #[error("command `{0}` timed out before it could complete")]
    TimedOut(String),

    #[error("command queue is full")]
    QueueFull,

    #[error("command bus is closed")]
    BusClosed,
}

impl CommandError {
    /// Get a static error code string for metrics labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::EmptyCommand => "empty_command",
            Self::ServerOffline => "server_offline",
            Self::Invocation { .. } => "invocation_failed",
            Self::Invalid { .. } => "invalid_command",
            Self::TimedOut(_) => "timed_out",
            Self::QueueFull => "queue_full",
            Self::BusClosed => "bus_closed",
        }
    }

    /// Output captured from the transport, if the error carries any.
    pub fn output(&self) -> Option<&str> {
        match self {
            Self::Invalid { output, .. } => Some(output),
            _ => None,
        }
    }
}

/// Result type for command bus submissions.
pub type CommandResult = Result<String, CommandError>;

// ============================================================================
// Lifecycle Errors (process supervision)
// ============================================================================

/// Errors raised while starting, stopping or restarting the game process.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("illegal state transition: {from} -> {to}")]
    IllegalTransition { from: ServerState, to: ServerState },

    #[error("server is already online")]
    AlreadyOnline,

    #[error("the game binary failed to start: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("the game process exited before initialization could complete")]
    ExitedDuringStartup,

    #[error("the game process reported a failed startup")]
    StartupFailed,

    #[error("the game process took over {0} seconds to start")]
    ReadinessTimeout(u64),

    #[error("the game process took too long to exit and had to be killed")]
    StopTimeout,

    #[error("health check failed: {0}")]
    HealthCheck(#[source] CommandError),

    #[error("hook `{hook}` failed: {reason}")]
    Hook { hook: String, reason: String },

    #[error("supervisor is shutting down")]
    ShuttingDown,
}

impl LifecycleError {
    /// Get a static error code string for metrics labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::IllegalTransition { .. } => "illegal_transition",
            Self::AlreadyOnline => "already_online",
            Self::Spawn(_) => "spawn_failed",
            Self::ExitedDuringStartup => "exited_during_startup",
            Self::StartupFailed => "startup_failed",
            Self::ReadinessTimeout(_) => "readiness_timeout",
            Self::StopTimeout => "stop_timeout",
            Self::HealthCheck(_) => "health_check",
            Self::Hook { .. } => "hook_failed",
            Self::ShuttingDown => "shutting_down",
        }
    }
}

// ============================================================================
// Cache Errors (entity validation)
// ============================================================================

/// Validation errors from the entity cache.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("faction ID string is empty")]
    EmptyFactionId,

    #[error("Steam64 ID string is empty")]
    EmptySteamId,

    #[error("name is empty")]
    EmptyName,

    #[error("invalid Steam64 ID string: {0}")]
    MalformedSteamId(String),

    #[error("Discord user {0} is already mapped to a player")]
    DiscordMapped(String),

    #[error("Steam64 ID {steam64_id} already belongs to faction {faction_id}")]
    SteamMapped {
        steam64_id: String,
        faction_id: String,
    },

    #[error("cannot locate player from reference: {0}")]
    PlayerNotFound(String),
}

impl CacheError {
    /// Get a static error code string for metrics labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::EmptyFactionId => "empty_faction_id",
            Self::EmptySteamId => "empty_steam_id",
            Self::EmptyName => "empty_name",
            Self::MalformedSteamId(_) => "malformed_steam_id",
            Self::DiscordMapped(_) => "discord_mapped",
            Self::SteamMapped { .. } => "steam_mapped",
            Self::PlayerNotFound(_) => "player_not_found",
        }
    }
}

// ============================================================================
// Registry Errors (event registration)
// ============================================================================

/// Registration errors. These indicate a configuration defect and abort startup.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("event does not have a valid name")]
    EmptyName,

    #[error("event `{0}` is already registered")]
    DuplicateName(String),

    #[error("pattern `{pattern}` is already registered by `{existing}`")]
    DuplicatePattern { pattern: String, existing: String },

    #[error("invalid pattern for `{name}`: {source}")]
    InvalidPattern {
        name: String,
        #[source]
        source: regex::Error,
    },
}

// ============================================================================
// Event Errors (handler failures on untrusted input)
// ============================================================================

/// Errors a handler may report for a single log line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventError {
    #[error("rule `{rule}` expected capture group {index}")]
    MissingCapture { rule: String, index: usize },

    #[error("rule `{rule}` captured an invalid value: {value}")]
    InvalidCapture { rule: String, value: String },

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Command(#[from] CommandError),
}

impl EventError {
    /// Get a static error code string for metrics labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::MissingCapture { .. } => "missing_capture",
            Self::InvalidCapture { .. } => "invalid_capture",
            Self::Cache(e) => e.error_code(),
            Self::Command(e) => e.error_code(),
        }
    }
}

/// Result type for event handlers.
pub type HandlerResult = Result<(), EventError>;

// ============================================================================
// Action Errors (operator actions on players)
// ============================================================================

/// Failure of a moderation or account-linking action.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Command(#[from] CommandError),
}

impl ActionError {
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Cache(e) => e.error_code(),
            Self::Command(e) => e.error_code(),
        }
    }
}
