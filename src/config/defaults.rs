//! Default value functions for configuration.
//!
//! Separated into its own module for clarity and reuse.

use rand::Rng;
use rand::distributions::Alphanumeric;

// =============================================================================
// Game Defaults
// =============================================================================

pub fn default_readiness_marker() -> String {
    "Server startup complete.".to_string()
}

pub fn default_failure_marker() -> String {
    "Server startup FAILED.".to_string()
}

// =============================================================================
// RCON Defaults
// =============================================================================

pub fn default_rcon_binary() -> String {
    "/usr/local/bin/rcon".to_string()
}

pub fn default_rcon_address() -> String {
    "127.0.0.1".to_string()
}

pub fn default_rcon_port() -> u16 {
    27015
}

/// A fresh random password per process; the game is launched with it, so it
/// never has to be shared with anything outside this daemon.
pub fn default_rcon_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

// =============================================================================
// Timeout Defaults (seconds)
// =============================================================================

pub fn default_readiness_timeout() -> u64 {
    300
}

pub fn default_health_interval() -> u64 {
    300
}

pub fn default_health_response() -> u64 {
    60
}

pub fn default_stop_timeout() -> u64 {
    300
}

pub fn default_hook_grace() -> u64 {
    60
}

pub fn default_command_timeout() -> u64 {
    30
}

pub fn default_refresh_interval() -> u64 {
    3600
}

// =============================================================================
// Chat / Bus Defaults
// =============================================================================

pub fn default_chat_max_length() -> usize {
    2000
}

pub fn default_chat_truncate_to() -> usize {
    1900
}

pub fn default_queue_capacity() -> usize {
    64
}

// =============================================================================
// Logging / Metrics Defaults
// =============================================================================

pub fn default_log_level() -> String {
    "info".to_string()
}

pub fn default_metrics_port() -> u16 {
    9090
}
