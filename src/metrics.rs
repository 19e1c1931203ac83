//! Prometheus metrics collection for galaxyd.
//!
//! Exposed on an HTTP endpoint (see [`crate::http`]). Every recorder is a
//! no-op until [`init`] has run, so library code and tests can call them
//! unconditionally.
//!
//! - `galaxyd_commands_total{command, outcome}` - RCON commands by result
//! - `galaxyd_command_duration_seconds{command}` - RCON round-trip latency
//! - `galaxyd_events_total{rule}` - Log lines dispatched per rule
//! - `galaxyd_event_errors_total{rule, error}` - Handler failures
//! - `galaxyd_crashes_total` / `galaxyd_restarts_total{result}`
//! - `galaxyd_server_state` - Lifecycle state as a number
//! - `galaxyd_players_online`

use crate::server::ServerState;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

pub fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

// ========================================================================
// Counters (monotonic increasing)
// ========================================================================

/// RCON commands by verb and outcome (`ok` or an error code).
pub static COMMANDS: OnceLock<IntCounterVec> = OnceLock::new();

/// Log lines dispatched, by matching rule.
pub static EVENTS: OnceLock<IntCounterVec> = OnceLock::new();

/// Handler failures by rule and error code.
pub static EVENT_ERRORS: OnceLock<IntCounterVec> = OnceLock::new();

/// Detected crashes of the game process.
pub static CRASHES: OnceLock<IntCounter> = OnceLock::new();

/// Restarts by result (`ok` or an error code).
pub static RESTARTS: OnceLock<IntCounterVec> = OnceLock::new();

// ========================================================================
// Gauges (can increase/decrease)
// ========================================================================

pub static SERVER_STATE: OnceLock<IntGauge> = OnceLock::new();

pub static PLAYERS_ONLINE: OnceLock<IntGauge> = OnceLock::new();

// ========================================================================
// Histograms
// ========================================================================

/// RCON round-trip latency by verb.
pub static COMMAND_LATENCY: OnceLock<HistogramVec> = OnceLock::new();

/// Initialize the Prometheus metrics registry.
///
/// Must be called once at startup before any metrics are recorded.
pub fn init() {
    let r = registry();

    macro_rules! register {
        ($metric:ident, $init:expr) => {
            match $init {
                Ok(m) => {
                    if let Err(e) = r.register(Box::new(m.clone())) {
                        tracing::warn!(error = %e, concat!("Failed to register metric ", stringify!($metric)));
                    }
                    let _ = $metric.set(m);
                }
                Err(e) => {
                    tracing::error!(error = %e, concat!("Failed to create metric ", stringify!($metric)));
                }
            }
        };
    }

    register!(COMMANDS, IntCounterVec::new(Opts::new("galaxyd_commands_total", "RCON commands by verb and outcome"), &["command", "outcome"]));
    register!(EVENTS, IntCounterVec::new(Opts::new("galaxyd_events_total", "Log lines dispatched by rule"), &["rule"]));
    register!(EVENT_ERRORS, IntCounterVec::new(Opts::new("galaxyd_event_errors_total", "Event handler failures"), &["rule", "error"]));
    register!(CRASHES, IntCounter::new("galaxyd_crashes_total", "Detected game process crashes"));
    register!(RESTARTS, IntCounterVec::new(Opts::new("galaxyd_restarts_total", "Restarts by result"), &["result"]));
    register!(SERVER_STATE, IntGauge::new("galaxyd_server_state", "Lifecycle state (0=Offline 1=Starting 2=Online 3=Stopping 4=Restarting 5=Crashed)"));
    register!(PLAYERS_ONLINE, IntGauge::new("galaxyd_players_online", "Players currently online"));
    register!(COMMAND_LATENCY, HistogramVec::new(
        HistogramOpts::new("galaxyd_command_duration_seconds", "RCON command latency by verb")
            .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0, 30.0]),
        &["command"]));
}

/// Gather all metrics and encode them in Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = registry().gather();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode Prometheus metrics");
        return String::new();
    }
    match String::from_utf8(buffer) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "Prometheus metrics were not valid UTF-8");
            String::new()
        }
    }
}

// ============================================================================
// Recorders
// ============================================================================

/// Record the latency of one RCON command.
#[inline]
pub fn record_command_latency(command: &str, duration_secs: f64) {
    if let Some(h) = COMMAND_LATENCY.get() {
        h.with_label_values(&[command]).observe(duration_secs);
    }
}

#[inline]
pub fn record_command_outcome(command: &str, outcome: &str) {
    if let Some(c) = COMMANDS.get() {
        c.with_label_values(&[command, outcome]).inc();
    }
}

#[inline]
pub fn record_event(rule: &str) {
    if let Some(c) = EVENTS.get() {
        c.with_label_values(&[rule]).inc();
    }
}

#[inline]
pub fn record_event_error(rule: &str, error: &str) {
    if let Some(c) = EVENT_ERRORS.get() {
        c.with_label_values(&[rule, error]).inc();
    }
}

#[inline]
pub fn record_crash() {
    if let Some(c) = CRASHES.get() {
        c.inc();
    }
}

#[inline]
pub fn record_restart(result: &str) {
    if let Some(c) = RESTARTS.get() {
        c.with_label_values(&[result]).inc();
    }
}

#[inline]
pub fn set_server_state(state: ServerState) {
    if let Some(g) = SERVER_STATE.get() {
        g.set(state.as_gauge());
    }
}

#[inline]
pub fn set_players_online(count: usize) {
    if let Some(g) = PLAYERS_ONLINE.get() {
        g.set(count as i64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_lifecycle() {
        init();

        record_command_outcome("status", "ok");
        record_command_latency("status", 0.01);
        record_event("EventPlayerJoin");
        set_server_state(ServerState::Online);

        let output = gather_metrics();
        assert!(output.contains("galaxyd_commands_total"));
        assert!(output.contains("galaxyd_events_total"));
        assert!(output.contains("galaxyd_server_state"));
    }
}
