//! Telemetry utilities for command timing and log spans.

use std::time::Instant;

/// Guard for timing an RCON command and recording its latency.
///
/// Records when dropped, so early returns and timeouts are measured too.
pub struct CommandTimer {
    command: String,
    start: Instant,
}

impl CommandTimer {
    /// Start timing a command.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            start: Instant::now(),
        }
    }
}

impl Drop for CommandTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        crate::metrics::record_command_latency(&self.command, duration);
    }
}

/// Standardized span constructors.
pub mod spans {
    use tracing::{Span, info_span};

    /// Span covering one run of the game process, from spawn to teardown.
    pub fn run(run_id: &str, galaxy: &str) -> Span {
        info_span!("run", run_id = %run_id, galaxy = %galaxy)
    }

    /// Span for a hook script invocation.
    pub fn hook(name: &str) -> Span {
        info_span!("hook", hook = %name)
    }
}
