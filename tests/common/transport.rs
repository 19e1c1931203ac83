//! Recording RCON transport.

use async_trait::async_trait;
use galaxyd::rcon::{Transport, TransportError};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Stands in for the RCON client.
///
/// `stop` creates the fake game's stop file, `status` can be made to fail,
/// and `playerinfo` answers with canned output. Everything is recorded.
#[derive(Default)]
pub struct MockTransport {
    pub commands: Mutex<Vec<String>>,
    pub stop_file: Option<PathBuf>,
    pub delay: Duration,
    pub fail_status: AtomicBool,
    pub playerinfo: Mutex<String>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockTransport {
    pub fn new(stop_file: PathBuf) -> Self {
        Self {
            stop_file: Some(stop_file),
            ..Self::default()
        }
    }

    #[allow(dead_code)]
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().clone()
    }

    /// Highest number of commands ever executing at the same time.
    #[allow(dead_code)]
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn execute(&self, command: &str) -> Result<String, TransportError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.commands.lock().push(command.to_string());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let verb = command.split_whitespace().next().unwrap_or("");
        let result = match verb {
            "stop" => match &self.stop_file {
                Some(path) => std::fs::write(path, "")
                    .map(|_| "Shutting down".to_string())
                    .map_err(TransportError::Launch),
                None => Ok("Shutting down".to_string()),
            },
            "status" if self.fail_status.load(Ordering::SeqCst) => Err(TransportError::Failed {
                status: "exit status: 1".to_string(),
                output: "connection refused".to_string(),
            }),
            "playerinfo" => Ok(self.playerinfo.lock().clone()),
            "frobnicate" => Ok("Unknown command: frobnicate".to_string()),
            _ => Ok(String::new()),
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
