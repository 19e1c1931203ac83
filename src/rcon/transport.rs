//! How a command reaches the game.
//!
//! The wire protocol lives in an external client binary that is invoked once
//! per command; [`Transport`] is the seam that lets tests substitute it.

use async_trait::async_trait;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;

use crate::config::RconConfig;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to launch rcon client: {0}")]
    Launch(#[source] std::io::Error),

    #[error("rcon client exited with {status}: {output}")]
    Failed { status: String, output: String },
}

/// Delivers one command and returns its raw output.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, command: &str) -> Result<String, TransportError>;
}

/// Runs `<binary> -H <address> -p <port> -P <password> <command>`.
#[derive(Debug, Clone)]
pub struct RconCliTransport {
    binary: String,
    address: String,
    port: u16,
    password: String,
}

impl RconCliTransport {
    pub fn new(config: &RconConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            address: config.address.clone(),
            port: config.port,
            password: config.password.clone(),
        }
    }
}

#[async_trait]
impl Transport for RconCliTransport {
    async fn execute(&self, command: &str) -> Result<String, TransportError> {
        let output = Command::new(&self.binary)
            .arg("-H")
            .arg(&self.address)
            .arg("-p")
            .arg(self.port.to_string())
            .arg("-P")
            .arg(&self.password)
            .arg(command)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(TransportError::Launch)?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = if stderr.trim().is_empty() {
                stdout
            } else {
                stderr.into_owned()
            };
            return Err(TransportError::Failed {
                status: output.status.to_string(),
                output: detail.trim_end().to_string(),
            });
        }
        Ok(stdout)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn config(binary: &str) -> RconConfig {
        RconConfig {
            binary: binary.to_string(),
            address: "127.0.0.1".to_string(),
            port: 27015,
            password: "secret".to_string(),
        }
    }

    #[tokio::test]
    async fn passes_connection_flags_and_command() {
        let transport = RconCliTransport::new(&config("/bin/echo"));
        let output = transport.execute("say hello there").await.unwrap();
        assert_eq!(output, "-H 127.0.0.1 -p 27015 -P secret say hello there\n");
    }

    #[tokio::test]
    async fn non_zero_exit_is_a_failure() {
        let transport = RconCliTransport::new(&config("/bin/false"));
        assert!(matches!(
            transport.execute("status").await,
            Err(TransportError::Failed { .. })
        ));
    }

    #[tokio::test]
    async fn missing_binary_is_a_launch_failure() {
        let transport = RconCliTransport::new(&config("/nonexistent/rcon"));
        assert!(matches!(
            transport.execute("status").await,
            Err(TransportError::Launch(_))
        ));
    }
}
