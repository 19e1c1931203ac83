//! Core configuration types and loading.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use super::defaults::*;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Daemon configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Game installation and galaxy selection.
    pub game: GameConfig,
    /// RCON endpoint the game is started with.
    #[serde(default)]
    pub rcon: RconConfig,
    /// Lifecycle and command timeouts.
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    /// Optional operator hook scripts.
    #[serde(default)]
    pub hooks: HooksConfig,
    /// Chat forwarding limits.
    #[serde(default)]
    pub chat: ChatConfig,
    /// Message bus tuning.
    #[serde(default)]
    pub bus: BusConfig,
    /// Database configuration. Tracking is in-memory only when absent.
    pub database: Option<DatabaseConfig>,
    /// Log output configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Prometheus endpoint configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// Operator-defined log events, matched after the built-in rules.
    #[serde(default)]
    pub events: Vec<EventConfig>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }
}

/// Game installation and galaxy configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct GameConfig {
    /// Root of the dedicated server installation. Used as the working directory.
    pub install_path: PathBuf,
    /// Server binary. Defaults to `<install_path>/bin/AvorionServer`.
    pub executable: Option<PathBuf>,
    /// Galaxy name passed as `--galaxy-name`.
    pub galaxy: String,
    /// Directory holding galaxies, passed as `--datapath`.
    pub data_path: PathBuf,
    /// Extra arguments, placed before the standard ones.
    #[serde(default)]
    pub extra_args: Vec<String>,
    /// Output line that signals a completed startup.
    #[serde(default = "default_readiness_marker")]
    pub readiness_marker: String,
    /// Output line that signals a failed startup.
    #[serde(default = "default_failure_marker")]
    pub failure_marker: String,
}

impl GameConfig {
    pub fn executable_path(&self) -> PathBuf {
        self.executable
            .clone()
            .unwrap_or_else(|| self.install_path.join("bin").join("AvorionServer"))
    }

    /// Directory added to `LD_LIBRARY_PATH` for the game's bundled libraries.
    pub fn library_path(&self) -> PathBuf {
        self.install_path.join("linux64")
    }

    /// Directory of the running galaxy's save data.
    pub fn galaxy_path(&self) -> PathBuf {
        self.data_path.join(&self.galaxy)
    }
}

/// RCON endpoint and client binary.
#[derive(Debug, Clone, Deserialize)]
pub struct RconConfig {
    /// External command-line client invoked once per command.
    #[serde(default = "default_rcon_binary")]
    pub binary: String,
    #[serde(default = "default_rcon_address")]
    pub address: String,
    #[serde(default = "default_rcon_port")]
    pub port: u16,
    /// Generated per run when not configured.
    #[serde(default = "default_rcon_password")]
    pub password: String,
}

impl Default for RconConfig {
    fn default() -> Self {
        Self {
            binary: default_rcon_binary(),
            address: default_rcon_address(),
            port: default_rcon_port(),
            password: default_rcon_password(),
        }
    }
}

/// Timeouts in seconds.
#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutsConfig {
    /// Wait for the readiness marker after spawn (default: 300).
    #[serde(default = "default_readiness_timeout")]
    pub readiness: u64,
    /// Interval between health probes (default: 300).
    #[serde(default = "default_health_interval")]
    pub health_interval: u64,
    /// Bound on a single health probe (default: 60).
    #[serde(default = "default_health_response")]
    pub health_response: u64,
    /// Wait for process exit after `stop` (default: 300).
    #[serde(default = "default_stop_timeout")]
    pub stop: u64,
    /// Grace period for hook scripts before they are killed (default: 60).
    #[serde(default = "default_hook_grace")]
    pub hook_grace: u64,
    /// Bound on a single RCON invocation (default: 30).
    #[serde(default = "default_command_timeout")]
    pub command: u64,
    /// Interval between player data refreshes (default: 3600).
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            readiness: default_readiness_timeout(),
            health_interval: default_health_interval(),
            health_response: default_health_response(),
            stop: default_stop_timeout(),
            hook_grace: default_hook_grace(),
            command: default_command_timeout(),
            refresh_interval: default_refresh_interval(),
        }
    }
}

impl TimeoutsConfig {
    pub fn readiness(&self) -> Duration {
        Duration::from_secs(self.readiness)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval)
    }

    pub fn health_response(&self) -> Duration {
        Duration::from_secs(self.health_response)
    }

    pub fn stop(&self) -> Duration {
        Duration::from_secs(self.stop)
    }

    pub fn hook_grace(&self) -> Duration {
        Duration::from_secs(self.hook_grace)
    }

    pub fn command(&self) -> Duration {
        Duration::from_secs(self.command)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval)
    }

    /// Named fields, for validation messages.
    pub(super) fn named(&self) -> [(&'static str, u64); 7] {
        [
            ("timeouts.readiness", self.readiness),
            ("timeouts.health_interval", self.health_interval),
            ("timeouts.health_response", self.health_response),
            ("timeouts.stop", self.stop),
            ("timeouts.hook_grace", self.hook_grace),
            ("timeouts.command", self.command),
            ("timeouts.refresh_interval", self.refresh_interval),
        ]
    }
}

/// Hook scripts run around the game's lifecycle.
///
/// - `pre_start`: runs to completion before the game is spawned.
/// - `post_up`: runs detached once the game is ready; its output joins the log feed.
/// - `post_down`: runs to completion after the game has exited.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HooksConfig {
    pub pre_start: Option<PathBuf>,
    pub post_up: Option<PathBuf>,
    pub post_down: Option<PathBuf>,
}

/// Chat forwarding limits.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatConfig {
    /// Messages longer than this many characters are truncated.
    #[serde(default = "default_chat_max_length")]
    pub max_length: usize,
    /// Length a long message is cut to before the truncation suffix.
    #[serde(default = "default_chat_truncate_to")]
    pub truncate_to: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_length: default_chat_max_length(),
            truncate_to: default_chat_truncate_to(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BusConfig {
    /// Per-subscriber queue depth. Full queues drop their oldest message.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file.
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Prometheus HTTP port. 0 disables the endpoint.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            port: default_metrics_port(),
        }
    }
}

/// An operator-defined log event.
///
/// `format` receives the regex captures in order through `%s` placeholders.
/// Captures shaped `player:<fid>`, `alliance:<fid>` or `sector:<x>:<y>` are
/// replaced by the tracked entity's display name first.
#[derive(Debug, Clone, Deserialize)]
pub struct EventConfig {
    pub name: String,
    pub regex: String,
    pub format: String,
}
