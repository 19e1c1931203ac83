//! Configuration loading and management.
//!
//! This module is split into logical submodules:
//! - [`types`]: Core config struct definitions (Config, GameConfig, RconConfig, TimeoutsConfig)
//! - [`defaults`]: Default value functions used by serde
//! - [`validation`]: Startup validation that collects every error at once

mod defaults;
mod types;
mod validation;

pub use types::{
    BusConfig, ChatConfig, Config, ConfigError, DatabaseConfig, EventConfig, GameConfig,
    HooksConfig, LoggingConfig, MetricsConfig, RconConfig, TimeoutsConfig,
};
pub use validation::{ValidationError, validate};
