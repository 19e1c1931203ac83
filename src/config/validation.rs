//! Configuration validation.
//!
//! Validates configuration at startup to catch common errors early.

use super::Config;
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

/// Validation errors for configuration.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("game.galaxy is required")]
    MissingGalaxy,
    #[error("game.install_path does not exist: {0}")]
    InstallPathNotFound(String),
    #[error("game executable does not exist: {0}")]
    ExecutableNotFound(String),
    #[error("rcon.binary does not exist: {0}")]
    RconBinaryNotFound(String),
    #[error("hooks.{hook} does not exist: {path}")]
    HookNotFound { hook: &'static str, path: String },
    #[error("{0} must be greater than zero")]
    ZeroTimeout(&'static str),
    #[error("bus.queue_capacity must be greater than zero")]
    ZeroQueueCapacity,
    #[error("chat.truncate_to ({truncate_to}) must not exceed chat.max_length ({max_length})")]
    ChatLimits {
        truncate_to: usize,
        max_length: usize,
    },
    #[error("event name is empty")]
    EmptyEventName,
    #[error("event `{0}` is defined more than once")]
    DuplicateEventName(String),
    #[error("event `{name}` has an invalid regex: {reason}")]
    InvalidEventRegex { name: String, reason: String },
    #[error("database.path parent directory does not exist: {0}")]
    DatabasePathInvalid(String),
}

/// Validate a configuration, returning all errors found.
pub fn validate(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    // Game installation
    if config.game.galaxy.trim().is_empty() {
        errors.push(ValidationError::MissingGalaxy);
    }
    if !config.game.install_path.exists() {
        errors.push(ValidationError::InstallPathNotFound(
            config.game.install_path.display().to_string(),
        ));
    }
    let executable = config.game.executable_path();
    if !executable.exists() {
        errors.push(ValidationError::ExecutableNotFound(
            executable.display().to_string(),
        ));
    }
    if !Path::new(&config.rcon.binary).exists() {
        errors.push(ValidationError::RconBinaryNotFound(config.rcon.binary.clone()));
    }

    // Hooks are optional, but a configured hook must exist
    let hooks = [
        ("pre_start", &config.hooks.pre_start),
        ("post_up", &config.hooks.post_up),
        ("post_down", &config.hooks.post_down),
    ];
    for (hook, path) in hooks {
        if let Some(path) = path
            && !path.exists()
        {
            errors.push(ValidationError::HookNotFound {
                hook,
                path: path.display().to_string(),
            });
        }
    }

    for (name, value) in config.timeouts.named() {
        if value == 0 {
            errors.push(ValidationError::ZeroTimeout(name));
        }
    }

    if config.bus.queue_capacity == 0 {
        errors.push(ValidationError::ZeroQueueCapacity);
    }
    if config.chat.truncate_to > config.chat.max_length {
        errors.push(ValidationError::ChatLimits {
            truncate_to: config.chat.truncate_to,
            max_length: config.chat.max_length,
        });
    }

    // Configured events
    let mut seen = HashSet::new();
    for event in &config.events {
        if event.name.trim().is_empty() {
            errors.push(ValidationError::EmptyEventName);
            continue;
        }
        if !seen.insert(event.name.as_str()) {
            errors.push(ValidationError::DuplicateEventName(event.name.clone()));
        }
        if let Err(e) = regex::Regex::new(&event.regex) {
            errors.push(ValidationError::InvalidEventRegex {
                name: event.name.clone(),
                reason: e.to_string(),
            });
        }
    }

    // Database path validation
    if let Some(ref db) = config.database {
        let db_path = Path::new(&db.path);
        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            errors.push(ValidationError::DatabasePathInvalid(db.path.clone()));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
