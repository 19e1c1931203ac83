//! Ordered rule table and first-match dispatch.

use super::EventContext;
use crate::error::{EventError, HandlerResult, RegistryError};
use regex::{Captures, Regex};
use std::str::FromStr;
use tracing::{debug, error, info, trace, warn};

/// Level a matched line is logged at, under the `game` target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Captures of a matched line, with bounds-checked access.
pub struct EventMatch<'a> {
    rule: &'a str,
    line: &'a str,
    caps: Captures<'a>,
}

impl<'a> EventMatch<'a> {
    pub fn rule(&self) -> &'a str {
        self.rule
    }

    pub fn line(&self) -> &'a str {
        self.line
    }

    /// Number of capture groups, including group 0.
    pub fn len(&self) -> usize {
        self.caps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.caps.len() == 0
    }

    /// A capture group that must have participated in the match.
    pub fn get(&self, index: usize) -> Result<&'a str, EventError> {
        self.caps
            .get(index)
            .map(|m| m.as_str())
            .ok_or_else(|| EventError::MissingCapture {
                rule: self.rule.to_string(),
                index,
            })
    }

    /// A capture group that may be absent or empty.
    pub fn optional(&self, index: usize) -> Option<&'a str> {
        self.caps
            .get(index)
            .map(|m| m.as_str())
            .filter(|s| !s.is_empty())
    }

    /// A capture group parsed into `T`.
    pub fn parse<T: FromStr>(&self, index: usize) -> Result<T, EventError> {
        let raw = self.get(index)?;
        raw.parse().map_err(|_| EventError::InvalidCapture {
            rule: self.rule.to_string(),
            value: raw.to_string(),
        })
    }
}

/// Reaction to a matched line.
pub trait Handler: Send + Sync {
    fn handle(&self, ctx: &EventContext, event: &EventMatch<'_>) -> HandlerResult;
}

impl<F> Handler for F
where
    F: Fn(&EventContext, &EventMatch<'_>) -> HandlerResult + Send + Sync,
{
    fn handle(&self, ctx: &EventContext, event: &EventMatch<'_>) -> HandlerResult {
        self(ctx, event)
    }
}

/// Pin a closure's signature to the handler shape.
pub fn from_fn<F>(f: F) -> F
where
    F: Fn(&EventContext, &EventMatch<'_>) -> HandlerResult + Send + Sync,
{
    f
}

/// A named pattern and its handler. Immutable once registered.
pub struct EventRule {
    name: String,
    pattern: Regex,
    severity: Severity,
    handler: Box<dyn Handler>,
}

impl EventRule {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }
}

impl std::fmt::Debug for EventRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRule")
            .field("name", &self.name)
            .field("pattern", &self.pattern.as_str())
            .field("severity", &self.severity)
            .finish()
    }
}

/// Rules in registration order.
#[derive(Debug, Default)]
pub struct Registry {
    rules: Vec<EventRule>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule after all existing ones.
    ///
    /// Fails without modifying the registry if the name is empty or taken,
    /// the pattern source is already registered, or the pattern is invalid.
    pub fn register<H>(
        &mut self,
        name: &str,
        pattern: &str,
        severity: Severity,
        handler: H,
    ) -> Result<(), RegistryError>
    where
        H: Handler + 'static,
    {
        if name.trim().is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if self.rules.iter().any(|r| r.name == name) {
            return Err(RegistryError::DuplicateName(name.to_string()));
        }
        if let Some(existing) = self.rules.iter().find(|r| r.pattern.as_str() == pattern) {
            return Err(RegistryError::DuplicatePattern {
                pattern: pattern.to_string(),
                existing: existing.name.clone(),
            });
        }
        let compiled = Regex::new(pattern).map_err(|source| RegistryError::InvalidPattern {
            name: name.to_string(),
            source,
        })?;

        debug!(rule = %name, pattern = %pattern, "Registered event rule");
        self.rules.push(EventRule {
            name: name.to_string(),
            pattern: compiled,
            severity,
            handler: Box::new(handler),
        });
        Ok(())
    }

    /// Run the first rule whose pattern matches `line`.
    ///
    /// Returns the matching rule's name, or `None` when nothing matched.
    /// Handler failures are logged and counted; they never propagate.
    pub fn dispatch(&self, line: &str, ctx: &EventContext) -> Option<&str> {
        let (rule, caps) = self
            .rules
            .iter()
            .find_map(|rule| rule.pattern.captures(line).map(|caps| (rule, caps)))?;

        log_line(rule.severity, &rule.name, line);
        crate::metrics::record_event(&rule.name);

        let event = EventMatch {
            rule: &rule.name,
            line,
            caps,
        };
        if let Err(e) = rule.handler.handle(ctx, &event) {
            warn!(rule = %rule.name, error = %e, line = %line, "Event handler failed");
            crate::metrics::record_event_error(&rule.name, e.error_code());
        }
        Some(&rule.name)
    }

    /// Name of the rule that would handle `line`, without running it.
    pub fn classify(&self, line: &str) -> Option<&str> {
        self.rules
            .iter()
            .find(|r| r.pattern.is_match(line))
            .map(|r| r.name.as_str())
    }

    pub fn rules(&self) -> impl Iterator<Item = &EventRule> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn log_line(severity: Severity, rule: &str, line: &str) {
    match severity {
        Severity::Trace => trace!(target: "game", rule = %rule, "{line}"),
        Severity::Debug => debug!(target: "game", rule = %rule, "{line}"),
        Severity::Info => info!(target: "game", rule = %rule, "{line}"),
        Severity::Warn => warn!(target: "game", rule = %rule, "{line}"),
        Severity::Error => error!(target: "game", rule = %rule, "{line}"),
    }
}
