//! Operator-defined rules from `[[events]]`.
//!
//! The format string takes one `%s` per capture group, in order. Captures
//! that name an entity are replaced by its display form:
//!
//! | capture              | rendered as          |
//! |----------------------|----------------------|
//! | `player:<fid>`       | the player's name    |
//! | `alliance:<fid>`     | the alliance's name  |
//! | `sector:<x>:<y>`     | `x:y`                |
//!
//! An unknown faction renders as its bare id. Anything else is substituted
//! verbatim.

use super::EventContext;
use super::registry::{EventMatch, Handler};
use crate::bus::{BusMessage, ChatData};
use crate::cache::PlayerLookup;
use crate::error::{EventError, HandlerResult};

const PLACEHOLDER: &str = "%s";

/// Handler publishing a formatted message on the log topic.
#[derive(Debug, Clone)]
pub struct ConfiguredEvent {
    format: String,
}

impl ConfiguredEvent {
    pub fn new(format: impl Into<String>) -> Self {
        Self {
            format: format.into(),
        }
    }

    pub fn placeholders(&self) -> usize {
        self.format.matches(PLACEHOLDER).count()
    }

    /// Substitute captures 1..=n into the format string.
    pub fn render(&self, ctx: &EventContext, event: &EventMatch<'_>) -> Result<String, EventError> {
        let mut out = String::with_capacity(self.format.len());
        let mut pieces = self.format.split(PLACEHOLDER);
        if let Some(head) = pieces.next() {
            out.push_str(head);
        }
        for (index, piece) in pieces.enumerate() {
            let raw = event.get(index + 1)?;
            out.push_str(&resolve(ctx, event.rule(), raw)?);
            out.push_str(piece);
        }
        Ok(out)
    }
}

impl Handler for ConfiguredEvent {
    fn handle(&self, ctx: &EventContext, event: &EventMatch<'_>) -> HandlerResult {
        let message = self.render(ctx, event)?;
        ctx.bus
            .send(BusMessage::Log(ChatData::new(event.rule(), message)));
        Ok(())
    }
}

fn resolve(ctx: &EventContext, rule: &str, raw: &str) -> Result<String, EventError> {
    let invalid = || EventError::InvalidCapture {
        rule: rule.to_string(),
        value: raw.to_string(),
    };

    if let Some(fid) = raw.strip_prefix("player:") {
        return Ok(ctx
            .cache
            .find(PlayerLookup::Faction(fid))
            .map_or_else(|| fid.to_string(), |p| p.name));
    }
    if let Some(fid) = raw.strip_prefix("alliance:") {
        return Ok(ctx
            .cache
            .find_alliance(fid)
            .map_or_else(|| fid.to_string(), |a| a.name));
    }
    if let Some(coords) = raw.strip_prefix("sector:") {
        let (x, y) = coords.split_once(':').ok_or_else(invalid)?;
        let x: i64 = x.parse().map_err(|_| invalid())?;
        let y: i64 = y.parse().map_err(|_| invalid())?;
        return Ok(format!("{x}:{y}"));
    }
    Ok(raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Topic;
    use crate::config::EventConfig;
    use crate::events::builtin_registry;
    use crate::events::test_support::context;

    fn registry_with(regex: &str, format: &str) -> crate::events::Registry {
        builtin_registry(&[EventConfig {
            name: "EventPirateRaid".to_string(),
            regex: regex.to_string(),
            format: format.to_string(),
        }])
        .unwrap()
    }

    async fn next_log(sub: &mut crate::bus::Subscription<BusMessage>) -> ChatData {
        match sub.recv().await {
            Some(BusMessage::Log(data)) => data,
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn entities_are_resolved_before_formatting() {
        let ctx = context();
        ctx.cache
            .get_or_create_player("5", "76561190000000001", "Hal", None)
            .unwrap();
        ctx.cache.get_or_create_alliance("9001", "Union").unwrap();
        let (mut log, _c) = ctx.bus.subscribe(Topic::LogOutbound);

        let registry = registry_with(
            r"^raid: (\S+) (\S+) (\S+)$",
            "Pirates hit %s of %s in %s",
        );
        assert_eq!(
            registry.dispatch("raid: player:5 alliance:9001 sector:-3:7", &ctx),
            Some("EventPirateRaid")
        );
        let data = next_log(&mut log).await;
        assert_eq!(data.name, "EventPirateRaid");
        assert_eq!(data.msg, "Pirates hit Hal of Union in -3:7");
    }

    #[tokio::test]
    async fn plain_captures_are_verbatim() {
        let ctx = context();
        let (mut log, _c) = ctx.bus.subscribe(Topic::LogOutbound);
        let registry = registry_with(r"^boss spawned: (.+)$", "A %s appeared!");
        registry.dispatch("boss spawned: Xsotan Emissary", &ctx);
        assert_eq!(next_log(&mut log).await.msg, "A Xsotan Emissary appeared!");
    }

    #[tokio::test]
    async fn too_few_captures_publishes_nothing() {
        let ctx = context();
        let (mut log, _c) = ctx.bus.subscribe(Topic::LogOutbound);
        let registry = registry_with(r"^one: (\w+)$", "%s and %s");
        assert_eq!(registry.dispatch("one: a", &ctx), Some("EventPirateRaid"));
        ctx.bus.send(BusMessage::Log(ChatData::anonymous("sentinel")));
        assert_eq!(next_log(&mut log).await.msg, "sentinel");
    }

    #[tokio::test]
    async fn unknown_faction_renders_as_id() {
        let ctx = context();
        let registry = registry_with(r"^who: (\S+)$", "seen %s");
        let (mut log, _c) = ctx.bus.subscribe(Topic::LogOutbound);
        registry.dispatch("who: player:404", &ctx);
        assert_eq!(next_log(&mut log).await.msg, "seen 404");
    }

    #[tokio::test]
    async fn malformed_sector_publishes_nothing() {
        let ctx = context();
        let registry = registry_with(r"^at: (\S+)$", "%s");
        let (mut log, _c) = ctx.bus.subscribe(Topic::LogOutbound);
        registry.dispatch("at: sector:north", &ctx);
        ctx.bus.send(BusMessage::Log(ChatData::anonymous("sentinel")));
        assert_eq!(next_log(&mut log).await.msg, "sentinel");
    }

    #[test]
    fn placeholder_count() {
        assert_eq!(ConfiguredEvent::new("%s joined %s").placeholders(), 2);
        assert_eq!(ConfiguredEvent::new("static").placeholders(), 0);
    }
}
