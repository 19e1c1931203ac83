//! Built-in rules for the game's log formats.
//!
//! Registration order matters: the first matching rule wins, so specific
//! patterns come before the chat rule's broad `<name> message` shape only
//! where they could overlap, and the catch-all always comes last.

use super::configured::ConfiguredEvent;
use super::registry::{EventMatch, Registry, Severity};
use super::EventContext;
use crate::bus::{BusMessage, ChatData, IntegrationRequest};
use crate::cache::{PlayerLookup, TrackedEntity};
use crate::config::EventConfig;
use crate::error::{HandlerResult, RegistryError};
use chrono::Utc;
use regex::Regex;
use std::sync::LazyLock;
use tracing::{info, warn};

/// Name of the catch-all rule.
pub const EVENT_NONE: &str = "EventNone";

const MOD_URL_BASE: &str = "https://steamcommunity.com/sharedfiles/filedetails/?id=";
const TRUNCATION_MARKER: &str = "...(truncated)";

/// Chat lines relayed into the game from Discord; forwarding them back would echo.
static DISCORD_ECHO: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^\s*<D> <.*?#[0-9]{4}> (.*)$").ok());

/// Build the registry with every built-in rule, then `configured`, then the catch-all.
pub fn builtin_registry(configured: &[EventConfig]) -> Result<Registry, RegistryError> {
    let mut registry = Registry::new();

    registry.register(
        "EventShipTrackInit",
        r"^\s*shipTrackInitEvent: (-?[0-9]+) (-?[0-9]+):(-?[0-9]+) (.*)$",
        Severity::Debug,
        handle_ship_track_init,
    )?;
    registry.register(
        "EventPlayerChat",
        r"^\s*<(.+?)> (.*)$",
        Severity::Info,
        handle_player_chat,
    )?;
    registry.register(
        "EventShipJump",
        r"^\s*shipJumpEvent: (-?[0-9]+) (-?[0-9]+):(-?[0-9]+) (.*)$",
        Severity::Debug,
        handle_ship_jump,
    )?;
    registry.register(
        "EventPlayerJoin",
        r"^\s*playerJoinEvent: ([0-9]+) ([0-9]+)(?: (.+?))?\s*$",
        Severity::Info,
        handle_player_join,
    )?;
    registry.register(
        "EventPlayerLeft",
        r"^\s*playerLeftEvent: ([0-9]+)(?: (.+?))?\s*$",
        Severity::Info,
        handle_player_left,
    )?;
    registry.register(
        "EventPlayerKick",
        r"^\s*doPlayerKickEvent: ([0-9]+) (.*?)\s*$",
        Severity::Info,
        handle_player_kick,
    )?;
    registry.register(
        "EventPlayerBan",
        r"^\s*doPlayerBanEvent: ([0-9]+) (.*?)\s*$",
        Severity::Info,
        handle_player_ban,
    )?;
    registry.register(
        "EventDiscordIntegrationRequest",
        r"^\s*discordIntegrationRequestEvent: ([0-9]+) ([0-9]+)\s*$",
        Severity::Info,
        handle_integration_request,
    )?;
    registry.register(
        "EventModUpdate",
        r"^\s*Downloading ([0-9]+) \[[^\s]+ of [^\s]+ \| 100%\]\s*$",
        Severity::Info,
        handle_mod_update,
    )?;
    registry.register(
        "EventServerLag",
        r"^\s*Server frame took over [0-9]+ seconds?\.?\s*$",
        Severity::Warn,
        ignore,
    )?;
    registry.register(
        "NilCommandEvent",
        r"^\s*nilCommandEvent: (.*)$",
        Severity::Trace,
        ignore,
    )?;

    for event in configured {
        registry.register(
            &event.name,
            &event.regex,
            Severity::Info,
            ConfiguredEvent::new(&event.format),
        )?;
    }

    registry.register(EVENT_NONE, ".*", Severity::Info, ignore)?;
    Ok(registry)
}

fn ignore(_: &EventContext, _: &EventMatch<'_>) -> HandlerResult {
    Ok(())
}

fn handle_ship_track_init(ctx: &EventContext, event: &EventMatch<'_>) -> HandlerResult {
    let x: i64 = event.parse(2)?;
    let y: i64 = event.parse(3)?;
    if ctx.cache.sectors.touch(x, y) {
        ctx.bus.send(BusMessage::Tracked(TrackedEntity::Sector { x, y }));
    }
    Ok(())
}

fn handle_player_chat(ctx: &EventContext, event: &EventMatch<'_>) -> HandlerResult {
    if DISCORD_ECHO
        .as_ref()
        .is_some_and(|re| re.is_match(event.line()))
    {
        return Ok(());
    }

    let name = event.get(1)?;
    if name == "Server" || name == "Discord" {
        return Ok(());
    }

    let message = truncate_chat(event.get(2)?, ctx.chat.max_length, ctx.chat.truncate_to);
    let uid = ctx
        .cache
        .find(PlayerLookup::Name(name))
        .map(|p| p.faction_id)
        .unwrap_or_default();

    ctx.bus.send(BusMessage::Chat(ChatData {
        name: name.to_string(),
        uid,
        msg: message,
    }));
    Ok(())
}

/// Cut `message` to `truncate_to` characters plus a marker when it exceeds `max_length`.
pub fn truncate_chat(message: &str, max_length: usize, truncate_to: usize) -> String {
    if message.chars().count() <= max_length {
        return message.to_string();
    }
    let mut out: String = message.chars().take(truncate_to).collect();
    out.push_str(TRUNCATION_MARKER);
    out
}

fn handle_ship_jump(ctx: &EventContext, event: &EventMatch<'_>) -> HandlerResult {
    let faction_id = event.get(1)?;
    let x: i64 = event.parse(2)?;
    let y: i64 = event.parse(3)?;
    let ship = event.get(4)?;

    let new_sector = ctx.cache.sectors.get(x, y).is_none();
    // Untracked actors are dropped silently
    if let Some(jump) = ctx.cache.add_jump(faction_id, ship, (x, y), Utc::now()) {
        if new_sector {
            ctx.bus.send(BusMessage::Tracked(TrackedEntity::Sector { x, y }));
        }
        ctx.bus.send(BusMessage::Jump(jump));
    }
    Ok(())
}

fn handle_player_join(ctx: &EventContext, event: &EventMatch<'_>) -> HandlerResult {
    let faction_id = event.get(1)?;
    let steam64_id = event.get(2)?;
    let name = event.optional(3);

    let record = match (name, ctx.cache.find(PlayerLookup::Faction(faction_id))) {
        // Without a name there is nothing to update on a known player
        (None, Some(existing)) => existing,
        (name, _) => {
            let (record, outcome) = ctx.cache.upsert_player(
                faction_id,
                steam64_id,
                name.unwrap_or(faction_id),
                None,
            )?;
            if outcome.is_changed() {
                ctx.bus.send(BusMessage::Tracked(TrackedEntity::from_player(&record)));
            }
            record
        }
    };

    ctx.cache.set_online(faction_id, true);
    crate::metrics::set_players_online(ctx.cache.players.online_count());

    ctx.bus.send(BusMessage::Chat(ChatData::new(
        "Server",
        format!("Player {} has logged in", record.name),
    )));
    Ok(())
}

fn handle_player_left(ctx: &EventContext, event: &EventMatch<'_>) -> HandlerResult {
    let faction_id = event.get(1)?;

    if !ctx.cache.set_online(faction_id, false) {
        warn!(faction_id = %faction_id, "Player logged off, but has no tracking");
        return Ok(());
    }
    crate::metrics::set_players_online(ctx.cache.players.online_count());

    let name = event
        .optional(2)
        .map(str::to_string)
        .or_else(|| ctx.cache.faction_name(faction_id))
        .unwrap_or_else(|| faction_id.to_string());
    ctx.bus.send(BusMessage::Chat(ChatData::new(
        "Server",
        format!("Player {name} has logged off"),
    )));
    Ok(())
}

fn handle_player_kick(ctx: &EventContext, event: &EventMatch<'_>) -> HandlerResult {
    moderate(ctx, event, Moderation::Kick)
}

fn handle_player_ban(ctx: &EventContext, event: &EventMatch<'_>) -> HandlerResult {
    moderate(ctx, event, Moderation::Ban)
}

/// A moderation action the game asked us to carry out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Moderation {
    Kick,
    Ban,
}

impl Moderation {
    pub fn command(self) -> &'static str {
        match self {
            Self::Kick => "kick",
            Self::Ban => "ban",
        }
    }

    /// Operator log line for a completed action.
    pub fn log_message(self, name: &str, reason: &str) -> String {
        let verb = match self {
            Self::Kick => "Kicked",
            Self::Ban => "Banned",
        };
        format!("**{verb} Player:** `{name}`\n**Reason:** _{reason}_")
    }

    pub fn arguments(target: &str, reason: &str) -> Vec<String> {
        vec![target.to_string(), format!("\"{reason}\"")]
    }
}

fn moderate(ctx: &EventContext, event: &EventMatch<'_>, action: Moderation) -> HandlerResult {
    let faction_id = event.get(1)?;
    let reason = event.get(2)?;

    // An unknown player is still acted on, by faction index
    let target = match ctx.cache.find(PlayerLookup::Faction(faction_id)) {
        Some(player) => player.name,
        None => {
            warn!(faction_id = %faction_id, "Failed to locate player index");
            faction_id.to_string()
        }
    };

    ctx.commands
        .submit_detached(action.command(), Moderation::arguments(&target, reason))?;
    ctx.bus
        .send(BusMessage::Log(ChatData::anonymous(action.log_message(&target, reason))));
    Ok(())
}

fn handle_integration_request(ctx: &EventContext, event: &EventMatch<'_>) -> HandlerResult {
    let faction_id = event.get(1)?;
    let pin = event.get(2)?;
    info!(faction_id = %faction_id, "Received Discord integration request");
    ctx.bus.send(BusMessage::Integration(IntegrationRequest {
        faction_id: faction_id.to_string(),
        pin: pin.to_string(),
    }));
    Ok(())
}

fn handle_mod_update(ctx: &EventContext, event: &EventMatch<'_>) -> HandlerResult {
    let id = event.get(1)?;
    ctx.bus.send(BusMessage::Log(ChatData::new(
        "Startup",
        format!("Updated {MOD_URL_BASE}{id}"),
    )));
    Ok(())
}
