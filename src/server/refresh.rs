//! Player data refresh from `playerinfo` output.

use crate::bus::{BusMessage, MessageBus};
use crate::cache::{GalaxyCache, TrackedEntity};
use crate::error::CommandError;
use crate::rcon::CommandBus;
use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, info, warn};

/// Query listing every known player with online state.
pub const PLAYERINFO_COMMAND: &str = "playerinfo";
pub const PLAYERINFO_ARGS: [&str; 4] = ["-o", "-i", "-s", "-t"];

/// `<steam64> <fid> <name> currently logged in, playtime: <t>`
static ONLINE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^\s*([0-9]+) ([0-9]+) (.+?) currently logged in, playtime: (.+?)\s*$").ok()
});

/// `<steam64> <fid> <name> last online: <when>, playtime: <t>`
static OFFLINE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^\s*([0-9]+) ([0-9]+) (.+?) last online: (.+?), playtime: (.+?)\s*$").ok()
});

/// `<player name> Alliance: <fid> <alliance name> <n> Credits, ...`
static ALLIANCE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^\s*(.+?) Alliance: ([0-9]+) (.+?) [0-9.]+ Credits,").ok()
});

/// One parsed line of `playerinfo` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InfoLine {
    Player {
        steam64_id: String,
        faction_id: String,
        name: String,
        online: bool,
    },
    Alliance {
        faction_id: String,
        name: String,
    },
}

/// Parse a single output line. Headers and blank lines give `None`.
pub fn parse_line(line: &str) -> Option<InfoLine> {
    let player = |re: &LazyLock<Option<Regex>>, online: bool| {
        let caps = re.as_ref()?.captures(line)?;
        Some(InfoLine::Player {
            steam64_id: caps.get(1)?.as_str().to_string(),
            faction_id: caps.get(2)?.as_str().to_string(),
            name: caps.get(3)?.as_str().to_string(),
            online,
        })
    };

    player(&OFFLINE, false)
        .or_else(|| player(&ONLINE, true))
        .or_else(|| {
            let caps = ALLIANCE.as_ref()?.captures(line)?;
            Some(InfoLine::Alliance {
                faction_id: caps.get(2)?.as_str().to_string(),
                name: caps.get(3)?.as_str().to_string(),
            })
        })
}

/// What a refresh changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub players: usize,
    pub alliances: usize,
    pub created: usize,
    pub skipped: usize,
}

/// Fold `playerinfo` output into the cache, publishing newly tracked entities.
pub fn apply(output: &str, cache: &GalaxyCache, bus: &MessageBus<BusMessage>) -> RefreshSummary {
    let mut summary = RefreshSummary::default();

    for line in output.lines().filter(|l| !l.trim().is_empty()) {
        match parse_line(line) {
            Some(InfoLine::Player {
                steam64_id,
                faction_id,
                name,
                online,
            }) => match cache.upsert_player(&faction_id, &steam64_id, &name, None) {
                Ok((record, outcome)) => {
                    cache.set_online(&faction_id, online);
                    summary.players += 1;
                    if outcome.is_created() {
                        summary.created += 1;
                    }
                    if outcome.is_changed() {
                        bus.send(BusMessage::Tracked(TrackedEntity::from_player(&record)));
                    }
                }
                Err(e) => {
                    warn!(faction_id = %faction_id, error = %e, "Rejected player data");
                    summary.skipped += 1;
                }
            },
            Some(InfoLine::Alliance { faction_id, name }) => {
                match cache.upsert_alliance(&faction_id, &name) {
                    Ok((record, outcome)) => {
                        summary.alliances += 1;
                        if outcome.is_created() {
                            summary.created += 1;
                        }
                        if outcome.is_changed() {
                            bus.send(BusMessage::Tracked(TrackedEntity::from_alliance(&record)));
                        }
                    }
                    Err(e) => {
                        warn!(faction_id = %faction_id, error = %e, "Rejected alliance data");
                        summary.skipped += 1;
                    }
                }
            }
            None => {
                debug!(line = %line, "Unable to parse player data line");
                summary.skipped += 1;
            }
        }
    }

    crate::metrics::set_players_online(cache.players.online_count());
    summary
}

/// Query the game for every player and fold the answer into the cache.
pub async fn refresh_players(
    commands: &CommandBus,
    cache: &GalaxyCache,
    bus: &MessageBus<BusMessage>,
) -> Result<RefreshSummary, CommandError> {
    let args = PLAYERINFO_ARGS.iter().map(|a| a.to_string()).collect();
    let output = commands.submit(PLAYERINFO_COMMAND, args).await?;
    let summary = apply(&output, cache, bus);
    info!(
        players = summary.players,
        alliances = summary.alliances,
        created = summary.created,
        "Player data refreshed"
    );
    Ok(summary)
}
