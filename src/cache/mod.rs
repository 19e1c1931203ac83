//! Concurrent entity cache populated by the event pipeline.
//!
//! The [`GalaxyCache`] owns four stores:
//! - [`PlayerCache`]: players indexed by faction, Steam64, Discord and name
//! - [`AllianceCache`]: alliances by faction
//! - [`SectorCache`]: sectors by coordinates, created lazily
//! - [`JumpArena`]: every jump, referenced by id from the other three
//!
//! Lock order when recording a jump: entity index, then arena, then sector
//! shard. Nothing here awaits or publishes while holding a lock; callers get
//! cloned snapshots.

mod alliance;
mod jump;
mod player;
mod sector;

pub use alliance::{AllianceCache, AllianceRecord};
pub use jump::{
    ActorKind, HasJumpHistory, JumpArena, JumpEvent, JumpHistory, JumpId, JumpInfo,
    MAX_JUMP_HISTORY,
};
pub use player::{DEFAULT_LOGLEVEL, PlayerCache, PlayerLookup, PlayerRecord};
pub use sector::{SectorCache, SectorRecord};

use crate::error::CacheError;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

/// An entity change worth persisting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackedEntity {
    Player {
        faction_id: String,
        steam64_id: String,
        name: String,
        discord_id: Option<String>,
    },
    Alliance {
        faction_id: String,
        name: String,
    },
    Sector {
        x: i64,
        y: i64,
    },
}

impl TrackedEntity {
    pub fn from_player(record: &PlayerRecord) -> Self {
        Self::Player {
            faction_id: record.faction_id.clone(),
            steam64_id: record.steam64_id.clone(),
            name: record.name.clone(),
            discord_id: record.discord_id.clone(),
        }
    }

    pub fn from_alliance(record: &AllianceRecord) -> Self {
        Self::Alliance {
            faction_id: record.faction_id.clone(),
            name: record.name.clone(),
        }
    }
}

/// Persisted state replayed into a fresh cache.
#[derive(Debug, Clone, Default)]
pub struct CacheSnapshot {
    pub entities: Vec<TrackedEntity>,
    /// Jumps in the order they happened.
    pub jumps: Vec<JumpInfo>,
}

/// Counts of tracked entities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub players: usize,
    pub online_players: usize,
    pub alliances: usize,
    pub sectors: usize,
    pub jumps: usize,
}

/// All tracked galaxy state.
#[derive(Debug, Default)]
pub struct GalaxyCache {
    pub players: PlayerCache,
    pub alliances: AllianceCache,
    pub sectors: SectorCache,
    pub jumps: JumpArena,
}

/// What a get-or-create call did to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Created,
    Renamed,
    Unchanged,
}

impl Upsert {
    pub fn is_created(self) -> bool {
        self == Self::Created
    }

    /// The stored record differs from what persistence last saw.
    pub fn is_changed(self) -> bool {
        self != Self::Unchanged
    }
}

impl GalaxyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get-or-create a player, reporting renames as well as creation.
    pub fn upsert_player(
        &self,
        faction_id: &str,
        steam64_id: &str,
        name: &str,
        discord_id: Option<&str>,
    ) -> Result<(PlayerRecord, Upsert), CacheError> {
        self.players.upsert(faction_id, steam64_id, name, discord_id)
    }

    pub fn upsert_alliance(
        &self,
        faction_id: &str,
        name: &str,
    ) -> Result<(AllianceRecord, Upsert), CacheError> {
        self.alliances.upsert(faction_id, name)
    }

    pub fn get_or_create_player(
        &self,
        faction_id: &str,
        steam64_id: &str,
        name: &str,
        discord_id: Option<&str>,
    ) -> Result<(PlayerRecord, bool), CacheError> {
        self.players
            .get_or_create(faction_id, steam64_id, name, discord_id)
    }

    pub fn get_or_create_alliance(
        &self,
        faction_id: &str,
        name: &str,
    ) -> Result<(AllianceRecord, bool), CacheError> {
        self.alliances.get_or_create(faction_id, name)
    }

    pub fn find(&self, lookup: PlayerLookup<'_>) -> Option<PlayerRecord> {
        self.players.find(lookup)
    }

    pub fn find_alliance(&self, faction_id: &str) -> Option<AllianceRecord> {
        self.alliances.find(faction_id)
    }

    pub fn set_online(&self, faction_id: &str, online: bool) -> bool {
        self.players.set_online(faction_id, online)
    }

    /// Which kind of entity owns `faction_id`, players first.
    pub fn resolve_actor(&self, faction_id: &str) -> Option<ActorKind> {
        if self.players.contains(faction_id) {
            Some(ActorKind::Player)
        } else if self.alliances.contains(faction_id) {
            Some(ActorKind::Alliance)
        } else {
            None
        }
    }

    /// Record a jump by `faction_id` into sector `(x, y)`.
    ///
    /// Returns `None` when the faction is neither a tracked player nor a
    /// tracked alliance; nothing is recorded in that case.
    pub fn add_jump(
        &self,
        faction_id: &str,
        ship_name: &str,
        (x, y): (i64, i64),
        timestamp: DateTime<Utc>,
    ) -> Option<JumpEvent> {
        let actor_kind = self.resolve_actor(faction_id)?;
        self.record_jump(JumpInfo {
            actor_kind,
            faction_id: faction_id.to_string(),
            ship_name: ship_name.to_string(),
            x,
            y,
            timestamp,
        })
    }

    /// Record a jump whose actor kind is already known.
    pub fn record_jump(&self, info: JumpInfo) -> Option<JumpEvent> {
        let (x, y) = info.coordinates();
        let actor_kind = info.actor_kind;
        let faction_id = info.faction_id.clone();

        let mut stored: Option<Arc<JumpInfo>> = None;
        let alloc = || {
            let (id, arc) = self.jumps.push(info);
            stored = Some(arc);
            id
        };
        let recorded = match actor_kind {
            ActorKind::Player => self.players.record_jump(&faction_id, alloc),
            ActorKind::Alliance => self.alliances.record_jump(&faction_id, alloc),
        };
        let Some(id) = recorded else {
            debug!(faction_id = %faction_id, kind = actor_kind.as_str(), "Discarding jump for untracked faction");
            return None;
        };

        self.sectors.record_jump(x, y, id);
        stored.map(|info| JumpEvent { id, info })
    }

    /// Replay persisted state. Nothing is published.
    pub fn restore(&self, snapshot: CacheSnapshot) -> CacheStats {
        for entity in snapshot.entities {
            let result = match &entity {
                TrackedEntity::Player {
                    faction_id,
                    steam64_id,
                    name,
                    discord_id,
                } => self
                    .players
                    .get_or_create(faction_id, steam64_id, name, discord_id.as_deref())
                    .map(|_| ()),
                TrackedEntity::Alliance { faction_id, name } => self
                    .alliances
                    .get_or_create(faction_id, name)
                    .map(|_| ()),
                TrackedEntity::Sector { x, y } => {
                    self.sectors.touch(*x, *y);
                    Ok(())
                }
            };
            if let Err(e) = result {
                warn!(entity = ?entity, error = %e, "Skipping persisted entity");
            }
        }

        for jump in snapshot.jumps {
            self.record_jump(jump);
        }

        self.stats()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            players: self.players.len(),
            online_players: self.players.online_count(),
            alliances: self.alliances.len(),
            sectors: self.sectors.len(),
            jumps: self.jumps.len(),
        }
    }

    /// A display name for a faction, used when formatting log messages.
    pub fn faction_name(&self, faction_id: &str) -> Option<String> {
        self.players
            .find(PlayerLookup::Faction(faction_id))
            .map(|p| p.name)
            .or_else(|| self.alliances.find(faction_id).map(|a| a.name))
    }

    /// The `n` most recent jumps of a faction, newest first.
    pub fn last_jumps(&self, faction_id: &str, n: usize) -> Vec<Arc<JumpInfo>> {
        let ids = if let Some(player) = self.players.find(PlayerLookup::Faction(faction_id)) {
            player.last_jumps(n)
        } else if let Some(alliance) = self.alliances.find(faction_id) {
            alliance.last_jumps(n)
        } else {
            return Vec::new();
        };
        self.jumps.resolve(ids)
    }

    /// Every jump into a sector, oldest first.
    pub fn sector_jumps(&self, x: i64, y: i64) -> Vec<Arc<JumpInfo>> {
        self.sectors
            .get(x, y)
            .map(|s| self.jumps.resolve(s.jump_history))
            .unwrap_or_default()
    }
}
