//! Player tracking.
//!
//! All player indices live behind a single lock so that a record is either
//! fully indexed (faction, Steam, Discord, name) or not visible at all.

use super::Upsert;
use super::jump::{HasJumpHistory, JumpHistory, JumpId};
use crate::error::CacheError;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::warn;

/// Default per-entity log verbosity.
pub const DEFAULT_LOGLEVEL: u8 = 3;

/// A tracked player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerRecord {
    pub faction_id: String,
    pub steam64_id: String,
    pub discord_id: Option<String>,
    pub name: String,
    pub online: bool,
    /// Only known while the player is online.
    pub ip: Option<String>,
    pub jump_history: JumpHistory,
    pub loglevel: u8,
}

impl HasJumpHistory for PlayerRecord {
    fn name(&self) -> &str {
        &self.name
    }

    fn faction_id(&self) -> &str {
        &self.faction_id
    }

    fn history(&self) -> &JumpHistory {
        &self.jump_history
    }

    fn history_mut(&mut self) -> &mut JumpHistory {
        &mut self.jump_history
    }
}

/// Ways to look a player up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerLookup<'a> {
    Faction(&'a str),
    Steam(&'a str),
    Discord(&'a str),
    Name(&'a str),
}

#[derive(Debug, Default)]
struct Indices {
    by_faction: HashMap<String, PlayerRecord>,
    steam: HashMap<String, String>,
    discord: HashMap<String, String>,
    name: HashMap<String, String>,
}

impl Indices {
    fn faction_for(&self, lookup: PlayerLookup<'_>) -> Option<&str> {
        match lookup {
            PlayerLookup::Faction(fid) => {
                self.by_faction.get_key_value(fid).map(|(k, _)| k.as_str())
            }
            PlayerLookup::Steam(id) => self.steam.get(id).map(String::as_str),
            PlayerLookup::Discord(id) => self.discord.get(id).map(String::as_str),
            PlayerLookup::Name(name) => self.name.get(name).map(String::as_str),
        }
    }

    /// Returns `true` if the name actually changed.
    fn rename(&mut self, faction_id: &str, name: &str) -> bool {
        let Some(record) = self.by_faction.get_mut(faction_id) else {
            return false;
        };
        if record.name == name {
            return false;
        }
        let old = std::mem::replace(&mut record.name, name.to_string());
        if self.name.get(&old).is_some_and(|fid| fid == faction_id) {
            self.name.remove(&old);
        }
        self.index_name(faction_id, name);
        true
    }

    /// Names are not unique in the game. The first holder keeps the index
    /// entry; later players with the same name are reachable by their ids.
    fn index_name(&mut self, faction_id: &str, name: &str) {
        match self.name.get(name) {
            Some(holder) if holder != faction_id => {
                warn!(
                    name = %name,
                    holder = %holder,
                    faction_id = %faction_id,
                    "Player name already indexed for another faction"
                );
            }
            Some(_) => {}
            None => {
                self.name.insert(name.to_string(), faction_id.to_string());
            }
        }
    }
}

/// Concurrent player index.
#[derive(Debug, Default)]
pub struct PlayerCache {
    inner: RwLock<Indices>,
}

impl PlayerCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the player for `faction_id`, creating it if it does not exist.
    ///
    /// The boolean is `true` when a new record was created. An existing
    /// record keeps its identifiers; a changed name is applied.
    pub fn get_or_create(
        &self,
        faction_id: &str,
        steam64_id: &str,
        name: &str,
        discord_id: Option<&str>,
    ) -> Result<(PlayerRecord, bool), CacheError> {
        self.upsert(faction_id, steam64_id, name, discord_id)
            .map(|(record, outcome)| (record, outcome.is_created()))
    }

    /// Like [`get_or_create`](Self::get_or_create), but also reports whether
    /// an existing record was renamed.
    pub fn upsert(
        &self,
        faction_id: &str,
        steam64_id: &str,
        name: &str,
        discord_id: Option<&str>,
    ) -> Result<(PlayerRecord, Upsert), CacheError> {
        if faction_id.is_empty() {
            return Err(CacheError::EmptyFactionId);
        }
        if steam64_id.is_empty() {
            return Err(CacheError::EmptySteamId);
        }
        if name.is_empty() {
            return Err(CacheError::EmptyName);
        }
        if steam64_id.parse::<u64>().is_err() {
            return Err(CacheError::MalformedSteamId(steam64_id.to_string()));
        }
        let discord_id = discord_id.filter(|id| !id.is_empty());

        let mut indices = self.inner.write();

        if indices.by_faction.contains_key(faction_id) {
            let outcome = if indices.rename(faction_id, name) {
                Upsert::Renamed
            } else {
                Upsert::Unchanged
            };
            let record = indices.by_faction[faction_id].clone();
            return Ok((record, outcome));
        }

        if let Some(owner) = indices.steam.get(steam64_id) {
            return Err(CacheError::SteamMapped {
                steam64_id: steam64_id.to_string(),
                faction_id: owner.clone(),
            });
        }
        if let Some(discord) = discord_id
            && indices.discord.contains_key(discord)
        {
            return Err(CacheError::DiscordMapped(discord.to_string()));
        }

        let record = PlayerRecord {
            faction_id: faction_id.to_string(),
            steam64_id: steam64_id.to_string(),
            discord_id: discord_id.map(str::to_string),
            name: name.to_string(),
            online: false,
            ip: None,
            jump_history: JumpHistory::default(),
            loglevel: DEFAULT_LOGLEVEL,
        };

        indices
            .steam
            .insert(steam64_id.to_string(), faction_id.to_string());
        if let Some(discord) = discord_id {
            indices
                .discord
                .insert(discord.to_string(), faction_id.to_string());
        }
        indices.index_name(faction_id, name);
        indices
            .by_faction
            .insert(faction_id.to_string(), record.clone());

        Ok((record, Upsert::Created))
    }

    /// Snapshot of a player.
    pub fn find(&self, lookup: PlayerLookup<'_>) -> Option<PlayerRecord> {
        let indices = self.inner.read();
        let fid = indices.faction_for(lookup)?;
        indices.by_faction.get(fid).cloned()
    }

    /// Resolve a free-form reference: faction ID, Steam64 ID, Discord ID or name.
    pub fn find_any(&self, reference: &str) -> Option<PlayerRecord> {
        [
            PlayerLookup::Faction(reference),
            PlayerLookup::Steam(reference),
            PlayerLookup::Discord(reference),
            PlayerLookup::Name(reference),
        ]
        .into_iter()
        .find_map(|lookup| self.find(lookup))
    }

    /// Returns `false` if the player is unknown.
    pub fn set_online(&self, faction_id: &str, online: bool) -> bool {
        let mut indices = self.inner.write();
        match indices.by_faction.get_mut(faction_id) {
            Some(record) => {
                record.online = online;
                if !online {
                    record.ip = None;
                }
                true
            }
            None => false,
        }
    }

    pub fn set_ip(&self, faction_id: &str, ip: Option<String>) -> bool {
        let mut indices = self.inner.write();
        match indices.by_faction.get_mut(faction_id) {
            Some(record) => {
                record.ip = ip;
                true
            }
            None => false,
        }
    }

    pub fn set_name(&self, faction_id: &str, name: &str) -> Result<(), CacheError> {
        if name.is_empty() {
            return Err(CacheError::EmptyName);
        }
        let mut indices = self.inner.write();
        if !indices.by_faction.contains_key(faction_id) {
            return Err(CacheError::PlayerNotFound(faction_id.to_string()));
        }
        indices.rename(faction_id, name);
        Ok(())
    }

    pub fn set_loglevel(&self, faction_id: &str, loglevel: u8) -> bool {
        let mut indices = self.inner.write();
        match indices.by_faction.get_mut(faction_id) {
            Some(record) => {
                record.loglevel = loglevel;
                true
            }
            None => false,
        }
    }

    /// Map a Discord user to a player. Re-linking the same pair is a no-op.
    pub fn set_discord(&self, faction_id: &str, discord_id: &str) -> Result<(), CacheError> {
        let mut indices = self.inner.write();
        if !indices.by_faction.contains_key(faction_id) {
            return Err(CacheError::PlayerNotFound(faction_id.to_string()));
        }
        match indices.discord.get(discord_id) {
            Some(owner) if owner == faction_id => return Ok(()),
            Some(_) => return Err(CacheError::DiscordMapped(discord_id.to_string())),
            None => {}
        }

        let Some(record) = indices.by_faction.get_mut(faction_id) else {
            return Err(CacheError::PlayerNotFound(faction_id.to_string()));
        };
        let previous = record.discord_id.replace(discord_id.to_string());
        if let Some(previous) = previous {
            indices.discord.remove(&previous);
        }
        indices
            .discord
            .insert(discord_id.to_string(), faction_id.to_string());
        Ok(())
    }

    /// Append a jump to a player's history while holding the index lock.
    ///
    /// `alloc` runs only when the player exists, so the arena lock is always
    /// taken after the index lock.
    pub(super) fn record_jump<F>(&self, faction_id: &str, alloc: F) -> Option<JumpId>
    where
        F: FnOnce() -> JumpId,
    {
        let mut indices = self.inner.write();
        let record = indices.by_faction.get_mut(faction_id)?;
        let id = alloc();
        record.add_jump(id);
        Some(id)
    }

    pub fn contains(&self, faction_id: &str) -> bool {
        self.inner.read().by_faction.contains_key(faction_id)
    }

    pub fn players(&self) -> Vec<PlayerRecord> {
        self.inner.read().by_faction.values().cloned().collect()
    }

    pub fn online_players(&self) -> Vec<PlayerRecord> {
        self.inner
            .read()
            .by_faction
            .values()
            .filter(|p| p.online)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().by_faction.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn online_count(&self) -> usize {
        self.inner
            .read()
            .by_faction
            .values()
            .filter(|p| p.online)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STEAM: &str = "76561198000000001";

    #[test]
    fn create_then_find_by_every_key() {
        let cache = PlayerCache::new();
        let (record, created) = cache
            .get_or_create("42", STEAM, "Hal", Some("1234"))
            .unwrap();
        assert!(created);
        assert_eq!(record.loglevel, DEFAULT_LOGLEVEL);

        for lookup in [
            PlayerLookup::Faction("42"),
            PlayerLookup::Steam(STEAM),
            PlayerLookup::Discord("1234"),
            PlayerLookup::Name("Hal"),
        ] {
            assert_eq!(cache.find(lookup).unwrap().faction_id, "42");
        }
        assert!(cache.find(PlayerLookup::Faction("43")).is_none());
    }

    #[test]
    fn existing_faction_is_returned_not_duplicated() {
        let cache = PlayerCache::new();
        cache.get_or_create("42", STEAM, "Hal", None).unwrap();
        let (record, created) = cache.get_or_create("42", STEAM, "Hal 9000", None).unwrap();
        assert!(!created);
        assert_eq!(record.name, "Hal 9000");
        assert_eq!(cache.len(), 1);
        assert!(cache.find(PlayerLookup::Name("Hal")).is_none());
        assert!(cache.find(PlayerLookup::Name("Hal 9000")).is_some());
    }

    #[test]
    fn upsert_reports_renames() {
        let cache = PlayerCache::new();
        let (_, outcome) = cache.upsert("42", STEAM, "Hal", None).unwrap();
        assert_eq!(outcome, Upsert::Created);
        let (_, outcome) = cache.upsert("42", STEAM, "Hal", None).unwrap();
        assert_eq!(outcome, Upsert::Unchanged);
        let (record, outcome) = cache.upsert("42", STEAM, "Hal 9000", None).unwrap();
        assert_eq!(outcome, Upsert::Renamed);
        assert_eq!(record.name, "Hal 9000");
    }

    #[test]
    fn duplicate_name_keeps_first_holder() {
        let cache = PlayerCache::new();
        cache.get_or_create("1", STEAM, "Hal", None).unwrap();
        cache
            .get_or_create("2", "76561198000000002", "Hal", None)
            .unwrap();
        assert_eq!(cache.find(PlayerLookup::Name("Hal")).unwrap().faction_id, "1");
        assert_eq!(cache.find(PlayerLookup::Faction("2")).unwrap().name, "Hal");

        // Renaming into a taken name does not steal it either
        cache
            .get_or_create("3", "76561198000000003", "Dave", None)
            .unwrap();
        cache.set_name("3", "Hal").unwrap();
        assert_eq!(cache.find(PlayerLookup::Name("Hal")).unwrap().faction_id, "1");
        assert!(cache.find(PlayerLookup::Name("Dave")).is_none());
    }

    #[test]
    fn validation_errors() {
        let cache = PlayerCache::new();
        assert_eq!(
            cache.get_or_create("", STEAM, "Hal", None).unwrap_err(),
            CacheError::EmptyFactionId
        );
        assert_eq!(
            cache.get_or_create("1", "", "Hal", None).unwrap_err(),
            CacheError::EmptySteamId
        );
        assert_eq!(
            cache.get_or_create("1", STEAM, "", None).unwrap_err(),
            CacheError::EmptyName
        );
        assert_eq!(
            cache.get_or_create("1", "7656x", "Hal", None).unwrap_err(),
            CacheError::MalformedSteamId("7656x".to_string())
        );
        assert!(cache.is_empty());
    }

    #[test]
    fn identifiers_map_to_one_player() {
        let cache = PlayerCache::new();
        cache.get_or_create("1", STEAM, "Hal", Some("999")).unwrap();

        let err = cache
            .get_or_create("2", "76561198000000002", "Dave", Some("999"))
            .unwrap_err();
        assert_eq!(err, CacheError::DiscordMapped("999".to_string()));

        let err = cache.get_or_create("3", STEAM, "Frank", None).unwrap_err();
        assert!(matches!(err, CacheError::SteamMapped { faction_id, .. } if faction_id == "1"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn going_offline_clears_ip() {
        let cache = PlayerCache::new();
        cache.get_or_create("1", STEAM, "Hal", None).unwrap();
        assert!(cache.set_online("1", true));
        assert!(cache.set_ip("1", Some("10.0.0.7".to_string())));
        assert_eq!(cache.online_count(), 1);
        assert!(cache.set_online("1", false));
        let record = cache.find(PlayerLookup::Faction("1")).unwrap();
        assert!(!record.online);
        assert!(record.ip.is_none());
        assert!(!cache.set_online("nope", true));
    }

    #[test]
    fn discord_relink_moves_index() {
        let cache = PlayerCache::new();
        cache.get_or_create("1", STEAM, "Hal", Some("old")).unwrap();
        cache.set_discord("1", "new").unwrap();
        assert!(cache.find(PlayerLookup::Discord("old")).is_none());
        assert_eq!(cache.find(PlayerLookup::Discord("new")).unwrap().faction_id, "1");
        // Same pair again is fine
        cache.set_discord("1", "new").unwrap();
        assert_eq!(
            cache.set_discord("7", "x").unwrap_err(),
            CacheError::PlayerNotFound("7".to_string())
        );
    }

    #[test]
    fn find_any_checks_all_identifiers() {
        let cache = PlayerCache::new();
        cache.get_or_create("5", STEAM, "Hal", Some("321")).unwrap();
        assert_eq!(cache.find_any("5").unwrap().name, "Hal");
        assert_eq!(cache.find_any(STEAM).unwrap().name, "Hal");
        assert_eq!(cache.find_any("321").unwrap().name, "Hal");
        assert_eq!(cache.find_any("Hal").unwrap().faction_id, "5");
        assert!(cache.find_any("nobody").is_none());
    }
}
