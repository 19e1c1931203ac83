//! Alliance tracking.

use super::Upsert;
use super::jump::{HasJumpHistory, JumpHistory, JumpId};
use super::player::DEFAULT_LOGLEVEL;
use crate::error::CacheError;
use parking_lot::RwLock;
use std::collections::HashMap;

/// A tracked alliance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllianceRecord {
    pub faction_id: String,
    pub name: String,
    pub jump_history: JumpHistory,
    pub loglevel: u8,
}

impl HasJumpHistory for AllianceRecord {
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

#[derive(Debug, Default)]
pub struct AllianceCache {
    inner: RwLock<HashMap<String, AllianceRecord>>,
}

impl AllianceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the alliance for `faction_id`, creating it if needed. A changed
    /// name is applied to an existing record.
    pub fn get_or_create(
        &self,
        faction_id: &str,
        name: &str,
    ) -> Result<(AllianceRecord, bool), CacheError> {
        self.upsert(faction_id, name)
            .map(|(record, outcome)| (record, outcome.is_created()))
    }

    pub fn upsert(
        &self,
        faction_id: &str,
        name: &str,
    ) -> Result<(AllianceRecord, Upsert), CacheError> {
        if faction_id.is_empty() {
            return Err(CacheError::EmptyFactionId);
        }
        if name.is_empty() {
            return Err(CacheError::EmptyName);
        }

        let mut alliances = self.inner.write();
        if let Some(existing) = alliances.get_mut(faction_id) {
            if existing.name == name {
                return Ok((existing.clone(), Upsert::Unchanged));
            }
            existing.name = name.to_string();
            return Ok((existing.clone(), Upsert::Renamed));
        }

        let record = AllianceRecord {
            faction_id: faction_id.to_string(),
            name: name.to_string(),
            jump_history: JumpHistory::default(),
            loglevel: DEFAULT_LOGLEVEL,
        };
        alliances.insert(faction_id.to_string(), record.clone());
        Ok((record, Upsert::Created))
    }

    pub fn find(&self, faction_id: &str) -> Option<AllianceRecord> {
        self.inner.read().get(faction_id).cloned()
    }

    pub fn find_by_name(&self, name: &str) -> Option<AllianceRecord> {
        self.inner.read().values().find(|a| a.name == name).cloned()
    }

    pub fn contains(&self, faction_id: &str) -> bool {
        self.inner.read().contains_key(faction_id)
    }

    pub(super) fn record_jump<F>(&self, faction_id: &str, alloc: F) -> Option<JumpId>
    where
        F: FnOnce() -> JumpId,
    {
        let mut alliances = self.inner.write();
        let record = alliances.get_mut(faction_id)?;
        let id = alloc();
        record.add_jump(id);
        Some(id)
    }

    pub fn alliances(&self) -> Vec<AllianceRecord> {
        self.inner.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_or_create_is_idempotent() {
        let cache = AllianceCache::new();
        let (_, created) = cache.get_or_create("9001", "Trade Union").unwrap();
        assert!(created);
        let (record, created) = cache.get_or_create("9001", "Trade Guild").unwrap();
        assert!(!created);
        assert_eq!(record.name, "Trade Guild");
        assert_eq!(cache.len(), 1);
        assert!(cache.find_by_name("Trade Guild").is_some());

        let (_, outcome) = cache.upsert("9001", "Trade Guild").unwrap();
        assert_eq!(outcome, Upsert::Unchanged);
        let (_, outcome) = cache.upsert("9001", "Trade Union").unwrap();
        assert_eq!(outcome, Upsert::Renamed);
    }

    #[test]
    fn rejects_empty_fields() {
        let cache = AllianceCache::new();
        assert_eq!(
            cache.get_or_create("", "x").unwrap_err(),
            CacheError::EmptyFactionId
        );
        assert_eq!(
            cache.get_or_create("1", "").unwrap_err(),
            CacheError::EmptyName
        );
    }
}
