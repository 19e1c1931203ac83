//! Jump records and the append-only arena that owns them.
//!
//! A jump is stored once in the [`JumpArena`] and referenced by [`JumpId`]
//! from both the acting entity's history and the destination sector's history.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;

/// Maximum number of jumps retained per player or alliance.
pub const MAX_JUMP_HISTORY: usize = 1000;

/// Index of a jump in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JumpId(pub usize);

/// Which kind of faction performed a jump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActorKind {
    Player,
    Alliance,
}

impl ActorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Player => "player",
            Self::Alliance => "alliance",
        }
    }
}

/// One observed hyperspace jump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JumpInfo {
    pub actor_kind: ActorKind,
    pub faction_id: String,
    pub ship_name: String,
    pub x: i64,
    pub y: i64,
    pub timestamp: DateTime<Utc>,
}

impl JumpInfo {
    pub fn coordinates(&self) -> (i64, i64) {
        (self.x, self.y)
    }
}

/// A jump that was just recorded, as published to the tracking topic.
#[derive(Debug, Clone)]
pub struct JumpEvent {
    pub id: JumpId,
    pub info: Arc<JumpInfo>,
}

/// Append-only storage for every jump seen during a run.
#[derive(Debug, Default)]
pub struct JumpArena {
    jumps: RwLock<Vec<Arc<JumpInfo>>>,
}

impl JumpArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, info: JumpInfo) -> (JumpId, Arc<JumpInfo>) {
        let info = Arc::new(info);
        let mut jumps = self.jumps.write();
        jumps.push(Arc::clone(&info));
        (JumpId(jumps.len() - 1), info)
    }

    pub fn get(&self, id: JumpId) -> Option<Arc<JumpInfo>> {
        self.jumps.read().get(id.0).cloned()
    }

    /// Resolve many ids under a single read lock, skipping unknown ones.
    pub fn resolve(&self, ids: impl IntoIterator<Item = JumpId>) -> Vec<Arc<JumpInfo>> {
        let jumps = self.jumps.read();
        ids.into_iter()
            .filter_map(|id| jumps.get(id.0).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.jumps.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jumps.read().is_empty()
    }
}

/// Bounded jump history, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JumpHistory {
    ids: VecDeque<JumpId>,
}

impl JumpHistory {
    pub fn push(&mut self, id: JumpId) {
        if self.ids.len() == MAX_JUMP_HISTORY {
            self.ids.pop_front();
        }
        self.ids.push_back(id);
    }

    /// The `n` most recent jumps, newest first.
    pub fn last(&self, n: usize) -> Vec<JumpId> {
        self.ids.iter().rev().take(n).copied().collect()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Shared behavior of entities that keep a jump history.
pub trait HasJumpHistory {
    fn name(&self) -> &str;
    fn faction_id(&self) -> &str;
    fn history(&self) -> &JumpHistory;
    fn history_mut(&mut self) -> &mut JumpHistory;

    fn add_jump(&mut self, id: JumpId) {
        self.history_mut().push(id);
    }

    fn last_jumps(&self, n: usize) -> Vec<JumpId> {
        self.history().last(n)
    }
}
