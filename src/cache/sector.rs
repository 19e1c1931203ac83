//! Sector tracking, sharded by coordinates.

use super::jump::JumpId;
use dashmap::DashMap;

/// A sector that has been seen in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectorRecord {
    pub x: i64,
    pub y: i64,
    /// Every jump into this sector, in arrival order.
    pub jump_history: Vec<JumpId>,
}

impl SectorRecord {
    fn new(x: i64, y: i64) -> Self {
        Self {
            x,
            y,
            jump_history: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
pub struct SectorCache {
    sectors: DashMap<(i64, i64), SectorRecord>,
}

impl SectorCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensure a sector exists. Returns `true` if it was created.
    pub fn touch(&self, x: i64, y: i64) -> bool {
        let mut created = false;
        self.sectors.entry((x, y)).or_insert_with(|| {
            created = true;
            SectorRecord::new(x, y)
        });
        created
    }

    /// Record a jump into a sector, creating the sector if needed.
    pub fn record_jump(&self, x: i64, y: i64, id: JumpId) -> bool {
        let mut created = false;
        self.sectors
            .entry((x, y))
            .or_insert_with(|| {
                created = true;
                SectorRecord::new(x, y)
            })
            .jump_history
            .push(id);
        created
    }

    pub fn get(&self, x: i64, y: i64) -> Option<SectorRecord> {
        self.sectors.get(&(x, y)).map(|s| s.clone())
    }

    pub fn len(&self) -> usize {
        self.sectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sectors.is_empty()
    }
}
