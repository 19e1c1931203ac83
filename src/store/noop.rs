//! No-op store that persists nothing.
//!
//! Used when no `[database]` section is configured.

use super::{StoreError, TrackingStore};
use crate::cache::{CacheSnapshot, JumpInfo, TrackedEntity};
use async_trait::async_trait;

pub struct NoOpStore;

#[async_trait]
impl TrackingStore for NoOpStore {
    async fn init(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn load_snapshot(&self) -> Result<CacheSnapshot, StoreError> {
        Ok(CacheSnapshot::default())
    }

    async fn track_entity(&self, _entity: &TrackedEntity) -> Result<(), StoreError> {
        Ok(())
    }

    async fn record_jump(&self, _jump: &JumpInfo) -> Result<(), StoreError> {
        Ok(())
    }
}
