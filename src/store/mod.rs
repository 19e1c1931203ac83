//! Tracking store abstraction.
//!
//! The entity cache is the source of truth while the daemon runs; a store
//! only persists what the cache publishes on the `tracking` topic and hands
//! it back as a snapshot on the next start.

use crate::bus::{BusMessage, MessageBus, Topic};
use crate::cache::{CacheSnapshot, JumpInfo, TrackedEntity};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub mod noop;
pub mod sqlite;

pub use noop::NoOpStore;
pub use sqlite::SqliteStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Sqlx(_) => "sqlx",
            Self::Migration(_) => "migration",
            Self::Corrupt(_) => "corrupt",
        }
    }
}

#[async_trait]
pub trait TrackingStore: Send + Sync {
    /// Prepare the backing storage. Called once before anything else.
    async fn init(&self) -> Result<(), StoreError>;

    /// Everything persisted so far, in replay order.
    async fn load_snapshot(&self) -> Result<CacheSnapshot, StoreError>;

    /// Insert or update a player, alliance or sector.
    async fn track_entity(&self, entity: &TrackedEntity) -> Result<(), StoreError>;

    /// Append a jump.
    async fn record_jump(&self, jump: &JumpInfo) -> Result<(), StoreError>;
}

/// Persist `tracking` topic messages until `shutdown` fires.
///
/// The subscription is lossless: a burst of jumps is queued rather than
/// dropped, and whatever is still queued at shutdown is written before the
/// task returns. Write failures are logged and skipped.
pub async fn run_persistence(
    store: Arc<dyn TrackingStore>,
    bus: Arc<MessageBus<BusMessage>>,
    shutdown: CancellationToken,
) {
    let (mut inbox, canceller) = bus.subscribe_lossless(Topic::Tracking);
    info!("Persistence task started");
    loop {
        let message = tokio::select! {
            biased;
            message = inbox.recv() => message,
            _ = shutdown.cancelled() => break,
        };
        match message {
            Some(message) => persist(store.as_ref(), message).await,
            None => break,
        }
    }
    canceller.cancel();

    let backlog = inbox.drain();
    if !backlog.is_empty() {
        info!(pending = backlog.len(), "Flushing tracking backlog");
    }
    for message in backlog {
        persist(store.as_ref(), message).await;
    }
    info!("Persistence task stopped");
}

async fn persist(store: &dyn TrackingStore, message: BusMessage) {
    let result = match message {
        BusMessage::Tracked(entity) => store.track_entity(&entity).await,
        BusMessage::Jump(jump) => store.record_jump(&jump.info).await,
        other => {
            debug!(topic = %other.topic(), "Ignoring message on tracking topic");
            Ok(())
        }
    };
    if let Err(e) = result {
        warn!(error = %e, code = e.error_code(), "Failed to persist tracking data");
    }
}
