//! SQLite tracking store.

use super::{StoreError, TrackingStore};
use crate::cache::{ActorKind, CacheSnapshot, JumpInfo, TrackedEntity};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{info, warn};

static MEMDB_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Most recent jumps replayed on start. Older ones stay on disk only.
pub const SNAPSHOT_JUMP_LIMIT: i64 = 100_000;

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);
    const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

    /// Open (creating if missing) the database at `path`. `:memory:` gives a
    /// private in-memory database.
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let pool = if path == ":memory:" {
            // Named per call so parallel tests never share one
            let id = MEMDB_COUNTER.fetch_add(1, Ordering::Relaxed);
            let uri = format!(
                "file:galaxyd-memdb-{}-{}?mode=memory&cache=shared",
                std::process::id(),
                id
            );
            let options = SqliteConnectOptions::new()
                .filename(&uri)
                .shared_cache(true)
                .create_if_missing(true);
            SqlitePoolOptions::new()
                .max_connections(1)
                .acquire_timeout(Self::ACQUIRE_TIMEOUT)
                .idle_timeout(Some(Self::IDLE_TIMEOUT))
                .connect_with(options)
                .await?
        } else {
            if let Some(parent) = Path::new(path).parent()
                && !parent.as_os_str().is_empty()
                && let Err(e) = std::fs::create_dir_all(parent)
            {
                warn!(path = %parent.display(), error = %e, "Failed to create database directory");
            }
            let options = SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true);
            SqlitePoolOptions::new()
                .max_connections(4)
                .acquire_timeout(Self::ACQUIRE_TIMEOUT)
                .idle_timeout(Some(Self::IDLE_TIMEOUT))
                .connect_with(options)
                .await?
        };

        info!(path = %path, "Database connected");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn parse_kind(kind: &str) -> Result<ActorKind, StoreError> {
    match kind {
        "player" => Ok(ActorKind::Player),
        "alliance" => Ok(ActorKind::Alliance),
        other => Err(StoreError::Corrupt(format!("unknown actor kind `{other}`"))),
    }
}

type JumpRow = (String, String, String, i64, i64, i64);

fn jump_from_row((kind, faction_id, ship_name, x, y, at): JumpRow) -> Result<JumpInfo, StoreError> {
    let timestamp: DateTime<Utc> = DateTime::from_timestamp_millis(at)
        .ok_or_else(|| StoreError::Corrupt(format!("jump timestamp out of range: {at}")))?;
    Ok(JumpInfo {
        actor_kind: parse_kind(&kind)?,
        faction_id,
        ship_name,
        x,
        y,
        timestamp,
    })
}

#[async_trait]
impl TrackingStore for SqliteStore {
    async fn init(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations checked/applied");

        sqlx::query("PRAGMA journal_mode=WAL")
            .execute(&self.pool)
            .await?;
        sqlx::query("PRAGMA synchronous=NORMAL")
            .execute(&self.pool)
            .await?;

        let integrity: String = sqlx::query_scalar("PRAGMA integrity_check")
            .fetch_one(&self.pool)
            .await?;
        if integrity != "ok" {
            tracing::error!(integrity_check = %integrity, "Database integrity check FAILED");
            return Err(StoreError::Corrupt(integrity));
        }
        Ok(())
    }

    async fn load_snapshot(&self) -> Result<CacheSnapshot, StoreError> {
        let mut snapshot = CacheSnapshot::default();

        let players: Vec<(String, String, String, Option<String>)> = sqlx::query_as(
            "SELECT faction_id, steam64_id, name, discord_id FROM players ORDER BY rowid",
        )
        .fetch_all(&self.pool)
        .await?;
        snapshot.entities.extend(players.into_iter().map(
            |(faction_id, steam64_id, name, discord_id)| TrackedEntity::Player {
                faction_id,
                steam64_id,
                name,
                discord_id,
            },
        ));

        let alliances: Vec<(String, String)> =
            sqlx::query_as("SELECT faction_id, name FROM alliances ORDER BY rowid")
                .fetch_all(&self.pool)
                .await?;
        snapshot.entities.extend(
            alliances
                .into_iter()
                .map(|(faction_id, name)| TrackedEntity::Alliance { faction_id, name }),
        );

        let sectors: Vec<(i64, i64)> = sqlx::query_as("SELECT x, y FROM sectors ORDER BY rowid")
            .fetch_all(&self.pool)
            .await?;
        snapshot
            .entities
            .extend(sectors.into_iter().map(|(x, y)| TrackedEntity::Sector { x, y }));

        let jumps: Vec<JumpRow> = sqlx::query_as(
            r#"
            SELECT actor_kind, faction_id, ship_name, x, y, jumped_at FROM (
                SELECT id, actor_kind, faction_id, ship_name, x, y, jumped_at
                FROM jumps ORDER BY id DESC LIMIT ?
            ) ORDER BY id ASC
            "#,
        )
        .bind(SNAPSHOT_JUMP_LIMIT)
        .fetch_all(&self.pool)
        .await?;
        for row in jumps {
            match jump_from_row(row) {
                Ok(jump) => snapshot.jumps.push(jump),
                Err(e) => warn!(error = %e, "Skipping stored jump"),
            }
        }

        info!(
            entities = snapshot.entities.len(),
            jumps = snapshot.jumps.len(),
            "Loaded tracking snapshot"
        );
        Ok(snapshot)
    }

    async fn track_entity(&self, entity: &TrackedEntity) -> Result<(), StoreError> {
        match entity {
            TrackedEntity::Player {
                faction_id,
                steam64_id,
                name,
                discord_id,
            } => {
                sqlx::query(
                    r#"
                    INSERT INTO players (faction_id, steam64_id, name, discord_id, updated_at)
                    VALUES (?, ?, ?, ?, ?)
                    ON CONFLICT(faction_id) DO UPDATE SET
                        steam64_id = excluded.steam64_id,
                        name = excluded.name,
                        discord_id = excluded.discord_id,
                        updated_at = excluded.updated_at
                    "#,
                )
                .bind(faction_id)
                .bind(steam64_id)
                .bind(name)
                .bind(discord_id)
                .bind(now_millis())
                .execute(&self.pool)
                .await?;
            }
            TrackedEntity::Alliance { faction_id, name } => {
                sqlx::query(
                    r#"
                    INSERT INTO alliances (faction_id, name, updated_at) VALUES (?, ?, ?)
                    ON CONFLICT(faction_id) DO UPDATE SET
                        name = excluded.name,
                        updated_at = excluded.updated_at
                    "#,
                )
                .bind(faction_id)
                .bind(name)
                .bind(now_millis())
                .execute(&self.pool)
                .await?;
            }
            TrackedEntity::Sector { x, y } => {
                sqlx::query("INSERT OR IGNORE INTO sectors (x, y, first_seen) VALUES (?, ?, ?)")
                    .bind(x)
                    .bind(y)
                    .bind(now_millis())
                    .execute(&self.pool)
                    .await?;
            }
        }
        Ok(())
    }

    async fn record_jump(&self, jump: &JumpInfo) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("INSERT OR IGNORE INTO sectors (x, y, first_seen) VALUES (?, ?, ?)")
            .bind(jump.x)
            .bind(jump.y)
            .bind(now_millis())
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            r#"
            INSERT INTO jumps (actor_kind, faction_id, ship_name, x, y, jumped_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(jump.actor_kind.as_str())
        .bind(&jump.faction_id)
        .bind(&jump.ship_name)
        .bind(jump.x)
        .bind(jump.y)
        .bind(jump.timestamp.timestamp_millis())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::GalaxyCache;

    async fn store() -> SqliteStore {
        let store = SqliteStore::open(":memory:").await.unwrap();
        store.init().await.unwrap();
        store
    }

    #[tokio::test]
    async fn snapshot_replays_into_an_equal_cache() {
        let store = store().await;
        let source = GalaxyCache::new();
        let (player, _) = source
            .get_or_create_player("5", "76561190000000001", "Hal", Some("1234"))
            .unwrap();
        let (alliance, _) = source.get_or_create_alliance("9001", "Union").unwrap();
        store.track_entity(&TrackedEntity::from_player(&player)).await.unwrap();
        store.track_entity(&TrackedEntity::from_alliance(&alliance)).await.unwrap();

        for (i, faction) in ["5", "9001", "5"].into_iter().enumerate() {
            let jump = source
                .add_jump(faction, "Nomad", (3, -4), Utc::now())
                .unwrap();
            assert_eq!(jump.info.x, 3, "jump {i}");
            store.record_jump(&jump.info).await.unwrap();
        }

        let snapshot = store.load_snapshot().await.unwrap();
        assert_eq!(snapshot.entities.len(), 3); // player, alliance, sector
        assert_eq!(snapshot.jumps.len(), 3);

        let restored = GalaxyCache::new();
        let stats = restored.restore(snapshot);
        assert_eq!(stats.players, 1);
        assert_eq!(stats.alliances, 1);
        assert_eq!(stats.sectors, 1);
        assert_eq!(restored.last_jumps("5", 10).len(), 2);
        assert_eq!(restored.sector_jumps(3, -4).len(), 3);
        assert_eq!(
            restored
                .find(crate::cache::PlayerLookup::Discord("1234"))
                .map(|p| p.faction_id),
            Some("5".to_string())
        );
    }

    #[tokio::test]
    async fn upsert_renames() {
        let store = store().await;
        let alliance = |name: &str| TrackedEntity::Alliance {
            faction_id: "9001".to_string(),
            name: name.to_string(),
        };
        store.track_entity(&alliance("Union")).await.unwrap();
        store.track_entity(&alliance("Union II")).await.unwrap();
        let snapshot = store.load_snapshot().await.unwrap();
        assert_eq!(snapshot.entities, vec![alliance("Union II")]);
    }

    #[test]
    fn unknown_kind_is_corrupt() {
        let row: JumpRow = ("pirate".into(), "1".into(), "x".into(), 0, 0, 0);
        assert!(matches!(jump_from_row(row), Err(StoreError::Corrupt(_))));
    }
}
