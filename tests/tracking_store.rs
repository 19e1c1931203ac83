//! Integration tests for tracking persistence.
//!
//! Entities tracked during one supervisor's lifetime are written to SQLite by
//! the persistence task and replayed into a fresh cache on the next start.

mod common;

use common::{FakeGame, MockTransport, eventually};
use galaxyd::Supervisor;
use galaxyd::cache::PlayerLookup;
use galaxyd::store::{SqliteStore, TrackingStore, run_persistence};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

async fn open_store(path: &std::path::Path) -> Arc<SqliteStore> {
    let store = SqliteStore::open(&path.display().to_string())
        .await
        .expect("open store");
    store.init().await.expect("init store");
    Arc::new(store)
}

#[tokio::test]
async fn test_tracked_entities_survive_a_supervisor_restart() {
    let game = FakeGame::healthy();
    let db_dir = tempfile::TempDir::new().unwrap();
    let db_path = db_dir.path().join("nested").join("tracking.db");

    // First lifetime: a player joins and jumps into a new sector
    {
        let store = open_store(&db_path).await;
        let shutdown = CancellationToken::new();
        let supervisor = Supervisor::builder(game.config(""))
            .transport(Arc::new(MockTransport::new(game.stop_file())))
            .store(store.clone())
            .shutdown(shutdown.clone())
            .build()
            .unwrap();
        let persistence = tokio::spawn(run_persistence(
            store.clone(),
            Arc::clone(supervisor.bus()),
            shutdown.clone(),
        ));
        supervisor.start().await.unwrap();

        game.emit(&[
            "playerJoinEvent: 5 76561190000000001 Hal",
            "shipJumpEvent: 5 3:-4 Discovery",
        ]);
        let cached = eventually(Duration::from_secs(5), || {
            supervisor.cache().sector_jumps(3, -4).len() == 1
        })
        .await;
        assert!(cached);

        // Persistence is asynchronous; wait for the jump to land
        let mut snapshot = store.load_snapshot().await.unwrap();
        for _ in 0..100 {
            if !snapshot.jumps.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
            snapshot = store.load_snapshot().await.unwrap();
        }
        assert_eq!(snapshot.entities.len(), 2, "{:?}", snapshot.entities);
        assert_eq!(snapshot.jumps.len(), 1);

        supervisor.shutdown().await;
        persistence.await.unwrap();
        store.pool().close().await;
    }

    // Second lifetime: the cache is rebuilt once the game is online
    let store = open_store(&db_path).await;
    let supervisor = Supervisor::builder(game.config(""))
        .transport(Arc::new(MockTransport::new(game.stop_file())))
        .store(store.clone())
        .build()
        .unwrap();
    assert_eq!(supervisor.status().cache.players, 0);

    supervisor.start().await.unwrap();
    let cache = supervisor.cache();
    let player = cache.find(PlayerLookup::Faction("5")).expect("player replayed");
    assert_eq!(player.name, "Hal");
    assert!(!player.online, "online state is not persisted");
    assert_eq!(cache.last_jumps("5", 10).len(), 1);
    assert_eq!(cache.sector_jumps(3, -4).len(), 1);

    supervisor.shutdown().await;
}
