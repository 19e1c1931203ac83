//! Integration tests for log lines flowing from the game into the cache and
//! onto the message bus, and for the command bus under contention.

mod common;

use common::{FakeGame, MockTransport, eventually};
use galaxyd::bus::{BusMessage, MessageBus, RconMessage, Topic};
use galaxyd::cache::{GalaxyCache, MAX_JUMP_HISTORY, PlayerLookup};
use galaxyd::error::RegistryError;
use galaxyd::events::{EVENT_NONE, EventContext, Registry, Severity, builtin_registry, from_fn};
use galaxyd::rcon::CommandBus;
use galaxyd::{ServerState, Supervisor};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Dispatch context backed by an online command bus over `transport`.
fn context(transport: Arc<MockTransport>) -> (EventContext, watch::Sender<ServerState>) {
    let (state_tx, state_rx) = watch::channel(ServerState::Online);
    let commands = CommandBus::spawn(
        transport,
        state_rx,
        Duration::from_secs(5),
        CancellationToken::new(),
        &TaskTracker::new(),
    );
    let ctx = EventContext::new(
        Arc::new(GalaxyCache::new()),
        Arc::new(MessageBus::new(64)),
        commands,
        Default::default(),
    );
    (ctx, state_tx)
}

#[tokio::test]
async fn test_duplicate_registration_leaves_registry_unchanged() {
    let mut registry = Registry::new();
    let noop = || from_fn(|_, _| Ok(()));
    registry
        .register("First", r"^first (\d+)$", Severity::Info, noop())
        .unwrap();

    let err = registry
        .register("First", r"^other$", Severity::Info, noop())
        .unwrap_err();
    assert!(matches!(err, RegistryError::DuplicateName(ref n) if n == "First"));

    let err = registry
        .register("Second", r"^first (\d+)$", Severity::Info, noop())
        .unwrap_err();
    assert!(matches!(err, RegistryError::DuplicatePattern { ref existing, .. } if existing == "First"));

    // Equivalent but not identical sources are distinct patterns
    registry
        .register("Third", r"^first ([0-9]+)$", Severity::Info, noop())
        .unwrap();
    let names: Vec<_> = registry.rules().map(|r| r.name().to_string()).collect();
    assert_eq!(names, ["First", "Third"]);
}

#[tokio::test]
async fn test_first_match_wins_and_catch_all_runs_last() {
    let (ctx, _state) = context(Arc::new(MockTransport::default()));
    let hits = Arc::new([AtomicUsize::new(0), AtomicUsize::new(0), AtomicUsize::new(0)]);

    let mut registry = Registry::new();
    for (i, (name, pattern)) in [("Specific", r"^jump (\d+)$"), ("General", r"^jump"), ("None", ".*")]
        .into_iter()
        .enumerate()
    {
        let hits = Arc::clone(&hits);
        registry
            .register(
                name,
                pattern,
                Severity::Debug,
                from_fn(move |_, _| {
                    hits[i].fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            )
            .unwrap();
    }

    assert_eq!(registry.dispatch("jump 5", &ctx), Some("Specific"));
    assert_eq!(registry.dispatch("jump away", &ctx), Some("General"));
    assert_eq!(registry.dispatch("something else", &ctx), Some("None"));
    let counts: Vec<_> = hits.iter().map(|h| h.load(Ordering::SeqCst)).collect();
    assert_eq!(counts, [1, 1, 1]);
}

#[tokio::test]
async fn test_join_line_creates_online_player() {
    let (ctx, _state) = context(Arc::new(MockTransport::default()));
    let registry = builtin_registry(&[]).unwrap();

    let rule = registry.dispatch("playerJoinEvent: 5 76561190000000001", &ctx);
    assert_eq!(rule, Some("EventPlayerJoin"));

    let player = ctx.cache.find(PlayerLookup::Faction("5")).expect("player tracked");
    assert!(player.online);
    assert_eq!(player.steam64_id, "76561190000000001");
}

#[tokio::test]
async fn test_two_jumps_into_one_sector() {
    let (ctx, _state) = context(Arc::new(MockTransport::default()));
    let registry = builtin_registry(&[]).unwrap();
    let (mut tracking, _c) = ctx.bus.subscribe(Topic::Tracking);

    registry.dispatch("playerJoinEvent: 5 76561190000000001 Hal", &ctx);
    registry.dispatch("shipJumpEvent: 5 3:-4 Nomad", &ctx);
    registry.dispatch("shipJumpEvent: 5 3:-4 Wanderer", &ctx);

    assert_eq!(ctx.cache.stats().sectors, 1);
    let jumps = ctx.cache.sector_jumps(3, -4);
    let ships: Vec<_> = jumps.iter().map(|j| j.ship_name.as_str()).collect();
    assert_eq!(ships, ["Nomad", "Wanderer"]);

    // Player, then the new sector once, then both jumps
    let mut kinds = Vec::new();
    while let Ok(Some(message)) =
        tokio::time::timeout(Duration::from_millis(100), tracking.recv()).await
    {
        kinds.push(match message {
            BusMessage::Tracked(_) => "tracked",
            BusMessage::Jump(_) => "jump",
            _ => "other",
        });
    }
    assert_eq!(kinds, ["tracked", "tracked", "jump", "jump"]);
}

#[tokio::test]
async fn test_jump_history_is_capped() {
    let cache = GalaxyCache::new();
    cache
        .get_or_create_player("5", "76561190000000001", "Hal", None)
        .unwrap();

    for i in 0..=MAX_JUMP_HISTORY {
        let ship = format!("ship-{i}");
        cache
            .add_jump("5", &ship, (i as i64, 0), chrono::Utc::now())
            .unwrap();
    }

    let newest_first = cache.last_jumps("5", MAX_JUMP_HISTORY + 10);
    assert_eq!(newest_first.len(), MAX_JUMP_HISTORY);
    assert_eq!(newest_first[0].ship_name, format!("ship-{MAX_JUMP_HISTORY}"));
    assert_eq!(newest_first[MAX_JUMP_HISTORY - 1].ship_name, "ship-1");
}

#[tokio::test]
async fn test_malformed_lines_are_absorbed() {
    let (ctx, _state) = context(Arc::new(MockTransport::default()));
    let registry = builtin_registry(&[]).unwrap();

    for line in [
        "shipJumpEvent: 5 99999999999999999999:1 Overflow",
        "playerJoinEvent: 5",
        "playerLeftEvent: 404",
        "doPlayerKickEvent: 404 spamming",
        "",
        "\u{0}\u{fffd}",
    ] {
        assert!(registry.dispatch(line, &ctx).is_some(), "line {line:?}");
    }
    assert_eq!(registry.classify("totally unknown"), Some(EVENT_NONE));
    assert_eq!(ctx.cache.stats().sectors, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_submitters_never_overlap() {
    let transport = Arc::new(MockTransport::with_delay(Duration::from_millis(2)));
    let (ctx, _state) = context(Arc::clone(&transport));

    let mut handles = Vec::new();
    for task in 0..8 {
        let commands = ctx.commands.clone();
        handles.push(tokio::spawn(async move {
            for i in 0..5 {
                commands
                    .submit("say", vec![format!("{task}-{i}")])
                    .await
                    .unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(transport.commands().len(), 40);
    assert_eq!(transport.max_in_flight(), 1);
}

#[tokio::test]
async fn test_game_output_reaches_cache_and_chat() {
    let game = FakeGame::healthy();
    let transport = Arc::new(MockTransport::new(game.stop_file()));
    let supervisor = Supervisor::builder(game.config(""))
        .transport(transport.clone())
        .build()
        .unwrap();
    let (mut chat, _c) = supervisor.bus().subscribe(Topic::ChatOutbound);
    supervisor.start().await.unwrap();

    game.emit(&[
        "playerJoinEvent: 5 76561190000000001 Hal",
        "<Hal> Open the pod bay doors",
        "shipJumpEvent: 5 3:-4 Discovery",
        "shipJumpEvent: 5 3:-4 Discovery",
    ]);

    let cache = Arc::clone(supervisor.cache());
    assert!(
        eventually(Duration::from_secs(5), || cache.sector_jumps(3, -4).len() == 2).await,
        "jumps never arrived: {:?}",
        cache.stats()
    );
    assert!(cache.find(PlayerLookup::Faction("5")).unwrap().online);

    let mut lines = Vec::new();
    while let Ok(Some(BusMessage::Chat(data))) =
        tokio::time::timeout(Duration::from_millis(500), chat.recv()).await
    {
        lines.push((data.name, data.uid, data.msg));
    }
    assert_eq!(
        lines,
        [
            ("Server".into(), String::new(), "Player Hal has logged in".into()),
            ("Hal".into(), "5".into(), "Open the pod bay doors".into()),
        ]
    );

    supervisor.shutdown().await;
}

#[tokio::test]
async fn test_rcon_topic_is_bridged_into_the_game() {
    let game = FakeGame::healthy();
    let transport = Arc::new(MockTransport::new(game.stop_file()));
    let supervisor = Supervisor::builder(game.config(""))
        .transport(transport.clone())
        .build()
        .unwrap();
    supervisor.start().await.unwrap();

    supervisor.bus().send(BusMessage::Rcon(RconMessage {
        command: "say".to_string(),
        arguments: vec!["hello".to_string()],
    }));
    assert!(
        eventually(Duration::from_secs(5), || transport
            .commands()
            .iter()
            .any(|c| c == "say hello"))
        .await
    );

    supervisor.shutdown().await;
}

#[tokio::test]
async fn test_kick_resolves_player_by_any_reference() {
    let game = FakeGame::healthy();
    let transport = Arc::new(MockTransport::new(game.stop_file()));
    let supervisor = Supervisor::builder(game.config(""))
        .transport(transport.clone())
        .build()
        .unwrap();
    supervisor.start().await.unwrap();
    supervisor
        .cache()
        .get_or_create_player("5", "76561190000000001", "Hal", None)
        .unwrap();

    supervisor
        .kick_player("76561190000000001", "insubordination")
        .await
        .unwrap();
    assert!(
        transport
            .commands()
            .iter()
            .any(|c| c == "kick Hal \"insubordination\"")
    );

    let err = supervisor.ban_player("nobody", "x").await.unwrap_err();
    assert_eq!(err.error_code(), "player_not_found");

    supervisor.link_discord("5", "123456789").await.unwrap();
    assert_eq!(
        supervisor
            .cache()
            .find(PlayerLookup::Discord("123456789"))
            .map(|p| p.faction_id),
        Some("5".to_string())
    );
    assert!(
        transport
            .commands()
            .iter()
            .any(|c| c == "linkdiscordacct 5 123456789")
    );

    supervisor.shutdown().await;
}

#[tokio::test]
async fn test_refresh_reads_playerinfo() {
    let game = FakeGame::healthy();
    let transport = Arc::new(MockTransport::new(game.stop_file()));
    *transport.playerinfo.lock() = "\
76561190000000001 5 Hal currently logged in, playtime: 1h
76561190000000002 6 Dave last online: 2024-01-01, playtime: 2h
Hal Alliance: 9001 Discovery Crew 10 Credits, 0 Iron
"
    .to_string();
    let supervisor = Supervisor::builder(game.config(""))
        .transport(transport.clone())
        .build()
        .unwrap();
    supervisor.start().await.unwrap();

    let summary = supervisor.refresh_players().await.unwrap();
    assert_eq!(summary.players, 2);
    assert_eq!(summary.alliances, 1);

    let stats = supervisor.status().cache;
    assert_eq!(stats.players, 2);
    assert_eq!(stats.online_players, 1);
    assert!(
        transport
            .commands()
            .iter()
            .any(|c| c == "playerinfo -o -i -s -t")
    );

    supervisor.shutdown().await;
}
