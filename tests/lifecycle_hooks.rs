//! Integration test for operator hook scripts around a full start/stop cycle.
//!
//! Kept to a single test so no other test in this binary forks while the hook
//! scripts are being written.

#![cfg(unix)]

mod common;

use common::{FakeGame, MockTransport, eventually};
use galaxyd::cache::PlayerLookup;
use galaxyd::{ServerState, Supervisor};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_hooks_run_around_the_game() {
    let game = FakeGame::healthy();
    let dir = game.path().display().to_string();

    let pre = game.hook(
        "pre_start.sh",
        &format!("echo \"$SAVEPATH $RCONPORT $RCONPASS\" > {dir}/pre_start.out"),
    );
    // Output of the post-up hook joins the game's log feed
    let post_up = game.hook(
        "post_up.sh",
        "echo \"playerJoinEvent: 7 76561190000000007 Frank\"\nexec sleep 30",
    );
    let post_down = game.hook(
        "post_down.sh",
        &format!("echo \"$SAVEPATH\" > {dir}/post_down.out"),
    );

    let config = game.config(&format!(
        "[hooks]\npre_start = \"{}\"\npost_up = \"{}\"\npost_down = \"{}\"\n",
        pre.display(),
        post_up.display(),
        post_down.display()
    ));
    let supervisor = Supervisor::builder(Arc::clone(&config))
        .transport(Arc::new(MockTransport::new(game.stop_file())))
        .build()
        .unwrap();

    supervisor.start().await.unwrap();
    let savepath = config.game.galaxy_path().display().to_string();
    let pre_out = std::fs::read_to_string(game.path().join("pre_start.out")).unwrap();
    assert_eq!(
        pre_out.trim(),
        format!("{savepath} {} integration", config.rcon.port)
    );

    let cache = Arc::clone(supervisor.cache());
    assert!(
        eventually(Duration::from_secs(5), || cache
            .find(PlayerLookup::Faction("7"))
            .is_some())
        .await,
        "post-up output never reached the dispatcher"
    );

    // Stopping tears down the still-running post-up hook and runs post-down
    supervisor.stop().await.unwrap();
    assert_eq!(supervisor.state(), ServerState::Offline);
    let post_out = std::fs::read_to_string(game.path().join("post_down.out")).unwrap();
    assert_eq!(post_out.trim(), savepath);

    supervisor.shutdown().await;
}
