//! Integration test common infrastructure.
//!
//! Provides a `/bin/sh` stand-in for the game server, a recording RCON
//! transport, and polling helpers.

pub mod game;
pub mod transport;

#[allow(unused_imports)]
pub use game::{FakeGame, STUBBORN, fails_after_first_launch};
#[allow(unused_imports)]
pub use transport::MockTransport;

use std::time::Duration;

/// Poll `check` until it holds or `timeout` elapses.
#[allow(dead_code)]
pub async fn eventually<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
